//! Chat-completion client for code generation.
//!
//! [`AgentClient`] talks to an OpenAI-compatible endpoint, preferring the
//! streaming transport and degrading to a buffered request when streaming is
//! disabled. The orchestrator depends on the [`CodeGenerator`] trait only,
//! so stage logic is testable with a scripted generator.

mod extract;
pub mod prompts;

pub use extract::{Extracted, extract_code};

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::bridge::EvalResult;
use crate::config::{Config, SYSTEM_PROMPT};
use crate::errors::SolveError;
use crate::stream::StreamDecoder;
use crate::workbench::TaskContent;

/// Produces a code artifact for a stage. One method per attempt kind since
/// retries carry different context than first attempts.
#[async_trait]
pub trait CodeGenerator: Send {
    async fn generate_first(
        &self,
        task: &TaskContent,
        skeleton: &str,
    ) -> Result<String, SolveError>;

    async fn generate_retry(
        &self,
        task: &TaskContent,
        previous_code: &str,
        eval: Option<&EvalResult>,
    ) -> Result<String, SolveError>;
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

pub struct AgentClient {
    http: reqwest::Client,
    config: Config,
}

impl AgentClient {
    pub fn new(config: Config) -> Result<Self, SolveError> {
        config.ensure_generation_config()?;
        let http = reqwest::Client::builder()
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { http, config })
    }

    fn request_body(&self, user_prompt: &str, stream: bool) -> serde_json::Value {
        let mut body = json!({
            "model": self.config.model,
            "temperature": self.config.temperature,
            "max_tokens": self.config.max_tokens,
            "stream": stream,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": user_prompt},
            ],
        });
        if self.config.enable_thinking {
            body["enable_thinking"] = json!(true);
            body["thinking_budget"] = json!(self.config.thinking_budget);
        }
        body
    }

    async fn complete(&self, user_prompt: &str) -> Result<String, SolveError> {
        let raw = if self.config.use_stream {
            self.complete_streaming(user_prompt).await?
        } else {
            self.complete_buffered(user_prompt).await?
        };
        finalize_artifact(&raw)
    }

    async fn complete_streaming(&self, user_prompt: &str) -> Result<String, SolveError> {
        let url = self.config.chat_completions_url();
        debug!(url = %url, model = %self.config.model, "starting streaming generation");

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&self.request_body(user_prompt, true))
            .send()
            .await
            .context("Generation request failed")?;
        let response = check_status(response).await?;

        let stall = Duration::from_secs(self.config.stall_timeout_secs);
        let mut body = response.bytes_stream();
        let mut decoder = StreamDecoder::new();

        loop {
            let next = match tokio::time::timeout(stall, body.next()).await {
                Ok(next) => next,
                Err(_) => {
                    // Stalled mid-stream. Whatever arrived is better than a
                    // wasted attempt, as long as there is something.
                    if decoder.has_output() {
                        warn!(
                            stall_secs = stall.as_secs(),
                            "stream stalled; accepting partial output"
                        );
                        return Ok(decoder.partial_content().to_string());
                    }
                    return Err(anyhow!(
                        "Stream stalled for {}s with no output",
                        stall.as_secs()
                    )
                    .into());
                }
            };
            match next {
                Some(Ok(bytes)) => {
                    // Raw bytes straight through: the decoder owns line and
                    // character reassembly across chunk boundaries.
                    decoder.push_chunk(&bytes);
                }
                Some(Err(e)) => {
                    if decoder.has_output() {
                        warn!("stream broke ({}); accepting partial output", e);
                        return Ok(decoder.partial_content().to_string());
                    }
                    return Err(anyhow!(e).context("Stream transport failed").into());
                }
                None => break,
            }
        }

        match decoder.finish() {
            Ok(artifact) => {
                info!(
                    output_tokens = artifact.output_tokens,
                    reasoning_tokens = artifact.reasoning_tokens,
                    "generation stream complete"
                );
                Ok(artifact.content)
            }
            Err(e) => {
                warn!("{}", e);
                Err(SolveError::GenerationEmpty)
            }
        }
    }

    async fn complete_buffered(&self, user_prompt: &str) -> Result<String, SolveError> {
        let url = self.config.chat_completions_url();
        debug!(url = %url, model = %self.config.model, "starting buffered generation");

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&self.request_body(user_prompt, false))
            .send()
            .await
            .context("Generation request failed")?;
        let response = check_status(response).await?;

        let parsed: ChatResponse = response
            .json()
            .await
            .context("Failed to parse generation response")?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or(SolveError::GenerationEmpty)
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, SolveError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let snippet: String = body.chars().take(300).collect();
    Err(anyhow!("Generation endpoint returned {}: {}", status, snippet).into())
}

/// Run extraction over raw model text and reject artifacts with no substance.
fn finalize_artifact(raw: &str) -> Result<String, SolveError> {
    let extracted = extract_code(raw);
    if extracted.code.trim().is_empty() {
        return Err(SolveError::GenerationEmpty);
    }
    if extracted.likely_parse_failure {
        warn!("generated artifact does not look like code; submitting anyway");
    }
    Ok(extracted.code)
}

#[async_trait]
impl CodeGenerator for AgentClient {
    async fn generate_first(
        &self,
        task: &TaskContent,
        skeleton: &str,
    ) -> Result<String, SolveError> {
        self.complete(&prompts::first_attempt_prompt(task, skeleton))
            .await
    }

    async fn generate_retry(
        &self,
        task: &TaskContent,
        previous_code: &str,
        eval: Option<&EvalResult>,
    ) -> Result<String, SolveError> {
        self.complete(&prompts::retry_prompt(task, previous_code, eval))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigFile;
    use std::path::PathBuf;

    fn client() -> AgentClient {
        let file = ConfigFile {
            base_url: Some("https://llm.test/v1".to_string()),
            api_key: Some("sk-test".to_string()),
            model: Some("glm-test".to_string()),
            ..Default::default()
        };
        let config = Config::from_parts(PathBuf::from("/tmp"), file, false);
        AgentClient::new(config).unwrap()
    }

    #[test]
    fn test_request_body_carries_system_prompt_and_model() {
        let body = client().request_body("do the thing", true);
        assert_eq!(body["model"], "glm-test");
        assert_eq!(body["stream"], true);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "do the thing");
        assert!(body.get("enable_thinking").is_none());
    }

    #[test]
    fn test_request_body_includes_thinking_when_enabled() {
        let mut c = client();
        c.config.enable_thinking = true;
        c.config.thinking_budget = 2048;
        let body = c.request_body("p", true);
        assert_eq!(body["enable_thinking"], true);
        assert_eq!(body["thinking_budget"], 2048);
    }

    #[test]
    fn test_new_rejects_unconfigured_endpoint() {
        let config = Config::from_parts(PathBuf::from("/tmp"), ConfigFile::default(), false);
        assert!(matches!(
            AgentClient::new(config),
            Err(SolveError::Config(_))
        ));
    }

    #[test]
    fn test_finalize_extracts_fenced_code() {
        let code = finalize_artifact("```java\nclass A {}\n```").unwrap();
        assert_eq!(code, "class A {}");
    }

    #[test]
    fn test_finalize_rejects_blank_output() {
        assert!(matches!(
            finalize_artifact("   \n  "),
            Err(SolveError::GenerationEmpty)
        ));
    }
}
