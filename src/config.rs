//! Runtime configuration for Autosolve.
//!
//! Settings are read from `autosolve.toml` in the project directory, then
//! overridden by environment variables (`AUTOSOLVE_BASE_URL`,
//! `AUTOSOLVE_API_KEY`, `AUTOSOLVE_MODEL`). Validation happens up front so a
//! misconfigured run aborts before touching any durable state.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::errors::SolveError;

/// System prompt sent with every generation request. The rules mirror what
/// the grading platform expects: a complete file back, fill only the marked
/// regions, no prose or fences.
pub const SYSTEM_PROMPT: &str = "\
You are a strict code-completion assistant for fill-in-the-blank exercises on \
an online judge.

## Rules
1. You receive a COMPLETE template file with one or more begin/end (or \
BEGIN/END) comment-marked regions to fill in.
2. You must return the ENTIRE file: package declaration, imports, class and \
method signatures, everything already present, with correct implementations \
inside the begin/end regions.
3. Never return only the filled regions; always the whole file.
4. No explanations, no commentary, no Markdown fences.
5. Do not modify anything outside the begin/end regions.
6. Preserve the original indentation and formatting.

## Output format
Emit the raw source file from its first line to its last, with no prefix or \
suffix text.";

/// On-disk shape of `autosolve.toml`. Every field is optional; defaults are
/// applied when the file or a field is absent.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
    pub use_stream: Option<bool>,
    pub enable_thinking: Option<bool>,
    pub thinking_budget: Option<u32>,
    pub max_retry_count: Option<u32>,
    pub result_timeout_secs: Option<u64>,
    pub stall_timeout_secs: Option<u64>,
    pub max_stages: Option<u32>,
    #[serde(default)]
    pub workbench: WorkbenchConfig,
}

/// Commands the workbench adapter runs for each collaborator operation.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WorkbenchConfig {
    /// Prints the problem statement; lines starting with `IMAGE:` become
    /// image references.
    pub task_cmd: Option<String>,
    /// Resets the editor and prints the original skeleton payload as JSON.
    pub skeleton_cmd: Option<String>,
    /// Receives the generated artifact on stdin.
    pub write_cmd: Option<String>,
    /// Triggers grading; emits grading notifications as JSON lines on stdout.
    pub submit_cmd: Option<String>,
    /// Advances to the next stage; the process restart boundary.
    pub advance_cmd: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub project_dir: PathBuf,
    pub state_dir: PathBuf,
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
    pub use_stream: bool,
    pub enable_thinking: bool,
    pub thinking_budget: u32,
    pub max_retry_count: u32,
    pub result_timeout_secs: u64,
    pub stall_timeout_secs: u64,
    pub max_stages: u32,
    pub workbench: WorkbenchConfig,
    pub verbose: bool,
}

impl Config {
    pub fn load(project_dir: PathBuf, verbose: bool) -> Result<Self> {
        let file = Self::read_config_file(&project_dir.join("autosolve.toml"))?;
        Ok(Self::from_parts(project_dir, file, verbose))
    }

    fn read_config_file(path: &Path) -> Result<ConfigFile> {
        if !path.exists() {
            return Ok(ConfigFile::default());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("Failed to parse {}", path.display()))
    }

    pub(crate) fn from_parts(project_dir: PathBuf, file: ConfigFile, verbose: bool) -> Self {
        let env = |key: &str| std::env::var(key).ok().filter(|v| !v.trim().is_empty());
        let state_dir = project_dir.join(".autosolve");

        Self {
            state_dir,
            base_url: env("AUTOSOLVE_BASE_URL")
                .or(file.base_url)
                .unwrap_or_default(),
            api_key: env("AUTOSOLVE_API_KEY").or(file.api_key).unwrap_or_default(),
            model: env("AUTOSOLVE_MODEL").or(file.model).unwrap_or_default(),
            temperature: file.temperature.unwrap_or(0.2),
            max_tokens: file.max_tokens.unwrap_or(8192),
            use_stream: file.use_stream.unwrap_or(true),
            enable_thinking: file.enable_thinking.unwrap_or(false),
            thinking_budget: file.thinking_budget.unwrap_or(1024),
            max_retry_count: file.max_retry_count.unwrap_or(1),
            result_timeout_secs: file.result_timeout_secs.unwrap_or(120),
            stall_timeout_secs: file.stall_timeout_secs.unwrap_or(180),
            max_stages: file.max_stages.unwrap_or(100),
            workbench: file.workbench,
            verbose,
            project_dir,
        }
    }

    /// Validate endpoint and credentials. Called before any side effect.
    pub fn ensure_generation_config(&self) -> Result<(), SolveError> {
        if normalize_base_url(&self.base_url).is_empty() {
            return Err(SolveError::Config("base_url is not configured".into()));
        }
        if self.api_key.trim().is_empty() || self.api_key == "YOUR_API_KEY_HERE" {
            return Err(SolveError::Config("api_key is not configured".into()));
        }
        if self.model.trim().is_empty() {
            return Err(SolveError::Config("model is not configured".into()));
        }
        Ok(())
    }

    /// Full chat-completions endpoint derived from the configured base URL.
    pub fn chat_completions_url(&self) -> String {
        let base = normalize_base_url(&self.base_url);
        if base.ends_with("/v1") {
            format!("{}/chat/completions", base)
        } else {
            format!("{}/v1/chat/completions", base)
        }
    }

    pub fn run_state_path(&self) -> PathBuf {
        self.state_dir.join("run_state.json")
    }

    pub fn lock_path(&self) -> PathBuf {
        self.state_dir.join("lock.json")
    }

    pub fn ensure_state_dir(&self) -> Result<()> {
        std::fs::create_dir_all(&self.state_dir).context("Failed to create state directory")
    }
}

fn normalize_base_url(base_url: &str) -> String {
    base_url.trim().trim_end_matches('/').to_string()
}
