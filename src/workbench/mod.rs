//! Collaborator seams for the grading workbench.
//!
//! Everything the orchestrator needs from the outside world — problem text,
//! the code skeleton, writing the artifact, triggering grading, advancing a
//! stage — goes through the [`Workbench`] trait. The core never touches the
//! platform directly; the shipped implementation ([`CommandWorkbench`])
//! delegates each operation to a configured subprocess, and tests use
//! scripted fakes.

mod command;

pub use command::CommandWorkbench;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// Problem statement plus any referenced illustration URLs.
#[derive(Debug, Clone, Default)]
pub struct TaskContent {
    pub text: String,
    pub images: Vec<String>,
}

/// How a stage advance resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    /// Navigation restarts the process; the controller must persist state
    /// and return without waiting further.
    Restarting,
    /// The next stage is reachable in-process; the loop may continue.
    InProcess,
}

/// External collaborator surface for one grading stage.
#[async_trait]
pub trait Workbench: Send {
    /// Read the problem statement for the current stage.
    async fn read_task(&mut self) -> Result<TaskContent>;

    /// Reset the editor to its original template and return the captured
    /// skeleton, when the platform exposes it.
    async fn fetch_skeleton(&mut self) -> Result<Option<String>>;

    /// Write the generated artifact into the editor.
    async fn write_artifact(&mut self, code: &str) -> Result<()>;

    /// Trigger grading. Grading results arrive asynchronously through the
    /// bridge handle the workbench was constructed with, not as a return
    /// value here.
    async fn submit_for_grading(&mut self) -> Result<()>;

    /// Advance to the stage named by `next_stage_id`.
    async fn advance_stage(&mut self, next_stage_id: &str) -> Result<Advance>;
}

/// Which shape of the skeleton payload matched. The platform has shipped
/// several over time; extraction tries them in a fixed priority order
/// instead of duck typing at call sites.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkeletonShape {
    /// `{"content": "..."}`
    ContentField,
    /// `{"code": "..."}`
    CodeField,
    /// A bare JSON string.
    BareString,
    /// The first string field longer than 50 characters.
    LongStringField(String),
}

#[derive(Debug, Clone)]
pub struct CapturedSkeleton {
    pub code: String,
    pub shape: SkeletonShape,
}

#[derive(Debug, Error)]
#[error("Skeleton payload matched no known shape (keys: {keys:?})")]
pub struct UnrecognizedShape {
    pub keys: Vec<String>,
}

/// Extract the skeleton from a captured payload, trying each known shape in
/// priority order.
pub fn parse_skeleton_payload(payload: &Value) -> Result<CapturedSkeleton, UnrecognizedShape> {
    if let Some(content) = payload.get("content").and_then(Value::as_str) {
        return Ok(CapturedSkeleton {
            code: content.to_string(),
            shape: SkeletonShape::ContentField,
        });
    }
    if let Some(code) = payload.get("code").and_then(Value::as_str) {
        return Ok(CapturedSkeleton {
            code: code.to_string(),
            shape: SkeletonShape::CodeField,
        });
    }
    if let Some(s) = payload.as_str() {
        return Ok(CapturedSkeleton {
            code: s.to_string(),
            shape: SkeletonShape::BareString,
        });
    }
    if let Some(map) = payload.as_object() {
        for (key, value) in map {
            if let Some(s) = value.as_str()
                && s.len() > 50
            {
                return Ok(CapturedSkeleton {
                    code: s.to_string(),
                    shape: SkeletonShape::LongStringField(key.clone()),
                });
            }
        }
        return Err(UnrecognizedShape {
            keys: map.keys().cloned().collect(),
        });
    }
    Err(UnrecognizedShape { keys: Vec::new() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_content_field_has_highest_priority() {
        let payload = json!({"content": "template A", "code": "template B"});
        let skeleton = parse_skeleton_payload(&payload).unwrap();
        assert_eq!(skeleton.code, "template A");
        assert_eq!(skeleton.shape, SkeletonShape::ContentField);
    }

    #[test]
    fn test_code_field_second() {
        let payload = json!({"code": "template B"});
        let skeleton = parse_skeleton_payload(&payload).unwrap();
        assert_eq!(skeleton.shape, SkeletonShape::CodeField);
    }

    #[test]
    fn test_bare_string_payload() {
        let payload = json!("raw template text");
        let skeleton = parse_skeleton_payload(&payload).unwrap();
        assert_eq!(skeleton.shape, SkeletonShape::BareString);
        assert_eq!(skeleton.code, "raw template text");
    }

    #[test]
    fn test_long_string_field_fallback() {
        let long = "x".repeat(60);
        let payload = json!({"status": "ok", "template_body": long});
        let skeleton = parse_skeleton_payload(&payload).unwrap();
        assert_eq!(
            skeleton.shape,
            SkeletonShape::LongStringField("template_body".to_string())
        );
    }

    #[test]
    fn test_short_strings_do_not_match_fallback() {
        let payload = json!({"status": "ok", "note": "short"});
        let err = parse_skeleton_payload(&payload).unwrap_err();
        assert!(err.keys.contains(&"status".to_string()));
    }

    #[test]
    fn test_non_object_non_string_is_unrecognized() {
        assert!(parse_skeleton_payload(&json!(42)).is_err());
        assert!(parse_skeleton_payload(&json!([1, 2])).is_err());
    }
}
