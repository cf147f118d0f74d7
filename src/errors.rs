//! Typed error hierarchy for the Autosolve orchestrator.
//!
//! One enum covers the stage/progression taxonomy; helpers distinguish the
//! errors that abort a stage outright from the ones that count as a failed
//! attempt and stay eligible for retry.

use thiserror::Error;

/// Errors from the solve pipeline (stage runner and progression controller).
#[derive(Debug, Error)]
pub enum SolveError {
    /// Missing or placeholder endpoint/credentials. Fatal; raised before any
    /// side effect.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Problem statement or code skeleton could not be read. Aborts the
    /// stage, no retry.
    #[error("Content unavailable: {0}")]
    ContentUnavailable(String),

    /// The model returned nothing usable. Counts as a failed attempt,
    /// eligible for retry.
    #[error("Model returned an empty artifact")]
    GenerationEmpty,

    /// Editor write or grading trigger failed. Aborts the stage.
    #[error("Submission failed: {0}")]
    Submission(String),

    /// No terminal grading notification arrived within the deadline. Aborts
    /// the stage without retry since no diagnostic is available.
    #[error("Timed out after {timeout_secs}s waiting for a grading result")]
    ResultTimeout { timeout_secs: u64 },

    /// This wait was displaced by a newer `arm()` before a result arrived.
    #[error("Result wait superseded by a newer wait")]
    WaitSuperseded,

    /// Another instance is believed to hold the execution lock.
    #[error("Another run appears to be in progress (lock held for {held_secs}s)")]
    LockContention { held_secs: i64 },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SolveError {
    /// Whether this error may consume a retry attempt instead of aborting
    /// the stage.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SolveError::GenerationEmpty)
    }

    /// Fatal errors propagate immediately out of the retry sub-loop.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SolveError::Config(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generation_empty_is_retryable() {
        assert!(SolveError::GenerationEmpty.is_retryable());
        assert!(!SolveError::GenerationEmpty.is_fatal());
    }

    #[test]
    fn config_error_is_fatal_not_retryable() {
        let err = SolveError::Config("apiKey unset".into());
        assert!(err.is_fatal());
        assert!(!err.is_retryable());
    }

    #[test]
    fn result_timeout_carries_deadline() {
        let err = SolveError::ResultTimeout { timeout_secs: 120 };
        assert!(err.to_string().contains("120"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn superseded_wait_is_neither_retryable_nor_fatal() {
        let err = SolveError::WaitSuperseded;
        assert!(!err.is_retryable());
        assert!(!err.is_fatal());
    }

    #[test]
    fn lock_contention_reports_age() {
        let err = SolveError::LockContention { held_secs: 42 };
        assert!(err.to_string().contains("42"));
    }

    #[test]
    fn anyhow_converts_to_other() {
        let err: SolveError = anyhow::anyhow!("boom").into();
        assert!(matches!(err, SolveError::Other(_)));
    }
}
