//! Single-stage solve loop: generate, submit, await, retry.
//!
//! A stage gets at most `max_retry_count + 1` generation attempts. The first
//! attempt works from the code skeleton; every retry works from the previous
//! artifact plus the grading diagnostics. A failed evaluation consumes an
//! attempt; so does an empty generation. Content failures, submission
//! failures, and result timeouts abort the stage outright since retrying
//! them has nothing new to feed the model.

use tracing::{info, warn};

use crate::agent::CodeGenerator;
use crate::bridge::{EvalBridge, EvalResult};
use crate::errors::SolveError;
use crate::workbench::Workbench;

/// How one stage ended.
#[derive(Debug)]
pub enum StageOutcome {
    Passed(EvalResult),
    /// All attempts consumed without a pass. Carries the last terminal
    /// result when one arrived.
    Failed {
        attempts: u32,
        last_result: Option<EvalResult>,
    },
}

pub struct StageRunner<'a, G, W> {
    generator: &'a G,
    workbench: &'a mut W,
    bridge: &'a EvalBridge,
    max_retry_count: u32,
}

impl<'a, G: CodeGenerator, W: Workbench> StageRunner<'a, G, W> {
    pub fn new(
        generator: &'a G,
        workbench: &'a mut W,
        bridge: &'a EvalBridge,
        max_retry_count: u32,
    ) -> Self {
        Self {
            generator,
            workbench,
            bridge,
            max_retry_count,
        }
    }

    pub async fn run(&mut self) -> Result<StageOutcome, SolveError> {
        let task = self
            .workbench
            .read_task()
            .await
            .map_err(|e| SolveError::ContentUnavailable(e.to_string()))?;
        if task.text.is_empty() {
            return Err(SolveError::ContentUnavailable(
                "problem statement is empty".into(),
            ));
        }

        let skeleton = match self.workbench.fetch_skeleton().await {
            Ok(Some(skeleton)) => skeleton,
            Ok(None) => {
                warn!("no code skeleton available; generating from the statement alone");
                String::new()
            }
            Err(e) => return Err(SolveError::ContentUnavailable(e.to_string())),
        };

        let max_attempts = self.max_retry_count + 1;
        let mut previous_code: Option<String> = None;
        let mut last_result: Option<EvalResult> = None;

        for attempt in 1..=max_attempts {
            info!(attempt, max_attempts, "starting generation attempt");

            let generated = match &previous_code {
                None => self.generator.generate_first(&task, &skeleton).await,
                Some(code) => {
                    self.generator
                        .generate_retry(&task, code, last_result.as_ref())
                        .await
                }
            };
            let code = match generated {
                Ok(code) => code,
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    warn!(attempt, "generation produced nothing; retrying");
                    continue;
                }
                Err(e) => return Err(e),
            };

            let result = self.submit_and_await(&code).await?;
            if result.is_passed() {
                info!(attempt, "stage passed");
                return Ok(StageOutcome::Passed(result));
            }

            warn!(
                attempt,
                errors = ?result.sets_error_count,
                "evaluation failed"
            );
            previous_code = Some(code);
            last_result = Some(result);
        }

        Ok(StageOutcome::Failed {
            attempts: max_attempts,
            last_result,
        })
    }

    async fn submit_and_await(&mut self, code: &str) -> Result<EvalResult, SolveError> {
        self.workbench
            .write_artifact(code)
            .await
            .map_err(|e| SolveError::Submission(e.to_string()))?;

        // Arm before triggering grading so a fast result cannot slip past.
        let wait = self.bridge.arm();
        self.workbench
            .submit_for_grading()
            .await
            .map_err(|e| SolveError::Submission(e.to_string()))?;
        wait.await
    }
}
