//! Multi-stage progression: lock, checkpoint, stage loop, restart hand-off.
//!
//! The controller owns the durable pieces (execution lock, run-state store)
//! and drives one [`StageRunner`] per stage. Progress is checkpointed after
//! every pass so a restart loses nothing; when advancing tears the process
//! down, the controller returns with the lock still held and the state file
//! in place, and the next invocation resumes from there with `--resume`.

use anyhow::Context;
use tracing::{info, warn};

use crate::agent::CodeGenerator;
use crate::bridge::{EvalBridge, EvalResult};
use crate::config::Config;
use crate::errors::SolveError;
use crate::lock::ExecutionLock;
use crate::orchestrator::stage::{StageOutcome, StageRunner};
use crate::state::{RunState, RunStateStore};
use crate::workbench::{Advance, Workbench};

/// How a multi-stage run ended.
#[derive(Debug)]
pub enum RunOutcome {
    /// A passed stage reported no successor.
    Completed { stages_completed: u32 },
    /// One stage exhausted its attempts. Carries the last grading result so
    /// the failure is diagnosable without replaying the run.
    StageFailed {
        stage: u32,
        attempts: u32,
        last_result: Option<EvalResult>,
    },
    /// Advancing restarts the process; state is saved and the lock is kept
    /// for the resuming instance.
    RestartPending { stages_completed: u32 },
    /// The stage ceiling stopped the run.
    StageLimitReached { stages_completed: u32 },
}

/// Snapshot for the `status` command.
#[derive(Debug)]
pub struct RunStatus {
    pub state: Option<RunState>,
    pub lock_age_secs: Option<i64>,
}

pub struct ProgressionController<G, W> {
    config: Config,
    generator: G,
    workbench: W,
    bridge: EvalBridge,
    store: RunStateStore,
    lock: ExecutionLock,
}

impl<G: CodeGenerator, W: Workbench> ProgressionController<G, W> {
    pub fn new(config: Config, generator: G, workbench: W, bridge: EvalBridge) -> Self {
        let store = RunStateStore::new(config.run_state_path());
        let lock = ExecutionLock::new(config.lock_path());
        Self {
            config,
            generator,
            workbench,
            bridge,
            store,
            lock,
        }
    }

    /// Solve the current stage once, without touching run state.
    pub async fn run_one(&mut self) -> Result<StageOutcome, SolveError> {
        self.acquire_lock(false)?;
        let outcome = self.run_stage().await;
        self.lock.release();
        outcome
    }

    /// Drive stages until completion, failure, the ceiling, or a restart
    /// boundary. With `resume` set, picks up the persisted run and
    /// force-acquires the lock the previous incarnation left behind.
    pub async fn run_all(&mut self, resume: bool) -> Result<RunOutcome, SolveError> {
        let persisted = if resume { self.store.load() } else { None };
        let resuming = persisted.is_some();
        if resume && !resuming {
            info!("no saved run to resume; starting fresh");
        }
        let mut state = persisted.unwrap_or_default();

        self.acquire_lock(resuming)?;

        if !state.enabled {
            // A disabled record means the run was switched off elsewhere.
            let stages_completed = state.completed_stages;
            self.finish_run();
            return Ok(RunOutcome::Completed { stages_completed });
        }

        if resuming {
            info!(
                completed_stages = state.completed_stages,
                started = %state.start_time,
                "resuming saved run"
            );
        }

        // Checkpoint before the first stage so even an early crash leaves a
        // resumable record.
        self.store.save(&state).context("Failed to save run state")?;

        loop {
            if state.completed_stages >= self.config.max_stages {
                warn!(
                    max_stages = self.config.max_stages,
                    "stage ceiling reached; stopping"
                );
                let stages_completed = state.completed_stages;
                self.finish_run();
                return Ok(RunOutcome::StageLimitReached { stages_completed });
            }

            let stage = state.completed_stages + 1;
            info!(stage, "starting stage");

            let outcome = match self.run_stage().await {
                Ok(outcome) => outcome,
                Err(e) => {
                    self.finish_run();
                    return Err(e);
                }
            };

            let result = match outcome {
                StageOutcome::Passed(result) => result,
                StageOutcome::Failed {
                    attempts,
                    last_result,
                } => {
                    warn!(stage, attempts, "stage failed; ending run");
                    self.finish_run();
                    return Ok(RunOutcome::StageFailed {
                        stage,
                        attempts,
                        last_result,
                    });
                }
            };

            state.completed_stages += 1;
            self.store.save(&state).context("Failed to save run state")?;

            let Some(next_stage_id) = result.next_stage().map(str::to_string) else {
                info!(
                    stages_completed = state.completed_stages,
                    "no further stages; run complete"
                );
                let stages_completed = state.completed_stages;
                self.finish_run();
                return Ok(RunOutcome::Completed { stages_completed });
            };

            match self.workbench.advance_stage(&next_stage_id).await {
                Ok(Advance::InProcess) => {}
                Ok(Advance::Restarting) => {
                    // Keep the lock: the resuming instance force-acquires it
                    // and a takeover window would invite a duplicate run.
                    info!(
                        stages_completed = state.completed_stages,
                        "advancing restarts the process; state saved for resume"
                    );
                    return Ok(RunOutcome::RestartPending {
                        stages_completed: state.completed_stages,
                    });
                }
                Err(e) => {
                    self.finish_run();
                    return Err(SolveError::Submission(format!(
                        "failed to advance to stage {}: {}",
                        next_stage_id, e
                    )));
                }
            }
        }
    }

    /// Drop the saved run and the lock.
    pub fn abort(&self) -> Result<(), SolveError> {
        self.store.clear().context("Failed to clear run state")?;
        self.lock.release();
        Ok(())
    }

    pub fn status(&self) -> RunStatus {
        RunStatus {
            state: self.store.load(),
            lock_age_secs: self.lock.current_age().map(|age| age.num_seconds()),
        }
    }

    async fn run_stage(&mut self) -> Result<StageOutcome, SolveError> {
        StageRunner::new(
            &self.generator,
            &mut self.workbench,
            &self.bridge,
            self.config.max_retry_count,
        )
        .run()
        .await
    }

    fn acquire_lock(&self, force: bool) -> Result<(), SolveError> {
        if self.lock.try_acquire(force) {
            return Ok(());
        }
        let held_secs = self
            .lock
            .current_age()
            .map(|age| age.num_seconds())
            .unwrap_or(0);
        Err(SolveError::LockContention { held_secs })
    }

    /// Terminal cleanup: the run is over, nothing left to resume.
    fn finish_run(&self) {
        if let Err(e) = self.store.clear() {
            warn!("failed to clear run state: {e}");
        }
        self.lock.release();
    }
}
