//! Workbench adapter that shells out for every collaborator operation.
//!
//! Each operation runs the command string configured in
//! `[workbench]` through `sh -c`. The submit command is special: its stdout
//! is read line by line as JSON grading notifications and published through
//! the bridge handle while the orchestrator awaits the terminal result.

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::bridge::BridgeHandle;
use crate::config::WorkbenchConfig;
use crate::workbench::{Advance, TaskContent, Workbench, parse_skeleton_payload};

const IMAGE_PREFIX: &str = "IMAGE:";

pub struct CommandWorkbench {
    config: WorkbenchConfig,
    bridge: BridgeHandle,
}

impl CommandWorkbench {
    pub fn new(config: WorkbenchConfig, bridge: BridgeHandle) -> Self {
        Self { config, bridge }
    }

    fn command_for(cmd: &str, next_stage_id: Option<&str>) -> Command {
        let mut command = Command::new("sh");
        command.arg("-c").arg(cmd);
        if let Some(id) = next_stage_id {
            command.env("AUTOSOLVE_NEXT_STAGE", id);
        }
        command
    }

    /// Run a configured command to completion, feeding `stdin` when given,
    /// and return captured stdout. A non-zero exit is an error.
    async fn run_capture(cmd: &str, stdin: Option<&str>, next_stage_id: Option<&str>) -> Result<String> {
        debug!(cmd = %cmd, "running workbench command");
        let mut child = Self::command_for(cmd, next_stage_id)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::inherit())
            .spawn()
            .with_context(|| format!("Failed to spawn workbench command: {}", cmd))?;

        if let Some(mut handle) = child.stdin.take() {
            if let Some(input) = stdin {
                handle.write_all(input.as_bytes()).await?;
            }
            handle.shutdown().await.context("Failed to close stdin")?;
        }

        let output = child
            .wait_with_output()
            .await
            .with_context(|| format!("Workbench command failed to run: {}", cmd))?;
        if !output.status.success() {
            bail!(
                "Workbench command exited with {}: {}",
                output.status.code().unwrap_or(-1),
                cmd
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn require(&self, field: Option<&String>, name: &str) -> Result<String> {
        field
            .cloned()
            .with_context(|| format!("[workbench] {} is not configured", name))
    }
}

#[async_trait]
impl Workbench for CommandWorkbench {
    async fn read_task(&mut self) -> Result<TaskContent> {
        let cmd = self.require(self.config.task_cmd.as_ref(), "task_cmd")?;
        let stdout = Self::run_capture(&cmd, None, None).await?;

        let mut text_lines = Vec::new();
        let mut images = Vec::new();
        for line in stdout.lines() {
            if let Some(url) = line.strip_prefix(IMAGE_PREFIX) {
                images.push(url.trim().to_string());
            } else {
                text_lines.push(line);
            }
        }
        Ok(TaskContent {
            text: text_lines.join("\n").trim().to_string(),
            images,
        })
    }

    async fn fetch_skeleton(&mut self) -> Result<Option<String>> {
        let Some(cmd) = self.config.skeleton_cmd.clone() else {
            return Ok(None);
        };
        let stdout = Self::run_capture(&cmd, None, None).await?;
        let trimmed = stdout.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }

        let payload: serde_json::Value = match serde_json::from_str(trimmed) {
            Ok(value) => value,
            Err(e) => {
                warn!("skeleton command did not produce JSON ({}); ignoring", e);
                return Ok(None);
            }
        };
        match parse_skeleton_payload(&payload) {
            Ok(skeleton) => {
                debug!(shape = ?skeleton.shape, "captured code skeleton");
                Ok(Some(skeleton.code))
            }
            Err(e) => {
                warn!("{}; proceeding without a skeleton", e);
                Ok(None)
            }
        }
    }

    async fn write_artifact(&mut self, code: &str) -> Result<()> {
        let cmd = self.require(self.config.write_cmd.as_ref(), "write_cmd")?;
        Self::run_capture(&cmd, Some(code), None).await?;
        Ok(())
    }

    async fn submit_for_grading(&mut self) -> Result<()> {
        let cmd = self.require(self.config.submit_cmd.as_ref(), "submit_cmd")?;
        debug!(cmd = %cmd, "running submit command");
        let mut child = Self::command_for(&cmd, None)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::inherit())
            .spawn()
            .with_context(|| format!("Failed to spawn submit command: {}", cmd))?;

        let stdout = child.stdout.take().context("Failed to get stdout")?;
        let bridge = self.bridge.clone();

        // Pump grading notifications in the background while the caller
        // awaits the bridge.
        tokio::spawn(async move {
            let mut reader = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = reader.next_line().await {
                let line = line.trim().to_string();
                if line.is_empty() {
                    continue;
                }
                match serde_json::from_str::<serde_json::Value>(&line) {
                    Ok(payload) => bridge.deliver(&payload),
                    Err(_) => debug!("skipping non-JSON submit output line"),
                }
            }
            if let Err(e) = child.wait().await {
                warn!("submit command did not exit cleanly: {}", e);
            }
        });
        Ok(())
    }

    async fn advance_stage(&mut self, next_stage_id: &str) -> Result<Advance> {
        let cmd = self.require(self.config.advance_cmd.as_ref(), "advance_cmd")?;
        let stdout = Self::run_capture(&cmd, None, Some(next_stage_id)).await?;
        // Advancing normally tears the session down; a command that can keep
        // the session alive says so explicitly.
        if stdout.trim() == "in-process" {
            Ok(Advance::InProcess)
        } else {
            Ok(Advance::Restarting)
        }
    }
}
