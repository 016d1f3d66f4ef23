//! Worker that shells out to a configured command.
//!
//! The request is written to the command's stdin as JSON and mirrored into
//! `CONDUCTOR_*` environment variables. The first JSON object on stdout is
//! parsed as the [`WorkOutcome`]; when none is printed, the exit status
//! decides success.

use crate::review::findings::{FindingSeverity, ReviewFinding};
use crate::util::extract_json_object;
use crate::worker::{ExecutionWorker, WorkOutcome, WorkRequest, WorkerRole};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

/// Default timeout for a single worker invocation.
const DEFAULT_WORKER_TIMEOUT_SECS: u64 = 1800; // 30 minutes

/// Configuration for a command-backed worker.
#[derive(Debug, Clone)]
pub struct CommandWorkerConfig {
    /// Shell command line, run through `sh -c`.
    pub command: String,
    /// Working directory for the command.
    pub working_dir: PathBuf,
    /// Per-invocation timeout.
    pub timeout: Duration,
}

impl CommandWorkerConfig {
    pub fn new(command: impl Into<String>, working_dir: PathBuf) -> Self {
        Self {
            command: command.into(),
            working_dir,
            timeout: Duration::from_secs(DEFAULT_WORKER_TIMEOUT_SECS),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Execution worker backed by an external command.
pub struct CommandWorker {
    role: WorkerRole,
    config: CommandWorkerConfig,
}

impl CommandWorker {
    pub fn new(role: WorkerRole, config: CommandWorkerConfig) -> Self {
        Self { role, config }
    }

    pub fn role(&self) -> WorkerRole {
        self.role
    }

    fn build_command(&self, request: &WorkRequest) -> Command {
        let assignment = &request.assignment;
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(&self.config.command)
            .current_dir(&self.config.working_dir)
            .env("CONDUCTOR_ROLE", self.role.to_string())
            .env("CONDUCTOR_PLAN", &assignment.plan)
            .env("CONDUCTOR_TASK", &assignment.task)
            .env("CONDUCTOR_DELIVERABLES", assignment.deliverables.join("\n"))
            .env("CONDUCTOR_ATTEMPT", request.attempt.to_string())
            .env(
                "CONDUCTOR_REVIEW_ITERATION",
                request.review_iteration.to_string(),
            )
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl ExecutionWorker for CommandWorker {
    async fn execute(&self, request: &WorkRequest) -> Result<WorkOutcome> {
        let payload =
            serde_json::to_vec(request).context("Failed to serialize work request")?;

        let mut child = self
            .build_command(request)
            .spawn()
            .with_context(|| format!("Failed to spawn {} command", self.role))?;

        // Stdin is fed while output is collected, both under the timeout.
        let role = self.role;
        let stdin = child.stdin.take();
        let feed = async move {
            if let Some(mut stdin) = stdin {
                // A command that ignores stdin may close it early; that is not an error.
                if let Err(e) = stdin.write_all(&payload).await {
                    debug!(role = %role, error = %e, "worker closed stdin early");
                }
            }
        };
        let exchange = async move {
            let ((), output) = tokio::join!(feed, child.wait_with_output());
            output
        };

        let output =
            match tokio::time::timeout(self.config.timeout, exchange).await {
                Ok(output) => output.with_context(|| {
                    format!("Failed to wait for {} command", self.role)
                })?,
                Err(_) => {
                    warn!(
                        role = %self.role,
                        task = %request.assignment.key(),
                        timeout_secs = self.config.timeout.as_secs(),
                        "worker timed out"
                    );
                    return Ok(WorkOutcome::failure(vec![
                        ReviewFinding::new(
                            FindingSeverity::Critical,
                            format!(
                                "{} timed out after {}s",
                                self.role,
                                self.config.timeout.as_secs()
                            ),
                        )
                        .with_category("timeout"),
                    ]));
                }
            };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let exit_ok = output.status.success();

        if let Some(json) = extract_json_object(&stdout) {
            match serde_json::from_str::<WorkOutcome>(&json) {
                Ok(outcome) => {
                    // A non-zero exit overrides a claimed success.
                    return Ok(WorkOutcome {
                        success: outcome.success && exit_ok,
                        findings: outcome.findings,
                    });
                }
                Err(e) => {
                    debug!(role = %self.role, error = %e, "stdout JSON is not a work outcome");
                }
            }
        }

        if exit_ok {
            Ok(WorkOutcome::success())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let detail = stderr.lines().last().unwrap_or("").trim();
            let description = if detail.is_empty() {
                format!("{} exited with {}", self.role, output.status)
            } else {
                format!("{} exited with {}: {}", self.role, output.status, detail)
            };
            Ok(WorkOutcome::failure(vec![ReviewFinding::new(
                FindingSeverity::Critical,
                description,
            )]))
        }
    }
}
