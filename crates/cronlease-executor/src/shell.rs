//! Shell command executor.
//!
//! Runs the job's config payload as a script through `<program> -c`. The
//! child is killed if the attempt is dropped, which is how the scheduler
//! abandons executions that run past their deadline.

use async_trait::async_trait;
use cronlease_core::{Error, Executor, Job, Result};
use std::process::Stdio;
use tokio::process::Command;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Maximum number of stderr bytes carried into an error message.
const STDERR_LIMIT: usize = 512;

/// Executor that runs `job.cfg` as a shell script.
#[derive(Debug, Clone)]
pub struct ShellExecutor {
    program: String,
}

impl ShellExecutor {
    /// Create an executor using `/bin/sh`.
    pub fn new() -> Self {
        Self::with_program("/bin/sh")
    }

    /// Create an executor using a custom interpreter.
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

impl Default for ShellExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Executor for ShellExecutor {
    fn name(&self) -> &str {
        "shell"
    }

    async fn exec(&self, deadline: Instant, job: &Job) -> Result<()> {
        let script = job.cfg.trim();
        if script.is_empty() {
            return Err(Error::InvalidInput(format!(
                "job '{}' has no command to run",
                job.name
            )));
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        info!(job_id = %job.id, job = %job.name, program = %self.program, ?remaining, "Running shell job");

        let output = Command::new(&self.program)
            .arg("-c")
            .arg(script)
            .env("CRONLEASE_JOB_ID", job.id.to_string())
            .env("CRONLEASE_JOB_NAME", &job.name)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| Error::Internal(format!("failed to spawn {}: {}", self.program, e)))?;

        debug!(
            job_id = %job.id,
            stdout = %String::from_utf8_lossy(&output.stdout).trim_end(),
            "Shell job output"
        );

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let stderr = truncate(stderr.trim(), STDERR_LIMIT);
        let code = output
            .status
            .code()
            .map(|c| c.to_string())
            .unwrap_or_else(|| "signal".to_string());
        warn!(job_id = %job.id, exit_code = %code, "Shell job failed");

        Err(Error::ExecutionFailed(if stderr.is_empty() {
            format!("exit code {}", code)
        } else {
            format!("exit code {}: {}", code, stderr)
        }))
    }
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
