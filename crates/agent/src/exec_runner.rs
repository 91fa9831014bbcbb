use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Captured result of one script run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutput {
    /// Stdout followed by stderr, lossily decoded.
    pub output: String,
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
}

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("timed out after {}s", .0.as_secs())]
    Timeout(Duration),
    #[error("failed to spawn shell: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("failed to collect output: {0}")]
    Wait(#[source] std::io::Error),
}

/// Runs script text on this machine.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, script: &str, timeout: Duration) -> Result<ExecOutput, ExecError>;
}

/// Runs scripts with `<shell> -c <script>`. A non-zero exit is not an error.
#[derive(Debug, Clone)]
pub struct ShellExecutor {
    shell: String,
}

impl ShellExecutor {
    pub fn new(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
        }
    }
}

impl Default for ShellExecutor {
    fn default() -> Self {
        Self::new("sh")
    }
}

#[async_trait]
impl Executor for ShellExecutor {
    async fn execute(&self, script: &str, timeout: Duration) -> Result<ExecOutput, ExecError> {
        let child = tokio::process::Command::new(&self.shell)
            .arg("-c")
            .arg(script)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(ExecError::Spawn)?;

        // Dropping the wait future on timeout drops the child, which kills it.
        let out = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(res) => res.map_err(ExecError::Wait)?,
            Err(_) => return Err(ExecError::Timeout(timeout)),
        };

        let mut output = String::from_utf8_lossy(&out.stdout).into_owned();
        output.push_str(&String::from_utf8_lossy(&out.stderr));
        Ok(ExecOutput {
            output,
            exit_code: out.status.code(),
        })
    }
}
