//! Shell command runner implementation
//!
//! Executes step commands by spawning a shell process and capturing its output.

use crate::executor::error::ExecutionError;
use crate::executor::{CommandOutput, CommandRunner};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, error, info};

/// Command runner backed by real subprocesses
///
/// Each command string is handed to the platform shell (`sh -c` on Unix,
/// `cmd /C` elsewhere), so pipes and `&&` chains behave as users expect.
pub struct ShellCommandRunner {
    /// Timeout applied to every command
    default_timeout: Duration,
    /// Working directory for every command (None = current directory)
    working_dir: Option<PathBuf>,
}

impl ShellCommandRunner {
    /// Create a runner with the given per-command timeout
    pub fn new(default_timeout_secs: u64) -> Self {
        Self {
            default_timeout: Duration::from_secs(default_timeout_secs),
            working_dir: None,
        }
    }

    /// Run every command inside `dir`
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Get the default timeout duration
    pub fn timeout(&self) -> Duration {
        self.default_timeout
    }

    fn shell_command(command: &str) -> Command {
        #[cfg(unix)]
        {
            let mut cmd = Command::new("sh");
            cmd.arg("-c").arg(command);
            cmd
        }
        #[cfg(not(unix))]
        {
            let mut cmd = Command::new("cmd");
            cmd.arg("/C").arg(command);
            cmd
        }
    }
}

#[async_trait]
impl CommandRunner for ShellCommandRunner {
    async fn run(
        &self,
        command: &str,
        env: &HashMap<String, String>,
    ) -> Result<CommandOutput, ExecutionError> {
        if command.trim().is_empty() {
            return Err(ExecutionError::EmptyCommand);
        }

        let mut cmd = Self::shell_command(command);
        cmd.kill_on_drop(true);

        // Set environment variables from the project configuration
        for (key, value) in env {
            cmd.env(key, value);
        }

        if let Some(work_dir) = &self.working_dir {
            cmd.current_dir(work_dir);
        }

        debug!(command = %command, env_vars = env.len(), "Spawning process");

        // Execute with timeout
        match timeout(self.default_timeout, cmd.output()).await {
            Ok(Ok(output)) => {
                if output.status.success() {
                    // Exit status decides success; undecodable bytes are replaced
                    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
                    let stderr = String::from_utf8_lossy(&output.stderr).to_string();

                    info!(
                        command = %command,
                        stdout_len = stdout.len(),
                        "Command executed successfully"
                    );

                    Ok(CommandOutput { stdout, stderr })
                } else {
                    let stderr = String::from_utf8_lossy(&output.stderr);
                    let exit_code = output.status.code().unwrap_or(-1);

                    error!(
                        command = %command,
                        exit_code = exit_code,
                        stderr = %stderr,
                        "Command failed"
                    );

                    Err(ExecutionError::ProcessFailed(format!(
                        "Process exited with code {}: {}",
                        exit_code,
                        stderr.trim()
                    )))
                }
            }
            Ok(Err(e)) => {
                error!(command = %command, error = %e, "Failed to spawn or execute process");
                Err(ExecutionError::SpawnFailed(e))
            }
            Err(_) => {
                error!(
                    command = %command,
                    timeout_secs = self.default_timeout.as_secs(),
                    "Command timed out"
                );
                Err(ExecutionError::Timeout(self.default_timeout.as_secs()))
            }
        }
    }
}
