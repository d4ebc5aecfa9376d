//! Execution-specific error types
//!
//! Errors that can occur while running a step command (process spawning,
//! timeouts, non-zero exits, etc.)

use thiserror::Error;

/// Errors that can occur while running a command
///
/// These are routine outcomes of a deployment: the step executor records
/// them in the step log instead of propagating them.
#[derive(Error, Debug)]
pub enum ExecutionError {
    /// Process execution failed with non-zero exit code
    #[error("Process execution failed: {0}")]
    ProcessFailed(String),

    /// Command execution exceeded the timeout limit
    #[error("Command execution timed out after {0} seconds")]
    Timeout(u64),

    /// Failed to spawn the process (e.g., shell not found, permission denied)
    #[error("Failed to spawn process: {0}")]
    SpawnFailed(#[from] std::io::Error),

    /// Command string was empty
    #[error("Empty command")]
    EmptyCommand,
}
