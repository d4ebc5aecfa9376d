//! Step execution module
//!
//! This module provides the command-runner boundary and the step executor.
//! The `CommandRunner` trait is the only place where the orchestration core
//! waits on external work; `ShellCommandRunner` spawns real processes and
//! `ScriptedCommandRunner` is a deterministic double for tests and dry runs.

pub mod cli;
pub mod error;
pub mod scripted;
pub mod step;

pub use cli::ShellCommandRunner;
pub use error::ExecutionError;
pub use scripted::{Script, ScriptedCommandRunner};
pub use step::{StepContext, StepExecutor, StepResult};

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Captured output of a successful command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Standard output
    pub stdout: String,
    /// Standard error (kept even on success; many build tools log there)
    pub stderr: String,
}

impl CommandOutput {
    /// Output with only stdout set
    pub fn stdout(text: impl Into<String>) -> Self {
        Self {
            stdout: text.into(),
            stderr: String::new(),
        }
    }
}

/// External collaborator that runs one command string
///
/// Implementations return `Ok` with the captured output when the command
/// succeeded and an `ExecutionError` otherwise.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `command` with `env` added to the process environment
    async fn run(
        &self,
        command: &str,
        env: &HashMap<String, String>,
    ) -> Result<CommandOutput, ExecutionError>;
}

/// Cancellation flag shared between a run and whoever may cancel it
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// New, not cancelled
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
