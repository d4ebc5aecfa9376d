//! Step executor
//!
//! Runs the command list of a single step through a `CommandRunner`,
//! maintaining the step's status, log and duration. The executor only ever
//! decides about its own step: retries of the step's command list are local,
//! while failure policies for the whole project belong to the orchestrator.

use crate::executor::{CancelFlag, CommandRunner};
use crate::state::execution::elapsed_ms;
use crate::state::project::{LogLevel, Step, StepId, StepValidation};
use crate::state::status::{StateError, StepStatus};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Per-run inputs shared by every step of a project
pub struct StepContext<'a> {
    /// Environment variables passed to every command
    pub env: &'a HashMap<String, String>,
    /// Cancellation flag of the run
    pub cancel: &'a CancelFlag,
}

/// Outcome of one `execute` call
#[derive(Debug, Clone, PartialEq)]
pub struct StepResult {
    /// Step that ran
    pub step_id: StepId,
    /// Terminal status reached (`completed`, `failed` or `cancelled`)
    pub status: StepStatus,
    /// Wall-clock duration in milliseconds
    pub duration_ms: u64,
    /// Number of attempts of the command list
    pub attempts: u32,
    /// Failure message, if the step did not complete
    pub error: Option<String>,
}

impl StepResult {
    /// Whether the step completed
    pub fn succeeded(&self) -> bool {
        self.status == StepStatus::Completed
    }
}

enum Attempt {
    Succeeded,
    Failed(String),
    Cancelled,
}

/// Executes single steps
pub struct StepExecutor {
    runner: Arc<dyn CommandRunner>,
}

impl StepExecutor {
    /// Create an executor over the given command runner
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    /// Execute a step
    ///
    /// The step must be `available` (or `pending`); any other status is a
    /// contract violation reported as `StateError` without touching the step.
    /// `on_transition` is called after the step enters `running` and again
    /// after it reaches its terminal status, so the caller can persist it.
    ///
    /// Command failures are not errors here: they end the step `failed` and
    /// are recorded in its log and in the returned `StepResult`.
    pub async fn execute<F>(
        &self,
        step: &mut Step,
        ctx: &StepContext<'_>,
        mut on_transition: F,
    ) -> Result<StepResult, StateError>
    where
        F: FnMut(&Step),
    {
        step.set_status(StepStatus::Running)?;
        let started_at = Utc::now();
        step.started_at = Some(started_at);
        step.finished_at = None;
        step.duration_ms = None;
        step.log(
            LogLevel::Info,
            format!("Step '{}' started ({} commands)", step.title, step.commands.len()),
        );
        info!(step_id = %step.id, title = %step.title, "Step started");
        on_transition(step);

        let max_attempts = step.max_retries + 1;
        let mut attempts = 0;
        let outcome = loop {
            attempts += 1;
            if attempts > 1 {
                step.log(
                    LogLevel::Warn,
                    format!("Retry {}/{}", attempts - 1, step.max_retries),
                );
                warn!(step_id = %step.id, attempt = attempts, "Retrying step");
            }

            match self.attempt(step, ctx).await {
                Attempt::Failed(msg) if attempts < max_attempts && !ctx.cancel.is_cancelled() => {
                    debug!(step_id = %step.id, error = %msg, "Attempt failed, retrying");
                    continue;
                }
                other => break other,
            }
        };

        let (status, error) = match outcome {
            Attempt::Succeeded => (StepStatus::Completed, None),
            Attempt::Failed(msg) => (StepStatus::Failed, Some(msg)),
            Attempt::Cancelled => (StepStatus::Cancelled, Some("Cancelled".to_string())),
        };

        let finished_at = Utc::now();
        let duration_ms = elapsed_ms(started_at, finished_at);
        step.set_status(status)?;
        step.finished_at = Some(finished_at);
        step.duration_ms = Some(duration_ms);

        match status {
            StepStatus::Completed => {
                step.log(LogLevel::Info, format!("Step completed in {} ms", duration_ms));
                info!(step_id = %step.id, duration_ms, "Step completed");
            }
            StepStatus::Cancelled => {
                step.log(LogLevel::Warn, "Step cancelled");
                info!(step_id = %step.id, "Step cancelled");
            }
            _ => {
                warn!(step_id = %step.id, error = ?error, "Step failed");
            }
        }
        on_transition(step);

        Ok(StepResult {
            step_id: step.id.clone(),
            status,
            duration_ms,
            attempts,
            error,
        })
    }

    /// Run the command list once, then the validation
    async fn attempt(&self, step: &mut Step, ctx: &StepContext<'_>) -> Attempt {
        let commands = step.commands.clone();
        let mut last_output = String::new();

        for command in &commands {
            if ctx.cancel.is_cancelled() {
                step.log(
                    LogLevel::Warn,
                    "Cancellation requested, remaining commands skipped",
                );
                return Attempt::Cancelled;
            }

            step.log(LogLevel::Info, format!("$ {}", command));
            match self.runner.run(command, ctx.env).await {
                Ok(output) => {
                    let text = output.stdout.trim_end();
                    if !text.is_empty() {
                        step.log(LogLevel::Info, text.to_string());
                    }
                    last_output = output.stdout;
                }
                Err(e) => {
                    let msg = format!("Command `{}` failed: {}", command, e);
                    step.log(LogLevel::Error, msg.clone());
                    return Attempt::Failed(msg);
                }
            }
        }

        match &step.validation {
            None => Attempt::Succeeded,
            Some(validation) => {
                let validation = validation.clone();
                self.validate(step, &validation, &last_output, ctx).await
            }
        }
    }

    async fn validate(
        &self,
        step: &mut Step,
        validation: &StepValidation,
        last_output: &str,
        ctx: &StepContext<'_>,
    ) -> Attempt {
        match validation {
            StepValidation::Command { command } => {
                step.log(LogLevel::Info, format!("validate: $ {}", command));
                match self.runner.run(command, ctx.env).await {
                    Ok(_) => Attempt::Succeeded,
                    Err(e) => {
                        let msg = format!("Validation `{}` failed: {}", command, e);
                        step.log(LogLevel::Error, msg.clone());
                        Attempt::Failed(msg)
                    }
                }
            }
            StepValidation::OutputContains { needle } => {
                if last_output.contains(needle.as_str()) {
                    step.log(LogLevel::Info, format!("validate: output contains '{}'", needle));
                    Attempt::Succeeded
                } else {
                    let msg = format!("Validation failed: output does not contain '{}'", needle);
                    step.log(LogLevel::Error, msg.clone());
                    Attempt::Failed(msg)
                }
            }
        }
    }
}
