//! Rollback handlers
//!
//! Invoked by the orchestrator when a step with the `rollback` failure
//! policy fails. The handler receives the steps completed in the run, in
//! completion order, and undoes what it can.

use crate::executor::CommandRunner;
use crate::state::project::{ProjectId, Step, StepId};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

/// What the orchestrator hands to a rollback handler
#[derive(Debug, Clone)]
pub struct RollbackRequest {
    /// Project being rolled back
    pub project_id: ProjectId,
    /// Step whose failure triggered the rollback
    pub failed_step_id: StepId,
    /// Steps completed during the run, in completion order
    pub completed_steps: Vec<Step>,
    /// Environment of the project
    pub env: HashMap<String, String>,
}

/// Result of a rollback
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RollbackOutcome {
    /// Human-readable lines, appended to the failed step's log
    pub log: Vec<String>,
    /// Whether every compensating action succeeded
    pub succeeded: bool,
}

/// Compensating action for a failed run
#[async_trait]
pub trait RollbackHandler: Send + Sync {
    /// Undo the completed steps of a failed run
    async fn rollback(&self, request: &RollbackRequest) -> RollbackOutcome;
}

/// Handler that only records what it was asked to do
#[derive(Debug, Default)]
pub struct NoopRollback {
    requests: Mutex<Vec<RollbackRequest>>,
}

impl NoopRollback {
    /// Create a recorder
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests received so far
    pub fn requests(&self) -> Vec<RollbackRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl RollbackHandler for NoopRollback {
    async fn rollback(&self, request: &RollbackRequest) -> RollbackOutcome {
        info!(
            project_id = %request.project_id,
            completed = request.completed_steps.len(),
            "Rollback requested (no-op)"
        );
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request.clone());
        RollbackOutcome {
            log: vec![format!(
                "Rollback requested for {} completed steps (no-op)",
                request.completed_steps.len()
            )],
            succeeded: true,
        }
    }
}

/// Runs the `rollback_commands` of completed steps, last completed first
pub struct CommandRollback {
    runner: Arc<dyn CommandRunner>,
}

impl CommandRollback {
    /// Create a handler running commands through `runner`
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl RollbackHandler for CommandRollback {
    async fn rollback(&self, request: &RollbackRequest) -> RollbackOutcome {
        let mut outcome = RollbackOutcome {
            log: Vec::new(),
            succeeded: true,
        };

        for step in request.completed_steps.iter().rev() {
            if step.rollback_commands.is_empty() {
                continue;
            }
            outcome.log.push(format!("Rolling back '{}'", step.title));
            // A failed command does not stop the remaining compensations
            for command in &step.rollback_commands {
                match self.runner.run(command, &request.env).await {
                    Ok(_) => outcome.log.push(format!("$ {}", command)),
                    Err(e) => {
                        warn!(
                            project_id = %request.project_id,
                            step_id = %step.id,
                            error = %e,
                            "Rollback command failed"
                        );
                        outcome
                            .log
                            .push(format!("Rollback command `{}` failed: {}", command, e));
                        outcome.succeeded = false;
                    }
                }
            }
        }

        if outcome.log.is_empty() {
            outcome.log.push("Nothing to roll back".to_string());
        }
        info!(
            project_id = %request.project_id,
            succeeded = outcome.succeeded,
            "Rollback finished"
        );
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{Script, ScriptedCommandRunner};

    fn request(steps: Vec<Step>) -> RollbackRequest {
        RollbackRequest {
            project_id: "p1".to_string(),
            failed_step_id: "failed".to_string(),
            completed_steps: steps,
            env: HashMap::new(),
        }
    }

    fn step_with_rollback(title: &str, commands: &[&str]) -> Step {
        let mut step = Step::new(title, 1, vec![]);
        step.rollback_commands = commands.iter().map(|c| c.to_string()).collect();
        step
    }

    #[tokio::test]
    async fn test_command_rollback_runs_in_reverse_completion_order() {
        let runner = Arc::new(ScriptedCommandRunner::new());
        let handler = CommandRollback::new(runner.clone());
        let steps = vec![
            step_with_rollback("Upload", &["delete upload"]),
            step_with_rollback("Build", &[]),
            step_with_rollback("Promote", &["demote", "flush cache"]),
        ];

        let outcome = handler.rollback(&request(steps)).await;

        assert!(outcome.succeeded);
        assert_eq!(
            runner.invocations(),
            vec!["demote", "flush cache", "delete upload"]
        );
    }

    #[tokio::test]
    async fn test_command_rollback_continues_after_failure() {
        let runner =
            Arc::new(ScriptedCommandRunner::new().on("demote", Script::Fail("denied".into())));
        let handler = CommandRollback::new(runner.clone());
        let steps = vec![
            step_with_rollback("Upload", &["delete upload"]),
            step_with_rollback("Promote", &["demote"]),
        ];

        let outcome = handler.rollback(&request(steps)).await;

        assert!(!outcome.succeeded);
        assert_eq!(runner.invocations(), vec!["demote", "delete upload"]);
        assert!(outcome.log.iter().any(|l| l.contains("denied")));
    }

    #[tokio::test]
    async fn test_noop_rollback_records_requests() {
        let handler = NoopRollback::new();
        let outcome = handler
            .rollback(&request(vec![Step::new("Build", 1, vec![])]))
            .await;
        assert!(outcome.succeeded);
        assert_eq!(handler.requests().len(), 1);
        assert_eq!(handler.requests()[0].completed_steps.len(), 1);
    }
}
