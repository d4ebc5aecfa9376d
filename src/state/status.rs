//! Lifecycle statuses for projects, steps and executions
//!
//! Each status is a closed enumeration with a single `transition` function.
//! Every status change in the crate goes through these functions, so the
//! state-machine rules live in exactly one place.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Error raised when a status change is not allowed by the state machine
///
/// These are contract errors: the orchestrator never produces them when used
/// correctly, so they are surfaced to the caller instead of being absorbed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    /// The requested transition is not part of the state machine
    #[error("invalid {entity} transition: {from} -> {to}")]
    InvalidTransition {
        /// Kind of entity ("project", "step", "execution")
        entity: &'static str,
        /// Current status
        from: String,
        /// Requested status
        to: String,
    },
}

impl StateError {
    fn invalid(entity: &'static str, from: impl fmt::Display, to: impl fmt::Display) -> Self {
        StateError::InvalidTransition {
            entity,
            from: from.to_string(),
            to: to.to_string(),
        }
    }
}

/// Lifecycle status of a project
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    /// Created, never run
    #[default]
    Planning,
    /// A run is in progress
    Running,
    /// The last run completed every step
    Completed,
    /// The last run failed, was cancelled, or was interrupted
    Failed,
}

impl ProjectStatus {
    /// Apply a transition, returning the new status or a `StateError`
    pub fn transition(self, to: ProjectStatus) -> Result<ProjectStatus, StateError> {
        use ProjectStatus::*;
        match (self, to) {
            (Planning, Running)
            | (Running, Completed)
            | (Running, Failed)
            | (Completed, Running)
            | (Failed, Running) => Ok(to),
            _ => Err(StateError::invalid("project", self, to)),
        }
    }

    /// Whether a run is currently in progress
    pub fn is_running(self) -> bool {
        self == ProjectStatus::Running
    }
}

impl fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProjectStatus::Planning => "planning",
            ProjectStatus::Running => "running",
            ProjectStatus::Completed => "completed",
            ProjectStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Status of a single step inside a project
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Waiting on at least one prerequisite
    Locked,
    /// Every prerequisite completed, ready to run
    Available,
    /// Queued in the current wave of a run
    Pending,
    /// Commands are executing
    Running,
    /// All commands (and validation) succeeded
    Completed,
    /// A command or the validation failed
    Failed,
    /// The run was cancelled before the step could finish
    Cancelled,
}

impl StepStatus {
    /// Apply a transition, returning the new status or a `StateError`
    pub fn transition(self, to: StepStatus) -> Result<StepStatus, StateError> {
        use StepStatus::*;
        match (self, to) {
            (Locked, Available)
            | (Locked, Cancelled)
            | (Available, Pending)
            | (Available, Running)
            | (Available, Cancelled)
            | (Pending, Running)
            | (Pending, Cancelled)
            | (Running, Completed)
            | (Running, Failed)
            | (Running, Cancelled) => Ok(to),
            _ => Err(StateError::invalid("step", self, to)),
        }
    }

    /// Completed, failed or cancelled
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            StepStatus::Completed | StepStatus::Failed | StepStatus::Cancelled
        )
    }

    /// Whether the step executor accepts a step in this status
    pub fn is_runnable(self) -> bool {
        matches!(self, StepStatus::Available | StepStatus::Pending)
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StepStatus::Locked => "locked",
            StepStatus::Available => "available",
            StepStatus::Pending => "pending",
            StepStatus::Running => "running",
            StepStatus::Completed => "completed",
            StepStatus::Failed => "failed",
            StepStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Terminal (or in-flight) status of an execution record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// The run is still in progress
    Running,
    /// Every step completed
    Completed,
    /// The run failed
    Failed,
    /// The run was cancelled
    Cancelled,
}

impl ExecutionStatus {
    /// Apply a transition. Terminal records are immutable.
    pub fn transition(self, to: ExecutionStatus) -> Result<ExecutionStatus, StateError> {
        match (self, to) {
            (ExecutionStatus::Running, ExecutionStatus::Running) => {
                Err(StateError::invalid("execution", self, to))
            }
            (ExecutionStatus::Running, _) => Ok(to),
            _ => Err(StateError::invalid("execution", self, to)),
        }
    }

    /// Anything other than `Running`
    pub fn is_terminal(self) -> bool {
        self != ExecutionStatus::Running
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project_transitions() {
        assert_eq!(
            ProjectStatus::Planning.transition(ProjectStatus::Running),
            Ok(ProjectStatus::Running)
        );
        assert!(ProjectStatus::Failed
            .transition(ProjectStatus::Running)
            .is_ok());
        assert!(ProjectStatus::Planning
            .transition(ProjectStatus::Completed)
            .is_err());
        assert!(ProjectStatus::Running
            .transition(ProjectStatus::Running)
            .is_err());
    }

    #[test]
    fn test_step_cannot_skip_running() {
        assert!(StepStatus::Available
            .transition(StepStatus::Completed)
            .is_err());
        assert!(StepStatus::Locked.transition(StepStatus::Running).is_err());
        assert!(StepStatus::Completed
            .transition(StepStatus::Running)
            .is_err());
    }

    #[test]
    fn test_step_happy_path() {
        let status = StepStatus::Locked
            .transition(StepStatus::Available)
            .and_then(|s| s.transition(StepStatus::Pending))
            .and_then(|s| s.transition(StepStatus::Running))
            .and_then(|s| s.transition(StepStatus::Completed))
            .unwrap();
        assert_eq!(status, StepStatus::Completed);
        assert!(status.is_terminal());
    }

    #[test]
    fn test_execution_terminal_is_immutable() {
        assert!(ExecutionStatus::Running
            .transition(ExecutionStatus::Failed)
            .is_ok());
        assert!(ExecutionStatus::Failed
            .transition(ExecutionStatus::Completed)
            .is_err());
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&StepStatus::Available).unwrap();
        assert_eq!(json, "\"available\"");
        let parsed: ProjectStatus = serde_json::from_str("\"failed\"").unwrap();
        assert_eq!(parsed, ProjectStatus::Failed);
    }

    #[test]
    fn test_error_message_names_both_states() {
        let err = StepStatus::Locked
            .transition(StepStatus::Running)
            .unwrap_err();
        assert_eq!(err.to_string(), "invalid step transition: locked -> running");
    }
}
