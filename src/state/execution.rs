// Execution history and notifications
// Both collections are append-only; only the orchestrator creates records

use crate::state::project::{generate_id, ProjectId, StepId};
use crate::state::status::{ExecutionStatus, StateError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What started a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TriggerSource {
    /// Started by a user
    #[default]
    Manual,
    /// Started by a scheduler
    Scheduled,
    /// Started by an external event (webhook, push)
    Event,
}

/// Historical record of one project run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    /// Unique identifier
    pub id: String,
    /// Project that was run
    pub project_id: ProjectId,
    /// Trigger source
    pub trigger: TriggerSource,
    /// Run start
    pub started_at: DateTime<Utc>,
    /// Run end, set once terminal
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    /// `finished_at - started_at` in milliseconds
    #[serde(default)]
    pub duration_ms: Option<u64>,
    /// Status
    pub status: ExecutionStatus,
    /// Error message of a failed or cancelled run
    #[serde(default)]
    pub error: Option<String>,
    /// Step the failure is attributed to
    #[serde(default)]
    pub failed_step_id: Option<StepId>,
}

impl Execution {
    /// Open a new `running` record starting now
    pub fn start(project_id: impl Into<ProjectId>, trigger: TriggerSource) -> Self {
        Self {
            id: generate_id(),
            project_id: project_id.into(),
            trigger,
            started_at: Utc::now(),
            finished_at: None,
            duration_ms: None,
            status: ExecutionStatus::Running,
            error: None,
            failed_step_id: None,
        }
    }

    /// Close the record with a terminal status
    ///
    /// Fails if the record is already terminal.
    pub fn finish(
        &mut self,
        status: ExecutionStatus,
        finished_at: DateTime<Utc>,
        error: Option<String>,
    ) -> Result<(), StateError> {
        self.status = self.status.transition(status)?;
        let finished_at = finished_at.max(self.started_at);
        self.finished_at = Some(finished_at);
        self.duration_ms = Some(elapsed_ms(self.started_at, finished_at));
        self.error = error;
        Ok(())
    }
}

/// Milliseconds between two instants, clamped at zero
pub fn elapsed_ms(start: DateTime<Utc>, end: DateTime<Utc>) -> u64 {
    (end - start).num_milliseconds().max(0) as u64
}

/// Kind of a notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// A run completed
    Success,
    /// A run failed or was cancelled
    Failure,
    /// Informational
    Info,
}

/// Observational record emitted on terminal transitions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// Unique identifier
    pub id: String,
    /// Kind
    pub kind: NotificationKind,
    /// Short title
    pub title: String,
    /// Message body
    pub message: String,
    /// Related project
    pub project_id: ProjectId,
    /// Emission time
    pub created_at: DateTime<Utc>,
    /// Read flag
    #[serde(default)]
    pub read: bool,
}

impl Notification {
    /// Create an unread notification timestamped now
    pub fn new(
        kind: NotificationKind,
        title: impl Into<String>,
        message: impl Into<String>,
        project_id: impl Into<ProjectId>,
    ) -> Self {
        Self {
            id: generate_id(),
            kind,
            title: title.into(),
            message: message.into(),
            project_id: project_id.into(),
            created_at: Utc::now(),
            read: false,
        }
    }
}
