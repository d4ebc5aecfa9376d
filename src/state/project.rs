// Project and step entities
// A project exclusively owns an ordered list of steps

use crate::state::config::ProjectConfig;
use crate::state::status::{ProjectStatus, StateError, StepStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a project
pub type ProjectId = String;

/// Unique identifier for a step
pub type StepId = String;

/// Generate a new unique ID (UUID v4)
pub fn generate_id() -> String {
    Uuid::new_v4().to_string()
}

/// Kind of work a step performs
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    /// Environment preparation
    Setup,
    /// Dependency installation
    Install,
    /// Compilation / bundling
    Build,
    /// Test suite
    Test,
    /// Release to the target platform
    Deploy,
    /// Post-deploy verification
    Verify,
    /// Gate evaluated by its commands
    Condition,
    /// Outbound notification
    Notification,
    /// Anything else
    #[default]
    Custom,
}

/// What the orchestrator does when a step fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Abort the run immediately
    #[default]
    Stop,
    /// Keep running unrelated steps; dependents stay locked
    Continue,
    /// Invoke the rollback handler, then fail the run
    Rollback,
}

/// Post-hoc check run after all commands of a step succeeded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepValidation {
    /// The validation command must exit successfully
    Command {
        /// Command to run
        command: String,
    },
    /// The output of the last command must contain `needle`
    OutputContains {
        /// Expected substring
        needle: String,
    },
}

/// Severity of a step log line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    /// Normal progress
    Info,
    /// Retry or soft problem
    Warn,
    /// Failure
    Error,
}

/// One line of a step's append-only log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// When the line was written
    pub timestamp: DateTime<Utc>,
    /// Severity
    pub level: LogLevel,
    /// Message text (command output is included verbatim)
    pub message: String,
}

/// One unit of orchestrated work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// Unique identifier
    pub id: StepId,
    /// Short title
    pub title: String,
    /// Longer description
    #[serde(default)]
    pub description: String,
    /// Kind of work
    #[serde(default)]
    pub step_type: StepType,
    /// Default total order, used as the tie-break between eligible steps
    pub order: u32,
    /// Prerequisite step IDs within the same project
    #[serde(default)]
    pub depends_on: Vec<StepId>,
    /// Current status
    pub status: StepStatus,
    /// Commands executed strictly in order
    #[serde(default)]
    pub commands: Vec<String>,
    /// Optional check after the commands succeeded
    #[serde(default)]
    pub validation: Option<StepValidation>,
    /// Behavior of the run when this step fails
    #[serde(default)]
    pub failure_policy: FailurePolicy,
    /// Additional attempts of the whole command list after a failure
    #[serde(default)]
    pub max_retries: u32,
    /// Compensating commands used by the command rollback handler
    #[serde(default)]
    pub rollback_commands: Vec<String>,
    /// Append-only log of the current run
    #[serde(default)]
    pub logs: Vec<LogEntry>,
    /// Duration of the last execution in milliseconds
    #[serde(default)]
    pub duration_ms: Option<u64>,
    /// When the step started running
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    /// When the step reached a terminal status
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
}

impl Step {
    /// Create a step with a fresh ID
    ///
    /// The initial status is derived from the prerequisites: `available`
    /// without any, `locked` otherwise.
    pub fn new(title: impl Into<String>, order: u32, depends_on: Vec<StepId>) -> Self {
        let status = Self::initial_status(&depends_on);
        Self {
            id: generate_id(),
            title: title.into(),
            description: String::new(),
            step_type: StepType::default(),
            order,
            depends_on,
            status,
            commands: Vec::new(),
            validation: None,
            failure_policy: FailurePolicy::default(),
            max_retries: 0,
            rollback_commands: Vec::new(),
            logs: Vec::new(),
            duration_ms: None,
            started_at: None,
            finished_at: None,
        }
    }

    /// Builder-style command list
    pub fn with_commands<I, S>(mut self, commands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.commands = commands.into_iter().map(Into::into).collect();
        self
    }

    /// Builder-style failure policy
    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    /// Builder-style step type
    pub fn with_type(mut self, step_type: StepType) -> Self {
        self.step_type = step_type;
        self
    }

    fn initial_status(depends_on: &[StepId]) -> StepStatus {
        if depends_on.is_empty() {
            StepStatus::Available
        } else {
            StepStatus::Locked
        }
    }

    /// Move to a new status through the state machine
    pub fn set_status(&mut self, to: StepStatus) -> Result<(), StateError> {
        self.status = self.status.transition(to)?;
        Ok(())
    }

    /// Append a log line
    pub fn log(&mut self, level: LogLevel, message: impl Into<String>) {
        self.logs.push(LogEntry {
            timestamp: Utc::now(),
            level,
            message: message.into(),
        });
    }

    /// Put the step back in its initial state for a new run
    pub fn reset(&mut self) {
        self.status = Self::initial_status(&self.depends_on);
        self.logs.clear();
        self.duration_ms = None;
        self.started_at = None;
        self.finished_at = None;
    }

    /// Last error line of the log, if any
    pub fn last_error(&self) -> Option<&str> {
        self.logs
            .iter()
            .rev()
            .find(|entry| entry.level == LogLevel::Error)
            .map(|entry| entry.message.as_str())
    }
}

/// Unit of orchestration: a project (or workflow) and its step graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    /// Unique identifier
    pub id: ProjectId,
    /// Display name
    pub name: String,
    /// Description
    #[serde(default)]
    pub description: String,
    /// Category tag (e.g. "web", "api", "workflow")
    #[serde(default)]
    pub category: String,
    /// Target framework or language, free-form
    #[serde(default)]
    pub framework: String,
    /// Template the project was instantiated from
    #[serde(default)]
    pub template_id: Option<String>,
    /// Lifecycle status
    pub status: ProjectStatus,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last modification time, never earlier than `created_at`
    pub updated_at: DateTime<Utc>,
    /// Configuration record
    #[serde(default)]
    pub config: ProjectConfig,
    /// Owned steps
    #[serde(default)]
    pub steps: Vec<Step>,
}

impl Project {
    /// Create a project in `planning` status with a fresh ID
    pub fn new(name: impl Into<String>, steps: Vec<Step>) -> Self {
        let now = Utc::now();
        Self {
            id: generate_id(),
            name: name.into(),
            description: String::new(),
            category: String::new(),
            framework: String::new(),
            template_id: None,
            status: ProjectStatus::Planning,
            created_at: now,
            updated_at: now,
            config: ProjectConfig::default(),
            steps,
        }
    }

    /// Bump `updated_at`, never moving it before `created_at`
    pub fn touch(&mut self) {
        let now = Utc::now();
        self.updated_at = now.max(self.created_at).max(self.updated_at);
    }

    /// Move to a new status through the state machine
    pub fn set_status(&mut self, to: ProjectStatus) -> Result<(), StateError> {
        self.status = self.status.transition(to)?;
        self.touch();
        Ok(())
    }

    /// Look up a step by ID
    pub fn step(&self, id: &str) -> Option<&Step> {
        self.steps.iter().find(|step| step.id == id)
    }

    /// Look up a step by ID, mutably
    pub fn step_mut(&mut self, id: &str) -> Option<&mut Step> {
        self.steps.iter_mut().find(|step| step.id == id)
    }

    /// Replace the stored copy of a step with `step` (matched by ID)
    pub fn replace_step(&mut self, step: Step) -> bool {
        match self.step_mut(&step.id) {
            Some(slot) => {
                *slot = step;
                self.touch();
                true
            }
            None => false,
        }
    }

    /// Validate user-supplied fields
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("Project name cannot be empty".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_initial_status() {
        let root = Step::new("Install", 1, vec![]);
        assert_eq!(root.status, StepStatus::Available);

        let child = Step::new("Build", 2, vec![root.id.clone()]);
        assert_eq!(child.status, StepStatus::Locked);
    }

    #[test]
    fn test_generate_id_unique() {
        let id1 = generate_id();
        let id2 = generate_id();
        assert_ne!(id1, id2);
        assert!(!id1.is_empty());
    }

    #[test]
    fn test_step_reset_restores_initial_state() {
        let mut step = Step::new("Build", 1, vec!["dep".to_string()]);
        step.set_status(StepStatus::Available).unwrap();
        step.set_status(StepStatus::Running).unwrap();
        step.log(LogLevel::Error, "boom");
        step.set_status(StepStatus::Failed).unwrap();
        step.duration_ms = Some(12);

        step.reset();
        assert_eq!(step.status, StepStatus::Locked);
        assert!(step.logs.is_empty());
        assert!(step.duration_ms.is_none());
    }

    #[test]
    fn test_last_error() {
        let mut step = Step::new("Deploy", 1, vec![]);
        step.log(LogLevel::Info, "$ deploy");
        step.log(LogLevel::Error, "permission denied");
        step.log(LogLevel::Info, "cleanup");
        assert_eq!(step.last_error(), Some("permission denied"));
    }

    #[test]
    fn test_project_touch_never_precedes_creation() {
        let mut project = Project::new("Site", vec![]);
        project.touch();
        assert!(project.updated_at >= project.created_at);
    }

    #[test]
    fn test_project_set_status() {
        let mut project = Project::new("Site", vec![]);
        project.set_status(ProjectStatus::Running).unwrap();
        assert_eq!(project.status, ProjectStatus::Running);
        assert!(project.set_status(ProjectStatus::Planning).is_err());
    }

    #[test]
    fn test_project_validate() {
        let mut project = Project::new("Site", vec![]);
        assert!(project.validate().is_ok());
        project.name = "   ".to_string();
        assert!(project.validate().is_err());
    }

    #[test]
    fn test_replace_step() {
        let step = Step::new("Build", 1, vec![]);
        let mut project = Project::new("Site", vec![step.clone()]);
        let mut changed = step;
        changed.title = "Compile".to_string();
        assert!(project.replace_step(changed));
        assert_eq!(project.steps[0].title, "Compile");
        assert!(!project.replace_step(Step::new("Other", 2, vec![])));
    }
}
