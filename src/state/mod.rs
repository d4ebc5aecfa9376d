// State management module
// Entities, their status machines, persistence and the application context

pub mod app_state;
pub mod config;
pub mod execution;
pub mod persistence;
pub mod project;
pub mod status;
pub mod template;

pub use app_state::{AppContext, NewProject};
pub use config::{ConfigOverrides, ProjectConfig};
pub use execution::{Execution, Notification, NotificationKind, TriggerSource};
pub use persistence::{EntityStore, PersistenceError};
pub use project::{FailurePolicy, Project, ProjectId, Step, StepId, StepType};
pub use status::{ExecutionStatus, ProjectStatus, StateError, StepStatus};
pub use template::{StepBlueprint, Template};
