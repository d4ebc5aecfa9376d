//! Orchestrator error types

use crate::orchestrator::resolver::GraphError;
use crate::state::persistence::PersistenceError;
use crate::state::status::StateError;
use thiserror::Error;

/// Errors returned by orchestrator operations
///
/// Command failures never show up here: they end the step `failed` and are
/// recorded in the step log and on the execution.
#[derive(Error, Debug)]
pub enum OrchestratorError {
    /// No project with the given ID
    #[error("project not found: {0}")]
    ProjectNotFound(String),

    /// The project already has an active run
    #[error("project {0} is already running")]
    AlreadyRunning(String),

    /// The project's configuration disables runs
    #[error("project {0} is disabled")]
    Disabled(String),

    /// The project has no active run to cancel
    #[error("project {0} is not running")]
    NotRunning(String),

    /// The step graph of the project is unusable
    #[error(transparent)]
    InvalidGraph(#[from] GraphError),

    /// A status transition was rejected
    #[error(transparent)]
    State(#[from] StateError),

    /// The store could not be written
    #[error("persistence error: {0}")]
    Persistence(#[from] PersistenceError),
}
