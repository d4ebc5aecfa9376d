//! Service layer
//!
//! Collaborators the orchestrator talks to: notification sinks and rollback
//! handlers.

pub mod notifications;
pub mod rollback;

pub use notifications::{BroadcastSink, FanoutSink, LogSink, NotificationSink, SinkError, WebhookSink};
pub use rollback::{CommandRollback, NoopRollback, RollbackHandler, RollbackOutcome, RollbackRequest};
