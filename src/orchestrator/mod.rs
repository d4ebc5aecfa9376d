//! Orchestrator module
//!
//! The deployment core: dependency resolution, the run engine, template
//! instantiation, analytics and the advisor. Everything except the engine is
//! a pure function of its inputs.

pub mod advisor;
pub mod analytics;
pub mod engine;
pub mod error;
pub mod resolver;
pub mod templates;

pub use advisor::{Advisor, AdvisorConfig, RecommendedChange, Suggestion, SuggestionCategory};
pub use analytics::AnalyticsSnapshot;
pub use engine::{ActiveRun, Orchestrator, RunReport};
pub use error::OrchestratorError;
pub use resolver::GraphError;
pub use templates::{ProjectOverrides, TemplateEngine, TemplateError};
