// Template entity
// A reusable blueprint from which projects are instantiated

use crate::state::config::ProjectConfig;
use crate::state::project::{FailurePolicy, StepType, StepValidation};
use serde::{Deserialize, Serialize};

/// Unique identifier for a template
pub type TemplateId = String;

/// How much experience a template assumes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    /// Works out of the box
    #[default]
    Beginner,
    /// Needs some configuration
    Intermediate,
    /// Needs a working knowledge of the target platform
    Advanced,
}

/// Blueprint of a single step
///
/// `key` is a label local to the template; `depends_on` refers to other
/// blueprints by key. Instantiation remaps both to fresh step IDs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepBlueprint {
    /// Template-local label
    pub key: String,
    /// Step title
    pub title: String,
    /// Step description
    #[serde(default)]
    pub description: String,
    /// Kind of work
    #[serde(default)]
    pub step_type: StepType,
    /// Default ordering
    pub order: u32,
    /// Keys of prerequisite blueprints
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Command templates, rendered against the project configuration
    #[serde(default)]
    pub commands: Vec<String>,
    /// Optional validation
    #[serde(default)]
    pub validation: Option<StepValidation>,
    /// Failure policy of the created step
    #[serde(default)]
    pub failure_policy: FailurePolicy,
    /// Retry budget of the created step
    #[serde(default)]
    pub max_retries: u32,
    /// Compensating commands of the created step
    #[serde(default)]
    pub rollback_commands: Vec<String>,
}

/// Reusable project blueprint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    /// Unique identifier
    pub id: TemplateId,
    /// Display name
    pub name: String,
    /// Description
    #[serde(default)]
    pub description: String,
    /// Category tag
    #[serde(default)]
    pub category: String,
    /// Target framework or language
    #[serde(default)]
    pub framework: String,
    /// Difficulty tag
    #[serde(default)]
    pub difficulty: Difficulty,
    /// Rough time to a first successful run, in minutes
    #[serde(default)]
    pub estimated_minutes: u32,
    /// Default project configuration
    #[serde(default)]
    pub default_config: ProjectConfig,
    /// Ordered step blueprints
    #[serde(default)]
    pub steps: Vec<StepBlueprint>,
    /// Free-form tags
    #[serde(default)]
    pub tags: Vec<String>,
}

impl StepBlueprint {
    /// Create a blueprint with the given key, title and order
    pub fn new(key: impl Into<String>, title: impl Into<String>, order: u32) -> Self {
        Self {
            key: key.into(),
            title: title.into(),
            description: String::new(),
            step_type: StepType::default(),
            order,
            depends_on: Vec::new(),
            commands: Vec::new(),
            validation: None,
            failure_policy: FailurePolicy::default(),
            max_retries: 0,
            rollback_commands: Vec::new(),
        }
    }

    /// Builder-style prerequisites
    pub fn after<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on = keys.into_iter().map(Into::into).collect();
        self
    }

    /// Builder-style commands
    pub fn run<I, S>(mut self, commands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.commands = commands.into_iter().map(Into::into).collect();
        self
    }

    /// Builder-style step type
    pub fn typed(mut self, step_type: StepType) -> Self {
        self.step_type = step_type;
        self
    }
}
