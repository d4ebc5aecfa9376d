//! Improvement advisor
//!
//! Read-only rules over a project and its analytics snapshot. Each rule
//! either proposes one `Suggestion` or stays silent; nothing here mutates the
//! project.

use crate::orchestrator::analytics::AnalyticsSnapshot;
use crate::orchestrator::resolver::depth_levels;
use crate::state::project::{Project, StepId, StepType};
use crate::state::status::StepStatus;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashSet;

/// Markers of environment variable names that usually hold credentials
const SECRET_MARKERS: &[&str] = &[
    "SECRET",
    "TOKEN",
    "PASSWORD",
    "PASSWD",
    "API_KEY",
    "APIKEY",
    "PRIVATE_KEY",
    "ACCESS_KEY",
    "CREDENTIAL",
];

/// Retry budget proposed for unreliable steps
const SUGGESTED_RETRIES: u32 = 2;

/// Thresholds used by the advisor rules
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdvisorConfig {
    /// Average run duration above which parallelization is proposed
    pub max_average_duration_ms: f64,
    /// Success rate (percent) below which retries are proposed
    pub min_success_rate: f64,
}

impl Default for AdvisorConfig {
    fn default() -> Self {
        Self {
            max_average_duration_ms: 300_000.0,
            min_success_rate: 80.0,
        }
    }
}

/// Area a suggestion improves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionCategory {
    /// Run time
    Performance,
    /// Shape of the step graph
    Structure,
    /// Connections to the outside world
    Integration,
    /// Handling of credentials
    Security,
}

/// Concrete change a suggestion recommends
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RecommendedChange {
    /// Run the steps of each level side by side
    ParallelizeSteps {
        /// Independent step groups, by dependency depth
        levels: Vec<Vec<StepId>>,
    },
    /// Give the listed steps a retry budget
    AddRetries {
        /// Steps to change
        step_ids: Vec<StepId>,
        /// Proposed `max_retries`
        max_retries: u32,
    },
    /// Move the listed variables out of the plaintext configuration
    MoveToSecretStore {
        /// Variable names
        variables: Vec<String>,
    },
    /// Insert a new step
    AddStep {
        /// Kind of step to add
        step_type: StepType,
        /// Prerequisites of the new step
        depends_on: Vec<StepId>,
        /// Steps that should depend on the new step
        required_by: Vec<StepId>,
    },
}

/// One recommendation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    /// Area of improvement
    pub category: SuggestionCategory,
    /// Short title
    pub title: String,
    /// Why the change is recommended
    pub rationale: String,
    /// Confidence in `[0, 1]`
    pub confidence: f64,
    /// What to change
    pub change: RecommendedChange,
}

/// Rule-based advisor
#[derive(Debug, Clone, Default)]
pub struct Advisor {
    config: AdvisorConfig,
}

impl Advisor {
    /// Create an advisor with the given thresholds
    pub fn new(config: AdvisorConfig) -> Self {
        Self { config }
    }

    /// Thresholds in use
    pub fn config(&self) -> &AdvisorConfig {
        &self.config
    }

    /// Suggestions for `project`, highest confidence first
    pub fn analyze(&self, project: &Project, analytics: &AnalyticsSnapshot) -> Vec<Suggestion> {
        let mut suggestions: Vec<Suggestion> = [
            self.parallelize(project, analytics),
            self.retries(project, analytics),
            Self::secrets(project),
            Self::missing_tests(project),
            Self::missing_notification(project),
        ]
        .into_iter()
        .flatten()
        .collect();

        // sort_by is stable: ties keep rule order
        suggestions.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(Ordering::Equal)
        });
        suggestions
    }

    fn parallelize(&self, project: &Project, analytics: &AnalyticsSnapshot) -> Option<Suggestion> {
        if analytics.total == 0
            || analytics.average_duration_ms <= self.config.max_average_duration_ms
        {
            return None;
        }

        let levels = depth_levels(&project.steps);
        let independent = levels.iter().any(|level| level.len() > 1);
        let confidence = if independent { 0.8 } else { 0.5 };

        Some(Suggestion {
            category: SuggestionCategory::Performance,
            title: "Run independent steps in parallel".to_string(),
            rationale: format!(
                "Runs take {:.0} ms on average, above the {:.0} ms target",
                analytics.average_duration_ms, self.config.max_average_duration_ms
            ),
            confidence,
            change: RecommendedChange::ParallelizeSteps { levels },
        })
    }

    fn retries(&self, project: &Project, analytics: &AnalyticsSnapshot) -> Option<Suggestion> {
        if analytics.total == 0 || analytics.success_rate >= self.config.min_success_rate {
            return None;
        }

        // Prefer the steps that failed last; otherwise every step without retries
        let mut step_ids: Vec<StepId> = project
            .steps
            .iter()
            .filter(|s| s.status == StepStatus::Failed)
            .map(|s| s.id.clone())
            .collect();
        if step_ids.is_empty() {
            step_ids = project
                .steps
                .iter()
                .filter(|s| s.max_retries == 0 && !s.commands.is_empty())
                .map(|s| s.id.clone())
                .collect();
        }
        if step_ids.is_empty() {
            return None;
        }

        let confidence = if analytics.success_rate < self.config.min_success_rate / 2.0 {
            0.9
        } else {
            0.7
        };

        Some(Suggestion {
            category: SuggestionCategory::Structure,
            title: "Add retries and error handling".to_string(),
            rationale: format!(
                "Only {:.1}% of {} runs succeeded (target {:.0}%)",
                analytics.success_rate, analytics.total, self.config.min_success_rate
            ),
            confidence,
            change: RecommendedChange::AddRetries {
                step_ids,
                max_retries: SUGGESTED_RETRIES,
            },
        })
    }

    fn secrets(project: &Project) -> Option<Suggestion> {
        let mut variables: Vec<String> = project
            .config
            .environment_variables
            .iter()
            .filter(|(name, value)| is_secret_name(name) && is_plaintext(value))
            .map(|(name, _)| name.clone())
            .collect();
        if variables.is_empty() {
            return None;
        }
        variables.sort();

        Some(Suggestion {
            category: SuggestionCategory::Security,
            title: "Move credentials to a secret store".to_string(),
            rationale: format!(
                "Plaintext values found for {}",
                variables.join(", ")
            ),
            confidence: 0.95,
            change: RecommendedChange::MoveToSecretStore { variables },
        })
    }

    fn missing_tests(project: &Project) -> Option<Suggestion> {
        let has_test = project.steps.iter().any(|s| s.step_type == StepType::Test);
        let deploys: Vec<_> = project
            .steps
            .iter()
            .filter(|s| s.step_type == StepType::Deploy)
            .collect();
        if has_test || deploys.is_empty() {
            return None;
        }

        let mut depends_on: Vec<StepId> = Vec::new();
        for deploy in &deploys {
            for dep in &deploy.depends_on {
                if !depends_on.contains(dep) {
                    depends_on.push(dep.clone());
                }
            }
        }

        Some(Suggestion {
            category: SuggestionCategory::Structure,
            title: "Add a test step before deploying".to_string(),
            rationale: "The project deploys without running any tests".to_string(),
            confidence: 0.6,
            change: RecommendedChange::AddStep {
                step_type: StepType::Test,
                depends_on,
                required_by: deploys.iter().map(|s| s.id.clone()).collect(),
            },
        })
    }

    fn missing_notification(project: &Project) -> Option<Suggestion> {
        if project.steps.is_empty()
            || project
                .steps
                .iter()
                .any(|s| s.step_type == StepType::Notification)
        {
            return None;
        }

        // Leaves: steps nobody depends on
        let required: HashSet<&str> = project
            .steps
            .iter()
            .flat_map(|s| s.depends_on.iter().map(String::as_str))
            .collect();
        let leaves = project
            .steps
            .iter()
            .filter(|s| !required.contains(s.id.as_str()))
            .map(|s| s.id.clone())
            .collect();

        Some(Suggestion {
            category: SuggestionCategory::Integration,
            title: "Notify the team when the run ends".to_string(),
            rationale: "No step reports the outcome of a run".to_string(),
            confidence: 0.4,
            change: RecommendedChange::AddStep {
                step_type: StepType::Notification,
                depends_on: leaves,
                required_by: Vec::new(),
            },
        })
    }
}

fn is_secret_name(name: &str) -> bool {
    let upper = name.to_ascii_uppercase();
    SECRET_MARKERS.iter().any(|marker| upper.contains(marker))
}

/// Empty values and `${VAR}` references are not plaintext secrets
fn is_plaintext(value: &str) -> bool {
    let value = value.trim();
    !value.is_empty() && !(value.starts_with("${") && value.ends_with('}'))
}
