//! Template engine
//!
//! Turns a reusable `Template` into a concrete `Project`: blueprint labels are
//! remapped to fresh step IDs, the configuration overrides are merged, and
//! command templates are rendered against the merged configuration.
//! Templates are never mutated by instantiation.

use crate::orchestrator::resolver::{self, GraphError};
use crate::state::config::{ConfigOverrides, ProjectConfig};
use crate::state::project::{generate_id, Project, Step, StepType, StepValidation};
use crate::state::status::StepStatus;
use crate::state::template::{Difficulty, StepBlueprint, Template};
use minijinja::{Environment, UndefinedBehavior};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use thiserror::Error;
use tracing::{debug, info};

/// Validation errors raised before any project is created
#[derive(Error, Debug)]
pub enum TemplateError {
    /// A required template field is missing or blank
    #[error("missing required template field: {0}")]
    MissingField(String),

    /// Two blueprints share the same key
    #[error("duplicate step key '{0}'")]
    DuplicateKey(String),

    /// A blueprint depends on a key that does not exist
    #[error("step '{step}' depends on unknown step '{missing}'")]
    UnknownDependency {
        /// Blueprint declaring the dependency
        step: String,
        /// Missing key
        missing: String,
    },

    /// The blueprint graph is not a DAG
    #[error("invalid step graph: {0}")]
    Graph(#[from] GraphError),

    /// A command template could not be rendered
    #[error("cannot render command '{command}' of step '{step}': {source}")]
    Render {
        /// Blueprint key
        step: String,
        /// Raw command template
        command: String,
        /// Renderer error
        #[source]
        source: minijinja::Error,
    },

    /// An imported document is not a valid template
    #[error("invalid template document: {0}")]
    Json(#[from] serde_json::Error),
}

/// Caller-supplied values that take precedence over the template
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectOverrides {
    /// Project name (defaults to the template name)
    #[serde(default)]
    pub name: Option<String>,
    /// Project description (defaults to the template description)
    #[serde(default)]
    pub description: Option<String>,
    /// Target framework (defaults to the template framework)
    #[serde(default)]
    pub framework: Option<String>,
    /// Configuration overrides
    #[serde(default)]
    pub config: ConfigOverrides,
}

/// Values exposed to command templates
#[derive(Serialize)]
struct RenderContext<'a> {
    name: &'a str,
    framework: &'a str,
    platform: &'a str,
    build_command: &'a str,
    install_command: &'a str,
    output_directory: &'a str,
    env: &'a HashMap<String, String>,
}

/// Template instantiation and import/export
pub struct TemplateEngine;

impl TemplateEngine {
    /// Instantiate a project from a template
    ///
    /// Validation (required fields, unique keys, known dependencies, acyclic
    /// graph, renderable commands) happens before the project exists, so an
    /// error means nothing was created.
    pub fn instantiate(
        template: &Template,
        overrides: &ProjectOverrides,
    ) -> Result<Project, TemplateError> {
        Self::validate(template)?;

        let name = overrides
            .name
            .clone()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| template.name.clone());
        let framework = overrides
            .framework
            .clone()
            .unwrap_or_else(|| template.framework.clone());
        let config = template.default_config.merged_with(&overrides.config);

        // Fresh IDs for every blueprint, keyed by blueprint label
        let id_for_key: HashMap<&str, String> = template
            .steps
            .iter()
            .map(|bp| (bp.key.as_str(), generate_id()))
            .collect();

        let env = Self::render_environment();
        let ctx = RenderContext {
            name: &name,
            framework: &framework,
            platform: config.platform.as_deref().unwrap_or(""),
            build_command: &config.build_command,
            install_command: &config.install_command,
            output_directory: &config.output_directory,
            env: &config.environment_variables,
        };

        let mut steps = Vec::with_capacity(template.steps.len());
        for blueprint in &template.steps {
            steps.push(Self::step_from_blueprint(blueprint, &id_for_key, &env, &ctx)?);
        }

        // Reject cycles before any step becomes available
        if let Err(err) = resolver::validate_graph(&steps) {
            return Err(Self::relabel(err, &id_for_key).into());
        }
        for step in steps.iter_mut().filter(|s| s.depends_on.is_empty()) {
            step.status = StepStatus::Available;
        }

        let mut project = Project::new(name, steps);
        project.description = overrides
            .description
            .clone()
            .unwrap_or_else(|| template.description.clone());
        project.category = template.category.clone();
        project.framework = framework;
        project.template_id = Some(template.id.clone());
        project.config = config;

        info!(
            template_id = %template.id,
            project_id = %project.id,
            steps = project.steps.len(),
            "Project instantiated from template"
        );
        Ok(project)
    }

    /// Template environment used for every command
    ///
    /// Values interpolated into a command must go through the `shell` filter
    /// unless they are themselves commands (`build_command`,
    /// `install_command`).
    fn render_environment() -> Environment<'static> {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        env.add_filter("shell", shell_quote);
        env
    }

    fn render(
        env: &Environment<'_>,
        ctx: &RenderContext<'_>,
        key: &str,
        command: &str,
    ) -> Result<String, TemplateError> {
        if !command.contains("{{") && !command.contains("{%") {
            return Ok(command.to_string());
        }
        env.render_str(command, ctx)
            .map_err(|source| TemplateError::Render {
                step: key.to_string(),
                command: command.to_string(),
                source,
            })
    }

    fn step_from_blueprint(
        blueprint: &StepBlueprint,
        id_for_key: &HashMap<&str, String>,
        env: &Environment<'_>,
        ctx: &RenderContext<'_>,
    ) -> Result<Step, TemplateError> {
        let depends_on = blueprint
            .depends_on
            .iter()
            .map(|label| {
                id_for_key
                    .get(label.as_str())
                    .cloned()
                    .ok_or_else(|| TemplateError::UnknownDependency {
                        step: blueprint.key.clone(),
                        missing: label.clone(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let render_all = |commands: &[String]| -> Result<Vec<String>, TemplateError> {
            commands
                .iter()
                .map(|cmd| Self::render(env, ctx, &blueprint.key, cmd))
                .collect()
        };

        let validation = match &blueprint.validation {
            Some(StepValidation::Command { command }) => Some(StepValidation::Command {
                command: Self::render(env, ctx, &blueprint.key, command)?,
            }),
            other => other.clone(),
        };

        let mut step = Step::new(blueprint.title.clone(), blueprint.order, depends_on);
        step.id = id_for_key
            .get(blueprint.key.as_str())
            .cloned()
            .unwrap_or_else(generate_id);
        // Everything starts locked; roots are released once the graph is valid
        step.status = StepStatus::Locked;
        step.description = blueprint.description.clone();
        step.step_type = blueprint.step_type.clone();
        step.commands = render_all(&blueprint.commands)?;
        step.validation = validation;
        step.failure_policy = blueprint.failure_policy;
        step.max_retries = blueprint.max_retries;
        step.rollback_commands = render_all(&blueprint.rollback_commands)?;
        Ok(step)
    }

    /// Translate step IDs in a graph error back to blueprint keys
    fn relabel(err: GraphError, id_for_key: &HashMap<&str, String>) -> GraphError {
        let key_for_id: HashMap<&str, &str> = id_for_key
            .iter()
            .map(|(key, id)| (id.as_str(), *key))
            .collect();
        let label = |id: &str| key_for_id.get(id).map(|k| k.to_string()).unwrap_or_else(|| id.to_string());

        match err {
            GraphError::Cycle(path) => GraphError::Cycle(path.iter().map(|id| label(id)).collect()),
            GraphError::SelfDependency(id) => GraphError::SelfDependency(label(&id)),
            GraphError::UnknownDependency { step, missing } => GraphError::UnknownDependency {
                step: label(&step),
                missing: label(&missing),
            },
        }
    }

    /// Check required fields and blueprint keys
    pub fn validate(template: &Template) -> Result<(), TemplateError> {
        if template.id.trim().is_empty() {
            return Err(TemplateError::MissingField("id".to_string()));
        }
        if template.name.trim().is_empty() {
            return Err(TemplateError::MissingField("name".to_string()));
        }

        let mut keys = HashSet::new();
        for blueprint in &template.steps {
            if blueprint.key.trim().is_empty() {
                return Err(TemplateError::MissingField(format!(
                    "steps[{}].key",
                    blueprint.order
                )));
            }
            if blueprint.title.trim().is_empty() {
                return Err(TemplateError::MissingField(format!(
                    "steps.{}.title",
                    blueprint.key
                )));
            }
            if !keys.insert(blueprint.key.as_str()) {
                return Err(TemplateError::DuplicateKey(blueprint.key.clone()));
            }
        }

        for blueprint in &template.steps {
            for dep in &blueprint.depends_on {
                if dep == &blueprint.key {
                    return Err(GraphError::SelfDependency(dep.clone()).into());
                }
                if !keys.contains(dep.as_str()) {
                    return Err(TemplateError::UnknownDependency {
                        step: blueprint.key.clone(),
                        missing: dep.clone(),
                    });
                }
            }
        }

        debug!(template_id = %template.id, "Template validated");
        Ok(())
    }

    /// Export a template as a self-contained JSON document
    pub fn export_template(template: &Template) -> Result<String, TemplateError> {
        Ok(serde_json::to_string_pretty(template)?)
    }

    /// Import a template from a JSON document
    ///
    /// A blank `id` is replaced with a fresh one. The document is fully
    /// validated, including a trial instantiation to catch cycles and
    /// unrenderable commands.
    pub fn import_template(json: &str) -> Result<Template, TemplateError> {
        let mut template: Template = serde_json::from_str(json)?;
        if template.id.trim().is_empty() {
            template.id = generate_id();
        }
        Self::instantiate(&template, &ProjectOverrides::default())?;
        Ok(template)
    }
}

/// `shell` filter: quote a value as a single POSIX shell word
fn shell_quote(value: String) -> Result<String, minijinja::Error> {
    shlex::try_quote(&value)
        .map(|quoted| quoted.into_owned())
        .map_err(|e| {
            minijinja::Error::new(
                minijinja::ErrorKind::InvalidOperation,
                format!("cannot quote value for the shell: {}", e),
            )
        })
}

/// Templates available on a fresh installation
pub fn builtin_templates() -> Vec<Template> {
    let mut env = HashMap::new();
    env.insert("NODE_ENV".to_string(), "production".to_string());

    let static_site = Template {
        id: "builtin-static-site".to_string(),
        name: "Static site".to_string(),
        description: "Install, build and publish a static web front end".to_string(),
        category: "web".to_string(),
        framework: "nextjs".to_string(),
        difficulty: Difficulty::Beginner,
        estimated_minutes: 10,
        default_config: ProjectConfig {
            platform: Some("vercel".to_string()),
            build_command: "npm run build".to_string(),
            install_command: "npm ci".to_string(),
            output_directory: "out".to_string(),
            environment_variables: env,
            ..ProjectConfig::default()
        },
        steps: vec![
            StepBlueprint::new("install", "Install dependencies", 1)
                .typed(StepType::Install)
                .run(["{{ install_command }}"]),
            StepBlueprint::new("test", "Run tests", 2)
                .typed(StepType::Test)
                .after(["install"])
                .run(["npm test --if-present"]),
            StepBlueprint::new("build", "Build", 3)
                .typed(StepType::Build)
                .after(["install"])
                .run(["{{ build_command }}"]),
            StepBlueprint {
                validation: Some(StepValidation::Command {
                    command: "test -d {{ output_directory | shell }}".to_string(),
                }),
                ..StepBlueprint::new("deploy", "Deploy", 4)
                    .typed(StepType::Deploy)
                    .after(["test", "build"])
                    .run(["echo deploying {{ output_directory | shell }} to {{ platform | shell }}"])
            },
        ],
        tags: vec!["web".to_string(), "static".to_string()],
    };

    let rust_service = Template {
        id: "builtin-rust-service".to_string(),
        name: "Rust service container".to_string(),
        description: "Test, build and push a containerized Rust service".to_string(),
        category: "api".to_string(),
        framework: "rust".to_string(),
        difficulty: Difficulty::Intermediate,
        estimated_minutes: 20,
        default_config: ProjectConfig {
            platform: Some("docker".to_string()),
            build_command: "cargo build --release".to_string(),
            install_command: "cargo fetch".to_string(),
            output_directory: "target/release".to_string(),
            ..ProjectConfig::default()
        },
        steps: vec![
            StepBlueprint::new("fetch", "Fetch crates", 1)
                .typed(StepType::Setup)
                .run(["{{ install_command }}"]),
            StepBlueprint {
                max_retries: 1,
                ..StepBlueprint::new("test", "Test", 2)
                    .typed(StepType::Test)
                    .after(["fetch"])
                    .run(["cargo test"])
            },
            StepBlueprint::new("build", "Build release", 3)
                .typed(StepType::Build)
                .after(["test"])
                .run(["{{ build_command }}"]),
            StepBlueprint {
                failure_policy: crate::state::project::FailurePolicy::Rollback,
                rollback_commands: vec!["docker image rm {{ name | shell }}:latest".to_string()],
                ..StepBlueprint::new("image", "Build image", 4)
                    .typed(StepType::Deploy)
                    .after(["build"])
                    .run(["docker build -t {{ name | shell }}:latest ."])
            },
            StepBlueprint::new("notify", "Announce release", 5)
                .typed(StepType::Notification)
                .after(["image"])
                .run(["echo released {{ name | shell }}"]),
        ],
        tags: vec!["rust".to_string(), "docker".to_string()],
    };

    let blank = Template {
        id: "builtin-blank".to_string(),
        name: "Blank workflow".to_string(),
        description: "An empty workflow to build up step by step".to_string(),
        category: "workflow".to_string(),
        framework: String::new(),
        difficulty: Difficulty::Beginner,
        estimated_minutes: 1,
        default_config: ProjectConfig::default(),
        steps: Vec::new(),
        tags: vec!["workflow".to_string()],
    };

    vec![static_site, rust_service, blank]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::resolver::eligible_steps;

    fn chain_template() -> Template {
        Template {
            id: "t1".to_string(),
            name: "Chain".to_string(),
            description: String::new(),
            category: "test".to_string(),
            framework: "node".to_string(),
            difficulty: Difficulty::Beginner,
            estimated_minutes: 1,
            default_config: ProjectConfig {
                build_command: "npm run build".to_string(),
                ..ProjectConfig::default()
            },
            steps: vec![
                StepBlueprint::new("a", "A", 1).run(["echo a"]),
                StepBlueprint::new("b", "B", 2).after(["a"]).run(["{{ build_command }}"]),
                StepBlueprint::new("c", "C", 3).after(["b"]),
            ],
            tags: Vec::new(),
        }
    }

    #[test]
    fn test_dependencies_remapped_to_new_ids() {
        let template = chain_template();
        let project = TemplateEngine::instantiate(&template, &ProjectOverrides::default()).unwrap();

        let ids: HashSet<&str> = project.steps.iter().map(|s| s.id.as_str()).collect();
        for step in &project.steps {
            for dep in &step.depends_on {
                assert!(ids.contains(dep.as_str()), "dangling dependency {}", dep);
                assert_ne!(dep, "a");
                assert_ne!(dep, "b");
            }
        }
        assert_eq!(project.steps[1].depends_on, vec![project.steps[0].id.clone()]);
        assert_eq!(project.template_id.as_deref(), Some("t1"));
    }

    #[test]
    fn test_initial_statuses() {
        let project =
            TemplateEngine::instantiate(&chain_template(), &ProjectOverrides::default()).unwrap();
        assert_eq!(project.steps[0].status, StepStatus::Available);
        assert_eq!(project.steps[1].status, StepStatus::Locked);
        assert_eq!(project.steps[2].status, StepStatus::Locked);
        assert_eq!(eligible_steps(&project.steps).len(), 1);
    }

    #[test]
    fn test_fresh_ids_per_instantiation() {
        let template = chain_template();
        let p1 = TemplateEngine::instantiate(&template, &ProjectOverrides::default()).unwrap();
        let p2 = TemplateEngine::instantiate(&template, &ProjectOverrides::default()).unwrap();
        assert_ne!(p1.id, p2.id);
        assert_ne!(p1.steps[0].id, p2.steps[0].id);
        // Template untouched
        assert_eq!(template, chain_template());
    }

    #[test]
    fn test_cycle_rejected() {
        let mut template = chain_template();
        template.steps = vec![
            StepBlueprint::new("a", "A", 1).after(["b"]),
            StepBlueprint::new("b", "B", 2).after(["a"]),
        ];
        let err = TemplateEngine::instantiate(&template, &ProjectOverrides::default()).unwrap_err();
        match err {
            TemplateError::Graph(GraphError::Cycle(path)) => {
                assert!(path.iter().all(|k| k == "a" || k == "b"));
            }
            other => panic!("expected cycle error, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_dependency_rejected() {
        let mut template = chain_template();
        template.steps[2].depends_on = vec!["ghost".to_string()];
        assert!(matches!(
            TemplateEngine::instantiate(&template, &ProjectOverrides::default()),
            Err(TemplateError::UnknownDependency { .. })
        ));
    }

    #[test]
    fn test_missing_name_rejected() {
        let mut template = chain_template();
        template.name = " ".to_string();
        assert!(matches!(
            TemplateEngine::instantiate(&template, &ProjectOverrides::default()),
            Err(TemplateError::MissingField(_))
        ));
    }

    #[test]
    fn test_duplicate_key_rejected() {
        let mut template = chain_template();
        template.steps[1].key = "a".to_string();
        template.steps[1].depends_on.clear();
        assert!(matches!(
            TemplateEngine::validate(&template),
            Err(TemplateError::DuplicateKey(k)) if k == "a"
        ));
    }

    #[test]
    fn test_commands_rendered_with_overrides() {
        let overrides = ProjectOverrides {
            name: Some("shop".to_string()),
            config: ConfigOverrides {
                build_command: Some("pnpm build".to_string()),
                ..ConfigOverrides::default()
            },
            ..ProjectOverrides::default()
        };
        let project = TemplateEngine::instantiate(&chain_template(), &overrides).unwrap();
        assert_eq!(project.name, "shop");
        assert_eq!(project.config.build_command, "pnpm build");
        assert_eq!(project.steps[1].commands, vec!["pnpm build".to_string()]);
    }

    #[test]
    fn test_user_values_are_shell_quoted() {
        let template = builtin_templates()
            .into_iter()
            .find(|t| t.id == "builtin-rust-service")
            .unwrap();
        let overrides = ProjectOverrides {
            name: Some("My Shop; touch x".to_string()),
            ..ProjectOverrides::default()
        };
        let project = TemplateEngine::instantiate(&template, &overrides).unwrap();

        let image = project
            .steps
            .iter()
            .find(|s| s.commands.iter().any(|c| c.starts_with("docker build")))
            .unwrap();
        // The whole name stays one shell word, so nothing after ';' runs
        let words = shlex::split(&image.commands[0]).unwrap();
        assert_eq!(
            words,
            vec!["docker", "build", "-t", "My Shop; touch x:latest", "."]
        );
        let words = shlex::split(&image.rollback_commands[0]).unwrap();
        assert_eq!(words, vec!["docker", "image", "rm", "My Shop; touch x:latest"]);
    }

    #[test]
    fn test_shell_filter_quotes_single_words() {
        assert_eq!(shell_quote("shop".to_string()).unwrap(), "shop");
        for value in ["it's", "a b", "$(rm -rf /)", "`id`"] {
            let quoted = shell_quote(value.to_string()).unwrap();
            assert_eq!(shlex::split(&quoted).unwrap(), vec![value.to_string()]);
        }
        assert!(shell_quote("a\0b".to_string()).is_err());
    }

    #[test]
    fn test_unknown_placeholder_is_a_validation_error() {
        let mut template = chain_template();
        template.steps[0].commands = vec!["echo {{ no_such_value }}".to_string()];
        assert!(matches!(
            TemplateEngine::instantiate(&template, &ProjectOverrides::default()),
            Err(TemplateError::Render { .. })
        ));
    }

    #[test]
    fn test_export_import() {
        let template = chain_template();
        let json = TemplateEngine::export_template(&template).unwrap();
        let imported = TemplateEngine::import_template(&json).unwrap();
        assert_eq!(imported, template);
    }

    #[test]
    fn test_import_rejects_cycles_and_garbage() {
        assert!(matches!(
            TemplateEngine::import_template("not json"),
            Err(TemplateError::Json(_))
        ));

        let mut template = chain_template();
        template.steps[0].depends_on = vec!["c".to_string()];
        let json = TemplateEngine::export_template(&template).unwrap();
        assert!(matches!(
            TemplateEngine::import_template(&json),
            Err(TemplateError::Graph(GraphError::Cycle(_)))
        ));
    }

    #[test]
    fn test_import_assigns_missing_id() {
        let mut template = chain_template();
        template.id = String::new();
        let json = serde_json::to_string(&template).unwrap();
        let imported = TemplateEngine::import_template(&json).unwrap();
        assert!(!imported.id.is_empty());
    }

    #[test]
    fn test_builtin_templates_instantiate() {
        for template in builtin_templates() {
            let project = TemplateEngine::instantiate(&template, &ProjectOverrides::default())
                .unwrap_or_else(|e| panic!("{} failed: {}", template.id, e));
            assert_eq!(project.steps.len(), template.steps.len());
        }
    }
}
