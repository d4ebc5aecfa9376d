// Application context
// Wires the store, the orchestrator and the advisor together and exposes the
// operations used by the HTTP handlers

use crate::config::Config;
use crate::error::AppError;
use crate::executor::{CommandRunner, ShellCommandRunner};
use crate::orchestrator::analytics::{self, AnalyticsSnapshot};
use crate::orchestrator::{
    Advisor, Orchestrator, OrchestratorError, ProjectOverrides, RunReport, Suggestion,
    TemplateEngine,
};
use crate::services::{BroadcastSink, CommandRollback, FanoutSink, LogSink, WebhookSink};
use crate::state::config::ProjectConfig;
use crate::state::execution::{Execution, Notification, TriggerSource};
use crate::state::persistence::{EntityStore, PersistenceError};
use crate::state::project::Project;
use crate::state::template::{Difficulty, StepBlueprint, Template};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info};

/// Notifications buffered for slow WebSocket subscribers
const EVENT_CAPACITY: usize = 256;

/// Fields of a project created without a stored template
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewProject {
    /// Display name
    pub name: String,
    /// Description
    #[serde(default)]
    pub description: String,
    /// Category tag
    #[serde(default)]
    pub category: String,
    /// Target framework
    #[serde(default)]
    pub framework: String,
    /// Configuration
    #[serde(default)]
    pub config: ProjectConfig,
    /// Steps, with dependencies given by blueprint key
    #[serde(default)]
    pub steps: Vec<StepBlueprint>,
}

/// Shared application context
///
/// Built once at startup and handed to every handler; cloning is cheap.
#[derive(Clone)]
pub struct AppContext {
    store: Arc<EntityStore>,
    orchestrator: Arc<Orchestrator>,
    advisor: Arc<Advisor>,
    events: BroadcastSink,
}

impl AppContext {
    /// Build the context with the real shell runner
    pub fn new(config: &Config) -> Result<Self, PersistenceError> {
        let mut runner = ShellCommandRunner::new(config.execution.command_timeout_secs);
        if let Some(dir) = &config.execution.working_dir {
            runner = runner.with_working_dir(dir);
        }
        Self::with_runner(config, Arc::new(runner))
    }

    /// Build the context over a custom command runner
    pub fn with_runner(
        config: &Config,
        runner: Arc<dyn CommandRunner>,
    ) -> Result<Self, PersistenceError> {
        let store = Arc::new(EntityStore::open(&config.persistence.data_dir)?);
        let events = BroadcastSink::new(EVENT_CAPACITY);

        let mut sinks = FanoutSink::new()
            .with(Arc::new(LogSink))
            .with(Arc::new(events.clone()));
        if let Some(url) = &config.notifications.webhook_url {
            info!(url = %url, "Webhook notifications enabled");
            sinks = sinks.with(Arc::new(WebhookSink::new(url.clone())));
        }

        let orchestrator = Orchestrator::new(
            store.clone(),
            runner.clone(),
            Arc::new(sinks),
            Arc::new(CommandRollback::new(runner)),
        );

        Ok(Self {
            store,
            orchestrator: Arc::new(orchestrator),
            advisor: Arc::new(Advisor::new(config.advisor.clone())),
            events,
        })
    }

    /// Entity store
    pub fn store(&self) -> &EntityStore {
        &self.store
    }

    /// Orchestrator
    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    /// Live notification channel
    pub fn events(&self) -> &BroadcastSink {
        &self.events
    }

    /// Close runs left `running` by a previous process
    pub fn recover_interrupted(&self) -> Result<usize, AppError> {
        Ok(self.orchestrator.recover_interrupted()?)
    }

    // Projects

    /// All projects, in creation order
    pub fn projects(&self) -> Vec<Project> {
        self.store.load()
    }

    /// One project
    pub fn project(&self, id: &str) -> Result<Project, AppError> {
        self.store
            .get(id)
            .ok_or_else(|| AppError::ProjectNotFound(id.to_string()))
    }

    /// Create a project from inline step blueprints
    pub async fn create_project(&self, request: NewProject) -> Result<Project, AppError> {
        if request.name.trim().is_empty() {
            return Err(AppError::InvalidProject(
                "Project name cannot be empty".to_string(),
            ));
        }

        let inline = Template {
            id: "inline".to_string(),
            name: request.name,
            description: request.description,
            category: request.category,
            framework: request.framework,
            difficulty: Difficulty::default(),
            estimated_minutes: 0,
            default_config: request.config,
            steps: request.steps,
            tags: Vec::new(),
        };
        let mut project = TemplateEngine::instantiate(&inline, &ProjectOverrides::default())?;
        project.template_id = None;
        self.insert_project(project).await
    }

    /// Instantiate a stored template into a new project
    pub async fn instantiate_template(
        &self,
        template_id: &str,
        overrides: &ProjectOverrides,
    ) -> Result<Project, AppError> {
        let template = self.template(template_id)?;
        let project = TemplateEngine::instantiate(&template, overrides)?;
        self.insert_project(project).await
    }

    /// Store a freshly created project; an enabled project without steps runs
    /// at once
    async fn insert_project(&self, project: Project) -> Result<Project, AppError> {
        project.validate().map_err(AppError::InvalidProject)?;
        self.store.upsert(project.clone())?;
        info!(project_id = %project.id, name = %project.name, "Project created");

        if project.steps.is_empty() && project.config.enabled {
            self.orchestrator
                .run_project(&project.id, TriggerSource::Event)
                .await?;
            return self.project(&project.id);
        }
        Ok(project)
    }

    /// Delete a project and its steps
    ///
    /// Execution history and notifications are kept.
    pub fn delete_project(&self, id: &str) -> Result<Project, AppError> {
        // Checked under the store lock, which run admission also takes
        let removed = self.store.try_update::<Project, _, AppError, _>(|projects| {
            let idx = projects
                .iter()
                .position(|p| p.id == id)
                .ok_or_else(|| AppError::ProjectNotFound(id.to_string()))?;
            if projects[idx].status.is_running() || self.orchestrator.is_active(id) {
                return Err(OrchestratorError::AlreadyRunning(id.to_string()).into());
            }
            Ok(projects.remove(idx))
        })?;
        info!(project_id = %id, "Project deleted");
        Ok(removed)
    }

    // Runs

    /// Start a run in the background and return its execution record
    pub fn start_run(&self, id: &str, trigger: TriggerSource) -> Result<Execution, AppError> {
        let run = self.orchestrator.begin_run(id, trigger)?;
        let execution = run.execution().clone();

        let orchestrator = self.orchestrator.clone();
        tokio::spawn(async move {
            let report: RunReport = orchestrator.drive(run).await;
            debug!(
                project_id = %report.project_id,
                status = %report.execution.status,
                "Background run finished"
            );
        });
        Ok(execution)
    }

    /// Run a project and wait for the outcome
    pub async fn run_project(&self, id: &str, trigger: TriggerSource) -> Result<RunReport, AppError> {
        Ok(self.orchestrator.run_project(id, trigger).await?)
    }

    /// Cancel the active run of a project
    pub fn cancel_run(&self, id: &str) -> Result<(), AppError> {
        Ok(self.orchestrator.cancel(id)?)
    }

    /// Execution history of a project, oldest first
    pub fn executions(&self, id: &str) -> Result<Vec<Execution>, AppError> {
        self.project(id)?;
        let mut history: Vec<Execution> = self
            .store
            .load::<Execution>()
            .into_iter()
            .filter(|e| e.project_id == id)
            .collect();
        history.sort_by_key(|e| e.started_at);
        Ok(history)
    }

    // Analytics and advice

    /// Analytics snapshot of a project
    pub fn analytics(&self, id: &str) -> Result<AnalyticsSnapshot, AppError> {
        self.project(id)?;
        Ok(analytics::compute(id, &self.store.load::<Execution>()))
    }

    /// Analytics snapshots of every project with history
    pub fn analytics_overview(&self) -> Vec<AnalyticsSnapshot> {
        analytics::overview(&self.store.load::<Execution>())
    }

    /// Improvement suggestions for a project
    pub fn suggestions(&self, id: &str) -> Result<Vec<Suggestion>, AppError> {
        let project = self.project(id)?;
        let snapshot = analytics::compute(id, &self.store.load::<Execution>());
        Ok(self.advisor.analyze(&project, &snapshot))
    }

    // Templates

    /// All templates
    pub fn templates(&self) -> Vec<Template> {
        self.store.load()
    }

    /// One template
    pub fn template(&self, id: &str) -> Result<Template, AppError> {
        self.store
            .get(id)
            .ok_or_else(|| AppError::TemplateNotFound(id.to_string()))
    }

    /// Import a template document, replacing a template with the same ID
    pub fn import_template(&self, json: &str) -> Result<Template, AppError> {
        let template = TemplateEngine::import_template(json)?;
        self.store.update::<Template, _, _>(|templates| {
            match templates.iter_mut().find(|t| t.id == template.id) {
                Some(slot) => *slot = template.clone(),
                None => templates.push(template.clone()),
            }
        })?;
        info!(template_id = %template.id, "Template imported");
        Ok(template)
    }

    /// Export a template as a JSON document
    pub fn export_template(&self, id: &str) -> Result<String, AppError> {
        let template = self.template(id)?;
        Ok(TemplateEngine::export_template(&template)?)
    }

    // Notifications

    /// All notifications, in emission order
    pub fn notifications(&self) -> Vec<Notification> {
        self.store.load()
    }

    /// Mark one notification read
    pub fn mark_notification_read(&self, id: &str) -> Result<Notification, AppError> {
        self.store
            .update::<Notification, _, _>(|notifications| {
                notifications.iter_mut().find(|n| n.id == id).map(|n| {
                    n.read = true;
                    n.clone()
                })
            })?
            .ok_or_else(|| AppError::NotificationNotFound(id.to_string()))
    }

    /// Mark every notification read, returning how many changed
    pub fn mark_all_notifications_read(&self) -> Result<usize, AppError> {
        Ok(self.store.update::<Notification, _, _>(|notifications| {
            let mut changed = 0;
            for n in notifications.iter_mut().filter(|n| !n.read) {
                n.read = true;
                changed += 1;
            }
            changed
        })?)
    }
}
