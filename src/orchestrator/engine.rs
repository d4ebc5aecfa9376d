//! Project orchestrator
//!
//! Drives a project run to a terminal state: eligible steps are executed wave
//! by wave in ascending `order`, completions unlock followers, failures are
//! handled according to the failed step's policy, and the run ends with a
//! finalized execution record and a notification.
//!
//! Every step transition is persisted immediately, so a crash mid-run leaves
//! a consistent picture that `recover_interrupted` can close.

use crate::executor::{CancelFlag, CommandRunner, StepContext, StepExecutor};
use crate::orchestrator::error::OrchestratorError;
use crate::orchestrator::resolver::{blocked_steps, eligible_steps, unlock_followers, validate_graph};
use crate::services::notifications::NotificationSink;
use crate::services::rollback::{RollbackHandler, RollbackRequest};
use crate::state::execution::{Execution, Notification, NotificationKind, TriggerSource};
use crate::state::persistence::EntityStore;
use crate::state::project::{FailurePolicy, LogLevel, Project, ProjectId, Step, StepId};
use crate::state::status::{ExecutionStatus, ProjectStatus, StepStatus};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, warn};

type ActiveRuns = Arc<Mutex<HashMap<ProjectId, CancelFlag>>>;

/// Releases the in-process run slot of a project when dropped
struct RunSlot {
    active: ActiveRuns,
    project_id: ProjectId,
}

impl Drop for RunSlot {
    fn drop(&mut self) {
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.project_id);
    }
}

/// A run that has been admitted but not yet driven
///
/// Holding an `ActiveRun` keeps the project's run slot reserved; dropping it
/// without calling `drive` releases the slot but leaves the project
/// `running` in the store until `recover_interrupted`.
pub struct ActiveRun {
    project: Project,
    execution: Execution,
    cancel: CancelFlag,
    _slot: RunSlot,
}

impl ActiveRun {
    /// Execution record opened for this run
    pub fn execution(&self) -> &Execution {
        &self.execution
    }

    /// Project snapshot at the start of the run
    pub fn project(&self) -> &Project {
        &self.project
    }
}

/// Summary of a finished run
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Project that ran
    pub project_id: ProjectId,
    /// Terminal project status
    pub project_status: ProjectStatus,
    /// Finalized execution record
    pub execution: Execution,
    /// Notification emitted for the run
    pub notification: Notification,
}

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Completed,
    Failed,
    Cancelled,
}

/// First failure of a run, used for attribution on the execution
struct Failure {
    step_id: Option<StepId>,
    message: String,
}

/// Runs projects against the entity store
pub struct Orchestrator {
    store: Arc<EntityStore>,
    executor: StepExecutor,
    sink: Arc<dyn NotificationSink>,
    rollback: Arc<dyn RollbackHandler>,
    active: ActiveRuns,
}

impl Orchestrator {
    /// Create an orchestrator
    pub fn new(
        store: Arc<EntityStore>,
        runner: Arc<dyn CommandRunner>,
        sink: Arc<dyn NotificationSink>,
        rollback: Arc<dyn RollbackHandler>,
    ) -> Self {
        Self {
            store,
            executor: StepExecutor::new(runner),
            sink,
            rollback,
            active: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Whether the project has an active run in this process
    pub fn is_active(&self, project_id: &str) -> bool {
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(project_id)
    }

    /// Run a project to completion
    pub async fn run_project(
        &self,
        project_id: &str,
        trigger: TriggerSource,
    ) -> Result<RunReport, OrchestratorError> {
        let run = self.begin_run(project_id, trigger)?;
        Ok(self.drive(run).await)
    }

    /// Admit a run
    ///
    /// Rejects unknown projects, projects that are already running, disabled
    /// projects and projects whose step graph is invalid. On success the
    /// steps are reset, the project is `running` and a `running` execution is
    /// appended. If the execution cannot be stored, the project is put back
    /// as it was.
    pub fn begin_run(
        &self,
        project_id: &str,
        trigger: TriggerSource,
    ) -> Result<ActiveRun, OrchestratorError> {
        let cancel = CancelFlag::new();
        let slot = {
            let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
            if active.contains_key(project_id) {
                return Err(OrchestratorError::AlreadyRunning(project_id.to_string()));
            }
            active.insert(project_id.to_string(), cancel.clone());
            RunSlot {
                active: self.active.clone(),
                project_id: project_id.to_string(),
            }
        };

        let (previous, project) = self
            .store
            .try_update::<Project, _, OrchestratorError, _>(|projects| {
                let project = projects
                    .iter_mut()
                    .find(|p| p.id == project_id)
                    .ok_or_else(|| OrchestratorError::ProjectNotFound(project_id.to_string()))?;
                if project.status.is_running() {
                    return Err(OrchestratorError::AlreadyRunning(project_id.to_string()));
                }
                if !project.config.enabled {
                    return Err(OrchestratorError::Disabled(project_id.to_string()));
                }
                validate_graph(&project.steps)?;

                let previous = project.clone();
                for step in &mut project.steps {
                    step.reset();
                }
                project.set_status(ProjectStatus::Running)?;
                Ok((previous, project.clone()))
            })?;

        let execution = Execution::start(project_id, trigger);
        if let Err(e) = self.store.append(execution.clone()) {
            // Without an execution record the run never started
            error!(project_id = %project_id, error = %e, "Cannot open execution, run aborted");
            self.persist_project(&previous);
            return Err(e.into());
        }

        info!(
            project_id = %project_id,
            execution_id = %execution.id,
            trigger = ?trigger,
            steps = project.steps.len(),
            "Run started"
        );

        Ok(ActiveRun {
            project,
            execution,
            cancel,
            _slot: slot,
        })
    }

    /// Drive an admitted run to its terminal state
    ///
    /// Never fails: command failures and store problems during the run are
    /// recorded on the steps, the execution and the log.
    pub async fn drive(&self, run: ActiveRun) -> RunReport {
        let ActiveRun {
            mut project,
            mut execution,
            cancel,
            _slot,
        } = run;

        let env = project.config.environment_variables.clone();
        let mut completion_order: Vec<StepId> = Vec::new();
        let mut failure: Option<Failure> = None;
        let mut outcome = Outcome::Completed;

        'run: loop {
            // A cancel that arrives after the last step settled changes nothing
            if project.steps.iter().all(|s| s.status.is_terminal()) {
                break;
            }
            if cancel.is_cancelled() {
                outcome = Outcome::Cancelled;
                break;
            }

            let wave: Vec<StepId> = eligible_steps(&project.steps)
                .iter()
                .map(|step| step.id.clone())
                .collect();

            if wave.is_empty() {
                if let Some(stuck) = Self::stuck_steps(&project.steps) {
                    let message = format!(
                        "unresolved dependency: steps {} can never become eligible",
                        stuck.join(", ")
                    );
                    error!(project_id = %project.id, "{}", message);
                    failure.get_or_insert(Failure {
                        step_id: stuck.first().cloned(),
                        message,
                    });
                    outcome = Outcome::Failed;
                }
                break;
            }

            // Queue the whole wave before running any of it
            for id in &wave {
                if let Some(step) = project.step_mut(id) {
                    if let Err(e) = step.set_status(StepStatus::Pending) {
                        warn!(step_id = %id, error = %e, "Cannot queue step");
                    }
                }
            }
            project.touch();
            self.persist_project(&project);
            debug!(project_id = %project.id, wave = wave.len(), "Wave queued");

            for id in wave {
                if cancel.is_cancelled() {
                    outcome = Outcome::Cancelled;
                    break 'run;
                }
                let Some(mut step) = project.step(&id).cloned() else {
                    continue;
                };

                let ctx = StepContext {
                    env: &env,
                    cancel: &cancel,
                };
                let project_id = project.id.clone();
                let result = self
                    .executor
                    .execute(&mut step, &ctx, |s| self.persist_step(&project_id, s))
                    .await;
                project.replace_step(step.clone());

                let result = match result {
                    Ok(result) => result,
                    Err(e) => {
                        error!(step_id = %id, error = %e, "Step could not be executed");
                        failure.get_or_insert(Failure {
                            step_id: Some(id.clone()),
                            message: e.to_string(),
                        });
                        outcome = Outcome::Failed;
                        break 'run;
                    }
                };

                match result.status {
                    StepStatus::Completed => {
                        completion_order.push(id.clone());
                        let unlocked = unlock_followers(&mut project.steps, &id);
                        if !unlocked.is_empty() {
                            debug!(step_id = %id, unlocked = ?unlocked, "Followers unlocked");
                            project.touch();
                            self.persist_project(&project);
                        }
                    }
                    StepStatus::Cancelled => {
                        outcome = Outcome::Cancelled;
                        break 'run;
                    }
                    _ => {
                        let message = format!(
                            "Step '{}' failed: {}",
                            step.title,
                            result.error.as_deref().unwrap_or("unknown error")
                        );
                        failure.get_or_insert(Failure {
                            step_id: Some(id.clone()),
                            message,
                        });
                        outcome = Outcome::Failed;

                        match step.failure_policy {
                            FailurePolicy::Continue => {
                                info!(step_id = %id, "Step failed, continuing with other steps");
                            }
                            FailurePolicy::Stop => {
                                info!(step_id = %id, "Step failed, stopping run");
                                break 'run;
                            }
                            FailurePolicy::Rollback => {
                                info!(step_id = %id, "Step failed, rolling back");
                                self.roll_back(&mut project, &id, &completion_order, &env)
                                    .await;
                                break 'run;
                            }
                        }
                    }
                }
            }
        }

        // Steps that never started are cancelled on cancellation; on abort only
        // the queued remainder of the wave is
        let never_started = |status: StepStatus| match outcome {
            Outcome::Cancelled => matches!(
                status,
                StepStatus::Locked | StepStatus::Available | StepStatus::Pending
            ),
            _ => status == StepStatus::Pending,
        };
        for step in project.steps.iter_mut().filter(|s| never_started(s.status)) {
            if step.set_status(StepStatus::Cancelled).is_ok() {
                step.log(LogLevel::Warn, "Step not started: run ended");
            }
        }

        self.finalize(project, &mut execution, outcome, failure).await
    }

    /// Non-terminal steps that are neither eligible nor blocked by a failure
    fn stuck_steps(steps: &[Step]) -> Option<Vec<StepId>> {
        let blocked = blocked_steps(steps);
        let stuck: Vec<StepId> = steps
            .iter()
            .filter(|s| !s.status.is_terminal() && !blocked.contains(&s.id))
            .map(|s| s.id.clone())
            .collect();
        if stuck.is_empty() {
            None
        } else {
            Some(stuck)
        }
    }

    async fn roll_back(
        &self,
        project: &mut Project,
        failed_step_id: &str,
        completion_order: &[StepId],
        env: &HashMap<String, String>,
    ) {
        let request = RollbackRequest {
            project_id: project.id.clone(),
            failed_step_id: failed_step_id.to_string(),
            completed_steps: completion_order
                .iter()
                .filter_map(|id| project.step(id).cloned())
                .collect(),
            env: env.clone(),
        };

        let outcome = self.rollback.rollback(&request).await;
        if let Some(step) = project.step_mut(failed_step_id) {
            let level = if outcome.succeeded {
                LogLevel::Info
            } else {
                LogLevel::Error
            };
            for line in outcome.log {
                step.log(level, format!("rollback: {}", line));
            }
        }
        project.touch();
        self.persist_project(project);
    }

    async fn finalize(
        &self,
        mut project: Project,
        execution: &mut Execution,
        outcome: Outcome,
        failure: Option<Failure>,
    ) -> RunReport {
        let (execution_status, project_status) = match outcome {
            Outcome::Completed => (ExecutionStatus::Completed, ProjectStatus::Completed),
            Outcome::Failed => (ExecutionStatus::Failed, ProjectStatus::Failed),
            Outcome::Cancelled => (ExecutionStatus::Cancelled, ProjectStatus::Failed),
        };

        let error = match (outcome, &failure) {
            (Outcome::Completed, _) => None,
            (Outcome::Cancelled, _) => Some("Run cancelled".to_string()),
            (Outcome::Failed, Some(f)) => Some(f.message.clone()),
            (Outcome::Failed, None) => Some("Run failed".to_string()),
        };

        // A run without steps takes no time
        let finished_at = if project.steps.is_empty() {
            execution.started_at
        } else {
            Utc::now()
        };
        if let Err(e) = execution.finish(execution_status, finished_at, error) {
            error!(execution_id = %execution.id, error = %e, "Cannot finalize execution");
        }
        execution.failed_step_id = match outcome {
            Outcome::Failed => failure.and_then(|f| f.step_id),
            _ => None,
        };

        if let Err(e) = project.set_status(project_status) {
            error!(project_id = %project.id, error = %e, "Cannot finalize project");
        }
        self.persist_project(&project);

        let record = execution.clone();
        if let Err(e) = self.store.update::<Execution, _, _>(|executions| {
            match executions.iter_mut().find(|e| e.id == record.id) {
                Some(slot) => *slot = record,
                None => executions.push(record),
            }
        }) {
            error!(execution_id = %execution.id, error = %e, "Cannot persist execution");
        }

        let notification = Self::notification_for(&project, execution, outcome);
        if let Err(e) = self.store.append(notification.clone()) {
            error!(project_id = %project.id, error = %e, "Cannot persist notification");
        }
        if let Err(e) = self.sink.deliver(&notification).await {
            warn!(project_id = %project.id, error = %e, "Notification delivery failed");
        }

        info!(
            project_id = %project.id,
            execution_id = %execution.id,
            status = %execution.status,
            duration_ms = execution.duration_ms.unwrap_or(0),
            "Run finished"
        );

        RunReport {
            project_id: project.id.clone(),
            project_status: project.status,
            execution: execution.clone(),
            notification,
        }
    }

    fn notification_for(project: &Project, execution: &Execution, outcome: Outcome) -> Notification {
        let duration = execution.duration_ms.unwrap_or(0);
        match outcome {
            Outcome::Completed => Notification::new(
                NotificationKind::Success,
                format!("{} completed", project.name),
                format!("All {} steps completed in {} ms", project.steps.len(), duration),
                project.id.clone(),
            ),
            Outcome::Failed => Notification::new(
                NotificationKind::Failure,
                format!("{} failed", project.name),
                execution
                    .error
                    .clone()
                    .unwrap_or_else(|| "Run failed".to_string()),
                project.id.clone(),
            ),
            Outcome::Cancelled => Notification::new(
                NotificationKind::Info,
                format!("{} cancelled", project.name),
                format!("Run cancelled after {} ms", duration),
                project.id.clone(),
            ),
        }
    }

    /// Persist one step of a running project
    fn persist_step(&self, project_id: &str, step: &Step) {
        let result = self.store.update::<Project, _, _>(|projects| {
            if let Some(project) = projects.iter_mut().find(|p| p.id == project_id) {
                project.replace_step(step.clone());
            }
        });
        if let Err(e) = result {
            error!(project_id = %project_id, step_id = %step.id, error = %e, "Cannot persist step");
        }
    }

    /// Persist a running project, unless it was deleted meanwhile
    fn persist_project(&self, project: &Project) {
        let result = self.store.update::<Project, _, _>(|projects| {
            if let Some(slot) = projects.iter_mut().find(|p| p.id == project.id) {
                *slot = project.clone();
            }
        });
        if let Err(e) = result {
            error!(project_id = %project.id, error = %e, "Cannot persist project");
        }
    }

    /// Request cancellation of an active run
    ///
    /// The running step finishes its current command; nothing else starts.
    pub fn cancel(&self, project_id: &str) -> Result<(), OrchestratorError> {
        let active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        match active.get(project_id) {
            Some(flag) => {
                flag.cancel();
                info!(project_id = %project_id, "Cancellation requested");
                Ok(())
            }
            None => Err(OrchestratorError::NotRunning(project_id.to_string())),
        }
    }

    /// Close runs interrupted by a restart
    ///
    /// Projects persisted as `running` without an active run in this process
    /// become `failed`; their open executions fail with an "interrupted"
    /// error. Returns the number of recovered projects.
    pub fn recover_interrupted(&self) -> Result<usize, OrchestratorError> {
        let active: Vec<ProjectId> = self
            .active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();

        let recovered: Vec<ProjectId> = self.store.update::<Project, _, _>(|projects| {
            let mut recovered = Vec::new();
            for project in projects
                .iter_mut()
                .filter(|p| p.status.is_running() && !active.contains(&p.id))
            {
                for step in &mut project.steps {
                    let to = match step.status {
                        StepStatus::Running => StepStatus::Failed,
                        StepStatus::Pending => StepStatus::Cancelled,
                        _ => continue,
                    };
                    if step.set_status(to).is_ok() {
                        step.log(LogLevel::Error, "Interrupted by restart");
                    }
                }
                if project.set_status(ProjectStatus::Failed).is_ok() {
                    recovered.push(project.id.clone());
                }
            }
            recovered
        })?;

        if recovered.is_empty() {
            return Ok(0);
        }

        let now = Utc::now();
        self.store.update::<Execution, _, _>(|executions| {
            for execution in executions.iter_mut().filter(|e| {
                e.status == ExecutionStatus::Running && recovered.contains(&e.project_id)
            }) {
                let _ = execution.finish(
                    ExecutionStatus::Failed,
                    now,
                    Some("interrupted: the server stopped during the run".to_string()),
                );
            }
        })?;

        warn!(count = recovered.len(), "Recovered interrupted runs");
        Ok(recovered.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{Script, ScriptedCommandRunner};
    use crate::services::notifications::BroadcastSink;
    use crate::services::rollback::NoopRollback;
    use std::time::Duration;
    use tempfile::TempDir;

    struct Harness {
        _dir: TempDir,
        store: Arc<EntityStore>,
        orchestrator: Orchestrator,
        rollback: Arc<NoopRollback>,
    }

    fn harness(runner: ScriptedCommandRunner) -> Harness {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(EntityStore::open(dir.path()).unwrap());
        let rollback = Arc::new(NoopRollback::new());
        let orchestrator = Orchestrator::new(
            store.clone(),
            Arc::new(runner),
            Arc::new(BroadcastSink::new(16)),
            rollback.clone(),
        );
        Harness {
            _dir: dir,
            store,
            orchestrator,
            rollback,
        }
    }

    fn save(store: &EntityStore, project: &Project) {
        store.upsert(project.clone()).unwrap();
    }

    #[tokio::test]
    async fn test_linear_run_completes() {
        let h = harness(ScriptedCommandRunner::new());
        let a = Step::new("A", 1, vec![]).with_commands(["a"]);
        let b = Step::new("B", 2, vec![a.id.clone()]).with_commands(["b"]);
        let project = Project::new("p", vec![a, b]);
        save(&h.store, &project);

        let report = h
            .orchestrator
            .run_project(&project.id, TriggerSource::Manual)
            .await
            .unwrap();

        assert_eq!(report.project_status, ProjectStatus::Completed);
        assert_eq!(report.execution.status, ExecutionStatus::Completed);
        let stored: Project = h.store.get(&project.id).unwrap();
        assert!(stored.steps.iter().all(|s| s.status == StepStatus::Completed));
        assert!(!h.orchestrator.is_active(&project.id));
    }

    #[tokio::test]
    async fn test_unknown_project() {
        let h = harness(ScriptedCommandRunner::new());
        let result = h.orchestrator.run_project("nope", TriggerSource::Manual).await;
        assert!(matches!(result, Err(OrchestratorError::ProjectNotFound(_))));
        assert!(!h.orchestrator.is_active("nope"));
    }

    #[tokio::test]
    async fn test_second_begin_rejected_while_active() {
        let h = harness(ScriptedCommandRunner::new());
        let project = Project::new("p", vec![Step::new("A", 1, vec![])]);
        save(&h.store, &project);

        let run = h
            .orchestrator
            .begin_run(&project.id, TriggerSource::Manual)
            .unwrap();
        assert!(matches!(
            h.orchestrator.begin_run(&project.id, TriggerSource::Manual),
            Err(OrchestratorError::AlreadyRunning(_))
        ));
        h.orchestrator.drive(run).await;
        assert!(h
            .orchestrator
            .begin_run(&project.id, TriggerSource::Manual)
            .is_ok());
    }

    #[tokio::test]
    async fn test_invalid_graph_rejected_before_running() {
        let h = harness(ScriptedCommandRunner::new());
        let mut a = Step::new("A", 1, vec![]);
        let b = Step::new("B", 2, vec![a.id.clone()]);
        a.depends_on = vec![b.id.clone()];
        let project = Project::new("p", vec![a, b]);
        save(&h.store, &project);

        let result = h.orchestrator.begin_run(&project.id, TriggerSource::Manual);
        assert!(matches!(result, Err(OrchestratorError::InvalidGraph(_))));
        let stored: Project = h.store.get(&project.id).unwrap();
        assert_eq!(stored.status, ProjectStatus::Planning);
        assert!(h.store.load::<Execution>().is_empty());
    }

    #[tokio::test]
    async fn test_rollback_policy_invokes_handler() {
        let h = harness(ScriptedCommandRunner::new().on("promote", Script::Fail("denied".into())));
        let upload = Step::new("Upload", 1, vec![]).with_commands(["upload"]);
        let promote = Step::new("Promote", 2, vec![upload.id.clone()])
            .with_commands(["promote"])
            .with_policy(FailurePolicy::Rollback);
        let promote_id = promote.id.clone();
        let upload_id = upload.id.clone();
        let project = Project::new("p", vec![upload, promote]);
        save(&h.store, &project);

        let report = h
            .orchestrator
            .run_project(&project.id, TriggerSource::Manual)
            .await
            .unwrap();

        assert_eq!(report.project_status, ProjectStatus::Failed);
        assert_eq!(report.execution.failed_step_id, Some(promote_id.clone()));
        let requests = h.rollback.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].failed_step_id, promote_id);
        assert_eq!(requests[0].completed_steps[0].id, upload_id);

        let stored: Project = h.store.get(&project.id).unwrap();
        let promote = stored.step(&requests[0].failed_step_id).unwrap();
        assert!(promote.logs.iter().any(|l| l.message.starts_with("rollback:")));
    }

    #[tokio::test]
    async fn test_recover_interrupted() {
        let h = harness(ScriptedCommandRunner::new());
        let mut project = Project::new("p", vec![Step::new("A", 1, vec![])]);
        project.set_status(ProjectStatus::Running).unwrap();
        project.steps[0].set_status(StepStatus::Running).unwrap();
        save(&h.store, &project);
        h.store
            .append(Execution::start(project.id.clone(), TriggerSource::Manual))
            .unwrap();

        assert_eq!(h.orchestrator.recover_interrupted().unwrap(), 1);

        let stored: Project = h.store.get(&project.id).unwrap();
        assert_eq!(stored.status, ProjectStatus::Failed);
        assert_eq!(stored.steps[0].status, StepStatus::Failed);
        let executions = h.store.load::<Execution>();
        assert_eq!(executions[0].status, ExecutionStatus::Failed);
        assert!(executions[0].error.as_deref().unwrap().contains("interrupted"));

        // Idempotent
        assert_eq!(h.orchestrator.recover_interrupted().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_cancel_without_run() {
        let h = harness(ScriptedCommandRunner::new());
        assert!(matches!(
            h.orchestrator.cancel("p"),
            Err(OrchestratorError::NotRunning(_))
        ));
    }

    #[tokio::test]
    async fn test_notification_persisted() {
        let h = harness(ScriptedCommandRunner::new().on("boom", Script::Fail("x".into())));
        let project = Project::new("site", vec![Step::new("A", 1, vec![]).with_commands(["boom"])]);
        save(&h.store, &project);

        let report = h
            .orchestrator
            .run_project(&project.id, TriggerSource::Manual)
            .await
            .unwrap();

        let notifications = h.store.load::<Notification>();
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].kind, NotificationKind::Failure);
        assert_eq!(notifications[0], report.notification);
        assert!(notifications[0].message.contains("Step 'A' failed"));
    }

    #[tokio::test]
    async fn test_disabled_project_rejected() {
        let h = harness(ScriptedCommandRunner::new());
        let mut project = Project::new("p", vec![Step::new("A", 1, vec![])]);
        project.config.enabled = false;
        save(&h.store, &project);

        let result = h.orchestrator.run_project(&project.id, TriggerSource::Manual).await;
        assert!(matches!(result, Err(OrchestratorError::Disabled(_))));
        assert!(h.store.load::<Execution>().is_empty());
        let stored: Project = h.store.get(&project.id).unwrap();
        assert_eq!(stored.status, ProjectStatus::Planning);
        assert!(!h.orchestrator.is_active(&project.id));
    }

    #[tokio::test]
    async fn test_failed_execution_write_restores_project() {
        let h = harness(ScriptedCommandRunner::new());
        let project = Project::new("p", vec![Step::new("A", 1, vec![])]);
        save(&h.store, &project);

        // A directory in place of the temp file makes every executions save fail
        let blocker = h.store.data_dir().join("executions.json.tmp");
        std::fs::create_dir(&blocker).unwrap();

        let result = h.orchestrator.begin_run(&project.id, TriggerSource::Manual);
        assert!(matches!(result, Err(OrchestratorError::Persistence(_))));
        let stored: Project = h.store.get(&project.id).unwrap();
        assert_eq!(stored.status, ProjectStatus::Planning);
        assert!(!h.orchestrator.is_active(&project.id));

        std::fs::remove_dir(&blocker).unwrap();
        let report = h
            .orchestrator
            .run_project(&project.id, TriggerSource::Manual)
            .await
            .unwrap();
        assert_eq!(report.execution.status, ExecutionStatus::Completed);
    }

    #[tokio::test]
    async fn test_cancel_after_last_step_keeps_run_completed() {
        let h = harness(
            ScriptedCommandRunner::new().on("slow", Script::Delay(Duration::from_millis(200))),
        );
        let project = Project::new("p", vec![Step::new("A", 1, vec![]).with_commands(["slow"])]);
        save(&h.store, &project);

        let run = h
            .orchestrator
            .begin_run(&project.id, TriggerSource::Manual)
            .unwrap();
        // The only command is already running when the cancel lands
        let (report, cancelled) = tokio::join!(h.orchestrator.drive(run), async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            h.orchestrator.cancel(&project.id)
        });

        assert!(cancelled.is_ok());
        assert_eq!(report.execution.status, ExecutionStatus::Completed);
        assert_eq!(report.project_status, ProjectStatus::Completed);
    }
}
