//! Project API handlers
//!
//! CRUD, run control and execution history of projects.

use crate::api::MessageResponse;
use crate::error::AppError;
use crate::state::{
    AppContext, Execution, NewProject, Project, ProjectId, ProjectStatus, TriggerSource,
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Project summary used in listings
#[derive(Debug, Serialize)]
pub struct ProjectSummary {
    /// Unique identifier
    pub id: ProjectId,
    /// Display name
    pub name: String,
    /// Category tag
    pub category: String,
    /// Target framework
    pub framework: String,
    /// Lifecycle status
    pub status: ProjectStatus,
    /// Number of steps
    pub step_count: usize,
    /// Last modification
    pub updated_at: DateTime<Utc>,
}

impl From<&Project> for ProjectSummary {
    fn from(project: &Project) -> Self {
        Self {
            id: project.id.clone(),
            name: project.name.clone(),
            category: project.category.clone(),
            framework: project.framework.clone(),
            status: project.status,
            step_count: project.steps.len(),
            updated_at: project.updated_at,
        }
    }
}

/// Projects list response
#[derive(Serialize)]
pub struct ProjectsListResponse {
    /// Project summaries
    pub projects: Vec<ProjectSummary>,
    /// Total number of projects
    pub count: usize,
}

/// Executions list response
#[derive(Serialize)]
pub struct ExecutionsListResponse {
    /// Executions, oldest first
    pub executions: Vec<Execution>,
    /// Total number of executions
    pub count: usize,
}

/// Optional body of a run request
#[derive(Debug, Default, Deserialize)]
pub struct RunRequest {
    /// Trigger source (defaults to manual)
    #[serde(default)]
    pub trigger: TriggerSource,
}

/// GET /api/projects - List all projects
pub async fn list_projects(State(ctx): State<AppContext>) -> Json<ProjectsListResponse> {
    let projects: Vec<ProjectSummary> = ctx.projects().iter().map(ProjectSummary::from).collect();
    Json(ProjectsListResponse {
        count: projects.len(),
        projects,
    })
}

/// GET /api/projects/:id - Get a project with its steps
pub async fn get_project(
    State(ctx): State<AppContext>,
    Path(id): Path<ProjectId>,
) -> Result<Json<Project>, AppError> {
    Ok(Json(ctx.project(&id)?))
}

/// POST /api/projects - Create a project from inline steps
pub async fn create_project(
    State(ctx): State<AppContext>,
    Json(request): Json<NewProject>,
) -> Result<(StatusCode, Json<Project>), AppError> {
    let project = ctx.create_project(request).await?;
    Ok((StatusCode::CREATED, Json(project)))
}

/// DELETE /api/projects/:id - Delete a project
pub async fn delete_project(
    State(ctx): State<AppContext>,
    Path(id): Path<ProjectId>,
) -> Result<Json<MessageResponse>, AppError> {
    let project = ctx.delete_project(&id)?;
    Ok(Json(MessageResponse::ok(format!(
        "Project '{}' deleted",
        project.name
    ))))
}

/// POST /api/projects/:id/run - Start a run in the background
///
/// Answers `202 Accepted` with the opened execution record, or `409` when
/// the project is already running.
pub async fn run_project(
    State(ctx): State<AppContext>,
    Path(id): Path<ProjectId>,
    request: Option<Json<RunRequest>>,
) -> Result<(StatusCode, Json<Execution>), AppError> {
    let trigger = request.map(|Json(r)| r.trigger).unwrap_or_default();
    let execution = ctx.start_run(&id, trigger)?;
    Ok((StatusCode::ACCEPTED, Json(execution)))
}

/// POST /api/projects/:id/cancel - Cancel the active run
pub async fn cancel_project(
    State(ctx): State<AppContext>,
    Path(id): Path<ProjectId>,
) -> Result<(StatusCode, Json<MessageResponse>), AppError> {
    ctx.cancel_run(&id)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(MessageResponse::ok("Cancellation requested")),
    ))
}

/// GET /api/projects/:id/executions - Execution history
pub async fn list_executions(
    State(ctx): State<AppContext>,
    Path(id): Path<ProjectId>,
) -> Result<Json<ExecutionsListResponse>, AppError> {
    let executions = ctx.executions(&id)?;
    Ok(Json(ExecutionsListResponse {
        count: executions.len(),
        executions,
    }))
}
