//! Analytics and advisor API handlers

use crate::error::AppError;
use crate::orchestrator::{AnalyticsSnapshot, Suggestion};
use crate::state::{AppContext, ProjectId};
use axum::{
    extract::{Path, State},
    response::Json,
};
use serde::Serialize;

/// Analytics of every project with history
#[derive(Serialize)]
pub struct AnalyticsOverviewResponse {
    /// Snapshots sorted by project ID
    pub projects: Vec<AnalyticsSnapshot>,
    /// Number of snapshots
    pub count: usize,
}

/// Suggestions response
#[derive(Serialize)]
pub struct SuggestionsResponse {
    /// Project the suggestions are for
    pub project_id: ProjectId,
    /// Suggestions, highest confidence first
    pub suggestions: Vec<Suggestion>,
}

/// GET /api/projects/:id/analytics - Analytics snapshot of one project
pub async fn project_analytics(
    State(ctx): State<AppContext>,
    Path(id): Path<ProjectId>,
) -> Result<Json<AnalyticsSnapshot>, AppError> {
    Ok(Json(ctx.analytics(&id)?))
}

/// GET /api/analytics - Analytics overview
pub async fn analytics_overview(State(ctx): State<AppContext>) -> Json<AnalyticsOverviewResponse> {
    let projects = ctx.analytics_overview();
    Json(AnalyticsOverviewResponse {
        count: projects.len(),
        projects,
    })
}

/// GET /api/projects/:id/suggestions - Advisor output for one project
pub async fn project_suggestions(
    State(ctx): State<AppContext>,
    Path(id): Path<ProjectId>,
) -> Result<Json<SuggestionsResponse>, AppError> {
    let suggestions = ctx.suggestions(&id)?;
    Ok(Json(SuggestionsResponse {
        project_id: id,
        suggestions,
    }))
}
