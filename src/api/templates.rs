//! Template API handlers
//!
//! Listing, import/export and instantiation of templates.

use crate::error::AppError;
use crate::orchestrator::ProjectOverrides;
use crate::state::template::{Difficulty, TemplateId};
use crate::state::{AppContext, Project, Template};
use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;

/// Template summary used in listings
#[derive(Debug, Serialize)]
pub struct TemplateSummary {
    /// Unique identifier
    pub id: TemplateId,
    /// Display name
    pub name: String,
    /// Description
    pub description: String,
    /// Category tag
    pub category: String,
    /// Target framework
    pub framework: String,
    /// Difficulty tag
    pub difficulty: Difficulty,
    /// Rough time to a first successful run
    pub estimated_minutes: u32,
    /// Number of step blueprints
    pub step_count: usize,
    /// Free-form tags
    pub tags: Vec<String>,
}

impl From<&Template> for TemplateSummary {
    fn from(template: &Template) -> Self {
        Self {
            id: template.id.clone(),
            name: template.name.clone(),
            description: template.description.clone(),
            category: template.category.clone(),
            framework: template.framework.clone(),
            difficulty: template.difficulty,
            estimated_minutes: template.estimated_minutes,
            step_count: template.steps.len(),
            tags: template.tags.clone(),
        }
    }
}

/// Templates list response
#[derive(Serialize)]
pub struct TemplatesListResponse {
    /// Template summaries
    pub templates: Vec<TemplateSummary>,
    /// Total number of templates
    pub count: usize,
}

/// GET /api/templates - List all templates
pub async fn list_templates(State(ctx): State<AppContext>) -> Json<TemplatesListResponse> {
    let templates: Vec<TemplateSummary> =
        ctx.templates().iter().map(TemplateSummary::from).collect();
    Json(TemplatesListResponse {
        count: templates.len(),
        templates,
    })
}

/// POST /api/templates - Import a template document
///
/// The body is the raw JSON document produced by the export endpoint.
pub async fn import_template(
    State(ctx): State<AppContext>,
    body: String,
) -> Result<(StatusCode, Json<Template>), AppError> {
    let template = ctx.import_template(&body)?;
    Ok((StatusCode::CREATED, Json(template)))
}

/// GET /api/templates/:id - Export a template document
pub async fn export_template(
    State(ctx): State<AppContext>,
    Path(id): Path<TemplateId>,
) -> Result<Response, AppError> {
    let document = ctx.export_template(&id)?;
    Ok(([(header::CONTENT_TYPE, "application/json")], document).into_response())
}

/// POST /api/templates/:id/instantiate - Create a project from a template
pub async fn instantiate_template(
    State(ctx): State<AppContext>,
    Path(id): Path<TemplateId>,
    overrides: Option<Json<ProjectOverrides>>,
) -> Result<(StatusCode, Json<Project>), AppError> {
    let overrides = overrides.map(|Json(o)| o).unwrap_or_default();
    let project = ctx.instantiate_template(&id, &overrides).await?;
    Ok((StatusCode::CREATED, Json(project)))
}
