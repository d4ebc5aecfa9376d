//! API module
//!
//! HTTP request handlers and the route table

pub mod analytics;
pub mod notifications;
pub mod projects;
pub mod templates;

use crate::state::AppContext;
use crate::websocket;
use axum::{
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;

/// Message response
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    /// Human-readable message
    pub message: String,
    /// Status indicator (e.g., "ok")
    pub status: String,
}

impl MessageResponse {
    /// An "ok" message
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: "ok".to_string(),
        }
    }
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Always "healthy" when the server answers
    pub status: String,
    /// Crate version
    pub version: String,
    /// Human-readable message
    pub message: String,
}

/// GET /api/health - Liveness probe
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        message: "Deploy orchestrator is healthy".to_string(),
    })
}

/// Build the route table over an application context
pub fn router(ctx: AppContext) -> Router {
    Router::new()
        .route("/api/health", get(health_check))
        // Projects
        .route(
            "/api/projects",
            get(projects::list_projects).post(projects::create_project),
        )
        .route(
            "/api/projects/:id",
            get(projects::get_project).delete(projects::delete_project),
        )
        .route("/api/projects/:id/run", post(projects::run_project))
        .route("/api/projects/:id/cancel", post(projects::cancel_project))
        .route(
            "/api/projects/:id/executions",
            get(projects::list_executions),
        )
        .route(
            "/api/projects/:id/analytics",
            get(analytics::project_analytics),
        )
        .route(
            "/api/projects/:id/suggestions",
            get(analytics::project_suggestions),
        )
        .route("/api/analytics", get(analytics::analytics_overview))
        // Templates
        .route(
            "/api/templates",
            get(templates::list_templates).post(templates::import_template),
        )
        .route("/api/templates/:id", get(templates::export_template))
        .route(
            "/api/templates/:id/instantiate",
            post(templates::instantiate_template),
        )
        // Notifications
        .route(
            "/api/notifications",
            get(notifications::list_notifications),
        )
        .route(
            "/api/notifications/read-all",
            post(notifications::mark_all_read),
        )
        .route(
            "/api/notifications/:id/read",
            post(notifications::mark_read),
        )
        // WebSocket for live notifications
        .route("/ws", get(websocket::websocket_handler))
        .with_state(ctx)
}
