//! Error types and error handling for the application
//!
//! This module defines the HTTP-facing error type. Every layer below has its
//! own `thiserror` enum; they all convert into `AppError`, which implements
//! `IntoResponse` to provide consistent error formatting.

use crate::orchestrator::{OrchestratorError, TemplateError};
use crate::state::persistence::PersistenceError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Application-level error types
#[derive(Error, Debug)]
pub enum AppError {
    /// Project with the given ID was not found
    #[error("Project not found: {0}")]
    ProjectNotFound(String),

    /// Template with the given ID was not found
    #[error("Template not found: {0}")]
    TemplateNotFound(String),

    /// Notification with the given ID was not found
    #[error("Notification not found: {0}")]
    NotificationNotFound(String),

    /// Project fields are invalid
    #[error("Invalid project: {0}")]
    InvalidProject(String),

    /// Template failed validation
    #[error("Invalid template: {0}")]
    InvalidTemplate(#[from] TemplateError),

    /// Orchestrator rejected the operation
    #[error("{0}")]
    Orchestrator(#[from] OrchestratorError),

    /// Error occurred during state persistence
    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    /// Internal server error (catch-all for unexpected errors)
    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// HTTP status for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::ProjectNotFound(_) => StatusCode::NOT_FOUND,
            AppError::TemplateNotFound(_) => StatusCode::NOT_FOUND,
            AppError::NotificationNotFound(_) => StatusCode::NOT_FOUND,
            AppError::InvalidProject(_) => StatusCode::BAD_REQUEST,
            AppError::InvalidTemplate(_) => StatusCode::BAD_REQUEST,
            AppError::Orchestrator(e) => match e {
                OrchestratorError::ProjectNotFound(_) => StatusCode::NOT_FOUND,
                OrchestratorError::AlreadyRunning(_) => StatusCode::CONFLICT,
                OrchestratorError::NotRunning(_) => StatusCode::CONFLICT,
                OrchestratorError::Disabled(_) => StatusCode::CONFLICT,
                OrchestratorError::InvalidGraph(_) => StatusCode::BAD_REQUEST,
                OrchestratorError::State(_) => StatusCode::CONFLICT,
                OrchestratorError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            AppError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }

        let body = Json(json!({
            "error": self.to_string(),
            "status": status.as_u16(),
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::GraphError;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            AppError::ProjectNotFound("p".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::from(OrchestratorError::AlreadyRunning("p".into())).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            AppError::from(OrchestratorError::Disabled("p".into())).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            AppError::from(OrchestratorError::InvalidGraph(GraphError::Cycle(vec![
                "a".into(),
                "a".into()
            ])))
            .status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::from(PersistenceError::IoError("disk full".into())).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_response_body() {
        let response = AppError::TemplateNotFound("t1".into()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
