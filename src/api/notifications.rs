//! Notification API handlers

use crate::error::AppError;
use crate::state::{AppContext, Notification};
use axum::{
    extract::{Path, State},
    response::Json,
};
use serde::Serialize;

/// Notifications list response
#[derive(Serialize)]
pub struct NotificationsListResponse {
    /// Notifications, in emission order
    pub notifications: Vec<Notification>,
    /// Number of unread notifications
    pub unread: usize,
}

/// Mark-all response
#[derive(Serialize)]
pub struct MarkAllReadResponse {
    /// Notifications that changed from unread to read
    pub updated: usize,
}

/// GET /api/notifications - List notifications
pub async fn list_notifications(State(ctx): State<AppContext>) -> Json<NotificationsListResponse> {
    let notifications = ctx.notifications();
    let unread = notifications.iter().filter(|n| !n.read).count();
    Json(NotificationsListResponse {
        notifications,
        unread,
    })
}

/// POST /api/notifications/:id/read - Mark one notification read
pub async fn mark_read(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<Json<Notification>, AppError> {
    Ok(Json(ctx.mark_notification_read(&id)?))
}

/// POST /api/notifications/read-all - Mark every notification read
pub async fn mark_all_read(
    State(ctx): State<AppContext>,
) -> Result<Json<MarkAllReadResponse>, AppError> {
    let updated = ctx.mark_all_notifications_read()?;
    Ok(Json(MarkAllReadResponse { updated }))
}
