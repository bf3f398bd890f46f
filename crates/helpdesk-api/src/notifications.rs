use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use helpdesk_types::api::MarkAllReadResponse;
use helpdesk_types::events::{ChangeKind, EntityKind};
use helpdesk_types::models::{Notification, NotificationDraft};

use crate::state::{AppState, run_db};

/// Newest first.
pub async fn list_notifications(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<impl IntoResponse, StatusCode> {
    let notifications = run_db(&state, move |db| db.list_notifications(user_id)).await?;
    Ok(Json(notifications))
}

pub async fn create_notification(
    State(state): State<AppState>,
    Json(draft): Json<NotificationDraft>,
) -> Result<impl IntoResponse, StatusCode> {
    let notification = Notification {
        id: Uuid::new_v4(),
        kind: draft.kind,
        title: draft.title,
        message: draft.message,
        ticket_id: draft.ticket_id,
        user_id: draft.user_id,
        is_read: false,
        created_at: Utc::now(),
    };

    let stored = notification.clone();
    run_db(&state, move |db| db.insert_notification(&stored)).await?;

    debug!("Notification {} for {}", notification.id, notification.user_id);
    state.publish(EntityKind::Notification, ChangeKind::Created, &notification);

    Ok((StatusCode::CREATED, Json(notification)))
}

pub async fn mark_read(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, StatusCode> {
    let notification = run_db(&state, move |db| db.mark_notification_read(id))
        .await?
        .ok_or(StatusCode::NOT_FOUND)?;

    state.publish(EntityKind::Notification, ChangeKind::Updated, &notification);
    Ok(Json(notification))
}

pub async fn mark_all_read(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<impl IntoResponse, StatusCode> {
    let flipped = run_db(&state, move |db| db.mark_all_notifications_read(user_id)).await?;

    for notification in &flipped {
        state.publish(EntityKind::Notification, ChangeKind::Updated, notification);
    }

    Ok(Json(MarkAllReadResponse {
        updated: flipped.len(),
    }))
}
