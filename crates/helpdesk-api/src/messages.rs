use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;

use helpdesk_types::api::{DeleteResponse, SendMessageRequest};
use helpdesk_types::events::{ChangeKind, EntityKind, RemovedRecord};
use helpdesk_types::models::ChatMessage;

use crate::state::{AppState, run_db};

/// Messages of one room, oldest first.
pub async fn get_messages(
    State(state): State<AppState>,
    Path(room_id): Path<Uuid>,
) -> Result<impl IntoResponse, StatusCode> {
    let messages = run_db(&state, move |db| db.list_messages(room_id)).await?;
    Ok(Json(messages))
}

pub async fn send_message(
    State(state): State<AppState>,
    Path(room_id): Path<Uuid>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    if ChatMessage::is_blank(&req.content, &req.attachments) {
        return Err(StatusCode::BAD_REQUEST);
    }

    let message = ChatMessage {
        id: Uuid::new_v4(),
        room_id,
        sender_id: req.sender_id,
        content: req.content,
        attachments: req.attachments,
        created_at: Utc::now(),
        is_system: false,
    };

    let stored = message.clone();
    run_db(&state, move |db| db.insert_message(&stored)).await?;

    debug!("{} posted {} in room {}", message.sender_id, message.id, room_id);
    state.publish(EntityKind::Message, ChangeKind::Created, &message);

    Ok((StatusCode::CREATED, Json(message)))
}

/// Unread counters are left alone; they only ever move through upserts.
pub async fn delete_message(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
) -> Result<impl IntoResponse, StatusCode> {
    let removed = run_db(&state, move |db| db.delete_message(message_id)).await?;

    if let Some(message) = &removed {
        info!("Message {} deleted from room {}", message.id, message.room_id);
        state.publish(
            EntityKind::Message,
            ChangeKind::Deleted,
            &RemovedRecord {
                id: message.id,
                room_id: Some(message.room_id),
            },
        );
    }

    Ok(Json(DeleteResponse {
        deleted: removed.is_some(),
    }))
}
