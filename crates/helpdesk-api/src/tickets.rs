use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use helpdesk_types::api::{CreateTicketRequest, DeleteResponse, UpdateTicketRequest};
use helpdesk_types::events::{ChangeKind, EntityKind, RemovedRecord};
use helpdesk_types::models::{Ticket, TicketStatus};

use crate::state::{AppState, run_db};

pub async fn list_tickets(State(state): State<AppState>) -> Result<impl IntoResponse, StatusCode> {
    let tickets = run_db(&state, |db| db.list_tickets()).await?;
    Ok(Json(tickets))
}

pub async fn create_ticket(
    State(state): State<AppState>,
    Json(req): Json<CreateTicketRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    if req.title.trim().is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let now = Utc::now();
    let ticket = Ticket {
        id: Uuid::new_v4(),
        title: req.title,
        description: req.description,
        status: TicketStatus::Open,
        priority: req.priority,
        category: req.category,
        created_by: req.created_by,
        assigned_to: None,
        created_at: now,
        updated_at: now,
    };

    let stored = ticket.clone();
    run_db(&state, move |db| db.insert_ticket(&stored)).await?;

    info!("Ticket {} opened by {}", ticket.id, ticket.created_by);
    state.publish(EntityKind::Ticket, ChangeKind::Created, &ticket);

    Ok((StatusCode::CREATED, Json(ticket)))
}

pub async fn update_ticket(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateTicketRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let ticket = run_db(&state, move |db| db.update_ticket(id, req.status, req.assigned_to))
        .await?
        .ok_or(StatusCode::NOT_FOUND)?;

    state.publish(EntityKind::Ticket, ChangeKind::Updated, &ticket);
    Ok(Json(ticket))
}

pub async fn delete_ticket(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, StatusCode> {
    let deleted = run_db(&state, move |db| db.delete_ticket(id)).await?;

    if deleted {
        info!("Ticket {} deleted", id);
        state.publish(
            EntityKind::Ticket,
            ChangeKind::Deleted,
            &RemovedRecord { id, room_id: None },
        );
    }

    Ok(Json(DeleteResponse { deleted }))
}
