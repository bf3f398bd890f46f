use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use helpdesk_types::api::{CounterRow, UpsertCounterRequest};
use helpdesk_types::events::{ChangeKind, EntityKind};

use crate::state::{AppState, run_db};

pub async fn read_counters(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<impl IntoResponse, StatusCode> {
    let counters = run_db(&state, move |db| db.read_counters(user_id)).await?;

    let rows: Vec<CounterRow> = counters
        .into_iter()
        .map(|c| CounterRow {
            room_id: c.room_id,
            count: c.unread_count,
        })
        .collect();

    Ok(Json(rows))
}

pub async fn upsert_counter(
    State(state): State<AppState>,
    Path((room_id, user_id)): Path<(Uuid, Uuid)>,
    Json(req): Json<UpsertCounterRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    if req.count < 0 {
        return Err(StatusCode::BAD_REQUEST);
    }

    let (counter, created) =
        run_db(&state, move |db| db.upsert_counter(room_id, user_id, req.count)).await?;

    let change = if created {
        ChangeKind::Created
    } else {
        ChangeKind::Updated
    };
    state.publish(EntityKind::Counter, change, &counter);

    Ok(Json(counter))
}
