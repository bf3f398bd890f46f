use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde_json::json;

use helpdesk_types::api::AuditEntryRequest;

use crate::state::{AppState, run_db};

/// Append-only; audit rows are never published on the feed.
pub async fn record_entry(
    State(state): State<AppState>,
    Json(entry): Json<AuditEntryRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let id = run_db(&state, move |db| db.insert_audit(&entry)).await?;
    Ok((StatusCode::CREATED, Json(json!({ "id": id }))))
}
