use std::sync::Arc;

use axum::http::StatusCode;
use serde::Serialize;
use tracing::{error, warn};

use helpdesk_db::Database;
use helpdesk_gateway::dispatcher::Dispatcher;
use helpdesk_types::events::{ChangeKind, ChangeRecord, EntityKind};

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Database,
    pub dispatcher: Dispatcher,
}

impl AppStateInner {
    pub fn new(db: Database, dispatcher: Dispatcher) -> AppState {
        Arc::new(Self { db, dispatcher })
    }

    /// Announce a row change on the realtime feed.
    pub fn publish<T: Serialize>(&self, entity: EntityKind, change: ChangeKind, row: &T) {
        match serde_json::to_value(row) {
            Ok(record) => self.dispatcher.publish(ChangeRecord {
                entity,
                change,
                record,
            }),
            Err(e) => warn!("Failed to encode {} change for the feed: {}", entity, e),
        }
    }
}

/// Run a blocking DB call off the async runtime.
pub(crate) async fn run_db<T, F>(state: &AppState, f: F) -> Result<T, StatusCode>
where
    F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let state = state.clone();
    tokio::task::spawn_blocking(move || f(&state.db))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map_err(|e| {
            error!("Database error: {:#}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })
}
