pub mod audit;
pub mod counters;
pub mod messages;
pub mod notifications;
pub mod realtime;
pub mod state;
pub mod tickets;

use axum::{
    Router,
    routing::{delete, get, patch, post, put},
};

pub use state::{AppState, AppStateInner};

/// Every REST route plus the `/realtime` change feed.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/rooms/{room_id}/messages",
            get(messages::get_messages).post(messages::send_message),
        )
        .route("/messages/{message_id}", delete(messages::delete_message))
        .route("/users/{user_id}/unread", get(counters::read_counters))
        .route("/rooms/{room_id}/unread/{user_id}", put(counters::upsert_counter))
        .route(
            "/users/{user_id}/notifications",
            get(notifications::list_notifications),
        )
        .route("/notifications", post(notifications::create_notification))
        .route("/notifications/{id}/read", post(notifications::mark_read))
        .route(
            "/users/{user_id}/notifications/read",
            post(notifications::mark_all_read),
        )
        .route("/tickets", get(tickets::list_tickets).post(tickets::create_ticket))
        .route(
            "/tickets/{id}",
            patch(tickets::update_ticket).delete(tickets::delete_ticket),
        )
        .route("/audit", post(audit::record_entry))
        .route("/realtime", get(realtime::ws_upgrade))
        .with_state(state)
}
