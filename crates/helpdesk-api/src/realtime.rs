use axum::{
    extract::{State, WebSocketUpgrade},
    response::IntoResponse,
};

use helpdesk_gateway::connection;

use crate::state::AppState;

pub async fn ws_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    let dispatcher = state.dispatcher.clone();
    ws.on_upgrade(move |socket| connection::handle_connection(socket, dispatcher))
}
