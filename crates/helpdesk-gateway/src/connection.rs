use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, info, warn};
use tokio::sync::broadcast;

use helpdesk_types::events::{ChangeRecord, EntityKind, FeedCommand, FeedEvent};

use crate::dispatcher::Dispatcher;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// How long a new socket has to send its Subscribe frame.
const SUBSCRIBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Handle a single feed connection: one Subscribe handshake, then every
/// change for that entity kind until either side goes away.
pub async fn handle_connection(socket: WebSocket, dispatcher: Dispatcher) {
    let (mut sender, mut receiver) = socket.split();

    let entity = match wait_for_subscribe(&mut receiver).await {
        Some(entity) => entity,
        None => {
            warn!("Feed client failed to subscribe, closing");
            return;
        }
    };

    // Subscribe before acknowledging so no change published after the ack is missed
    let broadcast_rx = dispatcher.subscribe();

    if send_event(&mut sender, &FeedEvent::Subscribed { entity })
        .await
        .is_err()
    {
        return;
    }

    let active = dispatcher.register(entity).await;
    info!("Feed subscriber joined {} ({} active)", entity, active);

    run_connection_loop(sender, receiver, broadcast_rx, entity).await;

    dispatcher.unregister(entity).await;
    info!("Feed subscriber left {}", entity);
}

async fn run_connection_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    mut broadcast_rx: broadcast::Receiver<ChangeRecord>,
    entity: EntityKind,
) {
    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward matching changes -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                result = broadcast_rx.recv() => {
                    let record = match result {
                        Ok(record) => record,
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!("Feed receiver for {} lagged by {} changes", entity, n);
                            continue;
                        }
                        Err(_) => break,
                    };

                    if record.entity != entity {
                        continue;
                    }

                    if send_event(&mut sender, &FeedEvent::Change(record)).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // The client only speaks once; anything after the handshake is noise
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => {
                    match serde_json::from_str::<FeedCommand>(&text) {
                        Ok(FeedCommand::Subscribe { entity: again }) => {
                            debug!("Ignoring repeated subscribe to {} on {} feed", again, entity);
                        }
                        Err(e) => {
                            warn!(
                                "Bad feed command on {}: {} -- raw: {}",
                                entity,
                                e,
                                truncate(&text, 200)
                            );
                        }
                    }
                }
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }
}

async fn wait_for_subscribe(receiver: &mut SplitStream<WebSocket>) -> Option<EntityKind> {
    let timeout = tokio::time::timeout(SUBSCRIBE_TIMEOUT, async {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Text(text) = msg {
                match serde_json::from_str::<FeedCommand>(&text) {
                    Ok(FeedCommand::Subscribe { entity }) => return Some(entity),
                    Err(e) => warn!("Bad subscribe frame: {} -- raw: {}", e, truncate(&text, 200)),
                }
            }
        }
        None
    });

    timeout.await.ok().flatten()
}

async fn send_event(
    sender: &mut SplitSink<WebSocket, Message>,
    event: &FeedEvent,
) -> Result<(), ()> {
    let text = match serde_json::to_string(event) {
        Ok(text) => text,
        Err(e) => {
            warn!("Failed to encode feed event: {}", e);
            return Ok(());
        }
    };
    sender.send(Message::Text(text.into())).await.map_err(|_| ())
}

/// Cut at a char boundary so multi-byte text never panics.
fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
