use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;

use helpdesk_types::events::{EntityKind, FeedCommand, FeedEvent};

use crate::error::{Result, SyncError};
use crate::remote::{FeedStream, FeedTransport};

/// The server closes sockets that stay silent this long, so waiting longer is pointless.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// WebSocket client for the `/realtime` change feed. One socket per subscription.
#[derive(Debug, Clone)]
pub struct WsFeed {
    url: String,
}

impl WsFeed {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
        }
    }
}

#[async_trait]
impl FeedTransport for WsFeed {
    async fn open(&self, entity: EntityKind) -> Result<FeedStream> {
        let (mut socket, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| SyncError::Transport(e.to_string()))?;

        let subscribe = serde_json::to_string(&FeedCommand::Subscribe { entity })?;
        socket
            .send(Message::Text(subscribe.into()))
            .await
            .map_err(|e| SyncError::Transport(e.to_string()))?;

        let handshake = tokio::time::timeout(HANDSHAKE_TIMEOUT, async {
            while let Some(frame) = socket.next().await {
                match frame.map_err(|e| SyncError::Transport(e.to_string()))? {
                    Message::Text(text) => {
                        if let FeedEvent::Subscribed { entity: acked } =
                            serde_json::from_str::<FeedEvent>(&text)?
                        {
                            if acked == entity {
                                return Ok(());
                            }
                        }
                    }
                    Message::Close(_) => return Err(SyncError::FeedClosed),
                    _ => {}
                }
            }
            Err(SyncError::FeedClosed)
        });

        match handshake.await {
            Ok(result) => result?,
            Err(_) => {
                return Err(SyncError::Transport(format!(
                    "no subscription ack for {} within {:?}",
                    entity, HANDSHAKE_TIMEOUT
                )));
            }
        }

        debug!("Feed socket subscribed to {}", entity);

        let changes = socket.filter_map(|frame| async move {
            match frame {
                Ok(Message::Text(text)) => match serde_json::from_str::<FeedEvent>(&text) {
                    Ok(FeedEvent::Change(record)) => Some(Ok(record)),
                    Ok(FeedEvent::Subscribed { .. }) => None,
                    Err(e) => Some(Err(SyncError::Decode(e))),
                },
                Ok(Message::Close(_)) => Some(Err(SyncError::FeedClosed)),
                Ok(_) => None,
                Err(e) => Some(Err(SyncError::Transport(e.to_string()))),
            }
        });

        Ok(Box::pin(changes))
    }
}
