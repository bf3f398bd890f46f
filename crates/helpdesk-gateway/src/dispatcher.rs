use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, broadcast};

use helpdesk_types::events::{ChangeRecord, EntityKind};

/// Fans row changes out to every feed connection.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    /// Every connection receives every change and filters by its own entity kind
    broadcast_tx: broadcast::Sender<ChangeRecord>,

    /// Live subscriptions per entity kind
    subscribers: RwLock<HashMap<EntityKind, usize>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(DispatcherInner {
                broadcast_tx,
                subscribers: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Subscribe to row changes. Returns a broadcast receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeRecord> {
        self.inner.broadcast_tx.subscribe()
    }

    /// Publish a change. Dropped silently when nobody is listening.
    pub fn publish(&self, record: ChangeRecord) {
        let _ = self.inner.broadcast_tx.send(record);
    }

    pub async fn register(&self, entity: EntityKind) -> usize {
        let mut subs = self.inner.subscribers.write().await;
        let count = subs.entry(entity).or_insert(0);
        *count += 1;
        *count
    }

    pub async fn unregister(&self, entity: EntityKind) {
        let mut subs = self.inner.subscribers.write().await;
        if let Some(count) = subs.get_mut(&entity) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                subs.remove(&entity);
            }
        }
    }

    pub async fn subscriber_count(&self, entity: EntityKind) -> usize {
        self.inner
            .subscribers
            .read()
            .await
            .get(&entity)
            .copied()
            .unwrap_or(0)
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}
