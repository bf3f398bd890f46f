//! In-memory unread counts per (room, user), backed by the remote counter
//! table. Local state answers every query; remote writes trail behind it
//! on an ordered write-behind queue and failures are only logged. The next
//! [`UnreadCounterStore::load_all`] replaces local state with remote truth.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};
use uuid::Uuid;

use helpdesk_types::models::{ChatMessage, ChatRoom};

use crate::broker::{Broker, SyncSignal};
use crate::error::Result;
use crate::remote::CounterTable;

enum Write {
    Upsert { room_id: Uuid, user_id: Uuid, count: u32 },
    Flush(oneshot::Sender<()>),
}

pub struct UnreadCounterStore {
    rooms: Mutex<HashMap<Uuid, ChatRoom>>,
    remote: Arc<dyn CounterTable>,
    writes: mpsc::UnboundedSender<Write>,
    broker: Broker,
}

impl UnreadCounterStore {
    /// Must be called inside a tokio runtime; the writer task lives until
    /// the store is dropped.
    pub fn new(remote: Arc<dyn CounterTable>, broker: Broker) -> Self {
        let (writes, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_writer(remote.clone(), rx));

        Self {
            rooms: Mutex::new(HashMap::new()),
            remote,
            writes,
            broker,
        }
    }

    fn rooms(&self) -> MutexGuard<'_, HashMap<Uuid, ChatRoom>> {
        self.rooms.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Replace every count of `user_id` with the remote table's values.
    /// Rooms without a remote row drop back to 0. Pending local writes are
    /// flushed first so they are not read back stale.
    pub async fn load_all(&self, user_id: Uuid) -> Result<HashMap<Uuid, u32>> {
        self.flush().await;
        let rows = self.remote.read_all(user_id).await?;

        let loaded: HashMap<Uuid, u32> = rows
            .into_iter()
            .map(|row| {
                let count = u32::try_from(row.count.max(0)).unwrap_or(u32::MAX);
                (row.room_id, count)
            })
            .collect();

        {
            let mut rooms = self.rooms();
            for room in rooms.values_mut() {
                room.unread.remove(&user_id);
            }
            for (room_id, count) in &loaded {
                let room = rooms
                    .entry(*room_id)
                    .or_insert_with(|| ChatRoom::new(*room_id));
                room.add_participant(user_id);
                room.unread.insert(user_id, *count);
            }
        }

        debug!("Loaded {} unread counters for {}", loaded.len(), user_id);
        self.announce(user_id);
        Ok(loaded)
    }

    /// 0 for rooms never seen.
    pub fn get(&self, room_id: Uuid, user_id: Uuid) -> u32 {
        self.rooms()
            .get(&room_id)
            .map(|room| room.unread_for(user_id))
            .unwrap_or(0)
    }

    /// Callers must not pass the message's own sender.
    pub fn increment(&self, room_id: Uuid, user_id: Uuid) -> u32 {
        let count = {
            let mut rooms = self.rooms();
            let room = rooms.entry(room_id).or_insert_with(|| ChatRoom::new(room_id));
            room.add_participant(user_id);
            let count = room.unread.entry(user_id).or_insert(0);
            *count = count.saturating_add(1);
            *count
        };

        self.persist(room_id, user_id, count);
        self.announce(user_id);
        count
    }

    pub fn zero(&self, room_id: Uuid, user_id: Uuid) {
        {
            let mut rooms = self.rooms();
            let room = rooms.entry(room_id).or_insert_with(|| ChatRoom::new(room_id));
            room.add_participant(user_id);
            room.unread.insert(user_id, 0);
        }

        self.persist(room_id, user_id, 0);
        self.announce(user_id);
    }

    pub fn total_unread(&self, user_id: Uuid) -> u32 {
        self.rooms()
            .values()
            .map(|room| room.unread_for(user_id))
            .fold(0u32, u32::saturating_add)
    }

    /// Every room id known locally, in no particular order.
    pub fn room_ids(&self) -> Vec<Uuid> {
        self.rooms().keys().copied().collect()
    }

    pub fn room(&self, room_id: Uuid) -> Option<ChatRoom> {
        self.rooms().get(&room_id).cloned()
    }

    pub fn add_participant(&self, room_id: Uuid, user_id: Uuid) {
        self.rooms()
            .entry(room_id)
            .or_insert_with(|| ChatRoom::new(room_id))
            .add_participant(user_id);
    }

    pub fn set_last_message(&self, message: &ChatMessage) {
        let mut rooms = self.rooms();
        let room = rooms
            .entry(message.room_id)
            .or_insert_with(|| ChatRoom::new(message.room_id));
        room.add_participant(message.sender_id);
        room.last_message = Some(message.clone());
    }

    /// Forget the last message if it was `message_id`. Returns whether it was.
    pub fn clear_last_message(&self, room_id: Uuid, message_id: Uuid) -> bool {
        let mut rooms = self.rooms();
        match rooms.get_mut(&room_id) {
            Some(room) if room.last_message.as_ref().is_some_and(|m| m.id == message_id) => {
                room.last_message = None;
                true
            }
            _ => false,
        }
    }

    /// Wait until every write queued so far has reached the remote (or failed).
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        if self.writes.send(Write::Flush(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    pub fn clear(&self) {
        self.rooms().clear();
    }

    fn persist(&self, room_id: Uuid, user_id: Uuid, count: u32) {
        if self
            .writes
            .send(Write::Upsert {
                room_id,
                user_id,
                count,
            })
            .is_err()
        {
            warn!("Counter writer is gone; ({}, {}) stays local until reload", room_id, user_id);
        }
    }

    fn announce(&self, user_id: Uuid) {
        let total = self.total_unread(user_id);
        self.broker.publish(SyncSignal::CountsChanged { user_id, total });
    }
}

async fn run_writer(remote: Arc<dyn CounterTable>, mut rx: mpsc::UnboundedReceiver<Write>) {
    while let Some(write) = rx.recv().await {
        match write {
            Write::Upsert {
                room_id,
                user_id,
                count,
            } => {
                if let Err(e) = remote.upsert(room_id, user_id, count).await {
                    warn!(
                        "Failed to persist unread count {} for ({}, {}): {}",
                        count, room_id, user_id, e
                    );
                }
            }
            Write::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
}
