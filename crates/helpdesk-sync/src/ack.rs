//! Read acknowledgement: what opening a room does to its unread count, and
//! whether a new message should count as unread at all.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;
use uuid::Uuid;

use crate::broker::{Broker, SyncSignal};
use crate::counters::UnreadCounterStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckState {
    /// count > 0
    Unacknowledged,
    /// The room is being opened and its count zeroed.
    Acknowledging,
    /// count == 0
    Acknowledged,
}

/// What to do with a message that just arrived for a recipient.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Sender's own message; never counted.
    Skip,
    Increment,
    /// Recipient is looking at the room right now.
    Acknowledge,
}

pub struct ReadTracker {
    counters: Arc<UnreadCounterStore>,
    broker: Broker,
    suppress_open_room: bool,
    /// user -> room currently on screen
    open: Mutex<HashMap<Uuid, Uuid>>,
    acknowledging: Mutex<HashSet<(Uuid, Uuid)>>,
}

impl ReadTracker {
    pub fn new(counters: Arc<UnreadCounterStore>, broker: Broker, suppress_open_room: bool) -> Self {
        Self {
            counters,
            broker,
            suppress_open_room,
            open: Mutex::new(HashMap::new()),
            acknowledging: Mutex::new(HashSet::new()),
        }
    }

    fn open_rooms(&self) -> MutexGuard<'_, HashMap<Uuid, Uuid>> {
        self.open.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn in_flight(&self) -> MutexGuard<'_, HashSet<(Uuid, Uuid)>> {
        self.acknowledging
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn state(&self, room_id: Uuid, user_id: Uuid) -> AckState {
        if self.in_flight().contains(&(room_id, user_id)) {
            return AckState::Acknowledging;
        }
        match self.counters.get(room_id, user_id) {
            0 => AckState::Acknowledged,
            _ => AckState::Unacknowledged,
        }
    }

    /// Mark `room_id` as on screen for `user_id`. With at least one loaded
    /// message the room is acknowledged; empty rooms skip the zero write.
    /// Returns whether a zero was issued.
    pub fn open_room(&self, room_id: Uuid, user_id: Uuid, loaded_messages: usize) -> bool {
        self.open_rooms().insert(user_id, room_id);

        if loaded_messages == 0 {
            debug!("Room {} is empty, nothing to acknowledge for {}", room_id, user_id);
            return false;
        }

        self.acknowledge(room_id, user_id);
        true
    }

    /// Only closes `room_id` if it is still the open one.
    pub fn close_room(&self, room_id: Uuid, user_id: Uuid) {
        let mut open = self.open_rooms();
        if open.get(&user_id) == Some(&room_id) {
            open.remove(&user_id);
        }
    }

    pub fn open_room_of(&self, user_id: Uuid) -> Option<Uuid> {
        self.open_rooms().get(&user_id).copied()
    }

    pub fn delivery(&self, room_id: Uuid, sender_id: Uuid, recipient: Uuid) -> Delivery {
        if recipient == sender_id {
            Delivery::Skip
        } else if self.suppress_open_room && self.open_room_of(recipient) == Some(room_id) {
            Delivery::Acknowledge
        } else {
            Delivery::Increment
        }
    }

    /// Apply a delivery decision. Returns the recipient's count afterwards.
    pub fn deliver(&self, room_id: Uuid, sender_id: Uuid, recipient: Uuid) -> u32 {
        match self.delivery(room_id, sender_id, recipient) {
            Delivery::Skip => self.counters.get(room_id, recipient),
            Delivery::Increment => self.counters.increment(room_id, recipient),
            Delivery::Acknowledge => {
                self.acknowledge(room_id, recipient);
                0
            }
        }
    }

    /// Zero one room. Unacknowledged -> Acknowledging -> Acknowledged.
    pub fn acknowledge(&self, room_id: Uuid, user_id: Uuid) {
        self.in_flight().insert((room_id, user_id));
        self.counters.zero(room_id, user_id);
        self.in_flight().remove(&(room_id, user_id));

        self.broker.publish(SyncSignal::MessageRead { room_id, user_id });
    }

    /// Zero every known room for `user_id`, then reconcile with the remote.
    pub async fn mark_all_read(&self, user_id: Uuid) -> crate::error::Result<()> {
        let rooms = self.counters.room_ids();
        for room_id in &rooms {
            self.acknowledge(*room_id, user_id);
        }
        debug!("Acknowledged {} rooms for {}", rooms.len(), user_id);

        self.counters.load_all(user_id).await?;
        Ok(())
    }
}
