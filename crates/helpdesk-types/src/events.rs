use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{ChatMessage, Notification, Ticket, UnreadCounter};

/// Entity kinds watched on the change feed. Each one is a separate subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Message,
    Ticket,
    Notification,
    Counter,
}

impl EntityKind {
    pub const ALL: [EntityKind; 4] = [
        EntityKind::Message,
        EntityKind::Ticket,
        EntityKind::Notification,
        EntityKind::Counter,
    ];

    /// Backing table name in the relational store.
    pub fn table(self) -> &'static str {
        match self {
            Self::Message => "chat_messages",
            Self::Ticket => "tickets",
            Self::Notification => "notifications",
            Self::Counter => "chat_room_unread",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Created,
    Updated,
    Deleted,
}

/// Raw change notification as it travels on the feed. `record` is the
/// changed row; deletions carry at least its `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub entity: EntityKind,
    pub change: ChangeKind,
    pub record: serde_json::Value,
}

/// Frames sent from the feed server to a subscriber.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum FeedEvent {
    /// Subscription accepted; changes for `entity` follow.
    Subscribed { entity: EntityKind },

    /// A row of the subscribed entity kind changed
    Change(ChangeRecord),
}

/// Frames sent from a subscriber to the feed server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum FeedCommand {
    /// Must be the first frame on a new socket.
    Subscribe { entity: EntityKind },
}

/// What is left of a deleted row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemovedRecord {
    pub id: Uuid,
    /// Owning room, when the deleted row had one (messages, counters).
    #[serde(default, alias = "ticket_id")]
    pub room_id: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EntityRecord {
    Message(ChatMessage),
    Ticket(Ticket),
    Notification(Notification),
    Counter(UnreadCounter),
    Removed(RemovedRecord),
}

/// Typed form of a [`ChangeRecord`].
#[derive(Debug, Clone, PartialEq)]
pub struct RealtimeEvent {
    pub kind: EntityKind,
    pub change: ChangeKind,
    pub record: EntityRecord,
}

impl RealtimeEvent {
    /// Normalize a raw change. Fails when the record lacks the fields its
    /// entity kind requires.
    pub fn from_change(raw: ChangeRecord) -> Result<Self, serde_json::Error> {
        let ChangeRecord {
            entity,
            change,
            record,
        } = raw;

        let record = match (entity, change) {
            (_, ChangeKind::Deleted) => EntityRecord::Removed(serde_json::from_value(record)?),
            (EntityKind::Message, _) => EntityRecord::Message(serde_json::from_value(record)?),
            (EntityKind::Ticket, _) => EntityRecord::Ticket(serde_json::from_value(record)?),
            (EntityKind::Notification, _) => {
                EntityRecord::Notification(serde_json::from_value(record)?)
            }
            (EntityKind::Counter, _) => EntityRecord::Counter(serde_json::from_value(record)?),
        };

        Ok(Self {
            kind: entity,
            change,
            record,
        })
    }

    /// Room this event is scoped to, if any.
    pub fn room_id(&self) -> Option<Uuid> {
        match &self.record {
            EntityRecord::Message(m) => Some(m.room_id),
            EntityRecord::Counter(c) => Some(c.room_id),
            EntityRecord::Removed(r) => r.room_id,
            EntityRecord::Ticket(_) | EntityRecord::Notification(_) => None,
        }
    }
}
