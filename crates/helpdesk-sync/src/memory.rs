use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use futures_util::stream;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use helpdesk_types::api::{AuditEntryRequest, CounterRow};
use helpdesk_types::events::{ChangeKind, ChangeRecord, EntityKind, RemovedRecord};
use helpdesk_types::models::{
    ChatMessage, FileAttachment, Notification, NotificationDraft, UnreadCounter,
};

use crate::error::{Result, SyncError};
use crate::remote::{AuditLog, CounterTable, FeedStream, FeedTransport, MessageStore, NotificationStore};

/// In-process stand-in for the whole remote platform. Mutations publish
/// change records to open feed streams, like the real API does. Cloning
/// shares the same state.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    inner: Arc<Mutex<MemoryState>>,
}

#[derive(Default)]
struct MemoryState {
    counters: HashMap<(Uuid, Uuid), u32>,
    messages: Vec<ChatMessage>,
    notifications: Vec<Notification>,
    audit: Vec<AuditEntryRequest>,
    feeds: Vec<(EntityKind, mpsc::UnboundedSender<Result<ChangeRecord>>)>,
    faults: Faults,
    upserts: usize,
    subscribe_attempts: HashMap<EntityKind, usize>,
}

#[derive(Default)]
struct Faults {
    counter_writes: bool,
    counter_reads: bool,
    message_writes: bool,
    /// Remaining `open` calls to reject
    subscribes: usize,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // -- Fault injection --

    pub fn fail_counter_writes(&self, fail: bool) {
        self.state().faults.counter_writes = fail;
    }

    pub fn fail_counter_reads(&self, fail: bool) {
        self.state().faults.counter_reads = fail;
    }

    pub fn fail_message_writes(&self, fail: bool) {
        self.state().faults.message_writes = fail;
    }

    /// Reject the next `n` subscription attempts, across all entity kinds.
    pub fn fail_next_subscribes(&self, n: usize) {
        self.state().faults.subscribes = n;
    }

    /// End every open feed stream, as a network drop would.
    pub fn drop_feeds(&self) {
        self.state().feeds.clear();
    }

    /// Push a raw change to subscribers without touching stored rows.
    pub fn publish_raw(&self, record: ChangeRecord) {
        publish(&mut self.state(), record);
    }

    // -- Direct access to remote truth --

    pub fn counter(&self, room_id: Uuid, user_id: Uuid) -> Option<u32> {
        self.state().counters.get(&(room_id, user_id)).copied()
    }

    /// Overwrite a counter row behind the sessions' backs, without publishing.
    pub fn set_counter(&self, room_id: Uuid, user_id: Uuid, count: u32) {
        self.state().counters.insert((room_id, user_id), count);
    }

    pub fn upsert_count(&self) -> usize {
        self.state().upserts
    }

    pub fn subscribe_attempts(&self, entity: EntityKind) -> usize {
        self.state()
            .subscribe_attempts
            .get(&entity)
            .copied()
            .unwrap_or(0)
    }

    pub fn open_feeds(&self, entity: EntityKind) -> usize {
        self.state()
            .feeds
            .iter()
            .filter(|(kind, tx)| *kind == entity && !tx.is_closed())
            .count()
    }

    pub fn audit_entries(&self) -> Vec<AuditEntryRequest> {
        self.state().audit.clone()
    }

    pub fn messages(&self, room_id: Uuid) -> Vec<ChatMessage> {
        self.state()
            .messages
            .iter()
            .filter(|m| m.room_id == room_id)
            .cloned()
            .collect()
    }
}

fn publish(state: &mut MemoryState, record: ChangeRecord) {
    state
        .feeds
        .retain(|(kind, tx)| *kind != record.entity || tx.send(Ok(record.clone())).is_ok());
}

fn publish_row<T: Serialize>(state: &mut MemoryState, entity: EntityKind, change: ChangeKind, row: &T) {
    match serde_json::to_value(row) {
        Ok(record) => publish(state, ChangeRecord { entity, change, record }),
        Err(e) => debug!("Memory backend could not encode {} row: {}", entity, e),
    }
}

fn injected(what: &str) -> SyncError {
    SyncError::Transport(format!("injected {} failure", what))
}

#[async_trait]
impl CounterTable for MemoryBackend {
    async fn read_all(&self, user_id: Uuid) -> Result<Vec<CounterRow>> {
        let state = self.state();
        if state.faults.counter_reads {
            return Err(injected("counter read"));
        }
        Ok(state
            .counters
            .iter()
            .filter(|((_, user), _)| *user == user_id)
            .map(|((room, _), count)| CounterRow {
                room_id: *room,
                count: i64::from(*count),
            })
            .collect())
    }

    async fn upsert(&self, room_id: Uuid, user_id: Uuid, count: u32) -> Result<()> {
        let mut state = self.state();
        if state.faults.counter_writes {
            return Err(injected("counter write"));
        }
        state.upserts += 1;
        let created = state.counters.insert((room_id, user_id), count).is_none();

        let row = UnreadCounter {
            room_id,
            user_id,
            unread_count: i64::from(count),
            updated_at: Utc::now(),
        };
        let change = if created { ChangeKind::Created } else { ChangeKind::Updated };
        publish_row(&mut state, EntityKind::Counter, change, &row);
        Ok(())
    }
}

#[async_trait]
impl MessageStore for MemoryBackend {
    async fn list_messages(&self, room_id: Uuid) -> Result<Vec<ChatMessage>> {
        Ok(self.messages(room_id))
    }

    async fn insert_message(
        &self,
        room_id: Uuid,
        sender_id: Uuid,
        content: &str,
        attachments: &[FileAttachment],
    ) -> Result<ChatMessage> {
        let mut state = self.state();
        if state.faults.message_writes {
            return Err(injected("message write"));
        }

        let message = ChatMessage {
            id: Uuid::new_v4(),
            room_id,
            sender_id,
            content: content.to_string(),
            attachments: attachments.to_vec(),
            created_at: Utc::now(),
            is_system: false,
        };
        state.messages.push(message.clone());
        publish_row(&mut state, EntityKind::Message, ChangeKind::Created, &message);
        Ok(message)
    }

    async fn delete_message(&self, message_id: Uuid) -> Result<bool> {
        let mut state = self.state();
        if state.faults.message_writes {
            return Err(injected("message write"));
        }

        let Some(idx) = state.messages.iter().position(|m| m.id == message_id) else {
            return Ok(false);
        };
        let removed = state.messages.remove(idx);
        publish_row(
            &mut state,
            EntityKind::Message,
            ChangeKind::Deleted,
            &RemovedRecord {
                id: removed.id,
                room_id: Some(removed.room_id),
            },
        );
        Ok(true)
    }
}

#[async_trait]
impl NotificationStore for MemoryBackend {
    async fn list_notifications(&self, user_id: Uuid) -> Result<Vec<Notification>> {
        let mut list: Vec<Notification> = self
            .state()
            .notifications
            .iter()
            .filter(|n| n.user_id == user_id)
            .cloned()
            .collect();
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(list)
    }

    async fn create_notification(&self, draft: &NotificationDraft) -> Result<Notification> {
        let notification = Notification {
            id: Uuid::new_v4(),
            kind: draft.kind,
            title: draft.title.clone(),
            message: draft.message.clone(),
            ticket_id: draft.ticket_id,
            user_id: draft.user_id,
            is_read: false,
            created_at: Utc::now(),
        };

        let mut state = self.state();
        state.notifications.push(notification.clone());
        publish_row(&mut state, EntityKind::Notification, ChangeKind::Created, &notification);
        Ok(notification)
    }

    async fn mark_read(&self, notification_id: Uuid) -> Result<bool> {
        let mut state = self.state();
        let Some(notification) = state
            .notifications
            .iter_mut()
            .find(|n| n.id == notification_id)
        else {
            return Ok(false);
        };
        notification.is_read = true;
        let row = notification.clone();
        publish_row(&mut state, EntityKind::Notification, ChangeKind::Updated, &row);
        Ok(true)
    }

    async fn mark_all_read(&self, user_id: Uuid) -> Result<usize> {
        let mut state = self.state();
        let mut flipped = Vec::new();
        for notification in state.notifications.iter_mut() {
            if notification.user_id == user_id && !notification.is_read {
                notification.is_read = true;
                flipped.push(notification.clone());
            }
        }
        for row in &flipped {
            publish_row(&mut state, EntityKind::Notification, ChangeKind::Updated, row);
        }
        Ok(flipped.len())
    }
}

#[async_trait]
impl AuditLog for MemoryBackend {
    async fn record(&self, entry: &AuditEntryRequest) -> Result<()> {
        self.state().audit.push(entry.clone());
        Ok(())
    }
}

#[async_trait]
impl FeedTransport for MemoryBackend {
    async fn open(&self, entity: EntityKind) -> Result<FeedStream> {
        let mut state = self.state();
        *state.subscribe_attempts.entry(entity).or_insert(0) += 1;

        if state.faults.subscribes > 0 {
            state.faults.subscribes -= 1;
            return Err(injected("subscribe"));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        state.feeds.push((entity, tx));

        let changes = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });
        Ok(Box::pin(changes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    #[tokio::test]
    async fn mutations_reach_matching_feeds_only() {
        let backend = MemoryBackend::new();
        let mut messages = backend.open(EntityKind::Message).await.unwrap();
        let mut counters = backend.open(EntityKind::Counter).await.unwrap();

        let room = Uuid::new_v4();
        backend
            .insert_message(room, Uuid::new_v4(), "hello", &[])
            .await
            .unwrap();
        backend.upsert(room, Uuid::new_v4(), 1).await.unwrap();

        let change = messages.next().await.unwrap().unwrap();
        assert_eq!(change.entity, EntityKind::Message);
        let change = counters.next().await.unwrap().unwrap();
        assert_eq!(change.change, ChangeKind::Created);
    }

    #[tokio::test]
    async fn dropped_feeds_end_their_streams() {
        let backend = MemoryBackend::new();
        let mut feed = backend.open(EntityKind::Ticket).await.unwrap();
        backend.drop_feeds();
        assert!(feed.next().await.is_none());
    }

    #[tokio::test]
    async fn injected_faults_fail_calls() {
        let backend = MemoryBackend::new();
        backend.fail_counter_writes(true);
        assert!(backend.upsert(Uuid::new_v4(), Uuid::new_v4(), 2).await.is_err());

        backend.fail_next_subscribes(1);
        assert!(backend.open(EntityKind::Counter).await.is_err());
        assert!(backend.open(EntityKind::Counter).await.is_ok());
        assert_eq!(backend.subscribe_attempts(EntityKind::Counter), 2);
    }
}
