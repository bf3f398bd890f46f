//! Collaborators the sync core talks to. Production uses [`HttpBackend`] and
//! [`WsFeed`]; tests and offline runs use [`MemoryBackend`].
//!
//! [`HttpBackend`]: crate::http::HttpBackend
//! [`WsFeed`]: crate::feed::WsFeed
//! [`MemoryBackend`]: crate::memory::MemoryBackend

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::Stream;
use uuid::Uuid;

use helpdesk_types::api::{AuditEntryRequest, CounterRow};
use helpdesk_types::events::{ChangeRecord, EntityKind};
use helpdesk_types::models::{ChatMessage, FileAttachment, Notification, NotificationDraft};

use crate::config::SyncConfig;
use crate::error::Result;
use crate::feed::WsFeed;
use crate::http::HttpBackend;
use crate::memory::MemoryBackend;

/// Durable per-(room, user) unread counters.
#[async_trait]
pub trait CounterTable: Send + Sync {
    async fn read_all(&self, user_id: Uuid) -> Result<Vec<CounterRow>>;
    async fn upsert(&self, room_id: Uuid, user_id: Uuid, count: u32) -> Result<()>;
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Oldest first.
    async fn list_messages(&self, room_id: Uuid) -> Result<Vec<ChatMessage>>;

    async fn insert_message(
        &self,
        room_id: Uuid,
        sender_id: Uuid,
        content: &str,
        attachments: &[FileAttachment],
    ) -> Result<ChatMessage>;

    /// `false` when the message did not exist.
    async fn delete_message(&self, message_id: Uuid) -> Result<bool>;
}

#[async_trait]
pub trait NotificationStore: Send + Sync {
    /// Newest first.
    async fn list_notifications(&self, user_id: Uuid) -> Result<Vec<Notification>>;
    async fn create_notification(&self, draft: &NotificationDraft) -> Result<Notification>;
    async fn mark_read(&self, notification_id: Uuid) -> Result<bool>;
    async fn mark_all_read(&self, user_id: Uuid) -> Result<usize>;
}

#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn record(&self, entry: &AuditEntryRequest) -> Result<()>;
}

/// Changes of one entity kind. The stream ending, or yielding a non-data
/// error, means the subscription is gone. Dropping it unsubscribes.
pub type FeedStream = Pin<Box<dyn Stream<Item = Result<ChangeRecord>> + Send>>;

#[async_trait]
pub trait FeedTransport: Send + Sync {
    /// Resolves once the remote has acknowledged the subscription.
    async fn open(&self, entity: EntityKind) -> Result<FeedStream>;
}

/// Everything a session needs from the outside world.
#[derive(Clone)]
pub struct Remote {
    pub counters: Arc<dyn CounterTable>,
    pub messages: Arc<dyn MessageStore>,
    pub notifications: Arc<dyn NotificationStore>,
    pub audit: Arc<dyn AuditLog>,
    pub feed: Arc<dyn FeedTransport>,
}

impl Remote {
    pub fn http(config: &SyncConfig) -> Result<Self> {
        let backend = Arc::new(HttpBackend::new(&config.api_url)?);
        Ok(Self {
            counters: backend.clone(),
            messages: backend.clone(),
            notifications: backend.clone(),
            audit: backend,
            feed: Arc::new(WsFeed::new(&config.feed_url)),
        })
    }

    pub fn memory(backend: &MemoryBackend) -> Self {
        let backend = Arc::new(backend.clone());
        Self {
            counters: backend.clone(),
            messages: backend.clone(),
            notifications: backend.clone(),
            audit: backend.clone(),
            feed: backend,
        }
    }
}
