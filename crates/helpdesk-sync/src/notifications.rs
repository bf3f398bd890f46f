use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, info, warn};
use uuid::Uuid;

use helpdesk_types::models::{Notification, NotificationDraft};

use crate::broker::{Broker, SyncSignal};
use crate::error::Result;
use crate::remote::NotificationStore;
use crate::rules;

/// The session user's notifications, newest first.
pub struct NotificationCenter {
    user_id: Uuid,
    remote: Arc<dyn NotificationStore>,
    broker: Broker,
    items: Mutex<Vec<Notification>>,
}

impl NotificationCenter {
    pub fn new(user_id: Uuid, remote: Arc<dyn NotificationStore>, broker: Broker) -> Self {
        Self {
            user_id,
            remote,
            broker,
            items: Mutex::new(Vec::new()),
        }
    }

    fn items(&self) -> MutexGuard<'_, Vec<Notification>> {
        self.items.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub async fn load(&self) -> Result<usize> {
        let mut loaded = self.remote.list_notifications(self.user_id).await?;
        loaded.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let count = loaded.len();
        *self.items() = loaded;
        debug!("Loaded {} notifications for {}", count, self.user_id);
        Ok(count)
    }

    /// Take in a notification that appeared remotely. Ignores other users'
    /// rows and ones already held. Returns whether it was new.
    pub fn ingest(&self, notification: Notification) -> bool {
        if notification.user_id != self.user_id {
            return false;
        }

        {
            let mut items = self.items();
            if items.iter().any(|n| n.id == notification.id) {
                return false;
            }
            let at = items
                .iter()
                .position(|n| n.created_at <= notification.created_at)
                .unwrap_or(items.len());
            items.insert(at, notification.clone());
        }

        self.broker
            .publish(SyncSignal::NotificationReceived { notification });
        true
    }

    /// A row changed remotely, e.g. read on another device.
    pub fn apply_update(&self, notification: Notification) {
        let became_read = {
            let mut items = self.items();
            let Some(existing) = items.iter_mut().find(|n| n.id == notification.id) else {
                return;
            };
            let became_read = !existing.is_read && notification.is_read;
            *existing = notification.clone();
            became_read
        };

        if became_read {
            self.broker.publish(SyncSignal::NotificationRead {
                notification_id: Some(notification.id),
            });
        }
    }

    /// Persist a draft and add it locally. Deleted-ticket notices are
    /// dropped without a remote call.
    pub async fn create(&self, draft: NotificationDraft) -> Result<Option<Notification>> {
        if rules::is_suppressed(&draft) {
            debug!("Not storing notification for deleted ticket {}", draft.ticket_id);
            return Ok(None);
        }

        let notification = self.remote.create_notification(&draft).await?;
        info!("Notification '{}' created for {}", notification.title, notification.user_id);

        // The feed echo may have delivered it already
        self.ingest(notification.clone());
        Ok(Some(notification))
    }

    pub async fn mark_read(&self, notification_id: Uuid) -> Result<bool> {
        if !self.remote.mark_read(notification_id).await? {
            return Ok(false);
        }

        if let Some(n) = self.items().iter_mut().find(|n| n.id == notification_id) {
            n.is_read = true;
        }
        self.broker.publish(SyncSignal::NotificationRead {
            notification_id: Some(notification_id),
        });
        Ok(true)
    }

    /// Remote first, then local, then a reload to pick up anything missed.
    /// A failed reload keeps the local state and is only logged.
    pub async fn mark_all_read(&self) -> Result<usize> {
        let updated = self.remote.mark_all_read(self.user_id).await?;

        for n in self.items().iter_mut() {
            n.is_read = true;
        }
        self.broker
            .publish(SyncSignal::NotificationRead { notification_id: None });

        if let Err(e) = self.load().await {
            warn!("Reloading notifications for {} failed: {}", self.user_id, e);
        }
        Ok(updated)
    }

    pub fn unread_count(&self) -> usize {
        self.items().iter().filter(|n| !n.is_read).count()
    }

    pub fn list(&self) -> Vec<Notification> {
        self.items().clone()
    }

    /// Local only; the remote row stays.
    pub fn remove(&self, notification_id: Uuid) -> bool {
        let mut items = self.items();
        let before = items.len();
        items.retain(|n| n.id != notification_id);
        items.len() != before
    }

    pub fn clear(&self) {
        self.items().clear();
    }
}
