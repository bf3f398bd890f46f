//! The sync session: owns every component, wires ingress to them, and is
//! the single entry point UI code talks to.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde_json::json;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};
use uuid::Uuid;

use helpdesk_types::api::AuditEntryRequest;
use helpdesk_types::events::{ChangeKind, EntityKind, EntityRecord, RealtimeEvent, RemovedRecord};
use helpdesk_types::models::{ChatMessage, ChatRoom, FileAttachment, Role, STAFF_ROOM_ID};

use crate::ack::{AckState, ReadTracker};
use crate::alerts::{AlertSink, DesktopNotice, NotificationBridge};
use crate::broker::{Broker, SyncSignal};
use crate::config::SyncConfig;
use crate::counters::UnreadCounterStore;
use crate::error::{Result, SyncError};
use crate::ingress::{Ingress, SubscriptionState};
use crate::notifications::NotificationCenter;
use crate::remote::Remote;
use crate::rules::{self, TicketWatcher};

/// Message ids remembered per room for redelivery checks.
const SEEN_PER_ROOM: usize = 256;

/// Who is signed in. Identity is trusted as given.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub user_id: Uuid,
    pub name: String,
    pub role: Role,
}

pub struct SyncContext {
    inner: Arc<ContextInner>,
    ingress: Ingress,
    bridge: NotificationBridge,
    cancel: CancellationToken,
}

struct ContextInner {
    session: Session,
    remote: Remote,
    broker: Broker,
    counters: Arc<UnreadCounterStore>,
    reads: ReadTracker,
    notifications: NotificationCenter,
    tickets: Mutex<TicketWatcher>,
    /// Rooms opened this session, oldest message first
    messages: Mutex<HashMap<Uuid, Vec<ChatMessage>>>,
    /// Recent message ids per room, kept for every room whether opened or not
    seen: Mutex<HashMap<Uuid, VecDeque<Uuid>>>,
    tasks: TaskTracker,
}

impl SyncContext {
    /// Load counters and notifications, then start watching the feed.
    /// Load failures are logged; the session starts with whatever it has.
    pub async fn init(
        session: Session,
        remote: Remote,
        alerts: Arc<dyn AlertSink>,
        config: SyncConfig,
    ) -> Self {
        let broker = Broker::new();
        let counters = Arc::new(UnreadCounterStore::new(
            remote.counters.clone(),
            broker.clone(),
        ));
        let reads = ReadTracker::new(counters.clone(), broker.clone(), config.suppress_open_room);
        let notifications =
            NotificationCenter::new(session.user_id, remote.notifications.clone(), broker.clone());
        let bridge = NotificationBridge::attach(&broker, alerts);

        let inner = Arc::new(ContextInner {
            session,
            remote,
            broker,
            counters,
            reads,
            notifications,
            tickets: Mutex::new(TicketWatcher::new()),
            messages: Mutex::new(HashMap::new()),
            seen: Mutex::new(HashMap::new()),
            tasks: TaskTracker::new(),
        });

        let me = inner.session.user_id;
        if let Err(e) = inner.counters.load_all(me).await {
            warn!("Could not load unread counters for {}: {}", me, e);
        }
        if let Err(e) = inner.notifications.load().await {
            warn!("Could not load notifications for {}: {}", me, e);
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let ingress = Ingress::start(
            inner.remote.feed.clone(),
            config.retry,
            &EntityKind::ALL,
            events_tx,
        );

        let cancel = CancellationToken::new();
        inner
            .tasks
            .spawn(run_event_loop(inner.clone(), events_rx, cancel.clone()));
        if let Some(period) = config.reconcile_interval {
            inner
                .tasks
                .spawn(run_reconciler(inner.clone(), period, cancel.clone()));
        }

        info!(
            "Sync session started for {} ({:?}), {} unread",
            inner.session.name,
            inner.session.role,
            inner.counters.total_unread(me)
        );

        Self {
            inner,
            ingress,
            bridge,
            cancel,
        }
    }

    pub fn session(&self) -> &Session {
        &self.inner.session
    }

    pub fn broker(&self) -> &Broker {
        &self.inner.broker
    }

    pub fn counters(&self) -> &UnreadCounterStore {
        &self.inner.counters
    }

    pub fn notifications(&self) -> &NotificationCenter {
        &self.inner.notifications
    }

    // -- Rooms and messages --

    /// Load a room's messages and put it on screen. A room with at least
    /// one message is acknowledged. On load failure the cached messages
    /// are returned and nothing is acknowledged.
    pub async fn open_room(&self, room_id: Uuid) -> Vec<ChatMessage> {
        let me = self.inner.session.user_id;

        let loaded = match self.inner.remote.messages.list_messages(room_id).await {
            Ok(loaded) => loaded,
            Err(e) => {
                warn!("Could not load messages for room {}: {}", room_id, e);
                return self.messages(room_id);
            }
        };

        self.inner.counters.add_participant(room_id, me);
        if let Some(last) = loaded.last() {
            self.inner.counters.set_last_message(last);
        }
        for message in &loaded {
            self.inner.counters.add_participant(room_id, message.sender_id);
            self.inner.first_sighting(message);
        }
        self.inner.cache().insert(room_id, loaded.clone());

        self.inner.reads.open_room(room_id, me, loaded.len());
        debug!("Opened room {} with {} messages", room_id, loaded.len());
        loaded
    }

    pub fn close_room(&self, room_id: Uuid) {
        self.inner.reads.close_room(room_id, self.inner.session.user_id);
    }

    pub fn open_room_id(&self) -> Option<Uuid> {
        self.inner.reads.open_room_of(self.inner.session.user_id)
    }

    /// Blank messages are rejected before any remote call.
    pub async fn send_message(
        &self,
        room_id: Uuid,
        content: &str,
        attachments: Vec<FileAttachment>,
    ) -> Result<ChatMessage> {
        if ChatMessage::is_blank(content, &attachments) {
            return Err(SyncError::EmptyMessage);
        }

        let me = self.inner.session.user_id;
        let message = self
            .inner
            .remote
            .messages
            .insert_message(room_id, me, content, &attachments)
            .await
            .inspect_err(|e| warn!("Sending to room {} failed: {}", room_id, e))?;

        self.inner.first_sighting(&message);
        self.inner.remember_message(&message);
        self.inner.counters.add_participant(room_id, me);
        self.inner.counters.set_last_message(&message);
        self.inner.record_audit(&message);

        Ok(message)
    }

    /// Removes the message locally only if the remote actually deleted it.
    /// Unread counts are never decremented.
    pub async fn delete_message(&self, message_id: Uuid) -> Result<bool> {
        let deleted = self
            .inner
            .remote
            .messages
            .delete_message(message_id)
            .await
            .inspect_err(|e| warn!("Deleting message {} failed: {}", message_id, e))?;

        if deleted {
            self.inner.forget_message(message_id, None);
        }
        Ok(deleted)
    }

    pub fn messages(&self, room_id: Uuid) -> Vec<ChatMessage> {
        self.inner.cache().get(&room_id).cloned().unwrap_or_default()
    }

    pub fn room(&self, room_id: Uuid) -> Option<ChatRoom> {
        self.inner.counters.room(room_id)
    }

    // -- Unread counts --

    pub fn unread(&self, room_id: Uuid) -> u32 {
        self.inner.counters.get(room_id, self.inner.session.user_id)
    }

    pub fn total_unread(&self) -> u32 {
        self.inner.counters.total_unread(self.inner.session.user_id)
    }

    pub fn ack_state(&self, room_id: Uuid) -> AckState {
        self.inner.reads.state(room_id, self.inner.session.user_id)
    }

    pub fn mark_room_read(&self, room_id: Uuid) {
        self.inner.reads.acknowledge(room_id, self.inner.session.user_id);
    }

    pub async fn mark_all_rooms_read(&self) {
        let me = self.inner.session.user_id;
        if let Err(e) = self.inner.reads.mark_all_read(me).await {
            warn!("Reconciling after mark-all-read failed for {}: {}", me, e);
        }
    }

    pub async fn reload_unread_counts(&self) {
        self.inner.reconcile().await;
    }

    /// Wait for queued counter writes to reach the remote.
    pub async fn settle(&self) {
        self.inner.counters.flush().await;
    }

    // -- Realtime --

    pub fn subscription_state(&self, entity: EntityKind) -> Option<SubscriptionState> {
        self.ingress.state(entity)
    }

    pub fn watch_subscription(&self, entity: EntityKind) -> Option<watch::Receiver<SubscriptionState>> {
        self.ingress.watch(entity)
    }

    /// Apply one normalized change. The event loop calls this for every
    /// feed event; it is public so embedders can inject events directly.
    pub fn handle_event(&self, event: RealtimeEvent) {
        self.inner.handle_event(event);
    }

    pub fn notice_clicked(&self, notice: &DesktopNotice) {
        self.bridge.notice_clicked(notice);
    }

    /// Stop ingress and background tasks, then wait for pending writes.
    pub async fn teardown(mut self) {
        self.cancel.cancel();
        self.ingress.shutdown().await;

        self.inner.tasks.close();
        self.inner.tasks.wait().await;
        self.inner.counters.flush().await;

        self.bridge.detach();
        info!("Sync session for {} torn down", self.inner.session.name);
    }
}

impl Drop for SyncContext {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl ContextInner {
    fn cache(&self) -> MutexGuard<'_, HashMap<Uuid, Vec<ChatMessage>>> {
        self.messages.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append to the room's cache if the room is loaded and lacks it.
    fn remember_message(&self, message: &ChatMessage) {
        if let Some(list) = self.cache().get_mut(&message.room_id) {
            if !list.iter().any(|m| m.id == message.id) {
                list.push(message.clone());
            }
        }
    }

    /// Record that `message` was seen. Returns `false` for a redelivery.
    fn first_sighting(&self, message: &ChatMessage) -> bool {
        let mut seen = self.seen.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let ids = seen.entry(message.room_id).or_default();
        if ids.contains(&message.id) {
            return false;
        }
        if ids.len() == SEEN_PER_ROOM {
            ids.pop_front();
        }
        ids.push_back(message.id);
        true
    }

    fn forget_message(&self, message_id: Uuid, room_hint: Option<Uuid>) {
        let (room_id, removed, new_last) = {
            let mut cache = self.cache();
            let room_id = room_hint.or_else(|| {
                cache
                    .iter()
                    .find(|(_, list)| list.iter().any(|m| m.id == message_id))
                    .map(|(room_id, _)| *room_id)
            });
            let mut removed = false;
            let mut new_last = None;
            if let Some(list) = room_id.and_then(|room_id| cache.get_mut(&room_id)) {
                let before = list.len();
                list.retain(|m| m.id != message_id);
                removed = list.len() != before;
                new_last = list.last().cloned();
            }
            (room_id, removed, new_last)
        };

        let Some(room_id) = room_id else {
            debug!("Deleted message {} belongs to no known room", message_id);
            return;
        };

        let was_last = self.counters.clear_last_message(room_id, message_id);
        if let Some(last) = new_last.filter(|_| was_last) {
            self.counters.set_last_message(&last);
        }

        // Our own deletes come back on the feed; announce once
        if removed || was_last {
            self.broker
                .publish(SyncSignal::MessageDeleted { room_id, message_id });
        }
    }

    fn record_audit(&self, message: &ChatMessage) {
        let entry = AuditEntryRequest {
            user_id: self.session.user_id,
            user_name: self.session.name.clone(),
            action_type: "chat_message_sent".into(),
            ticket_id: (message.room_id != STAFF_ROOM_ID).then_some(message.room_id),
            message_id: Some(message.id),
            details: json!({
                "preview": rules::preview(&message.content),
                "attachments": message.attachments.len(),
            }),
        };

        let audit = self.remote.audit.clone();
        self.tasks.spawn(async move {
            if let Err(e) = audit.record(&entry).await {
                debug!("Audit entry for message {:?} not stored: {}", entry.message_id, e);
            }
        });
    }

    async fn reconcile(&self) {
        let me = self.session.user_id;
        if let Err(e) = self.counters.load_all(me).await {
            warn!("Reconciling unread counters for {} failed: {}", me, e);
        }
    }

    fn handle_event(self: &Arc<Self>, event: RealtimeEvent) {
        if event.kind == EntityKind::Ticket {
            self.on_ticket(&event);
            return;
        }

        match event.record {
            EntityRecord::Message(message) => self.on_message(event.change, message),
            EntityRecord::Removed(removed) => self.on_removed(event.kind, removed),
            EntityRecord::Counter(counter) => {
                // Hint only; our own writes echo back here and must not clobber newer local state
                let me = self.session.user_id;
                if counter.user_id == me {
                    let total = self.counters.total_unread(me);
                    self.broker
                        .publish(SyncSignal::CountsChanged { user_id: me, total });
                }
            }
            EntityRecord::Notification(notification) => match event.change {
                ChangeKind::Created => {
                    self.notifications.ingest(notification);
                }
                _ => self.notifications.apply_update(notification),
            },
            EntityRecord::Ticket(_) => {}
        }
    }

    fn on_message(&self, change: ChangeKind, message: ChatMessage) {
        if ChatMessage::is_blank(&message.content, &message.attachments) {
            warn!("Dropping blank message {} in room {}", message.id, message.room_id);
            return;
        }

        if change != ChangeKind::Created {
            if let Some(list) = self.cache().get_mut(&message.room_id) {
                if let Some(slot) = list.iter_mut().find(|m| m.id == message.id) {
                    *slot = message;
                }
            }
            return;
        }

        if !self.first_sighting(&message) {
            debug!("Message {} delivered again, ignoring", message.id);
            return;
        }
        self.remember_message(&message);

        let me = self.session.user_id;
        let from_self = message.sender_id == me;
        self.counters.set_last_message(&message);
        if !from_self {
            self.reads.deliver(message.room_id, message.sender_id, me);
        }

        self.broker
            .publish(SyncSignal::MessageReceived { message, from_self });
    }

    fn on_removed(&self, kind: EntityKind, removed: RemovedRecord) {
        match kind {
            EntityKind::Message => self.forget_message(removed.id, removed.room_id),
            EntityKind::Notification => {
                self.notifications.remove(removed.id);
            }
            EntityKind::Counter | EntityKind::Ticket => {}
        }
    }

    fn on_ticket(self: &Arc<Self>, event: &RealtimeEvent) {
        let ticket_id = match &event.record {
            EntityRecord::Ticket(ticket) => ticket.id,
            EntityRecord::Removed(removed) => removed.id,
            _ => return,
        };

        let activities = self
            .tickets
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .observe(event);

        self.broker.publish(SyncSignal::TicketChanged {
            ticket_id,
            change: event.change,
        });

        let Session { user_id, role, .. } = self.session;
        for activity in &activities {
            let Some(draft) = rules::draft_for(activity, user_id, role) else {
                continue;
            };
            let inner = self.clone();
            self.tasks.spawn(async move {
                if let Err(e) = inner.notifications.create(draft).await {
                    warn!("Could not create notification for ticket {}: {}", ticket_id, e);
                }
            });
        }
    }
}

async fn run_event_loop(
    inner: Arc<ContextInner>,
    mut events: mpsc::UnboundedReceiver<RealtimeEvent>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };
        inner.handle_event(event);
    }
    debug!("Sync event loop stopped");
}

async fn run_reconciler(inner: Arc<ContextInner>, period: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(period);
    // First tick is immediate; init already loaded
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => inner.reconcile().await,
        }
    }
}
