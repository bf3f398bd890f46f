//! Typed in-process publish/subscribe for UI-facing signals.
//!
//! Listeners run synchronously, in registration order, on whichever task
//! published the signal. The listener list is snapshotted before dispatch,
//! so a listener may subscribe or unsubscribe without deadlocking.

use std::sync::{Arc, Mutex, MutexGuard};

use uuid::Uuid;

use helpdesk_types::events::ChangeKind;
use helpdesk_types::models::{ChatMessage, Notification};

#[derive(Debug, Clone, PartialEq)]
pub enum SyncSignal {
    /// Some unread count for `user_id` moved; `total` is the new badge value.
    CountsChanged { user_id: Uuid, total: u32 },

    MessageReceived { message: ChatMessage, from_self: bool },

    MessageDeleted { room_id: Uuid, message_id: Uuid },

    /// `user_id` acknowledged everything in `room_id`.
    MessageRead { room_id: Uuid, user_id: Uuid },

    NotificationReceived { notification: Notification },

    /// `None` when every notification was marked read at once.
    NotificationRead { notification_id: Option<Uuid> },

    NavigateToTicket { ticket_id: Uuid },

    TicketChanged { ticket_id: Uuid, change: ChangeKind },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalKind {
    CountsChanged,
    MessageReceived,
    MessageDeleted,
    MessageRead,
    NotificationReceived,
    NotificationRead,
    NavigateToTicket,
    TicketChanged,
}

impl SyncSignal {
    pub fn kind(&self) -> SignalKind {
        match self {
            Self::CountsChanged { .. } => SignalKind::CountsChanged,
            Self::MessageReceived { .. } => SignalKind::MessageReceived,
            Self::MessageDeleted { .. } => SignalKind::MessageDeleted,
            Self::MessageRead { .. } => SignalKind::MessageRead,
            Self::NotificationReceived { .. } => SignalKind::NotificationReceived,
            Self::NotificationRead { .. } => SignalKind::NotificationRead,
            Self::NavigateToTicket { .. } => SignalKind::NavigateToTicket,
            Self::TicketChanged { .. } => SignalKind::TicketChanged,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Arc<dyn Fn(&SyncSignal) + Send + Sync>;

#[derive(Clone, Default)]
pub struct Broker {
    inner: Arc<Mutex<BrokerInner>>,
}

#[derive(Default)]
struct BrokerInner {
    next_id: u64,
    listeners: Vec<(ListenerId, SignalKind, Listener)>,
}

impl Broker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BrokerInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn subscribe<F>(&self, kind: SignalKind, listener: F) -> ListenerId
    where
        F: Fn(&SyncSignal) + Send + Sync + 'static,
    {
        let mut inner = self.lock();
        inner.next_id += 1;
        let id = ListenerId(inner.next_id);
        inner.listeners.push((id, kind, Arc::new(listener)));
        id
    }

    /// Returns `false` if the listener was already gone.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut inner = self.lock();
        let before = inner.listeners.len();
        inner.listeners.retain(|(lid, _, _)| *lid != id);
        inner.listeners.len() != before
    }

    /// Deliver `signal` to every listener of its kind. Returns how many ran.
    pub fn publish(&self, signal: SyncSignal) -> usize {
        let kind = signal.kind();
        let targets: Vec<Listener> = self
            .lock()
            .listeners
            .iter()
            .filter(|(_, k, _)| *k == kind)
            .map(|(_, _, listener)| listener.clone())
            .collect();

        for listener in &targets {
            listener(&signal);
        }
        targets.len()
    }

    pub fn listener_count(&self, kind: SignalKind) -> usize {
        self.lock()
            .listeners
            .iter()
            .filter(|(_, k, _)| *k == kind)
            .count()
    }

    pub fn clear(&self) {
        self.lock().listeners.clear();
    }
}
