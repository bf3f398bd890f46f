#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use helpdesk_sync::alerts::{AlertError, AlertSink, DesktopNotice, SilentAlerts, Tone};
use helpdesk_sync::ingress::{RetryPolicy, SubscriptionState};
use helpdesk_sync::memory::MemoryBackend;
use helpdesk_sync::{Remote, Session, SyncConfig, SyncContext};
use helpdesk_types::events::EntityKind;
use helpdesk_types::models::{Role, Ticket, TicketPriority, TicketStatus};

/// Fast retries, no background reconciliation.
pub fn config() -> SyncConfig {
    SyncConfig {
        retry: RetryPolicy {
            max_attempts: 3,
            step: Duration::from_millis(10),
        },
        reconcile_interval: None,
        ..SyncConfig::default()
    }
}

pub fn session(role: Role) -> Session {
    let user_id = Uuid::new_v4();
    Session {
        user_id,
        name: format!("{:?}-{}", role, &user_id.simple().to_string()[..4]),
        role,
    }
}

/// Poll until `check` holds, failing the test after two seconds.
pub async fn wait_until<F: Fn() -> bool>(what: &str, check: F) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !check() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

pub async fn connected(context: &SyncContext) {
    wait_until("every feed to connect", || {
        EntityKind::ALL
            .iter()
            .all(|kind| context.subscription_state(*kind) == Some(SubscriptionState::Connected))
    })
    .await;
}

/// Session against `backend`, with every feed live.
pub async fn start(backend: &MemoryBackend, session: Session) -> SyncContext {
    start_with(backend, session, Arc::new(SilentAlerts), config()).await
}

pub async fn start_with(
    backend: &MemoryBackend,
    session: Session,
    alerts: Arc<dyn AlertSink>,
    config: SyncConfig,
) -> SyncContext {
    let context = SyncContext::init(session, Remote::memory(backend), alerts, config).await;
    connected(&context).await;
    context
}

pub fn ticket(created_by: Uuid, title: &str) -> Ticket {
    let now = Utc::now();
    Ticket {
        id: Uuid::new_v4(),
        title: title.into(),
        description: String::new(),
        status: TicketStatus::Open,
        priority: TicketPriority::Medium,
        category: "hardware".into(),
        created_by,
        assigned_to: None,
        created_at: now,
        updated_at: now,
    }
}

/// Records every alert it is asked to raise.
#[derive(Default)]
pub struct RecordingAlerts {
    pub tones: Mutex<Vec<Tone>>,
    pub notices: Mutex<Vec<DesktopNotice>>,
}

impl RecordingAlerts {
    pub fn tones(&self) -> Vec<Tone> {
        self.tones.lock().unwrap().clone()
    }

    pub fn notices(&self) -> Vec<DesktopNotice> {
        self.notices.lock().unwrap().clone()
    }
}

impl AlertSink for RecordingAlerts {
    fn play_tone(&self, tone: Tone) -> Result<(), AlertError> {
        self.tones.lock().unwrap().push(tone);
        Ok(())
    }

    fn show_notice(&self, notice: &DesktopNotice) -> Result<(), AlertError> {
        self.notices.lock().unwrap().push(notice.clone());
        Ok(())
    }
}
