//! Best-effort user alerts: short tones and desktop notices. Every failure
//! here is swallowed; alerts never affect sync state.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use helpdesk_types::models::Notification;

use crate::broker::{Broker, ListenerId, SignalKind, SyncSignal};

/// Two-step frequency sweep with an exponential fade to near silence.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tone {
    pub start_hz: f32,
    pub end_hz: f32,
    pub gain: f32,
    pub duration: Duration,
}

pub const MESSAGE_TONE: Tone = Tone {
    start_hz: 880.0,
    end_hz: 440.0,
    gain: 0.2,
    duration: Duration::from_millis(200),
};

pub const NOTIFICATION_TONE: Tone = Tone {
    start_hz: 800.0,
    end_hz: 600.0,
    gain: 0.3,
    duration: Duration::from_millis(300),
};

/// Notices auto-close after this long.
pub const NOTICE_LIFETIME: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq)]
pub struct DesktopNotice {
    pub title: String,
    pub body: String,
    /// Notices sharing a tag replace each other; one per ticket.
    pub tag: Uuid,
    pub auto_close: Duration,
}

impl DesktopNotice {
    pub fn for_notification(notification: &Notification) -> Self {
        Self {
            title: notification.title.clone(),
            body: notification.message.clone(),
            tag: notification.ticket_id,
            auto_close: NOTICE_LIFETIME,
        }
    }
}

#[derive(Debug, Error)]
pub enum AlertError {
    #[error("permission denied")]
    PermissionDenied,

    #[error("alert output unavailable: {0}")]
    Unavailable(String),
}

/// Platform output for alerts.
pub trait AlertSink: Send + Sync {
    fn play_tone(&self, tone: Tone) -> Result<(), AlertError>;
    fn show_notice(&self, notice: &DesktopNotice) -> Result<(), AlertError>;
}

/// Writes alerts to the log. Used by headless sessions.
pub struct TracingAlerts;

impl AlertSink for TracingAlerts {
    fn play_tone(&self, tone: Tone) -> Result<(), AlertError> {
        debug!(
            "[TONE] {} Hz -> {} Hz at gain {} for {:?}",
            tone.start_hz, tone.end_hz, tone.gain, tone.duration
        );
        Ok(())
    }

    fn show_notice(&self, notice: &DesktopNotice) -> Result<(), AlertError> {
        info!("[NOTICE] {}: {} (ticket {})", notice.title, notice.body, notice.tag);
        Ok(())
    }
}

/// Drops everything.
pub struct SilentAlerts;

impl AlertSink for SilentAlerts {
    fn play_tone(&self, _tone: Tone) -> Result<(), AlertError> {
        Ok(())
    }

    fn show_notice(&self, _notice: &DesktopNotice) -> Result<(), AlertError> {
        Ok(())
    }
}

/// Turns broker signals into alerts, and notice clicks into navigation.
pub struct NotificationBridge {
    broker: Broker,
    listeners: Vec<ListenerId>,
}

impl NotificationBridge {
    pub fn attach(broker: &Broker, sink: Arc<dyn AlertSink>) -> Self {
        let message_sink = sink.clone();
        let on_message = broker.subscribe(SignalKind::MessageReceived, move |signal| {
            if let SyncSignal::MessageReceived {
                from_self: false, ..
            } = signal
            {
                if let Err(e) = message_sink.play_tone(MESSAGE_TONE) {
                    debug!("Message tone skipped: {}", e);
                }
            }
        });

        let on_notification = broker.subscribe(SignalKind::NotificationReceived, move |signal| {
            if let SyncSignal::NotificationReceived { notification } = signal {
                if let Err(e) = sink.play_tone(NOTIFICATION_TONE) {
                    debug!("Notification tone skipped: {}", e);
                }
                if let Err(e) = sink.show_notice(&DesktopNotice::for_notification(notification)) {
                    debug!("Desktop notice skipped: {}", e);
                }
            }
        });

        Self {
            broker: broker.clone(),
            listeners: vec![on_message, on_notification],
        }
    }

    /// The user clicked a notice; jump to its ticket.
    pub fn notice_clicked(&self, notice: &DesktopNotice) {
        self.broker
            .publish(SyncSignal::NavigateToTicket { ticket_id: notice.tag });
    }

    pub fn detach(&mut self) {
        for id in self.listeners.drain(..) {
            self.broker.unsubscribe(id);
        }
    }
}

impl Drop for NotificationBridge {
    fn drop(&mut self) {
        self.detach();
    }
}
