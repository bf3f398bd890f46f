//! Realtime ingress: one subscription per entity kind, each with its own
//! retry state machine, all feeding normalized events into one channel.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use helpdesk_types::events::{EntityKind, RealtimeEvent};

use crate::remote::FeedTransport;

/// A connection that lasts this long counts as healthy even if it stayed quiet.
const HEALTHY_AFTER: Duration = Duration::from_secs(5);

/// Bounded linear backoff: the wait after failure `n` is `step * n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub step: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            step: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn delay(&self, failures: u32) -> Duration {
        self.step * failures
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    /// Waiting to (re)connect; `retries` failures so far.
    Disconnected { retries: u32 },
    Connecting { attempt: u32 },
    Connected,
    /// Attempts exhausted. Stays here until the session restarts.
    GaveUp,
    /// Torn down on purpose.
    Closed,
}

/// Pure transition logic, kept apart from the I/O loop.
#[derive(Debug, Clone)]
pub struct SubscriptionMachine {
    policy: RetryPolicy,
    failures: u32,
    /// Set once the current connection delivered a record or stayed up long enough
    healthy: bool,
    state: SubscriptionState,
}

impl SubscriptionMachine {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            failures: 0,
            healthy: false,
            state: SubscriptionState::Disconnected { retries: 0 },
        }
    }

    pub fn state(&self) -> SubscriptionState {
        self.state
    }

    pub fn start_attempt(&mut self) -> u32 {
        let attempt = self.failures + 1;
        self.state = SubscriptionState::Connecting { attempt };
        attempt
    }

    /// The feed accepted the subscription. The attempt budget is only
    /// restored once the connection proves [`healthy`](Self::healthy).
    pub fn connected(&mut self) {
        self.healthy = false;
        self.state = SubscriptionState::Connected;
    }

    pub fn healthy(&mut self) {
        self.healthy = true;
        self.failures = 0;
    }

    /// An attempt failed. Returns the wait before the next one, or `None`
    /// once attempts are exhausted.
    pub fn failed(&mut self) -> Option<Duration> {
        self.failures += 1;
        if self.failures >= self.policy.max_attempts {
            self.state = SubscriptionState::GaveUp;
            return None;
        }
        self.state = SubscriptionState::Disconnected {
            retries: self.failures,
        };
        Some(self.policy.delay(self.failures))
    }

    /// A subscription was lost. After a healthy connection the next attempt
    /// starts a fresh budget; otherwise the drop counts as a failed attempt.
    pub fn dropped(&mut self) -> Option<Duration> {
        if !self.healthy {
            return self.failed();
        }
        self.healthy = false;
        self.failures = 0;
        self.state = SubscriptionState::Disconnected { retries: 0 };
        Some(self.policy.step)
    }

    pub fn close(&mut self) {
        self.state = SubscriptionState::Closed;
    }
}

struct Subscription {
    cancel: CancellationToken,
    state: watch::Receiver<SubscriptionState>,
}

pub struct Ingress {
    cancel: CancellationToken,
    tracker: TaskTracker,
    subscriptions: HashMap<EntityKind, Subscription>,
}

impl Ingress {
    /// Open one independent subscription per kind. Normalized events go to `events`.
    pub fn start(
        transport: Arc<dyn FeedTransport>,
        policy: RetryPolicy,
        kinds: &[EntityKind],
        events: mpsc::UnboundedSender<RealtimeEvent>,
    ) -> Self {
        let cancel = CancellationToken::new();
        let tracker = TaskTracker::new();
        let mut subscriptions = HashMap::new();

        for &entity in kinds {
            let child = cancel.child_token();
            let (state_tx, state_rx) =
                watch::channel(SubscriptionState::Disconnected { retries: 0 });

            tracker.spawn(run_subscription(
                entity,
                transport.clone(),
                policy,
                events.clone(),
                state_tx,
                child.clone(),
            ));

            subscriptions.insert(
                entity,
                Subscription {
                    cancel: child,
                    state: state_rx,
                },
            );
        }

        info!("Realtime ingress started for {} entity kinds", kinds.len());
        Self {
            cancel,
            tracker,
            subscriptions,
        }
    }

    pub fn state(&self, entity: EntityKind) -> Option<SubscriptionState> {
        self.subscriptions.get(&entity).map(|s| *s.state.borrow())
    }

    pub fn watch(&self, entity: EntityKind) -> Option<watch::Receiver<SubscriptionState>> {
        self.subscriptions.get(&entity).map(|s| s.state.clone())
    }

    /// Stop one subscription; the others keep running.
    pub fn unsubscribe(&self, entity: EntityKind) {
        if let Some(sub) = self.subscriptions.get(&entity) {
            sub.cancel.cancel();
        }
    }

    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        debug!("Realtime ingress stopped");
    }
}

impl Drop for Ingress {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run_subscription(
    entity: EntityKind,
    transport: Arc<dyn FeedTransport>,
    policy: RetryPolicy,
    events: mpsc::UnboundedSender<RealtimeEvent>,
    state: watch::Sender<SubscriptionState>,
    cancel: CancellationToken,
) {
    let mut machine = SubscriptionMachine::new(policy);

    'outer: loop {
        let attempt = machine.start_attempt();
        state.send_replace(machine.state());

        let opened = tokio::select! {
            _ = cancel.cancelled() => break 'outer,
            opened = transport.open(entity) => opened,
        };

        let delay = match opened {
            Ok(mut stream) => {
                machine.connected();
                state.send_replace(machine.state());
                info!("Subscribed to {} changes", entity);
                let connected_at = Instant::now();

                loop {
                    let next = tokio::select! {
                        _ = cancel.cancelled() => break 'outer,
                        next = stream.next() => next,
                    };

                    match next {
                        Some(Ok(record)) => {
                            machine.healthy();
                            if record.entity != entity {
                                warn!("Dropping {} change delivered on the {} feed", record.entity, entity);
                                continue;
                            }
                            match RealtimeEvent::from_change(record) {
                                Ok(event) => {
                                    if events.send(event).is_err() {
                                        // Nobody is listening any more
                                        break 'outer;
                                    }
                                }
                                Err(e) => warn!("Dropping malformed {} change: {}", entity, e),
                            }
                        }
                        Some(Err(e)) if e.is_data_error() => {
                            warn!("Dropping unreadable {} frame: {}", entity, e);
                        }
                        Some(Err(e)) => {
                            warn!("{} feed lost: {}", entity, e);
                            break;
                        }
                        None => {
                            warn!("{} feed closed by remote", entity);
                            break;
                        }
                    }
                }

                if connected_at.elapsed() >= HEALTHY_AFTER {
                    machine.healthy();
                }
                match machine.dropped() {
                    Some(delay) => delay,
                    None => {
                        warn!(
                            "{} feed keeps closing right after subscribing; giving up",
                            entity
                        );
                        state.send_replace(machine.state());
                        return;
                    }
                }
            }
            Err(e) => match machine.failed() {
                Some(delay) => {
                    warn!(
                        "Subscribing to {} failed (attempt {}): {}; retrying in {:?}",
                        entity, attempt, e, delay
                    );
                    delay
                }
                None => {
                    warn!(
                        "Subscribing to {} failed (attempt {}): {}; giving up",
                        entity, attempt, e
                    );
                    state.send_replace(machine.state());
                    return;
                }
            },
        };

        state.send_replace(machine.state());

        tokio::select! {
            _ = cancel.cancelled() => break 'outer,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    machine.close();
    state.send_replace(machine.state());
    debug!("{} subscription closed", entity);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBackend;
    use helpdesk_types::events::{ChangeKind, ChangeRecord};
    use serde_json::json;

    fn fast() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            step: Duration::from_millis(10),
        }
    }

    async fn wait_for(ingress: &Ingress, entity: EntityKind, want: SubscriptionState) {
        let mut rx = ingress.watch(entity).unwrap();
        tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| *s == want))
            .await
            .expect("state not reached")
            .unwrap();
    }

    #[test]
    fn backoff_is_linear_and_bounded() {
        let policy = RetryPolicy {
            max_attempts: 3,
            step: Duration::from_millis(100),
        };
        let mut machine = SubscriptionMachine::new(policy);

        assert_eq!(machine.start_attempt(), 1);
        assert_eq!(machine.failed(), Some(Duration::from_millis(100)));
        assert_eq!(machine.state(), SubscriptionState::Disconnected { retries: 1 });
        assert_eq!(machine.start_attempt(), 2);
        assert_eq!(machine.failed(), Some(Duration::from_millis(200)));
        assert_eq!(machine.start_attempt(), 3);
        assert_eq!(machine.failed(), None);
        assert_eq!(machine.state(), SubscriptionState::GaveUp);
    }

    #[test]
    fn healthy_connections_reset_the_budget() {
        let mut machine = SubscriptionMachine::new(RetryPolicy::default());
        machine.start_attempt();
        machine.failed();
        machine.start_attempt();
        machine.connected();
        assert_eq!(machine.state(), SubscriptionState::Connected);

        machine.healthy();
        assert_eq!(machine.dropped(), Some(Duration::from_secs(1)));
        assert_eq!(machine.start_attempt(), 1);
    }

    #[test]
    fn quiet_drops_spend_the_budget() {
        let mut machine = SubscriptionMachine::new(RetryPolicy::default());
        for attempt in 1..3 {
            assert_eq!(machine.start_attempt(), attempt);
            machine.connected();
            assert!(machine.dropped().is_some());
        }
        machine.start_attempt();
        machine.connected();
        assert_eq!(machine.dropped(), None);
        assert_eq!(machine.state(), SubscriptionState::GaveUp);
    }

    /// Accepts every subscription and closes it at once.
    struct ClosesImmediately {
        opens: std::sync::atomic::AtomicUsize,
    }

    #[async_trait::async_trait]
    impl FeedTransport for ClosesImmediately {
        async fn open(&self, _entity: EntityKind) -> crate::error::Result<crate::remote::FeedStream> {
            self.opens.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(Box::pin(futures_util::stream::empty()))
        }
    }

    #[tokio::test]
    async fn feeds_that_close_immediately_give_up() {
        let transport = Arc::new(ClosesImmediately {
            opens: std::sync::atomic::AtomicUsize::new(0),
        });
        let (tx, _rx) = mpsc::unbounded_channel();
        let ingress = Ingress::start(transport.clone(), fast(), &[EntityKind::Counter], tx);

        wait_for(&ingress, EntityKind::Counter, SubscriptionState::GaveUp).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(transport.opens.load(std::sync::atomic::Ordering::SeqCst), 3);
        ingress.shutdown().await;
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts_without_blocking_others() {
        let backend = MemoryBackend::new();
        // Enough to exhaust exactly one of the two kinds
        backend.fail_next_subscribes(3);
        let (tx, _rx) = mpsc::unbounded_channel();

        let ingress = Ingress::start(
            Arc::new(backend.clone()),
            fast(),
            &[EntityKind::Ticket],
            tx.clone(),
        );
        wait_for(&ingress, EntityKind::Ticket, SubscriptionState::GaveUp).await;
        assert_eq!(backend.subscribe_attempts(EntityKind::Ticket), 3);

        let other = Ingress::start(Arc::new(backend.clone()), fast(), &[EntityKind::Counter], tx);
        wait_for(&other, EntityKind::Counter, SubscriptionState::Connected).await;

        ingress.shutdown().await;
        other.shutdown().await;
    }

    #[tokio::test]
    async fn malformed_records_are_dropped_and_feed_survives() {
        let backend = MemoryBackend::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let ingress = Ingress::start(Arc::new(backend.clone()), fast(), &[EntityKind::Ticket], tx);
        wait_for(&ingress, EntityKind::Ticket, SubscriptionState::Connected).await;

        backend.publish_raw(ChangeRecord {
            entity: EntityKind::Ticket,
            change: ChangeKind::Updated,
            record: json!({ "id": "nope" }),
        });
        backend.publish_raw(ChangeRecord {
            entity: EntityKind::Ticket,
            change: ChangeKind::Deleted,
            record: json!({ "id": "0f6f2b8e-3f59-4c55-9a0c-1d2f3e4a5b6c" }),
        });

        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.change, ChangeKind::Deleted);
        ingress.shutdown().await;
    }

    #[tokio::test]
    async fn reconnects_after_feed_drop() {
        let backend = MemoryBackend::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let ingress = Ingress::start(Arc::new(backend.clone()), fast(), &[EntityKind::Message], tx);
        wait_for(&ingress, EntityKind::Message, SubscriptionState::Connected).await;

        backend.drop_feeds();
        tokio::time::timeout(Duration::from_secs(5), async {
            while backend.subscribe_attempts(EntityKind::Message) < 2
                || ingress.state(EntityKind::Message) != Some(SubscriptionState::Connected)
            {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("never reconnected");

        ingress.shutdown().await;
        assert_eq!(ingress.state(EntityKind::Message), Some(SubscriptionState::Closed));
    }

    #[tokio::test]
    async fn unsubscribe_stops_one_kind() {
        let backend = MemoryBackend::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let ingress = Ingress::start(
            Arc::new(backend.clone()),
            fast(),
            &[EntityKind::Message, EntityKind::Counter],
            tx,
        );
        wait_for(&ingress, EntityKind::Message, SubscriptionState::Connected).await;
        wait_for(&ingress, EntityKind::Counter, SubscriptionState::Connected).await;

        ingress.unsubscribe(EntityKind::Message);
        wait_for(&ingress, EntityKind::Message, SubscriptionState::Closed).await;
        assert_eq!(ingress.state(EntityKind::Counter), Some(SubscriptionState::Connected));

        ingress.shutdown().await;
    }
}
