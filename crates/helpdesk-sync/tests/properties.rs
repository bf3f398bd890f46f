mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use helpdesk_sync::counters::UnreadCounterStore;
use helpdesk_sync::memory::MemoryBackend;
use helpdesk_sync::remote::{CounterTable, MessageStore};
use helpdesk_sync::{Broker, SignalKind, SyncSignal};
use helpdesk_types::api::CounterRow;
use helpdesk_types::models::Role;

use common::{session, start, wait_until};

/// Remote table holding rows no well-behaved writer would produce.
struct CorruptTable {
    rows: Vec<CounterRow>,
}

#[async_trait]
impl CounterTable for CorruptTable {
    async fn read_all(&self, _user_id: Uuid) -> helpdesk_sync::Result<Vec<CounterRow>> {
        Ok(self.rows.clone())
    }

    async fn upsert(&self, _room_id: Uuid, _user_id: Uuid, _count: u32) -> helpdesk_sync::Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn counts_never_go_negative() {
    let user = Uuid::new_v4();
    let room = Uuid::new_v4();
    let table = CorruptTable {
        rows: vec![CounterRow {
            room_id: room,
            count: -4,
        }],
    };
    let store = UnreadCounterStore::new(Arc::new(table), Broker::new());

    store.load_all(user).await.unwrap();
    assert_eq!(store.get(room, user), 0);

    store.zero(room, user);
    store.zero(room, user);
    assert_eq!(store.get(room, user), 0);
    assert_eq!(store.increment(room, user), 1);
}

#[tokio::test]
async fn senders_never_count_their_own_messages() {
    let backend = MemoryBackend::new();
    let alice = start(&backend, session(Role::User)).await;
    let bob = start(&backend, session(Role::Technician)).await;
    let rooms: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();

    for round in 0..4 {
        for room in &rooms {
            alice
                .send_message(*room, &format!("update {}", round), Vec::new())
                .await
                .unwrap();
        }
    }

    wait_until("bob to count every message", || bob.total_unread() == 12).await;
    alice.settle().await;
    for room in &rooms {
        assert_eq!(alice.unread(*room), 0);
        assert_eq!(backend.counter(*room, alice.session().user_id), None);
    }
}

#[tokio::test]
async fn zeroing_twice_is_the_same_as_once() {
    let backend = MemoryBackend::new();
    let store = UnreadCounterStore::new(Arc::new(backend.clone()), Broker::new());
    let (room, user) = (Uuid::new_v4(), Uuid::new_v4());

    store.increment(room, user);
    store.increment(room, user);
    store.zero(room, user);
    assert_eq!(store.get(room, user), 0);
    store.zero(room, user);
    assert_eq!(store.get(room, user), 0);

    store.flush().await;
    assert_eq!(backend.counter(room, user), Some(0));
}

#[tokio::test]
async fn reload_converges_on_remote_truth() {
    let backend = MemoryBackend::new();
    let store = UnreadCounterStore::new(Arc::new(backend.clone()), Broker::new());
    let user = Uuid::new_v4();
    let rooms: Vec<Uuid> = (0..6).map(|_| Uuid::new_v4()).collect();

    for step in 0..30usize {
        let room = rooms[step * 7 % rooms.len()];
        if step % 5 == 4 {
            store.zero(room, user);
        } else {
            store.increment(room, user);
        }
    }
    store.flush().await;

    // Another device moved some rows meanwhile
    backend.set_counter(rooms[0], user, 9);
    backend.set_counter(rooms[3], user, 0);

    store.load_all(user).await.unwrap();
    for room in &rooms {
        assert_eq!(
            store.get(*room, user),
            backend.counter(*room, user).unwrap_or(0),
            "room {} diverged",
            room
        );
    }
}

#[tokio::test]
async fn total_is_the_sum_of_rooms() {
    let backend = MemoryBackend::new();
    let store = UnreadCounterStore::new(Arc::new(backend), Broker::new());
    let user = Uuid::new_v4();
    let rooms: Vec<Uuid> = (0..4).map(|_| Uuid::new_v4()).collect();

    for (n, room) in rooms.iter().enumerate() {
        for _ in 0..=n {
            store.increment(*room, user);
        }
    }
    store.zero(rooms[1], user);
    // Someone else's counts do not leak into ours
    store.increment(rooms[0], Uuid::new_v4());

    let sum: u32 = store.room_ids().iter().map(|room| store.get(*room, user)).sum();
    assert_eq!(store.total_unread(user), sum);
    assert_eq!(sum, 1 + 3 + 4);
}

#[tokio::test]
async fn every_listener_hears_a_message_exactly_once() {
    let backend = MemoryBackend::new();
    let context = start(&backend, session(Role::User)).await;
    let calls = Arc::new(AtomicUsize::new(0));

    const LISTENERS: usize = 5;
    for _ in 0..LISTENERS {
        let calls = calls.clone();
        context
            .broker()
            .subscribe(SignalKind::MessageReceived, move |signal| {
                if matches!(signal, SyncSignal::MessageReceived { from_self: false, .. }) {
                    calls.fetch_add(1, Ordering::SeqCst);
                }
            });
    }

    let room = Uuid::new_v4();
    backend
        .insert_message(room, Uuid::new_v4(), "ping", &[])
        .await
        .unwrap();

    wait_until("listeners to run", || calls.load(Ordering::SeqCst) >= LISTENERS).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(calls.load(Ordering::SeqCst), LISTENERS);
    assert_eq!(context.unread(room), 1);
}
