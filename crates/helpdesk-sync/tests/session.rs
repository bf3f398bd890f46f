mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use helpdesk_sync::alerts::{DesktopNotice, MESSAGE_TONE, NOTIFICATION_TONE};
use helpdesk_sync::memory::MemoryBackend;
use helpdesk_sync::remote::MessageStore;
use helpdesk_sync::{SignalKind, SyncError, SyncSignal};
use helpdesk_types::events::{ChangeKind, ChangeRecord, EntityKind, EntityRecord, RealtimeEvent};
use helpdesk_types::models::{
    ChatMessage, NotificationKind, Role, STAFF_ROOM_ID, Ticket, TicketStatus,
};

use common::{RecordingAlerts, config, connected, session, start, start_with, ticket, wait_until};

fn ticket_change(change: ChangeKind, ticket: &Ticket) -> ChangeRecord {
    let record = match change {
        ChangeKind::Deleted => json!({ "id": ticket.id }),
        _ => serde_json::to_value(ticket).unwrap(),
    };
    ChangeRecord {
        entity: EntityKind::Ticket,
        change,
        record,
    }
}

fn message_created(room_id: Uuid, content: &str) -> RealtimeEvent {
    RealtimeEvent {
        kind: EntityKind::Message,
        change: ChangeKind::Created,
        record: EntityRecord::Message(ChatMessage {
            id: Uuid::new_v4(),
            room_id,
            sender_id: Uuid::new_v4(),
            content: content.into(),
            attachments: Vec::new(),
            created_at: Utc::now(),
            is_system: false,
        }),
    }
}

#[tokio::test]
async fn redelivered_messages_count_once() {
    let backend = MemoryBackend::new();
    let context = start(&backend, session(Role::User)).await;
    let room = Uuid::new_v4();

    let received = Arc::new(Mutex::new(0usize));
    let seen = received.clone();
    context
        .broker()
        .subscribe(SignalKind::MessageReceived, move |_| *seen.lock().unwrap() += 1);

    let event = message_created(room, "is the wifi down?");
    context.handle_event(event.clone());
    context.handle_event(event);

    assert_eq!(context.unread(room), 1);
    assert_eq!(*received.lock().unwrap(), 1);
}

#[tokio::test]
async fn blank_feed_messages_are_dropped() {
    let backend = MemoryBackend::new();
    let context = start(&backend, session(Role::User)).await;
    let room = Uuid::new_v4();

    context.handle_event(message_created(room, "  "));

    assert_eq!(context.unread(room), 0);
    assert!(context.room(room).is_none());
}

#[tokio::test]
async fn messages_for_the_open_room_are_acknowledged_on_arrival() {
    let backend = MemoryBackend::new();
    let room = Uuid::new_v4();
    let other = Uuid::new_v4();
    backend.insert_message(room, other, "hello", &[]).await.unwrap();

    let context = start(&backend, session(Role::Technician)).await;
    context.open_room(room).await;
    assert_eq!(context.open_room_id(), Some(room));

    backend.insert_message(room, other, "still there?", &[]).await.unwrap();

    wait_until("the new message to land", || context.messages(room).len() == 2).await;
    assert_eq!(context.unread(room), 0);
    context.settle().await;
    assert_eq!(backend.counter(room, context.session().user_id), Some(0));

    context.close_room(room);
    backend.insert_message(room, other, "hello?", &[]).await.unwrap();
    wait_until("closed room to count again", || context.unread(room) == 1).await;
}

#[tokio::test]
async fn without_suppression_the_open_room_still_counts() {
    let backend = MemoryBackend::new();
    let room = Uuid::new_v4();
    let other = Uuid::new_v4();
    backend.insert_message(room, other, "hello", &[]).await.unwrap();

    let config = helpdesk_sync::SyncConfig {
        suppress_open_room: false,
        ..config()
    };
    let context = start_with(
        &backend,
        session(Role::User),
        Arc::new(helpdesk_sync::alerts::SilentAlerts),
        config,
    )
    .await;
    context.open_room(room).await;

    backend.insert_message(room, other, "again", &[]).await.unwrap();
    wait_until("the open room to count", || context.unread(room) == 1).await;
}

#[tokio::test]
async fn empty_rooms_are_not_acknowledged() {
    let backend = MemoryBackend::new();
    let room = Uuid::new_v4();
    let context = start(&backend, session(Role::User)).await;

    assert!(context.open_room(room).await.is_empty());
    context.settle().await;
    assert_eq!(backend.upsert_count(), 0);
}

#[tokio::test]
async fn blank_messages_never_leave_the_client() {
    let backend = MemoryBackend::new();
    let room = Uuid::new_v4();
    let context = start(&backend, session(Role::User)).await;

    let err = context.send_message(room, "   \n", Vec::new()).await.unwrap_err();
    assert!(matches!(err, SyncError::EmptyMessage));
    assert!(backend.messages(room).is_empty());
}

#[tokio::test]
async fn failed_sends_are_reported() {
    let backend = MemoryBackend::new();
    let context = start(&backend, session(Role::User)).await;
    backend.fail_message_writes(true);

    let err = context
        .send_message(Uuid::new_v4(), "help", Vec::new())
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Transport(_)));
}

#[tokio::test]
async fn sending_records_an_audit_entry() {
    let backend = MemoryBackend::new();
    let room = Uuid::new_v4();
    let context = start(&backend, session(Role::User)).await;
    let long = "x".repeat(80);

    let sent = context.send_message(room, &long, Vec::new()).await.unwrap();
    context
        .send_message(STAFF_ROOM_ID, "staff only", Vec::new())
        .await
        .unwrap();

    wait_until("both audit entries", || backend.audit_entries().len() == 2).await;
    let entries = backend.audit_entries();
    let ticket_entry = entries
        .iter()
        .find(|e| e.message_id == Some(sent.id))
        .unwrap();
    assert_eq!(ticket_entry.action_type, "chat_message_sent");
    assert_eq!(ticket_entry.ticket_id, Some(room));
    assert_eq!(ticket_entry.user_name, context.session().name);
    assert_eq!(
        ticket_entry.details["preview"],
        json!(format!("{}...", "x".repeat(50)))
    );

    let staff_entry = entries
        .iter()
        .find(|e| e.message_id != Some(sent.id))
        .unwrap();
    assert_eq!(staff_entry.ticket_id, None);
}

#[tokio::test]
async fn deletes_reach_other_sessions_without_touching_counts() {
    let backend = MemoryBackend::new();
    let room = Uuid::new_v4();
    let seed = backend
        .insert_message(room, Uuid::new_v4(), "seed", &[])
        .await
        .unwrap();

    let author = start(&backend, session(Role::User)).await;
    let reader = start(&backend, session(Role::Technician)).await;
    reader.open_room(room).await;
    reader.close_room(room);

    let deleted = Arc::new(Mutex::new(Vec::new()));
    let seen = deleted.clone();
    reader
        .broker()
        .subscribe(SignalKind::MessageDeleted, move |signal| {
            if let SyncSignal::MessageDeleted { message_id, .. } = signal {
                seen.lock().unwrap().push(*message_id);
            }
        });

    let sent = author.send_message(room, "oops", Vec::new()).await.unwrap();
    wait_until("reader to see the message", || reader.messages(room).len() == 2).await;
    assert_eq!(reader.unread(room), 1);

    assert!(author.delete_message(sent.id).await.unwrap());
    wait_until("reader to drop the message", || reader.messages(room).len() == 1).await;

    assert_eq!(reader.unread(room), 1);
    assert_eq!(*deleted.lock().unwrap(), vec![sent.id]);
    let last = reader.room(room).and_then(|r| r.last_message).map(|m| m.id);
    assert_eq!(last, Some(seed.id));

    assert!(!author.delete_message(sent.id).await.unwrap());
}

#[tokio::test]
async fn ticket_activity_notifies_the_people_involved() {
    let backend = MemoryBackend::new();
    let admin = start(&backend, session(Role::Admin)).await;
    let tech = start(&backend, session(Role::Technician)).await;
    let requester = start(&backend, session(Role::User)).await;

    let mut printer = ticket(requester.session().user_id, "Printer jammed");
    backend.publish_raw(ticket_change(ChangeKind::Created, &printer));

    wait_until("staff to hear about the new ticket", || {
        admin.notifications().list().len() == 1 && tech.notifications().list().len() == 1
    })
    .await;
    assert_eq!(admin.notifications().list()[0].kind, NotificationKind::TicketCreated);

    printer.assigned_to = Some(tech.session().user_id);
    printer.status = TicketStatus::InProgress;
    printer.updated_at = Utc::now();
    backend.publish_raw(ticket_change(ChangeKind::Updated, &printer));

    wait_until("assignment and status notices", || {
        tech.notifications().list().len() == 3 && requester.notifications().list().len() == 1
    })
    .await;
    let update = &requester.notifications().list()[0];
    assert_eq!(update.kind, NotificationKind::TicketUpdated);
    assert_eq!(update.message, "\"Printer jammed\" changed to in progress");
    assert!(
        tech.notifications()
            .list()
            .iter()
            .any(|n| n.kind == NotificationKind::TicketAssigned)
    );

    backend.publish_raw(ticket_change(ChangeKind::Deleted, &printer));
    tokio::time::sleep(Duration::from_millis(50)).await;
    admin.settle().await;
    assert_eq!(admin.notifications().list().len(), 1);
    assert_eq!(requester.notifications().unread_count(), 1);
}

#[tokio::test]
async fn alerts_follow_signals() {
    let backend = MemoryBackend::new();
    let alerts = Arc::new(RecordingAlerts::default());
    let me = session(Role::Technician);
    let context = start_with(&backend, me.clone(), alerts.clone(), config()).await;

    let room = Uuid::new_v4();
    context.send_message(room, "mine", Vec::new()).await.unwrap();
    backend.insert_message(room, Uuid::new_v4(), "theirs", &[]).await.unwrap();
    wait_until("one message tone", || alerts.tones().len() == 1).await;
    assert_eq!(alerts.tones(), vec![MESSAGE_TONE]);

    let assigned = {
        let mut t = ticket(Uuid::new_v4(), "VPN down");
        backend.publish_raw(ticket_change(ChangeKind::Created, &t));
        t.assigned_to = Some(me.user_id);
        t
    };
    backend.publish_raw(ticket_change(ChangeKind::Updated, &assigned));

    wait_until("notice for the assignment", || alerts.notices().len() == 2).await;
    assert!(alerts.tones().contains(&NOTIFICATION_TONE));
    let notice: DesktopNotice = alerts.notices()[1].clone();
    assert_eq!(notice.tag, assigned.id);
    assert_eq!(notice.auto_close, Duration::from_secs(5));

    let targets = Arc::new(Mutex::new(Vec::new()));
    let seen = targets.clone();
    context
        .broker()
        .subscribe(SignalKind::NavigateToTicket, move |signal| {
            if let SyncSignal::NavigateToTicket { ticket_id } = signal {
                seen.lock().unwrap().push(*ticket_id);
            }
        });
    context.notice_clicked(&notice);
    assert_eq!(*targets.lock().unwrap(), vec![assigned.id]);
}

#[tokio::test]
async fn notifications_can_be_marked_read() {
    let backend = MemoryBackend::new();
    let admin = start(&backend, session(Role::Admin)).await;

    for title in ["Disk full", "Fan noise"] {
        let t = ticket(Uuid::new_v4(), title);
        backend.publish_raw(ticket_change(ChangeKind::Created, &t));
    }
    wait_until("two notifications", || admin.notifications().unread_count() == 2).await;

    let first = admin.notifications().list()[0].id;
    assert!(admin.notifications().mark_read(first).await.unwrap());
    assert_eq!(admin.notifications().unread_count(), 1);

    assert_eq!(admin.notifications().mark_all_read().await.unwrap(), 1);
    assert_eq!(admin.notifications().unread_count(), 0);
}

#[tokio::test]
async fn transient_subscribe_failures_are_retried() {
    let backend = MemoryBackend::new();
    backend.fail_next_subscribes(2);

    let context = start(&backend, session(Role::User)).await;
    let attempts: usize = EntityKind::ALL
        .iter()
        .map(|kind| backend.subscribe_attempts(*kind))
        .sum();
    assert_eq!(attempts, EntityKind::ALL.len() + 2);

    let room = Uuid::new_v4();
    backend.insert_message(room, Uuid::new_v4(), "made it", &[]).await.unwrap();
    wait_until("message after retries", || context.unread(room) == 1).await;
}

#[tokio::test]
async fn periodic_reconciliation_picks_up_remote_changes() {
    let backend = MemoryBackend::new();
    let me = session(Role::User);
    let room = Uuid::new_v4();
    let config = helpdesk_sync::SyncConfig {
        reconcile_interval: Some(Duration::from_millis(30)),
        ..config()
    };
    let context = start_with(
        &backend,
        me.clone(),
        Arc::new(helpdesk_sync::alerts::SilentAlerts),
        config,
    )
    .await;
    assert_eq!(context.unread(room), 0);

    backend.set_counter(room, me.user_id, 4);
    wait_until("reconciliation", || context.unread(room) == 4).await;
}

#[tokio::test]
async fn teardown_closes_every_feed() {
    let backend = MemoryBackend::new();
    let context = start(&backend, session(Role::User)).await;
    for kind in EntityKind::ALL {
        assert_eq!(backend.open_feeds(kind), 1);
    }

    context.teardown().await;
    for kind in EntityKind::ALL {
        assert_eq!(backend.open_feeds(kind), 0);
    }
}

#[tokio::test]
async fn sessions_survive_a_feed_drop() {
    let backend = MemoryBackend::new();
    let context = start(&backend, session(Role::User)).await;

    backend.drop_feeds();
    wait_until("resubscription", || {
        backend.subscribe_attempts(EntityKind::Message) >= 2
    })
    .await;
    connected(&context).await;

    let room = Uuid::new_v4();
    backend.insert_message(room, Uuid::new_v4(), "back online", &[]).await.unwrap();
    wait_until("message after reconnect", || context.unread(room) == 1).await;
}
