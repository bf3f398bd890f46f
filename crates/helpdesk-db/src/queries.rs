use crate::Database;
use crate::models::{CounterRow, MessageRow, NotificationRow, TicketRow, encode_label};
use anyhow::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, Row};
use uuid::Uuid;

use helpdesk_types::api::AuditEntryRequest;
use helpdesk_types::models::{
    ChatMessage, Notification, Ticket, TicketStatus, UnreadCounter,
};

const TICKET_COLUMNS: &str = "id, title, description, status, priority, category, created_by, assigned_to, created_at, updated_at";
const MESSAGE_COLUMNS: &str = "id, ticket_id, sender_id, content, attachments, is_system, created_at";
const COUNTER_COLUMNS: &str = "id, room_id, user_id, unread_count, updated_at";
const NOTIFICATION_COLUMNS: &str = "id, type, title, message, ticket_id, user_id, is_read, created_at";

impl Database {
    // -- Tickets --

    pub fn insert_ticket(&self, ticket: &Ticket) -> Result<()> {
        let status = encode_label(&ticket.status)?;
        let priority = encode_label(&ticket.priority)?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO tickets (id, title, description, status, priority, category, created_by, assigned_to, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                rusqlite::params![
                    ticket.id.to_string(),
                    ticket.title,
                    ticket.description,
                    status,
                    priority,
                    ticket.category,
                    ticket.created_by.to_string(),
                    ticket.assigned_to.map(|id| id.to_string()),
                    stamp(&ticket.created_at),
                    stamp(&ticket.updated_at),
                ],
            )?;
            Ok(())
        })
    }

    pub fn list_tickets(&self) -> Result<Vec<Ticket>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {} FROM tickets ORDER BY created_at DESC", TICKET_COLUMNS);
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([], ticket_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows.into_iter().map(Ticket::try_from).collect()
        })
    }

    pub fn get_ticket(&self, id: Uuid) -> Result<Option<Ticket>> {
        self.with_conn(|conn| query_ticket(conn, id))
    }

    /// Apply a status and/or assignee change. Returns the updated ticket, or
    /// `None` if no such ticket exists.
    pub fn update_ticket(
        &self,
        id: Uuid,
        status: Option<TicketStatus>,
        assigned_to: Option<Uuid>,
    ) -> Result<Option<Ticket>> {
        let status = status.as_ref().map(encode_label).transpose()?;
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE tickets
                 SET status = COALESCE(?2, status),
                     assigned_to = COALESCE(?3, assigned_to),
                     updated_at = ?4
                 WHERE id = ?1",
                rusqlite::params![
                    id.to_string(),
                    status,
                    assigned_to.map(|u| u.to_string()),
                    stamp(&Utc::now()),
                ],
            )?;
            if changed == 0 {
                return Ok(None);
            }
            query_ticket(conn, id)
        })
    }

    pub fn delete_ticket(&self, id: Uuid) -> Result<bool> {
        self.with_conn(|conn| {
            let deleted = conn.execute("DELETE FROM tickets WHERE id = ?1", [id.to_string()])?;
            Ok(deleted > 0)
        })
    }

    // -- Chat messages --

    pub fn insert_message(&self, message: &ChatMessage) -> Result<()> {
        let attachments = serde_json::to_string(&message.attachments)?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO chat_messages (id, ticket_id, sender_id, content, attachments, is_system, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    message.id.to_string(),
                    message.room_id.to_string(),
                    message.sender_id.to_string(),
                    message.content,
                    attachments,
                    message.is_system,
                    stamp(&message.created_at),
                ],
            )?;
            Ok(())
        })
    }

    /// All messages of a room, oldest first.
    pub fn list_messages(&self, room_id: Uuid) -> Result<Vec<ChatMessage>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM chat_messages WHERE ticket_id = ?1 ORDER BY created_at ASC",
                MESSAGE_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([room_id.to_string()], message_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows.into_iter().map(ChatMessage::try_from).collect()
        })
    }

    /// Delete a message and hand back what was removed.
    pub fn delete_message(&self, id: Uuid) -> Result<Option<ChatMessage>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {} FROM chat_messages WHERE id = ?1", MESSAGE_COLUMNS);
            let existing = conn
                .query_row(&sql, [id.to_string()], message_row)
                .optional()?;

            let Some(row) = existing else {
                return Ok(None);
            };

            conn.execute("DELETE FROM chat_messages WHERE id = ?1", [id.to_string()])?;
            Ok(Some(ChatMessage::try_from(row)?))
        })
    }

    // -- Unread counters --

    pub fn read_counters(&self, user_id: Uuid) -> Result<Vec<UnreadCounter>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {} FROM chat_room_unread WHERE user_id = ?1", COUNTER_COLUMNS);
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([user_id.to_string()], counter_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows.into_iter().map(UnreadCounter::try_from).collect()
        })
    }

    /// Set the counter for (room, user), creating the row on first write.
    /// Returns the stored counter and whether the row was created.
    pub fn upsert_counter(&self, room_id: Uuid, user_id: Uuid, count: i64) -> Result<(UnreadCounter, bool)> {
        self.with_conn(|conn| {
            let existed: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM chat_room_unread WHERE room_id = ?1 AND user_id = ?2)",
                [room_id.to_string(), user_id.to_string()],
                |row| row.get(0),
            )?;

            conn.execute(
                "INSERT INTO chat_room_unread (id, room_id, user_id, unread_count, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(room_id, user_id) DO UPDATE
                 SET unread_count = excluded.unread_count,
                     updated_at = excluded.updated_at",
                rusqlite::params![
                    Uuid::new_v4().to_string(),
                    room_id.to_string(),
                    user_id.to_string(),
                    count,
                    stamp(&Utc::now()),
                ],
            )?;

            let sql = format!(
                "SELECT {} FROM chat_room_unread WHERE room_id = ?1 AND user_id = ?2",
                COUNTER_COLUMNS
            );
            let row = conn.query_row(&sql, [room_id.to_string(), user_id.to_string()], counter_row)?;
            Ok((UnreadCounter::try_from(row)?, !existed))
        })
    }

    // -- Notifications --

    pub fn insert_notification(&self, notification: &Notification) -> Result<()> {
        let kind = encode_label(&notification.kind)?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO notifications (id, type, title, message, ticket_id, user_id, is_read, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                rusqlite::params![
                    notification.id.to_string(),
                    kind,
                    notification.title,
                    notification.message,
                    notification.ticket_id.to_string(),
                    notification.user_id.to_string(),
                    notification.is_read,
                    stamp(&notification.created_at),
                ],
            )?;
            Ok(())
        })
    }

    /// Newest first.
    pub fn list_notifications(&self, user_id: Uuid) -> Result<Vec<Notification>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM notifications WHERE user_id = ?1 ORDER BY created_at DESC",
                NOTIFICATION_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([user_id.to_string()], notification_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows.into_iter().map(Notification::try_from).collect()
        })
    }

    pub fn mark_notification_read(&self, id: Uuid) -> Result<Option<Notification>> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE notifications SET is_read = 1 WHERE id = ?1",
                [id.to_string()],
            )?;
            if changed == 0 {
                return Ok(None);
            }

            let sql = format!("SELECT {} FROM notifications WHERE id = ?1", NOTIFICATION_COLUMNS);
            let row = conn.query_row(&sql, [id.to_string()], notification_row)?;
            Ok(Some(Notification::try_from(row)?))
        })
    }

    /// Mark every unread notification of `user_id` as read and return the
    /// rows that flipped.
    pub fn mark_all_notifications_read(&self, user_id: Uuid) -> Result<Vec<Notification>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM notifications WHERE user_id = ?1 AND is_read = 0",
                NOTIFICATION_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([user_id.to_string()], notification_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            conn.execute(
                "UPDATE notifications SET is_read = 1 WHERE user_id = ?1 AND is_read = 0",
                [user_id.to_string()],
            )?;

            rows.into_iter()
                .map(|row| {
                    let mut n = Notification::try_from(row)?;
                    n.is_read = true;
                    Ok(n)
                })
                .collect()
        })
    }

    // -- Audit --

    pub fn insert_audit(&self, entry: &AuditEntryRequest) -> Result<Uuid> {
        let id = Uuid::new_v4();
        let details = serde_json::to_string(&entry.details)?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO audit_logs (id, user_id, user_name, action_type, ticket_id, message_id, details, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                rusqlite::params![
                    id.to_string(),
                    entry.user_id.to_string(),
                    entry.user_name,
                    entry.action_type,
                    entry.ticket_id.map(|t| t.to_string()),
                    entry.message_id.map(|m| m.to_string()),
                    details,
                    stamp(&Utc::now()),
                ],
            )?;
            Ok(id)
        })
    }

    pub fn count_audit_entries(&self) -> Result<i64> {
        self.with_conn(|conn| {
            Ok(conn.query_row("SELECT COUNT(*) FROM audit_logs", [], |row| row.get(0))?)
        })
    }
}

/// Fixed-width UTC timestamps so text ordering matches time ordering.
fn stamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn query_ticket(conn: &Connection, id: Uuid) -> Result<Option<Ticket>> {
    let sql = format!("SELECT {} FROM tickets WHERE id = ?1", TICKET_COLUMNS);
    let row = conn.query_row(&sql, [id.to_string()], ticket_row).optional()?;
    row.map(Ticket::try_from).transpose()
}

fn ticket_row(row: &Row<'_>) -> rusqlite::Result<TicketRow> {
    Ok(TicketRow {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        status: row.get(3)?,
        priority: row.get(4)?,
        category: row.get(5)?,
        created_by: row.get(6)?,
        assigned_to: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

fn message_row(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        ticket_id: row.get(1)?,
        sender_id: row.get(2)?,
        content: row.get(3)?,
        attachments: row.get(4)?,
        is_system: row.get(5)?,
        created_at: row.get(6)?,
    })
}

fn counter_row(row: &Row<'_>) -> rusqlite::Result<CounterRow> {
    Ok(CounterRow {
        id: row.get(0)?,
        room_id: row.get(1)?,
        user_id: row.get(2)?,
        unread_count: row.get(3)?,
        updated_at: row.get(4)?,
    })
}

fn notification_row(row: &Row<'_>) -> rusqlite::Result<NotificationRow> {
    Ok(NotificationRow {
        id: row.get(0)?,
        kind: row.get(1)?,
        title: row.get(2)?,
        message: row.get(3)?,
        ticket_id: row.get(4)?,
        user_id: row.get(5)?,
        is_read: row.get(6)?,
        created_at: row.get(7)?,
    })
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
