//! Database row types. These map directly to SQLite rows and are converted
//! into helpdesk-types models at the edge, so a corrupt row surfaces as an
//! error instead of a panic.

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use uuid::Uuid;

use helpdesk_types::models::{ChatMessage, Notification, Ticket, UnreadCounter};

pub struct TicketRow {
    pub id: String,
    pub title: String,
    pub description: String,
    pub status: String,
    pub priority: String,
    pub category: String,
    pub created_by: String,
    pub assigned_to: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

pub struct MessageRow {
    pub id: String,
    pub ticket_id: String,
    pub sender_id: String,
    pub content: String,
    pub attachments: String,
    pub is_system: bool,
    pub created_at: String,
}

pub struct CounterRow {
    pub id: String,
    pub room_id: String,
    pub user_id: String,
    pub unread_count: i64,
    pub updated_at: String,
}

pub struct NotificationRow {
    pub id: String,
    pub kind: String,
    pub title: String,
    pub message: String,
    pub ticket_id: String,
    pub user_id: String,
    pub is_read: bool,
    pub created_at: String,
}

impl TryFrom<TicketRow> for Ticket {
    type Error = anyhow::Error;

    fn try_from(row: TicketRow) -> Result<Self> {
        Ok(Ticket {
            id: parse_id(&row.id)?,
            title: row.title,
            description: row.description,
            status: decode_label(&row.status)?,
            priority: decode_label(&row.priority)?,
            category: row.category,
            created_by: parse_id(&row.created_by)?,
            assigned_to: row.assigned_to.as_deref().map(parse_id).transpose()?,
            created_at: parse_timestamp(&row.created_at)?,
            updated_at: parse_timestamp(&row.updated_at)?,
        })
    }
}

impl TryFrom<MessageRow> for ChatMessage {
    type Error = anyhow::Error;

    fn try_from(row: MessageRow) -> Result<Self> {
        let attachments = serde_json::from_str(&row.attachments)
            .with_context(|| format!("corrupt attachments on message '{}'", row.id))?;

        Ok(ChatMessage {
            id: parse_id(&row.id)?,
            room_id: parse_id(&row.ticket_id)?,
            sender_id: parse_id(&row.sender_id)?,
            content: row.content,
            attachments,
            created_at: parse_timestamp(&row.created_at)?,
            is_system: row.is_system,
        })
    }
}

impl TryFrom<CounterRow> for UnreadCounter {
    type Error = anyhow::Error;

    fn try_from(row: CounterRow) -> Result<Self> {
        Ok(UnreadCounter {
            room_id: parse_id(&row.room_id)?,
            user_id: parse_id(&row.user_id)?,
            unread_count: row.unread_count,
            updated_at: parse_timestamp(&row.updated_at)?,
        })
    }
}

impl TryFrom<NotificationRow> for Notification {
    type Error = anyhow::Error;

    fn try_from(row: NotificationRow) -> Result<Self> {
        Ok(Notification {
            id: parse_id(&row.id)?,
            kind: decode_label(&row.kind)?,
            title: row.title,
            message: row.message,
            ticket_id: parse_id(&row.ticket_id)?,
            user_id: parse_id(&row.user_id)?,
            is_read: row.is_read,
            created_at: parse_timestamp(&row.created_at)?,
        })
    }
}

pub(crate) fn parse_id(raw: &str) -> Result<Uuid> {
    raw.parse().map_err(|e| anyhow!("corrupt id '{}': {}", raw, e))
}

/// Accepts RFC 3339 and SQLite's `datetime('now')` format, which has no zone.
pub(crate) fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    raw.parse::<DateTime<Utc>>()
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc()))
        .map_err(|e| anyhow!("corrupt timestamp '{}': {}", raw, e))
}

/// Serde name of a unit enum variant, e.g. `TicketStatus::InProgress` -> `in-progress`.
pub(crate) fn encode_label<T: Serialize>(value: &T) -> Result<String> {
    match serde_json::to_value(value)? {
        serde_json::Value::String(s) => Ok(s),
        other => Err(anyhow!("expected a string label, got {}", other)),
    }
}

pub(crate) fn decode_label<T: DeserializeOwned>(raw: &str) -> Result<T> {
    serde_json::from_value(serde_json::Value::String(raw.to_string()))
        .map_err(|e| anyhow!("unknown label '{}': {}", raw, e))
}
