use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{FileAttachment, TicketPriority, TicketStatus};

// -- Messages --

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendMessageRequest {
    pub sender_id: Uuid,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub attachments: Vec<FileAttachment>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteResponse {
    pub deleted: bool,
}

// -- Unread counters --

/// One row of `readAll(user)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CounterRow {
    pub room_id: Uuid,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpsertCounterRequest {
    pub count: i64,
}

// -- Notifications --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkAllReadResponse {
    pub updated: usize,
}

// -- Tickets --

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateTicketRequest {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub priority: TicketPriority,
    #[serde(default)]
    pub category: String,
    pub created_by: Uuid,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateTicketRequest {
    #[serde(default)]
    pub status: Option<TicketStatus>,
    #[serde(default)]
    pub assigned_to: Option<Uuid>,
}

// -- Audit --

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuditEntryRequest {
    pub user_id: Uuid,
    pub user_name: String,
    pub action_type: String,
    #[serde(default)]
    pub ticket_id: Option<Uuid>,
    #[serde(default)]
    pub message_id: Option<Uuid>,
    #[serde(default)]
    pub details: serde_json::Value,
}
