use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Room id of the staff-only channel. It is not bound to any ticket.
pub const STAFF_ROOM_ID: Uuid = Uuid::from_u128(0x999);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Technician,
    Admin,
}

impl Role {
    /// Technicians and admins.
    pub fn is_staff(self) -> bool {
        matches!(self, Self::Technician | Self::Admin)
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "user" => Ok(Self::User),
            "technician" => Ok(Self::Technician),
            "admin" => Ok(Self::Admin),
            other => Err(format!("unknown role '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TicketStatus {
    Open,
    InProgress,
    Resolved,
    Closed,
}

impl TicketStatus {
    /// Human-readable label used in notification bodies.
    pub fn label(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::InProgress => "in progress",
            Self::Resolved => "resolved",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TicketPriority {
    Low,
    Medium,
    High,
    Urgent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
    pub id: Uuid,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub status: TicketStatus,
    pub priority: TicketPriority,
    #[serde(default)]
    pub category: String,
    pub created_by: Uuid,
    #[serde(default)]
    pub assigned_to: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Attachment metadata. The bytes live in object storage, never here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileAttachment {
    pub id: String,
    pub name: String,
    pub size: u64,
    #[serde(rename = "type")]
    pub mime_type: String,
    pub url: String,
    pub uploaded_by: Uuid,
    pub uploaded_at: DateTime<Utc>,
}

/// One chat message. The room id is the ticket id (or [`STAFF_ROOM_ID`]),
/// which is why it travels as `ticket_id` on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: Uuid,
    #[serde(rename = "ticket_id")]
    pub room_id: Uuid,
    pub sender_id: Uuid,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub attachments: Vec<FileAttachment>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub is_system: bool,
}

impl ChatMessage {
    /// A message needs text or at least one attachment.
    pub fn is_blank(content: &str, attachments: &[FileAttachment]) -> bool {
        content.trim().is_empty() && attachments.is_empty()
    }
}

/// Client-side view of one conversation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatRoom {
    pub room_id: Uuid,
    /// Insertion-ordered, no duplicates.
    pub participants: Vec<Uuid>,
    pub unread: HashMap<Uuid, u32>,
    pub last_message: Option<ChatMessage>,
}

impl ChatRoom {
    pub fn new(room_id: Uuid) -> Self {
        Self {
            room_id,
            ..Default::default()
        }
    }

    pub fn add_participant(&mut self, user_id: Uuid) {
        if !self.participants.contains(&user_id) {
            self.participants.push(user_id);
        }
    }

    pub fn unread_for(&self, user_id: Uuid) -> u32 {
        self.unread.get(&user_id).copied().unwrap_or(0)
    }

    pub fn is_staff_channel(&self) -> bool {
        self.room_id == STAFF_ROOM_ID
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NotificationKind {
    TicketAssigned,
    TicketUpdated,
    NewMessage,
    TicketCreated,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub ticket_id: Uuid,
    pub user_id: Uuid,
    #[serde(default)]
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

/// A notification that has not been persisted yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NotificationDraft {
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub ticket_id: Uuid,
    pub user_id: Uuid,
}

/// Durable unread counter row, one per (room, user).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnreadCounter {
    pub room_id: Uuid,
    pub user_id: Uuid,
    pub unread_count: i64,
    pub updated_at: DateTime<Utc>,
}
