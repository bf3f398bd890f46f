//! Which ticket activity produces a notification for the session user.

use std::collections::HashMap;

use uuid::Uuid;

use helpdesk_types::events::{ChangeKind, EntityRecord, RealtimeEvent};
use helpdesk_types::models::{NotificationDraft, NotificationKind, Role, Ticket, TicketStatus};

const PREVIEW_CHARS: usize = 50;

#[derive(Debug, Clone, PartialEq)]
pub enum TicketActivity {
    Created(Ticket),
    Assigned { ticket: Ticket, assignee: Uuid },
    StatusChanged { ticket: Ticket, from: TicketStatus },
    Deleted { ticket_id: Uuid },
}

/// Remembers the last seen version of each ticket so updates can be diffed.
#[derive(Debug, Default)]
pub struct TicketWatcher {
    snapshots: HashMap<Uuid, Ticket>,
}

impl TicketWatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn remember(&mut self, ticket: Ticket) {
        self.snapshots.insert(ticket.id, ticket);
    }

    /// Activities carried by one ticket change. An update for a ticket seen
    /// for the first time only seeds the cache.
    pub fn observe(&mut self, event: &RealtimeEvent) -> Vec<TicketActivity> {
        match (&event.record, event.change) {
            (EntityRecord::Ticket(ticket), ChangeKind::Created) => {
                self.remember(ticket.clone());
                vec![TicketActivity::Created(ticket.clone())]
            }
            (EntityRecord::Ticket(ticket), _) => {
                let previous = self.snapshots.insert(ticket.id, ticket.clone());
                let Some(previous) = previous else {
                    return Vec::new();
                };

                let mut activities = Vec::new();
                if let Some(assignee) = ticket.assigned_to {
                    if previous.assigned_to != Some(assignee) {
                        activities.push(TicketActivity::Assigned {
                            ticket: ticket.clone(),
                            assignee,
                        });
                    }
                }
                if previous.status != ticket.status {
                    activities.push(TicketActivity::StatusChanged {
                        ticket: ticket.clone(),
                        from: previous.status,
                    });
                }
                activities
            }
            (EntityRecord::Removed(removed), ChangeKind::Deleted) => {
                self.snapshots.remove(&removed.id);
                vec![TicketActivity::Deleted {
                    ticket_id: removed.id,
                }]
            }
            _ => Vec::new(),
        }
    }
}

/// Notification for `user_id` (acting as `role`), if this activity concerns them.
pub fn draft_for(activity: &TicketActivity, user_id: Uuid, role: Role) -> Option<NotificationDraft> {
    match activity {
        TicketActivity::Created(ticket) => {
            if !role.is_staff() || ticket.created_by == user_id {
                return None;
            }
            Some(NotificationDraft {
                kind: NotificationKind::TicketCreated,
                title: "New ticket created".into(),
                message: format!("A user opened: {}", ticket.title),
                ticket_id: ticket.id,
                user_id,
            })
        }
        TicketActivity::Assigned { ticket, assignee } => {
            (*assignee == user_id).then(|| NotificationDraft {
                kind: NotificationKind::TicketAssigned,
                title: "Ticket assigned".into(),
                message: format!("You have been assigned ticket: {}", ticket.title),
                ticket_id: ticket.id,
                user_id,
            })
        }
        TicketActivity::StatusChanged { ticket, .. } => {
            let involved = ticket.created_by == user_id || ticket.assigned_to == Some(user_id);
            involved.then(|| NotificationDraft {
                kind: NotificationKind::TicketUpdated,
                title: "Ticket status updated".into(),
                message: format!("\"{}\" changed to {}", ticket.title, ticket.status.label()),
                ticket_id: ticket.id,
                user_id,
            })
        }
        TicketActivity::Deleted { ticket_id } => {
            (role == Role::Admin).then(|| NotificationDraft {
                kind: NotificationKind::TicketUpdated,
                title: "Ticket deleted".into(),
                message: format!("Ticket #{} has been deleted", short_id(*ticket_id)),
                ticket_id: *ticket_id,
                user_id,
            })
        }
    }
}

/// Deleted-ticket notices are never stored; the ticket is already gone.
pub fn is_suppressed(draft: &NotificationDraft) -> bool {
    draft.kind == NotificationKind::TicketUpdated
        && draft.message.to_lowercase().contains("has been deleted")
}

/// First 50 characters, with "..." when cut.
pub fn preview(content: &str) -> String {
    match content.char_indices().nth(PREVIEW_CHARS) {
        Some((idx, _)) => format!("{}...", &content[..idx]),
        None => content.to_string(),
    }
}

fn short_id(id: Uuid) -> String {
    id.simple().to_string()[..6].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use helpdesk_types::events::{EntityKind, RemovedRecord};
    use helpdesk_types::models::TicketPriority;

    fn ticket(created_by: Uuid) -> Ticket {
        let now = Utc::now();
        Ticket {
            id: Uuid::new_v4(),
            title: "Printer jammed".into(),
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

    fn event(change: ChangeKind, record: EntityRecord) -> RealtimeEvent {
        RealtimeEvent {
            kind: EntityKind::Ticket,
            change,
            record,
        }
    }

    #[test]
    fn new_tickets_notify_staff_only() {
        let me = Uuid::new_v4();
        let created = TicketActivity::Created(ticket(Uuid::new_v4()));

        assert!(draft_for(&created, me, Role::Technician).is_some());
        assert!(draft_for(&created, me, Role::Admin).is_some());
        assert!(draft_for(&created, me, Role::User).is_none());
    }

    #[test]
    fn update_diff_yields_assignment_and_status() {
        let mut watcher = TicketWatcher::new();
        let tech = Uuid::new_v4();
        let original = ticket(Uuid::new_v4());
        watcher.observe(&event(ChangeKind::Created, EntityRecord::Ticket(original.clone())));

        let mut updated = original.clone();
        updated.assigned_to = Some(tech);
        updated.status = TicketStatus::InProgress;
        let activities = watcher.observe(&event(ChangeKind::Updated, EntityRecord::Ticket(updated)));

        assert_eq!(activities.len(), 2);
        let assigned = draft_for(&activities[0], tech, Role::Technician).unwrap();
        assert_eq!(assigned.kind, NotificationKind::TicketAssigned);
        let status = draft_for(&activities[1], tech, Role::Technician).unwrap();
        assert!(status.message.ends_with("changed to in progress"));
    }

    #[test]
    fn unseen_update_only_seeds() {
        let mut watcher = TicketWatcher::new();
        let t = ticket(Uuid::new_v4());
        assert!(watcher.observe(&event(ChangeKind::Updated, EntityRecord::Ticket(t))).is_empty());
    }

    #[test]
    fn status_change_skips_bystanders() {
        let creator = Uuid::new_v4();
        let mut t = ticket(creator);
        t.status = TicketStatus::Resolved;
        let activity = TicketActivity::StatusChanged {
            ticket: t,
            from: TicketStatus::Open,
        };

        assert!(draft_for(&activity, creator, Role::User).is_some());
        assert!(draft_for(&activity, Uuid::new_v4(), Role::Admin).is_none());
    }

    #[test]
    fn deleted_ticket_draft_is_suppressed() {
        let mut watcher = TicketWatcher::new();
        let id = Uuid::new_v4();
        let activities = watcher.observe(&event(
            ChangeKind::Deleted,
            EntityRecord::Removed(RemovedRecord { id, room_id: None }),
        ));

        let draft = draft_for(&activities[0], Uuid::new_v4(), Role::Admin).unwrap();
        assert!(is_suppressed(&draft));
        assert!(draft_for(&activities[0], Uuid::new_v4(), Role::Technician).is_none());
    }

    #[test]
    fn preview_truncates_long_content() {
        assert_eq!(preview("short"), "short");
        let long = "x".repeat(60);
        assert_eq!(preview(&long), format!("{}...", "x".repeat(50)));
    }
}
