use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS tickets (
            id          TEXT PRIMARY KEY,
            title       TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            status      TEXT NOT NULL DEFAULT 'open',
            priority    TEXT NOT NULL DEFAULT 'medium',
            category    TEXT NOT NULL DEFAULT '',
            created_by  TEXT NOT NULL,
            assigned_to TEXT,
            created_at  TEXT NOT NULL,
            updated_at  TEXT NOT NULL
        );

        -- ticket_id is the room id; the staff channel has no ticket row
        CREATE TABLE IF NOT EXISTS chat_messages (
            id          TEXT PRIMARY KEY,
            ticket_id   TEXT NOT NULL,
            sender_id   TEXT NOT NULL,
            content     TEXT NOT NULL DEFAULT '',
            attachments TEXT NOT NULL DEFAULT '[]',
            is_system   INTEGER NOT NULL DEFAULT 0,
            created_at  TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_chat_messages_room
            ON chat_messages(ticket_id, created_at);

        CREATE TABLE IF NOT EXISTS chat_room_unread (
            id           TEXT PRIMARY KEY,
            room_id      TEXT NOT NULL,
            user_id      TEXT NOT NULL,
            unread_count INTEGER NOT NULL DEFAULT 0,
            updated_at   TEXT NOT NULL,
            UNIQUE(room_id, user_id)
        );

        CREATE INDEX IF NOT EXISTS idx_chat_room_unread_user
            ON chat_room_unread(user_id);

        CREATE TABLE IF NOT EXISTS notifications (
            id          TEXT PRIMARY KEY,
            type        TEXT NOT NULL,
            title       TEXT NOT NULL,
            message     TEXT NOT NULL,
            ticket_id   TEXT NOT NULL,
            user_id     TEXT NOT NULL,
            is_read     INTEGER NOT NULL DEFAULT 0,
            created_at  TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_notifications_user
            ON notifications(user_id, created_at);

        CREATE TABLE IF NOT EXISTS audit_logs (
            id          TEXT PRIMARY KEY,
            user_id     TEXT NOT NULL,
            user_name   TEXT NOT NULL,
            action_type TEXT NOT NULL,
            ticket_id   TEXT,
            message_id  TEXT,
            details     TEXT NOT NULL DEFAULT '{}',
            created_at  TEXT NOT NULL
        );
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
