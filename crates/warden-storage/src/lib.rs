//! Warden Storage
//!
//! SQLite persistence for ingested messages and per-chat feature
//! subscriptions. Message upserts are idempotent by message id; rows are
//! never deleted by the normal flow so recovery commands can read them
//! after the original disappears.

use anyhow::Result;
use rusqlite::OptionalExtension;
use std::path::Path;

/// A normalized message as persisted. Exists iff the original carried
/// non-empty text or a resolved media URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    pub message_id: String,
    pub chat_id: String,
    pub sender_id: String,
    pub timestamp: i64,
    pub text: String,
    pub media_url: Option<String>,
    pub mime_type: Option<String>,
    pub is_view_once: bool,
}

/// Subscription kinds share one table but live in disjoint namespaces;
/// enabling one never implies the other.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionKind {
    AntiDelete,
    AntiLink,
}

impl SubscriptionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AntiDelete => "antidelete",
            Self::AntiLink => "antilink",
        }
    }
}

pub struct Storage {
    conn: rusqlite::Connection,
}

impl Storage {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = rusqlite::Connection::open(db_path.as_ref())?;

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS messages (
                message_id TEXT PRIMARY KEY,
                chat_id TEXT NOT NULL,
                sender_id TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                text TEXT NOT NULL DEFAULT '',
                media_url TEXT,
                mime_type TEXT,
                is_view_once INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX IF NOT EXISTS idx_messages_chat_view_once
            ON messages(chat_id, is_view_once, timestamp);

            CREATE TABLE IF NOT EXISTS subscriptions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                kind TEXT NOT NULL,
                chat_id TEXT NOT NULL,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );

            CREATE UNIQUE INDEX IF NOT EXISTS idx_subscriptions_unique
            ON subscriptions(kind, chat_id);
            ",
        )?;

        Ok(Self { conn })
    }

    /// Idempotent by message id; repeat sightings overwrite every field.
    pub fn upsert_message(&self, msg: &StoredMessage) -> Result<()> {
        self.conn.execute(
            "INSERT INTO messages (message_id, chat_id, sender_id, timestamp, text, media_url, mime_type, is_view_once)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(message_id) DO UPDATE SET
                chat_id = excluded.chat_id,
                sender_id = excluded.sender_id,
                timestamp = excluded.timestamp,
                text = excluded.text,
                media_url = excluded.media_url,
                mime_type = excluded.mime_type,
                is_view_once = excluded.is_view_once",
            (
                &msg.message_id,
                &msg.chat_id,
                &msg.sender_id,
                msg.timestamp,
                &msg.text,
                &msg.media_url,
                &msg.mime_type,
                msg.is_view_once,
            ),
        )?;
        Ok(())
    }

    pub fn find_by_id(&self, message_id: &str) -> Result<Option<StoredMessage>> {
        let mut stmt = self.conn.prepare(
            "SELECT message_id, chat_id, sender_id, timestamp, text, media_url, mime_type, is_view_once
             FROM messages WHERE message_id = ?1",
        )?;
        let row = stmt
            .query_row([message_id], Self::row_to_message)
            .optional()?;
        Ok(row)
    }

    /// Most recent view-once record in a chat, by timestamp descending.
    pub fn find_latest_view_once(&self, chat_id: &str) -> Result<Option<StoredMessage>> {
        let mut stmt = self.conn.prepare(
            "SELECT message_id, chat_id, sender_id, timestamp, text, media_url, mime_type, is_view_once
             FROM messages
             WHERE chat_id = ?1 AND is_view_once = 1
             ORDER BY timestamp DESC
             LIMIT 1",
        )?;
        let row = stmt.query_row([chat_id], Self::row_to_message).optional()?;
        Ok(row)
    }

    pub fn set_subscription(&self, kind: SubscriptionKind, chat_id: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO subscriptions (kind, chat_id) VALUES (?1, ?2)
             ON CONFLICT(kind, chat_id) DO NOTHING",
            (kind.as_str(), chat_id),
        )?;
        Ok(())
    }

    pub fn clear_subscription(&self, kind: SubscriptionKind, chat_id: &str) -> Result<()> {
        self.conn.execute(
            "DELETE FROM subscriptions WHERE kind = ?1 AND chat_id = ?2",
            (kind.as_str(), chat_id),
        )?;
        Ok(())
    }

    pub fn has_subscription(&self, kind: SubscriptionKind, chat_id: &str) -> Result<bool> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM subscriptions WHERE kind = ?1 AND chat_id = ?2",
                (kind.as_str(), chat_id),
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredMessage> {
        Ok(StoredMessage {
            message_id: row.get(0)?,
            chat_id: row.get(1)?,
            sender_id: row.get(2)?,
            timestamp: row.get(3)?,
            text: row.get(4)?,
            media_url: row.get(5)?,
            mime_type: row.get(6)?,
            is_view_once: row.get(7)?,
        })
    }
}
