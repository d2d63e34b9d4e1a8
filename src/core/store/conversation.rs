use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "system" => Some(Role::System),
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            _ => None,
        }
    }
}

/// One message in a conversation. Immutable once appended; only ever handed
/// out by value through the store API.
#[derive(Debug, Clone)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub metadata: Option<serde_json::Value>,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
            metadata: None,
        }
    }
}

/// Per-conversation bounded history with a sliding TTL. Keyed by the
/// normalized end-user address. A record that has not been mutated within
/// the TTL window is treated as absent; every mutation resets the window.
/// Stale sessions self-evict without an explicit sweep.
pub struct ConversationStore {
    conn: Arc<Mutex<Connection>>,
    max_history: usize,
    ttl: Duration,
}

impl ConversationStore {
    pub fn new(conn: Arc<Mutex<Connection>>, max_history: usize, ttl: Duration) -> Self {
        Self {
            conn,
            max_history,
            ttl,
        }
    }

    /// Append a turn to the tail, trim the head down to max history, and
    /// reset the TTL. An expired record is wiped before the append so the
    /// conversation restarts from this turn.
    pub async fn append(&self, conversation_id: &str, turn: ChatTurn) -> Result<()> {
        let conn = self.conn.lock().await;
        let now = Utc::now();

        if Self::is_expired(&conn, conversation_id, now)? {
            Self::delete(&conn, conversation_id)?;
        }

        let metadata = turn
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        conn.execute(
            "INSERT INTO conversation_turns (conversation_id, role, content, metadata, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                conversation_id,
                turn.role.as_str(),
                turn.content,
                metadata,
                turn.timestamp.to_rfc3339()
            ],
        )?;

        // Trim only from the head: keep the newest max_history rows.
        conn.execute(
            "DELETE FROM conversation_turns
             WHERE conversation_id = ?1 AND id NOT IN (
                 SELECT id FROM conversation_turns
                 WHERE conversation_id = ?1
                 ORDER BY id DESC LIMIT ?2
             )",
            params![conversation_id, self.max_history as i64],
        )?;

        let expires_at = (now + self.ttl).to_rfc3339();
        conn.execute(
            "INSERT INTO conversation_meta (conversation_id, expires_at) VALUES (?1, ?2)
             ON CONFLICT(conversation_id) DO UPDATE SET expires_at = excluded.expires_at",
            params![conversation_id, expires_at],
        )?;

        Ok(())
    }

    /// Turns in chronological order, at most `limit` (default: max history).
    /// An unknown or expired conversation yields an empty list, not an error.
    pub async fn history(
        &self,
        conversation_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<ChatTurn>> {
        let conn = self.conn.lock().await;
        if Self::is_expired(&conn, conversation_id, Utc::now())? {
            return Ok(Vec::new());
        }

        let limit = limit.unwrap_or(self.max_history);
        let mut stmt = conn.prepare(
            "SELECT role, content, metadata, created_at FROM conversation_turns
             WHERE conversation_id = ?1 ORDER BY id DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![conversation_id, limit as i64], |row| {
            let role: String = row.get(0)?;
            let metadata: Option<String> = row.get(2)?;
            let created_at: String = row.get(3)?;
            Ok((role, row.get::<_, String>(1)?, metadata, created_at))
        })?;

        let mut turns = Vec::new();
        for row in rows {
            let (role, content, metadata, created_at) = row?;
            turns.push(ChatTurn {
                role: Role::parse(&role).unwrap_or(Role::User),
                content,
                timestamp: created_at
                    .parse::<DateTime<Utc>>()
                    .unwrap_or_else(|_| Utc::now()),
                metadata: metadata.and_then(|m| serde_json::from_str(&m).ok()),
            });
        }
        turns.reverse();
        Ok(turns)
    }

    /// Delete the record. No-op if absent.
    pub async fn clear(&self, conversation_id: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        Self::delete(&conn, conversation_id)
    }

    fn is_expired(conn: &Connection, conversation_id: &str, now: DateTime<Utc>) -> Result<bool> {
        let expires_at: Option<String> = conn
            .query_row(
                "SELECT expires_at FROM conversation_meta WHERE conversation_id = ?1",
                params![conversation_id],
                |row| row.get(0),
            )
            .optional()?;
        match expires_at.and_then(|s| s.parse::<DateTime<Utc>>().ok()) {
            Some(expires_at) => Ok(expires_at <= now),
            None => Ok(false),
        }
    }

    fn delete(conn: &Connection, conversation_id: &str) -> Result<()> {
        conn.execute(
            "DELETE FROM conversation_turns WHERE conversation_id = ?1",
            params![conversation_id],
        )?;
        conn.execute(
            "DELETE FROM conversation_meta WHERE conversation_id = ?1",
            params![conversation_id],
        )?;
        Ok(())
    }

    /// Backdate the expiry so the next call observes an expired record.
    #[cfg(test)]
    pub async fn force_expire(&self, conversation_id: &str) {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE conversation_meta SET expires_at = ?1 WHERE conversation_id = ?2",
            params![(Utc::now() - Duration::seconds(1)).to_rfc3339(), conversation_id],
        )
        .unwrap();
    }
}
