mod candidates;
mod interviews;
mod messages;
pub mod types;

use anyhow::Result;
use rusqlite::Connection;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

/// Process-wide SQLite database. All domain records (candidates, interviews,
/// messages) and the ephemeral key-value state (conversation turns, locks)
/// live in the same file, accessed through one connection behind a mutex.
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS candidates (
        id TEXT PRIMARY KEY,
        address TEXT NOT NULL UNIQUE,
        name TEXT NOT NULL,
        email TEXT,
        created_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS interviews (
        id TEXT PRIMARY KEY,
        candidate_id TEXT NOT NULL,
        position_title TEXT NOT NULL,
        stage TEXT NOT NULL,
        status TEXT NOT NULL,
        scheduled_at TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_interviews_candidate_status
        ON interviews(candidate_id, status)",
    "CREATE TABLE IF NOT EXISTS messages (
        id TEXT PRIMARY KEY,
        candidate_id TEXT NOT NULL,
        direction TEXT NOT NULL,
        content TEXT NOT NULL,
        external_id TEXT UNIQUE,
        tokens_used INTEGER,
        model_name TEXT,
        processing_ms INTEGER,
        created_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS conversation_turns (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        conversation_id TEXT NOT NULL,
        role TEXT NOT NULL,
        content TEXT NOT NULL,
        metadata TEXT,
        created_at TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_turns_conversation
        ON conversation_turns(conversation_id, id)",
    "CREATE TABLE IF NOT EXISTS conversation_meta (
        conversation_id TEXT PRIMARY KEY,
        expires_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS locks (
        key TEXT PRIMARY KEY,
        holder TEXT NOT NULL,
        expires_at TEXT NOT NULL
    )",
];

impl Database {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Self::init_schema(&conn)?;
        info!("Database opened at {}", path.display());
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        for stmt in SCHEMA {
            conn.execute(stmt, [])?;
        }
        Ok(())
    }

    pub fn conn(&self) -> Arc<Mutex<Connection>> {
        self.conn.clone()
    }
}

/// In-memory database for tests. No filesystem side effects.
#[cfg(test)]
pub fn test_database() -> Database {
    let conn = Connection::open_in_memory().expect("open in-memory db");
    Database::init_schema(&conn).expect("init schema");
    Database {
        conn: Arc::new(Mutex::new(conn)),
    }
}
