//! SQL schema for the message store.

use rusqlite::{params, Connection};

use crate::error::StoreError;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

/// SQL to create all tables
pub const CREATE_TABLES: &str = r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY
);

-- Registered users
CREATE TABLE IF NOT EXISTS users (
    username TEXT PRIMARY KEY,
    -- Argon2id PHC string
    password TEXT NOT NULL,
    created_at INTEGER NOT NULL
);

-- Direct messages, one row per send
CREATE TABLE IF NOT EXISTS messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    -- Canonical chat key (sorted usernames joined by ':')
    chat TEXT NOT NULL,
    sender TEXT NOT NULL,
    recipient TEXT NOT NULL,
    -- Microseconds since the Unix epoch
    timestamp INTEGER NOT NULL,
    content TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_messages_chat_ts ON messages(chat, timestamp DESC);
"#;

/// Create the schema on a fresh database, or check the version of an
/// existing one.
pub fn init(conn: &Connection) -> Result<(), StoreError> {
    let version: Option<i32> = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
            row.get(0)
        })
        .ok();

    match version {
        None => {
            conn.execute_batch(CREATE_TABLES)
                .map_err(|e| StoreError::Database(format!("Failed to create tables: {}", e)))?;
            conn.execute(
                "INSERT INTO schema_version (version) VALUES (?)",
                params![SCHEMA_VERSION],
            )
            .map_err(|e| StoreError::Database(format!("Failed to set schema version: {}", e)))?;

            tracing::info!("Database schema created (version {})", SCHEMA_VERSION);
        }
        Some(v) if v > SCHEMA_VERSION => {
            return Err(StoreError::Database(format!(
                "Database schema version {} is newer than supported version {}",
                v, SCHEMA_VERSION
            )));
        }
        Some(v) => {
            tracing::debug!("Database schema version: {}", v);
        }
    }

    Ok(())
}
