//! # SQLite Message Store
//!
//! [`MessageStore`] backed by a single SQLite database file at
//! `{location}/{keyspace}.db`.
//!
//! ```text
//! ┌─────────────────┐
//! │  Request task   │   async: awaits the store
//! └────────┬────────┘
//!          │ spawn_blocking
//!          ▼
//! ┌─────────────────┐
//! │ Arc<Mutex<Conn>>│   one connection, serialised by a mutex
//! └────────┬────────┘
//!          ▼
//! ┌─────────────────┐
//! │   SQLite file   │   or `:memory:` for tests
//! └─────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use rusqlite::{params, Connection, OptionalExtension};

use super::{schema, MessageStore};
use crate::auth::passwords;
use crate::chat_key::ChatKey;
use crate::error::{ConnectionError, StoreError};
use crate::messaging::Message;
use crate::retry::RetryPolicy;
use crate::time;

/// `location` value that opens a private in-memory database.
pub const IN_MEMORY_LOCATION: &str = ":memory:";

/// How long SQLite waits on a locked database before failing a statement.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite-backed message store.
pub struct SqliteMessageStore {
    /// The open session, set once by `connect`.
    session: RwLock<Option<Arc<Mutex<Connection>>>>,
    /// Serialises concurrent `connect` calls.
    connect_lock: tokio::sync::Mutex<()>,
    retry: RetryPolicy,
}

impl SqliteMessageStore {
    pub fn new(retry: RetryPolicy) -> Self {
        Self {
            session: RwLock::new(None),
            connect_lock: tokio::sync::Mutex::new(()),
            retry,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.session.read().is_some()
    }

    /// Drop the session. Later calls fail with `NotConnected` until
    /// `connect` is called again.
    pub fn close(&self) {
        if self.session.write().take().is_some() {
            tracing::info!("Datastore session closed");
        }
    }

    fn session(&self) -> Result<Arc<Mutex<Connection>>, StoreError> {
        self.session.read().clone().ok_or(StoreError::NotConnected)
    }

    /// Run `op` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let session = self.session()?;
        tokio::task::spawn_blocking(move || {
            let conn = session.lock();
            op(&conn)
        })
        .await
        .map_err(|e| StoreError::TaskJoin(e.to_string()))?
    }
}

impl Default for SqliteMessageStore {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

/// Keyspaces name a database file, so keep them to a safe alphabet.
fn validate_keyspace(keyspace: &str) -> Result<(), ConnectionError> {
    if keyspace.is_empty()
        || !keyspace
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(ConnectionError::InvalidAddress {
            backend: "datastore",
            reason: format!("keyspace {:?} must be non-empty [A-Za-z0-9_-]", keyspace),
        });
    }
    Ok(())
}

fn open_session(location: &str, keyspace: &str) -> Result<Connection, StoreError> {
    let conn = if location == IN_MEMORY_LOCATION {
        Connection::open_in_memory()?
    } else {
        let dir = PathBuf::from(location);
        std::fs::create_dir_all(&dir).map_err(|e| {
            StoreError::Database(format!(
                "Failed to create data directory {}: {}",
                dir.display(),
                e
            ))
        })?;
        Connection::open(dir.join(format!("{}.db", keyspace)))?
    };

    conn.busy_timeout(BUSY_TIMEOUT)?;
    schema::init(&conn)?;
    Ok(conn)
}

#[async_trait]
impl MessageStore for SqliteMessageStore {
    async fn connect(&self, location: &str, keyspace: &str) -> Result<(), ConnectionError> {
        let _guard = self.connect_lock.lock().await;
        if self.is_connected() {
            tracing::debug!("Datastore already connected");
            return Ok(());
        }
        validate_keyspace(keyspace)?;

        let result = self
            .retry
            .run("datastore", || {
                let location = location.to_string();
                let keyspace = keyspace.to_string();
                async move {
                    match tokio::task::spawn_blocking(move || open_session(&location, &keyspace))
                        .await
                    {
                        Ok(opened) => opened,
                        Err(e) => Err(StoreError::TaskJoin(e.to_string())),
                    }
                }
            })
            .await;

        match result {
            Ok(conn) => {
                *self.session.write() = Some(Arc::new(Mutex::new(conn)));
                tracing::info!(location, keyspace, "Connected to datastore");
                Ok(())
            }
            Err((e, attempts)) => Err(ConnectionError::Unreachable {
                backend: "datastore",
                attempts,
                reason: e.to_string(),
            }),
        }
    }

    async fn user_exists(&self, username: &str) -> Result<bool, StoreError> {
        let username = username.to_string();
        self.with_conn(move |conn| {
            let found = conn
                .query_row(
                    "SELECT 1 FROM users WHERE username = ?",
                    params![username],
                    |_| Ok(()),
                )
                .optional()?;
            Ok(found.is_some())
        })
        .await
    }

    async fn create_user(&self, username: &str, credential_hash: &str) -> Result<(), StoreError> {
        let username = username.to_string();
        let credential_hash = credential_hash.to_string();
        self.with_conn(move |conn| {
            match conn.execute(
                "INSERT INTO users (username, password, created_at) VALUES (?, ?, ?)",
                params![username, credential_hash, time::now_timestamp()],
            ) {
                Ok(_) => Ok(()),
                Err(rusqlite::Error::SqliteFailure(err, _))
                    if err.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    Err(StoreError::AlreadyExists(username.clone()))
                }
                Err(e) => Err(e.into()),
            }
        })
        .await
    }

    async fn verify_credential(&self, username: &str, password: &str) -> Result<bool, StoreError> {
        let username = username.to_string();
        let password = password.to_string();
        self.with_conn(move |conn| {
            let stored: Option<String> = conn
                .query_row(
                    "SELECT password FROM users WHERE username = ? LIMIT 1",
                    params![username],
                    |row| row.get(0),
                )
                .optional()?;
            match stored {
                Some(hash) => passwords::verify_password(&hash, &password),
                None => Ok(false),
            }
        })
        .await
    }

    async fn append_message(
        &self,
        sender: &str,
        recipient: &str,
        content: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let chat = ChatKey::between(sender, recipient);
        let sender = sender.to_string();
        let recipient = recipient.to_string();
        let content = content.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO messages (chat, sender, recipient, timestamp, content)
                 VALUES (?, ?, ?, ?, ?)",
                params![
                    chat.as_str(),
                    sender,
                    recipient,
                    time::to_micros(&timestamp),
                    content
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn fetch_messages(
        &self,
        chat: &ChatKey,
        before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Message>, StoreError> {
        let chat = chat.clone();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT sender, recipient, timestamp, content FROM messages
                 WHERE chat = ? AND timestamp < ?
                 ORDER BY timestamp DESC, id DESC
                 LIMIT ?",
            )?;

            let rows = stmt.query_map(
                params![chat.as_str(), time::to_micros_ceil(&before), limit as i64],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )?;

            let mut messages = Vec::new();
            for row in rows {
                let (sender, recipient, micros, content) = row?;
                let timestamp = time::from_micros(micros).ok_or_else(|| {
                    StoreError::Database(format!("Stored timestamp out of range: {}", micros))
                })?;
                messages.push(Message {
                    sender,
                    recipient,
                    timestamp,
                    content,
                });
            }
            Ok(messages)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    async fn open_store() -> SqliteMessageStore {
        let store = SqliteMessageStore::new(RetryPolicy::once());
        store.connect(IN_MEMORY_LOCATION, "parley").await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_operations_before_connect_fail() {
        let store = SqliteMessageStore::new(RetryPolicy::once());
        assert!(matches!(
            store.user_exists("alice").await,
            Err(StoreError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_connect_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let location = dir.path().to_str().unwrap();
        let store = SqliteMessageStore::new(RetryPolicy::once());

        store.connect(location, "parley").await.unwrap();
        store.create_user("alice", "hash").await.unwrap();
        store.connect(location, "parley").await.unwrap();

        // Same session: the row written before the second connect is visible.
        assert!(store.user_exists("alice").await.unwrap());
        assert!(dir.path().join("parley.db").exists());
    }

    #[tokio::test]
    async fn test_connect_rejects_bad_keyspace() {
        let store = SqliteMessageStore::new(RetryPolicy::once());
        let err = store.connect(IN_MEMORY_LOCATION, "../etc").await.unwrap_err();
        assert!(matches!(err, ConnectionError::InvalidAddress { .. }));
        assert!(!store.is_connected());
    }

    #[tokio::test]
    async fn test_connect_gives_up_on_unusable_location() {
        let dir = tempfile::tempdir().unwrap();
        // A regular file where the data directory should be.
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"x").unwrap();

        let store = SqliteMessageStore::new(RetryPolicy::new(
            Duration::from_millis(10),
            Duration::from_millis(30),
        ));
        let err = store
            .connect(blocker.to_str().unwrap(), "parley")
            .await
            .unwrap_err();
        match err {
            ConnectionError::Unreachable { attempts, .. } => assert!(attempts >= 2),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_data_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let location = dir.path().to_str().unwrap();
        let ts = time::now();

        let store = SqliteMessageStore::new(RetryPolicy::once());
        store.connect(location, "parley").await.unwrap();
        store.append_message("alice", "bob", "persisted", ts).await.unwrap();
        store.close();
        assert!(!store.is_connected());

        store.connect(location, "parley").await.unwrap();
        let got = store
            .fetch_messages(&ChatKey::between("alice", "bob"), ts + ChronoDuration::seconds(1), 20)
            .await
            .unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].content, "persisted");
    }

    #[tokio::test]
    async fn test_user_lifecycle() {
        let store = open_store().await;
        assert!(!store.user_exists("carol").await.unwrap());

        let hash = passwords::hash_password("testpass").unwrap();
        store.create_user("carol", &hash).await.unwrap();

        assert!(store.user_exists("carol").await.unwrap());
        assert!(store.verify_credential("carol", "testpass").await.unwrap());
        assert!(!store.verify_credential("carol", "wrongpass").await.unwrap());
        assert!(!store.verify_credential("nobody", "testpass").await.unwrap());
    }

    #[tokio::test]
    async fn test_sub_micro_cursor_keeps_earlier_message() {
        let store = open_store().await;
        let at = |s: &str| {
            chrono::DateTime::parse_from_rfc3339(s)
                .unwrap()
                .with_timezone(&chrono::Utc)
        };
        store
            .append_message("alice", "bob", "edge", at("2024-05-01T12:00:00.000001Z"))
            .await
            .unwrap();

        let got = store
            .fetch_messages(
                &ChatKey::between("alice", "bob"),
                at("2024-05-01T12:00:00.0000015Z"),
                20,
            )
            .await
            .unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].content, "edge");
    }

    #[tokio::test]
    async fn test_duplicate_user_is_already_exists() {
        let store = open_store().await;
        store.create_user("carol", "first").await.unwrap();

        let err = store.create_user("carol", "second").await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(ref name) if name == "carol"));
        assert!(store.user_exists("carol").await.unwrap());
    }

    #[tokio::test]
    async fn test_append_then_fetch_round_trip() {
        let store = open_store().await;
        let ts = time::now();

        store.append_message("bob", "alice", "hello", ts).await.unwrap();

        let got = store
            .fetch_messages(
                &ChatKey::between("alice", "bob"),
                ts + ChronoDuration::microseconds(1),
                20,
            )
            .await
            .unwrap();
        assert_eq!(
            got,
            vec![Message {
                sender: "bob".to_string(),
                recipient: "alice".to_string(),
                timestamp: ts,
                content: "hello".to_string(),
            }]
        );

        // The cursor bound is exclusive.
        let none = store
            .fetch_messages(&ChatKey::between("alice", "bob"), ts, 20)
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_pagination_has_no_gaps_or_overlap() {
        let store = open_store().await;
        let base = time::now() - ChronoDuration::hours(1);

        for i in 0..25 {
            let (from, to) = if i % 2 == 0 { ("alice", "bob") } else { ("bob", "alice") };
            store
                .append_message(from, to, &format!("msg-{}", i), base + ChronoDuration::seconds(i))
                .await
                .unwrap();
        }
        // Noise in another chat.
        store.append_message("alice", "carol", "other", base).await.unwrap();

        let chat = ChatKey::between("alice", "bob");
        let first = store.fetch_messages(&chat, time::now(), 20).await.unwrap();
        assert_eq!(first.len(), 20);
        assert_eq!(first[0].content, "msg-24");
        assert_eq!(first[19].content, "msg-5");

        let cursor = first.last().unwrap().timestamp;
        let second = store.fetch_messages(&chat, cursor, 20).await.unwrap();
        let contents: Vec<_> = second.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["msg-4", "msg-3", "msg-2", "msg-1", "msg-0"]);

        let third = store.fetch_messages(&chat, second.last().unwrap().timestamp, 20).await.unwrap();
        assert!(third.is_empty());
    }

    #[tokio::test]
    async fn test_empty_chat_returns_empty_vec() {
        let store = open_store().await;
        let got = store
            .fetch_messages(&ChatKey::between("x", "y"), time::now(), 20)
            .await
            .unwrap();
        assert!(got.is_empty());
    }
}
