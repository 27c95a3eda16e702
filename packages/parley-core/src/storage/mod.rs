//! # Storage Module
//!
//! Durable, append-only storage for users and messages.
//!
//! ## Layout
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         MESSAGE STORE                                   │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │   users                          messages                              │
//! │   ─────                          ────────                              │
//! │   username (PK)                  chat       ◄── ChatKey::between(s, r) │
//! │   password (PHC hash)            sender                                 │
//! │   created_at                     recipient                              │
//! │                                  timestamp  (µs, indexed DESC)          │
//! │                                  content                                │
//! │                                                                         │
//! │   fetch_messages(chat, before, limit)                                   │
//! │     = newest `limit` rows of `chat` with timestamp < before             │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Two implementations exist: [`SqliteMessageStore`] for deployments and
//! [`MemoryMessageStore`] for tests.

mod database;
mod memory;
mod schema;

pub use database::{SqliteMessageStore, IN_MEMORY_LOCATION};
pub use memory::MemoryMessageStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::chat_key::ChatKey;
use crate::error::{ConnectionError, StoreError};
use crate::messaging::Message;

/// Number of messages returned per history page.
pub const DEFAULT_PAGE_SIZE: usize = 20;

/// Durable store of users and messages.
///
/// Implementations must be safe to share across request tasks.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Establish the storage session.
    ///
    /// Retries on the store's retry policy; calling it again once connected
    /// is a no-op success.
    async fn connect(&self, location: &str, keyspace: &str) -> Result<(), ConnectionError>;

    /// Whether a user with this name is registered.
    async fn user_exists(&self, username: &str) -> Result<bool, StoreError>;

    /// Insert a user row. A name that is already taken fails with
    /// [`StoreError::AlreadyExists`] and leaves the existing row alone.
    async fn create_user(&self, username: &str, credential_hash: &str) -> Result<(), StoreError>;

    /// Check a plaintext password against the stored hash.
    ///
    /// Unknown users verify as `false`.
    async fn verify_credential(&self, username: &str, password: &str) -> Result<bool, StoreError>;

    /// Append one message to the conversation between sender and recipient.
    async fn append_message(
        &self,
        sender: &str,
        recipient: &str,
        content: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Up to `limit` messages of `chat` older than `before`, newest first.
    async fn fetch_messages(
        &self,
        chat: &ChatKey,
        before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Message>, StoreError>;
}
