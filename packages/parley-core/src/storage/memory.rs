//! In-memory message store.
//!
//! Mirrors the SQLite store's semantics on DashMaps and counts calls, so
//! service tests can assert which store operations a request performed.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::MessageStore;
use crate::auth::passwords;
use crate::chat_key::ChatKey;
use crate::error::{ConnectionError, StoreError};
use crate::messaging::Message;
use crate::time;

/// DashMap-backed [`MessageStore`].
#[derive(Default)]
pub struct MemoryMessageStore {
    connected: AtomicBool,
    /// Set to make every operation fail, simulating an outage.
    failing: AtomicBool,
    /// username → credential hash
    users: DashMap<String, String>,
    /// chat key → messages in append order
    chats: DashMap<String, Vec<Message>>,
    sessions: AtomicUsize,
    appends: AtomicUsize,
    fetches: AtomicUsize,
    user_inserts: AtomicUsize,
}

impl MemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent operation fail (or recover).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of sessions opened by `connect`.
    pub fn session_count(&self) -> usize {
        self.sessions.load(Ordering::SeqCst)
    }

    /// Number of `append_message` calls.
    pub fn append_count(&self) -> usize {
        self.appends.load(Ordering::SeqCst)
    }

    /// Number of `fetch_messages` calls.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Number of `create_user` calls.
    pub fn user_insert_count(&self) -> usize {
        self.user_inserts.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), StoreError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(StoreError::NotConnected);
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Database("simulated datastore outage".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn connect(&self, location: &str, keyspace: &str) -> Result<(), ConnectionError> {
        if self.connected.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.sessions.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(location, keyspace, "In-memory datastore connected");
        Ok(())
    }

    async fn user_exists(&self, username: &str) -> Result<bool, StoreError> {
        self.check()?;
        Ok(self.users.contains_key(username))
    }

    async fn create_user(&self, username: &str, credential_hash: &str) -> Result<(), StoreError> {
        self.check()?;
        self.user_inserts.fetch_add(1, Ordering::SeqCst);
        match self.users.entry(username.to_string()) {
            Entry::Occupied(_) => Err(StoreError::AlreadyExists(username.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(credential_hash.to_string());
                Ok(())
            }
        }
    }

    async fn verify_credential(&self, username: &str, password: &str) -> Result<bool, StoreError> {
        self.check()?;
        let stored = self.users.get(username).map(|r| r.value().clone());
        match stored {
            Some(hash) => passwords::verify_password(&hash, password),
            None => Ok(false),
        }
    }

    async fn append_message(
        &self,
        sender: &str,
        recipient: &str,
        content: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.check()?;
        self.appends.fetch_add(1, Ordering::SeqCst);
        let chat = ChatKey::between(sender, recipient);
        // Same precision the SQLite column keeps.
        let timestamp = time::to_stored_precision(timestamp);
        self.chats
            .entry(chat.as_str().to_string())
            .or_default()
            .push(Message {
                sender: sender.to_string(),
                recipient: recipient.to_string(),
                timestamp,
                content: content.to_string(),
            });
        Ok(())
    }

    async fn fetch_messages(
        &self,
        chat: &ChatKey,
        before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Message>, StoreError> {
        self.check()?;
        self.fetches.fetch_add(1, Ordering::SeqCst);

        let Some(stored) = self.chats.get(chat.as_str()) else {
            return Ok(Vec::new());
        };

        // Newest first; later appends win ties, like `id DESC` in SQLite.
        let mut page: Vec<Message> = stored
            .iter()
            .rev()
            .filter(|m| m.timestamp < before)
            .cloned()
            .collect();
        page.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        page.truncate(limit);
        Ok(page)
    }
}
