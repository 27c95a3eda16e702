//! # Messaging Module
//!
//! Accounts and message sending.
//!
//! ## Send Flow
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          SEND MESSAGE                                   │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  sender (from token) ──┐                                                │
//! │  recipient ────────────┼──► validate content, reject self-messages      │
//! │  content ──────────────┘            │                                   │
//! │                                     ▼                                   │
//! │                          store.user_exists(recipient)?                  │
//! │                                     │ no ──► RecipientNotFound          │
//! │                                     ▼ yes                               │
//! │                          timestamp = now (server clock)                 │
//! │                          store.append_message(...)                      │
//! │                                     │                                   │
//! │                                     ▼                                   │
//! │                          CachePolicy::InvalidateOnSend                  │
//! │                            └─► cache.invalidate(chat) (best effort)     │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod validation;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::auth::passwords;
use crate::cache::{self, HistoryCache};
use crate::chat_key::ChatKey;
use crate::error::{MessagingError, StoreError, ValidationError};
use crate::storage::MessageStore;
use crate::time;

/// Default bound on a single store or cache call.
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(5);

/// A direct message as stored and as sent over the wire.
///
/// Serializes to exactly `sender`, `recipient`, `timestamp` (RFC 3339) and
/// `content`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub sender: String,
    pub recipient: String,
    pub timestamp: DateTime<Utc>,
    pub content: String,
}

impl Message {
    /// The conversation this message belongs to.
    pub fn chat_key(&self) -> ChatKey {
        ChatKey::between(&self.sender, &self.recipient)
    }
}

/// What a send does to the recipient chat's cached first page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CachePolicy {
    /// Drop the cached first page so the next read sees the new message.
    #[default]
    InvalidateOnSend,
    /// Leave the cache alone; readers may see a page up to the cache TTL old.
    AcceptStale,
}

impl CachePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            CachePolicy::InvalidateOnSend => "invalidate-on-send",
            CachePolicy::AcceptStale => "accept-stale",
        }
    }
}

impl std::fmt::Display for CachePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CachePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "invalidate-on-send" => Ok(CachePolicy::InvalidateOnSend),
            "accept-stale" => Ok(CachePolicy::AcceptStale),
            other => Err(format!(
                "unknown cache policy '{}' (expected invalidate-on-send or accept-stale)",
                other
            )),
        }
    }
}

/// Register, log in and send messages.
pub struct MessagingService {
    store: Arc<dyn MessageStore>,
    cache: Arc<dyn HistoryCache>,
    policy: CachePolicy,
    io_timeout: Duration,
}

impl MessagingService {
    pub fn new(store: Arc<dyn MessageStore>, cache: Arc<dyn HistoryCache>) -> Self {
        Self {
            store,
            cache,
            policy: CachePolicy::default(),
            io_timeout: DEFAULT_IO_TIMEOUT,
        }
    }

    pub fn with_policy(mut self, policy: CachePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_io_timeout(mut self, io_timeout: Duration) -> Self {
        self.io_timeout = io_timeout;
        self
    }

    pub fn policy(&self) -> CachePolicy {
        self.policy
    }

    /// Bound a store call by the I/O timeout.
    async fn store_call<T>(
        &self,
        fut: impl std::future::Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        tokio::time::timeout(self.io_timeout, fut)
            .await
            .unwrap_or(Err(StoreError::Timeout))
    }

    /// Create an account. A taken username is a `Conflict` and writes nothing.
    pub async fn register(&self, username: &str, password: &str) -> Result<(), MessagingError> {
        validation::validate_username(username)?;
        validation::validate_password(password)?;

        if self.store_call(self.store.user_exists(username)).await? {
            tracing::info!(username, "Registration rejected, username taken");
            return Err(MessagingError::Conflict(username.to_string()));
        }

        let password = password.to_string();
        let hash = tokio::task::spawn_blocking(move || passwords::hash_password(&password))
            .await
            .map_err(|e| StoreError::TaskJoin(e.to_string()))??;

        // A concurrent registration can claim the name between the check
        // above and this insert.
        match self.store_call(self.store.create_user(username, &hash)).await {
            Ok(()) => {}
            Err(StoreError::AlreadyExists(_)) => {
                tracing::info!(username, "Registration rejected, username taken");
                return Err(MessagingError::Conflict(username.to_string()));
            }
            Err(e) => return Err(e.into()),
        }
        tracing::info!(username, "User registered");
        Ok(())
    }

    /// Check a username/password pair.
    pub async fn login(&self, username: &str, password: &str) -> Result<bool, MessagingError> {
        let valid = self
            .store_call(self.store.verify_credential(username, password))
            .await?;
        if !valid {
            tracing::info!(username, "Login rejected");
        }
        Ok(valid)
    }

    /// Send `content` from `sender` to `recipient`.
    ///
    /// `sender` is trusted (it comes from a verified token); the recipient
    /// must be a registered user. Returns the stored message.
    pub async fn send_message(
        &self,
        sender: &str,
        recipient: &str,
        content: &str,
    ) -> Result<Message, MessagingError> {
        validation::validate_content(content)?;
        if sender == recipient {
            return Err(ValidationError::SelfMessage.into());
        }
        if !self.store_call(self.store.user_exists(recipient)).await? {
            return Err(ValidationError::RecipientNotFound.into());
        }

        let message = Message {
            sender: sender.to_string(),
            recipient: recipient.to_string(),
            timestamp: time::now(),
            content: content.to_string(),
        };

        self.store_call(self.store.append_message(
            &message.sender,
            &message.recipient,
            &message.content,
            message.timestamp,
        ))
        .await?;

        let chat = message.chat_key();
        tracing::debug!(chat = %chat, "Message appended");

        if self.policy == CachePolicy::InvalidateOnSend {
            if let Err(e) = cache::bounded(self.io_timeout, self.cache.invalidate(&chat)).await {
                tracing::warn!(chat = %chat, error = %e, "Failed to invalidate cached page");
            }
        }

        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryHistoryCache;
    use crate::storage::{MemoryMessageStore, DEFAULT_PAGE_SIZE};

    struct Fixture {
        store: Arc<MemoryMessageStore>,
        cache: Arc<MemoryHistoryCache>,
        service: MessagingService,
    }

    async fn fixture(policy: CachePolicy) -> Fixture {
        let store = Arc::new(MemoryMessageStore::new());
        store.connect("memory", "parley").await.unwrap();
        let cache = Arc::new(MemoryHistoryCache::new());
        cache.connect("localhost", 6379).await.unwrap();
        let service = MessagingService::new(store.clone(), cache.clone()).with_policy(policy);
        Fixture {
            store,
            cache,
            service,
        }
    }

    #[test]
    fn test_cache_policy_parse() {
        assert_eq!(
            "invalidate-on-send".parse::<CachePolicy>().unwrap(),
            CachePolicy::InvalidateOnSend
        );
        assert_eq!(
            "Accept-Stale".parse::<CachePolicy>().unwrap(),
            CachePolicy::AcceptStale
        );
        assert!("never".parse::<CachePolicy>().is_err());
        assert_eq!(CachePolicy::default().to_string(), "invalidate-on-send");
    }

    #[tokio::test]
    async fn test_register_then_login() {
        let f = fixture(CachePolicy::default()).await;
        f.service.register("testuser", "testpass").await.unwrap();

        assert!(f.service.login("testuser", "testpass").await.unwrap());
        assert!(!f.service.login("testuser", "nottheone").await.unwrap());
        assert!(!f.service.login("ghost", "testpass").await.unwrap());
    }

    #[tokio::test]
    async fn test_register_twice_is_conflict() {
        let f = fixture(CachePolicy::default()).await;
        f.service.register("carol", "password1").await.unwrap();

        let err = f.service.register("carol", "password2").await.unwrap_err();
        assert!(matches!(err, MessagingError::Conflict(ref name) if name == "carol"));
        assert_eq!(f.store.user_insert_count(), 1);
        // The original password still works.
        assert!(f.service.login("carol", "password1").await.unwrap());
    }

    #[tokio::test]
    async fn test_concurrent_register_is_one_conflict() {
        let f = fixture(CachePolicy::default()).await;

        // Both calls pass the existence check before either inserts.
        let (a, b) = tokio::join!(
            f.service.register("dave", "password1"),
            f.service.register("dave", "password2"),
        );
        let results = [a, b];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .any(|r| matches!(r, Err(MessagingError::Conflict(name)) if name == "dave")));
        assert_eq!(f.store.user_insert_count(), 2);
    }

    #[tokio::test]
    async fn test_register_validates_input() {
        let f = fixture(CachePolicy::default()).await;
        assert!(matches!(
            f.service.register("bad:name", "testpass").await,
            Err(MessagingError::Validation(ValidationError::InvalidUsername(_)))
        ));
        assert!(matches!(
            f.service.register("alice", "short").await,
            Err(MessagingError::Validation(ValidationError::InvalidPassword(_)))
        ));
        assert_eq!(f.store.user_insert_count(), 0);
    }

    #[tokio::test]
    async fn test_send_to_unknown_recipient_never_appends() {
        let f = fixture(CachePolicy::default()).await;
        f.service.register("alice", "testpass").await.unwrap();

        let err = f.service.send_message("alice", "ghost", "boo").await.unwrap_err();
        assert!(matches!(
            err,
            MessagingError::Validation(ValidationError::RecipientNotFound)
        ));
        assert_eq!(f.store.append_count(), 0);
    }

    #[tokio::test]
    async fn test_send_rejects_empty_and_self() {
        let f = fixture(CachePolicy::default()).await;
        f.service.register("alice", "testpass").await.unwrap();

        assert!(f.service.send_message("alice", "alice", "me").await.is_err());
        assert!(f.service.send_message("alice", "bob", "  ").await.is_err());
        assert_eq!(f.store.append_count(), 0);
    }

    #[tokio::test]
    async fn test_send_stores_message_with_server_timestamp() {
        let f = fixture(CachePolicy::default()).await;
        f.service.register("bob", "testpass").await.unwrap();

        let before = time::now();
        let sent = f.service.send_message("alice", "bob", "hi").await.unwrap();
        assert!(sent.timestamp >= before);

        let later = time::now() + chrono::Duration::seconds(1);
        let stored = f
            .store
            .fetch_messages(&ChatKey::between("bob", "alice"), later, DEFAULT_PAGE_SIZE)
            .await
            .unwrap();
        assert_eq!(stored, vec![sent]);
    }

    #[tokio::test]
    async fn test_invalidate_on_send_drops_cached_page() {
        let f = fixture(CachePolicy::InvalidateOnSend).await;
        f.service.register("bob", "testpass").await.unwrap();
        let chat = ChatKey::between("alice", "bob");
        f.cache.put_first_page(&chat, &[]).await.unwrap();

        f.service.send_message("alice", "bob", "hi").await.unwrap();
        assert!(!f.cache.contains(&chat));
    }

    #[tokio::test]
    async fn test_accept_stale_keeps_cached_page() {
        let f = fixture(CachePolicy::AcceptStale).await;
        f.service.register("bob", "testpass").await.unwrap();
        let chat = ChatKey::between("alice", "bob");
        f.cache.put_first_page(&chat, &[]).await.unwrap();

        f.service.send_message("alice", "bob", "hi").await.unwrap();
        assert!(f.cache.contains(&chat));
    }

    #[tokio::test]
    async fn test_send_succeeds_with_cache_down() {
        let f = fixture(CachePolicy::InvalidateOnSend).await;
        f.service.register("bob", "testpass").await.unwrap();
        f.cache.disconnect();

        assert!(f.service.send_message("alice", "bob", "hi").await.is_ok());
        assert_eq!(f.store.append_count(), 1);
    }

    #[tokio::test]
    async fn test_store_outage_is_a_store_error() {
        let f = fixture(CachePolicy::default()).await;
        f.store.set_failing(true);
        assert!(matches!(
            f.service.send_message("alice", "bob", "hi").await,
            Err(MessagingError::Store(_))
        ));
    }
}
