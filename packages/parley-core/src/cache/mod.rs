//! # History Cache
//!
//! Best-effort cache of the newest page of each conversation.
//!
//! The cache is never a source of truth. Entries expire after
//! [`FIRST_PAGE_TTL`] and callers treat any cache failure as a miss.
//! Entries live under `chat:{chat_key}:page:1` and hold the page as a JSON
//! array of [`Message`].
//!
//! Each chat also carries an invalidation generation that
//! [`HistoryCache::invalidate`] bumps. A reader that fills the cache after
//! a store read takes the generation first and writes through
//! [`HistoryCache::put_first_page_if_current`], so a page read before a
//! send can never land after that send's invalidation.

mod memory;
mod redis_cache;

pub use memory::MemoryHistoryCache;
pub use redis_cache::RedisHistoryCache;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;

use crate::chat_key::ChatKey;
use crate::error::{CacheError, ConnectionError};
use crate::messaging::Message;

/// Lifetime of a cached first page (24 hours).
pub const FIRST_PAGE_TTL: Duration = Duration::from_secs(24 * 3600);

/// Cache key of a chat's first page.
pub fn first_page_key(chat: &ChatKey) -> String {
    format!("chat:{}:page:1", chat)
}

/// Cache key of a chat's invalidation generation.
pub fn generation_key(chat: &ChatKey) -> String {
    format!("chat:{}:gen", chat)
}

/// Bound a cache call by `limit`. An overrun is [`CacheError::Timeout`].
pub async fn bounded<T>(
    limit: Duration,
    call: impl Future<Output = Result<T, CacheError>>,
) -> Result<T, CacheError> {
    tokio::time::timeout(limit, call)
        .await
        .unwrap_or(Err(CacheError::Timeout))
}

/// A serialized first page as held by the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedPage(String);

impl CachedPage {
    pub fn encode(messages: &[Message]) -> Result<Self, CacheError> {
        Ok(CachedPage(serde_json::to_string(messages)?))
    }

    /// Wrap a payload read back from a backend.
    pub fn from_raw(raw: String) -> Self {
        CachedPage(raw)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn decode(&self) -> Result<Vec<Message>, CacheError> {
        Ok(serde_json::from_str(&self.0)?)
    }
}

/// First-page history cache.
#[async_trait]
pub trait HistoryCache: Send + Sync {
    /// Connect to the cache backend. A single attempt; no retry.
    async fn connect(&self, host: &str, port: u16) -> Result<(), ConnectionError>;

    /// The cached first page of `chat`, or `None` on a miss.
    async fn get_first_page(&self, chat: &ChatKey) -> Result<Option<CachedPage>, CacheError>;

    /// Store `messages` as the first page of `chat`, replacing any previous
    /// entry and resetting its expiry.
    async fn put_first_page(&self, chat: &ChatKey, messages: &[Message]) -> Result<(), CacheError>;

    /// Current invalidation generation of `chat`. Zero until the first
    /// invalidation.
    async fn generation(&self, chat: &ChatKey) -> Result<u64, CacheError>;

    /// Store `messages` as the first page of `chat` only if its generation
    /// still equals `generation`. Returns whether the page was written.
    async fn put_first_page_if_current(
        &self,
        chat: &ChatKey,
        messages: &[Message],
        generation: u64,
    ) -> Result<bool, CacheError>;

    /// Drop the cached first page of `chat`, if any, and bump its
    /// generation.
    async fn invalidate(&self, chat: &ChatKey) -> Result<(), CacheError>;
}
