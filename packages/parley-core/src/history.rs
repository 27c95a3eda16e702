//! # History Service
//!
//! Paged reads of a conversation, newest first.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          GET HISTORY                                    │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  chat = ChatKey::between(requester, counterpart)                        │
//! │                                                                         │
//! │  Cursor::Latest ──► cache.get_first_page(chat)                          │
//! │                       │ hit ──► decode ──► HistoryPage { Cache }        │
//! │                       │ miss / error / bad payload                      │
//! │                       ▼                                                 │
//! │                     gen = cache.generation(chat)                        │
//! │                     store.fetch_messages(chat, now, 20)                 │
//! │                       ├──► spawn put_first_page_if_current(.., gen)     │
//! │                       └──► HistoryPage { Store }                        │
//! │                                                                         │
//! │  Cursor::Before(t) ──► store.fetch_messages(chat, t, 20)                │
//! │                        └──► HistoryPage { Store }                       │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Cache failures are logged and absorbed. Store failures propagate.
//!
//! The generation is taken before the store read. A send that lands after
//! that read invalidates the chat and bumps the generation, so the detached
//! fill carrying the older page is refused.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::cache::{self, HistoryCache};
use crate::chat_key::ChatKey;
use crate::error::{CacheError, HistoryError, StoreError, ValidationError};
use crate::messaging::{validation, Message, DEFAULT_IO_TIMEOUT};
use crate::storage::{MessageStore, DEFAULT_PAGE_SIZE};
use crate::time;

/// Where a history read starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cursor {
    /// The newest page.
    Latest,
    /// Messages strictly older than this instant.
    Before(DateTime<Utc>),
}

impl Cursor {
    /// Parse the optional `timestamp` query value.
    ///
    /// Absent or empty means [`Cursor::Latest`]; anything else must be an
    /// RFC 3339 timestamp.
    pub fn parse(raw: Option<&str>) -> Result<Self, ValidationError> {
        match raw.map(str::trim) {
            None | Some("") => Ok(Cursor::Latest),
            Some(s) => DateTime::parse_from_rfc3339(s)
                .map(|ts| Cursor::Before(ts.with_timezone(&Utc)))
                .map_err(|_| ValidationError::InvalidTimestamp),
        }
    }
}

/// Which layer answered a history read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageSource {
    Cache,
    Store,
}

/// One page of history, newest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryPage {
    pub messages: Vec<Message>,
    pub source: PageSource,
}

/// Cache-then-store history reads.
pub struct HistoryService {
    store: Arc<dyn MessageStore>,
    cache: Arc<dyn HistoryCache>,
    page_size: usize,
    io_timeout: Duration,
}

impl HistoryService {
    pub fn new(store: Arc<dyn MessageStore>, cache: Arc<dyn HistoryCache>) -> Self {
        Self {
            store,
            cache,
            page_size: DEFAULT_PAGE_SIZE,
            io_timeout: DEFAULT_IO_TIMEOUT,
        }
    }

    pub fn with_io_timeout(mut self, io_timeout: Duration) -> Self {
        self.io_timeout = io_timeout;
        self
    }

    /// Read one page of the conversation between `requester` and
    /// `counterpart`.
    pub async fn get_history(
        &self,
        requester: &str,
        counterpart: &str,
        cursor: Cursor,
    ) -> Result<HistoryPage, HistoryError> {
        validation::validate_username(counterpart)?;
        let chat = ChatKey::between(requester, counterpart);

        let mut fill_generation = None;
        let before = match cursor {
            Cursor::Latest => {
                if let Some(messages) = self.cached_first_page(&chat).await {
                    tracing::debug!(chat = %chat, count = messages.len(), "History served from cache");
                    return Ok(HistoryPage {
                        messages,
                        source: PageSource::Cache,
                    });
                }
                fill_generation = self.fill_generation(&chat).await;
                // Include messages stamped in the current microsecond.
                time::now() + chrono::Duration::microseconds(1)
            }
            Cursor::Before(ts) => ts,
        };

        let messages = tokio::time::timeout(
            self.io_timeout,
            self.store.fetch_messages(&chat, before, self.page_size),
        )
        .await
        .unwrap_or(Err(StoreError::Timeout))?;

        if let Some(generation) = fill_generation {
            self.spawn_populate(chat, messages.clone(), generation);
        }

        Ok(HistoryPage {
            messages,
            source: PageSource::Store,
        })
    }

    /// The decoded cached first page, or `None` for any kind of miss.
    async fn cached_first_page(&self, chat: &ChatKey) -> Option<Vec<Message>> {
        let page = match cache::bounded(self.io_timeout, self.cache.get_first_page(chat)).await {
            Ok(Some(page)) => page,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(chat = %chat, error = %e, "Cache lookup failed");
                return None;
            }
        };

        match page.decode() {
            Ok(messages) => Some(messages),
            Err(e) => {
                tracing::warn!(chat = %chat, error = %e, "Discarding undecodable cached page");
                None
            }
        }
    }

    /// The generation a fill after this read must match. `None` skips the
    /// fill.
    async fn fill_generation(&self, chat: &ChatKey) -> Option<u64> {
        match cache::bounded(self.io_timeout, self.cache.generation(chat)).await {
            Ok(generation) => Some(generation),
            Err(e) => {
                tracing::debug!(chat = %chat, error = %e, "Skipping cache fill");
                None
            }
        }
    }

    /// Write the first page back to the cache without holding up the reply.
    fn spawn_populate(&self, chat: ChatKey, messages: Vec<Message>, generation: u64) {
        let history_cache = Arc::clone(&self.cache);
        let io_timeout = self.io_timeout;
        tokio::spawn(async move {
            let fill = history_cache.put_first_page_if_current(&chat, &messages, generation);
            match cache::bounded(io_timeout, fill).await {
                Ok(true) => tracing::debug!(chat = %chat, "Cached first page"),
                Ok(false) => {
                    tracing::debug!(chat = %chat, generation, "Chat changed since read, fill dropped")
                }
                Err(CacheError::Timeout) => {
                    tracing::warn!(chat = %chat, "Caching first page timed out")
                }
                Err(e) => tracing::warn!(chat = %chat, error = %e, "Failed to cache first page"),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CachedPage, MemoryHistoryCache};
    use crate::messaging::MessagingService;
    use crate::storage::MemoryMessageStore;

    struct Fixture {
        store: Arc<MemoryMessageStore>,
        cache: Arc<MemoryHistoryCache>,
        history: HistoryService,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(MemoryMessageStore::new());
        store.connect("memory", "parley").await.unwrap();
        let cache = Arc::new(MemoryHistoryCache::new());
        cache.connect("localhost", 6379).await.unwrap();
        let history = HistoryService::new(store.clone(), cache.clone());
        Fixture {
            store,
            cache,
            history,
        }
    }

    async fn wait_until_cached(cache: &MemoryHistoryCache, chat: &ChatKey) {
        for _ in 0..100 {
            if cache.contains(chat) {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("first page was never cached");
    }

    async fn seed(store: &MemoryMessageStore, count: i64) {
        let base = time::now() - chrono::Duration::hours(1);
        for i in 0..count {
            store
                .append_message("alice", "bob", &format!("m{}", i), base + chrono::Duration::seconds(i))
                .await
                .unwrap();
        }
    }

    #[test]
    fn test_cursor_parse() {
        assert_eq!(Cursor::parse(None).unwrap(), Cursor::Latest);
        assert_eq!(Cursor::parse(Some("")).unwrap(), Cursor::Latest);

        let parsed = Cursor::parse(Some("2024-05-01T12:00:00Z")).unwrap();
        let expected = DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(parsed, Cursor::Before(expected));

        // Offsets are normalised to UTC.
        assert_eq!(
            Cursor::parse(Some("2024-05-01T14:00:00+02:00")).unwrap(),
            Cursor::Before(expected)
        );

        assert_eq!(
            Cursor::parse(Some("yesterday")),
            Err(ValidationError::InvalidTimestamp)
        );
    }

    #[tokio::test]
    async fn test_first_page_miss_populates_cache() {
        let f = fixture().await;
        seed(&f.store, 3).await;
        let chat = ChatKey::between("alice", "bob");

        let first = f.history.get_history("bob", "alice", Cursor::Latest).await.unwrap();
        assert_eq!(first.source, PageSource::Store);
        assert_eq!(first.messages.len(), 3);
        assert_eq!(f.store.fetch_count(), 1);

        wait_until_cached(&f.cache, &chat).await;

        let second = f.history.get_history("alice", "bob", Cursor::Latest).await.unwrap();
        assert_eq!(second.source, PageSource::Cache);
        assert_eq!(second.messages, first.messages);
        assert_eq!(f.store.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_sent_message_is_latest_history() {
        let f = fixture().await;
        let messaging = MessagingService::new(f.store.clone(), f.cache.clone());
        messaging.register("bob", "testpass").await.unwrap();

        let sent = messaging.send_message("alice", "bob", "hi").await.unwrap();
        let page = f.history.get_history("bob", "alice", Cursor::Latest).await.unwrap();

        assert_eq!(page.messages, vec![sent]);
    }

    #[tokio::test]
    async fn test_send_after_cached_read_is_visible() {
        let f = fixture().await;
        let messaging = MessagingService::new(f.store.clone(), f.cache.clone());
        messaging.register("bob", "testpass").await.unwrap();
        let chat = ChatKey::between("alice", "bob");

        messaging.send_message("alice", "bob", "one").await.unwrap();
        f.history.get_history("bob", "alice", Cursor::Latest).await.unwrap();
        wait_until_cached(&f.cache, &chat).await;

        messaging.send_message("alice", "bob", "two").await.unwrap();
        let page = f.history.get_history("bob", "alice", Cursor::Latest).await.unwrap();
        assert_eq!(page.source, PageSource::Store);
        assert_eq!(page.messages[0].content, "two");
    }

    #[tokio::test]
    async fn test_send_before_pending_fill_is_visible() {
        let f = fixture().await;
        let messaging = MessagingService::new(f.store.clone(), f.cache.clone());
        messaging.register("bob", "testpass").await.unwrap();
        let chat = ChatKey::between("alice", "bob");
        messaging.send_message("alice", "bob", "one").await.unwrap();

        // Miss: the page holding only "one" is handed to a detached fill.
        let first = f.history.get_history("bob", "alice", Cursor::Latest).await.unwrap();
        assert_eq!(first.source, PageSource::Store);

        // The send lands before the fill task gets to run.
        messaging.send_message("alice", "bob", "two").await.unwrap();
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(!f.cache.contains(&chat));

        let page = f.history.get_history("bob", "alice", Cursor::Latest).await.unwrap();
        assert_eq!(page.source, PageSource::Store);
        assert_eq!(page.messages[0].content, "two");
        assert_eq!(page.messages.len(), 2);
    }

    #[tokio::test]
    async fn test_pages_walk_back_without_gaps() {
        let f = fixture().await;
        seed(&f.store, 25).await;

        let first = f.history.get_history("alice", "bob", Cursor::Latest).await.unwrap();
        assert_eq!(first.messages.len(), 20);
        assert_eq!(first.messages[0].content, "m24");

        let oldest = first.messages.last().unwrap().timestamp;
        let second = f
            .history
            .get_history("alice", "bob", Cursor::Before(oldest))
            .await
            .unwrap();
        assert_eq!(second.source, PageSource::Store);

        let contents: Vec<_> = second.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m4", "m3", "m2", "m1", "m0"]);
    }

    #[tokio::test]
    async fn test_later_pages_bypass_cache() {
        let f = fixture().await;
        seed(&f.store, 2).await;
        let chat = ChatKey::between("alice", "bob");
        f.cache.put_first_page(&chat, &[]).await.unwrap();

        let page = f
            .history
            .get_history("alice", "bob", Cursor::Before(time::now()))
            .await
            .unwrap();
        assert_eq!(page.source, PageSource::Store);
        assert_eq!(page.messages.len(), 2);
        assert_eq!(f.cache.hit_count() + f.cache.miss_count(), 0);
    }

    #[tokio::test]
    async fn test_cache_down_still_serves_history() {
        let f = fixture().await;
        seed(&f.store, 2).await;
        f.cache.disconnect();

        let page = f.history.get_history("alice", "bob", Cursor::Latest).await.unwrap();
        assert_eq!(page.source, PageSource::Store);
        assert_eq!(page.messages.len(), 2);
    }

    #[tokio::test]
    async fn test_undecodable_cached_page_is_a_miss() {
        let f = fixture().await;
        seed(&f.store, 1).await;

        struct Garbage;
        #[async_trait::async_trait]
        impl HistoryCache for Garbage {
            async fn connect(&self, _: &str, _: u16) -> Result<(), crate::error::ConnectionError> {
                Ok(())
            }
            async fn get_first_page(
                &self,
                _: &ChatKey,
            ) -> Result<Option<CachedPage>, CacheError> {
                Ok(Some(CachedPage::from_raw("cached_message".to_string())))
            }
            async fn put_first_page(&self, _: &ChatKey, _: &[Message]) -> Result<(), CacheError> {
                Ok(())
            }
            async fn generation(&self, _: &ChatKey) -> Result<u64, CacheError> {
                Ok(0)
            }
            async fn put_first_page_if_current(
                &self,
                _: &ChatKey,
                _: &[Message],
                _: u64,
            ) -> Result<bool, CacheError> {
                Ok(true)
            }
            async fn invalidate(&self, _: &ChatKey) -> Result<(), CacheError> {
                Ok(())
            }
        }

        let history = HistoryService::new(f.store.clone(), Arc::new(Garbage));
        let page = history.get_history("alice", "bob", Cursor::Latest).await.unwrap();
        assert_eq!(page.source, PageSource::Store);
        assert_eq!(page.messages.len(), 1);
    }

    #[tokio::test]
    async fn test_store_outage_propagates() {
        let f = fixture().await;
        f.store.set_failing(true);
        assert!(matches!(
            f.history.get_history("alice", "bob", Cursor::Latest).await,
            Err(HistoryError::Store(_))
        ));
    }

    #[tokio::test]
    async fn test_malformed_counterpart_rejected() {
        let f = fixture().await;
        assert!(matches!(
            f.history.get_history("alice", "bob:carol", Cursor::Latest).await,
            Err(HistoryError::Validation(ValidationError::InvalidUsername(_)))
        ));
        assert_eq!(f.store.fetch_count(), 0);
    }
}
