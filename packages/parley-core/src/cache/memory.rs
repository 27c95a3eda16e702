//! In-process history cache.
//!
//! Used when no Redis host is configured, and by tests. Entries expire
//! lazily on read and are swept by [`MemoryHistoryCache::cleanup_expired`].

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;

use super::{first_page_key, CachedPage, HistoryCache, FIRST_PAGE_TTL};
use crate::chat_key::ChatKey;
use crate::error::{CacheError, ConnectionError};
use crate::messaging::Message;

struct Entry {
    payload: String,
    expires_at: Instant,
}

/// Everything held for one chat: its first page and its invalidation
/// generation. Both sit under the same map shard lock, so a conditional
/// fill and an invalidation never interleave.
#[derive(Default)]
struct Slot {
    page: Option<Entry>,
    generation: u64,
    invalidated_at: Option<Instant>,
}

impl Slot {
    fn live_page(&self, now: Instant) -> Option<&Entry> {
        self.page.as_ref().filter(|e| e.expires_at > now)
    }
}

/// DashMap-backed [`HistoryCache`] with per-entry expiry.
pub struct MemoryHistoryCache {
    connected: AtomicBool,
    slots: DashMap<String, Slot>,
    ttl: Duration,
    hits: AtomicUsize,
    misses: AtomicUsize,
    writes: AtomicUsize,
}

impl MemoryHistoryCache {
    pub fn new() -> Self {
        Self::with_ttl(FIRST_PAGE_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            connected: AtomicBool::new(false),
            slots: DashMap::new(),
            ttl,
            hits: AtomicUsize::new(0),
            misses: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
        }
    }

    /// Simulate the backend going away. Operations fail with
    /// `NotConnected` until `connect` is called again.
    pub fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    pub fn contains(&self, chat: &ChatKey) -> bool {
        self.slots
            .get(&first_page_key(chat))
            .map_or(false, |slot| slot.live_page(Instant::now()).is_some())
    }

    /// Number of held pages, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.page.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn hit_count(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    pub fn miss_count(&self) -> usize {
        self.misses.load(Ordering::SeqCst)
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Remove expired pages. Returns how many were dropped.
    ///
    /// A chat's generation is forgotten once it has no page and was last
    /// invalidated more than one TTL ago. Any fill that read the older
    /// generation has long since timed out by then.
    pub fn cleanup_expired(&self) -> usize {
        let now = Instant::now();
        let ttl = self.ttl;
        let mut removed = 0;
        self.slots.retain(|_, slot| {
            if slot.page.is_some() && slot.live_page(now).is_none() {
                slot.page = None;
                removed += 1;
            }
            slot.page.is_some() || slot.invalidated_at.map_or(false, |at| at + ttl > now)
        });
        if removed > 0 {
            tracing::debug!(count = removed, "Cleaned up expired cached pages");
        }
        removed
    }

    fn check(&self) -> Result<(), CacheError> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(CacheError::NotConnected)
        }
    }

    fn entry(&self, messages: &[Message]) -> Result<Entry, CacheError> {
        let page = CachedPage::encode(messages)?;
        Ok(Entry {
            payload: page.as_str().to_string(),
            expires_at: Instant::now() + self.ttl,
        })
    }
}

impl Default for MemoryHistoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HistoryCache for MemoryHistoryCache {
    async fn connect(&self, host: &str, port: u16) -> Result<(), ConnectionError> {
        if !self.connected.swap(true, Ordering::SeqCst) {
            tracing::debug!(host, port, "In-memory cache ready");
        }
        Ok(())
    }

    async fn get_first_page(&self, chat: &ChatKey) -> Result<Option<CachedPage>, CacheError> {
        self.check()?;
        let now = Instant::now();

        let found = match self.slots.get_mut(&first_page_key(chat)) {
            Some(mut slot) => match slot.live_page(now).map(|e| e.payload.clone()) {
                Some(payload) => Some(payload),
                None => {
                    slot.page = None;
                    None
                }
            },
            None => None,
        };

        match found {
            Some(payload) => {
                self.hits.fetch_add(1, Ordering::SeqCst);
                Ok(Some(CachedPage::from_raw(payload)))
            }
            None => {
                self.misses.fetch_add(1, Ordering::SeqCst);
                Ok(None)
            }
        }
    }

    async fn put_first_page(&self, chat: &ChatKey, messages: &[Message]) -> Result<(), CacheError> {
        self.check()?;
        let entry = self.entry(messages)?;
        self.slots.entry(first_page_key(chat)).or_default().page = Some(entry);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn generation(&self, chat: &ChatKey) -> Result<u64, CacheError> {
        self.check()?;
        Ok(self
            .slots
            .get(&first_page_key(chat))
            .map_or(0, |slot| slot.generation))
    }

    async fn put_first_page_if_current(
        &self,
        chat: &ChatKey,
        messages: &[Message],
        generation: u64,
    ) -> Result<bool, CacheError> {
        self.check()?;
        let entry = self.entry(messages)?;
        {
            let mut slot = self.slots.entry(first_page_key(chat)).or_default();
            if slot.generation != generation {
                return Ok(false);
            }
            slot.page = Some(entry);
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }

    async fn invalidate(&self, chat: &ChatKey) -> Result<(), CacheError> {
        self.check()?;
        let mut slot = self.slots.entry(first_page_key(chat)).or_default();
        slot.page = None;
        slot.generation += 1;
        slot.invalidated_at = Some(Instant::now());
        Ok(())
    }
}
