//! Redis-backed history cache.

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use redis::aio::MultiplexedConnection;

use super::{first_page_key, generation_key, CachedPage, HistoryCache, FIRST_PAGE_TTL};
use crate::chat_key::ChatKey;
use crate::error::{CacheError, ConnectionError};
use crate::messaging::Message;

/// Upper bound on establishing the Redis connection.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Writes the page (KEYS[2]) only while the generation (KEYS[1]) still
/// reads ARGV[1]. A missing generation key counts as zero.
const PUT_IF_CURRENT_SCRIPT: &str = r"
if (redis.call('GET', KEYS[1]) or '0') == ARGV[1] then
    redis.call('SET', KEYS[2], ARGV[2], 'EX', ARGV[3])
    return 1
end
return 0
";

/// [`HistoryCache`] over a multiplexed Redis connection.
///
/// The connection handle is cheap to clone and safe to use from many
/// request tasks at once.
pub struct RedisHistoryCache {
    conn: RwLock<Option<MultiplexedConnection>>,
    connect_lock: tokio::sync::Mutex<()>,
    ttl: Duration,
}

impl RedisHistoryCache {
    pub fn new() -> Self {
        Self::with_ttl(FIRST_PAGE_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            conn: RwLock::new(None),
            connect_lock: tokio::sync::Mutex::new(()),
            ttl,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.conn.read().is_some()
    }

    fn connection(&self) -> Result<MultiplexedConnection, CacheError> {
        self.conn.read().clone().ok_or(CacheError::NotConnected)
    }
}

impl Default for RedisHistoryCache {
    fn default() -> Self {
        Self::new()
    }
}

fn unreachable(reason: impl ToString) -> ConnectionError {
    ConnectionError::Unreachable {
        backend: "cache",
        attempts: 1,
        reason: reason.to_string(),
    }
}

#[async_trait]
impl HistoryCache for RedisHistoryCache {
    async fn connect(&self, host: &str, port: u16) -> Result<(), ConnectionError> {
        let _guard = self.connect_lock.lock().await;
        if self.is_connected() {
            return Ok(());
        }

        let url = format!("redis://{}:{}/", host, port);
        let client = redis::Client::open(url.as_str()).map_err(|e| {
            ConnectionError::InvalidAddress {
                backend: "cache",
                reason: e.to_string(),
            }
        })?;

        let mut conn = tokio::time::timeout(CONNECT_TIMEOUT, client.get_multiplexed_async_connection())
            .await
            .map_err(|_| unreachable("connection attempt timed out"))?
            .map_err(unreachable)?;

        let pong: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(unreachable)?;
        tracing::info!(host, port, reply = pong.as_str(), "Connected to cache");

        *self.conn.write() = Some(conn);
        Ok(())
    }

    async fn get_first_page(&self, chat: &ChatKey) -> Result<Option<CachedPage>, CacheError> {
        let mut conn = self.connection()?;
        let raw: Option<String> = redis::cmd("GET")
            .arg(first_page_key(chat))
            .query_async(&mut conn)
            .await?;
        Ok(raw.map(CachedPage::from_raw))
    }

    async fn put_first_page(&self, chat: &ChatKey, messages: &[Message]) -> Result<(), CacheError> {
        let mut conn = self.connection()?;
        let page = CachedPage::encode(messages)?;
        let _: () = redis::cmd("SET")
            .arg(first_page_key(chat))
            .arg(page.as_str())
            .arg("EX")
            .arg(self.ttl.as_secs())
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn generation(&self, chat: &ChatKey) -> Result<u64, CacheError> {
        let mut conn = self.connection()?;
        let raw: Option<u64> = redis::cmd("GET")
            .arg(generation_key(chat))
            .query_async(&mut conn)
            .await?;
        Ok(raw.unwrap_or(0))
    }

    async fn put_first_page_if_current(
        &self,
        chat: &ChatKey,
        messages: &[Message],
        generation: u64,
    ) -> Result<bool, CacheError> {
        let mut conn = self.connection()?;
        let page = CachedPage::encode(messages)?;
        let written: i64 = redis::cmd("EVAL")
            .arg(PUT_IF_CURRENT_SCRIPT)
            .arg(2)
            .arg(generation_key(chat))
            .arg(first_page_key(chat))
            .arg(generation)
            .arg(page.as_str())
            .arg(self.ttl.as_secs())
            .query_async(&mut conn)
            .await?;
        Ok(written == 1)
    }

    async fn invalidate(&self, chat: &ChatKey) -> Result<(), CacheError> {
        let mut conn = self.connection()?;
        // The generation outlives the page by one TTL at most; a fill that
        // read it finishes within the I/O timeout.
        let gen_key = generation_key(chat);
        let _: (i64, u64, i64) = redis::pipe()
            .atomic()
            .cmd("DEL")
            .arg(first_page_key(chat))
            .cmd("INCR")
            .arg(&gen_key)
            .cmd("EXPIRE")
            .arg(&gen_key)
            .arg(self.ttl.as_secs())
            .query_async(&mut conn)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_operations_before_connect_are_not_connected() {
        let cache = RedisHistoryCache::new();
        let chat = ChatKey::between("alice", "bob");
        assert!(matches!(
            cache.get_first_page(&chat).await,
            Err(CacheError::NotConnected)
        ));
        assert!(matches!(
            cache.put_first_page(&chat, &[]).await,
            Err(CacheError::NotConnected)
        ));
        assert!(matches!(
            cache.invalidate(&chat).await,
            Err(CacheError::NotConnected)
        ));
        assert!(matches!(
            cache.generation(&chat).await,
            Err(CacheError::NotConnected)
        ));
        assert!(matches!(
            cache.put_first_page_if_current(&chat, &[], 0).await,
            Err(CacheError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_connect_to_closed_port_fails_once() {
        // Bind then drop a listener to get a port nothing is serving.
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };

        let cache = RedisHistoryCache::new();
        let err = cache.connect("127.0.0.1", port).await.unwrap_err();
        assert!(matches!(
            err,
            ConnectionError::Unreachable { attempts: 1, .. }
        ));
        assert!(!cache.is_connected());
    }
}
