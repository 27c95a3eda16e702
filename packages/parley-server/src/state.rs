//! Shared server state.
//!
//! Built once in `main` and cloned into every handler through axum `State`.
//! Everything inside is behind an `Arc`, so cloning is cheap.

use std::sync::Arc;

use parley_core::{
    HistoryCache, HistoryService, MessageStore, MessagingService, TokenAuthority,
};

use crate::config::ServerConfig;

#[derive(Clone)]
pub struct AppState {
    pub messaging: Arc<MessagingService>,
    pub history: Arc<HistoryService>,
    pub tokens: Arc<dyn TokenAuthority>,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    /// Wire the services over one store and one cache.
    pub fn new(
        config: ServerConfig,
        store: Arc<dyn MessageStore>,
        cache: Arc<dyn HistoryCache>,
        tokens: Arc<dyn TokenAuthority>,
    ) -> Self {
        let messaging = MessagingService::new(store.clone(), cache.clone())
            .with_policy(config.cache_policy)
            .with_io_timeout(config.io_timeout());
        let history = HistoryService::new(store, cache).with_io_timeout(config.io_timeout());

        Self {
            messaging: Arc::new(messaging),
            history: Arc::new(history),
            tokens,
            config: Arc::new(config),
        }
    }
}
