//! Parley Server
//!
//! HTTP front end for Parley direct messaging:
//!
//! 1. **Accounts**: register with a username and password, log in for a
//!    bearer token.
//!
//! 2. **Sending**: post a message to another registered user.
//!
//! 3. **History**: page backwards through a two-party conversation. The
//!    newest page is served from the history cache when possible.
//!
//! Messages live in SQLite under `--data-dir`. The first-page cache is Redis
//! when `--redis-host` is set and an in-process map otherwise. A cache that
//! cannot be reached at startup is tolerated; a datastore that cannot be
//! reached within the connect timeout stops the process.

mod api;
mod auth;
mod config;
mod error;
mod protocol;
mod state;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use parley_core::{
    CachePolicy, HistoryCache, JwtAuthority, MemoryHistoryCache, MessageStore,
    RedisHistoryCache, SqliteMessageStore,
};

use config::ServerConfig;
use state::AppState;

// ── CLI Arguments ─────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "parley-server", version, about = "Parley direct-messaging server")]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value_t = config::DEFAULT_PORT, env = "PARLEY_PORT")]
    port: u16,

    /// Directory holding the message database
    #[arg(long, default_value = "./data", env = "PARLEY_DATA_DIR")]
    data_dir: PathBuf,

    /// Database name within the data directory
    #[arg(long, default_value = "parley", env = "PARLEY_KEYSPACE")]
    keyspace: String,

    /// Redis host for the history cache. Without it the cache is in-process.
    #[arg(long, env = "REDIS_HOST")]
    redis_host: Option<String>,

    /// Redis port
    #[arg(long, default_value_t = config::DEFAULT_REDIS_PORT, env = "REDIS_PORT")]
    redis_port: u16,

    /// Secret used to sign bearer tokens
    #[arg(long, env = "PARLEY_JWT_SECRET", hide_env_values = true)]
    jwt_secret: String,

    /// Bearer token lifetime in seconds
    #[arg(long, default_value_t = 86400, env = "PARLEY_TOKEN_TTL_SECS")]
    token_ttl_secs: u64,

    /// Pause between datastore connection attempts, in seconds
    #[arg(long, default_value_t = 5, env = "PARLEY_CONNECT_RETRY_SECS")]
    connect_retry_secs: u64,

    /// Give up connecting to the datastore after this many seconds
    #[arg(long, default_value_t = 60, env = "PARLEY_CONNECT_TIMEOUT_SECS")]
    connect_timeout_secs: u64,

    /// Bound on a single datastore or cache call, in seconds
    #[arg(long, default_value_t = 5, env = "PARLEY_IO_TIMEOUT_SECS")]
    io_timeout_secs: u64,

    /// What a send does to the cached first page: invalidate-on-send or accept-stale
    #[arg(long, default_value_t = CachePolicy::InvalidateOnSend, env = "PARLEY_CACHE_POLICY")]
    cache_policy: CachePolicy,

    /// Sweep interval for the in-process cache, in seconds
    #[arg(long, default_value_t = 300, env = "PARLEY_CLEANUP_INTERVAL_SECS")]
    cleanup_interval_secs: u64,

    /// Emit logs as JSON lines
    #[arg(long, env = "PARLEY_LOG_JSON")]
    log_json: bool,
}

impl Args {
    fn into_config(self) -> ServerConfig {
        ServerConfig {
            port: self.port,
            data_dir: self.data_dir,
            keyspace: self.keyspace,
            redis_host: self.redis_host.filter(|h| !h.trim().is_empty()),
            redis_port: self.redis_port,
            jwt_secret: self.jwt_secret,
            token_ttl_secs: self.token_ttl_secs,
            connect_retry_secs: self.connect_retry_secs,
            connect_timeout_secs: self.connect_timeout_secs,
            io_timeout_secs: self.io_timeout_secs,
            cache_policy: self.cache_policy,
            cleanup_interval_secs: self.cleanup_interval_secs,
        }
    }
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "parley_server=info,parley_core=info,tower_http=info".into());

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

// ── Entry Point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_tracing(args.log_json);
    let config = args.into_config();

    if config.jwt_secret.is_empty() {
        tracing::error!("PARLEY_JWT_SECRET must not be empty");
        std::process::exit(1);
    }

    // ── Datastore ─────────────────────────────────────────────────────────

    let store = Arc::new(SqliteMessageStore::new(config.retry_policy()));
    if let Err(e) = store
        .connect(&config.store_location(), &config.keyspace)
        .await
    {
        tracing::error!(error = %e, "Datastore unavailable, shutting down");
        std::process::exit(1);
    }

    // ── History Cache ─────────────────────────────────────────────────────

    let cache: Arc<dyn HistoryCache> = match config.redis_host.as_deref() {
        Some(host) => {
            let redis = Arc::new(RedisHistoryCache::new());
            if let Err(e) = redis.connect(host, config.redis_port).await {
                tracing::warn!(
                    error = %e,
                    "Cache unavailable, history will be read from the datastore"
                );
            }
            redis
        }
        None => {
            let memory = Arc::new(MemoryHistoryCache::new());
            if let Err(e) = memory.connect("in-process", 0).await {
                tracing::warn!(error = %e, "In-process cache failed to start");
            }
            tracing::info!("No Redis host configured, using in-process cache");

            let cleanup_cache = memory.clone();
            let cleanup_interval = config.cleanup_interval();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(cleanup_interval);
                loop {
                    interval.tick().await;
                    cleanup_cache.cleanup_expired();
                }
            });

            memory
        }
    };

    // ── Router ────────────────────────────────────────────────────────────

    let tokens = Arc::new(JwtAuthority::new(
        config.jwt_secret.as_bytes(),
        config.token_ttl(),
    ));
    tracing::info!(
        cache_policy = config.cache_policy.as_str(),
        io_timeout_secs = config.io_timeout_secs,
        "Services ready"
    );

    let port = config.port;
    let app = api::router(AppState::new(config, store.clone(), cache, tokens));

    let addr = format!("0.0.0.0:{}", port);
    tracing::info!("Parley server starting on {}", addr);

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(error = %e, addr = addr.as_str(), "Failed to bind address");
            std::process::exit(1);
        }
    };

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!(error = %e, "Server error");
    }

    store.close();
    tracing::info!("Parley server stopped");
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

// ── Tests ─────────────────────────────────────────────────────────────────────
