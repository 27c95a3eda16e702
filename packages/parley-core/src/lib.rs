//! # Parley Core
//!
//! Storage, caching and service logic for a two-party direct-messaging
//! backend.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         PARLEY CORE MODULES                             │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌──────────────────────┐           ┌──────────────────────┐            │
//! │  │  MessagingService    │           │   HistoryService     │            │
//! │  │                      │           │                      │            │
//! │  │ - register / login   │           │ - first page: cache  │            │
//! │  │ - send_message       │           │   then store         │            │
//! │  │ - cache policy       │           │ - older pages: store │            │
//! │  └──────────┬───────────┘           └──────────┬───────────┘            │
//! │             │        ChatKey::between(a, b)    │                        │
//! │             ├──────────────────┬───────────────┤                        │
//! │             ▼                  ▼               ▼                        │
//! │  ┌──────────────────────┐  ┌──────────────────────┐                     │
//! │  │    MessageStore      │  │    HistoryCache      │                     │
//! │  │                      │  │                      │                     │
//! │  │ - SQLite (durable)   │  │ - Redis (24h TTL)    │                     │
//! │  │ - in-memory (tests)  │  │ - in-memory          │                     │
//! │  └──────────────────────┘  └──────────────────────┘                     │
//! │                                                                         │
//! │  ┌──────────────────────┐  ┌──────────────────────┐                     │
//! │  │        Auth          │  │       Retry          │                     │
//! │  │ - argon2 passwords   │  │ - startup connect    │                     │
//! │  │ - HS256 tokens       │  │   with fixed backoff │                     │
//! │  └──────────────────────┘  └──────────────────────┘                     │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Hierarchy
//!
//! - [`error`] - Error types for the entire library
//! - [`chat_key`] - Canonical conversation identifiers
//! - [`storage`] - Durable users and messages
//! - [`cache`] - First-page history cache
//! - [`messaging`] - Register, login and send
//! - [`history`] - Paged history reads
//! - [`auth`] - Password hashing and bearer tokens
//! - [`retry`] - Fixed-interval connect retry

// ============================================================================
// MODULE DECLARATIONS
// ============================================================================

pub mod auth;
pub mod cache;
pub mod chat_key;
pub mod error;
pub mod history;
pub mod messaging;
pub mod retry;
pub mod storage;
/// Timestamp helpers with microsecond precision.
pub mod time;

// ============================================================================
// RE-EXPORTS
// ============================================================================

pub use auth::{JwtAuthority, TokenAuthority};
pub use cache::{HistoryCache, MemoryHistoryCache, RedisHistoryCache};
pub use chat_key::ChatKey;
pub use error::{
    AuthError, CacheError, ConnectionError, HistoryError, MessagingError, StoreError,
    ValidationError,
};
pub use history::{Cursor, HistoryPage, HistoryService, PageSource};
pub use messaging::{CachePolicy, Message, MessagingService};
pub use retry::RetryPolicy;
pub use storage::{MemoryMessageStore, MessageStore, SqliteMessageStore};
