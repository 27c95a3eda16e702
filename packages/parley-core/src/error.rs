//! # Error Handling
//!
//! Error types for Parley Core, grouped by the component that raises them.
//!
//! ## Error Hierarchy
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           ERROR HIERARCHY                               │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ConnectionError   - store/cache unreachable at startup                 │
//! │                      (fatal for the store, tolerated for the cache)     │
//! │                                                                         │
//! │  StoreError        - query/execution failure in the message store      │
//! │  │                   ("not found" is never a StoreError)                │
//! │  └── surfaces to HTTP callers as a server fault                         │
//! │                                                                         │
//! │  CacheError        - history cache failure                              │
//! │  └── always absorbed; degrades to a store read                          │
//! │                                                                         │
//! │  AuthError         - missing / invalid / expired bearer token           │
//! │  └── surfaces as unauthorized, never logged as a fault                  │
//! │                                                                         │
//! │  ValidationError   - malformed cursor, bad username, unknown recipient  │
//! │  └── surfaces as a client error                                         │
//! │                                                                         │
//! │  MessagingError    - Validation | Conflict | Store                      │
//! │  HistoryError      - Validation | Store                                 │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

/// Failure to establish a session with the store or the cache.
#[derive(Error, Debug)]
pub enum ConnectionError {
    /// The backend could not be reached within the retry window.
    #[error("Failed to connect to {backend} after {attempts} attempt(s): {reason}")]
    Unreachable {
        /// Which backend was being connected ("datastore" or "cache").
        backend: &'static str,
        /// Number of attempts made before giving up.
        attempts: u32,
        /// The last underlying error.
        reason: String,
    },

    /// The connection target was malformed.
    #[error("Invalid {backend} address: {reason}")]
    InvalidAddress {
        /// Which backend was being connected.
        backend: &'static str,
        /// What was wrong with it.
        reason: String,
    },
}

/// Query or execution failure in the message store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// An operation was attempted before `connect` succeeded.
    #[error("Datastore is not connected")]
    NotConnected,

    /// The database rejected or failed a statement.
    #[error("Database error: {0}")]
    Database(String),

    /// A user row with this name already exists.
    #[error("User already exists: {0}")]
    AlreadyExists(String),

    /// A stored credential hash could not be parsed.
    #[error("Credential hash error: {0}")]
    Hash(String),

    /// The call did not complete within the configured I/O timeout.
    #[error("Datastore operation timed out")]
    Timeout,

    /// The blocking task running the query panicked or was cancelled.
    #[error("Datastore task failed: {0}")]
    TaskJoin(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

/// History cache failure. Never surfaced to callers.
#[derive(Error, Debug)]
pub enum CacheError {
    /// `connect` has not succeeded (or the cache was never configured).
    #[error("Cache is not connected")]
    NotConnected,

    /// The cache backend returned an error.
    #[error("Cache backend error: {0}")]
    Backend(String),

    /// A page could not be encoded or decoded.
    #[error("Cache serialization error: {0}")]
    Serialization(String),

    /// The call did not complete within the configured I/O timeout.
    #[error("Cache operation timed out")]
    Timeout,
}

impl From<redis::RedisError> for CacheError {
    fn from(e: redis::RedisError) -> Self {
        CacheError::Backend(e.to_string())
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(e: serde_json::Error) -> Self {
        CacheError::Serialization(e.to_string())
    }
}

/// Bearer-token failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// No `Authorization` header was supplied.
    #[error("Authorization header is missing")]
    MissingToken,

    /// The token was malformed or its signature did not verify.
    #[error("Invalid or missing token")]
    InvalidToken,

    /// The token verified but its expiry has passed.
    #[error("Token has expired")]
    Expired,

    /// A token could not be issued.
    #[error("Failed to issue token: {0}")]
    Issue(String),
}

/// Client-side input errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// The pagination cursor was not an RFC 3339 timestamp.
    #[error("Invalid timestamp")]
    InvalidTimestamp,

    /// Username is empty, too long, or contains disallowed characters.
    #[error("Invalid username: {0}")]
    InvalidUsername(String),

    /// Password does not meet the length requirements.
    #[error("Invalid password: {0}")]
    InvalidPassword(String),

    /// Message content is empty or too long.
    #[error("Invalid message content: {0}")]
    InvalidContent(String),

    /// The recipient of a message is not a registered user.
    #[error("Recipient not found")]
    RecipientNotFound,

    /// Sender and recipient are the same user.
    #[error("Cannot send a message to yourself")]
    SelfMessage,
}

/// Errors from the register / login / send workflows.
#[derive(Error, Debug)]
pub enum MessagingError {
    /// The request was malformed or referenced an unknown user.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The username is already taken.
    #[error("Username already exists: {0}")]
    Conflict(String),

    /// The durable store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors from history reads. Cache failures never appear here.
#[derive(Error, Debug)]
pub enum HistoryError {
    /// The counterpart identity was malformed.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The durable store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}
