//! Request and response bodies for the HTTP API.

use parley_core::Message;
use serde::{Deserialize, Serialize};

// ── Requests ──────────────────────────────────────────────────────────────────

/// POST /register and POST /login
#[derive(Debug, Clone, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// POST /send
///
/// The sender is taken from the bearer token, never from the body.
#[derive(Debug, Clone, Deserialize)]
pub struct SendRequest {
    pub recipient: String,
    pub content: String,
}

/// GET /messages?recipient=...&timestamp=...
#[derive(Debug, Clone, Deserialize)]
pub struct HistoryQuery {
    pub recipient: String,
    /// RFC 3339 cursor. Absent or empty asks for the newest page.
    #[serde(default)]
    pub timestamp: Option<String>,
}

// ── Responses ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusMessage {
    pub message: String,
}

impl StatusMessage {
    pub fn new(message: &str) -> Self {
        Self {
            message: message.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResponse {
    pub message: String,
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub messages: Vec<Message>,
}
