//! # Authentication
//!
//! Credentials and bearer tokens.
//!
//! - [`passwords`] hashes and verifies user passwords (Argon2id).
//! - [`TokenAuthority`] issues and verifies the bearer tokens that identify
//!   the caller of every protected request. [`JwtAuthority`] is the HS256
//!   implementation used by the server.
//!
//! The rest of the core only ever sees the username a token resolves to.

pub mod passwords;

use std::time::Duration;

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::error::AuthError;

/// Default token lifetime (24 hours).
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(24 * 3600);

/// Issues and verifies bearer tokens.
pub trait TokenAuthority: Send + Sync {
    /// Issue a token naming `username`.
    fn issue_token(&self, username: &str) -> Result<String, AuthError>;

    /// Verify `token` and return the username it names.
    fn verify_token(&self, token: &str) -> Result<String, AuthError>;
}

/// Claims carried in a Parley token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub username: String,
    pub iat: i64,
    pub exp: i64,
}

/// HS256 JWT token authority.
pub struct JwtAuthority {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    ttl: Duration,
}

impl JwtAuthority {
    /// Create an authority signing with `secret`.
    pub fn new(secret: &[u8], ttl: Duration) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp"]);

        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation,
            ttl,
        }
    }

    /// Sign arbitrary claims. Exposed for tests that need expired tokens.
    pub fn sign(&self, claims: &Claims) -> Result<String, AuthError> {
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), claims, &self.encoding)
            .map_err(|e| AuthError::Issue(e.to_string()))
    }
}

impl TokenAuthority for JwtAuthority {
    fn issue_token(&self, username: &str) -> Result<String, AuthError> {
        let now = crate::time::now_timestamp();
        let claims = Claims {
            username: username.to_string(),
            iat: now,
            exp: now + self.ttl.as_secs() as i64,
        };
        self.sign(&claims)
    }

    fn verify_token(&self, token: &str) -> Result<String, AuthError> {
        match jsonwebtoken::decode::<Claims>(token, &self.decoding, &self.validation) {
            Ok(data) => Ok(data.claims.username),
            Err(e) => match e.kind() {
                ErrorKind::ExpiredSignature => Err(AuthError::Expired),
                _ => Err(AuthError::InvalidToken),
            },
        }
    }
}
