//! Bearer-token extractor.
//!
//! Handlers that take an [`AuthUser`] only run for requests carrying
//! `Authorization: Bearer <token>` with a token the server issued.

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};

use parley_core::AuthError;

use crate::error::ApiError;
use crate::state::AppState;

/// The username named by a verified bearer token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser(pub String);

/// Pull the token out of an `Authorization` header value.
fn bearer_token(value: &str) -> Result<&str, AuthError> {
    let token = value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))
        .ok_or(AuthError::InvalidToken)?
        .trim();
    if token.is_empty() {
        return Err(AuthError::InvalidToken);
    }
    Ok(token)
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .ok_or(AuthError::MissingToken)?;
        let value = header.to_str().map_err(|_| AuthError::InvalidToken)?;
        if value.trim().is_empty() {
            return Err(AuthError::MissingToken.into());
        }

        let username = state.tokens.verify_token(bearer_token(value)?)?;
        Ok(AuthUser(username))
    }
}
