//! Input rules for usernames, passwords and message content.

use crate::error::ValidationError;

/// Maximum username length in characters.
pub const MAX_USERNAME_LEN: usize = 64;

/// Minimum password length in characters.
pub const MIN_PASSWORD_LEN: usize = 8;

/// Maximum password length in characters.
pub const MAX_PASSWORD_LEN: usize = 128;

/// Maximum message length in characters.
pub const MAX_CONTENT_LEN: usize = 4096;

/// Usernames are 1–64 characters of `[A-Za-z0-9_.-]`.
///
/// The restriction keeps [`crate::chat_key::SEPARATOR`] out of identities.
pub fn validate_username(username: &str) -> Result<(), ValidationError> {
    if username.is_empty() {
        return Err(ValidationError::InvalidUsername(
            "username must not be empty".to_string(),
        ));
    }
    if username.chars().count() > MAX_USERNAME_LEN {
        return Err(ValidationError::InvalidUsername(format!(
            "username must be at most {} characters",
            MAX_USERNAME_LEN
        )));
    }
    if let Some(bad) = username
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-')))
    {
        return Err(ValidationError::InvalidUsername(format!(
            "username contains disallowed character {:?}",
            bad
        )));
    }
    Ok(())
}

pub fn validate_password(password: &str) -> Result<(), ValidationError> {
    let len = password.chars().count();
    if len < MIN_PASSWORD_LEN {
        return Err(ValidationError::InvalidPassword(format!(
            "password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    if len > MAX_PASSWORD_LEN {
        return Err(ValidationError::InvalidPassword(format!(
            "password must be at most {} characters",
            MAX_PASSWORD_LEN
        )));
    }
    Ok(())
}

pub fn validate_content(content: &str) -> Result<(), ValidationError> {
    if content.trim().is_empty() {
        return Err(ValidationError::InvalidContent(
            "message must not be empty".to_string(),
        ));
    }
    if content.chars().count() > MAX_CONTENT_LEN {
        return Err(ValidationError::InvalidContent(format!(
            "message must be at most {} characters",
            MAX_CONTENT_LEN
        )));
    }
    Ok(())
}
