//! Password hashing.
//!
//! Passwords are hashed with Argon2id and stored as PHC strings
//! (`$argon2id$v=19$...`), so the salt and parameters travel with the hash.
//! Verification goes through [`PasswordVerifier`], which compares digests in
//! constant time.

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use rand_core::OsRng;

use crate::error::StoreError;

/// Hash a plaintext password into a PHC string.
pub fn hash_password(password: &str) -> Result<String, StoreError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| StoreError::Hash(e.to_string()))
}

/// Check `password` against a stored PHC string.
///
/// A mismatched password is `Ok(false)`; only an unparsable stored hash is
/// an error.
pub fn verify_password(stored_hash: &str, password: &str) -> Result<bool, StoreError> {
    let parsed = PasswordHash::new(stored_hash).map_err(|e| StoreError::Hash(e.to_string()))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}
