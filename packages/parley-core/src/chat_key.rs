//! Canonical conversation keys.
//!
//! A two-party conversation is stored under a single key derived from both
//! usernames, so Alice→Bob and Bob→Alice land in the same history stream.
//! The two identities are sorted (byte order) and joined with [`SEPARATOR`].
//! Usernames are restricted to `[A-Za-z0-9_.-]` at registration, so the
//! separator can never appear inside an identity and distinct pairs cannot
//! collide.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Character joining the two identities of a chat key.
pub const SEPARATOR: char = ':';

/// Order-independent identifier for a two-party conversation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatKey(String);

impl ChatKey {
    /// Derive the key for the conversation between `a` and `b`.
    pub fn between(a: &str, b: &str) -> Self {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        ChatKey(format!("{lo}{SEPARATOR}{hi}"))
    }

    /// The key as stored in the `chat` column and embedded in cache keys.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChatKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ChatKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_is_order_independent() {
        let pairs = [
            ("alice", "bob"),
            ("bob", "alice"),
            ("Zed", "adam"),
            ("user.1", "user_1"),
            ("same", "same"),
        ];
        for (a, b) in pairs {
            assert_eq!(ChatKey::between(a, b), ChatKey::between(b, a));
        }
    }

    #[test]
    fn test_key_sorts_ascending() {
        assert_eq!(ChatKey::between("sender", "recipient").as_str(), "recipient:sender");
        assert_eq!(ChatKey::between("alice", "bob").to_string(), "alice:bob");
    }

    #[test]
    fn test_distinct_partners_give_distinct_keys() {
        let ab = ChatKey::between("alice", "bob");
        let ac = ChatKey::between("alice", "carol");
        let bc = ChatKey::between("bob", "carol");
        assert_ne!(ab, ac);
        assert_ne!(ab, bc);
        assert_ne!(ac, bc);
    }

    #[test]
    fn test_prefix_identities_do_not_collide() {
        // "ab" + "c" vs "a" + "bc" would collide without a separator.
        assert_ne!(ChatKey::between("ab", "c"), ChatKey::between("a", "bc"));
    }
}
