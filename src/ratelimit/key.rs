//! Counter key generation.

use std::fmt;

/// Prefix shared by every counter the gate writes to the store.
pub const KEY_PREFIX: &str = "ratelimit";

/// The store key that identifies one `(client, path)` counter.
///
/// Rendered as `ratelimit:{client}:{path}`. Request paths always start
/// with `/` and client addresses never contain one, so the first `:/`
/// after the prefix separates the two parts and distinct pairs never
/// collide, IPv6 addresses included.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey(String);

impl RateLimitKey {
    /// Build the key for a client address and request path.
    pub fn new(client: &str, path: &str) -> Self {
        Self(format!("{}:{}:{}", KEY_PREFIX, client, path))
    }

    /// The key as sent to the store.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for RateLimitKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
