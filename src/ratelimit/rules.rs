//! Quota rules and exempt-path matching.
//!
//! A single quota (`limit` requests per `window_seconds`) applies to every
//! `(client, path)` pair, except for paths that fall under one of the
//! configured exempt prefixes. Exempt paths stay reachable even when the
//! counter store is down, so the gate's own health endpoints are always
//! observable.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::error::{Result, TurnstileError};

/// Rate limiting configuration, immutable after startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Maximum requests allowed per key within one window
    #[serde(default = "default_limit")]
    pub limit: u64,

    /// Window length in seconds, anchored at the first request of the window
    #[serde(default = "default_window_seconds")]
    pub window_seconds: u64,

    /// Path prefixes that are never counted
    #[serde(default = "default_exempt_path_prefixes")]
    pub exempt_path_prefixes: BTreeSet<String>,

    /// Message placed in the `detail` field of a 429 response
    #[serde(default = "default_rejection_message")]
    pub rejection_message: String,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            limit: default_limit(),
            window_seconds: default_window_seconds(),
            exempt_path_prefixes: default_exempt_path_prefixes(),
            rejection_message: default_rejection_message(),
        }
    }
}

fn default_limit() -> u64 {
    100
}

fn default_window_seconds() -> u64 {
    60
}

fn default_exempt_path_prefixes() -> BTreeSet<String> {
    ["/metrics", "/health"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_rejection_message() -> String {
    "Too many requests. Please try again later.".to_string()
}

impl RateLimitConfig {
    /// Create a configuration with the given quota and the default exemptions.
    pub fn new(limit: u64, window_seconds: u64) -> Self {
        Self {
            limit,
            window_seconds,
            ..Default::default()
        }
    }

    /// Replace the exempt prefixes.
    pub fn with_exempt_prefixes<I, S>(mut self, prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exempt_path_prefixes = prefixes.into_iter().map(Into::into).collect();
        self
    }

    /// Replace the rejection message.
    pub fn with_rejection_message(mut self, message: impl Into<String>) -> Self {
        self.rejection_message = message.into();
        self
    }

    /// Whether `path` starts with any exempt prefix.
    pub fn is_exempt(&self, path: &str) -> bool {
        self.exempt_path_prefixes
            .iter()
            .any(|prefix| path.starts_with(prefix.as_str()))
    }

    /// Check that the quota can actually be enforced.
    pub fn validate(&self) -> Result<()> {
        if self.limit == 0 {
            return Err(TurnstileError::Config(
                "rate_limiting.limit must be greater than zero".to_string(),
            ));
        }

        if self.window_seconds == 0 {
            return Err(TurnstileError::Config(
                "rate_limiting.window_seconds must be greater than zero".to_string(),
            ));
        }

        // An empty prefix would exempt every path.
        if let Some(bad) = self
            .exempt_path_prefixes
            .iter()
            .find(|prefix| !prefix.starts_with('/'))
        {
            return Err(TurnstileError::Config(format!(
                "exempt path prefix {:?} must start with '/'",
                bad
            )));
        }

        if self.rejection_message.trim().is_empty() {
            return Err(TurnstileError::Config(
                "rate_limiting.rejection_message must not be empty".to_string(),
            ));
        }

        Ok(())
    }
}
