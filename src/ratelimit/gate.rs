//! The admission gate.
//!
//! Fixed-window counting against a shared store, failing open. The window
//! is anchored at the first request for a key: the increment that creates a
//! counter also sets its expiry, and the store drops the counter when that
//! expiry lapses. A burst at the end of one window followed by another at
//! the start of the next can therefore admit up to twice the limit.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};

use super::key::RateLimitKey;
use super::metrics::GateMetrics;
use super::rules::RateLimitConfig;
use crate::error::{Result, StoreError};
use crate::store::CounterStore;

/// Default bound on a single store round trip.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_millis(250);

/// Why a request was admitted or rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reason {
    /// The path is under an exempt prefix; the store was not consulted
    Exempt,
    /// The counter is at or below the limit
    WithinQuota { current: u64 },
    /// The counter went over the limit
    QuotaExceeded { current: u64 },
    /// The store could not be reached; the request is let through
    StoreUnavailable,
}

/// The per-request verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub allow: bool,
    pub reason: Reason,
}

impl Decision {
    fn exempt() -> Self {
        Self {
            allow: true,
            reason: Reason::Exempt,
        }
    }

    fn within_quota(current: u64) -> Self {
        Self {
            allow: true,
            reason: Reason::WithinQuota { current },
        }
    }

    fn quota_exceeded(current: u64) -> Self {
        Self {
            allow: false,
            reason: Reason::QuotaExceeded { current },
        }
    }

    fn fail_open() -> Self {
        Self {
            allow: true,
            reason: Reason::StoreUnavailable,
        }
    }

    /// The metrics label for this decision.
    pub fn outcome(&self) -> Outcome {
        match self.reason {
            Reason::Exempt => Outcome::Exempt,
            Reason::WithinQuota { .. } => Outcome::Allowed,
            Reason::QuotaExceeded { .. } => Outcome::Rejected,
            Reason::StoreUnavailable => Outcome::FailOpen,
        }
    }
}

/// Coarse decision category, used as a metrics label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    Exempt,
    Allowed,
    Rejected,
    FailOpen,
}

impl Outcome {
    pub const ALL: [Outcome; 4] = [
        Outcome::Exempt,
        Outcome::Allowed,
        Outcome::Rejected,
        Outcome::FailOpen,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Exempt => "exempt",
            Outcome::Allowed => "allowed",
            Outcome::Rejected => "rejected",
            Outcome::FailOpen => "fail_open",
        }
    }
}

/// Decides, once per request, whether it may proceed.
///
/// The gate holds no per-client state of its own and can be shared across
/// all request tasks behind an `Arc`.
pub struct AdmissionGate<S: CounterStore + ?Sized> {
    /// The shared counter store
    store: Arc<S>,
    /// Quota and exemptions
    config: Arc<RateLimitConfig>,
    /// Bound on each store round trip
    store_timeout: Duration,
    /// Decision counters
    metrics: GateMetrics,
}

impl<S: CounterStore + ?Sized> AdmissionGate<S> {
    /// Create a gate over `store`. The configuration is validated here so a
    /// gate never exists with an unenforceable quota.
    pub fn new(store: Arc<S>, config: RateLimitConfig) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            store,
            config: Arc::new(config),
            store_timeout: DEFAULT_STORE_TIMEOUT,
            metrics: GateMetrics::new()?,
        })
    }

    /// Override the store round-trip bound.
    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    /// The quota configuration.
    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// The decision counters.
    pub fn metrics(&self) -> &GateMetrics {
        &self.metrics
    }

    /// The counter store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Decide whether a request from `client` for `path` may proceed.
    ///
    /// Never fails: store errors are logged and the request is admitted.
    pub async fn admit(&self, client: &str, path: &str) -> Decision {
        let decision = self.decide(client, path).await;
        self.metrics.record(decision.outcome());
        decision
    }

    async fn decide(&self, client: &str, path: &str) -> Decision {
        if self.config.is_exempt(path) {
            trace!(path = %path, "Exempt path, skipping rate limit");
            return Decision::exempt();
        }

        let key = RateLimitKey::new(client, path);

        let current = match self.count(&key).await {
            Ok(current) => current,
            Err(e) => {
                warn!(
                    key = %key,
                    error = %e,
                    "Counter store unavailable, allowing request"
                );
                return Decision::fail_open();
            }
        };

        if current > self.config.limit {
            debug!(
                key = %key,
                count = current,
                limit = self.config.limit,
                "Rate limit exceeded"
            );
            Decision::quota_exceeded(current)
        } else {
            trace!(key = %key, count = current, "Within rate limit");
            Decision::within_quota(current)
        }
    }

    /// Increment the counter for `key`, starting its window if this
    /// increment created it.
    ///
    /// The two calls are not atomic as a pair. Concurrent creators may both
    /// set the expiry, which is harmless.
    async fn count(&self, key: &RateLimitKey) -> std::result::Result<u64, StoreError> {
        let current = self
            .bounded("INCR", self.store.incr(key.as_str()))
            .await?;

        if current == 1 {
            let window = self.config.window_seconds;
            self.bounded("EXPIRE", self.store.expire(key.as_str(), window))
                .await?;
        }

        Ok(current)
    }

    /// Ping the store under the same bound as request-path calls.
    pub async fn check_store(&self) -> std::result::Result<(), StoreError> {
        self.bounded("PING", self.store.ping()).await
    }

    async fn bounded<T, F>(&self, op: &'static str, call: F) -> std::result::Result<T, StoreError>
    where
        F: std::future::Future<Output = std::result::Result<T, StoreError>>,
    {
        tokio::time::timeout(self.store_timeout, call)
            .await
            .map_err(|_| StoreError::Timeout {
                op,
                after: self.store_timeout,
            })?
    }
}
