//! Rate limiting logic: keys, quota rules, and the admission gate.

mod gate;
mod key;
mod metrics;
mod rules;

pub use gate::{AdmissionGate, Decision, Outcome, Reason, DEFAULT_STORE_TIMEOUT};
pub use key::{RateLimitKey, KEY_PREFIX};
pub use metrics::GateMetrics;
pub use rules::RateLimitConfig;
