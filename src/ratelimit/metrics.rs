//! Decision counters for the admission gate.

use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};

use super::gate::Outcome;
use crate::error::Result;

/// Prometheus counters for gate decisions, held in a registry owned by
/// this value rather than the process-global one.
#[derive(Clone)]
pub struct GateMetrics {
    registry: Registry,
    decisions: IntCounterVec,
}

impl GateMetrics {
    /// Create the counters and register them in a fresh registry.
    pub fn new() -> Result<Self> {
        let registry = Registry::new();
        let decisions = IntCounterVec::new(
            Opts::new(
                "turnstile_decisions_total",
                "Admission decisions by outcome",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(decisions.clone()))?;

        // Pre-create every series so scrapes see zeroes instead of gaps.
        for outcome in Outcome::ALL {
            decisions.with_label_values(&[outcome.as_str()]);
        }

        Ok(Self {
            registry,
            decisions,
        })
    }

    /// Count one decision.
    pub fn record(&self, outcome: Outcome) {
        self.decisions
            .with_label_values(&[outcome.as_str()])
            .inc();
    }

    /// How many decisions with `outcome` have been recorded.
    pub fn count(&self, outcome: Outcome) -> u64 {
        self.decisions.with_label_values(&[outcome.as_str()]).get()
    }

    /// Render every registered metric in the Prometheus text format.
    pub fn render(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_count() {
        let metrics = GateMetrics::new().unwrap();

        metrics.record(Outcome::Allowed);
        metrics.record(Outcome::Allowed);
        metrics.record(Outcome::Rejected);

        assert_eq!(metrics.count(Outcome::Allowed), 2);
        assert_eq!(metrics.count(Outcome::Rejected), 1);
        assert_eq!(metrics.count(Outcome::FailOpen), 0);
    }

    #[test]
    fn test_render_includes_all_outcomes() {
        let metrics = GateMetrics::new().unwrap();
        metrics.record(Outcome::Exempt);

        let text = metrics.render().unwrap();
        assert!(text.contains("turnstile_decisions_total{outcome=\"exempt\"} 1"));
        assert!(text.contains("turnstile_decisions_total{outcome=\"fail_open\"} 0"));
    }

    #[test]
    fn test_instances_do_not_share_counters() {
        let a = GateMetrics::new().unwrap();
        let b = GateMetrics::new().unwrap();

        a.record(Outcome::Allowed);
        assert_eq!(b.count(Outcome::Allowed), 0);
    }
}
