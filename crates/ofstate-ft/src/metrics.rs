//! Prometheus counters for the flow table.
//!
//! Counters are handed to the table at construction instead of living in
//! process-wide statics, so separate table instances only share counters when
//! the caller passes them the same handles.

use prometheus::{Encoder, IntCounter, IntGauge, Opts, Registry, TextEncoder};

/// Counter handles updated by flow table operations.
#[derive(Clone, Debug)]
pub struct FlowTableCounters {
    /// Flows currently stored.
    pub flows: IntGauge,
    pub adds: IntCounter,
    pub deletes: IntCounter,
    /// Overwrites and effect modifications.
    pub modifies: IntCounter,
    /// Adds the data plane rejected, reported by the caller.
    pub forwarding_add_errors: IntCounter,
}

impl FlowTableCounters {
    /// Creates a fresh, unregistered set of counters.
    pub fn new() -> Result<Self, prometheus::Error> {
        Ok(Self {
            flows: IntGauge::with_opts(Opts::new("ft_flows", "Number of flows in the flow table"))?,
            adds: IntCounter::with_opts(Opts::new(
                "ft_add_total",
                "Total number of flows added to the flow table",
            ))?,
            deletes: IntCounter::with_opts(Opts::new(
                "ft_delete_total",
                "Total number of flows deleted from the flow table",
            ))?,
            modifies: IntCounter::with_opts(Opts::new(
                "ft_modify_total",
                "Total number of flow overwrites and modifications",
            ))?,
            forwarding_add_errors: IntCounter::with_opts(Opts::new(
                "ft_forwarding_add_error_total",
                "Total number of flow adds rejected by the forwarding backend",
            ))?,
        })
    }

    /// Registers every counter with `registry`.
    pub fn register(&self, registry: &Registry) -> Result<(), prometheus::Error> {
        registry.register(Box::new(self.flows.clone()))?;
        registry.register(Box::new(self.adds.clone()))?;
        registry.register(Box::new(self.deletes.clone()))?;
        registry.register(Box::new(self.modifies.clone()))?;
        registry.register(Box::new(self.forwarding_add_errors.clone()))?;
        Ok(())
    }

    /// Record a data plane rejection of a flow add.
    pub fn record_forwarding_add_error(&self) {
        self.forwarding_add_errors.inc();
    }
}

/// Renders every metric of `registry` in Prometheus text format.
pub fn gather_text(registry: &Registry) -> String {
    let encoder = TextEncoder::new();
    let mut buf = vec![];
    encoder.encode(&registry.gather(), &mut buf).ok();
    String::from_utf8(buf).unwrap_or_else(|_| String::from("# Error encoding metrics\n"))
}
