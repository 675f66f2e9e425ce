//! Observability infrastructure for the exporter itself
//!
//! Provides:
//! - Self-telemetry metrics (cycle latency, errors by phase, evictions, resets)
//! - Structured JSON logging of lifecycle events with tracing

use crate::error::ExportError;
use prometheus::{
    Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
};
use tracing::{info, warn};

/// Histogram buckets for cycle durations (in seconds)
const CYCLE_BUCKETS: &[f64] = &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];

/// Phases whose failures are counted separately
pub mod phases {
    pub const LIST: &str = "list";
    pub const INSPECT: &str = "inspect";
    pub const STATS: &str = "stats";
    pub const NODE_INFO: &str = "node_info";
}

/// Metrics about the exporter's own polling
#[derive(Clone)]
pub struct ExporterMetrics {
    cycle_duration_seconds: Histogram,
    cycles: IntCounterVec,
    errors: IntCounterVec,
    entities_tracked: IntGauge,
    evictions: IntCounter,
    counter_resets: IntCounter,
}

impl ExporterMetrics {
    /// Create and register the self-telemetry metrics
    pub fn new(registry: &Registry) -> Result<Self, ExportError> {
        let cycle_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "stats_exporter_cycle_duration_seconds",
                "Time spent in one reconciliation cycle",
            )
            .buckets(CYCLE_BUCKETS.to_vec()),
        )?;
        let cycles = IntCounterVec::new(
            Opts::new(
                "stats_exporter_cycles_total",
                "Reconciliation cycles by outcome",
            ),
            &["outcome"],
        )?;
        let errors = IntCounterVec::new(
            Opts::new(
                "stats_exporter_errors_total",
                "Runtime call failures by phase",
            ),
            &["phase"],
        )?;
        let entities_tracked = IntGauge::new(
            "stats_exporter_entities_tracked",
            "Number of containers currently tracked",
        )?;
        let evictions = IntCounter::new(
            "stats_exporter_evictions_total",
            "Containers whose series were deleted after they disappeared",
        )?;
        let counter_resets = IntCounter::new(
            "stats_exporter_counter_resets_total",
            "Runtime counters observed going backwards",
        )?;

        registry.register(Box::new(cycle_duration_seconds.clone()))?;
        registry.register(Box::new(cycles.clone()))?;
        registry.register(Box::new(errors.clone()))?;
        registry.register(Box::new(entities_tracked.clone()))?;
        registry.register(Box::new(evictions.clone()))?;
        registry.register(Box::new(counter_resets.clone()))?;

        Ok(Self {
            cycle_duration_seconds,
            cycles,
            errors,
            entities_tracked,
            evictions,
            counter_resets,
        })
    }

    /// Record a finished cycle
    pub fn observe_cycle(&self, duration_secs: f64, ok: bool) {
        self.cycle_duration_seconds.observe(duration_secs);
        let outcome = if ok { "ok" } else { "failed" };
        self.cycles.with_label_values(&[outcome]).inc();
    }

    /// Increment the error counter of a phase
    pub fn inc_errors(&self, phase: &str) {
        self.errors.with_label_values(&[phase]).inc();
    }

    pub fn set_entities_tracked(&self, count: usize) {
        self.entities_tracked.set(count as i64);
    }

    pub fn inc_evictions(&self) {
        self.evictions.inc();
    }

    pub fn add_counter_resets(&self, count: usize) {
        self.counter_resets.inc_by(count as u64);
    }

    /// Current error count of a phase
    pub fn errors(&self, phase: &str) -> u64 {
        self.errors.with_label_values(&[phase]).get()
    }

    pub fn evictions(&self) -> u64 {
        self.evictions.get()
    }
}

/// Structured logger for exporter events
///
/// Provides consistent JSON-formatted logging for lifecycle events.
#[derive(Clone)]
pub struct StructuredLogger {
    node_name: String,
}

impl StructuredLogger {
    pub fn new(node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
        }
    }

    /// Log exporter startup
    pub fn log_startup(&self, version: &str, poll_interval_secs: u64, port: u16) {
        info!(
            event = "exporter_started",
            node = %self.node_name,
            version = %version,
            poll_interval_secs = poll_interval_secs,
            port = port,
            "Stats exporter started"
        );
    }

    /// Log exporter shutdown
    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "exporter_shutdown",
            node = %self.node_name,
            reason = %reason,
            "Stats exporter shutting down"
        );
    }

    /// Log the label schema freeze
    pub fn log_schema_frozen(&self, containers: usize, labels: &[String]) {
        info!(
            event = "schema_frozen",
            node = %self.node_name,
            containers = containers,
            labels = ?labels,
            "Container label schema frozen; labels first seen later will be dropped"
        );
    }

    /// Log the removal of a container's series
    pub fn log_eviction(&self, container_id: &str, name: &str, series_removed: usize) {
        info!(
            event = "container_evicted",
            node = %self.node_name,
            container_id = %container_id,
            name = %name,
            series_removed = series_removed,
            "Deleted metrics of vanished container"
        );
    }

    /// Log counters that went backwards
    pub fn log_counter_reset(&self, container_id: &str, counters: &[String]) {
        warn!(
            event = "counter_reset",
            node = %self.node_name,
            container_id = %container_id,
            counters = ?counters,
            "Runtime counters went backwards, re-baselining"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exporter_metrics_creation() {
        let registry = Registry::new();
        let metrics = ExporterMetrics::new(&registry).unwrap();

        metrics.observe_cycle(0.01, true);
        metrics.observe_cycle(0.02, false);
        metrics.inc_errors(phases::INSPECT);
        metrics.inc_errors(phases::INSPECT);
        metrics.set_entities_tracked(3);
        metrics.inc_evictions();
        metrics.add_counter_resets(2);

        assert_eq!(metrics.errors(phases::INSPECT), 2);
        assert_eq!(metrics.errors(phases::LIST), 0);
        assert_eq!(metrics.evictions(), 1);
    }

    #[test]
    fn test_exporter_metrics_use_owned_registry() {
        // Two registries never conflict
        let first = Registry::new();
        let second = Registry::new();
        assert!(ExporterMetrics::new(&first).is_ok());
        assert!(ExporterMetrics::new(&second).is_ok());
    }

    #[test]
    fn test_structured_logger_creation() {
        let logger = StructuredLogger::new("test-node");
        assert_eq!(logger.node_name, "test-node");
    }
}
