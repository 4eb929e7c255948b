//! Metrics collection for Prometheus integration
//!
//! Every coordinator owns its own [`prometheus::Registry`] so that several
//! coordinators can live in one process (and one test binary) without
//! colliding on metric names.

use prometheus::{
    Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

use crate::error::{ConsensusResult, Error, ErrorKind};

/// Metrics registry for Prometheus
pub struct MetricsRegistry {
    /// Prometheus registry
    registry: Registry,

    /// Tick coordinator metrics
    pub ticks: TickMetrics,

    /// Transport metrics
    pub transport: TransportMetrics,
}

/// Tick coordinator metrics
pub struct TickMetrics {
    /// Ticks that ran against a non-empty registry
    pub ticks_total: IntCounter,

    /// Tick duration histogram
    pub tick_duration: Histogram,

    /// Groups whose advance step exceeded the tick timeout
    pub tick_timeouts_total: IntCounter,

    /// Groups whose advance step failed or panicked
    pub group_errors_total: IntCounter,

    /// Batches the writer failed to persist
    pub persist_failures_total: IntCounter,

    /// Ready records persisted
    pub persisted_records_total: IntCounter,

    /// Registered groups
    pub registered_groups: IntGauge,
}

/// Transport metrics
pub struct TransportMetrics {
    /// Messages placed on a peer queue
    pub messages_queued_total: IntCounter,

    /// Messages dropped under backpressure, by reason
    pub backpressure_drops_total: IntCounterVec,

    /// Peer connections that could not be established
    pub setup_errors_total: IntCounter,

    /// Queued messages discarded because their group was removed
    pub purged_messages_total: IntCounter,

    /// Connected peers
    pub connected_peers: IntGauge,
}

fn metrics_error(e: prometheus::Error) -> Error {
    Error::with_context(ErrorKind::Internal, format!("Metrics error: {e}"))
}

fn counter(registry: &Registry, name: &str, help: &str) -> ConsensusResult<IntCounter> {
    let counter = IntCounter::new(name, help).map_err(metrics_error)?;
    registry
        .register(Box::new(counter.clone()))
        .map_err(metrics_error)?;
    Ok(counter)
}

fn gauge(registry: &Registry, name: &str, help: &str) -> ConsensusResult<IntGauge> {
    let gauge = IntGauge::new(name, help).map_err(metrics_error)?;
    registry
        .register(Box::new(gauge.clone()))
        .map_err(metrics_error)?;
    Ok(gauge)
}

impl MetricsRegistry {
    /// Create a new metrics registry
    pub fn new() -> ConsensusResult<Self> {
        let registry = Registry::new();

        let tick_duration = Histogram::with_opts(HistogramOpts::new(
            "multiraft_tick_duration_seconds",
            "Duration of a full tick including persistence and dissemination",
        ))
        .map_err(metrics_error)?;
        registry
            .register(Box::new(tick_duration.clone()))
            .map_err(metrics_error)?;

        let ticks = TickMetrics {
            ticks_total: counter(&registry, "multiraft_ticks_total", "Total ticks")?,
            tick_duration,
            tick_timeouts_total: counter(
                &registry,
                "multiraft_tick_timeouts_total",
                "Group advance steps that exceeded the tick timeout",
            )?,
            group_errors_total: counter(
                &registry,
                "multiraft_group_errors_total",
                "Group advance steps that failed",
            )?,
            persist_failures_total: counter(
                &registry,
                "multiraft_persist_failures_total",
                "Batches that failed to persist",
            )?,
            persisted_records_total: counter(
                &registry,
                "multiraft_persisted_records_total",
                "Ready records persisted",
            )?,
            registered_groups: gauge(
                &registry,
                "multiraft_registered_groups",
                "Number of registered consensus groups",
            )?,
        };

        let backpressure_drops_total = IntCounterVec::new(
            Opts::new(
                "multiraft_backpressure_drops_total",
                "Messages dropped under backpressure",
            ),
            &["reason"],
        )
        .map_err(metrics_error)?;
        registry
            .register(Box::new(backpressure_drops_total.clone()))
            .map_err(metrics_error)?;

        let transport = TransportMetrics {
            messages_queued_total: counter(
                &registry,
                "multiraft_messages_queued_total",
                "Messages placed on a peer queue",
            )?,
            backpressure_drops_total,
            setup_errors_total: counter(
                &registry,
                "multiraft_transport_setup_errors_total",
                "Peer connections that could not be established",
            )?,
            purged_messages_total: counter(
                &registry,
                "multiraft_purged_messages_total",
                "Queued messages discarded when their group was removed",
            )?,
            connected_peers: gauge(
                &registry,
                "multiraft_connected_peers",
                "Number of peers with an open queue",
            )?,
        };

        Ok(Self {
            registry,
            ticks,
            transport,
        })
    }

    /// Get the underlying registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render all metrics in the Prometheus text format
    pub fn export_text(&self) -> ConsensusResult<String> {
        TextEncoder::new()
            .encode_to_string(&self.registry.gather())
            .map_err(metrics_error)
    }
}

impl TransportMetrics {
    /// Count a backpressure drop
    pub fn record_drop(&self, reason: &str) {
        self.backpressure_drops_total
            .with_label_values(&[reason])
            .inc();
    }

    /// Drops recorded for a reason
    pub fn drops(&self, reason: &str) -> u64 {
        self.backpressure_drops_total
            .with_label_values(&[reason])
            .get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registries_are_independent() {
        let first = MetricsRegistry::new().unwrap();
        let second = MetricsRegistry::new().unwrap();

        first.ticks.ticks_total.inc();
        first.transport.record_drop("no_credit");

        assert_eq!(first.ticks.ticks_total.get(), 1);
        assert_eq!(second.ticks.ticks_total.get(), 0);
        assert_eq!(first.transport.drops("no_credit"), 1);
        assert_eq!(second.transport.drops("no_credit"), 0);
    }

    #[test]
    fn test_export_text() {
        let metrics = MetricsRegistry::new().unwrap();
        metrics.ticks.persisted_records_total.inc_by(3);

        let text = metrics.export_text().unwrap();
        assert!(text.contains("multiraft_persisted_records_total 3"));
    }
}
