//! Observability infrastructure for the telemetry bridge
//!
//! Provides:
//! - Prometheus metrics (poll outcomes and latency, per-sink transmits, dirty flags, backoff)
//! - Structured JSON logging of lifecycle events with tracing

use prometheus::{
    register_histogram, register_histogram_vec, register_int_counter, register_int_counter_vec,
    register_int_gauge, register_int_gauge_vec, Histogram, HistogramVec, IntCounter,
    IntCounterVec, IntGauge, IntGaugeVec,
};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{info, warn};

/// Histogram buckets for network latency (in seconds)
const LATENCY_BUCKETS: &[f64] = &[0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<BridgeMetricsInner> = OnceLock::new();

struct BridgeMetricsInner {
    polls_total: IntCounterVec,
    poll_ticks_dropped: IntCounter,
    poll_latency_seconds: Histogram,
    snapshot_generation: IntGauge,
    transmits_total: IntCounterVec,
    transmit_latency_seconds: HistogramVec,
    sink_dirty: IntGaugeVec,
    sink_consecutive_failures: IntGaugeVec,
}

impl BridgeMetricsInner {
    fn new() -> Self {
        Self {
            polls_total: register_int_counter_vec!(
                "telemetry_bridge_polls_total",
                "Completed polls of the telemetry source by outcome",
                &["outcome"]
            )
            .expect("Failed to register polls_total"),

            poll_ticks_dropped: register_int_counter!(
                "telemetry_bridge_poll_ticks_dropped_total",
                "Poll timer ticks dropped because a poll was still in flight"
            )
            .expect("Failed to register poll_ticks_dropped"),

            poll_latency_seconds: register_histogram!(
                "telemetry_bridge_poll_latency_seconds",
                "Time spent polling and enriching telemetry",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register poll_latency_seconds"),

            snapshot_generation: register_int_gauge!(
                "telemetry_bridge_snapshot_generation",
                "Generation of the latest stored snapshot"
            )
            .expect("Failed to register snapshot_generation"),

            transmits_total: register_int_counter_vec!(
                "telemetry_bridge_transmits_total",
                "Transmit attempts per sink by outcome",
                &["sink", "outcome"]
            )
            .expect("Failed to register transmits_total"),

            transmit_latency_seconds: register_histogram_vec!(
                "telemetry_bridge_transmit_latency_seconds",
                "Time spent transmitting a snapshot to a sink",
                &["sink"],
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register transmit_latency_seconds"),

            sink_dirty: register_int_gauge_vec!(
                "telemetry_bridge_sink_dirty",
                "1 while the sink has not yet received the latest snapshot",
                &["sink"]
            )
            .expect("Failed to register sink_dirty"),

            sink_consecutive_failures: register_int_gauge_vec!(
                "telemetry_bridge_sink_consecutive_failures",
                "Consecutive transmit failures per sink",
                &["sink"]
            )
            .expect("Failed to register sink_consecutive_failures"),
        }
    }
}

/// Outcome label values
pub mod outcome {
    pub const CHANGED: &str = "changed";
    pub const UNCHANGED: &str = "unchanged";
    pub const FAILED: &str = "failed";
    pub const SENT: &str = "sent";
}

/// Bridge metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct BridgeMetrics {
    _private: (),
}

impl Default for BridgeMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl BridgeMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(BridgeMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &BridgeMetricsInner {
        GLOBAL_METRICS.get().expect("Metrics not initialized")
    }

    pub fn record_poll(&self, outcome: &str, elapsed: Duration) {
        let inner = self.inner();
        inner.polls_total.with_label_values(&[outcome]).inc();
        inner.poll_latency_seconds.observe(elapsed.as_secs_f64());
    }

    pub fn inc_poll_ticks_dropped(&self) {
        self.inner().poll_ticks_dropped.inc();
    }

    pub fn set_snapshot_generation(&self, generation: u64) {
        self.inner()
            .snapshot_generation
            .set(i64::try_from(generation).unwrap_or(i64::MAX));
    }

    pub fn record_transmit(&self, sink: &str, outcome: &str, elapsed: Duration) {
        let inner = self.inner();
        inner.transmits_total.with_label_values(&[sink, outcome]).inc();
        inner
            .transmit_latency_seconds
            .with_label_values(&[sink])
            .observe(elapsed.as_secs_f64());
    }

    pub fn set_sink_dirty(&self, sink: &str, dirty: bool) {
        self.inner()
            .sink_dirty
            .with_label_values(&[sink])
            .set(dirty as i64);
    }

    pub fn set_sink_failures(&self, sink: &str, failures: u32) {
        self.inner()
            .sink_consecutive_failures
            .with_label_values(&[sink])
            .set(failures as i64);
    }
}

/// Structured logger for bridge lifecycle events
///
/// Provides consistent JSON-formatted records for startup, the initial
/// sync and shutdown.
#[derive(Clone)]
pub struct StructuredLogger {
    vehicle: String,
}

impl StructuredLogger {
    pub fn new(vehicle: impl Into<String>) -> Self {
        Self {
            vehicle: vehicle.into(),
        }
    }

    /// Log bridge startup
    pub fn log_startup(&self, version: &str, source: &str, sinks: &[String]) {
        info!(
            event = "bridge_started",
            vehicle = %self.vehicle,
            bridge_version = %version,
            source = %source,
            sinks = ?sinks,
            "Telemetry bridge started"
        );
    }

    /// Log the result of the startup poll-and-transmit
    pub fn log_initial_sync(&self, have_snapshot: bool, delivered: &[String], pending: &[String]) {
        if have_snapshot && pending.is_empty() {
            info!(
                event = "initial_sync",
                vehicle = %self.vehicle,
                delivered = ?delivered,
                "Initial sync delivered to every sink"
            );
        } else {
            warn!(
                event = "initial_sync",
                vehicle = %self.vehicle,
                have_snapshot = have_snapshot,
                delivered = ?delivered,
                pending = ?pending,
                "Initial sync incomplete, periodic loops will retry"
            );
        }
    }

    /// Log bridge shutdown
    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "bridge_shutdown",
            vehicle = %self.vehicle,
            reason = %reason,
            "Telemetry bridge shutting down"
        );
    }
}
