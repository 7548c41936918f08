//! Per-sink backoff gate
//!
//! Tracks consecutive transmit failures for every sink and closes the sink's
//! gate for a cooldown window that grows with each failure, up to a ceiling.
//! A single success reopens the gate and resets the counter.

use crate::clock::{Clock, SystemClock};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Exponential cooldown curve with a ceiling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Cooldown after the first failure
    pub base: Duration,
    /// Upper bound for any cooldown
    pub max: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(5),
            max: Duration::from_secs(300), // 5 minutes
        }
    }
}

impl BackoffPolicy {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    /// Cooldown to apply after `consecutive_failures` failures in a row
    pub fn cooldown(&self, consecutive_failures: u32) -> Duration {
        if consecutive_failures == 0 {
            return Duration::ZERO;
        }

        // 2^31 already saturates any sane base; clamp the shift to stay in range.
        let exponent = (consecutive_failures - 1).min(31);
        let factor = 1u32 << exponent;
        self.base
            .checked_mul(factor)
            .unwrap_or(self.max)
            .min(self.max)
    }
}

/// Failure bookkeeping for one sink
#[derive(Debug, Clone, Default)]
pub struct SinkHealth {
    pub consecutive_failures: u32,
    pub last_failure_at: Option<Instant>,
    pub cooldown_until: Option<Instant>,
    pub last_success_at: Option<Instant>,
    pub last_error: Option<String>,
}

/// Serializable view of a sink's gate
#[derive(Debug, Clone, Serialize)]
pub struct GateStatus {
    pub open: bool,
    pub consecutive_failures: u32,
    pub cooldown_remaining_secs: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Backoff gate shared by all sink schedulers
#[derive(Debug)]
pub struct HealthGate {
    policy: BackoffPolicy,
    clock: Arc<dyn Clock>,
    sinks: DashMap<String, SinkHealth>,
}

impl HealthGate {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self::with_clock(policy, Arc::new(SystemClock))
    }

    pub fn with_clock(policy: BackoffPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            policy,
            clock,
            sinks: DashMap::new(),
        }
    }

    pub fn policy(&self) -> BackoffPolicy {
        self.policy
    }

    /// Record a failed transmit and return the cooldown now in force
    pub fn record_failure(&self, sink: &str, error: &str) -> Duration {
        let now = self.clock.now();
        let mut entry = self.sinks.entry(sink.to_string()).or_default();

        entry.consecutive_failures = entry.consecutive_failures.saturating_add(1);
        let cooldown = self.policy.cooldown(entry.consecutive_failures);
        entry.last_failure_at = Some(now);
        entry.cooldown_until = Some(now + cooldown);
        entry.last_error = Some(error.to_string());

        warn!(
            sink = %sink,
            consecutive_failures = entry.consecutive_failures,
            cooldown_secs = cooldown.as_secs_f64(),
            error = %error,
            "Sink transmit failed, backing off"
        );

        cooldown
    }

    /// Record a successful transmit; resets failures and cooldown
    pub fn record_success(&self, sink: &str) {
        let now = self.clock.now();
        let mut entry = self.sinks.entry(sink.to_string()).or_default();

        if entry.consecutive_failures > 0 {
            debug!(
                sink = %sink,
                failures = entry.consecutive_failures,
                "Sink recovered"
            );
        }

        entry.consecutive_failures = 0;
        entry.cooldown_until = None;
        entry.last_success_at = Some(now);
        entry.last_error = None;
    }

    /// True when the sink may be attempted now
    pub fn is_open(&self, sink: &str) -> bool {
        match self.sinks.get(sink).and_then(|h| h.cooldown_until) {
            Some(until) => self.clock.now() >= until,
            None => true,
        }
    }

    pub fn consecutive_failures(&self, sink: &str) -> u32 {
        self.sinks
            .get(sink)
            .map(|h| h.consecutive_failures)
            .unwrap_or(0)
    }

    /// Time left until the gate reopens (zero when open)
    pub fn cooldown_remaining(&self, sink: &str) -> Duration {
        let now = self.clock.now();
        self.sinks
            .get(sink)
            .and_then(|h| h.cooldown_until)
            .map(|until| until.saturating_duration_since(now))
            .unwrap_or(Duration::ZERO)
    }

    /// Copy of the raw bookkeeping for a sink
    pub fn health(&self, sink: &str) -> SinkHealth {
        self.sinks
            .get(sink)
            .map(|h| h.value().clone())
            .unwrap_or_default()
    }

    pub fn status(&self, sink: &str) -> GateStatus {
        let health = self.health(sink);
        GateStatus {
            open: self.is_open(sink),
            consecutive_failures: health.consecutive_failures,
            cooldown_remaining_secs: self.cooldown_remaining(sink).as_secs_f64(),
            last_error: health.last_error,
        }
    }
}
