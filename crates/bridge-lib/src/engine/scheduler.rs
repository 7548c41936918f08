//! Per-sink transmit scheduling
//!
//! Every sink gets its own scheduler running at its own cadence. A tick
//! transmits only when all of these hold: no transmit is in flight for the
//! sink, a snapshot exists, the sink is dirty, and the backoff gate is open.

use crate::error::SinkError;
use crate::gate::HealthGate;
use crate::health::HealthRegistry;
use crate::observability::{outcome, BridgeMetrics};
use crate::sink::Sink;
use crate::store::{PendingSnapshot, PendingState, SnapshotStore};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};
use tracing::{debug, error, info};

/// Cadence and transmit bound for one sink
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkSchedule {
    /// Period between transmit attempts (default: 10 seconds)
    pub interval: Duration,
    /// Upper bound for one transmit (default: 5 seconds)
    pub timeout: Duration,
}

impl SinkSchedule {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }
}

impl Default for SinkSchedule {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            timeout: Duration::from_secs(5),
        }
    }
}

/// Why a tick did not transmit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// A previous transmit for this sink is still running
    InFlight,
    /// Nothing has been polled yet
    NoData,
    /// The latest snapshot was already delivered
    Clean,
    /// The sink is inside its backoff window
    CoolingDown,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::InFlight => "in_flight",
            SkipReason::NoData => "no_data",
            SkipReason::Clean => "clean",
            SkipReason::CoolingDown => "cooling_down",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one scheduler tick
#[derive(Debug)]
pub enum TickOutcome {
    Sent { generation: u64 },
    Failed { error: SinkError, cooldown: Duration },
    Skipped(SkipReason),
}

impl TickOutcome {
    pub fn is_sent(&self) -> bool {
        matches!(self, TickOutcome::Sent { .. })
    }
}

/// Drives one [`Sink`] from the [`SnapshotStore`]
pub struct SinkScheduler {
    sink: Arc<dyn Sink>,
    name: String,
    store: Arc<SnapshotStore>,
    gate: Arc<HealthGate>,
    schedule: SinkSchedule,
    permit: Arc<Semaphore>,
    metrics: BridgeMetrics,
    health: Option<HealthRegistry>,
}

impl SinkScheduler {
    pub fn new(
        sink: Arc<dyn Sink>,
        schedule: SinkSchedule,
        store: Arc<SnapshotStore>,
        gate: Arc<HealthGate>,
        metrics: BridgeMetrics,
        health: Option<HealthRegistry>,
    ) -> Self {
        let name = sink.name().to_string();
        Self {
            sink,
            name,
            store,
            gate,
            schedule,
            permit: Arc::new(Semaphore::new(1)),
            metrics,
            health,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sink(&self) -> &Arc<dyn Sink> {
        &self.sink
    }

    pub fn schedule(&self) -> SinkSchedule {
        self.schedule
    }

    /// Whether a transmit is currently running for this sink
    pub fn is_transmitting(&self) -> bool {
        self.permit.available_permits() == 0
    }

    /// Run one tick to completion, transmitting if the sink is eligible
    pub async fn tick(&self) -> TickOutcome {
        match self.prepare().await {
            Ok((permit, pending)) => self.transmit(permit, pending).await,
            Err(reason) => {
                debug!(sink = %self.name, reason = %reason, "Skipping transmit");
                TickOutcome::Skipped(reason)
            }
        }
    }

    /// Start the periodic transmit loop
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        info!(
            sink = %self.name,
            interval_secs = self.schedule.interval.as_secs_f64(),
            timeout_secs = self.schedule.timeout.as_secs_f64(),
            "Starting sink scheduler"
        );

        let period = self.schedule.interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut in_flight = JoinSet::new();

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.prepare().await {
                        Ok((permit, pending)) => {
                            let this = self.clone();
                            in_flight.spawn(async move {
                                this.transmit(permit, pending).await;
                            });
                        }
                        Err(reason) => {
                            debug!(sink = %self.name, reason = %reason, "Skipping transmit");
                        }
                    }
                }
                Some(result) = in_flight.join_next(), if !in_flight.is_empty() => {
                    if let Err(e) = result {
                        if e.is_panic() {
                            error!(sink = %self.name, error = %e, "Transmit task panicked");
                        }
                    }
                }
                _ = shutdown.recv() => {
                    info!(sink = %self.name, "Shutting down sink scheduler");
                    break;
                }
            }
        }

        in_flight.abort_all();
        while in_flight.join_next().await.is_some() {}
    }

    /// Check eligibility and take the in-flight permit.
    ///
    /// The permit is taken before reading the store so a transmit finishing
    /// between the two cannot cause the same generation to be sent twice.
    async fn prepare(&self) -> Result<(OwnedSemaphorePermit, PendingSnapshot), SkipReason> {
        let permit = self
            .permit
            .clone()
            .try_acquire_owned()
            .map_err(|_| SkipReason::InFlight)?;

        let pending = self
            .store
            .pending_for(&self.name)
            .await
            .map_err(|state| match state {
                PendingState::NoData => SkipReason::NoData,
                PendingState::Clean => SkipReason::Clean,
            })?;

        if !self.gate.is_open(&self.name) {
            return Err(SkipReason::CoolingDown);
        }

        Ok((permit, pending))
    }

    async fn transmit(&self, permit: OwnedSemaphorePermit, pending: PendingSnapshot) -> TickOutcome {
        let _permit = permit;
        let limit = self.schedule.timeout;
        let start = Instant::now();

        let result = match timeout(limit, self.sink.transmit(&pending.snapshot)).await {
            Ok(result) => result,
            Err(_) => Err(SinkError::Timeout(limit)),
        };
        let elapsed = start.elapsed();

        match result {
            Ok(()) => {
                let cleared = self.store.mark_clean(&self.name, pending.generation).await;
                self.gate.record_success(&self.name);

                self.metrics.record_transmit(&self.name, outcome::SENT, elapsed);
                self.metrics.set_sink_dirty(&self.name, !cleared);
                self.metrics.set_sink_failures(&self.name, 0);
                if let Some(health) = &self.health {
                    health.sink_delivered(&self.name).await;
                }

                if cleared {
                    debug!(
                        sink = %self.name,
                        generation = pending.generation,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "Snapshot delivered"
                    );
                } else {
                    debug!(
                        sink = %self.name,
                        generation = pending.generation,
                        "Snapshot delivered but superseded, sink stays dirty"
                    );
                }

                TickOutcome::Sent {
                    generation: pending.generation,
                }
            }
            Err(error) => {
                let cooldown = self.gate.record_failure(&self.name, &error.to_string());
                let failures = self.gate.consecutive_failures(&self.name);

                self.metrics.record_transmit(&self.name, outcome::FAILED, elapsed);
                self.metrics.set_sink_failures(&self.name, failures);
                if let Some(health) = &self.health {
                    let exhausted = cooldown >= self.gate.policy().max;
                    health
                        .sink_failed(&self.name, failures, exhausted, &error.to_string())
                        .await;
                }

                TickOutcome::Failed { error, cooldown }
            }
        }
    }
}
