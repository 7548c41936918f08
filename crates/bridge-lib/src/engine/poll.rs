//! Telemetry poll loop
//!
//! Polls the source on a fixed period, runs the result through the change
//! detector and updates the snapshot store. At most one poll is ever in
//! flight; a tick that fires while a poll is still running is dropped.

use crate::detector::ChangeDetector;
use crate::error::SourceError;
use crate::health::HealthRegistry;
use crate::models::Snapshot;
use crate::observability::{outcome, BridgeMetrics};
use crate::source::PollSource;
use crate::store::{ReplaceOutcome, SnapshotStore};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Semaphore};
use tokio::task::JoinSet;
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Configuration for the poll loop
#[derive(Debug, Clone)]
pub struct PollConfig {
    /// Period between polls (default: 8 seconds)
    pub interval: Duration,
    /// Upper bound for one poll and for its enrichment (default: 5 seconds)
    pub timeout: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(8),
            timeout: Duration::from_secs(5),
        }
    }
}

/// Result of one poll attempt
#[derive(Debug)]
pub enum PollOutcome {
    /// A changed snapshot was stored and every sink marked dirty
    Changed { generation: u64 },
    /// The snapshot matched the stored one within the dead-band
    Unchanged,
    /// The source failed or timed out; the stored snapshot is untouched
    Failed(SourceError),
    /// Another poll was still in flight
    Busy,
}

impl PollOutcome {
    pub fn is_changed(&self) -> bool {
        matches!(self, PollOutcome::Changed { .. })
    }
}

/// Drives a [`PollSource`] into the [`SnapshotStore`]
pub struct Poller {
    source: Arc<dyn PollSource>,
    detector: Arc<dyn ChangeDetector>,
    store: Arc<SnapshotStore>,
    config: PollConfig,
    permit: Arc<Semaphore>,
    consecutive_failures: AtomicU32,
    metrics: BridgeMetrics,
    health: Option<HealthRegistry>,
}

impl Poller {
    pub fn new(
        source: Arc<dyn PollSource>,
        detector: Arc<dyn ChangeDetector>,
        store: Arc<SnapshotStore>,
        config: PollConfig,
        metrics: BridgeMetrics,
        health: Option<HealthRegistry>,
    ) -> Self {
        Self {
            source,
            detector,
            store,
            config,
            permit: Arc::new(Semaphore::new(1)),
            consecutive_failures: AtomicU32::new(0),
            metrics,
            health,
        }
    }

    pub fn config(&self) -> &PollConfig {
        &self.config
    }

    /// Failed polls since the last successful one
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    /// Whether a poll is currently running
    pub fn is_polling(&self) -> bool {
        self.permit.available_permits() == 0
    }

    /// Run a single poll unless one is already in flight
    pub async fn poll_once(&self) -> PollOutcome {
        let Ok(_permit) = self.permit.clone().try_acquire_owned() else {
            return PollOutcome::Busy;
        };
        self.execute().await
    }

    /// Start the periodic poll loop
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        info!(
            source = %self.source.name(),
            interval_secs = self.config.interval.as_secs_f64(),
            timeout_secs = self.config.timeout.as_secs_f64(),
            "Starting poll loop"
        );

        let period = self.config.interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut in_flight = JoinSet::new();

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.permit.clone().try_acquire_owned() {
                        Ok(permit) => {
                            let this = self.clone();
                            in_flight.spawn(async move {
                                let _permit = permit;
                                this.execute().await;
                            });
                        }
                        Err(_) => {
                            debug!("Previous poll still in flight, dropping tick");
                            self.metrics.inc_poll_ticks_dropped();
                        }
                    }
                }
                Some(result) = in_flight.join_next(), if !in_flight.is_empty() => {
                    if let Err(e) = result {
                        if e.is_panic() {
                            error!(error = %e, "Poll task panicked");
                        }
                    }
                }
                _ = shutdown.recv() => {
                    info!("Shutting down poll loop");
                    break;
                }
            }
        }

        in_flight.abort_all();
        while in_flight.join_next().await.is_some() {}
    }

    async fn execute(&self) -> PollOutcome {
        let start = Instant::now();

        let outcome = match self.fetch().await {
            Ok(snapshot) => {
                match self
                    .store
                    .replace_if_changed(snapshot, self.detector.as_ref())
                    .await
                {
                    ReplaceOutcome::Replaced { generation } => {
                        info!(generation = generation, "Telemetry changed, sinks marked dirty");
                        self.metrics.set_snapshot_generation(generation);
                        for sink in self.store.dirty_sinks().await {
                            self.metrics.set_sink_dirty(&sink, true);
                        }
                        PollOutcome::Changed { generation }
                    }
                    ReplaceOutcome::Unchanged => {
                        debug!("Telemetry unchanged");
                        PollOutcome::Unchanged
                    }
                }
            }
            Err(e) => {
                warn!(
                    source = %self.source.name(),
                    error = %e,
                    "Poll failed, keeping previous snapshot"
                );
                PollOutcome::Failed(e)
            }
        };

        let label = match &outcome {
            PollOutcome::Changed { .. } => outcome::CHANGED,
            PollOutcome::Unchanged => outcome::UNCHANGED,
            _ => outcome::FAILED,
        };
        self.metrics.record_poll(label, start.elapsed());

        // Polls never overlap, so the counter has a single writer.
        match &outcome {
            PollOutcome::Failed(e) => {
                let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
                if let Some(health) = &self.health {
                    health.poll_failed(failures, &e.to_string()).await;
                }
            }
            _ => {
                self.consecutive_failures.store(0, Ordering::Relaxed);
                if let Some(health) = &self.health {
                    health.poll_succeeded().await;
                }
            }
        }

        outcome
    }

    /// Poll the source and apply best-effort enrichment
    async fn fetch(&self) -> Result<Snapshot, SourceError> {
        let limit = self.config.timeout;

        let snapshot = match timeout(limit, self.source.poll()).await {
            Ok(result) => result?,
            Err(_) => return Err(SourceError::Timeout(limit)),
        };

        match timeout(limit, self.source.enrich(&snapshot)).await {
            Ok(Ok(enriched)) => Ok(enriched),
            Ok(Err(e)) => {
                warn!(error = %e, "Enrichment failed, using plain snapshot");
                Ok(snapshot)
            }
            Err(_) => {
                warn!(timeout_secs = limit.as_secs_f64(), "Enrichment timed out, using plain snapshot");
                Ok(snapshot)
            }
        }
    }
}
