//! Synchronization engine
//!
//! Wires one poll source, the change detector, the snapshot store, the
//! backoff gate and a scheduler per sink into a single unit that can run
//! the startup sync and the periodic loops.

mod poll;
mod scheduler;


pub use poll::{PollConfig, PollOutcome, Poller};
pub use scheduler::{SinkSchedule, SinkScheduler, SkipReason, TickOutcome};

use crate::clock::{Clock, SystemClock};
use crate::detector::{ChangeDetector, DeadbandDetector};
use crate::gate::{BackoffPolicy, GateStatus, HealthGate};
use crate::health::HealthRegistry;
use crate::models::Snapshot;
use crate::observability::BridgeMetrics;
use crate::sink::Sink;
use crate::source::PollSource;
use crate::store::SnapshotStore;
use anyhow::{bail, Result};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::{error, info};

/// Engine-wide settings
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub poll: PollConfig,
    pub backoff: BackoffPolicy,
}

/// Result of the startup poll-and-transmit
#[derive(Debug)]
pub struct InitialSyncReport {
    pub poll: PollOutcome,
    /// Sinks that accepted the snapshot
    pub delivered: Vec<String>,
    /// Sinks still dirty afterwards
    pub pending: Vec<String>,
}

impl InitialSyncReport {
    pub fn is_complete(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Builder for [`SyncEngine`]
pub struct SyncEngineBuilder {
    source: Option<Arc<dyn PollSource>>,
    detector: Option<Arc<dyn ChangeDetector>>,
    sinks: Vec<(Arc<dyn Sink>, SinkSchedule)>,
    config: EngineConfig,
    clock: Option<Arc<dyn Clock>>,
    metrics: Option<BridgeMetrics>,
    health: Option<HealthRegistry>,
}

impl SyncEngineBuilder {
    pub fn new() -> Self {
        Self {
            source: None,
            detector: None,
            sinks: Vec::new(),
            config: EngineConfig::default(),
            clock: None,
            metrics: None,
            health: None,
        }
    }

    pub fn source(mut self, source: Arc<dyn PollSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn detector(mut self, detector: Arc<dyn ChangeDetector>) -> Self {
        self.detector = Some(detector);
        self
    }

    pub fn sink(mut self, sink: Arc<dyn Sink>, schedule: SinkSchedule) -> Self {
        self.sinks.push((sink, schedule));
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll.interval = interval;
        self
    }

    pub fn poll_timeout(mut self, timeout: Duration) -> Self {
        self.config.poll.timeout = timeout;
        self
    }

    pub fn backoff(mut self, policy: BackoffPolicy) -> Self {
        self.config.backoff = policy;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn metrics(mut self, metrics: BridgeMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn build(self) -> Result<SyncEngine> {
        let Some(source) = self.source else {
            bail!("A poll source must be configured");
        };
        if self.sinks.is_empty() {
            bail!("At least one sink must be configured");
        }

        let mut seen = HashSet::new();
        for (sink, _) in &self.sinks {
            if !seen.insert(sink.name().to_string()) {
                bail!("Duplicate sink name: {}", sink.name());
            }
        }

        let detector = self
            .detector
            .unwrap_or_else(|| Arc::new(DeadbandDetector::default()));
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let metrics = self.metrics.unwrap_or_default();

        let store = Arc::new(SnapshotStore::with_sinks(
            self.sinks.iter().map(|(sink, _)| sink.name().to_string()),
        ));
        let gate = Arc::new(HealthGate::with_clock(self.config.backoff, clock));

        let poller = Arc::new(Poller::new(
            source,
            detector,
            store.clone(),
            self.config.poll.clone(),
            metrics.clone(),
            self.health.clone(),
        ));

        let schedulers = self
            .sinks
            .into_iter()
            .map(|(sink, schedule)| {
                Arc::new(SinkScheduler::new(
                    sink,
                    schedule,
                    store.clone(),
                    gate.clone(),
                    metrics.clone(),
                    self.health.clone(),
                ))
            })
            .collect();

        Ok(SyncEngine {
            store,
            gate,
            poller,
            schedulers,
        })
    }
}

impl Default for SyncEngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// The assembled poll/transmit pipeline
pub struct SyncEngine {
    store: Arc<SnapshotStore>,
    gate: Arc<HealthGate>,
    poller: Arc<Poller>,
    schedulers: Vec<Arc<SinkScheduler>>,
}

impl SyncEngine {
    pub fn builder() -> SyncEngineBuilder {
        SyncEngineBuilder::new()
    }

    pub fn store(&self) -> &Arc<SnapshotStore> {
        &self.store
    }

    pub fn gate(&self) -> &Arc<HealthGate> {
        &self.gate
    }

    pub fn poller(&self) -> &Arc<Poller> {
        &self.poller
    }

    pub fn schedulers(&self) -> &[Arc<SinkScheduler>] {
        &self.schedulers
    }

    /// Scheduler for the named sink
    pub fn scheduler(&self, name: &str) -> Option<&Arc<SinkScheduler>> {
        self.schedulers.iter().find(|s| s.name() == name)
    }

    pub fn sink_names(&self) -> Vec<String> {
        self.schedulers.iter().map(|s| s.name().to_string()).collect()
    }

    /// Read-only view for the status API
    pub fn status_handle(&self) -> StatusHandle {
        StatusHandle {
            store: self.store.clone(),
            gate: self.gate.clone(),
            sinks: self.schedulers.iter().map(|s| s.sink().clone()).collect(),
        }
    }

    /// Poll once, then give every sink one transmit attempt in parallel.
    ///
    /// Failures are reported, never fatal: the periodic loops retry.
    pub async fn initial_sync(&self) -> InitialSyncReport {
        let poll = self.poller.poll_once().await;

        let mut ticks = JoinSet::new();
        for scheduler in &self.schedulers {
            let scheduler = scheduler.clone();
            ticks.spawn(async move {
                let outcome = scheduler.tick().await;
                (scheduler.name().to_string(), outcome)
            });
        }

        let mut delivered = Vec::new();
        while let Some(result) = ticks.join_next().await {
            match result {
                Ok((name, outcome)) if outcome.is_sent() => delivered.push(name),
                Ok(_) => {}
                Err(e) => error!(error = %e, "Initial transmit task failed"),
            }
        }
        delivered.sort();

        let pending = self.store.dirty_sinks().await;

        InitialSyncReport {
            poll,
            delivered,
            pending,
        }
    }

    /// Run the poll loop and every sink scheduler until shutdown.
    ///
    /// In-flight polls and transmits are cancelled when the signal arrives.
    pub async fn run(&self, shutdown: broadcast::Receiver<()>) {
        info!(sinks = self.schedulers.len(), "Starting sync engine");

        let mut loops = JoinSet::new();
        loops.spawn(self.poller.clone().run(shutdown.resubscribe()));
        for scheduler in &self.schedulers {
            loops.spawn(scheduler.clone().run(shutdown.resubscribe()));
        }
        drop(shutdown);

        while let Some(result) = loops.join_next().await {
            if let Err(e) = result {
                error!(error = %e, "Engine loop exited abnormally");
            }
        }

        info!("Sync engine stopped");
    }
}

/// Per-sink entry of [`EngineStatus`]
#[derive(Debug, Clone, Serialize)]
pub struct SinkStatus {
    pub name: String,
    pub dirty: bool,
    pub healthy: bool,
    #[serde(flatten)]
    pub gate: GateStatus,
}

/// Snapshot of the engine state served by the status endpoint
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub generation: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<Snapshot>,
    pub sinks: Vec<SinkStatus>,
}

/// Cloneable read access to engine state
#[derive(Clone)]
pub struct StatusHandle {
    store: Arc<SnapshotStore>,
    gate: Arc<HealthGate>,
    sinks: Vec<Arc<dyn Sink>>,
}

impl StatusHandle {
    pub async fn latest(&self) -> Option<Arc<Snapshot>> {
        self.store.latest().await
    }

    pub async fn status(&self) -> EngineStatus {
        let view = self.store.view().await;

        let sinks = self
            .sinks
            .iter()
            .map(|sink| {
                let name = sink.name();
                SinkStatus {
                    name: name.to_string(),
                    dirty: view.is_dirty(name),
                    healthy: sink.healthy(),
                    gate: self.gate.status(name),
                }
            })
            .collect();

        EngineStatus {
            generation: view.generation,
            snapshot: view.latest.map(|s| (*s).clone()),
            sinks,
        }
    }
}
