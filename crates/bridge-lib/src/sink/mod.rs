//! Downstream consumers of the latest snapshot
//!
//! Each sink is driven by its own scheduler. Transmits are wrapped in a
//! timeout by the engine and never run concurrently for the same sink.

mod abrp;
mod homeassistant;

pub use abrp::{AbrpConfig, AbrpFieldMap, AbrpSink};
pub use homeassistant::{HomeAssistantConfig, HomeAssistantSink};

use crate::error::SinkError;
use crate::models::Snapshot;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};

/// A downstream consumer of telemetry snapshots
#[async_trait]
pub trait Sink: Send + Sync {
    /// Unique name used for dirty tracking, logs and metrics
    fn name(&self) -> &str;

    /// Deliver one snapshot
    async fn transmit(&self, snapshot: &Snapshot) -> Result<(), SinkError>;

    /// Informational health flag shown in status output. Scheduling decisions
    /// go through the backoff gate, not this flag.
    fn healthy(&self) -> bool {
        true
    }
}

/// Last-result health flag shared by the HTTP sinks
#[derive(Debug)]
pub(crate) struct LastResult(AtomicBool);

impl LastResult {
    pub(crate) fn new() -> Self {
        Self(AtomicBool::new(true))
    }

    pub(crate) fn record<T, E>(&self, result: &Result<T, E>) {
        self.0.store(result.is_ok(), Ordering::Relaxed);
    }

    pub(crate) fn get(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}
