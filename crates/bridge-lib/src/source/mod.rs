//! Telemetry poll sources
//!
//! A poll source produces one [`Snapshot`] per call. The engine wraps every
//! call in a timeout, so implementations do not need their own.

mod http;

pub use http::{HttpPollSource, HttpSourceConfig};

use crate::error::SourceError;
use crate::models::Snapshot;
use async_trait::async_trait;

/// Producer of telemetry snapshots
#[async_trait]
pub trait PollSource: Send + Sync {
    /// Name used in logs and metrics
    fn name(&self) -> &str;

    /// Fetch the current telemetry
    async fn poll(&self) -> Result<Snapshot, SourceError>;

    /// Attach auxiliary data to a freshly polled snapshot.
    ///
    /// Best-effort: when this fails the engine keeps the un-enriched
    /// snapshot.
    async fn enrich(&self, snapshot: &Snapshot) -> Result<Snapshot, SourceError> {
        Ok(snapshot.clone())
    }
}
