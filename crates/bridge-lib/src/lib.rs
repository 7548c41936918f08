//! Telemetry bridge core library
//!
//! Polls a vehicle telemetry source, keeps the latest meaningfully-changed
//! snapshot and delivers it to any number of independent sinks, each on its
//! own schedule with its own backoff.

pub mod clock;
pub mod detector;
pub mod engine;
pub mod error;
pub mod gate;
pub mod health;
pub mod models;
pub mod observability;
pub mod sink;
pub mod source;
pub mod store;

pub use detector::{ChangeDetector, DeadbandConfig, DeadbandDetector};
pub use engine::{
    EngineConfig, EngineStatus, InitialSyncReport, PollConfig, PollOutcome, SinkSchedule,
    SinkStatus, StatusHandle, SyncEngine,
};
pub use error::{SinkError, SourceError};
pub use gate::{BackoffPolicy, HealthGate};
pub use models::{FieldValue, Position, Snapshot};
pub use sink::Sink;
pub use source::PollSource;
pub use store::{SnapshotStore, StoreView};
