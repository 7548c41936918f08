//! Latest-snapshot store with per-sink dirty tracking
//!
//! The store owns the single latest snapshot and one dirty flag per
//! registered sink. Replacing the snapshot and marking every sink dirty
//! happen under one write lock, so a reader sees either the old snapshot
//! with the old flags or the new snapshot with all flags set.

use crate::detector::ChangeDetector;
use crate::models::Snapshot;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Result of offering a freshly polled snapshot to the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplaceOutcome {
    /// The snapshot replaced the previous one; every sink is now dirty
    Replaced { generation: u64 },
    /// The detector judged it equivalent to the stored snapshot
    Unchanged,
}

/// A snapshot waiting to be delivered to a sink
#[derive(Debug, Clone)]
pub struct PendingSnapshot {
    pub snapshot: Arc<Snapshot>,
    pub generation: u64,
}

/// Why a sink has nothing to send right now
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingState {
    /// No snapshot has been stored yet
    NoData,
    /// The latest snapshot has already been delivered to this sink
    Clean,
}

/// Copy of the whole store taken under one read lock
#[derive(Debug, Clone)]
pub struct StoreView {
    pub generation: u64,
    pub latest: Option<Arc<Snapshot>>,
    pub dirty: BTreeMap<String, bool>,
}

impl StoreView {
    pub fn is_dirty(&self, sink: &str) -> bool {
        self.dirty.get(sink).copied().unwrap_or(true)
    }
}

#[derive(Debug, Default)]
struct StoreState {
    latest: Option<Arc<Snapshot>>,
    generation: u64,
    dirty: BTreeMap<String, bool>,
}

/// Holds the latest snapshot and the per-sink dirty flags
#[derive(Debug, Default)]
pub struct SnapshotStore {
    state: RwLock<StoreState>,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store with the given sinks already registered (and dirty)
    pub fn with_sinks<I, S>(sinks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let dirty = sinks.into_iter().map(|s| (s.into(), true)).collect();
        Self {
            state: RwLock::new(StoreState {
                dirty,
                ..Default::default()
            }),
        }
    }

    /// Register a sink. New sinks start dirty so they receive whatever the
    /// store holds, or the first snapshot once one arrives.
    pub async fn register_sink(&self, sink: &str) {
        let mut state = self.state.write().await;
        state.dirty.insert(sink.to_string(), true);
    }

    /// Current snapshot, if any
    pub async fn latest(&self) -> Option<Arc<Snapshot>> {
        self.state.read().await.latest.clone()
    }

    /// Generation of the current snapshot (0 before the first one)
    pub async fn generation(&self) -> u64 {
        self.state.read().await.generation
    }

    /// Generation, snapshot and dirty flags as of a single instant
    pub async fn view(&self) -> StoreView {
        let state = self.state.read().await;
        StoreView {
            generation: state.generation,
            latest: state.latest.clone(),
            dirty: state.dirty.clone(),
        }
    }

    /// Run `detector` against the stored snapshot and, if it reports a
    /// change, replace the snapshot and mark every sink dirty.
    pub async fn replace_if_changed(
        &self,
        snapshot: Snapshot,
        detector: &dyn ChangeDetector,
    ) -> ReplaceOutcome {
        let mut state = self.state.write().await;

        if !detector.changed(state.latest.as_deref(), &snapshot) {
            return ReplaceOutcome::Unchanged;
        }

        let generation = Self::replace_locked(&mut state, snapshot);
        ReplaceOutcome::Replaced { generation }
    }

    /// Unconditionally replace the snapshot and mark every sink dirty
    pub async fn replace_and_mark_dirty(&self, snapshot: Snapshot) -> u64 {
        let mut state = self.state.write().await;
        Self::replace_locked(&mut state, snapshot)
    }

    fn replace_locked(state: &mut StoreState, snapshot: Snapshot) -> u64 {
        state.latest = Some(Arc::new(snapshot));
        state.generation += 1;
        for dirty in state.dirty.values_mut() {
            *dirty = true;
        }
        state.generation
    }

    /// Snapshot this sink still needs, if any
    pub async fn pending_for(&self, sink: &str) -> Result<PendingSnapshot, PendingState> {
        let state = self.state.read().await;

        let snapshot = state.latest.clone().ok_or(PendingState::NoData)?;
        // Unknown sinks are treated as dirty, matching a fresh registration.
        let dirty = state.dirty.get(sink).copied().unwrap_or(true);
        if !dirty {
            return Err(PendingState::Clean);
        }

        Ok(PendingSnapshot {
            snapshot,
            generation: state.generation,
        })
    }

    /// Clear the sink's dirty flag after it delivered `generation`.
    ///
    /// Returns false, leaving the flag set, when a newer snapshot replaced
    /// the delivered one in the meantime.
    pub async fn mark_clean(&self, sink: &str, generation: u64) -> bool {
        let mut state = self.state.write().await;
        if state.generation != generation {
            return false;
        }
        state.dirty.insert(sink.to_string(), false);
        true
    }

    pub async fn is_dirty(&self, sink: &str) -> bool {
        let state = self.state.read().await;
        state.dirty.get(sink).copied().unwrap_or(true)
    }

    /// Names of all sinks that still need the latest snapshot
    pub async fn dirty_sinks(&self) -> Vec<String> {
        let state = self.state.read().await;
        state
            .dirty
            .iter()
            .filter(|(_, dirty)| **dirty)
            .map(|(name, _)| name.clone())
            .collect()
    }
}
