//! Change detection between consecutive snapshots
//!
//! The position reported alongside telemetry jitters by a few metres even
//! while parked. Comparing it with plain equality would flag every poll as a
//! change, so positions are compared through a dead-band instead.

use crate::models::{Position, Snapshot};
use std::collections::HashSet;

/// Mean Earth radius in metres
const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Default distance dead-band in metres
pub const DEFAULT_DISTANCE_THRESHOLD_M: f64 = 10.0;

/// Default heading dead-band in degrees
pub const DEFAULT_HEADING_THRESHOLD_DEG: f64 = 5.0;

/// Decides whether a snapshot is worth forwarding
pub trait ChangeDetector: Send + Sync {
    /// Returns true when `current` differs meaningfully from `previous`.
    /// Always true when there is no previous snapshot.
    fn changed(&self, previous: Option<&Snapshot>, current: &Snapshot) -> bool;
}

/// Configuration for [`DeadbandDetector`]
#[derive(Debug, Clone)]
pub struct DeadbandConfig {
    /// Positions closer than this (metres) are considered equal
    pub distance_threshold_m: f64,
    /// Headings closer than this (degrees) are considered equal
    pub heading_threshold_deg: f64,
    /// Volatile fields excluded from comparison
    pub ignored_fields: HashSet<String>,
}

impl Default for DeadbandConfig {
    fn default() -> Self {
        Self {
            distance_threshold_m: DEFAULT_DISTANCE_THRESHOLD_M,
            heading_threshold_deg: DEFAULT_HEADING_THRESHOLD_DEG,
            ignored_fields: HashSet::new(),
        }
    }
}

/// Field-by-field comparison with a dead-band on position
#[derive(Debug, Clone, Default)]
pub struct DeadbandDetector {
    config: DeadbandConfig,
}

impl DeadbandDetector {
    pub fn new(config: DeadbandConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DeadbandConfig {
        &self.config
    }

    fn fields_differ(&self, previous: &Snapshot, current: &Snapshot) -> bool {
        let ignored = &self.config.ignored_fields;

        let prev = previous
            .fields()
            .iter()
            .filter(|(k, _)| !ignored.contains(k.as_str()));
        let curr = current
            .fields()
            .iter()
            .filter(|(k, _)| !ignored.contains(k.as_str()));

        // BTreeMap iteration is ordered, so a zipped walk catches both
        // differing values and fields present on one side only.
        !prev.eq(curr)
    }

    fn positions_differ(&self, previous: Option<&Position>, current: Option<&Position>) -> bool {
        match (previous, current) {
            (None, None) => false,
            (Some(_), None) | (None, Some(_)) => true,
            (Some(a), Some(b)) => {
                let distance = haversine_distance_m(a, b);
                let heading = match (a.heading, b.heading) {
                    (Some(ha), Some(hb)) => heading_delta_deg(ha, hb),
                    _ => 0.0,
                };
                !(distance < self.config.distance_threshold_m
                    && heading < self.config.heading_threshold_deg)
            }
        }
    }
}

impl ChangeDetector for DeadbandDetector {
    fn changed(&self, previous: Option<&Snapshot>, current: &Snapshot) -> bool {
        let Some(previous) = previous else {
            return true;
        };

        self.fields_differ(previous, current)
            || self.positions_differ(previous.position(), current.position())
    }
}

/// Great-circle distance between two positions in metres
pub fn haversine_distance_m(a: &Position, b: &Position) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let dlat = (b.latitude - a.latitude).to_radians();
    let dlon = (b.longitude - a.longitude).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().min(1.0).asin()
}

/// Smallest angle between two headings, in [0, 180]
pub fn heading_delta_deg(a: f64, b: f64) -> f64 {
    let delta = (a - b).abs() % 360.0;
    if delta > 180.0 {
        360.0 - delta
    } else {
        delta
    }
}
