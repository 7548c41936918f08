//! Core data models for the telemetry bridge

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A single telemetry value as reported by the vehicle API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl FieldValue {
    /// Numeric view of the value, if it has one
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Int(v) => Some(*v as f64),
            FieldValue::Float(v) => Some(*v),
            FieldValue::Bool(v) => Some(if *v { 1.0 } else { 0.0 }),
            FieldValue::Text(_) => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FieldValue::Bool(v) => Some(*v),
            FieldValue::Int(v) => Some(*v != 0),
            _ => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Bool(v) => write!(f, "{}", v),
            FieldValue::Int(v) => write!(f, "{}", v),
            FieldValue::Float(v) => write!(f, "{}", v),
            FieldValue::Text(v) => f.write_str(v),
        }
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Bool(v)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Int(v)
    }
}

impl From<i32> for FieldValue {
    fn from(v: i32) -> Self {
        FieldValue::Int(v as i64)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Float(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Text(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::Text(v)
    }
}

/// Position enrichment attached to a snapshot
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
    /// Degrees clockwise from north
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heading: Option<f64>,
    /// Metres above sea level
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub altitude: Option<f64>,
}

impl Position {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            heading: None,
            altitude: None,
        }
    }

    pub fn with_heading(mut self, heading: f64) -> Self {
        self.heading = Some(heading);
        self
    }

    pub fn with_altitude(mut self, altitude: f64) -> Self {
        self.altitude = Some(altitude);
        self
    }
}

/// One point-in-time set of telemetry values.
///
/// A field that is absent is different from a field that reads zero. Once
/// built, a snapshot is never mutated; the store hands out shared references.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    captured_at: DateTime<Utc>,
    fields: BTreeMap<String, FieldValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    position: Option<Position>,
}

impl Snapshot {
    /// Start building a snapshot captured now
    pub fn builder() -> SnapshotBuilder {
        SnapshotBuilder::new(Utc::now())
    }

    /// Start building a snapshot with an explicit capture time
    pub fn builder_at(captured_at: DateTime<Utc>) -> SnapshotBuilder {
        SnapshotBuilder::new(captured_at)
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    pub fn fields(&self) -> &BTreeMap<String, FieldValue> {
        &self.fields
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    pub fn position(&self) -> Option<&Position> {
        self.position.as_ref()
    }

    /// Copy of this snapshot with a different position attached
    pub fn with_position(&self, position: Option<Position>) -> Snapshot {
        Snapshot {
            captured_at: self.captured_at,
            fields: self.fields.clone(),
            position,
        }
    }
}

/// Builder for [`Snapshot`]
#[derive(Debug, Clone)]
pub struct SnapshotBuilder {
    captured_at: DateTime<Utc>,
    fields: BTreeMap<String, FieldValue>,
    position: Option<Position>,
}

impl SnapshotBuilder {
    fn new(captured_at: DateTime<Utc>) -> Self {
        Self {
            captured_at,
            fields: BTreeMap::new(),
            position: None,
        }
    }

    pub fn field(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Set a field only when a value is present
    pub fn maybe_field(self, name: impl Into<String>, value: Option<FieldValue>) -> Self {
        match value {
            Some(value) => self.field(name, value),
            None => self,
        }
    }

    pub fn position(mut self, position: Position) -> Self {
        self.position = Some(position);
        self
    }

    pub fn build(self) -> Snapshot {
        Snapshot {
            captured_at: self.captured_at,
            fields: self.fields,
            position: self.position,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absent_field_differs_from_zero() {
        let absent = Snapshot::builder().build();
        let zero = Snapshot::builder().field("speed", 0).build();

        assert!(absent.get("speed").is_none());
        assert_eq!(zero.get("speed"), Some(&FieldValue::Int(0)));
    }

    #[test]
    fn test_maybe_field_skips_none() {
        let snapshot = Snapshot::builder()
            .maybe_field("battery", Some(FieldValue::Int(80)))
            .maybe_field("range", None)
            .build();

        assert_eq!(snapshot.fields().len(), 1);
    }

    #[test]
    fn test_field_value_json_is_untagged() {
        let snapshot = Snapshot::builder()
            .field("battery", 80)
            .field("charging", true)
            .field("gear", "P")
            .field("voltage", 398.5)
            .build();

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["fields"]["battery"], 80);
        assert_eq!(json["fields"]["charging"], true);
        assert_eq!(json["fields"]["gear"], "P");
        assert_eq!(json["fields"]["voltage"], 398.5);
        assert!(json.get("position").is_none());
    }

    #[test]
    fn test_with_position_keeps_fields() {
        let snapshot = Snapshot::builder().field("battery", 80).build();
        let enriched = snapshot.with_position(Some(Position::new(52.0, 4.0).with_heading(90.0)));

        assert_eq!(enriched.get("battery"), snapshot.get("battery"));
        assert_eq!(enriched.captured_at(), snapshot.captured_at());
        assert_eq!(enriched.position().and_then(|p| p.heading), Some(90.0));
    }
}
