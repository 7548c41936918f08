//! Poll source for the vehicle's local JSON telemetry API

use super::PollSource;
use crate::error::SourceError;
use crate::models::{FieldValue, Position, Snapshot, SnapshotBuilder};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Keys lifted out of the payload into [`Position`]
const LATITUDE_KEY: &str = "latitude";
const LONGITUDE_KEY: &str = "longitude";
const HEADING_KEY: &str = "heading";
const ALTITUDE_KEY: &str = "altitude";

/// Configuration for [`HttpPollSource`]
#[derive(Debug, Clone)]
pub struct HttpSourceConfig {
    /// Telemetry endpoint (e.g., "http://127.0.0.1:8888/telemetry")
    pub url: String,
    /// Request timeout applied by the HTTP client
    pub request_timeout: Duration,
}

impl Default for HttpSourceConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8888/telemetry".to_string(),
            request_timeout: Duration::from_secs(5),
        }
    }
}

/// Polls a JSON object of telemetry values over HTTP.
///
/// Top-level scalars become snapshot fields, `null` members are treated as
/// absent and nested values are skipped. Numeric `latitude`/`longitude`
/// members (with optional `heading`/`altitude`) become the snapshot position.
pub struct HttpPollSource {
    client: Client,
    url: Url,
}

impl HttpPollSource {
    pub fn new(config: HttpSourceConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .context("Failed to create HTTP client")?;
        let url = Url::parse(&config.url)
            .with_context(|| format!("Invalid telemetry source URL: {}", config.url))?;

        Ok(Self { client, url })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl PollSource for HttpPollSource {
    fn name(&self) -> &str {
        "http"
    }

    async fn poll(&self) -> Result<Snapshot, SourceError> {
        let response = self.client.get(self.url.clone()).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Status(status.as_u16()));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| SourceError::Decode(e.to_string()))?;

        let snapshot = snapshot_from_json(body)?;
        debug!(
            url = %self.url,
            fields = snapshot.fields().len(),
            has_position = snapshot.position().is_some(),
            "Polled telemetry"
        );
        Ok(snapshot)
    }
}

/// Convert a telemetry payload into a snapshot
pub(crate) fn snapshot_from_json(body: Value) -> Result<Snapshot, SourceError> {
    let Value::Object(mut object) = body else {
        return Err(SourceError::Decode(
            "expected a JSON object at the top level".to_string(),
        ));
    };

    let position = take_position(&mut object);
    let mut builder: SnapshotBuilder = Snapshot::builder();

    for (name, value) in object {
        builder = builder.maybe_field(name, scalar(value));
    }

    if let Some(position) = position {
        builder = builder.position(position);
    }

    Ok(builder.build())
}

fn take_position(object: &mut Map<String, Value>) -> Option<Position> {
    let latitude = object.get(LATITUDE_KEY).and_then(Value::as_f64)?;
    let longitude = object.get(LONGITUDE_KEY).and_then(Value::as_f64)?;

    object.remove(LATITUDE_KEY);
    object.remove(LONGITUDE_KEY);
    let heading = object.remove(HEADING_KEY).and_then(|v| v.as_f64());
    let altitude = object.remove(ALTITUDE_KEY).and_then(|v| v.as_f64());

    Some(Position {
        latitude,
        longitude,
        heading,
        altitude,
    })
}

fn scalar(value: Value) -> Option<FieldValue> {
    match value {
        Value::Bool(b) => Some(FieldValue::Bool(b)),
        Value::Number(n) => n
            .as_i64()
            .map(FieldValue::Int)
            .or_else(|| n.as_f64().map(FieldValue::Float)),
        Value::String(s) => Some(FieldValue::Text(s)),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}
