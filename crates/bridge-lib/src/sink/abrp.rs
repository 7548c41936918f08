//! A Better Routeplanner (ABRP) live telemetry sink

use super::{LastResult, Sink};
use crate::error::SinkError;
use crate::models::Snapshot;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Snapshot field names feeding each ABRP telemetry key
#[derive(Debug, Clone)]
pub struct AbrpFieldMap {
    pub soc: String,
    pub speed: String,
    pub power: String,
    pub is_charging: String,
    pub ext_temp: String,
    pub odometer: String,
    pub voltage: String,
    pub current: String,
}

impl Default for AbrpFieldMap {
    fn default() -> Self {
        Self {
            soc: "battery".to_string(),
            speed: "speed".to_string(),
            power: "power".to_string(),
            is_charging: "charging".to_string(),
            ext_temp: "outside_temp".to_string(),
            odometer: "odometer".to_string(),
            voltage: "voltage".to_string(),
            current: "current".to_string(),
        }
    }
}

impl AbrpFieldMap {
    /// Optional numeric keys and the fields they come from
    fn numeric(&self) -> [(&'static str, &str); 6] {
        [
            ("speed", self.speed.as_str()),
            ("power", self.power.as_str()),
            ("ext_temp", self.ext_temp.as_str()),
            ("odometer", self.odometer.as_str()),
            ("voltage", self.voltage.as_str()),
            ("current", self.current.as_str()),
        ]
    }
}

/// Configuration for [`AbrpSink`]
#[derive(Debug, Clone)]
pub struct AbrpConfig {
    /// Telemetry endpoint
    pub endpoint: String,
    /// Application API key issued by ABRP
    pub api_key: String,
    /// Per-vehicle user token
    pub token: String,
    /// Request timeout applied by the HTTP client
    pub request_timeout: Duration,
    pub fields: AbrpFieldMap,
}

impl Default for AbrpConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.iternio.com/1/tlm/send".to_string(),
            api_key: String::new(),
            token: String::new(),
            request_timeout: Duration::from_secs(5),
            fields: AbrpFieldMap::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct AbrpResponse {
    status: String,
    #[serde(default)]
    message: Option<String>,
}

/// Sends state of charge, speed and position to ABRP
pub struct AbrpSink {
    client: Client,
    url: Url,
    fields: AbrpFieldMap,
    last_result: LastResult,
}

impl AbrpSink {
    pub const NAME: &'static str = "abrp";

    pub fn new(config: AbrpConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .context("Failed to create HTTP client")?;

        let mut url = Url::parse(&config.endpoint)
            .with_context(|| format!("Invalid ABRP endpoint: {}", config.endpoint))?;
        url.query_pairs_mut()
            .append_pair("api_key", &config.api_key)
            .append_pair("token", &config.token);

        Ok(Self {
            client,
            url,
            fields: config.fields,
            last_result: LastResult::new(),
        })
    }

    /// Build the `tlm` object for a snapshot
    pub fn telemetry(&self, snapshot: &Snapshot) -> Result<Value, SinkError> {
        let soc = snapshot
            .get(&self.fields.soc)
            .and_then(|v| v.as_f64())
            .ok_or(SinkError::MissingField("soc"))?;

        let mut tlm = Map::new();
        tlm.insert("utc".into(), json!(snapshot.captured_at().timestamp()));
        tlm.insert("soc".into(), json!(soc));

        for (key, field) in self.fields.numeric() {
            if let Some(value) = snapshot.get(field).and_then(|v| v.as_f64()) {
                tlm.insert(key.into(), json!(value));
            }
        }

        if let Some(charging) = snapshot
            .get(&self.fields.is_charging)
            .and_then(|v| v.as_bool())
        {
            tlm.insert("is_charging".into(), json!(charging as u8));
        }

        if let Some(position) = snapshot.position() {
            tlm.insert("lat".into(), json!(position.latitude));
            tlm.insert("lon".into(), json!(position.longitude));
            if let Some(heading) = position.heading {
                tlm.insert("heading".into(), json!(heading));
            }
            if let Some(altitude) = position.altitude {
                tlm.insert("elevation".into(), json!(altitude));
            }
        }

        Ok(Value::Object(tlm))
    }

    async fn send(&self, snapshot: &Snapshot) -> Result<(), SinkError> {
        let tlm = self.telemetry(snapshot)?;

        let response = self
            .client
            .post(self.url.clone())
            .json(&json!({ "tlm": tlm }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SinkError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let reply: AbrpResponse = response
            .json()
            .await
            .map_err(|e| SinkError::Rejected(format!("unreadable reply: {}", e.without_url())))?;

        if reply.status != "ok" {
            return Err(SinkError::Rejected(
                reply.message.unwrap_or(reply.status),
            ));
        }

        debug!(soc = ?snapshot.get(&self.fields.soc), "ABRP telemetry accepted");
        Ok(())
    }
}

#[async_trait]
impl Sink for AbrpSink {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn transmit(&self, snapshot: &Snapshot) -> Result<(), SinkError> {
        let result = self.send(snapshot).await;
        self.last_result.record(&result);
        result
    }

    fn healthy(&self) -> bool {
        self.last_result.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::{BackoffPolicy, HealthGate};
    use crate::models::Position;
    use mockito::Matcher;

    fn sink_for(server: &mockito::ServerGuard) -> AbrpSink {
        AbrpSink::new(AbrpConfig {
            endpoint: format!("{}/1/tlm/send", server.url()),
            api_key: "key".to_string(),
            token: "tok".to_string(),
            ..Default::default()
        })
        .unwrap()
    }

    fn default_sink() -> AbrpSink {
        AbrpSink::new(AbrpConfig::default()).unwrap()
    }

    #[test]
    fn test_telemetry_maps_fields_and_position() {
        let sink = default_sink();
        let snapshot = Snapshot::builder()
            .field("battery", 80)
            .field("speed", 0)
            .field("charging", true)
            .field("gear", "P")
            .position(Position::new(52.37, 4.89).with_heading(90.0).with_altitude(2.0))
            .build();

        let tlm = sink.telemetry(&snapshot).unwrap();

        assert_eq!(tlm["soc"], 80.0);
        assert_eq!(tlm["speed"], 0.0);
        assert_eq!(tlm["is_charging"], 1);
        assert_eq!(tlm["lat"], 52.37);
        assert_eq!(tlm["heading"], 90.0);
        assert_eq!(tlm["elevation"], 2.0);
        assert_eq!(tlm["utc"], snapshot.captured_at().timestamp());
        assert!(tlm.get("power").is_none());
        assert!(tlm.get("gear").is_none());
    }

    #[test]
    fn test_telemetry_requires_soc() {
        let sink = default_sink();
        let snapshot = Snapshot::builder().field("speed", 30).build();

        let err = sink.telemetry(&snapshot).unwrap_err();
        assert!(matches!(err, SinkError::MissingField("soc")));
    }

    #[tokio::test]
    async fn test_transmit_posts_tlm() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/1/tlm/send")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("api_key".into(), "key".into()),
                Matcher::UrlEncoded("token".into(), "tok".into()),
            ]))
            .match_body(Matcher::PartialJson(json!({ "tlm": { "soc": 80.0 } })))
            .with_status(200)
            .with_body(r#"{"status": "ok"}"#)
            .create_async()
            .await;

        let sink = sink_for(&server);
        let snapshot = Snapshot::builder().field("battery", 80).build();

        sink.transmit(&snapshot).await.unwrap();

        mock.assert_async().await;
        assert!(sink.healthy());
    }

    #[tokio::test]
    async fn test_transmit_surfaces_rejection() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/1/tlm/send")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"status": "error", "message": "invalid token"}"#)
            .create_async()
            .await;

        let sink = sink_for(&server);
        let snapshot = Snapshot::builder().field("battery", 80).build();

        let err = sink.transmit(&snapshot).await.unwrap_err();

        assert!(matches!(err, SinkError::Rejected(ref m) if m == "invalid token"));
        assert!(!sink.healthy());
    }

    #[tokio::test]
    async fn test_transmit_surfaces_http_status() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/1/tlm/send")
            .match_query(Matcher::Any)
            .with_status(500)
            .with_body("boom")
            .create_async()
            .await;

        let sink = sink_for(&server);
        let snapshot = Snapshot::builder().field("battery", 80).build();

        let err = sink.transmit(&snapshot).await.unwrap_err();
        assert!(matches!(err, SinkError::Status { status: 500, .. }));
    }

    fn assert_no_credentials(message: &str) {
        assert!(!message.contains("SECRETKEY"), "api key leaked: {}", message);
        assert!(!message.contains("SECRETTOKEN"), "token leaked: {}", message);
    }

    #[tokio::test]
    async fn test_connection_error_does_not_expose_credentials() {
        let sink = AbrpSink::new(AbrpConfig {
            endpoint: "http://127.0.0.1:1/1/tlm/send".to_string(),
            api_key: "SECRETKEY".to_string(),
            token: "SECRETTOKEN".to_string(),
            ..Default::default()
        })
        .unwrap();
        let snapshot = Snapshot::builder().field("battery", 80).build();

        let err = sink.transmit(&snapshot).await.unwrap_err();
        assert!(matches!(err, SinkError::Http(_)));
        assert_no_credentials(&err.to_string());

        // The gate keeps the message for the status endpoint.
        let gate = HealthGate::new(BackoffPolicy::default());
        gate.record_failure(AbrpSink::NAME, &err.to_string());
        let status = serde_json::to_string(&gate.status(AbrpSink::NAME)).unwrap();
        assert!(status.contains("request to sink failed"));
        assert_no_credentials(&status);
    }

    #[tokio::test]
    async fn test_unreadable_reply_does_not_expose_credentials() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/1/tlm/send")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body("<html>maintenance</html>")
            .create_async()
            .await;

        let sink = AbrpSink::new(AbrpConfig {
            endpoint: format!("{}/1/tlm/send", server.url()),
            api_key: "SECRETKEY".to_string(),
            token: "SECRETTOKEN".to_string(),
            ..Default::default()
        })
        .unwrap();
        let snapshot = Snapshot::builder().field("battery", 80).build();

        let err = sink.transmit(&snapshot).await.unwrap_err();
        assert!(matches!(err, SinkError::Rejected(ref m) if m.starts_with("unreadable reply")));
        assert_no_credentials(&err.to_string());
    }
}
