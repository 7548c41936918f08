//! Home Assistant webhook sink

use super::{LastResult, Sink};
use crate::error::SinkError;
use crate::models::Snapshot;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Configuration for [`HomeAssistantSink`]
#[derive(Debug, Clone)]
pub struct HomeAssistantConfig {
    /// Base URL of the Home Assistant instance
    pub base_url: String,
    /// Webhook id registered for the vehicle automation
    pub webhook_id: String,
    /// Optional long-lived access token
    pub token: Option<String>,
    /// Request timeout applied by the HTTP client
    pub request_timeout: Duration,
}

impl Default for HomeAssistantConfig {
    fn default() -> Self {
        Self {
            base_url: "http://homeassistant.local:8123".to_string(),
            webhook_id: "telemetry-bridge".to_string(),
            token: None,
            request_timeout: Duration::from_secs(5),
        }
    }
}

/// Posts the whole snapshot to a Home Assistant webhook
pub struct HomeAssistantSink {
    client: Client,
    url: Url,
    token: Option<String>,
    last_result: LastResult,
}

impl HomeAssistantSink {
    pub const NAME: &'static str = "homeassistant";

    pub fn new(config: HomeAssistantConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .context("Failed to create HTTP client")?;

        let url = webhook_url(&config.base_url, &config.webhook_id)?;

        Ok(Self {
            client,
            url,
            token: config.token,
            last_result: LastResult::new(),
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    async fn send(&self, snapshot: &Snapshot) -> Result<(), SinkError> {
        let mut request = self.client.post(self.url.clone()).json(snapshot);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SinkError::Status {
                status: status.as_u16(),
                body,
            });
        }

        debug!(fields = snapshot.fields().len(), "Home Assistant webhook accepted");
        Ok(())
    }
}

/// `<base>/api/webhook/<id>`, keeping any path prefix of `base` and
/// escaping the id as a single segment
fn webhook_url(base_url: &str, webhook_id: &str) -> Result<Url> {
    let mut url = Url::parse(base_url)
        .with_context(|| format!("Invalid Home Assistant URL: {}", base_url))?;
    url.path_segments_mut()
        .map_err(|_| anyhow!("Home Assistant URL cannot carry a path: {}", base_url))?
        .pop_if_empty()
        .extend(["api", "webhook", webhook_id]);
    Ok(url)
}

#[async_trait]
impl Sink for HomeAssistantSink {
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
