//! Liveness and readiness of the bridge
//!
//! The poller and every sink report their outcomes here. A failing component
//! is degraded while the bridge can still catch up on its own, and becomes
//! unhealthy once it has been failing long enough to need an operator: the
//! source after [`POLL_FAILURES_UNHEALTHY`] failed polls in a row, a sink once
//! its backoff has reached the ceiling.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Failed polls in a row after which the source counts as down
pub const POLL_FAILURES_UNHEALTHY: u32 = 5;

/// Health status of a component
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    /// Failing, but the latest snapshot is still being served and retried
    Degraded,
    /// Failing persistently
    Unhealthy,
}

impl ComponentStatus {
    /// Returns true if the component is at least partially operational
    pub fn is_operational(&self) -> bool {
        *self != ComponentStatus::Unhealthy
    }
}

/// Last reported state of one component
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub last_check_timestamp: i64,
}

impl ComponentHealth {
    pub fn new(status: ComponentStatus, message: Option<String>) -> Self {
        Self {
            status,
            message,
            last_check_timestamp: chrono::Utc::now().timestamp(),
        }
    }
}

/// Body of the liveness endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: HashMap<String, ComponentHealth>,
}

impl HealthResponse {
    /// Worst status across all components; healthy when there are none
    pub fn compute_status(components: &HashMap<String, ComponentHealth>) -> ComponentStatus {
        components
            .values()
            .map(|c| c.status)
            .max()
            .unwrap_or(ComponentStatus::Healthy)
    }
}

/// Body of the readiness endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Component names
pub mod components {
    pub const POLLER: &str = "poller";

    /// Component name for a sink
    pub fn sink(name: &str) -> String {
        format!("sink:{}", name)
    }
}

/// Shared component health, plus the initial-sync readiness flag
#[derive(Debug, Clone, Default)]
pub struct HealthRegistry {
    components: Arc<RwLock<HashMap<String, ComponentHealth>>>,
    ready: Arc<RwLock<bool>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a component as healthy
    pub async fn register(&self, name: &str) {
        self.set(name, ComponentStatus::Healthy, None).await;
    }

    pub async fn poll_succeeded(&self) {
        self.set(components::POLLER, ComponentStatus::Healthy, None)
            .await;
    }

    /// Record a failed poll, `consecutive_failures` counting this one
    pub async fn poll_failed(&self, consecutive_failures: u32, error: &str) {
        let status = if consecutive_failures >= POLL_FAILURES_UNHEALTHY {
            ComponentStatus::Unhealthy
        } else {
            ComponentStatus::Degraded
        };
        let message = format!("{} consecutive poll failures: {}", consecutive_failures, error);
        self.set(components::POLLER, status, Some(message)).await;
    }

    pub async fn sink_delivered(&self, sink: &str) {
        self.set(&components::sink(sink), ComponentStatus::Healthy, None)
            .await;
    }

    /// Record a failed transmit. `backoff_exhausted` is set once the sink's
    /// cooldown has grown to the policy ceiling.
    pub async fn sink_failed(
        &self,
        sink: &str,
        consecutive_failures: u32,
        backoff_exhausted: bool,
        error: &str,
    ) {
        let (status, message) = if backoff_exhausted {
            (
                ComponentStatus::Unhealthy,
                format!(
                    "{} consecutive failures, backoff at ceiling: {}",
                    consecutive_failures, error
                ),
            )
        } else {
            (
                ComponentStatus::Degraded,
                format!("{} consecutive failures: {}", consecutive_failures, error),
            )
        };
        self.set(&components::sink(sink), status, Some(message))
            .await;
    }

    /// Flipped once the initial sync has run
    pub async fn set_ready(&self, ready: bool) {
        *self.ready.write().await = ready;
    }

    pub async fn health(&self) -> HealthResponse {
        let components = self.components.read().await.clone();
        let status = HealthResponse::compute_status(&components);
        HealthResponse { status, components }
    }

    pub async fn readiness(&self) -> ReadinessResponse {
        if !*self.ready.read().await {
            return ReadinessResponse {
                ready: false,
                reason: Some("Initial sync not yet complete".to_string()),
            };
        }

        let components = self.components.read().await;
        let mut unhealthy: Vec<&str> = components
            .iter()
            .filter(|(_, c)| !c.status.is_operational())
            .map(|(name, _)| name.as_str())
            .collect();
        unhealthy.sort_unstable();

        ReadinessResponse {
            ready: unhealthy.is_empty(),
            reason: (!unhealthy.is_empty()).then(|| format!("Unhealthy: {}", unhealthy.join(", "))),
        }
    }

    async fn set(&self, name: &str, status: ComponentStatus, message: Option<String>) {
        let mut components = self.components.write().await;
        components.insert(name.to_string(), ComponentHealth::new(status, message));
    }
}
