//! Bridge configuration
//!
//! Values come from an optional TOML file overlaid with `BRIDGE__*`
//! environment variables (`BRIDGE__ABRP__TOKEN` sets `abrp.token`). A sink
//! is enabled by the presence of its section.

use anyhow::{bail, Context, Result};
use bridge_lib::{
    engine::{EngineConfig, PollConfig, SinkSchedule},
    gate::BackoffPolicy,
    sink::{AbrpConfig, AbrpFieldMap, AbrpSink, HomeAssistantConfig, HomeAssistantSink, Sink},
    source::HttpSourceConfig,
    DeadbandConfig,
};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

/// Environment variable naming an explicit config file
pub const CONFIG_PATH_ENV: &str = "BRIDGE_CONFIG";

/// Config file looked up in the working directory when none is named
const DEFAULT_CONFIG_FILE: &str = "bridge";

/// Bridge configuration
#[derive(Debug, Clone, Deserialize)]
pub struct BridgeConfig {
    /// Vehicle name used in log records
    #[serde(default = "default_vehicle_name")]
    pub vehicle_name: String,

    /// API server port for health/metrics/status
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Time allowed for loops to stop after a shutdown signal
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,

    #[serde(default)]
    pub source: SourceSettings,

    #[serde(default)]
    pub poll: PollSettings,

    #[serde(default)]
    pub backoff: BackoffSettings,

    #[serde(default)]
    pub deadband: DeadbandSettings,

    #[serde(default)]
    pub abrp: Option<AbrpSettings>,

    #[serde(default)]
    pub homeassistant: Option<HomeAssistantSettings>,
}

fn default_vehicle_name() -> String {
    "vehicle".to_string()
}

fn default_api_port() -> u16 {
    8080
}

fn default_shutdown_grace() -> u64 {
    5
}

fn default_transmit_timeout() -> u64 {
    5
}

fn default_abrp_interval() -> u64 {
    10
}

fn default_homeassistant_interval() -> u64 {
    60
}

/// Local telemetry API
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SourceSettings {
    pub url: String,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            url: HttpSourceConfig::default().url,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PollSettings {
    pub interval_secs: u64,
    pub timeout_secs: u64,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval_secs: 8,
            timeout_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackoffSettings {
    pub base_secs: u64,
    pub max_secs: u64,
}

impl Default for BackoffSettings {
    fn default() -> Self {
        Self {
            base_secs: 5,
            max_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeadbandSettings {
    pub distance_m: f64,
    pub heading_deg: f64,
    /// Volatile fields left out of change detection
    pub ignored_fields: Vec<String>,
}

impl Default for DeadbandSettings {
    fn default() -> Self {
        let defaults = DeadbandConfig::default();
        Self {
            distance_m: defaults.distance_threshold_m,
            heading_deg: defaults.heading_threshold_deg,
            ignored_fields: Vec::new(),
        }
    }
}

/// ABRP sink section
#[derive(Debug, Clone, Deserialize)]
pub struct AbrpSettings {
    pub api_key: String,
    pub token: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_abrp_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_transmit_timeout")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub fields: AbrpFieldSettings,
}

/// Snapshot fields feeding the ABRP telemetry keys
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AbrpFieldSettings {
    pub soc: String,
    pub speed: String,
    pub power: String,
    pub is_charging: String,
    pub ext_temp: String,
    pub odometer: String,
    pub voltage: String,
    pub current: String,
}

impl Default for AbrpFieldSettings {
    fn default() -> Self {
        let map = AbrpFieldMap::default();
        Self {
            soc: map.soc,
            speed: map.speed,
            power: map.power,
            is_charging: map.is_charging,
            ext_temp: map.ext_temp,
            odometer: map.odometer,
            voltage: map.voltage,
            current: map.current,
        }
    }
}

impl From<AbrpFieldSettings> for AbrpFieldMap {
    fn from(s: AbrpFieldSettings) -> Self {
        Self {
            soc: s.soc,
            speed: s.speed,
            power: s.power,
            is_charging: s.is_charging,
            ext_temp: s.ext_temp,
            odometer: s.odometer,
            voltage: s.voltage,
            current: s.current,
        }
    }
}

/// Home Assistant sink section
#[derive(Debug, Clone, Deserialize)]
pub struct HomeAssistantSettings {
    pub base_url: String,
    pub webhook_id: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_homeassistant_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_transmit_timeout")]
    pub timeout_secs: u64,
}

impl BridgeConfig {
    /// Load configuration from `BRIDGE_CONFIG` (or `./bridge.toml`) and the environment
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_PATH_ENV).ok();
        Self::load_from(path.as_deref())
    }

    /// Load configuration from an explicit file plus the environment
    pub fn load_from(path: Option<&str>) -> Result<Self> {
        let file = match path {
            Some(path) => config::File::with_name(path).required(true),
            None => config::File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        let config = config::Config::builder()
            .add_source(file)
            .add_source(
                config::Environment::with_prefix("BRIDGE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to read configuration")?;

        let config: BridgeConfig = config
            .try_deserialize()
            .context("Invalid configuration")?;
        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.abrp.is_none() && self.homeassistant.is_none() {
            bail!("No sinks configured: add an [abrp] or [homeassistant] section");
        }
        if self.poll.interval_secs == 0 || self.poll.timeout_secs == 0 {
            bail!("Poll interval and timeout must be greater than zero");
        }
        if self.backoff.base_secs > self.backoff.max_secs {
            bail!("Backoff base must not exceed backoff max");
        }
        if let Some(abrp) = &self.abrp {
            if abrp.interval_secs == 0 || abrp.timeout_secs == 0 {
                bail!("ABRP interval and timeout must be greater than zero");
            }
        }
        if let Some(ha) = &self.homeassistant {
            if ha.interval_secs == 0 || ha.timeout_secs == 0 {
                bail!("Home Assistant interval and timeout must be greater than zero");
            }
        }
        Ok(())
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    pub fn source_config(&self) -> HttpSourceConfig {
        HttpSourceConfig {
            url: self.source.url.clone(),
            request_timeout: Duration::from_secs(self.poll.timeout_secs),
        }
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            poll: PollConfig {
                interval: Duration::from_secs(self.poll.interval_secs),
                timeout: Duration::from_secs(self.poll.timeout_secs),
            },
            backoff: BackoffPolicy::new(
                Duration::from_secs(self.backoff.base_secs),
                Duration::from_secs(self.backoff.max_secs),
            ),
        }
    }

    pub fn deadband_config(&self) -> DeadbandConfig {
        DeadbandConfig {
            distance_threshold_m: self.deadband.distance_m,
            heading_threshold_deg: self.deadband.heading_deg,
            ignored_fields: self.deadband.ignored_fields.iter().cloned().collect(),
        }
    }

    /// Build every configured sink with its schedule
    pub fn sinks(&self) -> Result<Vec<(Arc<dyn Sink>, SinkSchedule)>> {
        let mut sinks: Vec<(Arc<dyn Sink>, SinkSchedule)> = Vec::new();

        if let Some(abrp) = &self.abrp {
            let timeout = Duration::from_secs(abrp.timeout_secs);
            let mut config = AbrpConfig {
                api_key: abrp.api_key.clone(),
                token: abrp.token.clone(),
                request_timeout: timeout,
                fields: abrp.fields.clone().into(),
                ..Default::default()
            };
            if let Some(endpoint) = &abrp.endpoint {
                config.endpoint = endpoint.clone();
            }

            let sink = AbrpSink::new(config).context("Failed to create ABRP sink")?;
            sinks.push((
                Arc::new(sink),
                SinkSchedule::new(Duration::from_secs(abrp.interval_secs), timeout),
            ));
        }

        if let Some(ha) = &self.homeassistant {
            let timeout = Duration::from_secs(ha.timeout_secs);
            let sink = HomeAssistantSink::new(HomeAssistantConfig {
                base_url: ha.base_url.clone(),
                webhook_id: ha.webhook_id.clone(),
                token: ha.token.clone(),
                request_timeout: timeout,
            })
            .context("Failed to create Home Assistant sink")?;
            sinks.push((
                Arc::new(sink),
                SinkSchedule::new(Duration::from_secs(ha.interval_secs), timeout),
            ));
        }

        Ok(sinks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(contents: &str) -> NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    fn load(contents: &str) -> Result<BridgeConfig> {
        let file = write_config(contents);
        BridgeConfig::load_from(file.path().to_str())
    }

    #[test]
    fn test_defaults_with_single_sink() {
        let config = load(
            r#"
            [abrp]
            api_key = "key"
            token = "tok"
            "#,
        )
        .unwrap();

        assert_eq!(config.api_port, 8080);
        assert_eq!(config.poll.interval_secs, 8);
        assert_eq!(config.poll.timeout_secs, 5);
        assert_eq!(config.backoff.max_secs, 300);
        assert_eq!(config.deadband.distance_m, 10.0);

        let abrp = config.abrp.as_ref().unwrap();
        assert_eq!(abrp.interval_secs, 10);
        assert_eq!(abrp.fields.soc, "battery");
        assert!(config.homeassistant.is_none());
    }

    #[test]
    fn test_sinks_built_from_sections() {
        let config = load(
            r#"
            [abrp]
            api_key = "key"
            token = "tok"

            [homeassistant]
            base_url = "http://ha.local:8123"
            webhook_id = "car"
            interval_secs = 30
            "#,
        )
        .unwrap();

        let sinks = config.sinks().unwrap();
        let names: Vec<&str> = sinks.iter().map(|(s, _)| s.name()).collect();
        assert_eq!(names, vec!["abrp", "homeassistant"]);
        assert_eq!(sinks[1].1.interval, Duration::from_secs(30));
        assert_eq!(sinks[1].1.timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_no_sinks_is_rejected() {
        let err = load("api_port = 9000\n").unwrap_err();
        assert!(err.to_string().contains("No sinks configured"));
    }

    #[test]
    fn test_zero_poll_interval_is_rejected() {
        let result = load(
            r#"
            [poll]
            interval_secs = 0

            [homeassistant]
            base_url = "http://ha.local:8123"
            webhook_id = "car"
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_deadband_settings_map_to_detector_config() {
        let config = load(
            r#"
            [deadband]
            distance_m = 25.0
            ignored_fields = ["timestamp", "rssi"]

            [homeassistant]
            base_url = "http://ha.local:8123"
            webhook_id = "car"
            "#,
        )
        .unwrap();

        let deadband = config.deadband_config();
        assert_eq!(deadband.distance_threshold_m, 25.0);
        assert_eq!(deadband.heading_threshold_deg, 5.0);
        assert!(deadband.ignored_fields.contains("rssi"));
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        assert!(BridgeConfig::load_from(Some("/nonexistent/bridge.toml")).is_err());
    }
}
