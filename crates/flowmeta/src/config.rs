//! Sample Configuration

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use flowmeta_dataplane::EngineConfig;

/// Environment variable naming the config file
pub const CONFIG_ENV: &str = "FLOWMETA_CONFIG";

/// Config file used when `FLOWMETA_CONFIG` is unset
pub const DEFAULT_CONFIG_PATH: &str = "/etc/flowmeta/flowmeta.json";

/// Environment variable overriding the queue count
pub const NB_QUEUES_ENV: &str = "FLOWMETA_NB_QUEUES";

/// Most address pairs the traffic wire can give distinct sources
pub const MAX_TRAFFIC_FLOWS: u32 = 0xFFFF;

/// Config errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Sample configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SampleConfig {
    /// Host receive queues per port
    pub nb_queues: u16,
    /// Ports to bring up
    pub nb_ports: u16,
    /// Depth of every rx/tx ring
    pub ring_size: usize,
    /// Pause between rule installation and the software loop
    pub settle_secs: u64,
    /// Seconds between flow count reports
    pub report_interval_secs: u64,
    /// Busiest buckets listed per report (debug level)
    pub report_top: usize,
    /// Prometheus scrape address; `null` disables the exporter
    pub metrics_addr: Option<SocketAddr>,
    /// Synthetic traffic
    pub traffic: TrafficConfig,
}

impl Default for SampleConfig {
    fn default() -> Self {
        Self {
            nb_queues: 1,
            nb_ports: 2,
            ring_size: 1024,
            settle_secs: 5,
            report_interval_secs: 5,
            report_top: 5,
            metrics_addr: Some(SocketAddr::from(([127, 0, 0, 1], 9464))),
            traffic: TrafficConfig::default(),
        }
    }
}

/// Synthetic traffic settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrafficConfig {
    /// Run the traffic thread at all
    pub enabled: bool,
    /// Frames offered per port per tick
    pub frames_per_tick: usize,
    /// Tick length in milliseconds
    pub tick_ms: u64,
    /// Distinct address pairs sending rule-matching traffic
    pub flows: u32,
    /// Share of frames that match the installed rule, 0.0..=1.0
    pub match_ratio: f64,
}

impl Default for TrafficConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            frames_per_tick: 32,
            tick_ms: 1,
            flows: 16,
            match_ratio: 0.75,
        }
    }
}

impl SampleConfig {
    /// Load from file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Apply the queue-count override, if one is given
    pub fn with_nb_queues_override(mut self, value: Option<&str>) -> Result<Self, ConfigError> {
        if let Some(raw) = value {
            self.nb_queues = raw.trim().parse().map_err(|_| {
                ConfigError::Invalid(format!("{NB_QUEUES_ENV}={raw:?} is not a queue count"))
            })?;
        }
        Ok(self)
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.nb_ports == 0 {
            return Err(ConfigError::Invalid("nb_ports must be at least 1".into()));
        }
        if self.nb_queues == 0 {
            return Err(ConfigError::Invalid("nb_queues must be at least 1".into()));
        }
        if self.ring_size == 0 {
            return Err(ConfigError::Invalid("ring_size must be nonzero".into()));
        }
        if self.report_interval_secs == 0 {
            return Err(ConfigError::Invalid("report_interval_secs must be nonzero".into()));
        }
        if !(0.0..=1.0).contains(&self.traffic.match_ratio) {
            return Err(ConfigError::Invalid("traffic.match_ratio must be within 0..=1".into()));
        }
        if self.traffic.enabled && self.traffic.flows == 0 {
            return Err(ConfigError::Invalid("traffic.flows must be nonzero".into()));
        }
        if self.traffic.flows > MAX_TRAFFIC_FLOWS {
            return Err(ConfigError::Invalid(format!(
                "traffic.flows must be at most {MAX_TRAFFIC_FLOWS}"
            )));
        }
        Ok(())
    }

    pub fn settle(&self) -> Duration {
        Duration::from_secs(self.settle_secs)
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            nb_ports: self.nb_ports,
            report_interval: Duration::from_secs(self.report_interval_secs),
            report_top: self.report_top,
        }
    }
}
