//! TOML configuration for the airpulse daemon.
//!
//! Every section has defaults, so an empty file (or none at all) is a valid
//! configuration. The file is looked up via `AIRPULSE_CONFIG`, then
//! `/etc/airpulse/airpulse.toml`.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::air::stations::DEFAULT_MOVE_THRESHOLD_KM;
use crate::network::TierThresholds;
use crate::scheduler::SchedulerConfig;

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "AIRPULSE_CONFIG";
pub const SYSTEM_CONFIG_PATH: &str = "/etc/airpulse/airpulse.toml";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub location: LocationConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// `AIRPULSE_CONFIG`, then the system path, then defaults. A file that
    /// exists but cannot be parsed is reported and skipped.
    pub fn load_or_default() -> Self {
        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %format!("{e:#}"),
                        "AIRPULSE_CONFIG set but file could not be loaded, trying fallback"
                    );
                }
            }
        }

        let system_path = Path::new(SYSTEM_CONFIG_PATH);
        if system_path.exists() {
            match Self::load(system_path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %system_path.display(),
                        error = %format!("{e:#}"),
                        "system config file exists but could not be loaded, using defaults"
                    );
                }
            }
        }

        debug!("no config file found, using compiled-in defaults");
        Self::default()
    }

    /// Explicit path if given, otherwise the usual lookup.
    pub fn resolve(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::load_or_default()),
        }
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("failed to render configuration")
    }
}

// ---------------------------------------------------------------------------
// API
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub bind: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database file. Empty keeps everything in memory.
    pub db_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: "data/airpulse.db".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Network
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// "host:port" timed to sample connectivity. Empty disables sampling.
    pub sample_target: String,
    pub sample_timeout_ms: u64,
    pub sample_attempts: u32,
    pub sample_every_sec: u64,
    /// Body downloaded to estimate the downlink. Empty disables the probe,
    /// which caps sampled links at the medium tier.
    pub downlink_url: String,
    pub downlink_timeout_ms: u64,
    /// How long one downlink measurement is reused.
    pub downlink_every_sec: u64,
    /// Hold refreshes for a tier-dependent delay, as a slow link would.
    pub simulate_latency: bool,
    pub thresholds: TierThresholds,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            sample_target: "1.1.1.1:443".to_string(),
            sample_timeout_ms: 3000,
            sample_attempts: 3,
            sample_every_sec: 30,
            downlink_url: "https://speed.cloudflare.com/__down?bytes=1000000".to_string(),
            downlink_timeout_ms: 10_000,
            downlink_every_sec: 300,
            simulate_latency: true,
            thresholds: TierThresholds::default(),
        }
    }
}

impl NetworkConfig {
    pub fn sample_timeout(&self) -> Duration {
        Duration::from_millis(self.sample_timeout_ms)
    }

    pub fn sample_every(&self) -> Duration {
        Duration::from_secs(self.sample_every_sec.max(1))
    }

    pub fn downlink_timeout(&self) -> Duration {
        Duration::from_millis(self.downlink_timeout_ms)
    }

    pub fn downlink_every(&self) -> Duration {
        Duration::from_secs(self.downlink_every_sec)
    }
}

// ---------------------------------------------------------------------------
// Location
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocationConfig {
    /// Fixed position of this installation. Without both, geolocation is
    /// reported as unsupported.
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    /// Metres.
    pub accuracy: f64,
    pub geocoder_url: String,
    pub geocoder_timeout_ms: u64,
    pub move_threshold_km: f64,
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            latitude: None,
            longitude: None,
            accuracy: 50.0,
            geocoder_url: "https://api.bigdatacloud.net/data/reverse-geocode-client".to_string(),
            geocoder_timeout_ms: 5000,
            move_threshold_km: DEFAULT_MOVE_THRESHOLD_KM,
        }
    }
}

impl LocationConfig {
    pub fn fixed_position(&self) -> Option<(f64, f64)> {
        Some((self.latitude?, self.longitude?))
    }

    pub fn geocoder_timeout(&self) -> Duration {
        Duration::from_millis(self.geocoder_timeout_ms)
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is unset.
    pub level: String,
    /// One JSON object per line instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
