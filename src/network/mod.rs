//! Network quality tiers.
//!
//! Connectivity signals reported by the host are reduced to one of five
//! tiers. The tier sets polling cadence, the stand-in latency for refreshes
//! and how much of the dashboard is worth loading.

pub mod monitor;
pub mod sampler;

use std::ops::RangeInclusive;
use std::str::FromStr;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use self::monitor::NetworkQualityMonitor;
pub use self::sampler::{run_sampler_loop, DownlinkProbe, SignalSampler, TcpRttSampler};

/// Discrete network quality, best first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NetworkTier {
    High,
    Medium,
    Low,
    VeryLow,
    Offline,
}

impl std::fmt::Display for NetworkTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            NetworkTier::High => "high",
            NetworkTier::Medium => "medium",
            NetworkTier::Low => "low",
            NetworkTier::VeryLow => "very-low",
            NetworkTier::Offline => "offline",
        };
        f.write_str(s)
    }
}

impl NetworkTier {
    /// Refresh cadence for this tier. Zero means no polling.
    pub fn polling_interval(self) -> Duration {
        let ms = match self {
            NetworkTier::High => 15_000,
            NetworkTier::Medium => 30_000,
            NetworkTier::Low => 60_000,
            NetworkTier::VeryLow => 120_000,
            NetworkTier::Offline => 0,
        };
        Duration::from_millis(ms)
    }

    /// Bounds (ms) of the stand-in latency applied to refreshes.
    pub fn simulated_delay_range(self) -> RangeInclusive<u64> {
        match self {
            NetworkTier::High => 100..=200,
            NetworkTier::Medium => 300..=500,
            NetworkTier::Low => 800..=1000,
            NetworkTier::VeryLow => 1500..=2000,
            NetworkTier::Offline => 0..=0,
        }
    }

    /// Draw a stand-in latency from [`Self::simulated_delay_range`].
    pub fn simulated_delay<R: Rng + ?Sized>(self, rng: &mut R) -> Duration {
        Duration::from_millis(rng.gen_range(self.simulated_delay_range()))
    }

    pub fn loading_strategy(self) -> LoadingStrategy {
        match self {
            NetworkTier::High => LoadingStrategy {
                load_charts: true,
                load_stations: true,
                load_historical: true,
                compression: Compression::None,
            },
            NetworkTier::Medium => LoadingStrategy {
                load_charts: true,
                load_stations: true,
                load_historical: true,
                compression: Compression::Light,
            },
            NetworkTier::Low => LoadingStrategy {
                load_charts: true,
                load_stations: false,
                load_historical: false,
                compression: Compression::Medium,
            },
            NetworkTier::VeryLow | NetworkTier::Offline => LoadingStrategy {
                load_charts: false,
                load_stations: false,
                load_historical: false,
                compression: Compression::High,
            },
        }
    }
}

/// Which dashboard sections to load at a given tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LoadingStrategy {
    pub load_charts: bool,
    pub load_stations: bool,
    pub load_historical: bool,
    pub compression: Compression,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    None,
    Light,
    Medium,
    High,
}

/// Coarse bandwidth class as reported by browsers' Network Information API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EffectiveType {
    #[serde(rename = "slow-2g")]
    Slow2g,
    #[serde(rename = "2g")]
    TwoG,
    #[serde(rename = "3g")]
    ThreeG,
    #[serde(rename = "4g")]
    FourG,
}

#[derive(Debug, Error)]
#[error("unknown effective connection type '{0}' (expected slow-2g, 2g, 3g or 4g)")]
pub struct ParseEffectiveTypeError(String);

impl FromStr for EffectiveType {
    type Err = ParseEffectiveTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "slow-2g" => Ok(EffectiveType::Slow2g),
            "2g" => Ok(EffectiveType::TwoG),
            "3g" => Ok(EffectiveType::ThreeG),
            "4g" => Ok(EffectiveType::FourG),
            other => Err(ParseEffectiveTypeError(other.to_string())),
        }
    }
}

impl std::fmt::Display for EffectiveType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EffectiveType::Slow2g => "slow-2g",
            EffectiveType::TwoG => "2g",
            EffectiveType::ThreeG => "3g",
            EffectiveType::FourG => "4g",
        };
        f.write_str(s)
    }
}

impl EffectiveType {
    /// Bandwidth class implied by a round-trip estimate alone.
    pub fn from_rtt(rtt_ms: f64) -> Self {
        if rtt_ms >= 2000.0 {
            EffectiveType::Slow2g
        } else if rtt_ms >= 1400.0 {
            EffectiveType::TwoG
        } else if rtt_ms >= 270.0 {
            EffectiveType::ThreeG
        } else {
            EffectiveType::FourG
        }
    }
}

/// Connectivity signals as exposed by the host.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NetworkSignals {
    pub online: bool,
    #[serde(default)]
    pub effective_type: Option<EffectiveType>,
    #[serde(default)]
    pub downlink_mbps: Option<f64>,
    #[serde(default)]
    pub rtt_ms: Option<f64>,
}

impl NetworkSignals {
    pub fn online() -> Self {
        Self {
            online: true,
            effective_type: None,
            downlink_mbps: None,
            rtt_ms: None,
        }
    }

    pub fn offline() -> Self {
        Self {
            online: false,
            ..Self::online()
        }
    }

    fn has_detail(&self) -> bool {
        self.effective_type.is_some() || self.downlink_mbps.is_some() || self.rtt_ms.is_some()
    }
}

impl Default for NetworkSignals {
    fn default() -> Self {
        Self::online()
    }
}

/// Cut-off points used by [`classify`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TierThresholds {
    pub high_downlink_mbps: f64,
    pub high_rtt_ms: f64,
    pub medium_downlink_mbps: f64,
    pub medium_rtt_ms: f64,
    pub low_downlink_mbps: f64,
    pub low_rtt_ms: f64,
}

impl Default for TierThresholds {
    fn default() -> Self {
        Self {
            high_downlink_mbps: 10.0,
            high_rtt_ms: 100.0,
            medium_downlink_mbps: 5.0,
            medium_rtt_ms: 200.0,
            low_downlink_mbps: 1.0,
            low_rtt_ms: 500.0,
        }
    }
}

/// Map signals to a tier. First matching rule wins; a missing numeric
/// signal fails any comparison it appears in.
pub fn classify(signals: &NetworkSignals, t: &TierThresholds) -> NetworkTier {
    if !signals.online {
        return NetworkTier::Offline;
    }
    // Host only reports online/offline.
    if !signals.has_detail() {
        return NetworkTier::High;
    }

    let kind = signals.effective_type;
    let downlink_above = |limit: f64| signals.downlink_mbps.is_some_and(|d| d > limit);
    let rtt_below = |limit: f64| signals.rtt_ms.is_some_and(|r| r < limit);

    if kind == Some(EffectiveType::FourG)
        && downlink_above(t.high_downlink_mbps)
        && rtt_below(t.high_rtt_ms)
    {
        NetworkTier::High
    } else if kind == Some(EffectiveType::FourG)
        || (downlink_above(t.medium_downlink_mbps) && rtt_below(t.medium_rtt_ms))
    {
        NetworkTier::Medium
    } else if kind == Some(EffectiveType::ThreeG)
        || (downlink_above(t.low_downlink_mbps) && rtt_below(t.low_rtt_ms))
    {
        NetworkTier::Low
    } else {
        NetworkTier::VeryLow
    }
}
