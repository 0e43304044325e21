//! Connectivity sampling.
//!
//! A daemon has no browser to tell it whether it is online, so it measures:
//! a timed TCP connect to a well-known endpoint stands in for the online
//! flag and the round-trip estimate, and an optional timed download gives
//! the downlink estimate.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use super::{EffectiveType, NetworkQualityMonitor, NetworkSignals};

/// Source of connectivity signals.
#[async_trait]
pub trait SignalSampler: Send + Sync {
    async fn sample(&self) -> NetworkSignals;
}

/// Estimates downlink throughput by timing the download of `url`.
///
/// A measurement is reused for `every`; a failed one leaves the downlink
/// unknown until the next attempt. Downloads bypass any configured proxy so
/// the estimate describes this host's own link.
#[derive(Debug)]
pub struct DownlinkProbe {
    client: Client,
    url: String,
    every: Duration,
    last: Mutex<Option<(Instant, f64)>>,
}

impl DownlinkProbe {
    pub fn new(url: impl Into<String>, timeout: Duration, every: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .no_proxy()
            .build()
            .context("failed to build downlink probe client")?;
        Ok(Self {
            client,
            url: url.into(),
            every,
            last: Mutex::new(None),
        })
    }

    /// Mbit/s over one full download of the body.
    pub async fn measure(&self) -> Result<f64> {
        let start = Instant::now();
        let body = self
            .client
            .get(&self.url)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;
        let secs = start.elapsed().as_secs_f64().max(1e-6);
        if body.is_empty() {
            bail!("empty body from {}", self.url);
        }
        Ok(body.len() as f64 * 8.0 / secs / 1_000_000.0)
    }

    /// Cached estimate, refreshed once it is older than `every`.
    pub async fn estimate(&self) -> Option<f64> {
        let cached = *self.last.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some((at, mbps)) = cached {
            if at.elapsed() < self.every {
                return Some(mbps);
            }
        }

        let measured = match self.measure().await {
            Ok(mbps) => {
                debug!(url = %self.url, mbps, "downlink measured");
                Some((Instant::now(), mbps))
            }
            Err(e) => {
                warn!(url = %self.url, error = %format!("{e:#}"), "downlink probe failed");
                None
            }
        };
        *self.last.lock().unwrap_or_else(PoisonError::into_inner) = measured;
        measured.map(|(_, mbps)| mbps)
    }
}

/// Times TCP handshakes to `target` ("host:port").
#[derive(Debug, Clone)]
pub struct TcpRttSampler {
    target: String,
    timeout: Duration,
    attempts: u32,
    downlink: Option<Arc<DownlinkProbe>>,
}

impl TcpRttSampler {
    pub fn new(target: impl Into<String>, timeout: Duration, attempts: u32) -> Self {
        Self {
            target: target.into(),
            timeout,
            attempts: attempts.max(1),
            downlink: None,
        }
    }

    /// Also report a downlink estimate. Without one a sampled link can rank
    /// medium at best.
    pub fn with_downlink(mut self, probe: DownlinkProbe) -> Self {
        self.downlink = Some(Arc::new(probe));
        self
    }

    async fn connect_once(&self) -> Option<f64> {
        let start = Instant::now();
        match tokio::time::timeout(self.timeout, TcpStream::connect(&self.target)).await {
            Ok(Ok(_stream)) => Some(start.elapsed().as_secs_f64() * 1000.0),
            Ok(Err(e)) => {
                debug!(target = %self.target, error = %e, "connect failed");
                None
            }
            Err(_) => {
                debug!(target = %self.target, timeout_ms = self.timeout.as_millis() as u64, "connect timed out");
                None
            }
        }
    }
}

#[async_trait]
impl SignalSampler for TcpRttSampler {
    async fn sample(&self) -> NetworkSignals {
        let mut rtts = Vec::with_capacity(self.attempts as usize);
        for _ in 0..self.attempts {
            if let Some(rtt) = self.connect_once().await {
                rtts.push(rtt);
            }
        }

        if rtts.is_empty() {
            return NetworkSignals::offline();
        }

        rtts.sort_by(f64::total_cmp);
        let median = rtts[rtts.len() / 2];
        let downlink_mbps = match &self.downlink {
            Some(probe) => probe.estimate().await,
            None => None,
        };
        NetworkSignals {
            online: true,
            effective_type: Some(EffectiveType::from_rtt(median)),
            downlink_mbps,
            rtt_ms: Some(median),
        }
    }
}

/// Feed the monitor from `sampler` every `every`, forever.
pub async fn run_sampler_loop(
    monitor: Arc<NetworkQualityMonitor>,
    sampler: Arc<dyn SignalSampler>,
    every: Duration,
) {
    info!(every_ms = every.as_millis() as u64, "network sampler started");

    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        interval.tick().await;
        let signals = sampler.sample().await;
        monitor.update(signals);
    }
}
