//! airpulse -- air-quality dashboard daemon.
//!
//! This crate provides the dashboard core: a priority task scheduler, a
//! network-aware polling controller, snapshot storage, location tracking and
//! the HTTP API that serves it all.

pub mod air;
pub mod api;
pub mod config;
pub mod dashboard;
pub mod location;
pub mod network;
pub mod polling;
pub mod scheduler;
pub mod storage;

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::config::{AppConfig, StorageConfig};
use crate::dashboard::Dashboard;
use crate::location::{
    FixedProvider, GeolocationProvider, HttpGeocoder, LocationTracker, UnsupportedProvider,
};
use crate::network::{run_sampler_loop, DownlinkProbe, NetworkQualityMonitor, TcpRttSampler};
use crate::polling::PollingController;
use crate::scheduler::TaskScheduler;
use crate::storage::{MemoryStore, SnapshotStore, SqliteStore};

/// Runtime the daemon runs on.
///
/// Single-threaded: the scheduler defers selection until the submitting task
/// yields, which orders a whole burst of submissions by priority only when
/// no other worker can select in the meantime.
pub fn runtime() -> std::io::Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
}

/// Open the configured snapshot store. An empty path means memory only.
pub fn open_store(config: &StorageConfig) -> Result<Arc<dyn SnapshotStore>> {
    if config.db_path.is_empty() {
        warn!("no database path configured, readings will not survive a restart");
        return Ok(Arc::new(MemoryStore::new()));
    }
    info!(db_path = %config.db_path, "initializing database");
    let store = SqliteStore::open(&config.db_path)
        .with_context(|| format!("failed to open database {}", config.db_path))?;
    Ok(Arc::new(store))
}

/// Start the airpulse daemon: API server, scheduler, polling and sampling.
pub async fn serve(config: AppConfig) -> Result<()> {
    // 1. Storage
    let store = open_store(&config.storage)?;

    // 2. Scheduler and network monitor
    let scheduler = TaskScheduler::new(config.scheduler.clone());
    let monitor = Arc::new(NetworkQualityMonitor::new(config.network.thresholds.clone()));

    if config.network.sample_target.is_empty() {
        info!("network sampling disabled, tier follows reported signals only");
    } else {
        let mut sampler = TcpRttSampler::new(
            config.network.sample_target.clone(),
            config.network.sample_timeout(),
            config.network.sample_attempts,
        );
        if config.network.downlink_url.is_empty() {
            info!("downlink probe disabled, sampled links rank medium at best");
        } else {
            sampler = sampler.with_downlink(DownlinkProbe::new(
                config.network.downlink_url.clone(),
                config.network.downlink_timeout(),
                config.network.downlink_every(),
            )?);
        }
        let sampler = Arc::new(sampler);
        tokio::spawn(run_sampler_loop(
            Arc::clone(&monitor),
            sampler,
            config.network.sample_every(),
        ));
    }

    // 3. Dashboard and background polling
    let mut dashboard = Dashboard::new(Arc::clone(&store), scheduler.clone(), Arc::clone(&monitor));
    if !config.network.simulate_latency {
        dashboard = dashboard.without_latency();
    }
    let dashboard = Arc::new(dashboard);

    let polling = Arc::new(PollingController::new(
        scheduler.clone(),
        monitor.tier().polling_interval(),
    ));
    polling.resume(dashboard.refresh_fn());
    let follower = polling.follow(&monitor);

    // 4. Location
    let provider: Arc<dyn GeolocationProvider> = match config.location.fixed_position() {
        Some((latitude, longitude)) => {
            Arc::new(FixedProvider::new(latitude, longitude, config.location.accuracy))
        }
        None => Arc::new(UnsupportedProvider),
    };
    let geocoder = Arc::new(HttpGeocoder::new(
        config.location.geocoder_url.clone(),
        config.location.geocoder_timeout(),
    )?);
    let location = Arc::new(LocationTracker::new(
        provider,
        geocoder,
        Arc::clone(&store),
        scheduler.clone(),
        config.location.move_threshold_km,
    ));
    // Failure is already logged; the dashboard works without a location.
    let _ = location.enable().await;
    let watcher = match location.watch() {
        Ok(handle) => Some(handle),
        Err(e) => {
            info!(error = %e, "location updates unavailable");
            None
        }
    };

    // Initial load; the handles are not needed.
    drop(dashboard.refresh());
    drop(dashboard.render_charts());

    // 5. API server
    let addr: std::net::SocketAddr = config
        .api
        .bind
        .parse()
        .with_context(|| format!("invalid bind address '{}'", config.api.bind))?;
    let app = api::router(api::state::AppState {
        dashboard,
        polling: Arc::clone(&polling),
        location,
    });

    info!(%addr, tier = %monitor.tier(), "airpulse listening");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    polling.stop();
    follower.abort();
    if let Some(watcher) = watcher {
        watcher.abort();
    }
    scheduler.shutdown();
    info!("airpulse stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}
