//! Application root: turns stored snapshots into what the front end shows.
//!
//! Every refresh runs through the [`TaskScheduler`]; what a refresh loads
//! depends on the current [`NetworkTier`].

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::air::chart::{aqi_series, pollutant_shares, AqiSeries, ChartLayout, PollutantShare};
use crate::air::stations::{Location, Station};
use crate::air::{health_recommendations, AirQualitySnapshot, AqiCategory, Reading, Recommendation};
use crate::network::{LoadingStrategy, NetworkQualityMonitor, NetworkTier};
use crate::polling::{refresh_fn, RefreshFn};
use crate::scheduler::{Priority, TaskHandle, TaskScheduler};
use crate::storage::{self, SnapshotStore, AIR_QUALITY_KEY, LOCATION_KEY, STATIONS_KEY};

/// One rendered state of the dashboard.
#[derive(Debug, Clone, Serialize)]
pub struct DashboardView {
    pub snapshot: AirQualitySnapshot,
    pub category: AqiCategory,
    pub category_label: &'static str,
    pub recommendations: Vec<Recommendation>,
    pub location: Option<Location>,
    /// Empty unless the tier allows loading stations.
    pub stations: Vec<Station>,
    pub tier: NetworkTier,
    pub strategy: LoadingStrategy,
    pub refreshed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChartBundle {
    pub aqi: AqiSeries,
    pub pollutants: Vec<PollutantShare>,
}

pub struct Dashboard {
    store: Arc<dyn SnapshotStore>,
    scheduler: TaskScheduler,
    monitor: Arc<NetworkQualityMonitor>,
    layout: ChartLayout,
    simulate_latency: bool,
    view: watch::Sender<Option<DashboardView>>,
}

impl Dashboard {
    pub fn new(
        store: Arc<dyn SnapshotStore>,
        scheduler: TaskScheduler,
        monitor: Arc<NetworkQualityMonitor>,
    ) -> Self {
        let (view, _) = watch::channel(None);
        Self {
            store,
            scheduler,
            monitor,
            layout: ChartLayout::default(),
            simulate_latency: true,
            view,
        }
    }

    /// Skip the tier-dependent stand-in latency on refresh.
    pub fn without_latency(mut self) -> Self {
        self.simulate_latency = false;
        self
    }

    pub fn with_layout(mut self, layout: ChartLayout) -> Self {
        self.layout = layout;
        self
    }

    pub fn scheduler(&self) -> &TaskScheduler {
        &self.scheduler
    }

    pub fn monitor(&self) -> &Arc<NetworkQualityMonitor> {
        &self.monitor
    }

    /// Queue a refresh. Resolves to `None` when nothing has been stored yet;
    /// the published view is then left as it was.
    pub fn refresh(self: &Arc<Self>) -> TaskHandle<Option<DashboardView>> {
        let dashboard = Arc::clone(self);
        self.scheduler
            .submit(Priority::Normal, move || async move { dashboard.reload().await })
    }

    /// Refresh callback for the polling controller, which does its own
    /// scheduling.
    pub fn refresh_fn(self: &Arc<Self>) -> RefreshFn {
        let dashboard = Arc::clone(self);
        refresh_fn(move || {
            let dashboard = Arc::clone(&dashboard);
            async move { dashboard.reload().await.map(|_| ()) }
        })
    }

    /// Queue chart preparation as idle-time work. `None` when there is no
    /// snapshot or the tier does not load charts.
    pub fn render_charts(self: &Arc<Self>) -> TaskHandle<Option<ChartBundle>> {
        let dashboard = Arc::clone(self);
        self.scheduler.submit(Priority::Low, move || async move {
            if !dashboard.monitor.tier().loading_strategy().load_charts {
                debug!("charts skipped at this network tier");
                return Ok(None);
            }
            let Some(snapshot) = dashboard.snapshot()? else {
                return Ok(None);
            };
            Ok(Some(ChartBundle {
                aqi: aqi_series(&snapshot.historical, &dashboard.layout),
                pollutants: pollutant_shares(&snapshot.pollutants),
            }))
        })
    }

    /// Fold a reading into the stored snapshot.
    pub fn ingest(&self, reading: Reading) -> Result<AirQualitySnapshot> {
        record_reading(self.store.as_ref(), reading)
    }

    pub fn snapshot(&self) -> Result<Option<AirQualitySnapshot>> {
        storage::load(self.store.as_ref(), AIR_QUALITY_KEY)
    }

    /// Last published view.
    pub fn view(&self) -> Option<DashboardView> {
        self.view.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<DashboardView>> {
        self.view.subscribe()
    }

    async fn reload(&self) -> Result<Option<DashboardView>> {
        let tier = self.monitor.tier();
        if self.simulate_latency {
            let delay = tier.simulated_delay(&mut rand::thread_rng());
            tokio::time::sleep(delay).await;
        }

        let Some(mut snapshot) = self.snapshot()? else {
            debug!("no stored snapshot, view unchanged");
            return Ok(None);
        };

        let strategy = tier.loading_strategy();
        if !strategy.load_historical {
            snapshot.historical.clear();
        }
        let stations = if strategy.load_stations {
            storage::load::<Vec<Station>>(self.store.as_ref(), STATIONS_KEY)?.unwrap_or_default()
        } else {
            Vec::new()
        };
        let location = storage::load::<Location>(self.store.as_ref(), LOCATION_KEY)?;

        let category = snapshot.category();
        let view = DashboardView {
            recommendations: health_recommendations(snapshot.current_aqi),
            category,
            category_label: category.label(),
            snapshot,
            location,
            stations,
            tier,
            strategy,
            refreshed_at: Utc::now(),
        };

        debug!(%tier, aqi = view.snapshot.current_aqi, "dashboard view refreshed");
        self.view.send_replace(Some(view.clone()));
        Ok(Some(view))
    }
}

/// Fold `reading` into the snapshot held by `store`, starting one if none
/// exists yet.
pub fn record_reading(store: &dyn SnapshotStore, reading: Reading) -> Result<AirQualitySnapshot> {
    let snapshot = match storage::load::<AirQualitySnapshot>(store, AIR_QUALITY_KEY)? {
        Some(mut existing) => {
            existing.record(reading);
            existing
        }
        None => AirQualitySnapshot::from_reading(reading),
    };
    storage::save(store, AIR_QUALITY_KEY, &snapshot)?;
    info!(aqi = snapshot.current_aqi, trend = ?snapshot.trend, "reading recorded");
    Ok(snapshot)
}
