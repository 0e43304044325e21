//! Where the user is, and what that place is called.
//!
//! Positions come from a [`GeolocationProvider`]; names come from a
//! [`ReverseGeocoder`] and are resolved as low-priority background work so a
//! slow lookup never holds up a refresh.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::air::stations::{coordinates_label, rank_by_distance, Location, Station};
use crate::scheduler::{Priority, TaskHandle, TaskScheduler};
use crate::storage::{self, SnapshotStore, LOCATION_KEY, STATIONS_KEY};

/// Name used when the geocoder answers but knows nothing about the place.
pub const UNKNOWN_LOCATION: &str = "Unknown Location";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LocationError {
    #[error("geolocation is not supported on this host")]
    Unsupported,

    #[error("location access denied")]
    PermissionDenied,

    #[error("location information is unavailable: {0}")]
    Unavailable(String),

    #[error("location request timed out")]
    Timeout,
}

pub type PositionStream = mpsc::Receiver<Result<Location, LocationError>>;

/// Source of device positions.
#[async_trait]
pub trait GeolocationProvider: Send + Sync {
    async fn current_position(&self) -> Result<Location, LocationError>;

    /// Continuous updates. The stream ends when the provider stops watching.
    fn watch(&self) -> Result<PositionStream, LocationError>;
}

/// Coordinates taken from configuration; never moves.
#[derive(Debug, Clone)]
pub struct FixedProvider {
    latitude: f64,
    longitude: f64,
    accuracy: f64,
}

impl FixedProvider {
    pub fn new(latitude: f64, longitude: f64, accuracy: f64) -> Self {
        Self {
            latitude,
            longitude,
            accuracy,
        }
    }
}

#[async_trait]
impl GeolocationProvider for FixedProvider {
    async fn current_position(&self) -> Result<Location, LocationError> {
        Ok(Location::new(self.latitude, self.longitude, self.accuracy))
    }

    fn watch(&self) -> Result<PositionStream, LocationError> {
        let (tx, rx) = mpsc::channel(1);
        // Capacity 1, nothing else sent: cannot fail.
        let _ = tx.try_send(Ok(Location::new(self.latitude, self.longitude, self.accuracy)));
        Ok(rx)
    }
}

/// Host without any position source.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnsupportedProvider;

#[async_trait]
impl GeolocationProvider for UnsupportedProvider {
    async fn current_position(&self) -> Result<Location, LocationError> {
        Err(LocationError::Unsupported)
    }

    fn watch(&self) -> Result<PositionStream, LocationError> {
        Err(LocationError::Unsupported)
    }
}

/// Coordinates to a human-readable place name.
#[async_trait]
pub trait ReverseGeocoder: Send + Sync {
    async fn name_for(&self, latitude: f64, longitude: f64) -> Result<String>;
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeocodeResponse {
    #[serde(default)]
    locality: Option<String>,
    #[serde(default)]
    city: Option<String>,
    #[serde(default)]
    principal_subdivision: Option<String>,
    #[serde(default)]
    country_name: Option<String>,
}

impl GeocodeResponse {
    /// "locality, city, region, country", skipping blanks and a city that
    /// repeats the locality.
    fn place_name(&self) -> String {
        fn present(s: &Option<String>) -> Option<&str> {
            s.as_deref().filter(|v| !v.trim().is_empty())
        }

        let mut parts = Vec::with_capacity(4);
        let locality = present(&self.locality);
        if let Some(l) = locality {
            parts.push(l);
        }
        if let Some(c) = present(&self.city) {
            if Some(c) != locality {
                parts.push(c);
            }
        }
        if let Some(r) = present(&self.principal_subdivision) {
            parts.push(r);
        }
        if let Some(c) = present(&self.country_name) {
            parts.push(c);
        }

        if parts.is_empty() {
            UNKNOWN_LOCATION.to_string()
        } else {
            parts.join(", ")
        }
    }
}

/// Client for a BigDataCloud-compatible reverse geocoding endpoint.
#[derive(Debug, Clone)]
pub struct HttpGeocoder {
    client: Client,
    url: String,
}

impl HttpGeocoder {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build geocoding client")?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl ReverseGeocoder for HttpGeocoder {
    async fn name_for(&self, latitude: f64, longitude: f64) -> Result<String> {
        let response = self
            .client
            .get(&self.url)
            .query(&[
                ("latitude", latitude.to_string()),
                ("longitude", longitude.to_string()),
                ("localityLanguage", "en".to_string()),
            ])
            .send()
            .await
            .context("geocoding service unavailable")?
            .error_for_status()
            .context("geocoding service unavailable")?;

        let body: GeocodeResponse = response
            .json()
            .await
            .context("geocoding response was not understood")?;
        Ok(body.place_name())
    }
}

/// Keeps the last-known location, persists it and re-ranks stations when it
/// changes.
pub struct LocationTracker {
    provider: Arc<dyn GeolocationProvider>,
    geocoder: Arc<dyn ReverseGeocoder>,
    store: Arc<dyn SnapshotStore>,
    scheduler: TaskScheduler,
    move_threshold_km: f64,
    current: Mutex<Option<Location>>,
}

impl LocationTracker {
    /// Starts from whatever location was saved last time, if any.
    pub fn new(
        provider: Arc<dyn GeolocationProvider>,
        geocoder: Arc<dyn ReverseGeocoder>,
        store: Arc<dyn SnapshotStore>,
        scheduler: TaskScheduler,
        move_threshold_km: f64,
    ) -> Self {
        let saved = match storage::load::<Location>(store.as_ref(), LOCATION_KEY) {
            Ok(saved) => saved,
            Err(e) => {
                warn!(error = %e, "ignoring saved location");
                None
            }
        };
        if let Some(loc) = &saved {
            debug!(name = %loc.display_name(), "restored saved location");
        }

        Self {
            provider,
            geocoder,
            store,
            scheduler,
            move_threshold_km,
            current: Mutex::new(saved),
        }
    }

    pub fn current(&self) -> Option<Location> {
        self.current_slot().clone()
    }

    pub fn is_enabled(&self) -> bool {
        self.current_slot().is_some()
    }

    /// Ask the provider for a fix and adopt it. On failure the last-known
    /// location is kept and the error returned for the caller to report.
    pub async fn enable(self: &Arc<Self>) -> Result<Location, LocationError> {
        match self.provider.current_position().await {
            Ok(loc) => {
                info!(latitude = loc.latitude, longitude = loc.longitude, "location enabled");
                self.adopt(loc.clone());
                Ok(loc)
            }
            Err(e) => {
                warn!(error = %e, "could not get current location");
                Err(e)
            }
        }
    }

    /// Apply a position update. Returns whether it counted as a move.
    pub fn on_position(self: &Arc<Self>, next: Location) -> bool {
        let moved = match self.current_slot().as_ref() {
            Some(cur) => cur.has_moved(&next, self.move_threshold_km),
            None => true,
        };
        if moved {
            debug!(latitude = next.latitude, longitude = next.longitude, "location changed");
            self.adopt(next);
        }
        moved
    }

    /// Follow the provider's position stream in the background.
    pub fn watch(self: &Arc<Self>) -> Result<JoinHandle<()>, LocationError> {
        let mut positions = self.provider.watch()?;
        let tracker = Arc::clone(self);

        Ok(tokio::spawn(async move {
            while let Some(update) = positions.recv().await {
                match update {
                    Ok(loc) => {
                        tracker.on_position(loc);
                    }
                    Err(e) => warn!(error = %e, "location watch error"),
                }
            }
            debug!("location watch ended");
        }))
    }

    /// Resolve the place name for `loc` as idle-time work.
    pub fn lookup_name(self: &Arc<Self>, loc: &Location) -> TaskHandle<String> {
        let (latitude, longitude) = (loc.latitude, loc.longitude);
        let geocoder = Arc::clone(&self.geocoder);
        let tracker = Arc::clone(self);

        self.scheduler.submit(Priority::Low, move || async move {
            let name = match geocoder.name_for(latitude, longitude).await {
                Ok(name) => name,
                Err(e) => {
                    warn!(error = %format!("{e:#}"), "reverse geocoding failed");
                    coordinates_label(latitude, longitude)
                }
            };
            tracker.set_name(latitude, longitude, &name)?;
            Ok(name)
        })
    }

    fn adopt(self: &Arc<Self>, loc: Location) {
        *self.current_slot() = Some(loc.clone());
        if let Err(e) = storage::save(self.store.as_ref(), LOCATION_KEY, &loc) {
            warn!(error = %format!("{e:#}"), "failed to persist location");
        }
        if let Err(e) = self.rerank_stations(&loc) {
            warn!(error = %format!("{e:#}"), "failed to re-rank stations");
        }
        self.lookup_name(&loc);
    }

    /// Attach a name, unless the user has moved on since the lookup started.
    fn set_name(&self, latitude: f64, longitude: f64, name: &str) -> Result<()> {
        let updated = {
            let mut slot = self.current_slot();
            match slot.as_mut() {
                Some(cur) if cur.latitude == latitude && cur.longitude == longitude => {
                    cur.name = Some(name.to_string());
                    Some(cur.clone())
                }
                _ => None,
            }
        };
        match updated {
            Some(loc) => storage::save(self.store.as_ref(), LOCATION_KEY, &loc),
            None => {
                debug!(%name, "stale location name dropped");
                Ok(())
            }
        }
    }

    fn rerank_stations(&self, origin: &Location) -> Result<()> {
        let Some(mut stations) = storage::load::<Vec<Station>>(self.store.as_ref(), STATIONS_KEY)?
        else {
            return Ok(());
        };
        rank_by_distance(&mut stations, origin);
        storage::save(self.store.as_ref(), STATIONS_KEY, &stations)
    }

    fn current_slot(&self) -> MutexGuard<'_, Option<Location>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
