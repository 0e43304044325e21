//! Monitoring stations and user location geometry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const EARTH_RADIUS_KM: f64 = 6371.0;

/// Moves shorter than this are treated as GPS jitter.
pub const DEFAULT_MOVE_THRESHOLD_KM: f64 = 0.1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    /// Metres, as reported by the provider.
    pub accuracy: f64,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub name: Option<String>,
}

impl Location {
    pub fn new(latitude: f64, longitude: f64, accuracy: f64) -> Self {
        Self {
            latitude,
            longitude,
            accuracy,
            timestamp: Utc::now(),
            name: None,
        }
    }

    pub fn distance_km(&self, other: &Location) -> f64 {
        haversine_km(self.latitude, self.longitude, other.latitude, other.longitude)
    }

    /// Whether `next` is far enough away to count as a real move.
    pub fn has_moved(&self, next: &Location, threshold_km: f64) -> bool {
        self.distance_km(next) > threshold_km
    }

    /// Name if known, otherwise the coordinates.
    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| coordinates_label(self.latitude, self.longitude))
    }
}

/// Great-circle distance in kilometres.
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();
    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_KM * c
}

/// "lat, lon" with four decimals.
pub fn coordinates_label(latitude: f64, longitude: f64) -> String {
    format!("{latitude:.4}, {longitude:.4}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StationStatus {
    Active,
    Maintenance,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Station {
    pub id: u32,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    /// Distance from the user, one decimal. Recomputed by [`rank_by_distance`].
    #[serde(rename = "distance", default)]
    pub distance_km: f64,
    pub aqi: u32,
    pub status: StationStatus,
}

/// Recompute every station's distance from `origin` and sort nearest first.
pub fn rank_by_distance(stations: &mut [Station], origin: &Location) {
    for s in stations.iter_mut() {
        let d = haversine_km(origin.latitude, origin.longitude, s.latitude, s.longitude);
        s.distance_km = (d * 10.0).round() / 10.0;
    }
    stations.sort_by(|a, b| a.distance_km.total_cmp(&b.distance_km));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn station(id: u32, lat: f64, lon: f64) -> Station {
        Station {
            id,
            name: format!("Station {id}"),
            latitude: lat,
            longitude: lon,
            distance_km: 0.0,
            aqi: 40,
            status: StationStatus::Active,
        }
    }

    #[test]
    fn test_haversine_known_distance() {
        // London to Paris, roughly 344 km.
        let d = haversine_km(51.5074, -0.1278, 48.8566, 2.3522);
        assert!((d - 343.5).abs() < 2.0, "got {d}");
        assert_eq!(haversine_km(10.0, 10.0, 10.0, 10.0), 0.0);
    }

    #[test]
    fn test_small_moves_are_jitter() {
        let here = Location::new(40.0, -74.0, 10.0);
        let nearby = Location::new(40.0005, -74.0, 10.0); // ~55 m
        let across_town = Location::new(40.01, -74.0, 10.0); // ~1.1 km
        assert!(!here.has_moved(&nearby, DEFAULT_MOVE_THRESHOLD_KM));
        assert!(here.has_moved(&across_town, DEFAULT_MOVE_THRESHOLD_KM));
    }

    #[test]
    fn test_rank_sorts_nearest_first() {
        let origin = Location::new(52.0, 13.0, 5.0);
        let mut stations = vec![
            station(1, 52.10, 13.0),
            station(2, 52.01, 13.0),
            station(3, 52.05, 13.0),
        ];
        rank_by_distance(&mut stations, &origin);

        let ids: Vec<_> = stations.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![2, 3, 1]);
        assert_eq!(stations[0].distance_km, 1.1);
    }

    #[test]
    fn test_display_name_falls_back_to_coordinates() {
        let mut loc = Location::new(37.774929, -122.419416, 20.0);
        assert_eq!(loc.display_name(), "37.7749, -122.4194");
        loc.name = Some("San Francisco".to_string());
        assert_eq!(loc.display_name(), "San Francisco");
    }
}
