//! Air-quality data model: readings, AQI bands, trend and health advice.

pub mod chart;
pub mod stations;

use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// Number of hourly points kept for the trend chart.
pub const HISTORY_LEN: usize = 24;

/// Everything the dashboard shows for the current location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AirQualitySnapshot {
    #[serde(rename = "currentAQI")]
    pub current_aqi: u32,
    pub last_updated: DateTime<Utc>,
    /// Degrees Celsius.
    pub temperature: f64,
    /// Percent relative humidity.
    pub humidity: f64,
    /// km/h
    pub wind_speed: f64,
    pub wind_direction: String,
    /// km
    pub visibility: f64,
    pub pollutants: Pollutants,
    #[serde(rename = "historicalData", default)]
    pub historical: Vec<HistoricalPoint>,
    #[serde(default)]
    pub trend: Trend,
}

/// Pollutant concentrations. CO in mg/m3, everything else in ug/m3.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Pollutants {
    pub pm25: f64,
    pub pm10: f64,
    pub o3: f64,
    pub no2: f64,
    pub so2: f64,
    pub co: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalPoint {
    pub time: DateTime<Utc>,
    pub aqi: u32,
    pub hour: u32,
}

/// A fresh measurement to fold into the stored snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reading {
    pub aqi: u32,
    pub temperature: f64,
    pub humidity: f64,
    pub wind_speed: f64,
    pub wind_direction: String,
    pub visibility: f64,
    pub pollutants: Pollutants,
    /// Measurement time; defaults to now.
    #[serde(default)]
    pub observed_at: Option<DateTime<Utc>>,
}

impl AirQualitySnapshot {
    /// Start a snapshot from a single reading.
    pub fn from_reading(reading: Reading) -> Self {
        let mut snapshot = Self {
            current_aqi: 0,
            last_updated: Utc::now(),
            temperature: 0.0,
            humidity: 0.0,
            wind_speed: 0.0,
            wind_direction: String::new(),
            visibility: 0.0,
            pollutants: Pollutants::default(),
            historical: Vec::new(),
            trend: Trend::Stable,
        };
        snapshot.record(reading);
        snapshot
    }

    /// Fold a reading in: current values replaced, history shifted, trend
    /// recomputed.
    pub fn record(&mut self, reading: Reading) {
        let observed = reading.observed_at.unwrap_or_else(Utc::now);
        self.current_aqi = reading.aqi;
        self.temperature = reading.temperature;
        self.humidity = reading.humidity.clamp(0.0, 100.0);
        self.wind_speed = reading.wind_speed.max(0.0);
        self.wind_direction = reading.wind_direction;
        self.visibility = reading.visibility.max(0.0);
        self.pollutants = reading.pollutants;
        self.last_updated = observed;
        self.push_history(observed, reading.aqi);
    }

    fn push_history(&mut self, time: DateTime<Utc>, aqi: u32) {
        self.historical.push(HistoricalPoint {
            time,
            aqi: aqi.min(500),
            hour: time.hour(),
        });
        if self.historical.len() > HISTORY_LEN {
            let excess = self.historical.len() - HISTORY_LEN;
            self.historical.drain(..excess);
        }
        self.trend = Trend::from_history(&self.historical);
    }

    pub fn category(&self) -> AqiCategory {
        AqiCategory::from_aqi(self.current_aqi)
    }
}

/// US EPA AQI bands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum AqiCategory {
    Good,
    Moderate,
    UnhealthyForSensitiveGroups,
    Unhealthy,
    VeryUnhealthy,
    Hazardous,
}

impl AqiCategory {
    pub fn from_aqi(aqi: u32) -> Self {
        match aqi {
            0..=50 => AqiCategory::Good,
            51..=100 => AqiCategory::Moderate,
            101..=150 => AqiCategory::UnhealthyForSensitiveGroups,
            151..=200 => AqiCategory::Unhealthy,
            201..=300 => AqiCategory::VeryUnhealthy,
            _ => AqiCategory::Hazardous,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            AqiCategory::Good => "Good",
            AqiCategory::Moderate => "Moderate",
            AqiCategory::UnhealthyForSensitiveGroups => "Unhealthy for Sensitive Groups",
            AqiCategory::Unhealthy => "Unhealthy",
            AqiCategory::VeryUnhealthy => "Very Unhealthy",
            AqiCategory::Hazardous => "Hazardous",
        }
    }
}

impl std::fmt::Display for AqiCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Recommendation {
    pub icon: &'static str,
    pub text: &'static str,
}

/// Health advice for an AQI value, two items per band.
pub fn health_recommendations(aqi: u32) -> Vec<Recommendation> {
    let pairs: [(&'static str, &'static str); 2] = match AqiCategory::from_aqi(aqi) {
        AqiCategory::Good => [
            ("\u{1F3C3}", "Perfect day for outdoor activities and exercise!"),
            ("\u{1F333}", "Great time to spend time in parks and gardens."),
        ],
        AqiCategory::Moderate => [
            ("\u{1F465}", "Generally safe for most people to be outdoors."),
            ("\u{26A0}", "Sensitive individuals should consider reducing prolonged outdoor exertion."),
        ],
        AqiCategory::UnhealthyForSensitiveGroups => [
            ("\u{1F3E0}", "Sensitive groups should limit outdoor activities."),
            ("\u{1F637}", "Consider wearing a mask if you must go outside."),
        ],
        AqiCategory::Unhealthy => [
            ("\u{1F6AB}", "Everyone should avoid prolonged outdoor exertion."),
            ("\u{1F3E0}", "Stay indoors and keep windows closed."),
        ],
        AqiCategory::VeryUnhealthy => [
            ("\u{26A0}", "Health alert: everyone may experience serious health effects."),
            ("\u{1F3E5}", "Avoid all outdoor activities. Seek medical attention if experiencing symptoms."),
        ],
        AqiCategory::Hazardous => [
            ("\u{1F6A8}", "Emergency conditions: everyone should avoid outdoor activities."),
            ("\u{1F3E5}", "Health warnings of emergency conditions. Consult healthcare provider."),
        ],
    };
    pairs
        .into_iter()
        .map(|(icon, text)| Recommendation { icon, text })
        .collect()
}

/// Short-term AQI direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Increasing,
    Decreasing,
    #[default]
    Stable,
}

impl Trend {
    /// Average of the last three points against the three before them.
    /// Moves within +/-5 AQI count as stable.
    pub fn from_history(history: &[HistoricalPoint]) -> Self {
        let n = history.len();
        if n < 4 {
            return Trend::Stable;
        }
        let recent = &history[n - 3..];
        let older = &history[n.saturating_sub(6)..n - 3];

        let avg = |points: &[HistoricalPoint]| {
            points.iter().map(|p| p.aqi as f64).sum::<f64>() / points.len() as f64
        };
        let difference = avg(recent) - avg(older);

        if difference > 5.0 {
            Trend::Increasing
        } else if difference < -5.0 {
            Trend::Decreasing
        } else {
            Trend::Stable
        }
    }
}
