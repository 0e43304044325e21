//! Chart-ready series. Coordinates only; drawing belongs to the front end.

use std::f64::consts::{FRAC_PI_2, TAU};

use serde::Serialize;

use super::{HistoricalPoint, Pollutants};

/// Lowest top of the AQI axis, so calm days don't look alarming.
const MIN_AXIS_MAX: u32 = 300;
const GRID_STEP: u32 = 50;

/// Drawing area for the AQI trend chart, in CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ChartLayout {
    pub width: f64,
    pub height: f64,
    pub padding: f64,
}

impl Default for ChartLayout {
    fn default() -> Self {
        Self {
            width: 800.0,
            height: 400.0,
            padding: 60.0,
        }
    }
}

impl ChartLayout {
    fn plot_width(&self) -> f64 {
        (self.width - self.padding * 2.0).max(0.0)
    }

    fn plot_height(&self) -> f64 {
        (self.height - self.padding * 2.0).max(0.0)
    }

    fn y_for(&self, value: f64, max: f64) -> f64 {
        self.padding + self.plot_height() - (value / max) * self.plot_height()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ChartPoint {
    pub x: f64,
    pub y: f64,
    pub aqi: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GridLine {
    pub value: u32,
    pub y: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AqiSeries {
    pub axis_max: u32,
    pub points: Vec<ChartPoint>,
    pub grid: Vec<GridLine>,
    /// Marker for the latest value, pinned to the right edge.
    pub current: Option<ChartPoint>,
}

/// Map hourly history onto the layout. The y axis runs from 0 to the larger
/// of 300 and the highest value in the series.
pub fn aqi_series(history: &[HistoricalPoint], layout: &ChartLayout) -> AqiSeries {
    let axis_max = history
        .iter()
        .map(|p| p.aqi)
        .max()
        .unwrap_or(0)
        .max(MIN_AXIS_MAX);
    let max = axis_max as f64;

    let span = history.len().saturating_sub(1).max(1) as f64;
    let points: Vec<ChartPoint> = history
        .iter()
        .enumerate()
        .map(|(i, p)| ChartPoint {
            x: layout.padding + (i as f64 / span) * layout.plot_width(),
            y: layout.y_for(p.aqi as f64, max),
            aqi: p.aqi,
        })
        .collect();

    let grid = (1..=MIN_AXIS_MAX / GRID_STEP)
        .map(|k| k * GRID_STEP)
        .filter(|v| *v <= axis_max)
        .map(|value| GridLine {
            value,
            y: layout.y_for(value as f64, max),
        })
        .collect();

    let current = history.last().map(|p| ChartPoint {
        x: layout.padding + layout.plot_width(),
        y: layout.y_for(p.aqi as f64, max),
        aqi: p.aqi,
    });

    AqiSeries {
        axis_max,
        points,
        grid,
        current,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PollutantShare {
    pub name: &'static str,
    pub unit: &'static str,
    pub value: f64,
    pub fraction: f64,
    /// Radians, clockwise from 12 o'clock at -pi/2.
    pub start_angle: f64,
    pub sweep: f64,
}

/// Split pollutant totals into pie slices.
pub fn pollutant_shares(p: &Pollutants) -> Vec<PollutantShare> {
    let entries = [
        ("PM2.5", "\u{b5}g/m\u{b3}", p.pm25),
        ("PM10", "\u{b5}g/m\u{b3}", p.pm10),
        ("O\u{2083}", "\u{b5}g/m\u{b3}", p.o3),
        ("NO\u{2082}", "\u{b5}g/m\u{b3}", p.no2),
        ("SO\u{2082}", "\u{b5}g/m\u{b3}", p.so2),
        ("CO", "mg/m\u{b3}", p.co),
    ];
    let total: f64 = entries.iter().map(|(_, _, v)| v.max(0.0)).sum();

    let mut angle = -FRAC_PI_2;
    entries
        .into_iter()
        .map(|(name, unit, value)| {
            let fraction = if total > 0.0 { value.max(0.0) / total } else { 0.0 };
            let sweep = fraction * TAU;
            let share = PollutantShare {
                name,
                unit,
                value,
                fraction,
                start_angle: angle,
                sweep,
            };
            angle += sweep;
            share
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn points(values: &[u32]) -> Vec<HistoricalPoint> {
        values
            .iter()
            .map(|&aqi| HistoricalPoint { time: Utc::now(), aqi, hour: 0 })
            .collect()
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_series_maps_corners() {
        let layout = ChartLayout { width: 420.0, height: 320.0, padding: 10.0 };
        let s = aqi_series(&points(&[0, 150, 300]), &layout);

        assert_eq!(s.axis_max, 300);
        assert!(close(s.points[0].x, 10.0) && close(s.points[0].y, 310.0));
        assert!(close(s.points[1].x, 210.0) && close(s.points[1].y, 160.0));
        assert!(close(s.points[2].x, 410.0) && close(s.points[2].y, 10.0));
        assert_eq!(s.grid.len(), 6);
        assert_eq!(s.current.unwrap().aqi, 300);
    }

    #[test]
    fn test_axis_grows_with_extreme_values() {
        let s = aqi_series(&points(&[80, 450]), &ChartLayout::default());
        assert_eq!(s.axis_max, 450);
        assert!(close(s.points[1].y, ChartLayout::default().padding));
    }

    #[test]
    fn test_grid_is_trimmed_to_axis() {
        let s = aqi_series(&points(&[]), &ChartLayout::default());
        assert!(s.points.is_empty());
        assert!(s.current.is_none());
        assert_eq!(s.grid.last().unwrap().value, 300);
    }

    #[test]
    fn test_single_point_sits_on_left_edge() {
        let layout = ChartLayout::default();
        let s = aqi_series(&points(&[42]), &layout);
        assert!(close(s.points[0].x, layout.padding));
    }

    #[test]
    fn test_pollutant_slices_cover_the_circle() {
        let p = Pollutants { pm25: 10.0, pm10: 20.0, o3: 30.0, no2: 20.0, so2: 15.0, co: 5.0 };
        let shares = pollutant_shares(&p);
        assert_eq!(shares.len(), 6);
        assert!(close(shares.iter().map(|s| s.fraction).sum::<f64>(), 1.0));
        assert!(close(shares[0].start_angle, -FRAC_PI_2));
        let last = shares.last().unwrap();
        assert!(close(last.start_angle + last.sweep, -FRAC_PI_2 + TAU));
        assert!(close(shares[2].fraction, 0.3));
    }

    #[test]
    fn test_all_zero_pollutants_give_empty_slices() {
        let shares = pollutant_shares(&Pollutants::default());
        assert!(shares.iter().all(|s| s.fraction == 0.0 && s.sweep == 0.0));
    }
}
