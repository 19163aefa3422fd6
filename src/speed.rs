// src/speed.rs
//
// Dwell time → speed. Distance is the real-world length of the tracked
// window; lanes at a different camera distance carry a perspective
// multiplier. Results are truncated (not rounded) to one decimal.

use crate::types::{CalibrationConfig, GridGeometry, Trip};

const MS_PER_HOUR: f64 = 3_600_000.0;

/// Shown wherever a speed is not available.
pub const NO_SPEED: &str = "--";

#[derive(Debug, Clone)]
pub struct SpeedEstimator {
    /// Distance across the tracked window, in `unit` distance (e.g. miles).
    distance: f64,
    unit: String,
}

impl SpeedEstimator {
    pub fn new(distance: f64, unit: impl Into<String>) -> Self {
        Self {
            distance,
            unit: unit.into(),
        }
    }

    pub fn from_config(calibration: &CalibrationConfig, geometry: &GridGeometry) -> Self {
        let distance = calibration
            .traversable_distance
            .unwrap_or(geometry.window_width_px() as f64 * calibration.distance_per_pixel);
        Self::new(distance, calibration.unit.clone())
    }

    pub fn distance(&self) -> f64 {
        self.distance
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    /// `None` for degenerate trips (no elapsed time).
    pub fn estimate(&self, trip: &Trip, perspective_multiplier: f64) -> Option<f64> {
        let elapsed_ms = trip.elapsed_ms();
        if !(elapsed_ms > 0.0) {
            return None;
        }
        let speed = self.distance * MS_PER_HOUR / elapsed_ms * perspective_multiplier;
        Some(truncate_one_decimal(speed))
    }

    /// Uses the trip's own lane correction.
    pub fn estimate_for_lane(&self, trip: &Trip, geometry: &GridGeometry) -> Option<f64> {
        let multiplier = geometry
            .lanes
            .get(trip.lane)
            .map_or(1.0, |lane| lane.perspective_multiplier);
        self.estimate(trip, multiplier)
    }

    pub fn format(&self, speed: Option<f64>) -> String {
        match speed {
            Some(s) => format!("{:.1} {}", s, self.unit),
            None => NO_SPEED.to_string(),
        }
    }
}

pub fn truncate_one_decimal(value: f64) -> f64 {
    (value * 10.0).floor() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::VehicleId;

    fn trip(start_ms: f64, end_ms: f64) -> Trip {
        Trip {
            vehicle: VehicleId(1),
            lane: 0,
            start_ms,
            end_ms,
        }
    }

    #[test]
    fn test_one_mile_in_36_seconds() {
        let estimator = SpeedEstimator::new(1.0, "mph");
        assert_eq!(estimator.estimate(&trip(0.0, 36_000.0), 1.0), Some(100.0));
    }

    #[test]
    fn test_truncates_instead_of_rounding() {
        let estimator = SpeedEstimator::new(1.0, "mph");
        let elapsed = MS_PER_HOUR / 54.37;
        assert_eq!(
            estimator.estimate(&trip(1_000.0, 1_000.0 + elapsed), 1.0),
            Some(54.3)
        );
        assert_eq!(truncate_one_decimal(54.39), 54.3);
    }

    #[test]
    fn test_perspective_multiplier() {
        let estimator = SpeedEstimator::new(1.0, "mph");
        assert_eq!(estimator.estimate(&trip(0.0, 36_000.0), 1.5), Some(150.0));
    }

    #[test]
    fn test_zero_elapsed_has_no_speed() {
        let estimator = SpeedEstimator::new(1.0, "mph");
        assert_eq!(estimator.estimate(&trip(500.0, 500.0), 1.0), None);
        assert_eq!(estimator.format(None), "--");
        assert_eq!(estimator.format(Some(42.0)), "42.0 mph");
    }

    #[test]
    fn test_distance_from_calibration() {
        let geometry = GridGeometry {
            frame_width: 320,
            frame_height: 240,
            cell_width: 16,
            cell_height: 16,
            columns: 20,
            channels: 3,
            lanes: Vec::new(),
        };
        let mut calibration = CalibrationConfig {
            distance_per_pixel: 0.0001,
            traversable_distance: None,
            unit: "mph".into(),
        };
        let derived = SpeedEstimator::from_config(&calibration, &geometry);
        assert!((derived.distance() - 0.032).abs() < 1e-12);

        calibration.traversable_distance = Some(0.05);
        let fixed = SpeedEstimator::from_config(&calibration, &geometry);
        assert_eq!(fixed.distance(), 0.05);
    }
}
