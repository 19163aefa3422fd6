// src/config.rs

use crate::error::ConfigError;
use crate::types::{Config, GridGeometry, LaneGeometry, OracleConfig};
use anyhow::{Context, Result};
use std::fs;
use tracing::info;

impl Config {
    /// Parses the file only. Call `apply_env_overrides` once logging is up.
    pub fn load(path: &str) -> Result<Self> {
        let contents =
            fs::read_to_string(path).with_context(|| format!("Failed to read config {}", path))?;
        serde_yaml::from_str(&contents).with_context(|| format!("Failed to parse {}", path))
    }

    /// `ORACLE_URL` replaces the configured HTTP oracle endpoint.
    pub fn apply_env_overrides(&mut self) {
        self.override_oracle_url(std::env::var("ORACLE_URL").ok());
    }

    fn override_oracle_url(&mut self, endpoint: Option<String>) -> bool {
        let (Some(endpoint), OracleConfig::Http { url, .. }) = (endpoint, &mut self.oracle) else {
            return false;
        };
        info!("Oracle URL overridden from environment: {}", endpoint);
        *url = endpoint;
        true
    }

    /// Resolve the grid against the real frame size, rejecting anything that
    /// cannot be tracked.
    pub fn validate(
        &self,
        frame_width: usize,
        frame_height: usize,
    ) -> std::result::Result<GridGeometry, ConfigError> {
        let grid = &self.grid;
        if grid.cell_width == 0 || grid.cell_height == 0 {
            return Err(ConfigError::InvalidGeometry(format!(
                "cell size {}x{} must be non-zero",
                grid.cell_width, grid.cell_height
            )));
        }
        if grid.channels == 0 {
            return Err(ConfigError::InvalidGeometry(
                "frames must have at least one channel".to_string(),
            ));
        }

        let columns = grid.columns.unwrap_or(frame_width / grid.cell_width);
        if columns < 2 {
            return Err(ConfigError::InvalidGeometry(format!(
                "need at least 2 columns per lane, got {}",
                columns
            )));
        }
        let window_width = columns.checked_mul(grid.cell_width);
        if window_width.map_or(true, |w| w > frame_width) {
            return Err(ConfigError::InvalidGeometry(format!(
                "{} columns of {}px exceed frame width {}",
                columns, grid.cell_width, frame_width
            )));
        }

        if self.lanes.is_empty() {
            return Err(ConfigError::NoLanes);
        }
        let mut lanes = Vec::with_capacity(self.lanes.len());
        for (index, lane) in self.lanes.iter().enumerate() {
            let bottom = lane.y_offset.checked_add(grid.cell_height);
            if bottom.map_or(true, |b| b > frame_height) {
                return Err(ConfigError::LaneOutOfBounds {
                    lane: lane.name.clone(),
                    reason: format!(
                        "rows from {} spanning {}px exceed frame height {}",
                        lane.y_offset, grid.cell_height, frame_height
                    ),
                });
            }
            if !(lane.perspective_multiplier.is_finite() && lane.perspective_multiplier > 0.0) {
                return Err(ConfigError::InvalidCalibration(format!(
                    "lane '{}' perspective multiplier {}",
                    lane.name, lane.perspective_multiplier
                )));
            }
            lanes.push(LaneGeometry {
                index,
                name: lane.name.clone(),
                y_offset: lane.y_offset,
                perspective_multiplier: lane.perspective_multiplier,
            });
        }

        let cooldown = self.tracking.cooldown_ms;
        if !(cooldown.is_finite() && cooldown > 0.0) {
            return Err(ConfigError::InvalidCooldown(cooldown));
        }

        let calibration = &self.calibration;
        if !(calibration.distance_per_pixel.is_finite() && calibration.distance_per_pixel > 0.0) {
            return Err(ConfigError::InvalidCalibration(format!(
                "distance_per_pixel {}",
                calibration.distance_per_pixel
            )));
        }
        if let Some(distance) = calibration.traversable_distance {
            if !(distance.is_finite() && distance > 0.0) {
                return Err(ConfigError::InvalidCalibration(format!(
                    "traversable_distance {}",
                    distance
                )));
            }
        }

        if self.scoring.max_concurrency == 0 {
            return Err(ConfigError::InvalidScoring(
                "max_concurrency must be at least 1".to_string(),
            ));
        }

        Ok(GridGeometry {
            frame_width,
            frame_height,
            cell_width: grid.cell_width,
            cell_height: grid.cell_height,
            columns,
            channels: grid.channels,
            lanes,
        })
    }
}
