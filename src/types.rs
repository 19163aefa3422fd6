// src/types.rs

use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// CONFIGURATION
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub grid: GridConfig,
    pub lanes: Vec<LaneConfig>,
    pub tracking: TrackingConfig,
    pub occupancy: OccupancyConfig,
    pub calibration: CalibrationConfig,
    pub oracle: OracleConfig,
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub video: VideoConfig,
    #[serde(default)]
    pub dataset: DatasetConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridConfig {
    pub cell_width: usize,
    pub cell_height: usize,
    /// Columns per lane row. Derived from frame width / cell width when absent.
    #[serde(default)]
    pub columns: Option<usize>,
    /// Interleaved channels per pixel (3 for RGB).
    #[serde(default = "default_channels")]
    pub channels: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaneConfig {
    pub name: String,
    /// Top edge of the lane's cell row, in pixels.
    pub y_offset: usize,
    /// Speed multiplier for lanes farther from / closer to the camera.
    #[serde(default = "default_perspective")]
    pub perspective_multiplier: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingConfig {
    pub cooldown_ms: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OccupancyConfig {
    pub threshold: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationConfig {
    /// Real-world distance covered by one pixel along the lane axis.
    pub distance_per_pixel: f64,
    /// Overrides the distance derived from the tracked window width.
    #[serde(default)]
    pub traversable_distance: Option<f64>,
    #[serde(default = "default_unit")]
    pub unit: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OracleConfig {
    Background {
        #[serde(default = "default_alpha")]
        alpha: f64,
        #[serde(default = "default_scale")]
        scale: f64,
        #[serde(default = "default_warmup")]
        warmup_frames: u32,
    },
    Http {
        url: String,
        #[serde(default = "default_timeout")]
        timeout_secs: u64,
    },
    Onnx {
        model_path: String,
        #[serde(default = "default_threads")]
        num_threads: usize,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringConfig {
    pub max_concurrency: usize,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 16,
            max_retries: 3,
            retry_backoff_ms: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoConfig {
    /// Frame rate assumed for still-image sequences.
    pub fps: f64,
    pub output_dir: String,
    pub save_annotated: bool,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            fps: 25.0,
            output_dir: "output".to_string(),
            save_annotated: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetConfig {
    pub sample_every: usize,
    pub max_frames: usize,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            sample_every: 5,
            max_frames: 2000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

fn default_channels() -> usize {
    3
}

fn default_perspective() -> f64 {
    1.0
}

fn default_unit() -> String {
    "mph".to_string()
}

fn default_alpha() -> f64 {
    0.02
}

fn default_scale() -> f64 {
    12.0
}

fn default_warmup() -> u32 {
    30
}

fn default_timeout() -> u64 {
    5
}

fn default_threads() -> usize {
    1
}

// ============================================================================
// RESOLVED GEOMETRY
// ============================================================================

/// Grid geometry after validation against the actual frame size.
#[derive(Debug, Clone, PartialEq)]
pub struct GridGeometry {
    pub frame_width: usize,
    pub frame_height: usize,
    pub cell_width: usize,
    pub cell_height: usize,
    pub columns: usize,
    pub channels: usize,
    pub lanes: Vec<LaneGeometry>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LaneGeometry {
    pub index: usize,
    pub name: String,
    pub y_offset: usize,
    pub perspective_multiplier: f64,
}

impl GridGeometry {
    /// Width of the tracked window in pixels.
    pub fn window_width_px(&self) -> usize {
        self.columns * self.cell_width
    }
}

// ============================================================================
// FRAMES AND TRACKING RECORDS
// ============================================================================

#[derive(Debug, Clone)]
pub struct Frame {
    /// Row-major interleaved pixels (HWC).
    pub data: Vec<u8>,
    pub width: usize,
    pub height: usize,
    pub channels: usize,
    pub timestamp_ms: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CellAddress {
    pub lane: usize,
    pub column: usize,
}

impl fmt::Display for CellAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}C{}", self.lane, self.column)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VehicleId(pub u64);

impl fmt::Display for VehicleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// A completed vehicle crossing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Trip {
    pub vehicle: VehicleId,
    pub lane: usize,
    pub start_ms: f64,
    pub end_ms: f64,
}

impl Trip {
    pub fn elapsed_ms(&self) -> f64 {
        self.end_ms - self.start_ms
    }
}
