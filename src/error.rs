// src/error.rs
//
// Error taxonomy for the tracking core. Plumbing (main, frame sources,
// dataset export) stays on anyhow and wraps these with context.

use thiserror::Error;

/// Startup-time configuration problems. Never recovered.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("invalid grid geometry: {0}")]
    InvalidGeometry(String),

    #[error("lane '{lane}' does not fit the frame: {reason}")]
    LaneOutOfBounds { lane: String, reason: String },

    #[error("at least one lane must be configured")]
    NoLanes,

    #[error("smoothing cooldown must be positive, got {0}")]
    InvalidCooldown(f64),

    #[error("invalid calibration: {0}")]
    InvalidCalibration(String),

    #[error("invalid scoring settings: {0}")]
    InvalidScoring(String),
}

/// Programming errors detected while advancing a lane tracker.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TrackingError {
    #[error("occupancy vector has {actual} entries, lane has {expected} columns")]
    OccupancyLength { expected: usize, actual: usize },

    #[error("a lane needs at least 2 columns to detect exits, got {0}")]
    TooFewColumns(usize),
}

/// Failures of the external anomaly oracle.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum OracleError {
    #[error("oracle transport error: {0}")]
    Transport(String),

    #[error("oracle returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("oracle response could not be used: {0}")]
    InvalidResponse(String),

    #[error("oracle model failure: {0}")]
    Model(String),
}

impl OracleError {
    /// Whether retrying the same request can reasonably succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            OracleError::Transport(_) => true,
            OracleError::Status { status, .. } => *status == 429 || *status >= 500,
            OracleError::InvalidResponse(_) | OracleError::Model(_) => false,
        }
    }
}
