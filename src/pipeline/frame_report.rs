// src/pipeline/frame_report.rs
//
// Read-only per-frame view handed to rendering sinks. Sinks never touch
// tracker state; everything they can show is copied in here.

use crate::speed::NO_SPEED;
use crate::types::{Frame, VehicleId};
use anyhow::Result;
use tracing::info;

#[derive(Debug, Clone)]
pub struct LaneReport {
    pub lane: usize,
    pub name: String,
    pub occupancy: Vec<bool>,
    pub track: Vec<Option<VehicleId>>,
    /// Completed trips so far in this lane.
    pub trip_count: usize,
    pub in_flight: usize,
    /// Speed of the latest completed trip, if it had one.
    pub last_speed: Option<f64>,
}

impl LaneReport {
    pub fn occupied_cells(&self) -> usize {
        self.occupancy.iter().filter(|&&o| o).count()
    }
}

#[derive(Debug, Clone)]
pub struct FrameReport {
    pub frame_id: u64,
    pub timestamp_ms: f64,
    pub lanes: Vec<LaneReport>,
    /// Distance unit label for speeds ("mph", "km/h").
    pub unit: String,
}

impl FrameReport {
    pub fn speed_label(&self, lane: usize) -> String {
        match self.lanes.get(lane).and_then(|l| l.last_speed) {
            Some(speed) => format!("{:.1} {}", speed, self.unit),
            None => NO_SPEED.to_string(),
        }
    }
}

// ============================================================================
// SINKS
// ============================================================================

pub trait RenderSink {
    fn render(&mut self, frame: &Frame, report: &FrameReport) -> Result<()>;

    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Logs a status line every `every` frames.
pub struct LogSink {
    every: u64,
}

impl LogSink {
    pub fn new(every: u64) -> Self {
        Self { every: every.max(1) }
    }
}

impl RenderSink for LogSink {
    fn render(&mut self, _frame: &Frame, report: &FrameReport) -> Result<()> {
        if report.frame_id % self.every != 0 {
            return Ok(());
        }
        for lane in &report.lanes {
            info!(
                "[{:>6} @ {:>8.0}ms] {:<10} occupied {:>2}/{:<2} tracked {:>2} in flight {} trips {} last {}",
                report.frame_id,
                report.timestamp_ms,
                lane.name,
                lane.occupied_cells(),
                lane.occupancy.len(),
                lane.track.iter().flatten().count(),
                lane.in_flight,
                lane.trip_count,
                report.speed_label(lane.lane)
            );
        }
        Ok(())
    }
}
