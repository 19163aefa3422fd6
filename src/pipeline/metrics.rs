// src/pipeline/metrics.rs
//
// Run counters and per-stage timings. Timings hold the last frame's value.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct PipelineMetrics {
    pub total_frames: Arc<AtomicU64>,
    pub cells_scored: Arc<AtomicU64>,
    pub vehicles_entered: Arc<AtomicU64>,
    pub trips_completed: Arc<AtomicU64>,
    pub oracle_failures: Arc<AtomicU64>,
    pub oracle_retries: Arc<AtomicU64>,
    pub extraction_time_us: Arc<AtomicU64>,
    pub scoring_time_us: Arc<AtomicU64>,
    pub tracking_time_us: Arc<AtomicU64>,
    pub started_at: Instant,
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self {
            total_frames: Arc::new(AtomicU64::new(0)),
            cells_scored: Arc::new(AtomicU64::new(0)),
            vehicles_entered: Arc::new(AtomicU64::new(0)),
            trips_completed: Arc::new(AtomicU64::new(0)),
            oracle_failures: Arc::new(AtomicU64::new(0)),
            oracle_retries: Arc::new(AtomicU64::new(0)),
            extraction_time_us: Arc::new(AtomicU64::new(0)),
            scoring_time_us: Arc::new(AtomicU64::new(0)),
            tracking_time_us: Arc::new(AtomicU64::new(0)),
            started_at: Instant::now(),
        }
    }

    pub fn inc(&self, counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, counter: &AtomicU64, amount: u64) {
        counter.fetch_add(amount, Ordering::Relaxed);
    }

    pub fn set_timing(&self, counter: &AtomicU64, duration_us: u64) {
        counter.store(duration_us, Ordering::Relaxed);
    }

    pub fn fps(&self) -> f64 {
        let frames = self.total_frames.load(Ordering::Relaxed);
        let elapsed = self.started_at.elapsed().as_secs_f64();
        if elapsed > 0.01 {
            frames as f64 / elapsed
        } else {
            0.0
        }
    }

    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            total_frames: self.total_frames.load(Ordering::Relaxed),
            fps: self.fps(),
            cells_scored: self.cells_scored.load(Ordering::Relaxed),
            vehicles_entered: self.vehicles_entered.load(Ordering::Relaxed),
            trips_completed: self.trips_completed.load(Ordering::Relaxed),
            oracle_failures: self.oracle_failures.load(Ordering::Relaxed),
            oracle_retries: self.oracle_retries.load(Ordering::Relaxed),
            last_extraction_us: self.extraction_time_us.load(Ordering::Relaxed),
            last_scoring_us: self.scoring_time_us.load(Ordering::Relaxed),
            last_tracking_us: self.tracking_time_us.load(Ordering::Relaxed),
            elapsed_secs: self.started_at.elapsed().as_secs_f64(),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct MetricsSummary {
    pub total_frames: u64,
    pub fps: f64,
    pub cells_scored: u64,
    pub vehicles_entered: u64,
    pub trips_completed: u64,
    pub oracle_failures: u64,
    pub oracle_retries: u64,
    pub last_extraction_us: u64,
    pub last_scoring_us: u64,
    pub last_tracking_us: u64,
    pub elapsed_secs: f64,
}
