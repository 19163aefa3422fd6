// src/occupancy.rs

use crate::types::OccupancyConfig;

/// Turns oracle scores into per-cell "occupied" flags.
#[derive(Debug, Clone, Copy)]
pub struct OccupancyClassifier {
    threshold: f32,
}

impl OccupancyClassifier {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    pub fn from_config(config: &OccupancyConfig) -> Self {
        Self::new(config.threshold)
    }

    pub fn is_occupied(&self, score: f32) -> bool {
        score > self.threshold
    }

    /// A missing score (oracle failure for that cell) reads as empty.
    pub fn classify(&self, scores: &[Option<f32>]) -> Vec<bool> {
        scores
            .iter()
            .map(|s| s.map_or(false, |score| self.is_occupied(score)))
            .collect()
    }
}
