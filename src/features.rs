// src/features.rs
//
// Fixed-grid feature extraction. Every cell of every lane row is reduced to
// (mean, stddev) per image channel plus one derived luminance channel.
// Pure function of the frame, so cells are computed in parallel.

use crate::error::ConfigError;
use crate::types::{CellAddress, Frame, GridGeometry};
use rayon::prelude::*;
use serde::Serialize;

/// ITU-R BT.601 luma weights for RGB frames.
const LUMA_WEIGHTS: [f64; 3] = [0.299, 0.587, 0.114];

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ChannelStats {
    pub mean: f64,
    /// Population standard deviation.
    pub std_dev: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureVector {
    pairs: Vec<ChannelStats>,
}

impl FeatureVector {
    pub fn new(pairs: Vec<ChannelStats>) -> Self {
        Self { pairs }
    }

    pub fn pairs(&self) -> &[ChannelStats] {
        &self.pairs
    }

    /// `[mean_0, std_0, mean_1, std_1, ...]`, luminance last.
    pub fn to_flat(&self) -> Vec<f64> {
        self.pairs
            .iter()
            .flat_map(|p| [p.mean, p.std_dev])
            .collect()
    }
}

pub struct FeatureExtractor {
    geometry: GridGeometry,
}

impl FeatureExtractor {
    pub fn new(geometry: GridGeometry) -> Self {
        Self { geometry }
    }

    pub fn geometry(&self) -> &GridGeometry {
        &self.geometry
    }

    /// Per-cell vectors for every lane, outer index = lane, inner = column.
    pub fn extract_frame(&self, frame: &Frame) -> Result<Vec<Vec<FeatureVector>>, ConfigError> {
        self.check_frame(frame)?;
        (0..self.geometry.lanes.len())
            .into_par_iter()
            .map(|lane| self.extract_lane(frame, lane))
            .collect()
    }

    fn extract_lane(
        &self,
        frame: &Frame,
        lane: usize,
    ) -> Result<Vec<FeatureVector>, ConfigError> {
        (0..self.geometry.columns)
            .into_par_iter()
            .map(|column| self.extract_cell(frame, CellAddress { lane, column }))
            .collect()
    }

    fn extract_cell(
        &self,
        frame: &Frame,
        cell: CellAddress,
    ) -> Result<FeatureVector, ConfigError> {
        let g = &self.geometry;
        let lane = g.lanes.get(cell.lane).ok_or_else(|| {
            ConfigError::InvalidGeometry(format!("lane {} is not configured", cell.lane))
        })?;
        if cell.column >= g.columns {
            return Err(ConfigError::InvalidGeometry(format!(
                "column {} outside {} columns",
                cell.column, g.columns
            )));
        }

        let x0 = cell.column * g.cell_width;
        let y0 = lane.y_offset;
        let channels = g.channels;
        let slots = channels + 1;

        let mut sum = vec![0.0f64; slots];
        let mut sum_sq = vec![0.0f64; slots];

        for y in y0..y0 + g.cell_height {
            let row = y * frame.width;
            for x in x0..x0 + g.cell_width {
                let idx = (row + x) * channels;
                let pixel = &frame.data[idx..idx + channels];

                for (c, &value) in pixel.iter().enumerate() {
                    let v = value as f64;
                    sum[c] += v;
                    sum_sq[c] += v * v;
                }

                let luma = luminance(pixel);
                sum[channels] += luma;
                sum_sq[channels] += luma * luma;
            }
        }

        let count = (g.cell_width * g.cell_height) as f64;
        let pairs = sum
            .iter()
            .zip(&sum_sq)
            .map(|(&s, &sq)| {
                let mean = s / count;
                let variance = (sq / count - mean * mean).max(0.0);
                ChannelStats {
                    mean,
                    std_dev: variance.sqrt(),
                }
            })
            .collect();

        Ok(FeatureVector::new(pairs))
    }

    fn check_frame(&self, frame: &Frame) -> Result<(), ConfigError> {
        let g = &self.geometry;
        if frame.width != g.frame_width
            || frame.height != g.frame_height
            || frame.channels != g.channels
        {
            return Err(ConfigError::InvalidGeometry(format!(
                "frame {}x{}x{} does not match configured {}x{}x{}",
                frame.width, frame.height, frame.channels, g.frame_width, g.frame_height, g.channels
            )));
        }
        let window_width = g.columns.checked_mul(g.cell_width);
        if window_width.map_or(true, |w| w > frame.width) {
            return Err(ConfigError::InvalidGeometry(format!(
                "{} columns of {}px exceed frame width {}",
                g.columns, g.cell_width, frame.width
            )));
        }
        for lane in &g.lanes {
            let bottom = lane.y_offset.checked_add(g.cell_height);
            if bottom.map_or(true, |b| b > frame.height) {
                return Err(ConfigError::LaneOutOfBounds {
                    lane: lane.name.clone(),
                    reason: format!(
                        "rows from {} spanning {}px exceed frame height {}",
                        lane.y_offset, g.cell_height, frame.height
                    ),
                });
            }
        }
        if frame.data.len() != frame.width * frame.height * frame.channels {
            return Err(ConfigError::InvalidGeometry(format!(
                "frame buffer holds {} bytes, expected {}",
                frame.data.len(),
                frame.width * frame.height * frame.channels
            )));
        }
        Ok(())
    }
}

/// Derived single-channel intensity of one pixel.
fn luminance(pixel: &[u8]) -> f64 {
    if pixel.len() == LUMA_WEIGHTS.len() {
        pixel
            .iter()
            .zip(LUMA_WEIGHTS)
            .map(|(&v, w)| v as f64 * w)
            .sum()
    } else {
        pixel.iter().map(|&v| v as f64).sum::<f64>() / pixel.len() as f64
    }
}
