// src/dataset.rs
//
// Training-set export for the anomaly oracle: the same per-cell feature
// vectors the tracker scores, one JSON object per line.

use crate::features::FeatureExtractor;
use crate::types::DatasetConfig;
use crate::video_processor::FrameSource;
use anyhow::{Context, Result};
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Debug, Serialize)]
pub struct FeatureRecord<'a> {
    pub frame_index: u64,
    pub timestamp_ms: f64,
    pub lane: usize,
    pub lane_name: &'a str,
    pub column: usize,
    pub features: Vec<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DatasetSummary {
    pub path: PathBuf,
    pub frames_read: u64,
    pub frames_written: u64,
    pub records: u64,
}

/// Writes `<output_dir>/features_<YYYYmmdd_HHMMSS>.jsonl`.
pub fn export_features(
    source: &mut dyn FrameSource,
    extractor: &FeatureExtractor,
    config: &DatasetConfig,
    output_dir: &Path,
) -> Result<DatasetSummary> {
    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create {}", output_dir.display()))?;

    let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    let path = output_dir.join(format!("features_{}.jsonl", stamp));
    let file = File::create(&path).with_context(|| format!("Failed to create {}", path.display()))?;

    let mut writer = BufWriter::new(file);
    let (frames_read, frames_written, records) =
        write_features(source, extractor, config, &mut writer)?;
    writer.flush().context("Failed to flush dataset")?;

    info!(
        "✓ Dataset: {} records from {}/{} frames → {}",
        records,
        frames_written,
        frames_read,
        path.display()
    );

    Ok(DatasetSummary {
        path,
        frames_read,
        frames_written,
        records,
    })
}

/// Samples every `sample_every`-th frame, at most `max_frames` of them.
/// Returns (frames read, frames written, records written).
pub fn write_features<W: Write>(
    source: &mut dyn FrameSource,
    extractor: &FeatureExtractor,
    config: &DatasetConfig,
    out: &mut W,
) -> Result<(u64, u64, u64)> {
    let every = config.sample_every.max(1) as u64;
    let geometry = extractor.geometry();

    let mut frames_read = 0u64;
    let mut frames_written = 0u64;
    let mut records = 0u64;

    while source.has_next() && (frames_written as usize) < config.max_frames {
        let Some(frame) = source.next_frame()? else {
            break;
        };
        let frame_index = frames_read;
        frames_read += 1;

        if frame_index % every != 0 {
            continue;
        }

        let lanes = extractor
            .extract_frame(&frame)
            .with_context(|| format!("Feature extraction failed on frame {}", frame_index))?;

        for (lane, vectors) in lanes.iter().enumerate() {
            for (column, features) in vectors.iter().enumerate() {
                let record = FeatureRecord {
                    frame_index,
                    timestamp_ms: frame.timestamp_ms,
                    lane,
                    lane_name: &geometry.lanes[lane].name,
                    column,
                    features: features.to_flat(),
                };
                serde_json::to_writer(&mut *out, &record)?;
                out.write_all(b"\n")?;
                records += 1;
            }
        }

        frames_written += 1;
        debug!("Dataset frame {} exported", frame_index);
    }

    Ok((frames_read, frames_written, records))
}
