// src/oracle/mod.rs
//
// Anomaly oracle seam. The tracker never sees the oracle directly: frames
// are scored through `ScoringPool`, which bounds concurrency and retries
// transient failures, and the scores are thresholded into occupancy.

pub mod background;
pub mod http;
#[cfg(feature = "onnx")]
pub mod onnx;
pub mod pool;

pub use background::BackgroundOracle;
pub use http::HttpOracle;
pub use pool::ScoringPool;

use crate::error::OracleError;
use crate::features::FeatureVector;
use crate::types::{CellAddress, OracleConfig};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

/// Scores one cell's feature vector. Implementations may keep per-cell
/// history (temporal context), call out over the network, or run a local
/// model.
#[async_trait]
pub trait AnomalyOracle: Send + Sync {
    fn name(&self) -> &str;

    async fn score(&self, cell: CellAddress, features: &FeatureVector) -> Result<f32, OracleError>;
}

pub fn build_oracle(config: &OracleConfig) -> Result<Arc<dyn AnomalyOracle>> {
    let oracle: Arc<dyn AnomalyOracle> = match config {
        OracleConfig::Background {
            alpha,
            scale,
            warmup_frames,
        } => Arc::new(BackgroundOracle::new(*alpha, *scale, *warmup_frames)),
        OracleConfig::Http { url, timeout_secs } => Arc::new(HttpOracle::new(url, *timeout_secs)?),
        #[cfg(feature = "onnx")]
        OracleConfig::Onnx {
            model_path,
            num_threads,
        } => Arc::new(onnx::OnnxOracle::new(model_path, *num_threads)?),
        #[cfg(not(feature = "onnx"))]
        OracleConfig::Onnx { model_path, .. } => {
            anyhow::bail!(
                "oracle model {} requires building with the `onnx` feature",
                model_path
            )
        }
    };
    info!("✓ Anomaly oracle ready: {}", oracle.name());
    Ok(oracle)
}
