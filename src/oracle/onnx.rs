// src/oracle/onnx.rs
//
// Local model oracle. The model takes a [1, N] f32 tensor of flattened
// (mean, std_dev) pairs and its first output element is the score.

use super::AnomalyOracle;
use crate::error::OracleError;
use crate::features::FeatureVector;
use crate::types::CellAddress;
use anyhow::{Context, Result};
use async_trait::async_trait;
use ort::session::{builder::GraphOptimizationLevel, Session};
use std::sync::Mutex;
use tracing::{debug, info};

pub struct OnnxOracle {
    session: Mutex<Session>,
    input_name: String,
    model_path: String,
}

impl OnnxOracle {
    pub fn new(model_path: &str, num_threads: usize) -> Result<Self> {
        info!("Loading anomaly model: {}", model_path);

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(num_threads)?
            .with_inter_threads(1)?
            .commit_from_file(model_path)
            .with_context(|| format!("Failed to load model {}", model_path))?;

        let input_name = session
            .inputs
            .first()
            .map(|input| input.name.clone())
            .context("Model declares no inputs")?;

        Ok(Self {
            session: Mutex::new(session),
            input_name,
            model_path: model_path.to_string(),
        })
    }
}

#[async_trait]
impl AnomalyOracle for OnnxOracle {
    fn name(&self) -> &str {
        &self.model_path
    }

    async fn score(&self, cell: CellAddress, features: &FeatureVector) -> Result<f32, OracleError> {
        let input: Vec<f32> = features.to_flat().into_iter().map(|v| v as f32).collect();
        let shape = [1usize, input.len()];

        let input_value = ort::value::Value::from_array((shape.as_slice(), input.into_boxed_slice()))
            .map_err(|e| OracleError::Model(e.to_string()))?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| OracleError::Model("session lock poisoned".to_string()))?;

        let outputs = session
            .run(ort::inputs![self.input_name.as_str() => input_value])
            .map_err(|e| OracleError::Model(e.to_string()))?;

        let (_, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| OracleError::Model(e.to_string()))?;

        let score = data
            .first()
            .copied()
            .ok_or_else(|| OracleError::InvalidResponse("empty model output".to_string()))?;

        debug!("Model {} → {:.3}", cell, score);
        Ok(score)
    }
}
