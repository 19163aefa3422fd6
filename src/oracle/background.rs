// src/oracle/background.rs
//
// In-process oracle: a per-cell background model. Each cell keeps an
// exponential moving average of its feature vector; the score is the RMS
// deviation from that background squashed into [0, 1). The background only
// learns while the cell looks empty, so a stopped vehicle is not absorbed
// into the road surface.

use super::AnomalyOracle;
use crate::error::OracleError;
use crate::features::FeatureVector;
use crate::types::CellAddress;
use async_trait::async_trait;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Mutex;

/// Scores at or below this keep updating the background.
const LEARN_BELOW: f32 = 0.5;

struct CellModel {
    mean: Vec<f64>,
    observations: u32,
}

pub struct BackgroundOracle {
    alpha: f64,
    scale: f64,
    warmup_frames: u32,
    models: Mutex<HashMap<CellAddress, CellModel>>,
}

impl BackgroundOracle {
    pub fn new(alpha: f64, scale: f64, warmup_frames: u32) -> Self {
        Self {
            alpha: alpha.clamp(0.0, 1.0),
            scale: scale.max(f64::EPSILON),
            warmup_frames,
            models: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl AnomalyOracle for BackgroundOracle {
    fn name(&self) -> &str {
        "background-model"
    }

    async fn score(&self, cell: CellAddress, features: &FeatureVector) -> Result<f32, OracleError> {
        let sample = features.to_flat();
        let mut models = self
            .models
            .lock()
            .map_err(|_| OracleError::Model("background model lock poisoned".to_string()))?;

        let model = match models.entry(cell) {
            Entry::Occupied(slot) => slot.into_mut(),
            Entry::Vacant(slot) => {
                slot.insert(CellModel {
                    mean: sample,
                    observations: 1,
                });
                return Ok(0.0);
            }
        };

        if model.mean.len() != sample.len() {
            return Err(OracleError::Model(format!(
                "cell {} expected {} features, got {}",
                cell,
                model.mean.len(),
                sample.len()
            )));
        }

        let squared: f64 = model
            .mean
            .iter()
            .zip(&sample)
            .map(|(m, x)| (x - m) * (x - m))
            .sum();
        let rms = (squared / sample.len().max(1) as f64).sqrt();
        let score = (rms / (rms + self.scale)) as f32;

        let warming_up = model.observations < self.warmup_frames;
        if warming_up || score <= LEARN_BELOW {
            for (m, x) in model.mean.iter_mut().zip(&sample) {
                *m += self.alpha * (x - *m);
            }
            model.observations = model.observations.saturating_add(1);
        }

        Ok(if warming_up { 0.0 } else { score })
    }
}
