// src/oracle/http.rs
//
// Remote oracle over HTTP. One POST per cell:
//
//   POST {url}/score
//   { "request_id": "...", "lane": 0, "column": 7, "features": [m0, s0, ...] }
//   → { "score": 0.73 }
//
// Errors are classified so the scoring pool can retry what is transient.

use super::AnomalyOracle;
use crate::error::OracleError;
use crate::features::FeatureVector;
use crate::types::CellAddress;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Serialize)]
pub struct ScoreRequest<'a> {
    /// Unique per attempt, for server-side correlation
    pub request_id: String,
    pub lane: usize,
    pub column: usize,
    pub features: &'a [f64],
}

#[derive(Debug, Deserialize)]
pub struct ScoreResponse {
    pub score: f32,
}

pub struct HttpOracle {
    http_client: reqwest::Client,
    server_url: String,
}

impl HttpOracle {
    pub fn new(server_url: &str, timeout_secs: u64) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            http_client,
            server_url: server_url.to_string(),
        })
    }

    pub fn endpoint(&self) -> String {
        format!("{}/score", self.server_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl AnomalyOracle for HttpOracle {
    fn name(&self) -> &str {
        &self.server_url
    }

    async fn score(&self, cell: CellAddress, features: &FeatureVector) -> Result<f32, OracleError> {
        let flat = features.to_flat();
        let request = ScoreRequest {
            request_id: uuid::Uuid::new_v4().to_string(),
            lane: cell.lane,
            column: cell.column,
            features: &flat,
        };

        let response = self
            .http_client
            .post(self.endpoint())
            .json(&request)
            .send()
            .await
            .map_err(|e| OracleError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<no body>".to_string());
            return Err(OracleError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed = response
            .json::<ScoreResponse>()
            .await
            .map_err(|e| OracleError::InvalidResponse(e.to_string()))?;

        if !parsed.score.is_finite() {
            return Err(OracleError::InvalidResponse(format!(
                "non-finite score {} for {}",
                parsed.score, cell
            )));
        }

        debug!("Oracle {} → {:.3} ({})", cell, parsed.score, request.request_id);
        Ok(parsed.score)
    }
}
