// src/oracle/pool.rs
//
// Bounded fan-out of per-cell oracle calls. At most `max_concurrency`
// requests are in flight; transient failures are retried with exponential
// backoff. Results come back in input order.

use super::AnomalyOracle;
use crate::error::OracleError;
use crate::features::FeatureVector;
use crate::types::{CellAddress, ScoringConfig};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

#[derive(Debug)]
pub struct CellScore {
    pub cell: CellAddress,
    pub outcome: Result<f32, OracleError>,
    /// Calls made, including the successful one.
    pub attempts: u32,
}

impl CellScore {
    pub fn retries(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }
}

#[derive(Clone)]
pub struct ScoringPool {
    oracle: Arc<dyn AnomalyOracle>,
    semaphore: Arc<Semaphore>,
    max_retries: u32,
    backoff: Duration,
}

impl ScoringPool {
    pub fn new(oracle: Arc<dyn AnomalyOracle>, config: &ScoringConfig) -> Self {
        Self {
            oracle,
            semaphore: Arc::new(Semaphore::new(config.max_concurrency.max(1))),
            max_retries: config.max_retries,
            backoff: Duration::from_millis(config.retry_backoff_ms),
        }
    }

    pub fn oracle_name(&self) -> &str {
        self.oracle.name()
    }

    pub async fn score_cells(&self, cells: Vec<(CellAddress, FeatureVector)>) -> Vec<CellScore> {
        let addresses: Vec<CellAddress> = cells.iter().map(|(cell, _)| *cell).collect();
        let mut slots: Vec<Option<CellScore>> = (0..cells.len()).map(|_| None).collect();
        let mut tasks = JoinSet::new();

        for (index, (cell, features)) in cells.into_iter().enumerate() {
            let pool = self.clone();
            tasks.spawn(async move {
                let (outcome, attempts) = pool.score_with_retry(cell, &features).await;
                (index, CellScore { cell, outcome, attempts })
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, score)) => slots[index] = Some(score),
                Err(e) => warn!("Scoring task failed: {}", e),
            }
        }

        slots
            .into_iter()
            .zip(addresses)
            .map(|(slot, cell)| {
                slot.unwrap_or_else(|| CellScore {
                    cell,
                    outcome: Err(OracleError::Model("scoring task aborted".to_string())),
                    attempts: 0,
                })
            })
            .collect()
    }

    async fn score_with_retry(
        &self,
        cell: CellAddress,
        features: &FeatureVector,
    ) -> (Result<f32, OracleError>, u32) {
        let mut attempts = 0;
        loop {
            attempts += 1;
            let outcome = {
                let _permit = match self.semaphore.acquire().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        return (
                            Err(OracleError::Model("scoring pool closed".to_string())),
                            attempts,
                        )
                    }
                };
                self.oracle.score(cell, features).await
            };

            match outcome {
                Err(e) if e.is_transient() && attempts <= self.max_retries => {
                    let delay = self
                        .backoff
                        .saturating_mul(2u32.saturating_pow(attempts - 1));
                    debug!("Retrying {} in {:?} after: {}", cell, delay, e);
                    tokio::time::sleep(delay).await;
                }
                other => return (other, attempts),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn config(max_concurrency: usize, max_retries: u32) -> ScoringConfig {
        ScoringConfig {
            max_concurrency,
            max_retries,
            retry_backoff_ms: 1,
        }
    }

    fn cells(n: usize) -> Vec<(CellAddress, FeatureVector)> {
        (0..n)
            .map(|column| (CellAddress { lane: 0, column }, FeatureVector::new(Vec::new())))
            .collect()
    }

    /// Fails with the given error until `failures` calls per cell have been made.
    struct FlakyOracle {
        failures: u32,
        error: OracleError,
        calls: Mutex<HashMap<CellAddress, u32>>,
    }

    #[async_trait]
    impl AnomalyOracle for FlakyOracle {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn score(&self, cell: CellAddress, _: &FeatureVector) -> Result<f32, OracleError> {
            let mut calls = self.calls.lock().unwrap();
            let count = calls.entry(cell).or_insert(0);
            *count += 1;
            if *count <= self.failures {
                Err(self.error.clone())
            } else {
                Ok(cell.column as f32 / 10.0)
            }
        }
    }

    struct CountingOracle {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl AnomalyOracle for CountingOracle {
        fn name(&self) -> &str {
            "counting"
        }

        async fn score(&self, cell: CellAddress, _: &FeatureVector) -> Result<f32, OracleError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(cell.column as f32)
        }
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let oracle = Arc::new(FlakyOracle {
            failures: 2,
            error: OracleError::Transport("connection reset".into()),
            calls: Mutex::new(HashMap::new()),
        });
        let pool = ScoringPool::new(oracle, &config(4, 3));

        let results = pool.score_cells(cells(3)).await;
        for result in &results {
            assert_eq!(result.attempts, 3);
            assert_eq!(result.retries(), 2);
            assert!(result.outcome.is_ok());
        }
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let oracle = Arc::new(FlakyOracle {
            failures: 10,
            error: OracleError::Status {
                status: 503,
                body: String::new(),
            },
            calls: Mutex::new(HashMap::new()),
        });
        let pool = ScoringPool::new(oracle, &config(4, 2));

        let results = pool.score_cells(cells(1)).await;
        assert_eq!(results[0].attempts, 3);
        assert!(results[0].outcome.is_err());
    }

    #[tokio::test]
    async fn test_permanent_errors_are_not_retried() {
        let oracle = Arc::new(FlakyOracle {
            failures: 1,
            error: OracleError::Status {
                status: 400,
                body: "bad request".into(),
            },
            calls: Mutex::new(HashMap::new()),
        });
        let pool = ScoringPool::new(oracle, &config(4, 3));

        let results = pool.score_cells(cells(2)).await;
        for result in &results {
            assert_eq!(result.attempts, 1);
            assert!(matches!(
                result.outcome,
                Err(OracleError::Status { status: 400, .. })
            ));
        }
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded_and_order_kept() {
        let oracle = Arc::new(CountingOracle {
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let pool = ScoringPool::new(oracle.clone(), &config(3, 0));

        let results = pool.score_cells(cells(12)).await;
        assert!(oracle.peak.load(Ordering::SeqCst) <= 3);
        for (column, result) in results.iter().enumerate() {
            assert_eq!(result.cell.column, column);
            assert_eq!(result.outcome, Ok(column as f32));
        }
    }
}
