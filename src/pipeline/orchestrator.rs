// src/pipeline/orchestrator.rs
//
// Drives one frame through the whole chain:
//
//   extract features → score cells (bounded pool) → threshold occupancy
//   → advance every lane tracker → speed for new trips → FrameReport
//
// Single entry point: call process_frame() each frame, in timestamp order.
// Oracle failures never reach the trackers; a failed cell reads as empty
// for that frame only.

use super::event_bus::{EventBus, PipelineEvent};
use super::frame_report::{FrameReport, LaneReport};
use super::metrics::{MetricsSummary, PipelineMetrics};
use crate::features::{FeatureExtractor, FeatureVector};
use crate::occupancy::OccupancyClassifier;
use crate::oracle::{AnomalyOracle, ScoringPool};
use crate::speed::SpeedEstimator;
use crate::tracking::{LaneTracker, VehicleIdAllocator};
use crate::types::{CellAddress, Config, Frame, GridGeometry, Trip};
use anyhow::{Context, Result};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

const MAX_PENDING_EVENTS: usize = 4096;

pub struct PipelineOrchestrator {
    geometry: GridGeometry,
    extractor: FeatureExtractor,
    pool: ScoringPool,
    classifier: OccupancyClassifier,
    speed: SpeedEstimator,
    trackers: Vec<LaneTracker>,
    last_speeds: Vec<Option<f64>>,
    events: EventBus,
    metrics: PipelineMetrics,
    frame_id: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LaneSummary {
    pub name: String,
    pub trips: usize,
    pub in_flight: usize,
    pub last_speed: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub oracle: String,
    pub lanes: Vec<LaneSummary>,
    pub trips_completed: usize,
    /// Vehicles still inside the window when the stream ended.
    pub in_flight_at_end: usize,
    pub metrics: MetricsSummary,
}

impl PipelineOrchestrator {
    pub fn new(
        config: &Config,
        geometry: GridGeometry,
        oracle: Arc<dyn AnomalyOracle>,
        stream_start_ms: f64,
    ) -> Self {
        let ids = VehicleIdAllocator::new();
        let trackers = geometry
            .lanes
            .iter()
            .map(|lane| {
                LaneTracker::new(
                    lane.index,
                    geometry.columns,
                    config.tracking.cooldown_ms,
                    stream_start_ms,
                    ids.clone(),
                )
            })
            .collect::<Vec<_>>();

        let speed = SpeedEstimator::from_config(&config.calibration, &geometry);
        info!(
            "Pipeline: {} lane(s) × {} columns, window {:.5} {}-distance",
            trackers.len(),
            geometry.columns,
            speed.distance(),
            speed.unit()
        );

        Self {
            extractor: FeatureExtractor::new(geometry.clone()),
            pool: ScoringPool::new(oracle, &config.scoring),
            classifier: OccupancyClassifier::from_config(&config.occupancy),
            speed,
            last_speeds: vec![None; trackers.len()],
            trackers,
            geometry,
            events: EventBus::new(MAX_PENDING_EVENTS),
            metrics: PipelineMetrics::new(),
            frame_id: 0,
        }
    }

    pub async fn process_frame(&mut self, frame: &Frame) -> Result<FrameReport> {
        let frame_id = self.frame_id;
        self.frame_id += 1;
        self.metrics.inc(&self.metrics.total_frames);

        // 1. Features
        let t0 = Instant::now();
        let lanes = self
            .extractor
            .extract_frame(frame)
            .with_context(|| format!("Feature extraction failed on frame {}", frame_id))?;
        self.metrics
            .set_timing(&self.metrics.extraction_time_us, t0.elapsed().as_micros() as u64);

        let cells: Vec<(CellAddress, FeatureVector)> = lanes
            .into_iter()
            .enumerate()
            .flat_map(|(lane, vectors)| {
                vectors
                    .into_iter()
                    .enumerate()
                    .map(move |(column, features)| (CellAddress { lane, column }, features))
            })
            .collect();

        // 2. Scores
        let t1 = Instant::now();
        let scored = self.pool.score_cells(cells).await;
        self.metrics
            .set_timing(&self.metrics.scoring_time_us, t1.elapsed().as_micros() as u64);
        self.metrics
            .add(&self.metrics.cells_scored, scored.len() as u64);

        let mut lane_scores = vec![vec![None; self.geometry.columns]; self.trackers.len()];
        for result in scored {
            self.metrics
                .add(&self.metrics.oracle_retries, result.retries() as u64);
            match result.outcome {
                Ok(score) => lane_scores[result.cell.lane][result.cell.column] = Some(score),
                Err(e) => {
                    warn!("⚠️  Oracle failed for {} on frame {}: {}", result.cell, frame_id, e);
                    self.metrics.inc(&self.metrics.oracle_failures);
                    self.events.publish(PipelineEvent::OracleFailure {
                        frame_id,
                        cell: result.cell,
                        error: e.to_string(),
                    });
                }
            }
        }

        // 3. Occupancy → trackers → speeds
        let t2 = Instant::now();
        let mut reports = Vec::with_capacity(self.trackers.len());
        for (tracker, scores) in self.trackers.iter_mut().zip(&lane_scores) {
            let lane = tracker.lane();
            let occupancy = self.classifier.classify(scores);
            let outcome = tracker
                .update(&occupancy, frame.timestamp_ms)
                .with_context(|| format!("Lane {} tracker rejected frame {}", lane, frame_id))?;

            if let Some(vehicle) = outcome.entered {
                self.metrics.inc(&self.metrics.vehicles_entered);
                self.events.publish(PipelineEvent::VehicleEntered {
                    lane,
                    vehicle,
                    timestamp_ms: frame.timestamp_ms,
                });
            }

            if let Some(trip) = outcome.trip {
                let speed = self.speed.estimate_for_lane(&trip, &self.geometry);
                self.last_speeds[lane] = speed;
                self.metrics.inc(&self.metrics.trips_completed);
                self.events.publish(PipelineEvent::TripCompleted { trip, speed });
            }

            reports.push(LaneReport {
                lane,
                name: self.geometry.lanes[lane].name.clone(),
                occupancy,
                track: tracker.track().to_vec(),
                trip_count: tracker.trip_count(),
                in_flight: tracker.in_flight(),
                last_speed: self.last_speeds[lane],
            });
        }
        self.metrics
            .set_timing(&self.metrics.tracking_time_us, t2.elapsed().as_micros() as u64);

        debug!("Frame {} @ {:.0}ms processed", frame_id, frame.timestamp_ms);

        Ok(FrameReport {
            frame_id,
            timestamp_ms: frame.timestamp_ms,
            lanes: reports,
            unit: self.speed.unit().to_string(),
        })
    }

    pub fn drain_events(&mut self) -> Vec<PipelineEvent> {
        self.events.drain()
    }

    pub fn speed_estimator(&self) -> &SpeedEstimator {
        &self.speed
    }

    pub fn geometry(&self) -> &GridGeometry {
        &self.geometry
    }

    /// All completed trips, lane by lane.
    pub fn trips(&self) -> Vec<Trip> {
        self.trackers
            .iter()
            .flat_map(|t| t.trips().iter().copied())
            .collect()
    }

    /// End of stream. In-flight vehicles are reported, never turned into trips.
    pub fn finish(&self) -> RunSummary {
        let lanes: Vec<LaneSummary> = self
            .trackers
            .iter()
            .map(|tracker| LaneSummary {
                name: self.geometry.lanes[tracker.lane()].name.clone(),
                trips: tracker.trip_count(),
                in_flight: tracker.finish_stream(),
                last_speed: self.last_speeds[tracker.lane()],
            })
            .collect();

        RunSummary {
            oracle: self.pool.oracle_name().to_string(),
            trips_completed: lanes.iter().map(|l| l.trips).sum(),
            in_flight_at_end: lanes.iter().map(|l| l.in_flight).sum(),
            lanes,
            metrics: self.metrics.summary(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OracleError;
    use crate::types::VehicleId;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const W: usize = 20;
    const H: usize = 4;

    fn config() -> Config {
        serde_yaml::from_str(
            r#"
grid: { cell_width: 4, cell_height: 4, columns: 5 }
lanes:
  - { name: test, y_offset: 0 }
tracking: { cooldown_ms: 80.0 }
occupancy: { threshold: 0.5 }
calibration: { distance_per_pixel: 0.001, traversable_distance: 0.0625 }
oracle: { kind: background }
scoring: { max_concurrency: 4, max_retries: 1, retry_backoff_ms: 1 }
"#,
        )
        .unwrap()
    }

    /// Bright cells score high, dark cells score low.
    struct BrightnessOracle;

    #[async_trait]
    impl AnomalyOracle for BrightnessOracle {
        fn name(&self) -> &str {
            "brightness"
        }

        async fn score(&self, _: CellAddress, features: &FeatureVector) -> Result<f32, OracleError> {
            Ok((features.pairs()[0].mean / 255.0) as f32)
        }
    }

    struct RejectingOracle;

    #[async_trait]
    impl AnomalyOracle for RejectingOracle {
        fn name(&self) -> &str {
            "rejecting"
        }

        async fn score(&self, _: CellAddress, _: &FeatureVector) -> Result<f32, OracleError> {
            Err(OracleError::Status {
                status: 400,
                body: "nope".into(),
            })
        }
    }

    fn frame(occupied: [bool; 5], timestamp_ms: f64) -> Frame {
        let mut data = vec![0u8; W * H * 3];
        for y in 0..H {
            for x in 0..W {
                if occupied[x / 4] {
                    let i = (y * W + x) * 3;
                    data[i..i + 3].copy_from_slice(&[255, 255, 255]);
                }
            }
        }
        Frame {
            data,
            width: W,
            height: H,
            channels: 3,
            timestamp_ms,
        }
    }

    fn pipeline(oracle: Arc<dyn AnomalyOracle>) -> PipelineOrchestrator {
        let config = config();
        let geometry = config.validate(W, H).unwrap();
        PipelineOrchestrator::new(&config, geometry, oracle, 0.0)
    }

    #[tokio::test]
    async fn test_vehicle_crossing_produces_trip_and_speed() {
        let mut pipeline = pipeline(Arc::new(BrightnessOracle));
        let (t, f) = (true, false);

        pipeline.process_frame(&frame([t, f, f, f, f], 0.0)).await.unwrap();
        pipeline.process_frame(&frame([t, t, f, f, f], 40.0)).await.unwrap();
        pipeline.process_frame(&frame([f, t, t, f, f], 80.0)).await.unwrap();
        pipeline.process_frame(&frame([f, f, t, t, f], 120.0)).await.unwrap();
        let report = pipeline.process_frame(&frame([f, f, f, t, t], 160.0)).await.unwrap();

        assert_eq!(report.frame_id, 4);
        assert_eq!(report.lanes[0].occupancy, vec![f, f, f, t, t]);
        assert_eq!(report.lanes[0].trip_count, 1);
        // 0.0625 distance over 160 ms
        assert_eq!(report.lanes[0].last_speed, Some(1406.2));
        assert_eq!(report.speed_label(0), "1406.2 mph");

        let events = pipeline.drain_events();
        assert_eq!(
            events.first(),
            Some(&PipelineEvent::VehicleEntered {
                lane: 0,
                vehicle: VehicleId(1),
                timestamp_ms: 0.0
            })
        );
        assert!(matches!(
            events.last(),
            Some(PipelineEvent::TripCompleted { speed: Some(_), .. })
        ));

        let summary = pipeline.finish();
        assert_eq!(summary.trips_completed, 1);
        assert_eq!(summary.in_flight_at_end, 0);
        assert_eq!(summary.metrics.total_frames, 5);
        assert_eq!(summary.metrics.cells_scored, 25);
        assert_eq!(pipeline.trips()[0].end_ms, 160.0);
    }

    #[tokio::test]
    async fn test_oracle_failures_read_as_empty() {
        let mut pipeline = pipeline(Arc::new(RejectingOracle));

        let report = pipeline
            .process_frame(&frame([true; 5], 0.0))
            .await
            .unwrap();

        assert!(report.lanes[0].occupancy.iter().all(|o| !o));
        assert!(report.lanes[0].track.iter().all(Option::is_none));
        assert_eq!(report.speed_label(0), "--");

        let failures = pipeline
            .drain_events()
            .into_iter()
            .filter(|e| matches!(e, PipelineEvent::OracleFailure { .. }))
            .count();
        assert_eq!(failures, 5);
        let metrics = pipeline.finish().metrics;
        assert_eq!(metrics.oracle_failures, 5);
        // 400 is permanent: no retries
        assert_eq!(metrics.oracle_retries, 0);
    }

    /// Like `BrightnessOracle`, but rejects one cell on its `fail_on_call`-th score.
    struct FailOnceOracle {
        cell: CellAddress,
        fail_on_call: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl AnomalyOracle for FailOnceOracle {
        fn name(&self) -> &str {
            "fail-once"
        }

        async fn score(&self, cell: CellAddress, features: &FeatureVector) -> Result<f32, OracleError> {
            if cell == self.cell && self.calls.fetch_add(1, Ordering::SeqCst) + 1 == self.fail_on_call {
                return Err(OracleError::Status {
                    status: 400,
                    body: "rejected".into(),
                });
            }
            Ok((features.pairs()[0].mean / 255.0) as f32)
        }
    }

    fn two_lane_frame(near: [bool; 5], far: [bool; 5], timestamp_ms: f64) -> Frame {
        let height = 2 * H;
        let mut data = vec![0u8; W * height * 3];
        for y in 0..height {
            let row = if y < H { &near } else { &far };
            for x in 0..W {
                if row[x / 4] {
                    let i = (y * W + x) * 3;
                    data[i..i + 3].copy_from_slice(&[255, 255, 255]);
                }
            }
        }
        Frame {
            data,
            width: W,
            height,
            channels: 3,
            timestamp_ms,
        }
    }

    #[tokio::test]
    async fn test_lanes_track_independently_with_own_correction() {
        let mut config = config();
        config.lanes = serde_yaml::from_str(
            r#"
- { name: near, y_offset: 0, perspective_multiplier: 1.0 }
- { name: far, y_offset: 4, perspective_multiplier: 1.5 }
"#,
        )
        .unwrap();
        let geometry = config.validate(W, 2 * H).unwrap();
        let mut pipeline = PipelineOrchestrator::new(&config, geometry, Arc::new(BrightnessOracle), 0.0);
        let (t, f) = (true, false);

        // The far vehicle runs one frame behind the near one
        let frames = [
            ([t, f, f, f, f], [f, f, f, f, f]),
            ([t, t, f, f, f], [t, f, f, f, f]),
            ([f, t, t, f, f], [t, t, f, f, f]),
            ([f, f, t, t, f], [f, t, t, f, f]),
            ([f, f, f, t, t], [f, f, t, t, f]),
            ([f, f, f, f, f], [f, f, f, t, t]),
        ];
        let mut report = None;
        for (i, (near, far)) in frames.into_iter().enumerate() {
            let frame = two_lane_frame(near, far, i as f64 * 40.0);
            report = Some(pipeline.process_frame(&frame).await.unwrap());
        }
        let report = report.unwrap();

        let trips = pipeline.trips();
        assert_eq!(trips.len(), 2);
        assert_eq!(
            (trips[0].lane, trips[0].vehicle, trips[0].start_ms, trips[0].end_ms),
            (0, VehicleId(1), 0.0, 160.0)
        );
        assert_eq!(
            (trips[1].lane, trips[1].vehicle, trips[1].start_ms, trips[1].end_ms),
            (1, VehicleId(2), 40.0, 200.0)
        );

        // Same 160 ms dwell; the far lane is scaled by 1.5
        let speeds: Vec<(usize, Option<f64>)> = pipeline
            .drain_events()
            .into_iter()
            .filter_map(|e| match e {
                PipelineEvent::TripCompleted { trip, speed } => Some((trip.lane, speed)),
                _ => None,
            })
            .collect();
        assert_eq!(speeds, vec![(0, Some(1406.2)), (1, Some(2109.3))]);
        assert_eq!(report.lanes[0].last_speed, Some(1406.2));
        assert_eq!(report.speed_label(1), "2109.3 mph");

        let summary = pipeline.finish();
        assert_eq!(summary.trips_completed, 2);
        assert_eq!(summary.in_flight_at_end, 0);
        assert_eq!(summary.lanes[1].name, "far");
    }

    #[tokio::test]
    async fn test_cell_recovers_after_single_oracle_failure() {
        let oracle = Arc::new(FailOnceOracle {
            cell: CellAddress { lane: 0, column: 1 },
            fail_on_call: 2,
            calls: AtomicUsize::new(0),
        });
        let mut pipeline = pipeline(oracle);
        let (t, f) = (true, false);

        pipeline.process_frame(&frame([t, f, f, f, f], 0.0)).await.unwrap();

        // Column 1 is bright but its score fails on this frame only
        let failed = pipeline.process_frame(&frame([t, t, f, f, f], 40.0)).await.unwrap();
        assert_eq!(failed.lanes[0].occupancy, vec![t, f, f, f, f]);
        assert_eq!(failed.lanes[0].track[0], Some(VehicleId(1)));
        assert_eq!(failed.lanes[0].in_flight, 1);

        let recovered = pipeline.process_frame(&frame([f, t, t, f, f], 80.0)).await.unwrap();
        assert_eq!(recovered.lanes[0].occupancy, vec![f, t, t, f, f]);
        assert_eq!(recovered.lanes[0].track[1], Some(VehicleId(1)));
        assert_eq!(recovered.lanes[0].track[2], Some(VehicleId(1)));

        pipeline.process_frame(&frame([f, f, t, t, f], 120.0)).await.unwrap();
        let report = pipeline.process_frame(&frame([f, f, f, t, t], 160.0)).await.unwrap();
        assert_eq!(report.lanes[0].trip_count, 1);

        let events = pipeline.drain_events();
        let failures: Vec<&PipelineEvent> = events
            .iter()
            .filter(|e| matches!(e, PipelineEvent::OracleFailure { .. }))
            .collect();
        assert_eq!(failures.len(), 1);
        assert!(matches!(
            failures[0],
            PipelineEvent::OracleFailure {
                frame_id: 1,
                cell: CellAddress { lane: 0, column: 1 },
                ..
            }
        ));
        let entered = events
            .iter()
            .filter(|e| matches!(e, PipelineEvent::VehicleEntered { .. }))
            .count();
        assert_eq!(entered, 1);

        let trips = pipeline.trips();
        assert_eq!((trips[0].vehicle, trips[0].start_ms, trips[0].end_ms), (VehicleId(1), 0.0, 160.0));
    }

    #[tokio::test]
    async fn test_wrong_frame_size_is_an_error() {
        let mut pipeline = pipeline(Arc::new(BrightnessOracle));
        let mut bad = frame([false; 5], 0.0);
        bad.width = 16;
        assert!(pipeline.process_frame(&bad).await.is_err());
    }
}
