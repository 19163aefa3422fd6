// src/tracking/lane_tracker.rs
//
// Per-lane clump tracker.
//
// Each frame the lane's occupancy row is folded into the previous frame's
// track in two passes:
//
//   1. Detach (right → left): when the vehicle in the second-to-last column
//      is seen leaving through the last column, its footprint is cut out so
//      nothing further left can inherit its id.
//   2. Propagate (left → right): ids flow rightward through every run of
//      smoothed-active columns. New ids are only minted at column 0.
//
// The pass outputs live in separate buffers (`detached_track`,
// `final_track`). `LaneState::advance` is pure; `LaneTracker` owns the
// state for one lane and swaps it frame by frame.

use super::smoothing::CooldownTimers;
use super::vehicle_id::VehicleIdAllocator;
use crate::error::TrackingError;
use crate::types::{Trip, VehicleId};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

// ============================================================================
// STATE
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct LaneState {
    pub track: Vec<Option<VehicleId>>,
    pub timers: CooldownTimers,
    pub last_timestamp_ms: f64,
    /// Vehicles in flight → entry timestamp.
    pub starts: BTreeMap<VehicleId, f64>,
    pub trips: Vec<Trip>,
}

/// What happened to one lane during a single `advance`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct StepOutcome {
    pub entered: Option<VehicleId>,
    pub finished: Option<VehicleId>,
    pub trip: Option<Trip>,
}

impl LaneState {
    pub fn initial(columns: usize, cooldown_ms: f64, stream_start_ms: f64) -> Self {
        Self {
            track: vec![None; columns],
            timers: CooldownTimers::new(columns, cooldown_ms),
            last_timestamp_ms: stream_start_ms,
            starts: BTreeMap::new(),
            trips: Vec::new(),
        }
    }

    /// Fold one frame of occupancy into the state.
    ///
    /// Timestamps that go backwards are clamped to the last seen timestamp,
    /// so elapsed time is never negative and trips never end before they
    /// start.
    pub fn advance(
        &self,
        lane: usize,
        occupancy: &[bool],
        timestamp_ms: f64,
        ids: &VehicleIdAllocator,
    ) -> Result<(LaneState, StepOutcome), TrackingError> {
        let n = self.track.len();
        if n < 2 {
            return Err(TrackingError::TooFewColumns(n));
        }
        if occupancy.len() != n {
            return Err(TrackingError::OccupancyLength {
                expected: n,
                actual: occupancy.len(),
            });
        }
        let last = n - 1;

        let now_ms = timestamp_ms.max(self.last_timestamp_ms);
        let dt_ms = now_ms - self.last_timestamp_ms;

        let mut timers = self.timers.clone();
        timers.update(occupancy, dt_ms);

        // Trailing edge of the vehicle in `last - 1` is leaving the window
        let finished = if occupancy[last] {
            self.track[last - 1]
        } else {
            None
        };

        let mut detached_track: Vec<Option<VehicleId>> = vec![None; n];
        let mut prv: Option<VehicleId> = None;
        for i in (0..last).rev() {
            let cur = self.track[i];
            let crosses_finished = finished.is_some() && (prv == finished || cur == finished);
            detached_track[i] = if !crosses_finished && timers.is_active(i) {
                prv.or(cur)
            } else {
                None
            };
            prv = detached_track[i];
        }

        let new_vehicle = if occupancy[0] && self.track[0].is_none() {
            Some(ids.next_id())
        } else {
            None
        };

        let mut final_track: Vec<Option<VehicleId>> = vec![None; n];
        final_track[0] = new_vehicle.or(detached_track[0]);
        for i in 1..n {
            final_track[i] = if timers.is_active(i) {
                final_track[i - 1].or(detached_track[i])
            } else {
                None
            };
        }

        let mut starts = self.starts.clone();
        let mut trips = self.trips.clone();
        let mut trip = None;
        if let Some(vehicle) = finished {
            match starts.remove(&vehicle) {
                Some(start_ms) => {
                    let completed = Trip {
                        vehicle,
                        lane,
                        start_ms,
                        end_ms: now_ms,
                    };
                    trips.push(completed);
                    trip = Some(completed);
                }
                None => warn!("Lane {}: {} finished without an entry time", lane, vehicle),
            }
        }
        if let Some(vehicle) = new_vehicle {
            starts.insert(vehicle, now_ms);
        }

        let next = LaneState {
            track: final_track,
            timers,
            last_timestamp_ms: now_ms,
            starts,
            trips,
        };

        Ok((
            next,
            StepOutcome {
                entered: new_vehicle,
                finished,
                trip,
            },
        ))
    }
}

// ============================================================================
// TRACKER
// ============================================================================

pub struct LaneTracker {
    lane: usize,
    state: LaneState,
    ids: VehicleIdAllocator,
}

impl LaneTracker {
    pub fn new(
        lane: usize,
        columns: usize,
        cooldown_ms: f64,
        stream_start_ms: f64,
        ids: VehicleIdAllocator,
    ) -> Self {
        Self {
            lane,
            state: LaneState::initial(columns, cooldown_ms, stream_start_ms),
            ids,
        }
    }

    pub fn update(&mut self, occupancy: &[bool], timestamp_ms: f64) -> Result<StepOutcome, TrackingError> {
        let (next, outcome) = self
            .state
            .advance(self.lane, occupancy, timestamp_ms, &self.ids)?;
        self.state = next;

        if let Some(vehicle) = outcome.entered {
            debug!("Lane {}: {} entered at {:.0}ms", self.lane, vehicle, timestamp_ms);
        }
        if let Some(trip) = outcome.trip {
            debug!(
                "Lane {}: {} exited after {:.0}ms",
                self.lane,
                trip.vehicle,
                trip.elapsed_ms()
            );
        }
        Ok(outcome)
    }

    /// Log vehicles still in flight when the stream ends. They never become
    /// trips.
    pub fn finish_stream(&self) -> usize {
        let in_flight = self.in_flight();
        if in_flight > 0 {
            info!(
                "Lane {}: stream ended with {} vehicle(s) in flight, not counted",
                self.lane, in_flight
            );
        }
        in_flight
    }

    pub fn lane(&self) -> usize {
        self.lane
    }

    pub fn track(&self) -> &[Option<VehicleId>] {
        &self.state.track
    }

    pub fn trips(&self) -> &[Trip] {
        &self.state.trips
    }

    pub fn trip_count(&self) -> usize {
        self.state.trips.len()
    }

    pub fn in_flight(&self) -> usize {
        self.state.starts.len()
    }
}
