// src/pipeline/event_bus.rs
//
// Decoupled event system. The orchestrator publishes what happened on each
// frame; the CLI (or any other consumer) drains and reports.

use crate::types::{CellAddress, Trip, VehicleId};
use std::collections::VecDeque;
use tracing::warn;

#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    VehicleEntered {
        lane: usize,
        vehicle: VehicleId,
        timestamp_ms: f64,
    },

    TripCompleted {
        trip: Trip,
        /// `None` when the trip has no measurable elapsed time.
        speed: Option<f64>,
    },

    OracleFailure {
        frame_id: u64,
        cell: CellAddress,
        error: String,
    },
}

pub struct EventBus {
    events: VecDeque<PipelineEvent>,
    max_pending: usize,
}

impl EventBus {
    pub fn new(max_pending: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(max_pending.min(1024)),
            max_pending: max_pending.max(1),
        }
    }

    pub fn publish(&mut self, event: PipelineEvent) {
        if self.events.len() >= self.max_pending {
            warn!(
                "Event bus full ({} events), dropping oldest",
                self.max_pending
            );
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    pub fn drain(&mut self) -> Vec<PipelineEvent> {
        self.events.drain(..).collect()
    }
}
