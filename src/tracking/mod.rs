// src/tracking/mod.rs

pub mod lane_tracker;
pub mod smoothing;
pub mod vehicle_id;

pub use lane_tracker::LaneTracker;
pub use vehicle_id::VehicleIdAllocator;
