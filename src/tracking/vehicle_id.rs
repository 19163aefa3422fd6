// src/tracking/vehicle_id.rs

use crate::types::VehicleId;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Monotonic id source shared by every lane of one run, so ids stay unique
/// across lanes as well as over time.
#[derive(Debug, Clone)]
pub struct VehicleIdAllocator {
    next: Arc<AtomicU64>,
}

impl VehicleIdAllocator {
    pub fn new() -> Self {
        Self {
            next: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn next_id(&self) -> VehicleId {
        VehicleId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for VehicleIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_the_counter() {
        let a = VehicleIdAllocator::new();
        let b = a.clone();
        assert_eq!(a.next_id(), VehicleId(1));
        assert_eq!(b.next_id(), VehicleId(2));
        assert_eq!(a.next_id(), VehicleId(3));
        assert_eq!(b.next_id(), VehicleId(4));
    }
}
