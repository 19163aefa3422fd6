// src/tracking/smoothing.rs
//
// Per-column cooldown timers. A raw "occupied" signal re-arms the column's
// timer; otherwise it decays by elapsed time. The column counts as active
// while any cooldown remains, which bridges single-frame detector dropouts.

#[derive(Debug, Clone, PartialEq)]
pub struct CooldownTimers {
    remaining_ms: Vec<f64>,
    cooldown_ms: f64,
}

impl CooldownTimers {
    pub fn new(columns: usize, cooldown_ms: f64) -> Self {
        Self {
            remaining_ms: vec![0.0; columns],
            cooldown_ms,
        }
    }

    /// Apply one frame of raw occupancy. `occupancy` must match the column count.
    pub fn update(&mut self, occupancy: &[bool], dt_ms: f64) {
        debug_assert_eq!(occupancy.len(), self.remaining_ms.len());
        let dt_ms = dt_ms.max(0.0);
        for (timer, &occupied) in self.remaining_ms.iter_mut().zip(occupancy) {
            *timer = if occupied {
                self.cooldown_ms
            } else {
                (*timer - dt_ms).max(0.0)
            };
        }
    }

    pub fn is_active(&self, column: usize) -> bool {
        self.remaining_ms[column] > 0.0
    }
}
