use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Time source for the supervisor.
///
/// Timeout arithmetic uses the monotonic side exclusively; the wall clock
/// only stamps persisted statistics. A wall-clock jump (NTP step, manual
/// set) therefore cannot produce a false heartbeat timeout.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    origin: Instant,
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    /// Whole seconds elapsed since this clock was created. Never decreases.
    pub fn now_monotonic_seconds(&self) -> u64 {
        self.origin.elapsed().as_secs()
    }

    /// Wall-clock seconds since the Unix epoch.
    pub fn wall_time_seconds(&self) -> i64 {
        match SystemTime::now().duration_since(UNIX_EPOCH) {
            Ok(d) => d.as_secs() as i64,
            // Clock set before the epoch; report the (negative) offset.
            Err(e) => -(e.duration().as_secs() as i64),
        }
    }
}
