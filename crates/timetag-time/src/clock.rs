//! Host clock implementations

use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use timetag_core::RadioTime;

/// Source of host wall-clock readings
pub trait HostClock: Send + Sync {
    /// Current host wall-clock time
    fn now(&self) -> RadioTime;
}

/// Host wall clock backed by the operating system
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl HostClock for SystemClock {
    fn now(&self) -> RadioTime {
        // A clock set before 1970 reads as the epoch
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(RadioTime::from_duration)
            .unwrap_or(RadioTime::ZERO)
    }
}

/// Host clock that only moves when told to
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Mutex<RadioTime>,
}

impl ManualClock {
    pub fn new(start: RadioTime) -> Self {
        ManualClock {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, time: RadioTime) {
        *self.now.lock() = time;
    }

    /// Move the clock by `secs` (negative moves it back, clamping at zero)
    pub fn advance(&self, secs: f64) -> RadioTime {
        let mut now = self.now.lock();
        *now = now.saturating_add_secs(secs);
        *now
    }
}

impl HostClock for ManualClock {
    fn now(&self) -> RadioTime {
        *self.now.lock()
    }
}
