//! Simulated host clocks
//!
//! A `DriftingClock` stands in for a host wall clock whose oscillator runs
//! at a slightly wrong rate, with optional read jitter. It only moves when
//! the simulation advances it, so scenarios are reproducible from a seed.

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use timetag_core::RadioTime;
use timetag_time::HostClock;

/// Rate error and jitter of a simulated host clock
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ClockDriftModel {
    /// Fractional rate error (1e-4 = 100 ppm fast, negative = slow)
    pub rate_error: f64,
    /// Maximum read jitter (seconds)
    pub jitter: f64,
}

impl ClockDriftModel {
    pub fn new(rate_error: f64, jitter: f64) -> Self {
        ClockDriftModel { rate_error, jitter }
    }

    pub fn perfect() -> Self {
        Self::new(0.0, 0.0)
    }

    /// 100 ppm fast
    pub fn fast() -> Self {
        Self::new(100e-6, 0.0)
    }

    /// 100 ppm slow
    pub fn slow() -> Self {
        Self::new(-100e-6, 0.0)
    }

    /// Accurate on average, 50 us of read jitter
    pub fn unstable() -> Self {
        Self::new(0.0, 50e-6)
    }
}

struct ClockState {
    start: RadioTime,
    /// True seconds since `start`
    elapsed: f64,
    rng: StdRng,
}

/// Host clock driven by the simulation
pub struct DriftingClock {
    model: ClockDriftModel,
    state: Mutex<ClockState>,
}

impl DriftingClock {
    pub fn new(start: RadioTime, model: ClockDriftModel, seed: u64) -> Self {
        DriftingClock {
            model,
            state: Mutex::new(ClockState {
                start,
                elapsed: 0.0,
                rng: StdRng::seed_from_u64(seed),
            }),
        }
    }

    pub fn model(&self) -> ClockDriftModel {
        self.model
    }

    /// Let `secs` of true time pass
    pub fn advance(&self, secs: f64) {
        self.state.lock().elapsed += secs.max(0.0);
    }

    /// True seconds elapsed since the clock was created
    pub fn true_elapsed(&self) -> f64 {
        self.state.lock().elapsed
    }

    /// Accumulated rate error, excluding jitter
    pub fn accumulated_drift(&self) -> f64 {
        self.true_elapsed() * self.model.rate_error
    }
}

impl HostClock for DriftingClock {
    fn now(&self) -> RadioTime {
        let mut st = self.state.lock();
        let jitter = if self.model.jitter > 0.0 {
            st.rng.gen_range(-self.model.jitter..=self.model.jitter)
        } else {
            0.0
        };
        let reading = st.elapsed * (1.0 + self.model.rate_error) + jitter;
        st.start.saturating_add_secs(reading)
    }
}
