//! timetag Time - Scheduled events and sample/time correlation
//!
//! This crate implements the timing core:
//! - HostClock: the host wall clock, swappable for simulation
//! - ScheduledTimer: single-shot, cancelable, reschedulable deadline timer
//!   on its own background thread, with stale-fire rejection
//! - TimeCorrelator: sample index <-> radio time mapping, re-anchored by
//!   hardware time tags and corrected for host clock drift

pub mod clock;
pub mod correlator;
pub mod timer;

pub use clock::*;
pub use correlator::*;
pub use timer::*;
