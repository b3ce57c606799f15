//! timetag Test Harness - Simulation and end-to-end validation
//!
//! This crate provides:
//! - Drifting host clocks with seeded jitter
//! - Simulated radio sources with irregular batching and re-timing
//! - A minimal runner that drives blocks the way a streaming runtime does
//! - End-to-end scenarios over retuning, drift tracking and time tagging

pub mod clock_sim;
pub mod integration;
pub mod stream_sim;

pub use clock_sim::*;
pub use integration::*;
pub use stream_sim::*;
