//! timetag Blocks - Stream-processing components for timed SDR control
//!
//! This crate hosts the components a streaming runtime drives:
//! - InterruptEmitter: publishes a trigger event at a requested radio time
//! - TagTimeOffsetPropagator: re-publishes hardware time references as
//!   stream tags and messages, with optional periodic synthetic tags
//! - TimedRetuneScheduler: queues frequency changes and tags them at the
//!   sample where they take effect
//! - SampleTriggeredEmitter: sample-clock driven trigger, no timer thread
//! - RetuneFollower: consumer side of the retune tags
//!
//! Shared plumbing (work windows, message ports), serde configuration and
//! tracing setup live alongside.

pub mod config;
pub mod follower;
pub mod interrupt;
pub mod observability;
pub mod pdu_emitter;
pub mod propagator;
pub mod retune;
pub mod stream;

pub use config::*;
pub use follower::*;
pub use interrupt::*;
pub use observability::*;
pub use pdu_emitter::*;
pub use propagator::*;
pub use retune::*;
pub use stream::*;
