//! timetag Core - Fundamental types and primitives
//!
//! This crate defines the types shared by every timetag component:
//! - Sample clock and absolute time (SampleIndex, RadioTime)
//! - The sample/time affine map (CorrelationAnchor)
//! - Stream tags and dynamically typed message values
//! - Published event payloads (trigger, time, frequency change)
//! - The error type

pub mod anchor;
pub mod error;
pub mod event;
pub mod tag;
pub mod time;
pub mod value;

pub use anchor::*;
pub use error::*;
pub use event::*;
pub use tag::*;
pub use time::*;
pub use value::*;
