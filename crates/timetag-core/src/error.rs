//! Error types for timetag

use thiserror::Error;

/// Core timetag errors
///
/// Only configuration errors are fatal; everything raised on the streaming
/// path is logged and discarded by the component that hit it.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TimetagError {
    // Construction-time errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid sample rate: {0}")]
    InvalidSampleRate(f64),

    // Control message errors
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    #[error("Retune queue full ({capacity} commands pending)")]
    QueueFull { capacity: usize },

    // Timer errors
    #[error("Timer stopped")]
    TimerStopped,

    #[error("Failed to spawn timer thread: {0}")]
    TimerSpawn(String),

    // Logging
    #[error("Tracing subscriber: {0}")]
    Subscriber(String),
}

/// Result type for timetag operations
pub type TimetagResult<T> = Result<T, TimetagError>;

/// Reject non-finite or non-positive sample rates
pub fn validate_rate(rate: f64) -> TimetagResult<f64> {
    if rate.is_finite() && rate > 0.0 {
        Ok(rate)
    } else {
        Err(TimetagError::InvalidSampleRate(rate))
    }
}
