//! Tracing subscriber setup
//!
//! Components only emit `tracing` events; applications decide where they
//! go. `init_tracing` installs a global fmt subscriber filtered by
//! `RUST_LOG` (default `info`).

use serde::{Deserialize, Serialize};
use timetag_core::{TimetagError, TimetagResult};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Log output format
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable, multi-line
    #[default]
    Pretty,
    /// One line per event
    Compact,
    /// Machine-readable
    Json,
}

/// Install the global subscriber
///
/// Fails if a global subscriber is already installed.
pub fn init_tracing(format: LogFormat) -> TimetagResult<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    let result = match format {
        LogFormat::Pretty => registry
            .with(fmt::layer().pretty().with_thread_names(true))
            .try_init(),
        LogFormat::Compact => registry
            .with(fmt::layer().compact().with_thread_names(true))
            .try_init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_thread_names(true))
            .try_init(),
    };
    result.map_err(|e| TimetagError::Subscriber(e.to_string()))
}
