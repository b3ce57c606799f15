//! Component configuration
//!
//! Every struct deserializes with `#[serde(default)]`, so a JSON document
//! only needs the fields it changes.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use timetag_core::{keys, validate_rate, RadioTime, TimetagError, TimetagResult};
use timetag_time::{DriftConfig, TimerConfig};

const DEFAULT_RATE: f64 = 1_000_000.0;

/// Maximum number of pending retune commands
pub const DEFAULT_RETUNE_CAPACITY: usize = 64;

fn invalid(msg: impl Into<String>) -> TimetagError {
    TimetagError::InvalidConfig(msg.into())
}

fn require_key(what: &str, key: &str) -> TimetagResult<()> {
    if key.is_empty() {
        return Err(invalid(format!("{what} must not be empty")));
    }
    Ok(())
}

/// InterruptEmitter configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterruptEmitterConfig {
    pub sample_rate: f64,
    /// Discard requests whose time has already passed
    pub drop_late: bool,
    /// Host/hardware divergence (seconds) that triggers a correction
    pub drift_threshold: f64,
    /// Fraction of the divergence corrected per pass
    pub loop_gain: f64,
    /// Busy-wait tail before each deadline (microseconds)
    pub spin_window_us: u64,
}

impl Default for InterruptEmitterConfig {
    fn default() -> Self {
        let drift = DriftConfig::default();
        InterruptEmitterConfig {
            sample_rate: DEFAULT_RATE,
            drop_late: false,
            drift_threshold: drift.threshold,
            loop_gain: drift.gain,
            spin_window_us: 200,
        }
    }
}

impl InterruptEmitterConfig {
    pub fn drift(&self) -> DriftConfig {
        DriftConfig {
            threshold: self.drift_threshold,
            gain: self.loop_gain,
        }
    }

    pub fn timer(&self) -> TimerConfig {
        TimerConfig {
            spin_window: Duration::from_micros(self.spin_window_us),
            thread_name: "timetag-interrupt".to_string(),
        }
    }

    pub fn validate(&self) -> TimetagResult<()> {
        validate_rate(self.sample_rate)?;
        self.drift().validate()
    }
}

/// TagTimeOffsetPropagator configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TagOffsetConfig {
    pub sample_rate: f64,
    /// Samples between synthetic time tags; 0 disables them
    pub interval: u64,
    /// Key of the emitted time tags
    pub key: String,
}

impl Default for TagOffsetConfig {
    fn default() -> Self {
        TagOffsetConfig {
            sample_rate: DEFAULT_RATE,
            interval: 0,
            key: keys::RX_TIME_OFFSET.to_string(),
        }
    }
}

impl TagOffsetConfig {
    pub fn validate(&self) -> TimetagResult<()> {
        validate_rate(self.sample_rate)?;
        require_key("time tag key", &self.key)
    }
}

/// TimedRetuneScheduler configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetuneSchedulerConfig {
    pub sample_rate: f64,
    /// Command dictionary entry holding the frequency offset
    pub dict_key: String,
    /// Key of the emitted retune tags
    pub tag_key: String,
    /// Time of sample 0 until the first hardware time tag
    pub origin: RadioTime,
    pub capacity: usize,
}

impl Default for RetuneSchedulerConfig {
    fn default() -> Self {
        RetuneSchedulerConfig {
            sample_rate: DEFAULT_RATE,
            dict_key: keys::FREQ.to_string(),
            tag_key: keys::SET_FREQ.to_string(),
            origin: RadioTime::ZERO,
            capacity: DEFAULT_RETUNE_CAPACITY,
        }
    }
}

impl RetuneSchedulerConfig {
    pub fn validate(&self) -> TimetagResult<()> {
        validate_rate(self.sample_rate)?;
        require_key("command dictionary key", &self.dict_key)?;
        require_key("retune tag key", &self.tag_key)?;
        if self.capacity == 0 {
            return Err(invalid("retune queue capacity must be at least 1"));
        }
        Ok(())
    }
}

/// SampleTriggeredEmitter configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PduEmitterConfig {
    pub sample_rate: f64,
    pub drop_late: bool,
}

impl Default for PduEmitterConfig {
    fn default() -> Self {
        PduEmitterConfig {
            sample_rate: DEFAULT_RATE,
            drop_late: false,
        }
    }
}

impl PduEmitterConfig {
    pub fn validate(&self) -> TimetagResult<()> {
        validate_rate(self.sample_rate).map(|_| ())
    }
}

/// RetuneFollower configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetuneFollowerConfig {
    pub sample_rate: f64,
    pub decimation: usize,
    /// Prototype filter taps
    pub taps: Vec<f64>,
    pub center_freq: f64,
    /// Key of the consumed retune tags
    pub tag_key: String,
}

impl Default for RetuneFollowerConfig {
    fn default() -> Self {
        RetuneFollowerConfig {
            sample_rate: DEFAULT_RATE,
            decimation: 1,
            taps: vec![1.0],
            center_freq: 0.0,
            tag_key: keys::SET_FREQ.to_string(),
        }
    }
}

impl RetuneFollowerConfig {
    pub fn validate(&self) -> TimetagResult<()> {
        validate_rate(self.sample_rate)?;
        if self.decimation == 0 {
            return Err(invalid("decimation must be at least 1"));
        }
        if self.taps.is_empty() {
            return Err(invalid("filter taps must not be empty"));
        }
        if !self.center_freq.is_finite() {
            return Err(invalid(format!(
                "center frequency must be finite, got {}",
                self.center_freq
            )));
        }
        require_key("retune tag key", &self.tag_key)
    }
}

/// Configuration for every timing component of a receive chain
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub interrupt: InterruptEmitterConfig,
    pub tag_offset: TagOffsetConfig,
    pub retune: RetuneSchedulerConfig,
    pub pdu: PduEmitterConfig,
    pub follower: RetuneFollowerConfig,
}

impl TimingConfig {
    /// Parse and validate a JSON document
    pub fn from_json_str(json: &str) -> TimetagResult<Self> {
        let config: TimingConfig =
            serde_json::from_str(json).map_err(|e| invalid(format!("config parse: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json_string(&self) -> TimetagResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| invalid(format!("config encode: {e}")))
    }

    pub fn validate(&self) -> TimetagResult<()> {
        self.interrupt.validate()?;
        self.tag_offset.validate()?;
        self.retune.validate()?;
        self.pdu.validate()?;
        self.follower.validate()
    }
}
