//! Stream tags and well-known keys

use crate::{SampleIndex, Value};

/// Key/value pair attached to a specific sample offset of a stream
#[derive(Clone, Debug, PartialEq)]
pub struct Tag {
    pub offset: SampleIndex,
    pub key: String,
    pub value: Value,
}

impl Tag {
    pub fn new(offset: SampleIndex, key: impl Into<String>, value: Value) -> Self {
        Tag {
            offset,
            key: key.into(),
            value,
        }
    }
}

/// Well-known tag keys, message port names and dictionary keys
pub mod keys {
    /// Hardware time reference tag
    pub const RX_TIME: &str = "rx_time";
    pub const RX_RATE: &str = "rx_rate";
    pub const RX_FREQ: &str = "rx_freq";

    /// Default key of propagated time tags
    pub const RX_TIME_OFFSET: &str = "rx_time_offset";

    /// Default key of retune tags
    pub const SET_FREQ: &str = "set_freq";

    // Message ports
    pub const SET: &str = "set";
    pub const TRIG: &str = "trig";
    pub const TIME: &str = "time";
    pub const COMMAND: &str = "command";
    pub const FREQ: &str = "freq";
    pub const DISARM: &str = "disarm";

    // Dictionary fields
    pub const TRIGGER_TIME: &str = "trigger_time";
    pub const TRIGGER_SAMPLE: &str = "trigger_sample";
    pub const LATE_DELTA: &str = "late_delta";
    pub const PHASE: &str = "phase";
}
