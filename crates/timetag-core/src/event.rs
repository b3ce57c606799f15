//! Event payloads published by timetag components
//!
//! Each payload has a typed form used inside the crate family and a
//! [`Value`] form matching what downstream message consumers expect.

use crate::{keys, RadioTime, SampleIndex, TimetagError, TimetagResult, Value};

/// Published when a scheduled interrupt fires
#[derive(Clone, Debug, PartialEq)]
pub struct TriggerEvent {
    /// Requested absolute time of the interrupt
    pub trigger_time: RadioTime,
    /// Sample index corresponding to `trigger_time` at fire time
    pub trigger_sample: SampleIndex,
    /// How late the request was when received (seconds, >= 0)
    pub late_delta: f64,
}

impl TriggerEvent {
    /// `{trigger_time: (s . f), trigger_sample: u64, late_delta: f64}`
    pub fn to_value(&self) -> Value {
        Value::dict()
            .with_entry(keys::TRIGGER_TIME, self.trigger_time.into())
            .with_entry(keys::TRIGGER_SAMPLE, Value::U64(self.trigger_sample))
            .with_entry(keys::LATE_DELTA, Value::F64(self.late_delta))
    }

    pub fn from_value(value: &Value) -> TimetagResult<Self> {
        let field = |key: &str| {
            value
                .dict_ref(key)
                .ok_or_else(|| TimetagError::MalformedMessage(format!("missing `{key}`")))
        };
        Ok(TriggerEvent {
            trigger_time: field(keys::TRIGGER_TIME)?.radio_time()?,
            trigger_sample: field(keys::TRIGGER_SAMPLE)?.as_u64().ok_or_else(|| {
                TimetagError::MalformedMessage("trigger_sample must be u64".into())
            })?,
            late_delta: field(keys::LATE_DELTA)?.as_f64().ok_or_else(|| {
                TimetagError::MalformedMessage("late_delta must be numeric".into())
            })?,
        })
    }
}

/// Time correlation attached to a sample, re-published as tag and message
#[derive(Clone, Debug, PartialEq)]
pub struct TimeEvent {
    pub key: String,
    pub time: RadioTime,
    pub offset: SampleIndex,
    pub rate: f64,
}

impl TimeEvent {
    /// Tag payload: `(secs, frac, offset, rate)`
    pub fn tag_value(&self) -> Value {
        Value::tuple([
            Value::U64(self.time.secs()),
            Value::F64(self.time.frac()),
            Value::U64(self.offset),
            Value::F64(self.rate),
        ])
    }

    /// Message payload: `(key . (secs, frac, offset, rate))`
    pub fn to_value(&self) -> Value {
        Value::pair(Value::symbol(self.key.clone()), self.tag_value())
    }

    pub fn from_tag_value(key: &str, value: &Value) -> TimetagResult<Self> {
        let time = value.radio_time()?;
        let offset = value
            .tuple_ref(2)
            .and_then(Value::as_u64)
            .ok_or_else(|| TimetagError::MalformedMessage("time tag offset must be u64".into()))?;
        let rate = value
            .tuple_ref(3)
            .and_then(Value::as_f64)
            .ok_or_else(|| TimetagError::MalformedMessage("time tag rate must be numeric".into()))?;
        Ok(TimeEvent {
            key: key.to_string(),
            time,
            offset,
            rate,
        })
    }
}

/// Frequency change carried by a retune tag
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FrequencyChange {
    pub freq: f64,
    /// Explicit phase (radians); `None` keeps the running phase
    pub phase: Option<f64>,
}

impl FrequencyChange {
    pub fn new(freq: f64) -> Self {
        FrequencyChange { freq, phase: None }
    }

    pub fn with_phase(freq: f64, phase: f64) -> Self {
        FrequencyChange {
            freq,
            phase: Some(phase),
        }
    }

    /// Bare frequency, or `(frequency . phase)`
    pub fn to_value(&self) -> Value {
        match self.phase {
            None => Value::F64(self.freq),
            Some(phase) => Value::pair(Value::F64(self.freq), Value::F64(phase)),
        }
    }

    pub fn from_value(value: &Value) -> TimetagResult<Self> {
        if let Some(freq) = value.as_f64() {
            return Ok(FrequencyChange::new(freq));
        }
        match (value.car().and_then(Value::as_f64), value.cdr().and_then(Value::as_f64)) {
            (Some(freq), Some(phase)) => Ok(FrequencyChange::with_phase(freq, phase)),
            _ => Err(TimetagError::MalformedMessage(format!(
                "invalid frequency tag value {value:?}"
            ))),
        }
    }
}
