//! Dynamically typed message values
//!
//! Control messages and stream tag payloads arrive with a shape that is
//! only known at runtime. `Value` models that shape; the typed payloads in
//! [`crate::event`] convert to and from it.

use std::collections::BTreeMap;

use crate::{RadioTime, TimetagError, TimetagResult};

/// A message or tag payload
#[derive(Clone, Debug, PartialEq, Default)]
pub enum Value {
    #[default]
    Nil,
    Bool(bool),
    U64(u64),
    I64(i64),
    F64(f64),
    Symbol(String),
    Pair(Box<Value>, Box<Value>),
    Tuple(Vec<Value>),
    Dict(BTreeMap<String, Value>),
}

impl Value {
    pub fn symbol(name: impl Into<String>) -> Self {
        Value::Symbol(name.into())
    }

    pub fn pair(car: Value, cdr: Value) -> Self {
        Value::Pair(Box::new(car), Box::new(cdr))
    }

    pub fn tuple(items: impl IntoIterator<Item = Value>) -> Self {
        Value::Tuple(items.into_iter().collect())
    }

    /// An empty dictionary
    pub fn dict() -> Self {
        Value::Dict(BTreeMap::new())
    }

    /// Add (or replace) a dictionary entry; non-dictionaries become one
    pub fn with_entry(self, key: impl Into<String>, value: Value) -> Self {
        let mut map = match self {
            Value::Dict(map) => map,
            _ => BTreeMap::new(),
        };
        map.insert(key.into(), value);
        Value::Dict(map)
    }

    #[inline]
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    #[inline]
    pub fn is_dict(&self) -> bool {
        matches!(self, Value::Dict(_))
    }

    #[inline]
    pub fn is_pair(&self) -> bool {
        matches!(self, Value::Pair(..))
    }

    /// True for floating point values only
    #[inline]
    pub fn is_real(&self) -> bool {
        matches!(self, Value::F64(_))
    }

    /// True for any numeric value
    #[inline]
    pub fn is_number(&self) -> bool {
        matches!(self, Value::U64(_) | Value::I64(_) | Value::F64(_))
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::U64(v) => Some(*v),
            Value::I64(v) => u64::try_from(*v).ok(),
            _ => None,
        }
    }

    /// Numeric value widened to f64
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::F64(v) => Some(*v),
            Value::U64(v) => Some(*v as f64),
            Value::I64(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_symbol(&self) -> Option<&str> {
        match self {
            Value::Symbol(s) => Some(s),
            _ => None,
        }
    }

    pub fn car(&self) -> Option<&Value> {
        match self {
            Value::Pair(car, _) => Some(car),
            _ => None,
        }
    }

    pub fn cdr(&self) -> Option<&Value> {
        match self {
            Value::Pair(_, cdr) => Some(cdr),
            _ => None,
        }
    }

    pub fn tuple_ref(&self, index: usize) -> Option<&Value> {
        match self {
            Value::Tuple(items) => items.get(index),
            _ => None,
        }
    }

    pub fn dict_ref(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Dict(map) => map.get(key),
            _ => None,
        }
    }

    /// Parse a `(u64 seconds, real fraction)` time from a pair or from the
    /// first two members of a tuple
    pub fn radio_time(&self) -> TimetagResult<RadioTime> {
        let (secs, frac) = match self {
            Value::Pair(car, cdr) => (car.as_ref(), cdr.as_ref()),
            Value::Tuple(items) if items.len() >= 2 => (&items[0], &items[1]),
            other => {
                return Err(TimetagError::MalformedMessage(format!(
                    "expected (seconds, fraction) pair or tuple, got {other:?}"
                )))
            }
        };
        let secs = secs.as_u64().ok_or_else(|| {
            TimetagError::MalformedMessage(format!("whole seconds must be u64, got {secs:?}"))
        })?;
        let frac = frac.as_f64().ok_or_else(|| {
            TimetagError::MalformedMessage(format!("fractional seconds must be numeric, got {frac:?}"))
        })?;
        RadioTime::checked_new(secs, frac).ok_or_else(|| {
            TimetagError::MalformedMessage(format!("time ({secs}, {frac}) is not representable"))
        })
    }
}

impl From<RadioTime> for Value {
    /// `(seconds . fraction)`
    fn from(t: RadioTime) -> Self {
        Value::pair(Value::U64(t.secs()), Value::F64(t.frac()))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::F64(v)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::U64(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Symbol(v.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_radio_time_from_pair_and_tuple() {
        let pair = Value::pair(Value::U64(12), Value::F64(0.5));
        assert_eq!(pair.radio_time().unwrap(), RadioTime::new(12, 0.5));

        let tuple = Value::tuple([Value::U64(3), Value::F64(0.25), Value::U64(99)]);
        assert_eq!(tuple.radio_time().unwrap(), RadioTime::new(3, 0.25));
    }

    #[test]
    fn test_radio_time_rejects_bad_shapes() {
        assert!(Value::F64(1.0).radio_time().is_err());
        assert!(Value::pair(Value::F64(1.0), Value::F64(0.5)).radio_time().is_err());
        assert!(Value::pair(Value::U64(1), Value::symbol("x")).radio_time().is_err());
        assert!(Value::tuple([Value::U64(1)]).radio_time().is_err());
        assert!(Value::pair(Value::U64(1), Value::F64(1e40)).radio_time().is_err());
        assert!(Value::pair(Value::U64(u64::MAX), Value::F64(-1e300)).radio_time().is_err());
    }

    #[test]
    fn test_dict_entries() {
        let msg = Value::dict()
            .with_entry("freq", Value::F64(100.0))
            .with_entry("time", RadioTime::new(1, 0.0).into());

        assert_eq!(msg.dict_ref("freq").and_then(Value::as_f64), Some(100.0));
        assert!(msg.dict_ref("time").unwrap().is_pair());
        assert!(msg.dict_ref("missing").is_none());
        assert!(Value::U64(1).dict_ref("freq").is_none());
    }
}
