//! Time primitives for timetag
//!
//! Two time bases meet here:
//! - SampleIndex: the stream's sample clock, a plain monotonically
//!   non-decreasing count of samples since block start
//! - RadioTime: absolute time as whole seconds plus a fractional part,
//!   aligned to the hardware time reference

use std::cmp::Ordering;
use std::ops::Sub;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Count of samples produced/consumed on a stream since block start
pub type SampleIndex = u64;

/// Absolute radio time: whole seconds and a fractional part in [0, 1)
///
/// INVARIANT: `frac` is always normalized into [0, 1) with carry into `secs`.
#[derive(Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RadioTime {
    secs: u64,
    frac: f64,
}

impl RadioTime {
    pub const ZERO: RadioTime = RadioTime { secs: 0, frac: 0.0 };

    /// Build a normalized time, saturating at zero if the parts describe
    /// a negative instant
    pub fn new(secs: u64, frac: f64) -> Self {
        Self::checked_new(secs, frac).unwrap_or(RadioTime::ZERO)
    }

    /// Build a normalized time, or `None` if the parts describe a negative
    /// (or non-finite) instant
    pub fn checked_new(secs: u64, frac: f64) -> Option<Self> {
        Self::from_parts(i128::from(secs), frac)
    }

    /// Convert floating seconds, saturating negative values at zero
    pub fn from_secs_f64(secs: f64) -> Self {
        Self::try_from_secs_f64(secs).unwrap_or(RadioTime::ZERO)
    }

    pub fn try_from_secs_f64(secs: f64) -> Option<Self> {
        if !secs.is_finite() {
            return None;
        }
        let whole = secs.floor();
        Self::from_parts(whole_secs(whole)?, secs - whole)
    }

    /// Time since the UNIX epoch as reported by a `Duration`
    pub fn from_duration(d: Duration) -> Self {
        RadioTime {
            secs: d.as_secs(),
            frac: f64::from(d.subsec_nanos()) * 1e-9,
        }
    }

    fn from_parts(whole: i128, frac: f64) -> Option<Self> {
        if !frac.is_finite() {
            return None;
        }
        let carry = frac.floor();
        let mut frac = frac - carry;
        let mut whole = whole.checked_add(whole_secs(carry)?)?;
        // frac - floor(frac) can round up to exactly 1.0 for tiny negatives
        if frac >= 1.0 {
            frac -= 1.0;
            whole = whole.checked_add(1)?;
        }
        if whole < 0 || whole > i128::from(u64::MAX) {
            return None;
        }
        Some(RadioTime {
            secs: whole as u64,
            frac,
        })
    }

    #[inline]
    pub fn secs(self) -> u64 {
        self.secs
    }

    #[inline]
    pub fn frac(self) -> f64 {
        self.frac
    }

    /// Collapse to floating seconds (loses precision for large epochs)
    #[inline]
    pub fn as_secs_f64(self) -> f64 {
        self.secs as f64 + self.frac
    }

    #[inline]
    pub fn is_zero(self) -> bool {
        self.secs == 0 && self.frac == 0.0
    }

    /// Shift by a signed number of seconds, `None` if the result would be
    /// negative
    pub fn checked_add_secs(self, delta: f64) -> Option<Self> {
        if !delta.is_finite() {
            return None;
        }
        let whole = delta.trunc();
        let secs = i128::from(self.secs).checked_add(whole_secs(whole)?)?;
        Self::from_parts(secs, self.frac + (delta - whole))
    }

    /// Shift by a signed number of seconds, clamping at zero
    pub fn saturating_add_secs(self, delta: f64) -> Self {
        self.checked_add_secs(delta).unwrap_or(RadioTime::ZERO)
    }

    /// Signed seconds from `earlier` to `self`
    ///
    /// Whole and fractional parts are differenced separately so large
    /// epochs keep sub-microsecond resolution.
    #[inline]
    pub fn secs_since(self, earlier: RadioTime) -> f64 {
        (i128::from(self.secs) - i128::from(earlier.secs)) as f64 + (self.frac - earlier.frac)
    }
}

/// Integral seconds as an `i128`, `None` beyond the `u64` range
fn whole_secs(whole: f64) -> Option<i128> {
    if whole.is_finite() && whole.abs() <= u64::MAX as f64 {
        Some(whole as i128)
    } else {
        None
    }
}

impl PartialOrd for RadioTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match self.secs.cmp(&other.secs) {
            Ordering::Equal => self.frac.partial_cmp(&other.frac),
            ord => Some(ord),
        }
    }
}

impl Sub<RadioTime> for RadioTime {
    type Output = f64;

    #[inline]
    fn sub(self, rhs: RadioTime) -> Self::Output {
        self.secs_since(rhs)
    }
}

impl std::fmt::Debug for RadioTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "rt({}+{:.9})", self.secs, self.frac)
    }
}

impl std::fmt::Display for RadioTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}+{:.9}s", self.secs, self.frac)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_fraction_carry() {
        let t = RadioTime::new(10, 1.25);
        assert_eq!(t.secs(), 11);
        assert!((t.frac() - 0.25).abs() < 1e-12);

        let t = RadioTime::new(10, -0.25);
        assert_eq!(t.secs(), 9);
        assert!((t.frac() - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_negative_saturates() {
        assert_eq!(RadioTime::new(0, -0.5), RadioTime::ZERO);
        assert!(RadioTime::checked_new(0, -0.5).is_none());
        assert!(RadioTime::ZERO.checked_add_secs(-1e-9).is_none());
        assert_eq!(RadioTime::from_secs_f64(-3.0), RadioTime::ZERO);
    }

    #[test]
    fn test_out_of_range_parts_rejected() {
        assert!(RadioTime::checked_new(1, 1e40).is_none());
        assert!(RadioTime::checked_new(u64::MAX, 1.0).is_none());
        assert!(RadioTime::checked_new(0, -1e40).is_none());
        assert!(RadioTime::try_from_secs_f64(1e300).is_none());
        assert!(RadioTime::try_from_secs_f64(f64::MAX).is_none());
        assert_eq!(RadioTime::from_secs_f64(f64::MIN), RadioTime::ZERO);

        let t = RadioTime::new(100, 0.5);
        assert!(t.checked_add_secs(1e300).is_none());
        assert!(t.checked_add_secs(-1e300).is_none());
        assert!(t.checked_add_secs(f64::MAX).is_none());
    }

    #[test]
    fn test_large_epoch_precision() {
        let epoch = RadioTime::new(1_700_000_000, 0.0);
        let later = epoch.checked_add_secs(0.000_001).unwrap();
        let diff = later - epoch;
        assert!((diff - 0.000_001).abs() < 1e-12);
    }

    #[test]
    fn test_ordering() {
        let a = RadioTime::new(5, 0.9);
        let b = RadioTime::new(6, 0.1);
        assert!(a < b);
        assert!(RadioTime::new(6, 0.2) > b);
    }

    #[test]
    fn test_from_duration() {
        let t = RadioTime::from_duration(Duration::from_millis(2_500));
        assert_eq!(t.secs(), 2);
        assert!((t.frac() - 0.5).abs() < 1e-12);
    }

    proptest! {
        #[test]
        fn prop_frac_always_normalized(secs in 0u64..1_000_000_000, frac in -100.0f64..100.0) {
            if let Some(t) = RadioTime::checked_new(secs, frac) {
                prop_assert!(t.frac() >= 0.0 && t.frac() < 1.0);
                prop_assert!((t.as_secs_f64() - (secs as f64 + frac)).abs() < 1e-6);
            } else {
                prop_assert!((secs as f64 + frac) < 1e-9);
            }
        }

        #[test]
        fn prop_add_then_diff(secs in 0u64..2_000_000_000, frac in 0.0f64..1.0, delta in -1000.0f64..1000.0) {
            let t = RadioTime::new(secs, frac);
            if let Some(u) = t.checked_add_secs(delta) {
                prop_assert!((u.secs_since(t) - delta).abs() < 1e-6);
            }
        }
    }
}
