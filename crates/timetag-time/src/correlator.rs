//! Time correlator - sample index <-> radio time, host clock alignment
//!
//! Two anchors are kept:
//! - the live anchor, used for every conversion, re-pinned to the host
//!   clock's view of the stream at the start of each work pass and replaced
//!   when a hardware time tag arrives
//! - the reference anchor, the last hardware time tag seen, against which
//!   host clock drift is measured on passes without a tag
//!
//! The host clock is mapped onto radio time by a scalar offset:
//! `radio_now = host_now + host_offset`.

use timetag_core::{
    validate_rate, CorrelationAnchor, RadioTime, SampleIndex, TimetagError, TimetagResult,
};
use tracing::{debug, warn};

/// Drift correction tuning
///
/// Divergences larger than `threshold` seconds pull the host offset a
/// `gain` fraction of the way towards the hardware estimate.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DriftConfig {
    pub threshold: f64,
    pub gain: f64,
}

impl Default for DriftConfig {
    fn default() -> Self {
        DriftConfig {
            threshold: 200e-6,
            gain: 0.1,
        }
    }
}

impl DriftConfig {
    pub fn validate(&self) -> TimetagResult<()> {
        if !(self.threshold.is_finite() && self.threshold >= 0.0) {
            return Err(TimetagError::InvalidConfig(format!(
                "drift threshold must be a non-negative number of seconds, got {}",
                self.threshold
            )));
        }
        if !(0.0..=1.0).contains(&self.gain) {
            return Err(TimetagError::InvalidConfig(format!(
                "drift gain must be within [0, 1], got {}",
                self.gain
            )));
        }
        Ok(())
    }
}

/// Sample/time correlation for one stream
#[derive(Clone, Debug)]
pub struct TimeCorrelator {
    anchor: CorrelationAnchor,
    reference: CorrelationAnchor,
    host_offset: f64,
    drift: DriftConfig,
}

impl TimeCorrelator {
    /// Correlator anchored at sample 0, time 0
    pub fn new(rate: f64, drift: DriftConfig) -> TimetagResult<Self> {
        Self::with_origin(rate, RadioTime::ZERO, drift)
    }

    /// Correlator anchored at sample 0, time `origin`
    pub fn with_origin(rate: f64, origin: RadioTime, drift: DriftConfig) -> TimetagResult<Self> {
        let rate = validate_rate(rate)?;
        drift.validate()?;
        let anchor = CorrelationAnchor::new(0, origin, rate);
        Ok(TimeCorrelator {
            anchor,
            reference: anchor,
            host_offset: 0.0,
            drift,
        })
    }

    #[inline]
    pub fn rate(&self) -> f64 {
        self.anchor.rate
    }

    pub fn anchor(&self) -> CorrelationAnchor {
        self.anchor
    }

    /// Last hardware time reference
    pub fn reference(&self) -> CorrelationAnchor {
        self.reference
    }

    /// Seconds added to host time to obtain radio time
    pub fn host_offset(&self) -> f64 {
        self.host_offset
    }

    pub fn drift_config(&self) -> DriftConfig {
        self.drift
    }

    /// Change the sample rate, keeping both anchor points
    pub fn set_rate(&mut self, rate: f64) -> TimetagResult<()> {
        let rate = validate_rate(rate)?;
        self.anchor = self.anchor.with_rate(rate);
        self.reference = self.reference.with_rate(rate);
        Ok(())
    }

    pub fn set_drift_config(&mut self, drift: DriftConfig) -> TimetagResult<()> {
        drift.validate()?;
        self.drift = drift;
        Ok(())
    }

    pub fn set_drift_gain(&mut self, gain: f64) -> TimetagResult<()> {
        self.set_drift_config(DriftConfig { gain, ..self.drift })
    }

    /// Align the host clock so radio time reads zero at `host_now`
    pub fn start(&mut self, host_now: RadioTime) {
        self.host_offset = -host_now.as_secs_f64();
    }

    /// Radio time corresponding to a host clock reading
    pub fn radio_now(&self, host_now: RadioTime) -> RadioTime {
        match host_now.checked_add_secs(self.host_offset) {
            Some(t) => t,
            None => {
                warn!(
                    host = %host_now,
                    offset = self.host_offset,
                    "host clock maps before radio time zero, clamping"
                );
                RadioTime::ZERO
            }
        }
    }

    /// Pin the live anchor to the host clock's view of `end_sample`
    ///
    /// Called at the start of a work pass with the first sample index after
    /// the pass. Returns the radio time assigned to `end_sample`.
    pub fn begin_pass(&mut self, end_sample: SampleIndex, host_now: RadioTime) -> RadioTime {
        let now = self.radio_now(host_now);
        self.anchor = CorrelationAnchor::new(end_sample, now, self.rate());
        now
    }

    /// Re-anchor to a hardware time tag
    ///
    /// Returns the correction in seconds: how far the previous map's
    /// prediction for `sample` was ahead of the hardware time. The host
    /// offset absorbs the correction, so every pending host-clock deadline
    /// should move by the same amount.
    pub fn on_hardware_tag(&mut self, sample: SampleIndex, time: RadioTime) -> f64 {
        let rate = self.rate();
        let shift =
            self.anchor.time.secs_since(time) + self.anchor.seconds_from_anchor(sample);
        let reference = CorrelationAnchor::new(sample, time, rate);

        // Stream start sets the map directly; later tags keep the live
        // anchor sample and move its time onto the hardware line.
        let anchor = if sample == 0 {
            reference
        } else {
            reference.reproject(self.anchor.sample).unwrap_or(reference)
        };

        debug!(sample, time = %time, shift, "hardware time tag");
        self.anchor = anchor;
        self.reference = reference;
        self.host_offset -= shift;
        shift
    }

    /// Set the live anchor without touching the host alignment
    pub fn set_anchor(&mut self, sample: SampleIndex, time: RadioTime) {
        self.anchor = CorrelationAnchor::new(sample, time, self.rate());
    }

    /// Radio time of `sample`, clamped at zero
    pub fn time_at(&self, sample: SampleIndex) -> RadioTime {
        match self.anchor.time_at(sample) {
            Some(t) => t,
            None => {
                warn!(sample, anchor = ?self.anchor, "sample maps before time zero, clamping");
                RadioTime::ZERO
            }
        }
    }

    /// Nearest sample at `time`, clamped to the anchor sample
    pub fn sample_at(&self, time: RadioTime) -> SampleIndex {
        match self.anchor.sample_at(time) {
            Some(s) => s,
            None => {
                debug!(time = %time, anchor = ?self.anchor, "time precedes anchor, clamping");
                self.anchor.sample
            }
        }
    }

    /// Compare host-derived and hardware-derived radio time and nudge the
    /// host offset when they diverge by more than the threshold
    ///
    /// Returns the applied correction.
    pub fn estimate_drift(&mut self, observed: RadioTime, expected: RadioTime) -> Option<f64> {
        let error = expected.secs_since(observed);
        // NaN never passes
        if !(error.abs() > self.drift.threshold) {
            return None;
        }

        let delta = self.drift.gain * error;
        self.host_offset += delta;
        match self.anchor.shifted(delta) {
            Some(anchor) => self.anchor = anchor,
            None => warn!(delta, "drift correction would move anchor before zero"),
        }
        debug!(error, delta, offset = self.host_offset, "host clock drift correction");
        Some(delta)
    }

    /// Drift check for a pass without a hardware time tag
    pub fn correct_drift(&mut self, end_sample: SampleIndex, host_now: RadioTime) -> Option<f64> {
        let expected = self
            .reference
            .time_at(end_sample)
            .unwrap_or(RadioTime::ZERO);
        let observed = self.radio_now(host_now);
        self.estimate_drift(observed, expected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const RATE: f64 = 1_000_000.0;

    fn correlator() -> TimeCorrelator {
        TimeCorrelator::new(RATE, DriftConfig::default()).unwrap()
    }

    fn close(a: RadioTime, b: RadioTime) -> bool {
        a.secs_since(b).abs() < 1e-9
    }

    #[test]
    fn test_rejects_bad_rate() {
        assert!(TimeCorrelator::new(0.0, DriftConfig::default()).is_err());
        assert!(TimeCorrelator::new(f64::NAN, DriftConfig::default()).is_err());

        let mut c = correlator();
        assert!(c.set_rate(-1.0).is_err());
        assert_eq!(c.rate(), RATE);
    }

    #[test]
    fn test_rejects_bad_drift_config() {
        let bad_gain = DriftConfig {
            gain: 1.5,
            ..DriftConfig::default()
        };
        assert!(TimeCorrelator::new(RATE, bad_gain).is_err());

        let mut c = correlator();
        assert!(c.set_drift_gain(-0.1).is_err());
        assert!(c.set_drift_gain(0.5).is_ok());
        assert_eq!(c.drift_config().gain, 0.5);
    }

    #[test]
    fn test_first_tag_sets_anchor() {
        let mut c = correlator();
        c.on_hardware_tag(0, RadioTime::new(100, 0.0));

        assert!(close(c.time_at(500_000), RadioTime::new(100, 0.5)));
        assert_eq!(c.sample_at(RadioTime::new(100, 0.5)), 500_000);
    }

    #[test]
    fn test_later_tag_reprojects_onto_live_anchor() {
        let mut c = correlator();
        c.begin_pass(1_000, RadioTime::ZERO);
        c.on_hardware_tag(500, RadioTime::new(7, 0.0));

        let anchor = c.anchor();
        assert_eq!(anchor.sample, 1_000);
        assert!(close(anchor.time, RadioTime::new(7, 0.0005)));
        assert_eq!(c.reference().sample, 500);
    }

    #[test]
    fn test_tag_shift_moves_host_offset() {
        let mut c = correlator();
        c.start(RadioTime::new(1_000, 0.0));
        let now = c.begin_pass(1_000, RadioTime::new(1_000, 0.001));
        assert!(close(now, RadioTime::new(0, 0.001)));

        let shift = c.on_hardware_tag(0, RadioTime::new(100, 0.0));
        assert!((shift + 100.0).abs() < 1e-9);
        assert!((c.host_offset() + 900.0).abs() < 1e-9);
        assert!(close(
            c.radio_now(RadioTime::new(1_000, 0.5)),
            RadioTime::new(100, 0.5)
        ));
    }

    #[test]
    fn test_negative_time_clamps_to_zero() {
        let mut c = correlator();
        c.on_hardware_tag(1_000, RadioTime::new(0, 0.0005));
        assert_eq!(c.time_at(0), RadioTime::ZERO);
    }

    #[test]
    fn test_extreme_rate_clamps_instead_of_overflowing() {
        let mut c = correlator();
        c.on_hardware_tag(0, RadioTime::new(10, 0.0));
        c.set_rate(1e-300).unwrap();
        assert_eq!(c.time_at(1_000), RadioTime::ZERO);

        let shift = c.on_hardware_tag(5_000, RadioTime::new(20, 0.0));
        assert!(shift > 0.0);
        assert_eq!(c.radio_now(RadioTime::new(1_000, 0.0)), RadioTime::ZERO);
        // Both sides clamp to zero, so there is nothing to correct
        assert!(c.correct_drift(10_000, RadioTime::new(1_000, 0.0)).is_none());
    }

    #[test]
    fn test_sample_before_anchor_clamps() {
        let mut c = correlator();
        c.on_hardware_tag(0, RadioTime::new(10, 0.0));
        c.begin_pass(2_000_000, RadioTime::new(12, 0.0));
        assert_eq!(c.sample_at(RadioTime::new(11, 0.0)), 2_000_000);
    }

    #[test]
    fn test_drift_below_threshold_ignored() {
        let mut c = correlator();
        let observed = RadioTime::new(10, 0.0);
        assert_eq!(c.estimate_drift(observed, RadioTime::new(10, 0.0001)), None);
        assert_eq!(c.host_offset(), 0.0);
    }

    #[test]
    fn test_drift_above_threshold_applies_gain() {
        let mut c = correlator();
        c.set_anchor(0, RadioTime::new(10, 0.0));
        let observed = RadioTime::new(10, 0.0);
        let delta = c.estimate_drift(observed, RadioTime::new(10, 0.001)).unwrap();

        assert!((delta - 0.0001).abs() < 1e-12);
        assert!((c.host_offset() - 0.0001).abs() < 1e-12);
        assert!(close(c.anchor().time, RadioTime::new(10, 0.0001)));
    }

    #[test]
    fn test_correct_drift_against_reference() {
        let mut c = correlator();
        c.start(RadioTime::new(1_000, 0.0));

        // Host clock ran 500us fast over one second of samples
        let delta = c
            .correct_drift(1_000_000, RadioTime::new(1_001, 0.0005))
            .unwrap();
        assert!((delta + 0.00005).abs() < 1e-9);

        // On time: nothing to do
        assert_eq!(c.correct_drift(2_000_000, RadioTime::new(1_002, 0.0)), None);
    }

    #[test]
    fn test_set_rate_keeps_anchor_point() {
        let mut c = correlator();
        c.on_hardware_tag(0, RadioTime::new(5, 0.0));
        c.set_rate(2_000_000.0).unwrap();
        assert!(close(c.time_at(1_000_000), RadioTime::new(5, 0.5)));
    }

    proptest! {
        #[test]
        fn prop_consistent_tags_keep_affine_map(
            s1 in 0u64..100_000_000,
            gap in 1u64..100_000_000,
            secs in 1u64..1_000_000,
            rate in 10_000.0f64..20_000_000.0,
        ) {
            let mut c = TimeCorrelator::new(rate, DriftConfig::default()).unwrap();
            let t1 = RadioTime::new(secs, 0.0);
            let s2 = s1 + gap;
            let t2 = t1.checked_add_secs(gap as f64 / rate).unwrap();

            c.on_hardware_tag(s1, t1);
            c.on_hardware_tag(s2, t2);

            let diff = c.time_at(s2).secs_since(c.time_at(s1));
            prop_assert!((diff - gap as f64 / rate).abs() < 1e-6);
        }

        #[test]
        fn prop_round_trip_after_anchor(
            offset in 0u64..1_000_000_000,
            rate in 10_000.0f64..20_000_000.0,
        ) {
            let mut c = TimeCorrelator::new(rate, DriftConfig::default()).unwrap();
            c.on_hardware_tag(0, RadioTime::new(1_700_000_000, 0.125));
            prop_assert_eq!(c.sample_at(c.time_at(offset)), offset);
        }

        #[test]
        fn prop_drift_threshold_and_gain(
            error_us in -5_000i64..5_000,
            gain in 0.01f64..1.0,
        ) {
            let drift = DriftConfig { threshold: 200e-6, gain };
            let mut c = TimeCorrelator::new(RATE, drift).unwrap();
            let observed = RadioTime::new(50, 0.5);
            let error = error_us as f64 * 1e-6;
            let expected = observed.checked_add_secs(error).unwrap();

            let applied = c.estimate_drift(observed, expected);
            if error.abs() > 250e-6 {
                prop_assert!((applied.unwrap() - gain * error).abs() < 1e-9);
                prop_assert!((c.host_offset() - gain * error).abs() < 1e-9);
            } else if error.abs() < 150e-6 {
                prop_assert_eq!(applied, None);
                prop_assert_eq!(c.host_offset(), 0.0);
            }
        }
    }
}
