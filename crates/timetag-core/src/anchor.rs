//! Correlation anchor - the affine map between sample clock and radio time
//!
//! For any sample `s` processed before the next re-anchoring:
//! `time(s) = time + (s - sample) / rate`

use serde::{Deserialize, Serialize};

use crate::{RadioTime, SampleIndex};

/// Reference point binding a sample index to a radio time at a known rate
///
/// Re-anchoring builds a complete new value and replaces the old one;
/// an anchor is never partially updated.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CorrelationAnchor {
    /// Sample index the anchor is pinned to
    pub sample: SampleIndex,
    /// Radio time of `sample`
    pub time: RadioTime,
    /// Samples per second
    pub rate: f64,
}

impl CorrelationAnchor {
    pub fn new(sample: SampleIndex, time: RadioTime, rate: f64) -> Self {
        CorrelationAnchor { sample, time, rate }
    }

    /// Anchor at sample 0, time 0
    pub fn origin(rate: f64) -> Self {
        Self::new(0, RadioTime::ZERO, rate)
    }

    /// Signed seconds between the anchor sample and `sample`
    #[inline]
    pub fn seconds_from_anchor(&self, sample: SampleIndex) -> f64 {
        (i128::from(sample) - i128::from(self.sample)) as f64 / self.rate
    }

    /// Radio time of `sample`, or `None` when the map would place it
    /// before time zero
    pub fn time_at(&self, sample: SampleIndex) -> Option<RadioTime> {
        self.time.checked_add_secs(self.seconds_from_anchor(sample))
    }

    /// Nearest sample index at `time`, or `None` when `time` precedes the
    /// anchor
    pub fn sample_at(&self, time: RadioTime) -> Option<SampleIndex> {
        let elapsed = time.secs_since(self.time);
        if elapsed < 0.0 {
            return None;
        }
        let samples = (elapsed * self.rate).round();
        if samples >= u64::MAX as f64 {
            return Some(SampleIndex::MAX);
        }
        Some(self.sample.saturating_add(samples as u64))
    }

    /// Same affine line, pinned at a different sample
    pub fn reproject(&self, sample: SampleIndex) -> Option<CorrelationAnchor> {
        self.time_at(sample)
            .map(|time| CorrelationAnchor::new(sample, time, self.rate))
    }

    /// Same anchor point with a new rate
    pub fn with_rate(self, rate: f64) -> Self {
        CorrelationAnchor { rate, ..self }
    }

    /// Same anchor sample with its time shifted by `delta` seconds
    pub fn shifted(self, delta: f64) -> Option<Self> {
        self.time
            .checked_add_secs(delta)
            .map(|time| CorrelationAnchor { time, ..self })
    }
}
