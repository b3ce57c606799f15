//! Retune follower - the consumer side of retune tags
//!
//! A frequency translator must switch frequency exactly at the tagged
//! sample. A pass therefore never consumes past a pending retune tag: it
//! stops just before it, the next pass starts on the tagged sample and
//! applies it, and the pass after that rebuilds the translation state and
//! produces nothing so the new configuration takes effect on the tagged
//! sample itself.
//!
//! The filter kernel is not part of this block; it tracks the composite
//! taps and derotator phase and passes the decimated input through.

use std::f64::consts::{PI, TAU};

use parking_lot::Mutex;
use timetag_core::{keys, FrequencyChange, SampleIndex, TimetagResult, Value};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, error, info, warn};

use crate::config::RetuneFollowerConfig;
use crate::stream::{
    unknown_port, Block, MessageHandler, MessagePort, WorkOutput, WorkStatus, WorkWindow,
};

struct FollowerState {
    sample_rate: f64,
    decimation: usize,
    taps: Vec<f64>,
    center_freq: f64,
    tag_key: String,
    /// Explicit phase to load on the next rebuild
    forced_phase: Option<f64>,
    /// Derotator angle (radians)
    phase: f64,
    phase_incr: f64,
    composite_taps: Vec<[f64; 2]>,
    updated: bool,
    tag_applied: bool,
    nitems_written: SampleIndex,
}

impl FollowerState {
    fn apply(&mut self, change: FrequencyChange) {
        self.center_freq = change.freq;
        if change.phase.is_some() {
            self.forced_phase = change.phase;
        }
        self.updated = true;
    }

    fn rebuild(&mut self) {
        let fw_t0 = TAU * self.center_freq / self.sample_rate;
        self.composite_taps = self
            .taps
            .iter()
            .enumerate()
            .map(|(i, tap)| {
                let angle = i as f64 * fw_t0;
                [tap * angle.cos(), tap * angle.sin()]
            })
            .collect();
        if let Some(phase) = self.forced_phase.take() {
            self.phase = wrap(-phase);
        }
        self.phase_incr = -fw_t0 * self.decimation as f64;
    }
}

fn wrap(angle: f64) -> f64 {
    let wrapped = angle.rem_euclid(TAU);
    if wrapped > PI {
        wrapped - TAU
    } else {
        wrapped
    }
}

/// Applies retune tags at exactly the tagged sample
pub struct RetuneFollower {
    state: Mutex<FollowerState>,
    applied: MessagePort<FrequencyChange>,
}

impl RetuneFollower {
    pub fn new(config: RetuneFollowerConfig) -> TimetagResult<Self> {
        config.validate()?;
        let mut state = FollowerState {
            sample_rate: config.sample_rate,
            decimation: config.decimation,
            taps: config.taps,
            center_freq: config.center_freq,
            tag_key: config.tag_key,
            forced_phase: None,
            phase: 0.0,
            phase_incr: 0.0,
            composite_taps: Vec::new(),
            updated: false,
            tag_applied: false,
            nitems_written: 0,
        };
        state.rebuild();
        Ok(RetuneFollower {
            state: Mutex::new(state),
            applied: MessagePort::new("applied"),
        })
    }

    /// Frequency changes as they take effect
    pub fn subscribe(&self) -> UnboundedReceiver<FrequencyChange> {
        self.applied.subscribe()
    }

    pub fn center_freq(&self) -> f64 {
        self.state.lock().center_freq
    }

    /// Derotator angle for the next output sample
    pub fn phase(&self) -> f64 {
        self.state.lock().phase
    }

    pub fn composite_taps(&self) -> Vec<[f64; 2]> {
        self.state.lock().composite_taps.clone()
    }

    pub fn decimation(&self) -> usize {
        self.state.lock().decimation
    }

    pub fn set_center_freq(&self, freq: f64) {
        if !freq.is_finite() {
            warn!(freq, "ignoring non-finite center frequency");
            return;
        }
        self.state.lock().apply(FrequencyChange::new(freq));
    }

    pub fn set_decimation(&self, decimation: usize) {
        if decimation == 0 {
            warn!("ignoring zero decimation");
            return;
        }
        let mut st = self.state.lock();
        st.decimation = decimation;
        st.updated = true;
    }

    pub fn set_rate(&self, rate: f64) {
        if !(rate.is_finite() && rate > 0.0) {
            warn!(rate, "sample rate unchanged");
            return;
        }
        let mut st = self.state.lock();
        st.sample_rate = rate;
        st.updated = true;
    }

    pub fn set_taps(&self, taps: Vec<f64>) {
        if taps.is_empty() {
            warn!("ignoring empty filter taps");
            return;
        }
        let mut st = self.state.lock();
        st.taps = taps;
        st.updated = true;
    }

    /// Handle a `{freq: f}` or `{freq: (f . phase)}` message
    pub fn handle_set_center_freq(&self, msg: &Value) {
        let Some(freq) = msg.dict_ref(keys::FREQ) else {
            error!(?msg, "center frequency message must be a dictionary with a freq entry");
            return;
        };
        match FrequencyChange::from_value(freq) {
            Ok(change) => self.state.lock().apply(change),
            Err(e) => error!(%e, "ignoring center frequency message"),
        }
    }

    pub fn process<T: Clone>(
        &self,
        window: &WorkWindow<'_, T>,
        output: &mut WorkOutput<T>,
    ) -> WorkStatus {
        let mut st = self.state.lock();
        let decim = st.decimation;
        let noutput = window.len() / decim;
        if noutput == 0 {
            return WorkStatus::default();
        }

        let start = window.start();
        let span_end = start + (noutput * decim) as u64;
        let mut consumed = noutput * decim;

        let key = st.tag_key.clone();
        let mut tags = window.tags_in_range(&key, start, span_end);
        if let Some(first) = tags.next() {
            if first.offset == start {
                if !st.tag_applied {
                    match FrequencyChange::from_value(&first.value) {
                        Ok(change) if change.phase.is_some() || change.freq != st.center_freq => {
                            info!(
                                freq = change.freq,
                                phase = ?change.phase,
                                sample = first.offset,
                                "synchronously retuning"
                            );
                            st.apply(change);
                            st.tag_applied = true;
                        }
                        Ok(_) => debug!(sample = first.offset, "retune tag matches current frequency"),
                        Err(e) => error!(%e, sample = first.offset, "invalid frequency tag"),
                    }
                } else {
                    // Applied on the previous pass; ready for the next tag
                    st.tag_applied = false;
                }
                if let Some(second) = tags.next() {
                    consumed = (second.offset - start) as usize;
                }
            } else {
                consumed = (first.offset - start) as usize;
            }
        }

        if st.updated {
            st.updated = false;
            st.rebuild();
            let change = FrequencyChange::new(st.center_freq);
            if !st.tag_applied {
                output.add_item_tag(st.nitems_written, keys::FREQ, Value::F64(st.center_freq));
            }
            debug!(freq = st.center_freq, decimation = st.decimation, "translator rebuilt");
            self.applied.publish(change);
            return WorkStatus::default();
        }

        let produced = consumed.div_ceil(decim);
        output.items.extend(
            window.items[..consumed]
                .iter()
                .step_by(decim)
                .take(produced)
                .cloned(),
        );
        st.phase = wrap(st.phase + st.phase_incr * produced as f64);
        st.nitems_written += produced as u64;
        WorkStatus { consumed, produced }
    }
}

impl<T: Clone + Send + Sync> Block<T> for RetuneFollower {
    fn work(&self, input: &WorkWindow<'_, T>, output: &mut WorkOutput<T>) -> WorkStatus {
        self.process(input, output)
    }
}

impl MessageHandler for RetuneFollower {
    fn handle_message(&self, port: &str, msg: &Value) {
        match port {
            keys::FREQ => self.handle_set_center_freq(msg),
            _ => unknown_port("retune_follower", port),
        }
    }
}
