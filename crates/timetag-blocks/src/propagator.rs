//! Time tag propagation
//!
//! Hardware `rx_time` tags only appear at stream start and after
//! discontinuities. This block re-publishes each one under its own key with
//! the sample offset and rate attached, both as a stream tag and as a `time`
//! message, and can add synthetic time tags every `interval` samples by
//! extrapolating the last reference.

use parking_lot::Mutex;
use timetag_core::{keys, RadioTime, SampleIndex, TimeEvent, TimetagResult, Value};
use timetag_time::{DriftConfig, TimeCorrelator};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{error, info, trace, warn};

use crate::config::TagOffsetConfig;
use crate::stream::{
    unknown_port, Block, MessageHandler, MessagePort, WorkOutput, WorkStatus, WorkWindow,
};

struct PropagatorState {
    correlator: TimeCorrelator,
    key: String,
    /// 0 disables periodic tags
    interval: u64,
    next_tag: SampleIndex,
    /// First sample after the last window seen
    total_read: SampleIndex,
}

impl PropagatorState {
    fn event(&self, offset: SampleIndex, time: RadioTime) -> TimeEvent {
        TimeEvent {
            key: self.key.clone(),
            time,
            offset,
            rate: self.correlator.rate(),
        }
    }
}

/// Re-publishes hardware time references and adds periodic time tags
pub struct TagTimeOffsetPropagator {
    state: Mutex<PropagatorState>,
    time_port: MessagePort<TimeEvent>,
}

impl TagTimeOffsetPropagator {
    pub fn new(config: TagOffsetConfig) -> TimetagResult<Self> {
        config.validate()?;
        let correlator = TimeCorrelator::new(config.sample_rate, DriftConfig::default())?;
        info!(interval = config.interval, key = %config.key, "setting up time tagger");
        Ok(TagTimeOffsetPropagator {
            state: Mutex::new(PropagatorState {
                correlator,
                key: config.key,
                interval: config.interval,
                next_tag: config.interval,
                total_read: 0,
            }),
            time_port: MessagePort::new(keys::TIME),
        })
    }

    pub fn time_port(&self) -> &MessagePort<TimeEvent> {
        &self.time_port
    }

    pub fn subscribe(&self) -> UnboundedReceiver<TimeEvent> {
        self.time_port.subscribe()
    }

    /// Samples between synthetic tags; 0 disables them
    pub fn set_interval(&self, interval: u64) {
        let mut st = self.state.lock();
        st.interval = interval;
        if interval > 0 {
            st.next_tag = st.total_read.saturating_add(interval);
        }
    }

    pub fn interval(&self) -> u64 {
        self.state.lock().interval
    }

    pub fn set_key(&self, key: &str) {
        if key.is_empty() {
            warn!("ignoring empty time tag key");
            return;
        }
        self.state.lock().key = key.to_string();
    }

    pub fn key(&self) -> String {
        self.state.lock().key.clone()
    }

    pub fn set_rate(&self, rate: f64) {
        if let Err(e) = self.state.lock().correlator.set_rate(rate) {
            warn!(%e, "sample rate unchanged");
        }
    }

    /// Tag one window; tags are appended to `output`
    pub fn process<T>(&self, window: &WorkWindow<'_, T>, output: &mut WorkOutput<T>) {
        let mut st = self.state.lock();
        let total = window.end();
        st.total_read = total;

        for tag in window.tags_with_key(keys::RX_TIME) {
            let time = match tag.value.radio_time() {
                Ok(time) => time,
                Err(e) => {
                    error!(%e, offset = tag.offset, "invalid rx_time tag");
                    continue;
                }
            };
            st.correlator.set_anchor(tag.offset, time);
            let event = st.event(tag.offset, time);
            output.add_item_tag(tag.offset, st.key.clone(), event.tag_value());
            self.time_port.publish(event);
            st.next_tag = tag.offset.saturating_add(st.interval);
        }

        if st.interval == 0 {
            return;
        }
        while st.next_tag < total {
            let offset = st.next_tag;
            if offset >= window.start() {
                let event = st.event(offset, st.correlator.time_at(offset));
                trace!(offset, time = %event.time, "periodic time tag");
                output.add_item_tag(offset, st.key.clone(), event.tag_value());
                st.next_tag = offset.saturating_add(st.interval);
            } else {
                warn!(
                    offset,
                    window_start = window.start(),
                    "time tag due in a previous window, skipping to the next window"
                );
                st.next_tag = total;
            }
        }
    }
}

impl<T: Clone + Send + Sync> Block<T> for TagTimeOffsetPropagator {
    fn work(&self, input: &WorkWindow<'_, T>, output: &mut WorkOutput<T>) -> WorkStatus {
        self.process(input, output);
        output.items.extend_from_slice(input.items);
        WorkStatus::sync(input.len())
    }
}

impl MessageHandler for TagTimeOffsetPropagator {
    fn handle_message(&self, port: &str, msg: &Value) {
        match (port, msg.as_u64()) {
            ("interval", Some(interval)) => self.set_interval(interval),
            ("interval", None) => error!(?msg, "tag interval must be an unsigned integer"),
            _ => unknown_port("tag_time_offset_propagator", port),
        }
    }
}
