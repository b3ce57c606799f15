//! Sample-triggered emitter
//!
//! The stream-driven counterpart of the interrupt emitter: no timer thread,
//! the trigger event is published from the work pass that reaches the
//! trigger sample. Precision is bounded by the window size, in exchange for
//! exact agreement with the sample clock.

use parking_lot::Mutex;
use timetag_core::{keys, RadioTime, SampleIndex, TimetagResult, TriggerEvent, Value};
use timetag_time::{DriftConfig, TimeCorrelator};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, error, warn};

use crate::config::PduEmitterConfig;
use crate::interrupt::Trigger;
use crate::stream::{
    unknown_port, Block, MessageHandler, MessagePort, WorkOutput, WorkStatus, WorkWindow,
};

#[derive(Clone, Copy, Debug)]
struct ArmedTrigger {
    sample: SampleIndex,
    time: RadioTime,
}

struct PduEmitterState {
    correlator: TimeCorrelator,
    armed: Option<ArmedTrigger>,
    drop_late: bool,
}

/// Publishes a trigger event when the stream reaches a sample
pub struct SampleTriggeredEmitter {
    state: Mutex<PduEmitterState>,
    trig: MessagePort<TriggerEvent>,
}

impl SampleTriggeredEmitter {
    pub fn new(config: PduEmitterConfig) -> TimetagResult<Self> {
        config.validate()?;
        Ok(SampleTriggeredEmitter {
            state: Mutex::new(PduEmitterState {
                correlator: TimeCorrelator::new(config.sample_rate, DriftConfig::default())?,
                armed: None,
                drop_late: config.drop_late,
            }),
            trig: MessagePort::new(keys::TRIG),
        })
    }

    pub fn trigger_port(&self) -> &MessagePort<TriggerEvent> {
        &self.trig
    }

    pub fn subscribe(&self) -> UnboundedReceiver<TriggerEvent> {
        self.trig.subscribe()
    }

    /// Arm at a sample index or radio time, replacing any armed trigger
    pub fn arm(&self, trigger: Trigger) -> SampleIndex {
        let mut st = self.state.lock();
        let (sample, time) = match trigger {
            Trigger::Sample(sample) => (sample, st.correlator.time_at(sample)),
            Trigger::Time(time) => (st.correlator.sample_at(time), time),
        };
        debug!(sample, time = %time, "trigger armed");
        st.armed = Some(ArmedTrigger { sample, time });
        sample
    }

    pub fn handle_set_time(&self, msg: &Value) {
        match Trigger::from_value(msg) {
            Ok(trigger) => {
                self.arm(trigger);
            }
            Err(e) => error!(%e, "ignoring set time message"),
        }
    }

    pub fn disarm(&self) {
        self.state.lock().armed = None;
    }

    pub fn is_armed(&self) -> bool {
        self.state.lock().armed.is_some()
    }

    pub fn set_drop_late(&self, drop_late: bool) {
        self.state.lock().drop_late = drop_late;
    }

    pub fn set_rate(&self, rate: f64) {
        if let Err(e) = self.state.lock().correlator.set_rate(rate) {
            warn!(%e, "sample rate unchanged");
        }
    }

    /// Fire a due trigger, then take up any hardware time reference
    pub fn process<T>(&self, window: &WorkWindow<'_, T>) {
        let mut st = self.state.lock();

        if let Some(armed) = st.armed {
            if armed.sample < window.end() {
                st.armed = None;
                let late = window.start().saturating_sub(armed.sample);
                if late > 0 && st.drop_late {
                    debug!(sample = armed.sample, late, "dropping late trigger");
                } else {
                    let event = TriggerEvent {
                        trigger_time: armed.time,
                        trigger_sample: armed.sample,
                        late_delta: late as f64 / st.correlator.rate(),
                    };
                    debug!(sample = event.trigger_sample, late, "trigger");
                    self.trig.publish(event);
                }
            }
        }

        for tag in window.tags_with_key(keys::RX_TIME) {
            match tag.value.radio_time() {
                Ok(time) => {
                    st.correlator.on_hardware_tag(tag.offset, time);
                }
                Err(e) => error!(%e, offset = tag.offset, "invalid rx_time tag"),
            }
        }
    }
}

impl<T: Send + Sync> Block<T> for SampleTriggeredEmitter {
    fn work(&self, input: &WorkWindow<'_, T>, _output: &mut WorkOutput<T>) -> WorkStatus {
        self.process(input);
        WorkStatus::sink(input.len())
    }
}

impl MessageHandler for SampleTriggeredEmitter {
    fn handle_message(&self, port: &str, msg: &Value) {
        match port {
            keys::SET => self.handle_set_time(msg),
            keys::DISARM => self.disarm(),
            _ => unknown_port("sample_triggered_emitter", port),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use timetag_core::Tag;

    const RATE: f64 = 1_000_000.0;

    fn emitter(drop_late: bool) -> SampleTriggeredEmitter {
        SampleTriggeredEmitter::new(PduEmitterConfig {
            sample_rate: RATE,
            drop_late,
        })
        .unwrap()
    }

    fn pass(e: &SampleTriggeredEmitter, start: SampleIndex, n: usize, tags: &[Tag]) {
        let items = vec![0i16; n];
        e.process(&WorkWindow::new(start, &items, tags));
    }

    fn rx_time(offset: SampleIndex, secs: u64, frac: f64) -> Tag {
        Tag::new(
            offset,
            keys::RX_TIME,
            Value::tuple([Value::U64(secs), Value::F64(frac)]),
        )
    }

    #[test]
    fn test_fires_in_window_containing_sample() {
        let e = emitter(false);
        let mut rx = e.subscribe();
        e.handle_message(keys::SET, &Value::U64(1_500));

        pass(&e, 0, 1_000, &[]);
        assert!(rx.try_recv().is_err());
        assert!(e.is_armed());

        pass(&e, 1_000, 1_000, &[]);
        let event = rx.try_recv().unwrap();
        assert_eq!(event.trigger_sample, 1_500);
        assert_eq!(event.late_delta, 0.0);
        assert!(!e.is_armed());

        pass(&e, 2_000, 1_000, &[]);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_time_trigger_uses_hardware_reference() {
        let e = emitter(false);
        let mut rx = e.subscribe();
        pass(&e, 0, 1_000, &[rx_time(0, 100, 0.0)]);

        let sample = e.arm(Trigger::Time(RadioTime::new(100, 0.002)));
        assert_eq!(sample, 2_000);

        pass(&e, 1_000, 1_000, &[]);
        assert!(rx.try_recv().is_err());
        pass(&e, 2_000, 1_000, &[]);
        let event = rx.try_recv().unwrap();
        assert_eq!(event.trigger_time, RadioTime::new(100, 0.002));
        assert_eq!(event.trigger_sample, 2_000);
    }

    #[test]
    fn test_later_reference_reprojects_to_origin() {
        let e = emitter(false);
        pass(&e, 0, 10_000, &[rx_time(5_000, 20, 0.5)]);

        assert_eq!(e.arm(Trigger::Time(RadioTime::new(20, 0.5))), 5_000);
        assert_eq!(e.arm(Trigger::Time(RadioTime::new(20, 0.0))), 0);
    }

    #[test]
    fn test_late_trigger_published_with_delta() {
        let e = emitter(false);
        let mut rx = e.subscribe();
        pass(&e, 0, 1_000, &[]);
        e.arm(Trigger::Sample(500));

        pass(&e, 1_000, 1_000, &[]);
        let event = rx.try_recv().unwrap();
        assert_eq!(event.trigger_sample, 500);
        assert!((event.late_delta - 0.0005).abs() < 1e-12);
    }

    #[test]
    fn test_late_trigger_dropped() {
        let e = emitter(true);
        let mut rx = e.subscribe();
        pass(&e, 0, 1_000, &[]);
        e.arm(Trigger::Sample(500));

        pass(&e, 1_000, 1_000, &[]);
        assert!(rx.try_recv().is_err());
        assert!(!e.is_armed());
    }

    #[test]
    fn test_disarm_and_malformed() {
        let e = emitter(false);
        let mut rx = e.subscribe();
        e.handle_message(keys::SET, &Value::U64(10));
        e.handle_message(keys::DISARM, &Value::Nil);
        e.handle_message(keys::SET, &Value::symbol("soon"));
        assert!(!e.is_armed());

        pass(&e, 0, 100, &[]);
        assert!(rx.try_recv().is_err());
    }
}
