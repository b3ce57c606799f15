//! Timed retune scheduling
//!
//! Retune commands arrive as messages, possibly long before they are due.
//! Each one is converted to a target sample offset and queued; work passes
//! drain the queue front to back and tag every due command at the sample
//! where the new frequency takes effect. Missed commands are still applied,
//! late, at the start of the current pass.

use std::collections::VecDeque;

use parking_lot::Mutex;
use timetag_core::{
    keys, FrequencyChange, RadioTime, SampleIndex, TimetagError, TimetagResult, Value,
};
use timetag_time::{DriftConfig, TimeCorrelator};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, error, warn};

use crate::config::RetuneSchedulerConfig;
use crate::stream::{
    unknown_port, Block, MessageHandler, MessagePort, WorkOutput, WorkStatus, WorkWindow,
};

/// When a retune takes effect
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetuneTarget {
    /// First sample of the next pass
    Immediate,
    At(SampleIndex),
}

/// A queued frequency change
#[derive(Clone, Debug, PartialEq)]
pub struct RetuneCommand {
    pub change: FrequencyChange,
    pub target: RetuneTarget,
    /// Set once the command has been tagged
    pub applied: bool,
}

struct SchedulerState {
    correlator: TimeCorrelator,
    queue: VecDeque<RetuneCommand>,
    capacity: usize,
    dict_key: String,
    tag_key: String,
    last_emitted: Option<SampleIndex>,
}

/// Queues frequency changes and tags them where they take effect
pub struct TimedRetuneScheduler {
    state: Mutex<SchedulerState>,
    freq_port: MessagePort<Value>,
}

impl TimedRetuneScheduler {
    pub fn new(config: RetuneSchedulerConfig) -> TimetagResult<Self> {
        config.validate()?;
        let correlator =
            TimeCorrelator::with_origin(config.sample_rate, config.origin, DriftConfig::default())?;
        Ok(TimedRetuneScheduler {
            state: Mutex::new(SchedulerState {
                correlator,
                queue: VecDeque::with_capacity(config.capacity),
                capacity: config.capacity,
                dict_key: config.dict_key,
                tag_key: config.tag_key,
                last_emitted: None,
            }),
            freq_port: MessagePort::new(keys::FREQ),
        })
    }

    pub fn freq_port(&self) -> &MessagePort<Value> {
        &self.freq_port
    }

    pub fn subscribe(&self) -> UnboundedReceiver<Value> {
        self.freq_port.subscribe()
    }

    pub fn pending(&self) -> usize {
        self.state.lock().queue.len()
    }

    pub fn set_rate(&self, rate: f64) {
        if let Err(e) = self.state.lock().correlator.set_rate(rate) {
            warn!(%e, "sample rate unchanged");
        }
    }

    pub fn set_tag_key(&self, key: &str) {
        if key.is_empty() {
            warn!("ignoring empty retune tag key");
            return;
        }
        self.state.lock().tag_key = key.to_string();
    }

    /// Queue a retune command
    ///
    /// Returns `Ok(None)` when the message carries no offset entry.
    pub fn submit(&self, msg: &Value) -> TimetagResult<Option<RetuneTarget>> {
        let mut st = self.state.lock();
        if !msg.is_dict() {
            return Err(TimetagError::MalformedMessage(
                "retune commands must be dictionaries".into(),
            ));
        }
        let Some(offset) = msg.dict_ref(&st.dict_key) else {
            return Ok(None);
        };
        let offset = offset.as_f64().ok_or_else(|| {
            TimetagError::MalformedMessage(format!("tune offset must be numeric, got {offset:?}"))
        })?;
        let freq = -offset;

        self.freq_port
            .publish(Value::pair(Value::symbol(keys::FREQ), Value::F64(freq)));

        let change = match msg.dict_ref(keys::PHASE) {
            None => FrequencyChange::new(freq),
            Some(phase) => match phase.as_f64() {
                Some(phase) => FrequencyChange::with_phase(freq, phase),
                None => {
                    error!(?phase, "ignoring non-numeric retune phase");
                    FrequencyChange::new(freq)
                }
            },
        };
        let target = match msg.dict_ref(keys::TIME).map(Value::radio_time) {
            None => RetuneTarget::Immediate,
            Some(Ok(time)) => RetuneTarget::At(st.correlator.sample_at(time)),
            Some(Err(e)) => {
                error!(%e, "unable to determine retune time, tagging now");
                RetuneTarget::Immediate
            }
        };

        if st.queue.len() >= st.capacity {
            return Err(TimetagError::QueueFull {
                capacity: st.capacity,
            });
        }
        debug!(freq, ?target, "retune queued");
        st.queue.push_back(RetuneCommand {
            change,
            target,
            applied: false,
        });
        Ok(Some(target))
    }

    /// Handle a command message, logging anything that is not queued
    pub fn handle_command(&self, msg: &Value) {
        match self.submit(msg) {
            Ok(_) => {}
            Err(e @ TimetagError::QueueFull { .. }) => warn!(%e, "retune command dropped"),
            Err(e) => error!(%e, "retune command ignored"),
        }
    }

    /// Tag every command due in this window; returns them in tag order
    pub fn process<T>(
        &self,
        window: &WorkWindow<'_, T>,
        output: &mut WorkOutput<T>,
    ) -> Vec<RetuneCommand> {
        let mut st = self.state.lock();

        if let Some(tag) = window.tags_with_key(keys::RX_TIME).last() {
            match tag.value.radio_time() {
                Ok(time) => st.correlator.set_anchor(tag.offset, time),
                Err(e) => error!(%e, offset = tag.offset, "invalid rx_time tag"),
            }
        }

        let mut tagged = Vec::new();
        if window.is_empty() {
            return tagged;
        }
        let (start, end) = (window.start(), window.end());

        while let Some(front) = st.queue.front() {
            let target = match front.target {
                RetuneTarget::Immediate => start,
                RetuneTarget::At(sample) if sample < end => sample.max(start),
                RetuneTarget::At(_) => break,
            };
            let offset = st.last_emitted.map_or(target, |last| target.max(last));
            let Some(mut command) = st.queue.pop_front() else {
                break;
            };

            if let RetuneTarget::At(sample) = command.target {
                if sample < offset {
                    debug!(sample, offset, "retune missed its sample, applying late");
                }
            }
            output.add_item_tag(offset, st.tag_key.clone(), command.change.to_value());
            st.last_emitted = Some(offset);
            command.applied = true;
            tagged.push(command);
        }
        tagged
    }
}

impl<T: Clone + Send + Sync> Block<T> for TimedRetuneScheduler {
    fn work(&self, input: &WorkWindow<'_, T>, output: &mut WorkOutput<T>) -> WorkStatus {
        self.process(input, output);
        output.items.extend_from_slice(input.items);
        WorkStatus::sync(input.len())
    }
}

impl MessageHandler for TimedRetuneScheduler {
    fn handle_message(&self, port: &str, msg: &Value) {
        match port {
            keys::COMMAND => self.handle_command(msg),
            _ => unknown_port("timed_retune_scheduler", port),
        }
    }
}

/// Command dictionary for a retune by `offset` Hz, optionally at `time`
pub fn retune_command(dict_key: &str, offset: f64, time: Option<RadioTime>) -> Value {
    let msg = Value::dict().with_entry(dict_key, Value::F64(offset));
    match time {
        Some(time) => msg.with_entry(keys::TIME, time.into()),
        None => msg,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use timetag_core::Tag;

    const FS: f64 = 32_000.0;

    fn scheduler() -> TimedRetuneScheduler {
        TimedRetuneScheduler::new(RetuneSchedulerConfig {
            sample_rate: FS,
            ..Default::default()
        })
        .unwrap()
    }

    fn pass(s: &TimedRetuneScheduler, start: SampleIndex, n: usize) -> WorkOutput<u8> {
        pass_with_tags(s, start, n, &[])
    }

    fn pass_with_tags(
        s: &TimedRetuneScheduler,
        start: SampleIndex,
        n: usize,
        tags: &[Tag],
    ) -> WorkOutput<u8> {
        let items = vec![0u8; n];
        let mut out = WorkOutput::new();
        s.work(&WorkWindow::new(start, &items, tags), &mut out);
        out
    }

    #[test]
    fn test_immediate_retune_tagged_at_next_pass() {
        let s = scheduler();
        pass(&s, 0, 1000);
        s.handle_command(&retune_command("freq", 100.0, None));

        let out = pass(&s, 1000, 500);
        assert_eq!(out.tags.len(), 1);
        assert_eq!(out.tags[0].key, keys::SET_FREQ);
        assert_eq!(out.tags[0].offset, 1000);
        assert_eq!(out.tags[0].value, Value::F64(-100.0));
        assert_eq!(s.pending(), 0);
    }

    #[test]
    fn test_timed_retune_tagged_at_exact_sample() {
        let s = scheduler();
        let target = s
            .submit(&retune_command("freq", 100.0, Some(RadioTime::new(1, 0.0))))
            .unwrap();
        assert_eq!(target, Some(RetuneTarget::At(32_000)));

        let mut tags = Vec::new();
        let mut start = 0;
        while start < 40_000 {
            tags.extend(pass(&s, start, 3_000).tags);
            start += 3_000;
        }
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0].offset, 32_000);
        assert_eq!(tags[0].value, Value::F64(-100.0));
    }

    #[test]
    fn test_time_relative_to_hardware_reference() {
        let s = scheduler();
        let reference = [Tag::new(
            1_000,
            keys::RX_TIME,
            Value::tuple([Value::U64(10), Value::F64(0.0)]),
        )];
        pass_with_tags(&s, 0, 2_000, &reference);

        let target = s
            .submit(&retune_command("freq", -5e3, Some(RadioTime::new(10, 0.5))))
            .unwrap();
        assert_eq!(target, Some(RetuneTarget::At(17_000)));
    }

    #[test]
    fn test_missed_retune_applied_at_pass_start() {
        let s = scheduler();
        s.submit(&retune_command("freq", 1.0, Some(RadioTime::new(0, 0.25))))
            .unwrap();

        // Target was sample 8000; the first pass we see starts later
        let out = pass(&s, 10_000, 100);
        assert_eq!(out.tags.len(), 1);
        assert_eq!(out.tags[0].offset, 10_000);
    }

    #[test]
    fn test_offsets_never_decrease() {
        let s = scheduler();
        s.submit(&retune_command("freq", 1.0, Some(RadioTime::new(0, 0.15625))))
            .unwrap();
        s.submit(&retune_command("freq", 2.0, Some(RadioTime::new(0, 0.03125))))
            .unwrap();
        s.submit(&retune_command("freq", 3.0, None)).unwrap();

        let out = pass(&s, 4_000, 2_000);
        let offsets: Vec<_> = out.tags.iter().map(|t| t.offset).collect();
        assert_eq!(offsets, vec![5_000, 5_000, 5_000]);
    }

    #[test]
    fn test_future_command_blocks_queue() {
        let s = scheduler();
        s.submit(&retune_command("freq", 1.0, Some(RadioTime::new(2, 0.0))))
            .unwrap();
        s.submit(&retune_command("freq", 2.0, None)).unwrap();

        assert!(pass(&s, 0, 1_000).tags.is_empty());
        assert_eq!(s.pending(), 2);

        let out = pass(&s, 63_500, 1_000);
        let offsets: Vec<_> = out.tags.iter().map(|t| t.offset).collect();
        assert_eq!(offsets, vec![64_000, 64_000]);
    }

    #[test]
    fn test_phase_entry() {
        let s = scheduler();
        let msg = retune_command("freq", 250.0, None).with_entry(keys::PHASE, Value::F64(0.5));
        s.handle_command(&msg);

        let mut out = WorkOutput::<u8>::new();
        let tagged = s.process(&WorkWindow::new(0, &[0u8; 4], &[]), &mut out);
        assert_eq!(tagged.len(), 1);
        assert!(tagged[0].applied);
        assert_eq!(tagged[0].change, FrequencyChange::with_phase(-250.0, 0.5));
        assert_eq!(
            out.tags[0].value,
            Value::pair(Value::F64(-250.0), Value::F64(0.5))
        );
    }

    #[test]
    fn test_freq_message_published() {
        let s = scheduler();
        let mut rx = s.subscribe();
        s.handle_command(&retune_command("freq", 100.0, None));

        let msg = rx.try_recv().unwrap();
        assert_eq!(msg.car().and_then(Value::as_symbol), Some("freq"));
        assert_eq!(msg.cdr(), Some(&Value::F64(-100.0)));
    }

    #[test]
    fn test_malformed_commands_ignored() {
        let s = scheduler();
        assert!(s.submit(&Value::F64(100.0)).is_err());
        assert_eq!(s.submit(&Value::dict().with_entry("other", Value::F64(1.0))), Ok(None));
        assert!(s
            .submit(&Value::dict().with_entry("freq", Value::symbol("high")))
            .is_err());
        s.handle_command(&Value::Nil);
        assert_eq!(s.pending(), 0);
    }

    #[test]
    fn test_malformed_time_applies_now() {
        let s = scheduler();
        let msg = retune_command("freq", 10.0, None).with_entry(keys::TIME, Value::F64(3.0));
        assert_eq!(s.submit(&msg), Ok(Some(RetuneTarget::Immediate)));
    }

    #[test]
    fn test_queue_full_drops() {
        let s = TimedRetuneScheduler::new(RetuneSchedulerConfig {
            capacity: 2,
            ..Default::default()
        })
        .unwrap();
        for i in 0..2 {
            s.submit(&retune_command("freq", i as f64, None)).unwrap();
        }
        assert_eq!(
            s.submit(&retune_command("freq", 9.0, None)),
            Err(TimetagError::QueueFull { capacity: 2 })
        );
        s.handle_command(&retune_command("freq", 9.0, None));
        assert_eq!(s.pending(), 2);
    }

    #[test]
    fn test_custom_keys() {
        let s = TimedRetuneScheduler::new(RetuneSchedulerConfig {
            dict_key: "lo_offset".into(),
            tag_key: "tune".into(),
            ..Default::default()
        })
        .unwrap();
        s.handle_message(keys::COMMAND, &retune_command("lo_offset", 1e3, None));
        let out = pass(&s, 0, 10);
        assert_eq!(out.tags[0].key, "tune");
        assert_eq!(out.tags[0].value, Value::F64(-1e3));
    }

    proptest! {
        #[test]
        fn prop_every_command_tagged_once_in_order(
            targets in prop::collection::vec(prop::option::of(0u32..20_000), 1..20),
            sizes in prop::collection::vec(1usize..3_000, 1..40)
        ) {
            let s = scheduler();
            for target in &targets {
                let time = target.map(|t| RadioTime::from_secs_f64(f64::from(t) / FS));
                s.submit(&retune_command("freq", 1.0, time)).unwrap();
            }

            let mut offsets = Vec::new();
            let mut start = 0;
            for n in sizes.iter().copied().chain(std::iter::once(20_000)) {
                let out = pass(&s, start, n);
                for tag in &out.tags {
                    prop_assert!(tag.offset >= start && tag.offset < start + n as u64);
                }
                offsets.extend(out.tags.iter().map(|t| t.offset));
                start += n as u64;
            }
            prop_assert_eq!(offsets.len(), targets.len());
            prop_assert!(offsets.windows(2).all(|w| w[0] <= w[1]));
        }
    }
}
