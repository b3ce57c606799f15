//! Interrupt emitter - publishes a trigger event at a requested radio time
//!
//! The stream only calls back periodically, so the event is not driven by
//! the sample stream. Instead each request becomes a host-clock deadline on
//! a ScheduledTimer. Every work pass keeps the host clock aligned with
//! radio time: a hardware `rx_time` tag re-anchors the correlator and moves
//! any pending deadline by the same correction, and a pass without a tag
//! runs the damped drift correction.

use std::sync::Arc;

use timetag_core::{
    keys, RadioTime, SampleIndex, TimetagError, TimetagResult, TriggerEvent, Value,
};
use timetag_time::{HostClock, ScheduledTimer, SystemClock, TimeCorrelator, TimerGuard};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, error, info, trace, warn};

use crate::config::InterruptEmitterConfig;
use crate::stream::{
    unknown_port, Block, MessageHandler, MessagePort, WorkOutput, WorkStatus, WorkWindow,
};

/// Requested interrupt time
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Trigger {
    Sample(SampleIndex),
    Time(RadioTime),
}

impl Trigger {
    /// Parse a set-time message: a bare `u64` sample index, or a
    /// `(u64, real)` pair or tuple
    pub fn from_value(value: &Value) -> TimetagResult<Self> {
        let (secs, frac) = match value {
            Value::U64(sample) => return Ok(Trigger::Sample(*sample)),
            Value::Pair(secs, frac) => (secs.as_ref(), frac.as_ref()),
            Value::Tuple(items) if items.len() >= 2 => (&items[0], &items[1]),
            other => {
                return Err(TimetagError::MalformedMessage(format!(
                    "set time expects a sample index or (seconds, fraction), got {other:?}"
                )))
            }
        };
        if !matches!(secs, Value::U64(_)) || !frac.is_real() {
            return Err(TimetagError::MalformedMessage(format!(
                "set time expects (u64, real), got ({secs:?}, {frac:?})"
            )));
        }
        value.radio_time().map(Trigger::Time)
    }
}

/// What became of a request
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum RequestOutcome {
    /// Timer armed to fire in `wait` seconds
    Armed { wait: f64 },
    /// Already late; fires immediately
    FiringLate { late_delta: f64 },
    /// Already late and discarded
    DroppedLate { late_delta: f64 },
}

#[derive(Debug)]
struct PendingRequest {
    trigger_time: RadioTime,
    late_delta: f64,
}

struct EmitterState {
    correlator: TimeCorrelator,
    drop_late: bool,
}

/// Scheduled interrupt emitter
///
/// At most one request is outstanding; a new request supersedes the
/// pending one.
pub struct InterruptEmitter {
    timer: ScheduledTimer<EmitterState, PendingRequest>,
    clock: Arc<dyn HostClock>,
    trig: MessagePort<TriggerEvent>,
}

impl InterruptEmitter {
    pub fn new(config: InterruptEmitterConfig) -> TimetagResult<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: InterruptEmitterConfig,
        clock: Arc<dyn HostClock>,
    ) -> TimetagResult<Self> {
        config.validate()?;
        let state = EmitterState {
            correlator: TimeCorrelator::new(config.sample_rate, config.drift())?,
            drop_late: config.drop_late,
        };

        let trig = MessagePort::new(keys::TRIG);
        let port = trig.clone();
        let timer = ScheduledTimer::new(
            state,
            config.timer(),
            move |state: &mut EmitterState, request: PendingRequest| fire(state, request, &port),
        )?;

        info!(
            rate = config.sample_rate,
            drop_late = config.drop_late,
            "interrupt emitter ready"
        );
        Ok(InterruptEmitter { timer, clock, trig })
    }

    pub fn trigger_port(&self) -> &MessagePort<TriggerEvent> {
        &self.trig
    }

    pub fn subscribe(&self) -> UnboundedReceiver<TriggerEvent> {
        self.trig.subscribe()
    }

    /// Schedule an interrupt, superseding any pending one
    pub fn request(&self, trigger: Trigger, drop_if_late: bool) -> TimetagResult<RequestOutcome> {
        let host_now = self.clock.now();
        let mut guard = self.timer.lock();
        schedule(&mut guard, trigger, drop_if_late, host_now)
    }

    /// Handle a set-time message using the configured drop-late policy
    pub fn handle_set_time(&self, msg: &Value) {
        let trigger = match Trigger::from_value(msg) {
            Ok(trigger) => trigger,
            Err(e) => {
                error!(%e, "ignoring set time message");
                return;
            }
        };
        let host_now = self.clock.now();
        let mut guard = self.timer.lock();
        let drop_late = guard.drop_late;
        if let Err(e) = schedule(&mut guard, trigger, drop_late, host_now) {
            warn!(%e, "interrupt request not scheduled");
        }
    }

    /// Process one window of samples: re-anchor or drift-correct
    pub fn process<T>(&self, window: &WorkWindow<'_, T>) {
        let host_now = self.clock.now();
        let mut guard = self.timer.lock();
        guard.correlator.begin_pass(window.end(), host_now);

        match window.tags_with_key(keys::RX_TIME).last() {
            Some(tag) => match tag.value.radio_time() {
                Ok(time) => {
                    let shift = guard.correlator.on_hardware_tag(tag.offset, time);
                    if shift != 0.0 && guard.extend(shift).is_some() {
                        debug!(shift, "pending interrupt realigned to hardware time");
                    }
                }
                Err(e) => error!(%e, offset = tag.offset, "invalid rx_time tag"),
            },
            None => {
                guard.correlator.correct_drift(window.end(), host_now);
            }
        }
    }

    /// Align radio time zero with the current host time
    pub fn start(&self) {
        let host_now = self.clock.now();
        self.timer.lock().correlator.start(host_now);
    }

    /// Retire the timer thread; idempotent
    pub fn stop(&self) {
        self.timer.stop();
    }

    pub fn set_rate(&self, rate: f64) {
        if let Err(e) = self.timer.lock().correlator.set_rate(rate) {
            warn!(%e, "sample rate unchanged");
        }
    }

    pub fn set_drop_late(&self, drop_late: bool) {
        self.timer.lock().drop_late = drop_late;
    }

    pub fn set_loop_gain(&self, gain: f64) {
        if let Err(e) = self.timer.lock().correlator.set_drift_gain(gain) {
            warn!(%e, "loop gain unchanged");
        }
    }

    pub fn is_armed(&self) -> bool {
        self.timer.is_armed()
    }

    /// Snapshot of the current correlation
    pub fn correlator(&self) -> TimeCorrelator {
        self.timer.lock().correlator.clone()
    }
}

fn schedule(
    guard: &mut TimerGuard<'_, EmitterState, PendingRequest>,
    trigger: Trigger,
    drop_if_late: bool,
    host_now: RadioTime,
) -> TimetagResult<RequestOutcome> {
    let trigger_time = match trigger {
        Trigger::Sample(sample) => guard.correlator.time_at(sample),
        Trigger::Time(time) => time,
    };
    let wait = trigger_time.secs_since(guard.correlator.radio_now(host_now));

    if wait < 0.0 {
        let late_delta = -wait;
        if drop_if_late {
            debug!(trigger = %trigger_time, late_delta, "dropping late interrupt request");
            return Ok(RequestOutcome::DroppedLate { late_delta });
        }
        guard.arm(0.0, PendingRequest { trigger_time, late_delta })?;
        debug!(trigger = %trigger_time, late_delta, "late interrupt firing now");
        Ok(RequestOutcome::FiringLate { late_delta })
    } else {
        guard.arm(
            wait,
            PendingRequest {
                trigger_time,
                late_delta: 0.0,
            },
        )?;
        trace!(trigger = %trigger_time, wait, "interrupt armed");
        Ok(RequestOutcome::Armed { wait })
    }
}

fn fire(state: &mut EmitterState, request: PendingRequest, port: &MessagePort<TriggerEvent>) {
    // The mapping may have moved since arming
    let event = TriggerEvent {
        trigger_time: request.trigger_time,
        trigger_sample: state.correlator.sample_at(request.trigger_time),
        late_delta: request.late_delta,
    };
    debug!(
        trigger = %event.trigger_time,
        sample = event.trigger_sample,
        late_delta = event.late_delta,
        "interrupt"
    );
    port.publish(event);
}

impl<T: Send + Sync> Block<T> for InterruptEmitter {
    fn start(&self) -> TimetagResult<()> {
        InterruptEmitter::start(self);
        Ok(())
    }

    fn stop(&self) {
        InterruptEmitter::stop(self);
    }

    fn work(&self, input: &WorkWindow<'_, T>, _output: &mut WorkOutput<T>) -> WorkStatus {
        self.process(input);
        WorkStatus::sink(input.len())
    }
}

impl MessageHandler for InterruptEmitter {
    fn handle_message(&self, port: &str, msg: &Value) {
        match port {
            keys::SET => self.handle_set_time(msg),
            _ => unknown_port("interrupt_emitter", port),
        }
    }
}
