//! Scheduled timer - single-shot, cancelable, reschedulable deadline timer
//!
//! One background thread per timer sleeps until the armed deadline and then
//! runs the fire handler. Every `arm`, `extend` and `cancel` bumps a
//! generation counter; the worker captures the generation before it sleeps
//! and re-checks it after waking, so a fire whose arm has since been
//! superseded is discarded instead of delivered.
//!
//! The component state `S` lives inside the timer's mutex. The fire handler
//! runs with that mutex held, which serializes it against every other
//! operation on the component.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};
use timetag_core::{TimetagError, TimetagResult};
use tracing::{debug, trace, warn};

/// Longest representable wait; longer requests are clamped to it
const MAX_WAIT: Duration = Duration::from_secs(365 * 24 * 3600);

/// Timer configuration
#[derive(Clone, Debug)]
pub struct TimerConfig {
    /// The final stretch before a deadline is busy-waited instead of slept
    pub spin_window: Duration,
    /// Name of the background thread
    pub thread_name: String,
}

impl Default for TimerConfig {
    fn default() -> Self {
        TimerConfig {
            spin_window: Duration::from_micros(200),
            thread_name: "timetag-timer".to_string(),
        }
    }
}

struct TimerSlot<P> {
    generation: u64,
    deadline: Option<Instant>,
    payload: Option<P>,
    stopped: bool,
}

struct Inner<S, P> {
    slot: TimerSlot<P>,
    state: S,
}

struct Shared<S, P> {
    inner: Mutex<Inner<S, P>>,
    wake: Condvar,
}

/// Deadline timer owning component state `S` and delivering payloads `P`
pub struct ScheduledTimer<S, P>
where
    S: Send + 'static,
    P: Send + 'static,
{
    shared: Arc<Shared<S, P>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl<S, P> ScheduledTimer<S, P>
where
    S: Send + 'static,
    P: Send + 'static,
{
    /// Spawn the timer thread
    ///
    /// `on_fire` receives the component state and the payload of the arm
    /// that expired. It must not call back into this timer.
    pub fn new<F>(state: S, config: TimerConfig, on_fire: F) -> TimetagResult<Self>
    where
        F: FnMut(&mut S, P) + Send + 'static,
    {
        let shared = Arc::new(Shared {
            inner: Mutex::new(Inner {
                slot: TimerSlot {
                    generation: 0,
                    deadline: None,
                    payload: None,
                    stopped: false,
                },
                state,
            }),
            wake: Condvar::new(),
        });

        let worker_shared = Arc::clone(&shared);
        let spin_window = config.spin_window;
        let handle = thread::Builder::new()
            .name(config.thread_name)
            .spawn(move || run_worker(worker_shared, spin_window, on_fire))
            .map_err(|e| TimetagError::TimerSpawn(e.to_string()))?;

        Ok(ScheduledTimer {
            shared,
            worker: Mutex::new(Some(handle)),
        })
    }

    /// Lock the component state together with the timer slot
    pub fn lock(&self) -> TimerGuard<'_, S, P> {
        TimerGuard {
            shared: &self.shared,
            inner: self.shared.inner.lock(),
        }
    }

    pub fn arm(&self, wait_secs: f64, payload: P) -> TimetagResult<u64> {
        self.lock().arm(wait_secs, payload)
    }

    pub fn extend(&self, delta_secs: f64) -> Option<u64> {
        self.lock().extend(delta_secs)
    }

    pub fn cancel(&self) -> Option<P> {
        self.lock().cancel()
    }

    pub fn is_armed(&self) -> bool {
        self.lock().is_armed()
    }

    pub fn generation(&self) -> u64 {
        self.lock().generation()
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.inner.lock().slot.stopped
    }

    /// Stop the timer thread and wait for it to exit
    ///
    /// Idempotent. A pending arm is dropped without firing, and nothing
    /// fires after this returns.
    pub fn stop(&self) {
        {
            let mut inner = self.shared.inner.lock();
            let slot = &mut inner.slot;
            if !slot.stopped {
                slot.stopped = true;
                slot.generation += 1;
                slot.deadline = None;
                if slot.payload.take().is_some() {
                    debug!("timer stopped with a pending deadline");
                }
            }
            self.shared.wake.notify_all();
        }

        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!("timer thread panicked");
            }
        }
    }
}

impl<S, P> Drop for ScheduledTimer<S, P>
where
    S: Send + 'static,
    P: Send + 'static,
{
    fn drop(&mut self) {
        self.stop();
    }
}

/// Exclusive access to a timer's component state and its slot
pub struct TimerGuard<'a, S, P> {
    shared: &'a Shared<S, P>,
    inner: MutexGuard<'a, Inner<S, P>>,
}

impl<'a, S, P> TimerGuard<'a, S, P> {
    /// Schedule `payload` to fire `wait_secs` from now, replacing any
    /// pending arm. Zero or negative waits fire immediately.
    ///
    /// Returns the new generation.
    pub fn arm(&mut self, wait_secs: f64, payload: P) -> TimetagResult<u64> {
        let slot = &mut self.inner.slot;
        if slot.stopped {
            return Err(TimetagError::TimerStopped);
        }
        if slot.payload.is_some() {
            debug!(generation = slot.generation, "superseding pending deadline");
        }

        let now = Instant::now();
        let deadline = if wait_secs > 0.0 {
            offset_instant(now, wait_secs)
        } else {
            now
        };

        slot.generation += 1;
        slot.deadline = Some(deadline);
        slot.payload = Some(payload);
        self.shared.wake.notify_all();
        Ok(slot.generation)
    }

    /// Move the pending deadline by `delta_secs` (later if positive)
    ///
    /// Returns the new generation, or `None` if nothing is armed.
    pub fn extend(&mut self, delta_secs: f64) -> Option<u64> {
        let slot = &mut self.inner.slot;
        if slot.stopped || slot.payload.is_none() {
            return None;
        }
        let deadline = slot.deadline?;

        slot.generation += 1;
        slot.deadline = Some(offset_instant(deadline, delta_secs));
        self.shared.wake.notify_all();
        Some(slot.generation)
    }

    /// Drop the pending arm, returning its payload
    pub fn cancel(&mut self) -> Option<P> {
        let slot = &mut self.inner.slot;
        let payload = slot.payload.take()?;
        slot.generation += 1;
        slot.deadline = None;
        self.shared.wake.notify_all();
        Some(payload)
    }

    pub fn is_armed(&self) -> bool {
        self.inner.slot.payload.is_some()
    }

    pub fn generation(&self) -> u64 {
        self.inner.slot.generation
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.inner.slot.deadline
    }

    /// Time left until the pending deadline (zero once due)
    pub fn remaining(&self) -> Option<Duration> {
        self.inner
            .slot
            .deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }
}

impl<'a, S, P> Deref for TimerGuard<'a, S, P> {
    type Target = S;

    fn deref(&self) -> &S {
        &self.inner.state
    }
}

impl<'a, S, P> DerefMut for TimerGuard<'a, S, P> {
    fn deref_mut(&mut self) -> &mut S {
        &mut self.inner.state
    }
}

/// `base` moved by a signed number of seconds
fn offset_instant(base: Instant, delta_secs: f64) -> Instant {
    if delta_secs.is_nan() {
        return base;
    }
    let magnitude = Duration::try_from_secs_f64(delta_secs.abs())
        .unwrap_or(MAX_WAIT)
        .min(MAX_WAIT);
    if delta_secs >= 0.0 {
        base.checked_add(magnitude).unwrap_or(base)
    } else {
        base.checked_sub(magnitude).unwrap_or_else(Instant::now)
    }
}

fn run_worker<S, P, F>(shared: Arc<Shared<S, P>>, spin_window: Duration, mut on_fire: F)
where
    F: FnMut(&mut S, P),
{
    let mut inner = shared.inner.lock();
    loop {
        if inner.slot.stopped {
            break;
        }
        let Some(deadline) = inner.slot.deadline else {
            shared.wake.wait(&mut inner);
            continue;
        };
        let generation = inner.slot.generation;

        wait_for_deadline(&shared.wake, &mut inner, deadline, spin_window);

        if inner.slot.stopped {
            break;
        }
        if inner.slot.generation != generation {
            trace!(
                generation,
                current = inner.slot.generation,
                "discarding superseded timer wake"
            );
            continue;
        }
        if Instant::now() < deadline {
            continue;
        }

        inner.slot.deadline = None;
        let Some(payload) = inner.slot.payload.take() else {
            continue;
        };
        trace!(generation, "timer fired");
        on_fire(&mut inner.state, payload);
    }
    trace!("timer thread exiting");
}

/// Sleep on the condvar until just before `deadline`, then spin the rest
/// with the lock released. Returns with the lock held.
fn wait_for_deadline<S, P>(
    wake: &Condvar,
    inner: &mut MutexGuard<'_, Inner<S, P>>,
    deadline: Instant,
    spin_window: Duration,
) {
    let now = Instant::now();
    if now >= deadline {
        return;
    }
    match deadline.checked_sub(spin_window) {
        Some(coarse) if now < coarse => {
            let _timed_out = wake.wait_until(inner, coarse);
        }
        _ => MutexGuard::unlocked(inner, || {
            while Instant::now() < deadline {
                std::hint::spin_loop();
            }
        }),
    }
}
