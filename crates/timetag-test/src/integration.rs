//! End-to-end scenarios
//!
//! Each scenario wires real blocks to a simulated source and host clock
//! and reports what it observed:
//! - Retune alignment: scheduler tags feeding a follower, every change
//!   must land on its scheduled sample
//! - Drift tracking: host clock running off-rate between hardware tags,
//!   the correlation must stay near the hardware line
//! - Time tag cadence: periodic tags across re-timings must agree with
//!   the source's own clock

use std::sync::Arc;

use timetag_blocks::{
    retune_command, InterruptEmitter, InterruptEmitterConfig, RetuneFollower,
    RetuneFollowerConfig, RetuneSchedulerConfig, RetuneTarget, TagOffsetConfig,
    TagTimeOffsetPropagator, TimedRetuneScheduler, WorkWindow,
};
use timetag_core::{keys, RadioTime, SampleIndex, TimeEvent, TimetagResult};
use timetag_time::HostClock;

use crate::clock_sim::{ClockDriftModel, DriftingClock};
use crate::stream_sim::{BlockRunner, RadioStream};

// ============================================================================
// RETUNE ALIGNMENT
// ============================================================================

#[derive(Clone, Debug)]
pub struct RetuneScenarioConfig {
    pub rate: f64,
    pub start: RadioTime,
    /// (tune offset in Hz, seconds after stream start)
    pub retunes: Vec<(f64, f64)>,
    pub batches: usize,
    pub seed: u64,
}

impl Default for RetuneScenarioConfig {
    fn default() -> Self {
        RetuneScenarioConfig {
            rate: 1_000_000.0,
            start: RadioTime::new(1_700_000_000, 0.25),
            retunes: vec![(10e3, 0.002), (-25e3, 0.0055), (0.0, 0.009)],
            batches: 40,
            seed: 42,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct RetuneReport {
    /// Sample each command resolved to
    pub scheduled: Vec<SampleIndex>,
    /// Where the scheduler tagged them
    pub tagged: Vec<SampleIndex>,
    /// Input sample and frequency of every change the follower made
    pub applied: Vec<(SampleIndex, f64)>,
    pub samples_in: SampleIndex,
    pub samples_out: SampleIndex,
}

impl RetuneReport {
    pub fn passed(&self) -> bool {
        self.scheduled == self.tagged
            && self.applied.iter().map(|a| a.0).eq(self.tagged.iter().copied())
            && self.samples_in == self.samples_out
    }
}

pub fn run_retune_scenario(config: &RetuneScenarioConfig) -> TimetagResult<RetuneReport> {
    let scheduler = TimedRetuneScheduler::new(RetuneSchedulerConfig {
        sample_rate: config.rate,
        ..Default::default()
    })?;
    let follower = RetuneFollower::new(RetuneFollowerConfig {
        sample_rate: config.rate,
        ..Default::default()
    })?;
    let mut stream = RadioStream::new(config.rate, config.start, config.seed);
    let mut upstream = BlockRunner::new(scheduler);
    let mut downstream = BlockRunner::new(follower);
    let mut report = RetuneReport::default();

    for i in 0..config.batches {
        // A short first batch so every retune is still ahead of the stream
        let batch = if i == 0 {
            stream.next_batch_of(100)
        } else {
            stream.next_batch()
        };
        upstream.push_batch(&batch);
        upstream.run();

        // Commands go in once the hardware reference is known
        if i == 0 {
            for &(offset, after) in &config.retunes {
                let at = config.start.saturating_add_secs(after);
                let msg = retune_command(keys::FREQ, offset, Some(at));
                if let Some(RetuneTarget::At(sample)) = upstream.block().submit(&msg)? {
                    report.scheduled.push(sample);
                }
            }
        }

        let out = upstream.take_output();
        report.tagged.extend(
            out.tags
                .iter()
                .filter(|t| t.key == keys::SET_FREQ)
                .map(|t| t.offset),
        );
        downstream.push(&out.items, &out.tags);

        let mut idle = 0;
        while idle < 2 && downstream.nitems_read() < upstream.nitems_written() {
            let before = downstream.block().center_freq();
            let status = downstream.run_once();
            let after = downstream.block().center_freq();
            if after != before {
                report.applied.push((downstream.nitems_read(), after));
            }
            idle = if status.consumed == 0 { idle + 1 } else { 0 };
        }
    }

    report.samples_in = stream.produced();
    report.samples_out = downstream.nitems_written();
    Ok(report)
}

// ============================================================================
// DRIFT TRACKING
// ============================================================================

#[derive(Clone, Debug)]
pub struct DriftScenarioConfig {
    pub rate: f64,
    pub clock: ClockDriftModel,
    /// Simulated duration (seconds)
    pub duration: f64,
    pub batch: usize,
    pub seed: u64,
}

impl Default for DriftScenarioConfig {
    fn default() -> Self {
        DriftScenarioConfig {
            rate: 1_000_000.0,
            clock: ClockDriftModel::fast(),
            duration: 5.0,
            batch: 1_000,
            seed: 7,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct DriftReport {
    /// Largest |host-derived - hardware| radio time seen (seconds)
    pub max_error: f64,
    pub final_error: f64,
    /// What the host clock drifted by with no correction at all
    pub uncorrected: f64,
}

pub fn run_drift_scenario(config: &DriftScenarioConfig) -> TimetagResult<DriftReport> {
    let clock = Arc::new(DriftingClock::new(
        RadioTime::new(1_000_000, 0.0),
        config.clock,
        config.seed,
    ));
    let emitter = InterruptEmitter::with_clock(
        InterruptEmitterConfig {
            sample_rate: config.rate,
            ..Default::default()
        },
        clock.clone(),
    )?;
    let hw_start = RadioTime::new(50, 0.0);
    let mut stream = RadioStream::new(config.rate, hw_start, config.seed);
    let mut report = DriftReport::default();

    emitter.start();
    let dt = config.batch as f64 / config.rate;
    let passes = (config.duration / dt) as usize;
    for _ in 0..passes {
        clock.advance(dt);
        let batch = stream.next_batch_of(config.batch);
        emitter.process(&WorkWindow::new(batch.start, &batch.items, &batch.tags));

        let radio_now = emitter.correlator().radio_now(clock.now());
        let error = radio_now.secs_since(stream.time_of(batch.end()));
        report.max_error = report.max_error.max(error.abs());
        report.final_error = error;
    }
    emitter.stop();

    report.uncorrected = clock.accumulated_drift();
    Ok(report)
}

// ============================================================================
// TIME TAG CADENCE
// ============================================================================

#[derive(Clone, Debug, Default)]
pub struct CadenceReport {
    pub events: Vec<TimeEvent>,
    /// Largest disagreement between a tag's time and the source clock
    pub max_error: f64,
}

/// Periodic tags every `interval` samples, with a re-timing after
/// `retag_after` batches
pub fn run_cadence_scenario(
    rate: f64,
    interval: u64,
    batches: usize,
    retag_after: usize,
    seed: u64,
) -> TimetagResult<CadenceReport> {
    let propagator = TagTimeOffsetPropagator::new(TagOffsetConfig {
        sample_rate: rate,
        interval,
        ..Default::default()
    })?;
    let mut stream = RadioStream::new(rate, RadioTime::new(300, 0.0), seed);
    let mut runner = BlockRunner::new(propagator);
    let mut report = CadenceReport::default();

    for i in 0..batches {
        if i == retag_after {
            let jump = stream.time_of(stream.produced()).saturating_add_secs(1.5);
            stream.retag(jump);
        }
        let batch = stream.next_batch();
        runner.push_batch(&batch);
        runner.run();

        for tag in runner.take_output().tags_with_key(keys::RX_TIME_OFFSET) {
            let event = TimeEvent::from_tag_value(&tag.key, &tag.value)?;
            let error = event.time.secs_since(stream.time_of(event.offset));
            report.max_error = report.max_error.max(error.abs());
            report.events.push(event);
        }
    }
    Ok(report)
}
