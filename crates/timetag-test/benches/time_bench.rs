//! Benchmarks for timetag correlation and retune scheduling

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use timetag_blocks::{
    retune_command, RetuneSchedulerConfig, TimedRetuneScheduler, WorkOutput, WorkWindow,
};
use timetag_core::{keys, RadioTime, Tag};
use timetag_time::{DriftConfig, TimeCorrelator};

const RATE: f64 = 1_000_000.0;

fn correlator() -> TimeCorrelator {
    let mut c = TimeCorrelator::new(RATE, DriftConfig::default()).unwrap();
    c.on_hardware_tag(0, RadioTime::new(1_700_000_000, 0.125));
    c
}

fn bench_time_at(c: &mut Criterion) {
    let corr = correlator();
    let mut sample = 0u64;

    c.bench_function("correlator_time_at", |b| {
        b.iter(|| {
            sample = sample.wrapping_add(4096);
            black_box(corr.time_at(black_box(sample)))
        })
    });
}

fn bench_sample_at(c: &mut Criterion) {
    let corr = correlator();
    let time = RadioTime::new(1_700_000_003, 0.5);

    c.bench_function("correlator_sample_at", |b| {
        b.iter(|| black_box(corr.sample_at(black_box(time))))
    });
}

fn bench_hardware_tag(c: &mut Criterion) {
    let mut corr = correlator();
    let mut sample = 0u64;

    c.bench_function("correlator_hardware_tag", |b| {
        b.iter(|| {
            sample += 1_000;
            let time = RadioTime::new(1_700_000_000, 0.125).saturating_add_secs(sample as f64 / RATE);
            corr.begin_pass(sample, time);
            black_box(corr.on_hardware_tag(sample, time))
        })
    });
}

fn bench_drift_check(c: &mut Criterion) {
    let mut corr = correlator();
    let host = RadioTime::new(1_700_000_000, 0.5);

    c.bench_function("correlator_drift_check", |b| {
        b.iter(|| black_box(corr.correct_drift(black_box(500_000), host)))
    });
}

fn bench_retune_drain(c: &mut Criterion) {
    let items = vec![0u32; 8192];
    let reference = [Tag::new(0, keys::RX_TIME, RadioTime::new(10, 0.0).into())];

    c.bench_function("retune_drain_32", |b| {
        b.iter(|| {
            let scheduler = TimedRetuneScheduler::new(RetuneSchedulerConfig::default()).unwrap();
            let mut out = WorkOutput::new();
            scheduler.process(&WorkWindow::new(0, &items[..1], &reference), &mut out);
            for i in 0..32u64 {
                let at = RadioTime::new(10, 0.0).saturating_add_secs(i as f64 * 200e-6);
                let _ = scheduler.submit(&retune_command(keys::FREQ, 1e3, Some(at)));
            }
            out.clear();
            black_box(scheduler.process(&WorkWindow::new(1, &items, &[]), &mut out))
        })
    });
}

criterion_group!(
    benches,
    bench_time_at,
    bench_sample_at,
    bench_hardware_tag,
    bench_drift_check,
    bench_retune_drain,
);
criterion_main!(benches);
