//! Simulated radio streams and a minimal block runner
//!
//! `RadioStream` produces sample batches of irregular size the way a
//! hardware source does, with `rx_time`/`rx_rate`/`rx_freq` tags on the
//! first sample and after every re-timing. `BlockRunner` drives a single
//! block: it buffers what the block did not consume, forwards input tags
//! to the output and stops when the block makes no progress.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use timetag_blocks::{Block, WorkOutput, WorkStatus, WorkWindow};
use timetag_core::{keys, RadioTime, SampleIndex, Tag, Value};

/// One batch from a simulated source
#[derive(Clone, Debug, Default)]
pub struct Batch {
    pub start: SampleIndex,
    /// Each item is its own sample index
    pub items: Vec<u64>,
    pub tags: Vec<Tag>,
}

impl Batch {
    pub fn end(&self) -> SampleIndex {
        self.start + self.items.len() as u64
    }
}

/// Simulated hardware source
pub struct RadioStream {
    rate: f64,
    center_freq: f64,
    /// Hardware time of the most recent re-timing
    time_ref: RadioTime,
    ref_sample: SampleIndex,
    retag_pending: bool,
    produced: SampleIndex,
    batch: (usize, usize),
    rng: StdRng,
}

impl RadioStream {
    /// Stream at `rate` whose first sample is at hardware time `start`
    pub fn new(rate: f64, start: RadioTime, seed: u64) -> Self {
        RadioStream {
            rate,
            center_freq: 0.0,
            time_ref: start,
            ref_sample: 0,
            retag_pending: true,
            produced: 0,
            batch: (256, 4096),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Inclusive bounds on batch size
    pub fn with_batch_size(mut self, min: usize, max: usize) -> Self {
        let min = min.max(1);
        self.batch = (min, max.max(min));
        self
    }

    pub fn with_center_freq(mut self, freq: f64) -> Self {
        self.center_freq = freq;
        self
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn produced(&self) -> SampleIndex {
        self.produced
    }

    /// Hardware time of `sample` under the current reference
    pub fn time_of(&self, sample: SampleIndex) -> RadioTime {
        let delta = (sample as f64 - self.ref_sample as f64) / self.rate;
        self.time_ref.saturating_add_secs(delta)
    }

    /// Re-time the stream: the next batch starts at hardware time `time`
    /// and carries fresh time tags
    pub fn retag(&mut self, time: RadioTime) {
        self.time_ref = time;
        self.ref_sample = self.produced;
        self.retag_pending = true;
    }

    /// Next batch of random size
    pub fn next_batch(&mut self) -> Batch {
        let n = self.rng.gen_range(self.batch.0..=self.batch.1);
        self.next_batch_of(n)
    }

    pub fn next_batch_of(&mut self, n: usize) -> Batch {
        let start = self.produced;
        let mut tags = Vec::new();
        if self.retag_pending && n > 0 {
            self.retag_pending = false;
            tags.push(Tag::new(start, keys::RX_TIME, self.time_ref.into()));
            tags.push(Tag::new(start, keys::RX_RATE, Value::F64(self.rate)));
            tags.push(Tag::new(start, keys::RX_FREQ, Value::F64(self.center_freq)));
        }
        self.produced += n as u64;
        Batch {
            start,
            items: (start..self.produced).collect(),
            tags,
        }
    }
}

/// Drives one block over pushed input
pub struct BlockRunner<B> {
    block: B,
    items: Vec<u64>,
    tags: Vec<Tag>,
    nitems_read: SampleIndex,
    nitems_written: SampleIndex,
    output: WorkOutput<u64>,
    passes: usize,
}

impl<B: Block<u64>> BlockRunner<B> {
    pub fn new(block: B) -> Self {
        BlockRunner {
            block,
            items: Vec::new(),
            tags: Vec::new(),
            nitems_read: 0,
            nitems_written: 0,
            output: WorkOutput::new(),
            passes: 0,
        }
    }

    pub fn block(&self) -> &B {
        &self.block
    }

    pub fn nitems_read(&self) -> SampleIndex {
        self.nitems_read
    }

    pub fn nitems_written(&self) -> SampleIndex {
        self.nitems_written
    }

    /// Work passes run so far, including ones that made no progress
    pub fn passes(&self) -> usize {
        self.passes
    }

    pub fn push(&mut self, items: &[u64], tags: &[Tag]) {
        self.items.extend_from_slice(items);
        self.tags.extend_from_slice(tags);
    }

    pub fn push_batch(&mut self, batch: &Batch) {
        self.push(&batch.items, &batch.tags);
    }

    /// Run one pass over everything buffered
    pub fn run_once(&mut self) -> WorkStatus {
        let mut out = WorkOutput::new();
        let window = WorkWindow::new(self.nitems_read, &self.items, &self.tags);
        let status = self.block.work(&window, &mut out);
        self.passes += 1;

        let consumed = status.consumed.min(self.items.len());
        let boundary = self.nitems_read + consumed as u64;
        let (forwarded, kept): (Vec<Tag>, Vec<Tag>) =
            self.tags.drain(..).partition(|t| t.offset < boundary);
        self.tags = kept;

        // Map forwarded tags through the pass's rate change
        for mut tag in forwarded {
            let rel = (tag.offset - self.nitems_read) as f64;
            let scaled = if consumed > 0 {
                rel * status.produced as f64 / consumed as f64
            } else {
                0.0
            };
            tag.offset = self.nitems_written + scaled as u64;
            self.output.tags.push(tag);
        }

        self.items.drain(..consumed);
        self.nitems_read = boundary;
        self.nitems_written += status.produced as u64;
        self.output.items.append(&mut out.items);
        self.output.tags.append(&mut out.tags);
        status
    }

    /// Run until the buffer is empty or the block stalls
    ///
    /// A pass that consumes and produces nothing is retried once, since a
    /// block may spend a pass reconfiguring itself.
    pub fn run(&mut self) {
        let mut idle = 0;
        while !self.items.is_empty() && idle < 2 {
            let status = self.run_once();
            if status == WorkStatus::default() {
                idle += 1;
            } else {
                idle = 0;
            }
        }
    }

    /// Take everything produced so far
    pub fn take_output(&mut self) -> WorkOutput<u64> {
        std::mem::take(&mut self.output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use timetag_blocks::{RetuneFollower, RetuneFollowerConfig};

    struct Passthrough;

    impl Block<u64> for Passthrough {
        fn work(&self, input: &WorkWindow<'_, u64>, output: &mut WorkOutput<u64>) -> WorkStatus {
            output.items.extend_from_slice(input.items);
            WorkStatus::sync(input.len())
        }
    }

    #[test]
    fn test_stream_tags_first_sample_and_retag() {
        let mut stream = RadioStream::new(1e6, RadioTime::new(100, 0.0), 3).with_batch_size(10, 20);
        let first = stream.next_batch();
        assert!((10..=20).contains(&first.items.len()));
        assert_eq!(first.tags.len(), 3);
        assert_eq!(first.tags[0].value.radio_time().unwrap(), RadioTime::new(100, 0.0));

        let second = stream.next_batch();
        assert_eq!(second.start, first.end());
        assert!(second.tags.is_empty());

        stream.retag(RadioTime::new(200, 0.0));
        let third = stream.next_batch();
        assert_eq!(third.tags[0].offset, third.start);
        assert_eq!(stream.time_of(third.start + 1_000), RadioTime::new(200, 0.001));
    }

    #[test]
    fn test_runner_forwards_tags() {
        let mut stream = RadioStream::new(1e6, RadioTime::new(1, 0.0), 9);
        let mut runner = BlockRunner::new(Passthrough);
        for _ in 0..4 {
            runner.push_batch(&stream.next_batch());
            runner.run();
        }
        let out = runner.take_output();
        assert_eq!(out.items.len() as u64, stream.produced());
        assert_eq!(out.tags.len(), 3);
        assert!(out.tags.iter().all(|t| t.offset == 0));
        assert_eq!(runner.nitems_read(), stream.produced());
    }

    #[test]
    fn test_runner_survives_reconfiguration_pass() {
        let follower = RetuneFollower::new(RetuneFollowerConfig {
            sample_rate: 1e6,
            ..Default::default()
        })
        .unwrap();
        let mut runner = BlockRunner::new(follower);
        runner.push(
            &(0..100).collect::<Vec<_>>(),
            &[Tag::new(40, keys::SET_FREQ, Value::F64(5e3))],
        );
        runner.run();

        assert_eq!(runner.nitems_read(), 100);
        assert_eq!(runner.block().center_freq(), 5e3);
        assert!(runner.passes() >= 3);
    }
}
