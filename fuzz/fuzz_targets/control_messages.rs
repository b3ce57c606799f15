#![no_main]

use arbitrary::{Arbitrary, Result, Unstructured};
use libfuzzer_sys::fuzz_target;
use timetag_blocks::{
    Block, MessageHandler, PduEmitterConfig, RetuneFollower, RetuneFollowerConfig,
    RetuneSchedulerConfig, SampleTriggeredEmitter, TagOffsetConfig, TagTimeOffsetPropagator,
    TimedRetuneScheduler, Trigger, WorkOutput, WorkWindow,
};
use timetag_core::{keys, FrequencyChange, Tag, TriggerEvent, Value};

/// Bound nesting so a testcase can't build an enormous value tree.
const MAX_DEPTH: usize = 4;
const MAX_OPS: usize = 128;
const MAX_WINDOW: usize = 4096;

const PORTS: &[&str] = &[keys::SET, keys::COMMAND, keys::FREQ, keys::DISARM, "interval", "bogus"];
const KEYS: &[&str] = &[
    keys::FREQ,
    keys::TIME,
    keys::PHASE,
    keys::RX_TIME,
    keys::SET_FREQ,
    keys::TRIGGER_TIME,
    "x",
];

fn key(u: &mut Unstructured<'_>) -> Result<String> {
    Ok(u.choose(KEYS)?.to_string())
}

fn value(u: &mut Unstructured<'_>, depth: usize) -> Result<Value> {
    let leaf = depth >= MAX_DEPTH;
    let kind: u8 = u.int_in_range(0..=if leaf { 5 } else { 8 })?;
    Ok(match kind {
        0 => Value::Nil,
        1 => Value::Bool(u.arbitrary()?),
        2 => Value::U64(u.arbitrary()?),
        3 => Value::I64(u.arbitrary()?),
        4 => Value::F64(u.arbitrary()?),
        5 => Value::Symbol(key(u)?),
        6 => Value::pair(value(u, depth + 1)?, value(u, depth + 1)?),
        7 => {
            let n = u.int_in_range(0..=3)?;
            let mut items = Vec::with_capacity(n);
            for _ in 0..n {
                items.push(value(u, depth + 1)?);
            }
            Value::Tuple(items)
        }
        _ => {
            let mut dict = Value::dict();
            for _ in 0..u.int_in_range(0..=3)? {
                dict = dict.with_entry(key(u)?, value(u, depth + 1)?);
            }
            dict
        }
    })
}

#[derive(Debug)]
enum Op {
    Message { port: &'static str, msg: Value },
    Window { len: usize, tags: Vec<(u16, String, Value)> },
}

impl<'a> Arbitrary<'a> for Op {
    fn arbitrary(u: &mut Unstructured<'a>) -> Result<Self> {
        if u.arbitrary()? {
            Ok(Op::Message {
                port: *u.choose(PORTS)?,
                msg: value(u, 0)?,
            })
        } else {
            let len = u.int_in_range(0..=MAX_WINDOW)?;
            let mut tags = Vec::new();
            for _ in 0..u.int_in_range(0..=4)? {
                tags.push((u.arbitrary()?, key(u)?, value(u, 0)?));
            }
            Ok(Op::Window { len, tags })
        }
    }
}

fuzz_target!(|data: &[u8]| {
    let mut u = Unstructured::new(data);
    let mut ops = Vec::new();
    while ops.len() < MAX_OPS && !u.is_empty() {
        match Op::arbitrary(&mut u) {
            Ok(op) => ops.push(op),
            Err(_) => break,
        }
    }

    let scheduler = TimedRetuneScheduler::new(RetuneSchedulerConfig::default()).unwrap();
    let propagator = TagTimeOffsetPropagator::new(TagOffsetConfig {
        interval: 1000,
        ..Default::default()
    })
    .unwrap();
    let pdu = SampleTriggeredEmitter::new(PduEmitterConfig::default()).unwrap();
    let follower = RetuneFollower::new(RetuneFollowerConfig {
        decimation: 3,
        ..Default::default()
    })
    .unwrap();

    let mut read = 0u64;
    let mut follower_read = 0u64;
    let mut last_retune = 0u64;
    for op in ops {
        match op {
            Op::Message { port, msg } => {
                let _ = Trigger::from_value(&msg);
                let _ = FrequencyChange::from_value(&msg);
                let _ = TriggerEvent::from_value(&msg);
                scheduler.handle_message(port, &msg);
                propagator.handle_message(port, &msg);
                pdu.handle_message(port, &msg);
                follower.handle_message(port, &msg);
            }
            Op::Window { len, tags } => {
                let items = vec![0u8; len];
                let mut tags: Vec<Tag> = tags
                    .into_iter()
                    .filter(|(at, _, _)| (*at as usize) < len)
                    .map(|(at, key, value)| Tag::new(read + u64::from(at), key, value))
                    .collect();
                tags.sort_by_key(|t| t.offset);
                let window = WorkWindow::new(read, &items, &tags);

                let mut out = WorkOutput::new();
                scheduler.work(&window, &mut out);
                for tag in out.tags_with_key(keys::SET_FREQ) {
                    assert!(tag.offset >= last_retune);
                    assert!(tag.offset >= read && tag.offset < read + len as u64);
                    last_retune = tag.offset;
                }

                out.clear();
                propagator.work(&window, &mut out);
                assert_eq!(out.items.len(), len);
                pdu.work(&window, &mut out);

                // The follower sees the same samples on its own cursor
                let follower_tags: Vec<Tag> = tags
                    .iter()
                    .map(|t| Tag::new(t.offset - read + follower_read, t.key.clone(), t.value.clone()))
                    .collect();
                let status = follower.work(
                    &WorkWindow::new(follower_read, &items, &follower_tags),
                    &mut out,
                );
                assert!(status.consumed <= len);
                follower_read += status.consumed as u64;

                read += len as u64;
            }
        }
    }
});
