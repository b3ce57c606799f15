//! Stream plumbing - work windows, tag output and message ports
//!
//! The host runtime calls `work` repeatedly and sequentially on each block
//! with a window of input samples starting at `nitems_read`. Tags carry
//! absolute sample offsets.

use std::sync::Arc;

use parking_lot::Mutex;
use timetag_core::{SampleIndex, Tag, TimetagResult, Value};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{trace, warn};

/// Input handed to one work pass
#[derive(Clone, Copy, Debug)]
pub struct WorkWindow<'a, T> {
    /// Absolute index of `items[0]`
    pub nitems_read: SampleIndex,
    pub items: &'a [T],
    /// Tags attached to samples of this window
    pub tags: &'a [Tag],
}

impl<'a, T> WorkWindow<'a, T> {
    pub fn new(nitems_read: SampleIndex, items: &'a [T], tags: &'a [Tag]) -> Self {
        WorkWindow {
            nitems_read,
            items,
            tags,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// First sample index of the window
    #[inline]
    pub fn start(&self) -> SampleIndex {
        self.nitems_read
    }

    /// First sample index after the window
    #[inline]
    pub fn end(&self) -> SampleIndex {
        self.nitems_read + self.items.len() as u64
    }

    /// Tags with `key` inside the window, in offset order
    pub fn tags_with_key<'k>(&self, key: &'k str) -> impl Iterator<Item = &'a Tag> + 'k
    where
        'a: 'k,
    {
        self.tags_in_range(key, self.start(), self.end())
    }

    /// Tags with `key` whose offset lies in `[start, end)`
    pub fn tags_in_range<'k>(
        &self,
        key: &'k str,
        start: SampleIndex,
        end: SampleIndex,
    ) -> impl Iterator<Item = &'a Tag> + 'k
    where
        'a: 'k,
    {
        self.tags
            .iter()
            .filter(move |tag| tag.key == key && tag.offset >= start && tag.offset < end)
    }
}

/// Output of one work pass
#[derive(Clone, Debug)]
pub struct WorkOutput<T> {
    pub items: Vec<T>,
    pub tags: Vec<Tag>,
}

impl<T> Default for WorkOutput<T> {
    fn default() -> Self {
        WorkOutput {
            items: Vec::new(),
            tags: Vec::new(),
        }
    }
}

impl<T> WorkOutput<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_item_tag(&mut self, offset: SampleIndex, key: impl Into<String>, value: Value) {
        self.tags.push(Tag::new(offset, key, value));
    }

    pub fn tags_with_key<'k>(&'k self, key: &'k str) -> impl Iterator<Item = &'k Tag> + 'k {
        self.tags.iter().filter(move |tag| tag.key == key)
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.tags.clear();
    }
}

/// Items consumed from the input and produced on the output by one pass
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WorkStatus {
    pub consumed: usize,
    pub produced: usize,
}

impl WorkStatus {
    /// One output item per input item
    pub fn sync(n: usize) -> Self {
        WorkStatus {
            consumed: n,
            produced: n,
        }
    }

    /// Input consumed, nothing produced
    pub fn sink(n: usize) -> Self {
        WorkStatus {
            consumed: n,
            produced: 0,
        }
    }
}

/// A stream-processing component
///
/// `work` is never called concurrently with itself on one instance, but
/// message handlers and timer threads may run alongside it.
pub trait Block<T>: Send + Sync {
    fn start(&self) -> TimetagResult<()> {
        Ok(())
    }

    fn stop(&self) {}

    fn work(&self, input: &WorkWindow<'_, T>, output: &mut WorkOutput<T>) -> WorkStatus;
}

/// Inbound message handling
pub trait MessageHandler: Send + Sync {
    /// Deliver `msg` to the named input port. Malformed messages are
    /// logged and discarded.
    fn handle_message(&self, port: &str, msg: &Value);
}

pub(crate) fn unknown_port(block: &str, port: &str) {
    warn!(block, port, "message for unknown port discarded");
}

/// Outbound event channel with any number of subscribers
///
/// Publishing never blocks; subscribers whose receiver was dropped are
/// pruned on the next publish.
pub struct MessagePort<T> {
    name: Arc<str>,
    subscribers: Arc<Mutex<Vec<UnboundedSender<T>>>>,
}

impl<T> Clone for MessagePort<T> {
    fn clone(&self) -> Self {
        MessagePort {
            name: Arc::clone(&self.name),
            subscribers: Arc::clone(&self.subscribers),
        }
    }
}

impl<T: Clone + Send + 'static> MessagePort<T> {
    pub fn new(name: &str) -> Self {
        MessagePort {
            name: Arc::from(name),
            subscribers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn subscribe(&self) -> UnboundedReceiver<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push(tx);
        rx
    }

    /// Deliver `msg` to every live subscriber, returning how many got it
    pub fn publish(&self, msg: T) -> usize {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| tx.send(msg.clone()).is_ok());
        if subscribers.is_empty() {
            trace!(port = %self.name, "published with no subscribers");
        }
        subscribers.len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_bounds_and_tag_filter() {
        let items = [0u8; 10];
        let tags = vec![
            Tag::new(100, "rx_time", Value::Nil),
            Tag::new(104, "other", Value::Nil),
            Tag::new(109, "rx_time", Value::Nil),
            Tag::new(110, "rx_time", Value::Nil),
        ];
        let window = WorkWindow::new(100, &items, &tags);

        assert_eq!(window.start(), 100);
        assert_eq!(window.end(), 110);
        let offsets: Vec<_> = window.tags_with_key("rx_time").map(|t| t.offset).collect();
        assert_eq!(offsets, vec![100, 109]);
        assert_eq!(window.tags_in_range("rx_time", 101, 110).count(), 1);
    }

    #[test]
    fn test_output_tags() {
        let mut out: WorkOutput<u8> = WorkOutput::new();
        out.add_item_tag(5, "set_freq", Value::F64(-100.0));
        out.add_item_tag(6, "freq", Value::F64(1.0));
        assert_eq!(out.tags_with_key("set_freq").count(), 1);
        out.clear();
        assert!(out.tags.is_empty());
    }

    #[tokio::test]
    async fn test_port_fans_out_and_prunes() {
        let port: MessagePort<u32> = MessagePort::new("trig");
        let mut a = port.subscribe();
        let b = port.subscribe();
        drop(b);

        assert_eq!(port.publish(7), 1);
        assert_eq!(a.recv().await, Some(7));
        assert_eq!(port.subscriber_count(), 1);
        assert_eq!(port.name(), "trig");
    }
}
