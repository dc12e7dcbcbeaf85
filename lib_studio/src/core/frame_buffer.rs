//! # Ingest Buffer
//!
//! Holds the messages received since the last tick until the player coalesces
//! them into one `Frame`. The buffer is bounded both by message count and by an
//! estimated byte footprint; when either limit is breached the oldest messages
//! are evicted and a warning is logged, so a burst from the source can never
//! grow memory without bound.

use std::collections::VecDeque;
use std::sync::Arc;

use super::registry::Demand;
use crate::model::{Frame, Message};

pub struct FrameBuffer {
    pending: VecDeque<Arc<Message>>,
    /// Maximum number of buffered messages.
    capacity: usize,
    /// Maximum estimated bytes of buffered messages.
    max_bytes: usize,
    current_bytes: usize,
    /// Messages evicted since the buffer was created.
    evicted_total: u64,
    /// The next frame must carry `did_seek`.
    pending_seek: bool,
}

impl FrameBuffer {
    pub fn new(capacity: usize, max_bytes: usize) -> Self {
        Self {
            pending: VecDeque::new(),
            capacity: capacity.max(1),
            max_bytes: max_bytes.max(1),
            current_bytes: 0,
            evicted_total: 0,
            pending_seek: false,
        }
    }

    /// Buffers a message. Returns the number of older messages evicted to make
    /// room for it.
    pub fn push(&mut self, message: Message) -> usize {
        self.current_bytes += message.approximate_size();
        self.pending.push_back(Arc::new(message));

        let mut evicted = 0;
        while self.pending.len() > 1
            && (self.pending.len() > self.capacity || self.current_bytes > self.max_bytes)
        {
            if let Some(old) = self.pending.pop_front() {
                self.current_bytes = self.current_bytes.saturating_sub(old.approximate_size());
                evicted += 1;
            }
        }
        if evicted > 0 {
            self.evicted_total += evicted as u64;
            log::warn!(
                "Ingest buffer full ({} messages, ~{} bytes). Evicted {} oldest message(s).",
                self.pending.len(),
                self.current_bytes,
                evicted
            );
        }
        evicted
    }

    /// Discards what is buffered and flags the next frame as a seek.
    pub fn mark_seek(&mut self) {
        self.clear();
        self.pending_seek = true;
    }

    pub fn clear(&mut self) {
        self.pending.clear();
        self.current_bytes = 0;
    }

    /// Drops buffered messages whose topic is no longer demanded. Returns the
    /// number removed.
    pub fn retain_demanded(&mut self, demand: &Demand) -> usize {
        let before = self.pending.len();
        self.pending.retain(|m| demand.contains(&m.topic));
        self.current_bytes = self.pending.iter().map(|m| m.approximate_size()).sum();
        before - self.pending.len()
    }

    /// True when the next tick has something to dispatch.
    pub fn has_pending(&self) -> bool {
        self.pending_seek || !self.pending.is_empty()
    }

    /// Drains the buffer into a frame. Messages are ordered by receive time;
    /// the sort is stable, so equal times keep arrival order.
    pub fn take(&mut self, session: u64, seq: u64) -> Frame {
        let mut messages: Vec<Arc<Message>> = self.pending.drain(..).collect();
        messages.sort_by_key(|m| m.receive_time);
        self.current_bytes = 0;
        let did_seek = std::mem::take(&mut self.pending_seek);
        Frame {
            session,
            seq,
            did_seek,
            messages,
        }
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn current_bytes(&self) -> usize {
        self.current_bytes
    }

    pub fn evicted_total(&self) -> u64 {
        self.evicted_total
    }

    /// Fill level relative to the message-count capacity.
    pub fn usage_percent(&self) -> f64 {
        (self.pending.len() as f64 / self.capacity as f64) * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{StructuredValue, Timestamp};

    fn msg(topic: &str, sec: u32) -> Message {
        Message::new(topic, "t/T", Timestamp::new(sec, 0), StructuredValue::Int(sec as i64))
    }

    #[test]
    fn evicts_oldest_when_full() {
        let mut buffer = FrameBuffer::new(3, usize::MAX);
        for sec in 1..=5 {
            buffer.push(msg("/a", sec));
        }
        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.evicted_total(), 2);
        let frame = buffer.take(1, 1);
        let secs: Vec<_> = frame.messages.iter().map(|m| m.receive_time.sec).collect();
        assert_eq!(secs, vec![3, 4, 5]);
    }

    #[test]
    fn byte_limit_keeps_at_least_the_newest_message() {
        let mut buffer = FrameBuffer::new(100, 1);
        buffer.push(msg("/a", 1));
        buffer.push(msg("/a", 2));
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn undemanded_topics_are_pruned() {
        use crate::core::registry::{SubscribeOptions, SubscriberId, SubscriptionRegistry};

        let registry = SubscriptionRegistry::new();
        registry.subscribe(SubscriberId::next(), "/a", SubscribeOptions::default());
        let mut buffer = FrameBuffer::new(10, usize::MAX);
        buffer.push(msg("/a", 1));
        buffer.push(msg("/b", 2));
        buffer.push(msg("/a", 3));

        assert_eq!(buffer.retain_demanded(&registry.current_demand()), 1);
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.current_bytes(), 2 * msg("/a", 1).approximate_size());
        let topics: Vec<_> = buffer.take(1, 1).messages.iter().map(|m| m.topic.clone()).collect();
        assert_eq!(topics, vec!["/a", "/a"]);
    }

    #[test]
    fn frame_is_time_ordered_and_seek_flag_is_consumed() {
        let mut buffer = FrameBuffer::new(10, usize::MAX);
        buffer.push(msg("/a", 1));
        buffer.mark_seek();
        assert!(buffer.is_empty());
        assert!(buffer.has_pending());
        buffer.push(msg("/b", 9));
        buffer.push(msg("/a", 7));
        buffer.push(msg("/a", 8));

        let frame = buffer.take(4, 2);
        assert!(frame.did_seek);
        assert_eq!((frame.session, frame.seq), (4, 2));
        let secs: Vec<_> = frame.messages.iter().map(|m| m.receive_time.sec).collect();
        assert_eq!(secs, vec![7, 8, 9]);
        assert!(!buffer.has_pending());
        assert!(!buffer.take(4, 3).did_seek);
    }
}
