//! # Messages, Timestamps and Frames
//!
//! A `Message` is immutable once produced by the player. Frames bundle the
//! messages of one dispatch cycle and are shared, never copied, between all
//! subscribers (`Arc<Frame>`).

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::value::StructuredValue;

const NANOS_PER_SEC: u64 = 1_000_000_000;

/// A receive time with nanosecond resolution (`sec` + `nsec`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp {
    pub sec: u32,
    pub nsec: u32,
}

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp { sec: 0, nsec: 0 };

    /// Builds a timestamp, normalizing `nsec` overflow into seconds.
    pub fn new(sec: u32, nsec: u32) -> Self {
        Self::from_nanos(u64::from(sec) * NANOS_PER_SEC + u64::from(nsec))
    }

    pub fn from_nanos(nanos: u64) -> Self {
        let sec = (nanos / NANOS_PER_SEC).min(u64::from(u32::MAX)) as u32;
        Self {
            sec,
            nsec: (nanos % NANOS_PER_SEC) as u32,
        }
    }

    pub fn from_secs_f64(secs: f64) -> Self {
        if !secs.is_finite() || secs <= 0.0 {
            return Self::ZERO;
        }
        Self::from_nanos((secs * NANOS_PER_SEC as f64).round() as u64)
    }

    pub fn to_nanos(self) -> u64 {
        u64::from(self.sec) * NANOS_PER_SEC + u64::from(self.nsec)
    }

    pub fn as_secs_f64(self) -> f64 {
        f64::from(self.sec) + f64::from(self.nsec) / NANOS_PER_SEC as f64
    }

    /// Time elapsed since `earlier`, zero when `earlier` is later.
    pub fn saturating_since(self, earlier: Timestamp) -> Duration {
        Duration::from_nanos(self.to_nanos().saturating_sub(earlier.to_nanos()))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:09}", self.sec, self.nsec)
    }
}

/// One decoded, topic-tagged message.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub topic: String,
    pub schema_name: String,
    pub receive_time: Timestamp,
    pub data: StructuredValue,
}

impl Message {
    pub fn new(
        topic: impl Into<String>,
        schema_name: impl Into<String>,
        receive_time: Timestamp,
        data: StructuredValue,
    ) -> Self {
        Self {
            topic: topic.into(),
            schema_name: schema_name.into(),
            receive_time,
            data,
        }
    }

    /// Heuristic memory footprint (payload plus the envelope).
    pub fn approximate_size(&self) -> usize {
        self.topic.len() + self.schema_name.len() + 16 + self.data.approximate_size()
    }
}

/// # Frame
///
/// One dispatch unit. `seq` is strictly increasing within one connection
/// `session`; `did_seek` tells every subscriber to drop its cached state
/// before looking at `messages`.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Connection session the frame belongs to. A new connection starts a new
    /// session and restarts `seq` at 1.
    pub session: u64,
    pub seq: u64,
    pub did_seek: bool,
    pub messages: Vec<Arc<Message>>,
}

impl Frame {
    /// Messages of the frame that belong to `topic`, in frame order.
    pub fn messages_on<'a>(&'a self, topic: &'a str) -> impl Iterator<Item = &'a Arc<Message>> + 'a {
        self.messages.iter().filter(move |m| m.topic == topic)
    }

    /// Receive time of the newest message in the frame.
    pub fn latest_time(&self) -> Option<Timestamp> {
        self.messages.iter().map(|m| m.receive_time).max()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_normalizes_and_orders() {
        let t = Timestamp::new(1, 1_500_000_000);
        assert_eq!(t, Timestamp { sec: 2, nsec: 500_000_000 });
        assert!(Timestamp::new(2, 0) < t);
        assert_eq!(t.to_string(), "2.500000000");
    }

    #[test]
    fn timestamp_from_seconds() {
        assert_eq!(Timestamp::from_secs_f64(1.25), Timestamp::new(1, 250_000_000));
        assert_eq!(Timestamp::from_secs_f64(-3.0), Timestamp::ZERO);
        assert_eq!(
            Timestamp::new(3, 0).saturating_since(Timestamp::new(1, 0)),
            Duration::from_secs(2)
        );
    }
}
