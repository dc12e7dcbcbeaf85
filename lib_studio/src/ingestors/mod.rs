//! # Data Sources
//!
//! The boundary between the pipeline and whatever produces messages: a live
//! robot bridge, a recording, a test harness. A source is connected by the
//! player, which then drains the `SourceEvent` channel returned by `connect`
//! and pushes demand and playback commands back through the trait methods.
//!
//! Decoding is not the pipeline's concern: a source hands over payloads that
//! are already `StructuredValue`s, or an `Err` describing why decoding failed.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::core::registry::Demand;
use crate::model::{Capabilities, Datatypes, StructuredValue, Timestamp, Topic};

/// Bridge for externally driven transports.
pub mod channel;
/// Plays back a recorded session from a JSON/JSON5 file.
#[cfg(feature = "replay")]
pub mod replay;

pub use channel::{ChannelSource, ChannelSourceFeed, SourceCall};
#[cfg(feature = "replay")]
pub use replay::{Recording, RecordingError, ReplaySource};

/// A message as delivered by a source, before the player validates it.
#[derive(Debug, Clone, PartialEq)]
pub struct RawMessage {
    pub topic: String,
    pub receive_time: Timestamp,
    /// Decoded payload, or the reason decoding failed.
    pub data: Result<StructuredValue, String>,
}

impl RawMessage {
    pub fn new(topic: impl Into<String>, receive_time: Timestamp, data: StructuredValue) -> Self {
        Self {
            topic: topic.into(),
            receive_time,
            data: Ok(data),
        }
    }

    pub fn undecodable(topic: impl Into<String>, receive_time: Timestamp, reason: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            receive_time,
            data: Err(reason.into()),
        }
    }
}

/// Everything a connected source can report.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceEvent {
    /// The complete topic list and schema set; replaces any previous one.
    Topics { topics: Vec<Topic>, datatypes: Datatypes },
    Message(RawMessage),
    /// The source jumped to a new position; cached state is stale.
    Seeked(Timestamp),
    /// Transport dropped, the source is retrying on its own.
    Disconnected { reason: String },
    /// Transport is back; delivery resumes after a resync.
    Reconnected,
    /// Unrecoverable failure.
    Fatal(String),
    /// A finite source has nothing more to deliver.
    EndOfStream,
}

/// Failures reported by a data source.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    /// Recoverable: the player retries with backoff.
    #[error("transport error: {0}")]
    Transport(String),
    /// Not recoverable: the player moves to the error state.
    #[error("fatal source error: {0}")]
    Terminal(String),
    #[error("operation not supported by this source: {0}")]
    Unsupported(&'static str),
    #[error("service call failed: {0}")]
    ServiceFailed(String),
}

impl SourceError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, SourceError::Transport(_))
    }
}

/// A producer of topic-tagged messages.
///
/// Methods other than `connect` are cheap notifications; implementations must
/// not block in them.
#[async_trait]
pub trait DataSource: Send + Sync + 'static {
    /// Name used in logs.
    fn name(&self) -> &str;

    fn capabilities(&self) -> Capabilities;

    /// Opens the transport. Events arrive on the returned channel until it is
    /// closed, which the player treats as a transport loss.
    async fn connect(&self) -> Result<mpsc::Receiver<SourceEvent>, SourceError>;

    /// The set of topics the pipeline currently wants.
    fn set_subscriptions(&self, demand: &Demand);

    fn seek(&self, _time: Timestamp) -> Result<(), SourceError> {
        Err(SourceError::Unsupported("seek"))
    }

    fn start_playback(&self) -> Result<(), SourceError> {
        Err(SourceError::Unsupported("start_playback"))
    }

    fn pause_playback(&self) -> Result<(), SourceError> {
        Err(SourceError::Unsupported("pause_playback"))
    }

    async fn call_service(
        &self,
        _service: &str,
        _request: StructuredValue,
    ) -> Result<StructuredValue, SourceError> {
        Err(SourceError::Unsupported("call_service"))
    }

    /// Releases the transport. Called once when the player stops.
    fn close(&self);
}
