//! # Replay Source
//!
//! Plays a recorded session back as a `DataSource`. Recordings are JSON or
//! JSON5 documents:
//!
//! ```json5
//! {
//!   topics: [{ name: "/battery", schemaName: "sensor/Battery" }],
//!   datatypes: [{ name: "sensor/Battery", fields: [{ name: "voltage", type: "float64" }] }],
//!   messages: [{ topic: "/battery", receiveTime: { sec: 1, nsec: 0 }, data: { voltage: 12.1 } }],
//! }
//! ```
//!
//! ## Logic:
//! 1.  `connect` spawns a playback task that first reports the topic list, then
//!     waits for the first demand before delivering anything.
//! 2.  Messages are delivered in receive-time order, only for demanded topics.
//!     With pacing enabled, gaps between receive times are reproduced, divided
//!     by the playback speed.
//! 3.  `seek` moves the cursor to the first message at or after the target and
//!     reports `Seeked` before the next delivery.
//! 4.  Reaching the end reports `EndOfStream` once; a later seek restarts
//!     delivery.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;

use super::{DataSource, RawMessage, SourceError, SourceEvent};
use crate::core::registry::Demand;
use crate::model::{Capabilities, Capability, Datatypes, Schema, StructuredValue, Timestamp, Topic};

const EVENT_BUFFER: usize = 256;

#[derive(Debug, Error)]
pub enum RecordingError {
    #[error("failed to read recording {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse recording: {0}")]
    Parse(String),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordedMessage {
    pub topic: String,
    pub receive_time: Timestamp,
    pub data: StructuredValue,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
struct RecordingFile {
    #[serde(default)]
    topics: Vec<Topic>,
    #[serde(default)]
    datatypes: Vec<Schema>,
    #[serde(default)]
    messages: Vec<RecordedMessage>,
}

/// A loaded recording. Messages are kept sorted by receive time.
#[derive(Debug, Clone, PartialEq)]
pub struct Recording {
    pub topics: Vec<Topic>,
    pub datatypes: Datatypes,
    pub messages: Vec<RecordedMessage>,
}

impl Recording {
    pub fn new(topics: Vec<Topic>, datatypes: Datatypes, mut messages: Vec<RecordedMessage>) -> Self {
        messages.sort_by_key(|m| m.receive_time);
        Self {
            topics,
            datatypes,
            messages,
        }
    }

    /// Parses a JSON or JSON5 document.
    pub fn parse(content: &str) -> Result<Self, RecordingError> {
        let file: RecordingFile =
            serde_json5::from_str(content).map_err(|e| RecordingError::Parse(e.to_string()))?;
        Ok(Self::new(
            file.topics,
            file.datatypes.into_iter().collect(),
            file.messages,
        ))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, RecordingError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| RecordingError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let recording = Self::parse(&content)?;
        log::info!(
            "Loaded recording {} ({} topics, {} messages)",
            path.display(),
            recording.topics.len(),
            recording.messages.len()
        );
        Ok(recording)
    }

    pub fn start_time(&self) -> Option<Timestamp> {
        self.messages.first().map(|m| m.receive_time)
    }

    pub fn end_time(&self) -> Option<Timestamp> {
        self.messages.last().map(|m| m.receive_time)
    }

    /// Index of the first message at or after `time`.
    fn position_of(&self, time: Timestamp) -> usize {
        self.messages.partition_point(|m| m.receive_time < time)
    }
}

#[derive(Debug)]
struct Cursor {
    position: usize,
    playing: bool,
    speed: f64,
    demand: Option<Arc<Demand>>,
    pending_seek: Option<Timestamp>,
    end_reported: bool,
}

struct Shared {
    recording: Recording,
    pacing: bool,
    cursor: Mutex<Cursor>,
    wake: Notify,
    task: Mutex<Option<CancellationToken>>,
}

impl Shared {
    fn cursor(&self) -> MutexGuard<'_, Cursor> {
        self.cursor.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

enum Step {
    Seeked(Timestamp),
    Deliver { index: usize, speed: f64, wanted: bool },
    End,
    Wait,
}

pub struct ReplaySource {
    name: String,
    shared: Arc<Shared>,
}

impl ReplaySource {
    /// A paced source that starts playing as soon as it has demand.
    pub fn new(name: impl Into<String>, recording: Recording) -> Self {
        Self::build(name.into(), recording, true)
    }

    /// Delivers messages as fast as the consumer accepts them.
    pub fn unpaced(name: impl Into<String>, recording: Recording) -> Self {
        Self::build(name.into(), recording, false)
    }

    fn build(name: String, recording: Recording, pacing: bool) -> Self {
        Self {
            name,
            shared: Arc::new(Shared {
                recording,
                pacing,
                cursor: Mutex::new(Cursor {
                    position: 0,
                    playing: true,
                    speed: 1.0,
                    demand: None,
                    pending_seek: None,
                    end_reported: false,
                }),
                wake: Notify::new(),
                task: Mutex::new(None),
            }),
        }
    }

    pub fn recording(&self) -> &Recording {
        &self.shared.recording
    }

    /// Receive time of the next message to be delivered.
    pub fn position(&self) -> Option<Timestamp> {
        let position = self.shared.cursor().position;
        self.shared
            .recording
            .messages
            .get(position)
            .map(|m| m.receive_time)
    }

    pub fn is_playing(&self) -> bool {
        self.shared.cursor().playing
    }

    /// Changes the playback speed factor. Must be finite and positive.
    pub fn set_speed(&self, speed: f64) -> Result<(), SourceError> {
        if !speed.is_finite() || speed <= 0.0 {
            return Err(SourceError::Unsupported("non-positive playback speed"));
        }
        self.shared.cursor().speed = speed;
        log::debug!("[{}] playback speed set to {}", self.name, speed);
        Ok(())
    }

    fn stop_task(&self) {
        let previous = self
            .shared
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(cancel) = previous {
            cancel.cancel();
        }
    }
}

#[async_trait]
impl DataSource for ReplaySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::from([Capability::PlaybackControl, Capability::SetSpeed])
    }

    async fn connect(&self) -> Result<mpsc::Receiver<SourceEvent>, SourceError> {
        self.stop_task();
        let cancel = CancellationToken::new();
        *self
            .shared
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(cancel.clone());
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        tokio::spawn(playback(Arc::clone(&self.shared), tx, cancel));
        log::info!("[{}] replay started", self.name);
        Ok(rx)
    }

    fn set_subscriptions(&self, demand: &Demand) {
        self.shared.cursor().demand = Some(Arc::new(demand.clone()));
        self.shared.wake.notify_one();
    }

    fn seek(&self, time: Timestamp) -> Result<(), SourceError> {
        {
            let mut cursor = self.shared.cursor();
            cursor.position = self.shared.recording.position_of(time);
            cursor.pending_seek = Some(time);
            cursor.end_reported = false;
        }
        self.shared.wake.notify_one();
        Ok(())
    }

    fn start_playback(&self) -> Result<(), SourceError> {
        self.shared.cursor().playing = true;
        self.shared.wake.notify_one();
        Ok(())
    }

    fn pause_playback(&self) -> Result<(), SourceError> {
        self.shared.cursor().playing = false;
        Ok(())
    }

    fn close(&self) {
        self.stop_task();
        log::info!("[{}] replay closed", self.name);
    }
}

fn next_step(shared: &Shared) -> Step {
    let mut cursor = shared.cursor();
    if let Some(time) = cursor.pending_seek.take() {
        return Step::Seeked(time);
    }
    let Some(demand) = cursor.demand.clone() else {
        return Step::Wait;
    };
    if !cursor.playing {
        return Step::Wait;
    }
    let Some(message) = shared.recording.messages.get(cursor.position) else {
        if cursor.end_reported {
            return Step::Wait;
        }
        cursor.end_reported = true;
        return Step::End;
    };
    let index = cursor.position;
    cursor.position += 1;
    Step::Deliver {
        index,
        speed: cursor.speed,
        wanted: demand.contains(&message.topic),
    }
}

async fn playback(shared: Arc<Shared>, tx: mpsc::Sender<SourceEvent>, cancel: CancellationToken) {
    let recording = &shared.recording;
    let topics = SourceEvent::Topics {
        topics: recording.topics.clone(),
        datatypes: recording.datatypes.clone(),
    };
    if tx.send(topics).await.is_err() {
        return;
    }

    let mut last_time: Option<Timestamp> = None;
    loop {
        let event = match next_step(&shared) {
            Step::Seeked(time) => {
                last_time = None;
                SourceEvent::Seeked(time)
            }
            Step::End => SourceEvent::EndOfStream,
            Step::Wait => {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = shared.wake.notified() => continue,
                }
            }
            Step::Deliver { index, speed, wanted } => {
                let message = &recording.messages[index];
                if shared.pacing {
                    if let Some(previous) = last_time {
                        let delay = message.receive_time.saturating_since(previous).div_f64(speed);
                        tokio::select! {
                            _ = cancel.cancelled() => return,
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                }
                last_time = Some(message.receive_time);
                if !wanted {
                    continue;
                }
                SourceEvent::Message(RawMessage::new(
                    message.topic.clone(),
                    message.receive_time,
                    message.data.clone(),
                ))
            }
        };
        tokio::select! {
            _ = cancel.cancelled() => return,
            sent = tx.send(event) => {
                if sent.is_err() {
                    return;
                }
            }
        }
    }
}
