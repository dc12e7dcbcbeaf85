//! # Channel Source
//!
//! A `DataSource` whose events are pushed from the outside through a
//! `ChannelSourceFeed`. Transport adapters (a websocket bridge, a ROS node, a
//! test harness) own the feed and the pipeline owns the source.
//!
//! Each `connect` opens a fresh channel. `ChannelSourceFeed::drop_connection`
//! closes the current one, which the player sees as a transport loss and
//! answers with a reconnect. Calls made by the player on the source are
//! recorded and can be inspected through the feed.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

use super::{DataSource, RawMessage, SourceError, SourceEvent};
use crate::core::registry::Demand;
use crate::model::{Capabilities, Capability, Datatypes, StructuredValue, Timestamp, Topic};

const DEFAULT_BUFFER: usize = 1024;

type ServiceHandler =
    Arc<dyn Fn(&str, &StructuredValue) -> Result<StructuredValue, SourceError> + Send + Sync>;

/// A call the player made on the source.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceCall {
    SetSubscriptions(Vec<String>),
    Seek(Timestamp),
    Play,
    Pause,
    CallService(String),
    Close,
}

struct Shared {
    connection: watch::Sender<Option<mpsc::Sender<SourceEvent>>>,
    connect_failures: Mutex<VecDeque<SourceError>>,
    calls: Mutex<Vec<SourceCall>>,
    connects: Mutex<usize>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    fn record(&self, call: SourceCall) {
        lock(&self.calls).push(call);
    }
}

/// The source half, handed to `MessagePipeline::connect`.
pub struct ChannelSource {
    name: String,
    capabilities: Capabilities,
    buffer: usize,
    service_handler: Option<ServiceHandler>,
    shared: Arc<Shared>,
}

/// The producer half, kept by whoever drives the transport.
#[derive(Clone)]
pub struct ChannelSourceFeed {
    shared: Arc<Shared>,
}

impl ChannelSource {
    pub fn new(name: impl Into<String>, capabilities: Capabilities) -> (Self, ChannelSourceFeed) {
        let (connection, _) = watch::channel(None);
        let shared = Arc::new(Shared {
            connection,
            connect_failures: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
            connects: Mutex::new(0),
        });
        let source = Self {
            name: name.into(),
            capabilities,
            buffer: DEFAULT_BUFFER,
            service_handler: None,
            shared: Arc::clone(&shared),
        };
        (source, ChannelSourceFeed { shared })
    }

    /// Capacity of each connection's event channel.
    pub fn with_buffer(mut self, buffer: usize) -> Self {
        self.buffer = buffer.max(1);
        self
    }

    /// Answers service calls with `handler`. Also advertises `CallServices`.
    pub fn with_service_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&str, &StructuredValue) -> Result<StructuredValue, SourceError> + Send + Sync + 'static,
    {
        self.capabilities.insert(Capability::CallServices);
        self.service_handler = Some(Arc::new(handler));
        self
    }

    fn playback_call(&self, call: SourceCall, op: &'static str) -> Result<(), SourceError> {
        if !self.capabilities.contains(Capability::PlaybackControl) {
            return Err(SourceError::Unsupported(op));
        }
        self.shared.record(call);
        Ok(())
    }
}

#[async_trait]
impl DataSource for ChannelSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> Capabilities {
        self.capabilities.clone()
    }

    async fn connect(&self) -> Result<mpsc::Receiver<SourceEvent>, SourceError> {
        *lock(&self.shared.connects) += 1;
        let injected = lock(&self.shared.connect_failures).pop_front();
        if let Some(err) = injected {
            log::warn!("[{}] connect failed: {}", self.name, err);
            return Err(err);
        }
        let (tx, rx) = mpsc::channel(self.buffer);
        self.shared.connection.send_replace(Some(tx));
        log::info!("[{}] connected", self.name);
        Ok(rx)
    }

    fn set_subscriptions(&self, demand: &Demand) {
        self.shared.record(SourceCall::SetSubscriptions(demand.topic_names()));
    }

    fn seek(&self, time: Timestamp) -> Result<(), SourceError> {
        self.playback_call(SourceCall::Seek(time), "seek")
    }

    fn start_playback(&self) -> Result<(), SourceError> {
        self.playback_call(SourceCall::Play, "start_playback")
    }

    fn pause_playback(&self) -> Result<(), SourceError> {
        self.playback_call(SourceCall::Pause, "pause_playback")
    }

    async fn call_service(
        &self,
        service: &str,
        request: StructuredValue,
    ) -> Result<StructuredValue, SourceError> {
        self.shared.record(SourceCall::CallService(service.to_string()));
        match &self.service_handler {
            Some(handler) => handler(service, &request),
            None => Err(SourceError::Unsupported("call_service")),
        }
    }

    fn close(&self) {
        self.shared.record(SourceCall::Close);
        self.shared.connection.send_replace(None);
    }
}

impl ChannelSourceFeed {
    /// Sends one event, waiting for a connection if there is none yet.
    pub async fn send(&self, event: SourceEvent) -> Result<(), SourceError> {
        let mut rx = self.shared.connection.subscribe();
        let sender = rx
            .wait_for(Option::is_some)
            .await
            .map_err(|_| SourceError::Transport("source dropped".into()))?
            .clone();
        let Some(sender) = sender else {
            return Err(SourceError::Transport("not connected".into()));
        };
        sender
            .send(event)
            .await
            .map_err(|_| SourceError::Transport("connection closed".into()))
    }

    pub async fn topics(&self, topics: Vec<Topic>, datatypes: Datatypes) -> Result<(), SourceError> {
        self.send(SourceEvent::Topics { topics, datatypes }).await
    }

    pub async fn message(
        &self,
        topic: &str,
        receive_time: Timestamp,
        data: StructuredValue,
    ) -> Result<(), SourceError> {
        self.send(SourceEvent::Message(RawMessage::new(topic, receive_time, data)))
            .await
    }

    /// Resolves once the source has an open connection.
    pub async fn wait_connected(&self) {
        let mut rx = self.shared.connection.subscribe();
        let _ = rx.wait_for(Option::is_some).await;
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connection.borrow().is_some()
    }

    /// Closes the current connection, as a network drop would.
    pub fn drop_connection(&self) {
        self.shared.connection.send_replace(None);
    }

    /// Makes the next `connect` call fail with `err`.
    pub fn fail_next_connect(&self, err: SourceError) {
        lock(&self.shared.connect_failures).push_back(err);
    }

    /// Number of `connect` calls so far, failed ones included.
    pub fn connect_count(&self) -> usize {
        *lock(&self.shared.connects)
    }

    /// Calls the player made on the source, oldest first.
    pub fn calls(&self) -> Vec<SourceCall> {
        lock(&self.shared.calls).clone()
    }

    /// The topic list of the most recent `set_subscriptions` call.
    pub fn last_subscriptions(&self) -> Option<Vec<String>> {
        lock(&self.shared.calls).iter().rev().find_map(|call| match call {
            SourceCall::SetSubscriptions(topics) => Some(topics.clone()),
            _ => None,
        })
    }
}
