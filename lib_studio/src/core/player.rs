//! # Player
//!
//! Drives one data source: connects (with backoff), drains its events, buffers
//! messages and turns them into one `Frame` per tick, forwards demand changes
//! and playback commands to the source, and owns the `PlayerPresence`.
//!
//! The state transitions live in `PlayerMachine`, which performs no I/O and can
//! be driven step by step. `Player` is the async task around it, in the same
//! shape as a reconnecting upstream loop: an outer connect loop and an inner
//! `tokio::select!` over cancellation, demand changes, source events, the frame
//! ticker and the command channel.
//!
//! ```text
//! NotPresent -> Initializing -> Present <-> Reconnecting
//!                     \            |             /
//!                      +------> Error <--------+
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::dispatcher::FrameDispatcher;
use super::frame_buffer::FrameBuffer;
use super::registry::{Demand, SubscriptionRegistry};
use crate::ingestors::{DataSource, RawMessage, SourceError, SourceEvent};
use crate::model::{Capabilities, Capability, Datatypes, Frame, Message, StructuredValue, Timestamp, Topic};
use crate::topics::TopicIndexStore;

/// Lifecycle of the active data source, as seen by subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlayerPresence {
    NotPresent,
    Initializing,
    Present,
    Reconnecting,
    Error,
}

impl PlayerPresence {
    pub fn as_str(self) -> &'static str {
        match self {
            PlayerPresence::NotPresent => "not-present",
            PlayerPresence::Initializing => "initializing",
            PlayerPresence::Present => "present",
            PlayerPresence::Reconnecting => "reconnecting",
            PlayerPresence::Error => "error",
        }
    }
}

/// Tunables of the player task.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerConfig {
    /// Coalescing window: at most one frame per interval.
    pub frame_interval: Duration,
    /// Maximum buffered messages between two ticks.
    pub buffer_capacity: usize,
    /// Maximum estimated buffered bytes between two ticks.
    pub buffer_max_bytes: usize,
    pub reconnect_base_delay: Duration,
    pub reconnect_max_delay: Duration,
    /// Failed connect attempts tolerated before the player gives up.
    pub max_reconnect_attempts: u32,
    pub service_call_timeout: Duration,
    /// Capacity of the command channel.
    pub command_buffer: usize,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            frame_interval: Duration::from_millis(33),
            buffer_capacity: 10_000,
            buffer_max_bytes: 64 * 1024 * 1024,
            reconnect_base_delay: Duration::from_millis(250),
            reconnect_max_delay: Duration::from_secs(10),
            max_reconnect_attempts: 10,
            service_call_timeout: Duration::from_secs(10),
            command_buffer: 64,
        }
    }
}

impl PlayerConfig {
    /// Delay before reconnect attempt `attempt` (1-based): doubles from the
    /// base delay, capped at the max delay.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.reconnect_base_delay
            .saturating_mul(factor)
            .min(self.reconnect_max_delay)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceCallError {
    #[error("the active data source does not support service calls")]
    NotSupported,
    #[error("no data source is connected")]
    NoPlayer,
    #[error("service call timed out after {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Source(#[from] SourceError),
}

/// Outcome of handling one source event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// The source finished; keep serving what was delivered.
    Ended,
    /// Terminal fault; the player must stop.
    Stop,
}

/// Counters kept by the machine, reported when the player stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlayerStats {
    pub frames_dispatched: u64,
    pub messages_buffered: u64,
    pub messages_dropped: u64,
    /// Messages on topics no subscriber demands.
    pub messages_filtered: u64,
}

/// The synchronous core of the player.
pub struct PlayerMachine {
    session: u64,
    seq: u64,
    presence: PlayerPresence,
    buffer: FrameBuffer,
    schema_by_topic: HashMap<String, String>,
    demand: Arc<Demand>,
    dispatcher: Arc<FrameDispatcher>,
    index: Arc<TopicIndexStore>,
    stats: PlayerStats,
}

impl PlayerMachine {
    /// Starts a new dispatcher session for this player.
    pub fn new(
        dispatcher: Arc<FrameDispatcher>,
        index: Arc<TopicIndexStore>,
        capabilities: Capabilities,
        config: &PlayerConfig,
    ) -> Self {
        let session = dispatcher.start_session();
        dispatcher.update_state(|snapshot| {
            snapshot.capabilities = Arc::new(capabilities);
            snapshot.error = None;
        });
        Self {
            session,
            seq: 0,
            presence: PlayerPresence::NotPresent,
            buffer: FrameBuffer::new(config.buffer_capacity, config.buffer_max_bytes),
            schema_by_topic: HashMap::new(),
            demand: Arc::new(Demand::default()),
            dispatcher,
            index,
            stats: PlayerStats::default(),
        }
    }

    pub fn presence(&self) -> PlayerPresence {
        self.presence
    }

    pub fn session(&self) -> u64 {
        self.session
    }

    pub fn stats(&self) -> PlayerStats {
        self.stats
    }

    fn set_presence(&mut self, presence: PlayerPresence) {
        if self.presence == presence {
            return;
        }
        log::info!(
            "Player presence: {} -> {}",
            self.presence.as_str(),
            presence.as_str()
        );
        self.presence = presence;
        self.dispatcher.update_state(|snapshot| snapshot.presence = presence);
    }

    /// Replaces the demand messages are filtered against. Buffered messages on
    /// topics that lost their last subscriber never reach a frame.
    pub fn set_demand(&mut self, demand: Arc<Demand>) {
        let pruned = self.buffer.retain_demanded(&demand);
        if pruned > 0 {
            log::debug!("Discarded {} buffered message(s) on unsubscribed topics", pruned);
            self.stats.messages_filtered += pruned as u64;
        }
        self.demand = demand;
    }

    /// The player is about to connect for the first time.
    pub fn begin_connect(&mut self) {
        if self.presence == PlayerPresence::NotPresent {
            self.set_presence(PlayerPresence::Initializing);
        }
    }

    /// Applies one source event.
    pub fn handle_event(&mut self, event: SourceEvent) -> Flow {
        if self.presence == PlayerPresence::Error {
            return Flow::Stop;
        }
        match event {
            SourceEvent::Topics { topics, datatypes } => {
                self.set_topics(topics, datatypes);
                Flow::Continue
            }
            SourceEvent::Message(raw) => {
                self.ingest(raw);
                Flow::Continue
            }
            SourceEvent::Seeked(time) => {
                self.seeked(time);
                Flow::Continue
            }
            SourceEvent::Disconnected { reason } => {
                self.transport_lost(&reason);
                Flow::Continue
            }
            SourceEvent::Reconnected => {
                log::info!("Source reconnected, resyncing");
                self.buffer.mark_seek();
                Flow::Continue
            }
            SourceEvent::Fatal(reason) => {
                self.fail(&reason);
                Flow::Stop
            }
            SourceEvent::EndOfStream => {
                log::info!("Source reached end of stream");
                self.tick();
                Flow::Ended
            }
        }
    }

    fn set_topics(&mut self, topics: Vec<Topic>, datatypes: Datatypes) {
        log::info!("Source advertised {} topic(s), {} schema(s)", topics.len(), datatypes.len());
        self.schema_by_topic = topics
            .iter()
            .map(|t| (t.name.clone(), t.schema_name.clone()))
            .collect();
        self.index.refresh(&topics, &datatypes);
        self.dispatcher.update_state(|snapshot| {
            snapshot.topics = Arc::new(topics);
            snapshot.datatypes = Arc::new(datatypes);
        });
    }

    /// Validates and buffers one message. Malformed messages are dropped, and
    /// so are messages on topics nobody subscribes to.
    fn ingest(&mut self, raw: RawMessage) {
        if raw.topic.is_empty() {
            self.drop_message(&raw.topic, "empty topic name");
            return;
        }
        let Some(schema_name) = self.schema_by_topic.get(&raw.topic) else {
            self.drop_message(&raw.topic, "topic not advertised by the source");
            return;
        };
        if !self.demand.contains(&raw.topic) {
            log::trace!("Ignoring message on unsubscribed topic '{}'", raw.topic);
            self.stats.messages_filtered += 1;
            return;
        }
        let data = match raw.data {
            Ok(data) => data,
            Err(reason) => {
                self.drop_message(&raw.topic, &format!("undecodable payload: {}", reason));
                return;
            }
        };
        let message = Message::new(raw.topic, schema_name.clone(), raw.receive_time, data);
        self.buffer.push(message);
        self.stats.messages_buffered += 1;
    }

    fn drop_message(&mut self, topic: &str, reason: &str) {
        self.stats.messages_dropped += 1;
        log::warn!("Dropping message on '{}': {}", topic, reason);
    }

    /// The source moved to `time`; buffered messages are stale.
    pub fn seeked(&mut self, time: Timestamp) {
        log::debug!("Seeked to {}", time);
        self.buffer.mark_seek();
        self.dispatcher
            .update_state(|snapshot| snapshot.current_time = Some(time));
    }

    /// Transport dropped. Present becomes Reconnecting; other states keep
    /// their presence.
    pub fn transport_lost(&mut self, reason: &str) {
        log::warn!("Source transport lost: {}", reason);
        if self.presence == PlayerPresence::Present {
            self.set_presence(PlayerPresence::Reconnecting);
        }
    }

    /// A new connection was established after a loss; the first frame on it
    /// carries `did_seek`.
    pub fn resync(&mut self) {
        self.buffer.mark_seek();
    }

    /// Coalesces buffered messages into one frame and dispatches it.
    pub fn tick(&mut self) -> Option<Arc<Frame>> {
        if self.presence == PlayerPresence::Error || !self.buffer.has_pending() {
            return None;
        }
        self.seq += 1;
        let frame = self.buffer.take(self.session, self.seq);
        let resumed = matches!(
            self.presence,
            PlayerPresence::Initializing | PlayerPresence::Reconnecting
        );
        let presence = resumed.then_some(PlayerPresence::Present);
        match self.dispatcher.dispatch_with_presence(frame, presence) {
            Ok(frame) => {
                if let Some(presence) = presence {
                    log::info!(
                        "Player presence: {} -> {}",
                        self.presence.as_str(),
                        presence.as_str()
                    );
                    self.presence = presence;
                }
                self.stats.frames_dispatched += 1;
                Some(frame)
            }
            Err(e) => {
                log::error!("Frame rejected by dispatcher: {}", e);
                None
            }
        }
    }

    /// Terminal fault: the error is kept in the snapshot, nothing else is
    /// dispatched.
    pub fn fail(&mut self, reason: &str) {
        log::error!("Player failed: {}", reason);
        self.buffer.clear();
        self.presence = PlayerPresence::Error;
        let error: Arc<str> = Arc::from(reason);
        self.dispatcher.update_state(|snapshot| {
            snapshot.presence = PlayerPresence::Error;
            snapshot.error = Some(error);
        });
    }
}

type Reply<T> = oneshot::Sender<Result<T, SourceError>>;

pub(crate) enum PlayerCommand {
    Seek(Timestamp, Reply<()>),
    Play(Reply<()>),
    Pause(Reply<()>),
    CallService {
        service: String,
        request: StructuredValue,
        responder: oneshot::Sender<Result<StructuredValue, ServiceCallError>>,
    },
}

/// Cloneable front door to a running player.
#[derive(Clone)]
pub struct PlayerHandle {
    commands: mpsc::Sender<PlayerCommand>,
    capabilities: Capabilities,
}

fn player_stopped() -> SourceError {
    SourceError::Transport("player stopped".into())
}

impl PlayerHandle {
    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    async fn control<F>(&self, make: F) -> Result<(), SourceError>
    where
        F: FnOnce(Reply<()>) -> PlayerCommand,
    {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .await
            .map_err(|_| player_stopped())?;
        rx.await.map_err(|_| player_stopped())?
    }

    pub async fn seek(&self, time: Timestamp) -> Result<(), SourceError> {
        self.control(|reply| PlayerCommand::Seek(time, reply)).await
    }

    pub async fn play(&self) -> Result<(), SourceError> {
        self.control(PlayerCommand::Play).await
    }

    pub async fn pause(&self) -> Result<(), SourceError> {
        self.control(PlayerCommand::Pause).await
    }

    /// Runs a service call on the source. The call is executed by its own task
    /// and completes even if the caller stops waiting.
    pub async fn call_service(
        &self,
        service: &str,
        request: StructuredValue,
    ) -> Result<StructuredValue, ServiceCallError> {
        if !self.capabilities.contains(Capability::CallServices) {
            return Err(ServiceCallError::NotSupported);
        }
        let (responder, rx) = oneshot::channel();
        self.commands
            .send(PlayerCommand::CallService {
                service: service.to_string(),
                request,
                responder,
            })
            .await
            .map_err(|_| ServiceCallError::NoPlayer)?;
        rx.await.map_err(|_| ServiceCallError::NoPlayer)?
    }
}

/// The async task driving one source.
pub struct Player {
    source: Arc<dyn DataSource>,
    machine: PlayerMachine,
    demand: watch::Receiver<Arc<Demand>>,
    commands: mpsc::Receiver<PlayerCommand>,
    config: PlayerConfig,
    cancel: CancellationToken,
}

impl Player {
    /// Spawns the player task. It runs until `cancel` fires or the source
    /// fails terminally.
    pub fn spawn(
        source: Arc<dyn DataSource>,
        registry: &SubscriptionRegistry,
        dispatcher: Arc<FrameDispatcher>,
        index: Arc<TopicIndexStore>,
        config: PlayerConfig,
        cancel: CancellationToken,
    ) -> (PlayerHandle, JoinHandle<()>) {
        let capabilities = source.capabilities();
        let (tx, rx) = mpsc::channel(config.command_buffer.max(1));
        let machine = PlayerMachine::new(dispatcher, index, capabilities.clone(), &config);
        let player = Player {
            source,
            machine,
            demand: registry.watch(),
            commands: rx,
            config,
            cancel,
        };
        let handle = PlayerHandle {
            commands: tx,
            capabilities,
        };
        (handle, tokio::spawn(player.run()))
    }

    async fn run(mut self) {
        log::info!("Player for '{}' starting", self.source.name());
        self.machine.begin_connect();
        let mut first_connection = true;

        'connection: loop {
            let Some(mut events) = self.connect_with_backoff().await else {
                break 'connection;
            };
            if !first_connection {
                self.machine.resync();
            }
            first_connection = false;

            self.apply_demand();

            let mut ticker = time::interval(self.config.frame_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut events_open = true;

            loop {
                tokio::select! {
                    _ = self.cancel.cancelled() => {
                        log::info!("Player for '{}' cancelled", self.source.name());
                        break 'connection;
                    }
                    changed = self.demand.changed() => {
                        if changed.is_err() {
                            break 'connection;
                        }
                        self.apply_demand();
                    }
                    event = events.recv(), if events_open => {
                        self.sync_demand();
                        match event {
                            Some(event) => match self.machine.handle_event(event) {
                                Flow::Continue => {}
                                Flow::Ended => events_open = false,
                                Flow::Stop => break 'connection,
                            },
                            None => {
                                self.machine.tick();
                                self.machine.transport_lost("event channel closed");
                                continue 'connection;
                            }
                        }
                    }
                    _ = ticker.tick() => {
                        self.sync_demand();
                        self.machine.tick();
                    }
                    Some(command) = self.commands.recv() => {
                        if self.handle_command(command) {
                            events_open = true;
                        }
                    }
                }
            }
        }

        self.source.close();
        let stats = self.machine.stats();
        log::info!(
            "Player for '{}' stopped: {} frame(s), {} message(s), {} dropped, {} unsubscribed",
            self.source.name(),
            stats.frames_dispatched,
            stats.messages_buffered,
            stats.messages_dropped,
            stats.messages_filtered
        );
    }

    /// Pushes the latest demand to the source and to the machine's filter.
    fn apply_demand(&mut self) {
        let demand = self.demand.borrow_and_update().clone();
        self.source.set_subscriptions(&demand);
        self.machine.set_demand(demand);
    }

    /// Applies a demand change that was published but not yet observed, so an
    /// unsubscribe is honored before the next event or frame.
    fn sync_demand(&mut self) {
        if self.demand.has_changed().unwrap_or(false) {
            self.apply_demand();
        }
    }

    /// Connects, retrying transport errors with exponential backoff. Returns
    /// `None` when cancelled or when the failure is terminal (the machine is
    /// then in `Error`).
    async fn connect_with_backoff(&mut self) -> Option<mpsc::Receiver<SourceEvent>> {
        let mut attempt = 0u32;
        loop {
            let result = tokio::select! {
                _ = self.cancel.cancelled() => return None,
                result = self.source.connect() => result,
            };
            match result {
                Ok(events) => return Some(events),
                Err(e) if e.is_retryable() && attempt < self.config.max_reconnect_attempts => {
                    attempt += 1;
                    let delay = self.config.backoff(attempt);
                    log::warn!(
                        "Connecting to '{}' failed ({}). Retry {}/{} in {:?}",
                        self.source.name(),
                        e,
                        attempt,
                        self.config.max_reconnect_attempts,
                        delay
                    );
                    tokio::select! {
                        _ = self.cancel.cancelled() => return None,
                        _ = time::sleep(delay) => {}
                    }
                }
                Err(e) if e.is_retryable() => {
                    self.machine
                        .fail(&format!("giving up after {} attempts: {}", attempt + 1, e));
                    return None;
                }
                Err(e) => {
                    self.machine.fail(&e.to_string());
                    return None;
                }
            }
        }
    }

    /// Runs one command. Returns true after a successful seek, which restarts
    /// delivery on a source that already reported its end.
    fn handle_command(&mut self, command: PlayerCommand) -> bool {
        match command {
            PlayerCommand::Seek(time, reply) => {
                let result = self.source.seek(time);
                let seeked = result.is_ok();
                if seeked {
                    self.machine.seeked(time);
                }
                let _ = reply.send(result);
                return seeked;
            }
            PlayerCommand::Play(reply) => {
                let _ = reply.send(self.source.start_playback());
            }
            PlayerCommand::Pause(reply) => {
                let _ = reply.send(self.source.pause_playback());
            }
            PlayerCommand::CallService {
                service,
                request,
                responder,
            } => {
                let source = Arc::clone(&self.source);
                let timeout = self.config.service_call_timeout;
                tokio::spawn(async move {
                    log::debug!("Calling service '{}'", service);
                    let result = match time::timeout(timeout, source.call_service(&service, request)).await {
                        Ok(Ok(response)) => Ok(response),
                        Ok(Err(e)) => Err(ServiceCallError::Source(e)),
                        Err(_) => Err(ServiceCallError::Timeout(timeout)),
                    };
                    if let Err(e) = &result {
                        log::warn!("Service '{}' failed: {}", service, e);
                    }
                    let _ = responder.send(result);
                });
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::dispatcher::RenderState;
    use crate::core::registry::{SubscribeOptions, SubscriberId};
    use std::sync::Mutex;

    fn demand(topics: &[&str]) -> Arc<Demand> {
        let registry = SubscriptionRegistry::new();
        let id = SubscriberId::next();
        for topic in topics {
            registry.subscribe(id, topic, SubscribeOptions::default());
        }
        registry.current_demand()
    }

    fn machine() -> (PlayerMachine, Arc<FrameDispatcher>) {
        let dispatcher = Arc::new(FrameDispatcher::new());
        let index = Arc::new(TopicIndexStore::new());
        let mut m = PlayerMachine::new(
            Arc::clone(&dispatcher),
            index,
            Capabilities::none(),
            &PlayerConfig::default(),
        );
        m.set_demand(demand(&["/a"]));
        (m, dispatcher)
    }

    fn topics() -> SourceEvent {
        SourceEvent::Topics {
            topics: vec![Topic::new("/a", "t/A")],
            datatypes: Datatypes::new(),
        }
    }

    fn msg(sec: u32) -> SourceEvent {
        SourceEvent::Message(RawMessage::new("/a", Timestamp::new(sec, 0), StructuredValue::Int(sec as i64)))
    }

    #[test]
    fn first_frame_makes_player_present() {
        let (mut m, dispatcher) = machine();
        m.begin_connect();
        assert_eq!(m.presence(), PlayerPresence::Initializing);
        m.handle_event(topics());
        assert!(m.tick().is_none());
        m.handle_event(msg(1));
        let frame = m.tick().unwrap();
        assert_eq!(frame.seq, 1);
        assert_eq!(m.presence(), PlayerPresence::Present);
        assert_eq!(dispatcher.snapshot().presence, PlayerPresence::Present);
    }

    #[test]
    fn malformed_messages_are_dropped() {
        let (mut m, _) = machine();
        m.begin_connect();
        m.handle_event(topics());
        m.handle_event(SourceEvent::Message(RawMessage::new("", Timestamp::ZERO, StructuredValue::Null)));
        m.handle_event(SourceEvent::Message(RawMessage::new("/unknown", Timestamp::ZERO, StructuredValue::Null)));
        m.handle_event(SourceEvent::Message(RawMessage::undecodable("/a", Timestamp::ZERO, "bad cdr")));
        assert!(m.tick().is_none());
        assert_eq!(m.stats().messages_dropped, 3);
    }

    #[test]
    fn unsubscribed_topics_never_reach_a_frame() {
        let (mut m, _) = machine();
        m.begin_connect();
        m.handle_event(SourceEvent::Topics {
            topics: vec![Topic::new("/a", "t/A"), Topic::new("/b", "t/B")],
            datatypes: Datatypes::new(),
        });
        m.handle_event(SourceEvent::Message(RawMessage::new("/b", Timestamp::new(1, 0), StructuredValue::Null)));
        m.handle_event(msg(2));
        let frame = m.tick().unwrap();
        let topics: Vec<_> = frame.messages.iter().map(|m| m.topic.as_str()).collect();
        assert_eq!(topics, vec!["/a"]);

        // Buffered before the last subscriber left.
        m.handle_event(msg(3));
        m.set_demand(demand(&[]));
        assert!(m.tick().is_none());
        assert_eq!(m.stats().messages_filtered, 2);
        assert_eq!(m.stats().messages_dropped, 0);
    }

    #[test]
    fn reconnect_cycle_sets_did_seek_and_restores_presence() {
        let (mut m, dispatcher) = machine();
        let presences = Arc::new(Mutex::new(Vec::new()));
        let _guard = {
            let presences = Arc::clone(&presences);
            dispatcher.register(move |render: &RenderState<'_>| {
                if render.frame.is_none() {
                    presences.lock().unwrap().push(render.snapshot.presence);
                }
            })
        };
        m.begin_connect();
        m.handle_event(topics());
        m.handle_event(msg(1));
        m.tick().unwrap();

        m.handle_event(SourceEvent::Disconnected { reason: "wifi".into() });
        assert_eq!(m.presence(), PlayerPresence::Reconnecting);
        m.handle_event(SourceEvent::Reconnected);
        m.handle_event(msg(2));
        let frame = m.tick().unwrap();
        assert!(frame.did_seek);
        assert_eq!(frame.seq, 2);
        assert_eq!(m.presence(), PlayerPresence::Present);
        assert!(presences.lock().unwrap().contains(&PlayerPresence::Reconnecting));
    }

    #[test]
    fn fatal_error_is_terminal() {
        let (mut m, dispatcher) = machine();
        m.begin_connect();
        m.handle_event(topics());
        m.handle_event(msg(1));
        assert_eq!(m.handle_event(SourceEvent::Fatal("disk gone".into())), Flow::Stop);
        assert_eq!(m.presence(), PlayerPresence::Error);
        assert_eq!(m.handle_event(msg(2)), Flow::Stop);
        assert!(m.tick().is_none());
        let snapshot = dispatcher.snapshot();
        assert_eq!(snapshot.presence, PlayerPresence::Error);
        assert_eq!(snapshot.error.as_deref(), Some("disk gone"));
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let config = PlayerConfig {
            reconnect_base_delay: Duration::from_millis(100),
            reconnect_max_delay: Duration::from_millis(500),
            ..PlayerConfig::default()
        };
        assert_eq!(config.backoff(1), Duration::from_millis(100));
        assert_eq!(config.backoff(2), Duration::from_millis(200));
        assert_eq!(config.backoff(3), Duration::from_millis(400));
        assert_eq!(config.backoff(4), Duration::from_millis(500));
        assert_eq!(config.backoff(40), Duration::from_millis(500));
    }
}
