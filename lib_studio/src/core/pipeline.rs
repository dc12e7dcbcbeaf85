//! # Message Pipeline
//!
//! Composition root that owns the subscription registry, the frame
//! dispatcher, the topic index and at most one active player. Panels never
//! reach for a global: they receive a `PanelContext` from `panel_context()`.
//!
//! ## Logic:
//! 1.  `connect` stops the previous player, starts a new dispatcher session
//!     and spawns a `Player` for the source.
//! 2.  The player pushes demand from the registry to the source, and frames
//!     and state updates to the dispatcher.
//! 3.  `disconnect` cancels the player, waits for it to close the source and
//!     resets the snapshot and the topic index.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::dispatcher::{FrameDispatcher, PipelineSnapshot};
use super::panel::PanelContext;
use super::player::{Player, PlayerConfig, PlayerHandle};
use super::registry::SubscriptionRegistry;
use crate::ingestors::DataSource;
use crate::topics::TopicIndexStore;

/// Settings of a `MessagePipeline`.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub player: PlayerConfig,
    /// Maximum number of hits returned by `PanelContext::search_topics`.
    /// Zero means unlimited.
    pub max_search_results: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            player: PlayerConfig::default(),
            max_search_results: 0,
        }
    }
}

struct ActivePlayer {
    source_name: String,
    handle: PlayerHandle,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

pub struct MessagePipeline {
    config: PipelineConfig,
    registry: SubscriptionRegistry,
    dispatcher: Arc<FrameDispatcher>,
    index: Arc<TopicIndexStore>,
    active: Mutex<Option<ActivePlayer>>,
}

impl MessagePipeline {
    pub fn new(config: PipelineConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            registry: SubscriptionRegistry::new(),
            dispatcher: Arc::new(FrameDispatcher::new()),
            index: Arc::new(TopicIndexStore::new()),
            active: Mutex::new(None),
        })
    }

    fn active(&self) -> MutexGuard<'_, Option<ActivePlayer>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// # Connect
    ///
    /// Replaces the active source with `source`. Must be called from within a
    /// tokio runtime; the player runs as a spawned task.
    pub async fn connect(&self, source: Arc<dyn DataSource>) -> PlayerHandle {
        self.disconnect().await;
        let source_name = source.name().to_string();
        log::info!("Connecting pipeline to '{}'", source_name);
        let cancel = CancellationToken::new();
        let (handle, task) = Player::spawn(
            source,
            &self.registry,
            Arc::clone(&self.dispatcher),
            Arc::clone(&self.index),
            self.config.player.clone(),
            cancel.clone(),
        );
        *self.active() = Some(ActivePlayer {
            source_name,
            handle: handle.clone(),
            cancel,
            task,
        });
        handle
    }

    /// Stops the active player, if any, and returns the pipeline to
    /// `NotPresent`. Subscriptions are kept for the next source.
    pub async fn disconnect(&self) {
        let Some(active) = self.active().take() else {
            return;
        };
        log::info!("Disconnecting pipeline from '{}'", active.source_name);
        active.cancel.cancel();
        if let Err(e) = active.task.await {
            log::error!("Player task for '{}' ended abnormally: {}", active.source_name, e);
        }
        self.dispatcher.reset();
        self.index.clear();
    }

    /// Handle of the active player.
    pub fn player(&self) -> Option<PlayerHandle> {
        self.active().as_ref().map(|active| active.handle.clone())
    }

    pub fn is_connected(&self) -> bool {
        self.active().is_some()
    }

    /// A new subscriber handle. Dropping it releases its listener and demand.
    pub fn panel_context(self: &Arc<Self>) -> PanelContext {
        PanelContext::new(Arc::clone(self))
    }

    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    pub fn dispatcher(&self) -> &Arc<FrameDispatcher> {
        &self.dispatcher
    }

    pub fn topic_index(&self) -> &Arc<TopicIndexStore> {
        &self.index
    }

    pub fn snapshot(&self) -> Arc<PipelineSnapshot> {
        self.dispatcher.snapshot()
    }
}

impl Drop for MessagePipeline {
    fn drop(&mut self) {
        if let Some(active) = self.active().take() {
            active.cancel.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::player::PlayerPresence;
    use crate::ingestors::ChannelSource;
    use crate::model::{Capabilities, Datatypes, StructuredValue, Timestamp, Topic};
    use std::time::Duration;

    fn fast_config() -> PipelineConfig {
        PipelineConfig {
            player: PlayerConfig {
                frame_interval: Duration::from_millis(5),
                reconnect_base_delay: Duration::from_millis(1),
                reconnect_max_delay: Duration::from_millis(5),
                ..PlayerConfig::default()
            },
            ..PipelineConfig::default()
        }
    }

    async fn wait_for_presence(pipeline: &MessagePipeline, presence: PlayerPresence) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while pipeline.snapshot().presence != presence {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("presence never became {:?}", presence));
    }

    #[tokio::test]
    async fn connect_and_disconnect_drive_presence() {
        let pipeline = MessagePipeline::new(fast_config());
        let panel = pipeline.panel_context();
        panel.subscribe_topic("/imu", Default::default());
        let (source, feed) = ChannelSource::new("live", Capabilities::none());
        pipeline.connect(Arc::new(source)).await;
        wait_for_presence(&pipeline, PlayerPresence::Initializing).await;

        feed.topics(vec![Topic::new("/imu", "sensor/Imu")], Datatypes::new())
            .await
            .unwrap();
        feed.message("/imu", Timestamp::new(1, 0), StructuredValue::Int(1))
            .await
            .unwrap();
        wait_for_presence(&pipeline, PlayerPresence::Present).await;
        assert_eq!(pipeline.topic_index().load().topics().len(), 1);

        pipeline.disconnect().await;
        assert!(!pipeline.is_connected());
        let snapshot = pipeline.snapshot();
        assert_eq!(snapshot.presence, PlayerPresence::NotPresent);
        assert!(snapshot.current_frame.is_none());
        assert!(pipeline.topic_index().load().is_empty());
    }

    #[tokio::test]
    async fn demand_reaches_the_source() {
        let pipeline = MessagePipeline::new(fast_config());
        let (source, feed) = ChannelSource::new("live", Capabilities::none());
        pipeline.connect(Arc::new(source)).await;
        feed.wait_connected().await;

        let panel = pipeline.panel_context();
        panel.subscribe_topic("/odom", Default::default());
        tokio::time::timeout(Duration::from_secs(5), async {
            while feed.last_subscriptions() != Some(vec!["/odom".to_string()]) {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .expect("demand was not forwarded");
    }

    #[tokio::test]
    async fn terminal_connect_failure_puts_pipeline_in_error() {
        let pipeline = MessagePipeline::new(fast_config());
        let (source, feed) = ChannelSource::new("broken", Capabilities::none());
        feed.fail_next_connect(crate::ingestors::SourceError::Terminal("bad url".into()));
        pipeline.connect(Arc::new(source)).await;
        wait_for_presence(&pipeline, PlayerPresence::Error).await;
        assert!(pipeline.snapshot().error.as_deref().unwrap().contains("bad url"));
    }
}
