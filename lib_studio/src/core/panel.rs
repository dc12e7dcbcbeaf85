//! # Panel Context
//!
//! The handle a subscriber (usually one panel) uses to talk to the pipeline:
//! declare its topics, receive frames, read the shared snapshot, seek, call
//! services and search topics. Dropping the context removes its listener and
//! withdraws its demand.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;

use super::dispatcher::{ListenerGuard, PipelineSnapshot, RenderState};
use super::pipeline::MessagePipeline;
use super::player::{PlayerHandle, PlayerPresence, ServiceCallError};
use super::registry::{SubscribeOptions, SubscriberId, SubscriptionPayload};
use crate::ingestors::SourceError;
use crate::model::{Capabilities, Capability, Frame, StructuredValue, Timestamp};
use crate::topics::SearchHit;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PanelError {
    #[error("no data source is connected")]
    NoPlayer,
    #[error("the active data source does not support {0}")]
    Unsupported(Capability),
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Service(#[from] ServiceCallError),
}

pub struct PanelContext {
    id: SubscriberId,
    pipeline: Arc<MessagePipeline>,
    listener: Mutex<Option<ListenerGuard>>,
}

impl PanelContext {
    pub(crate) fn new(pipeline: Arc<MessagePipeline>) -> Self {
        let id = SubscriberId::next();
        log::debug!("Panel context {} created", id);
        Self {
            id,
            pipeline,
            listener: Mutex::new(None),
        }
    }

    fn listener(&self) -> MutexGuard<'_, Option<ListenerGuard>> {
        self.listener.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Replaces this subscriber's whole subscription set.
    pub fn subscribe(&self, payloads: &[SubscriptionPayload]) {
        self.pipeline.registry().set_subscriptions(self.id, payloads);
    }

    /// Adds one topic to this subscriber's subscription set.
    pub fn subscribe_topic(&self, topic: &str, options: SubscribeOptions) {
        self.pipeline.registry().subscribe(self.id, topic, options);
    }

    pub fn unsubscribe_all(&self) {
        self.pipeline.registry().unsubscribe_all(self.id);
    }

    pub fn subscribed_topics(&self) -> Vec<String> {
        self.pipeline.registry().topics_of(self.id)
    }

    /// Installs the render callback of this panel, replacing the previous one.
    /// The callback runs on the player task for every frame and state update.
    pub fn on_frame<F>(&self, callback: F)
    where
        F: Fn(&RenderState<'_>) + Send + Sync + 'static,
    {
        let guard = self.pipeline.dispatcher().register(callback);
        let previous = self.listener().replace(guard);
        drop(previous);
    }

    /// Removes the render callback, if any.
    pub fn clear_on_frame(&self) {
        let previous = self.listener().take();
        drop(previous);
    }

    pub fn snapshot(&self) -> Arc<PipelineSnapshot> {
        self.pipeline.snapshot()
    }

    pub fn presence(&self) -> PlayerPresence {
        self.snapshot().presence
    }

    pub fn capabilities(&self) -> Arc<Capabilities> {
        Arc::clone(&self.snapshot().capabilities)
    }

    pub fn current_frame(&self) -> Option<Arc<Frame>> {
        self.snapshot().current_frame.clone()
    }

    fn player_with(&self, capability: Capability) -> Result<PlayerHandle, PanelError> {
        let player = self.pipeline.player().ok_or(PanelError::NoPlayer)?;
        if !player.capabilities().contains(capability) {
            return Err(PanelError::Unsupported(capability));
        }
        Ok(player)
    }

    pub async fn seek(&self, time: Timestamp) -> Result<(), PanelError> {
        let player = self.player_with(Capability::PlaybackControl)?;
        player.seek(time).await?;
        Ok(())
    }

    pub async fn play(&self) -> Result<(), PanelError> {
        self.player_with(Capability::PlaybackControl)?.play().await?;
        Ok(())
    }

    pub async fn pause(&self) -> Result<(), PanelError> {
        self.player_with(Capability::PlaybackControl)?.pause().await?;
        Ok(())
    }

    /// Calls a service on the active source. The call keeps running even if
    /// this context is dropped before it completes.
    pub async fn call_service(
        &self,
        service: &str,
        request: StructuredValue,
    ) -> Result<StructuredValue, PanelError> {
        let player = self.player_with(Capability::CallServices)?;
        Ok(player.call_service(service, request).await?)
    }

    /// Ranked topic and field search over the current source.
    pub fn search_topics(&self, query: &str) -> Vec<SearchHit> {
        let mut hits = self.pipeline.topic_index().search(query);
        let limit = self.pipeline.config().max_search_results;
        if limit > 0 {
            hits.truncate(limit);
        }
        hits
    }
}

impl Drop for PanelContext {
    fn drop(&mut self) {
        let listener = self.listener().take();
        drop(listener);
        self.pipeline.registry().unsubscribe_all(self.id);
        log::debug!("Panel context {} dropped", self.id);
    }
}
