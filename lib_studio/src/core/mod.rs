//! # Pipeline Core
//!
//! Everything between a data source and the panels: the subscription registry
//! that aggregates demand, the player that turns source events into frames,
//! the dispatcher that fans frames out, and the `MessagePipeline` that owns
//! them all.

/// Subscription bookkeeping and demand aggregation.
pub mod registry;
/// Bounded buffer coalescing messages into frames.
pub mod frame_buffer;
/// Frame fan-out and the shared pipeline snapshot.
pub mod dispatcher;
/// Source lifecycle state machine and its async driver.
pub mod player;
/// Composition root.
pub mod pipeline;
/// Per-subscriber handle.
pub mod panel;

pub use dispatcher::{
    DispatchError, FrameDispatcher, ListenerGuard, MemoSelector, PipelineSnapshot, RenderState,
};
pub use frame_buffer::FrameBuffer;
pub use panel::{PanelContext, PanelError};
pub use pipeline::{MessagePipeline, PipelineConfig};
pub use player::{
    PlayerConfig, PlayerHandle, PlayerMachine, PlayerPresence, PlayerStats, ServiceCallError,
};
pub use registry::{Demand, SubscribeOptions, SubscriberId, SubscriptionPayload, SubscriptionRegistry};
