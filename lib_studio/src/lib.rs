//! # lib_studio
//!
//! The core of a visualization tool for time-ordered robotics telemetry. A data
//! source produces topic-tagged messages; this crate turns them into a
//! consistent feed of frames for many independent panels, and gives those
//! panels a small path language for pulling values out of nested messages.
//!
//! ## Modules:
//!
//! - **`model`**: messages, timestamps, topics, schemas and the recursive
//!   `StructuredValue` every decoded payload is expressed in.
//! - **`message_path`**: the path expression parser, pretty-printer and
//!   evaluator (`/topic.field[0:3]{x>5}`).
//! - **`topics`**: fuzzy-ranked search over topics and schema field paths.
//! - **`core`**: subscription registry, player state machine, frame dispatcher
//!   and the `MessagePipeline` composition root.
//! - **`ingestors`**: the data source boundary and the sources shipped with the
//!   crate.
//! - **`panels`**: subscriber-side models built on top of the pipeline.
//! - **`configs`** / **`loggers`** (feature-gated): layered configuration and
//!   log setup for binaries.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

pub mod model;
pub mod message_path;
pub mod topics;
pub mod core;
pub mod ingestors;
pub mod panels;

#[cfg(feature = "configs")]
pub mod configs;
#[cfg(feature = "loggers")]
pub mod loggers;

// --- Public API Re-exports ---
pub use crate::core::{
    Demand, FrameDispatcher, MessagePipeline, PanelContext, PipelineConfig, PipelineSnapshot,
    PlayerConfig, PlayerPresence, RenderState, SubscribeOptions, SubscriberId, SubscriptionRegistry,
};
pub use crate::message_path::{evaluate, evaluate_single, parse, ParseError, ParsedPath};
pub use crate::model::{Capabilities, Capability, Frame, Message, StructuredValue, Timestamp, Topic};
pub use crate::topics::{SearchHit, TopicIndex, TopicIndexStore};
