//! # Topic and Schema Search
//!
//! Ranked fuzzy search over the topics of the active source and over the
//! field paths their schemas expose.

pub mod fuzzy;
pub mod index;
pub mod schema_fields;

pub use index::{SearchHit, SearchHitKind, SearchItem, TopicIndex, TopicIndexStore};
pub use schema_fields::{FieldPath, SchemaFieldCache};
