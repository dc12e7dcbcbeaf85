//! # Data Model
//!
//! Plain data shared by every other module: decoded values, messages, frames,
//! topics, schemas and capabilities. Nothing in here performs I/O.

/// The recursive `StructuredValue` payload type.
pub mod value;
/// Timestamps, messages and frames.
pub mod message;
/// Topics, schemas and the schema set of a source.
pub mod schema;
/// Optional features advertised by a source.
pub mod capabilities;

pub use capabilities::{Capabilities, Capability};
pub use message::{Frame, Message, Timestamp};
pub use schema::{Datatypes, FieldDefinition, Schema, Topic};
pub use value::StructuredValue;
