//! # Panel Models
//!
//! Subscriber-side state built on `PanelContext`. These hold no rendering
//! code: each one reduces frames and pipeline state into values a front end
//! can draw.

/// Latest value selected by a message path, with range scaling.
pub mod latest_value;
/// One-button service caller.
pub mod service_call;
/// Topic browser view model.
pub mod topic_list;

pub use latest_value::{LatestValueAction, LatestValueConfig, LatestValuePanel, LatestValueState, Level, Reading};
pub use service_call::{ServiceCallConfig, ServiceCallPanel, ServiceCallStatus, ServiceResponse};
pub use topic_list::{topic_list_view, TopicListModel, TopicListView};
