//! # Topic List
//!
//! View model of the topic browser: what to show for the current presence and
//! filter text.

use crate::core::{PanelContext, PlayerPresence};
use crate::topics::SearchHit;

/// Number of placeholder rows shown while the source initializes.
pub const LOADING_ROWS: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopicListView {
    NoDataSource,
    Error(Option<String>),
    /// Placeholder rows with a disabled filter.
    Loading { rows: usize },
    Empty {
        filter: Option<String>,
        reconnecting: bool,
    },
    Results {
        hits: Vec<SearchHit>,
        /// The filter can only be edited while the source is present.
        filter_enabled: bool,
        reconnecting: bool,
    },
}

impl TopicListView {
    /// Text shown instead of rows, if any.
    pub fn message(&self) -> Option<String> {
        match self {
            TopicListView::NoDataSource => Some("No data source selected".to_string()),
            TopicListView::Error(_) => Some("An error occurred".to_string()),
            TopicListView::Loading { .. } => Some("Waiting for data...".to_string()),
            TopicListView::Empty {
                filter,
                reconnecting,
            } => {
                let mut text = match filter {
                    Some(filter) => format!("No topics or datatypes matching \"{}\"", filter),
                    None => "No topics available.".to_string(),
                };
                if *reconnecting {
                    text.push_str(" Waiting for connection...");
                }
                Some(text)
            }
            TopicListView::Results { .. } => None,
        }
    }
}

/// Chooses the view for `presence`. `hits` are the search results for
/// `filter` over the current topics and fields.
pub fn topic_list_view(
    presence: PlayerPresence,
    error: Option<&str>,
    filter: &str,
    hits: Vec<SearchHit>,
) -> TopicListView {
    let reconnecting = presence == PlayerPresence::Reconnecting;
    match presence {
        PlayerPresence::NotPresent => TopicListView::NoDataSource,
        PlayerPresence::Error => TopicListView::Error(error.map(str::to_string)),
        PlayerPresence::Initializing => TopicListView::Loading { rows: LOADING_ROWS },
        PlayerPresence::Present | PlayerPresence::Reconnecting if hits.is_empty() => {
            let filter = filter.trim();
            TopicListView::Empty {
                filter: (presence == PlayerPresence::Present && !filter.is_empty())
                    .then(|| filter.to_string()),
                reconnecting,
            }
        }
        PlayerPresence::Present | PlayerPresence::Reconnecting => TopicListView::Results {
            hits,
            filter_enabled: presence == PlayerPresence::Present,
            reconnecting,
        },
    }
}

/// The topic list bound to a pipeline.
pub struct TopicListModel {
    context: PanelContext,
}

impl TopicListModel {
    pub fn mount(context: PanelContext) -> Self {
        Self { context }
    }

    pub fn view(&self, filter: &str) -> TopicListView {
        let snapshot = self.context.snapshot();
        let hits = match snapshot.presence {
            PlayerPresence::Present | PlayerPresence::Reconnecting => {
                self.context.search_topics(filter)
            }
            _ => Vec::new(),
        };
        topic_list_view(snapshot.presence, snapshot.error.as_deref(), filter, hits)
    }
}
