//! # Topic Index
//!
//! Searchable snapshot of the topics and schema field paths of the current
//! source. A `TopicIndex` is immutable; `TopicIndexStore` holds the current one
//! behind an `ArcSwap` and replaces it wholesale when the inputs change, so a
//! reader always sees either the old or the new index, never a mix.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, PoisonError};

use arc_swap::ArcSwap;

use super::fuzzy;
use super::schema_fields::{FieldPath, SchemaFieldCache};
use crate::model::{Datatypes, Topic};

/// Which corpus a hit comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SearchHitKind {
    Topic,
    Field,
}

/// The thing a search hit points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchItem {
    Topic(Topic),
    Field { topic: Topic, field: FieldPath },
}

impl SearchItem {
    /// Message path text for this item (`/topic` or `/topic.field`).
    pub fn path(&self) -> String {
        match self {
            SearchItem::Topic(topic) => topic.name.clone(),
            SearchItem::Field { topic, field } => format!("{}{}", topic.name, field.suffix),
        }
    }

    pub fn topic(&self) -> &Topic {
        match self {
            SearchItem::Topic(topic) | SearchItem::Field { topic, .. } => topic,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHit {
    pub kind: SearchHitKind,
    pub score: u32,
    pub item: SearchItem,
}

/// Immutable search snapshot over one `(topics, datatypes)` pair.
#[derive(Debug, Default)]
pub struct TopicIndex {
    topics: Vec<Topic>,
    /// Field paths per topic, parallel to `topics`.
    fields: Vec<Arc<[FieldPath]>>,
    fingerprint: u64,
}

impl TopicIndex {
    pub fn build(topics: &[Topic], datatypes: &Datatypes) -> Self {
        Self::build_with_cache(topics, datatypes, &mut SchemaFieldCache::new())
    }

    pub fn build_with_cache(
        topics: &[Topic],
        datatypes: &Datatypes,
        cache: &mut SchemaFieldCache,
    ) -> Self {
        let fields = topics
            .iter()
            .map(|t| cache.get_or_build(datatypes, &t.schema_name))
            .collect();
        Self {
            topics: topics.to_vec(),
            fields,
            fingerprint: fingerprint(topics, datatypes),
        }
    }

    pub fn topics(&self) -> &[Topic] {
        &self.topics
    }

    pub fn fingerprint(&self) -> u64 {
        self.fingerprint
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }

    /// Field paths of one topic.
    pub fn fields_of(&self, topic_name: &str) -> Option<&[FieldPath]> {
        self.topics
            .iter()
            .position(|t| t.name == topic_name)
            .map(|i| &*self.fields[i])
    }

    /// Ranked hits for `query`. Ties keep declaration order: topics first,
    /// then fields grouped by topic. An empty query lists everything.
    pub fn search(&self, query: &str) -> Vec<SearchHit> {
        let query = query.trim();
        let mut hits = Vec::new();

        for topic in &self.topics {
            let by_name = fuzzy::score(query, &topic.name);
            let by_schema = fuzzy::score(query, &topic.schema_name);
            if let Some(score) = by_name.max(by_schema) {
                hits.push(SearchHit {
                    kind: SearchHitKind::Topic,
                    score,
                    item: SearchItem::Topic(topic.clone()),
                });
            }
        }

        for (topic, fields) in self.topics.iter().zip(&self.fields) {
            for field in fields.iter() {
                let full = format!("{}{}", topic.name, field.suffix);
                if let Some(score) = fuzzy::score(query, &full) {
                    hits.push(SearchHit {
                        kind: SearchHitKind::Field,
                        score,
                        item: SearchItem::Field {
                            topic: topic.clone(),
                            field: field.clone(),
                        },
                    });
                }
            }
        }

        // Stable sort, so equal scores stay in declaration order.
        hits.sort_by(|a, b| b.score.cmp(&a.score));
        hits
    }
}

/// Hash over topic names, schema names and each topic's schema closure.
pub fn fingerprint(topics: &[Topic], datatypes: &Datatypes) -> u64 {
    let mut hasher = DefaultHasher::new();
    topics.len().hash(&mut hasher);
    for topic in topics {
        topic.hash(&mut hasher);
        datatypes.closure_fingerprint(&topic.schema_name).hash(&mut hasher);
    }
    hasher.finish()
}

#[derive(Debug, Default)]
struct RebuildState {
    fingerprint: Option<u64>,
    cache: SchemaFieldCache,
}

/// Holder of the current `TopicIndex`.
#[derive(Debug)]
pub struct TopicIndexStore {
    current: ArcSwap<TopicIndex>,
    rebuild: Mutex<RebuildState>,
}

impl Default for TopicIndexStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TopicIndexStore {
    pub fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(TopicIndex::default()),
            rebuild: Mutex::new(RebuildState::default()),
        }
    }

    /// The current snapshot. Cheap; holds no lock.
    pub fn load(&self) -> Arc<TopicIndex> {
        self.current.load_full()
    }

    /// Rebuilds and swaps in a new index when the inputs changed.
    /// Returns `true` when a rebuild happened.
    pub fn refresh(&self, topics: &[Topic], datatypes: &Datatypes) -> bool {
        let mut state = self.rebuild.lock().unwrap_or_else(PoisonError::into_inner);
        let fp = fingerprint(topics, datatypes);
        if state.fingerprint == Some(fp) {
            return false;
        }
        state.cache.retain_known(datatypes);
        let index = TopicIndex::build_with_cache(topics, datatypes, &mut state.cache);
        log::debug!(
            "Topic index rebuilt: {} topics, {} cached schemas",
            topics.len(),
            state.cache.len()
        );
        self.current.store(Arc::new(index));
        state.fingerprint = Some(fp);
        true
    }

    /// Replaces the index with an empty one (source disconnected).
    pub fn clear(&self) {
        let mut state = self.rebuild.lock().unwrap_or_else(PoisonError::into_inner);
        state.fingerprint = None;
        self.current.store(Arc::new(TopicIndex::default()));
    }

    pub fn search(&self, query: &str) -> Vec<SearchHit> {
        self.load().search(query)
    }
}
