//! # Subscription Registry
//!
//! Tracks which topics every mounted subscriber wants and folds them into a
//! single `Demand`: the union of topics, with `preload_full_history` OR-ed per
//! topic. The active player watches the demand and forwards it to the source.
//!
//! ## Logic:
//!
//! - All mutations run under one `Mutex`, so concurrent subscribe/unsubscribe
//!   calls from many panels are serialized.
//! - Per-topic counters (subscribers, preloaders) are updated incrementally
//!   instead of recomputing the union from every subscriber.
//! - After each mutation the demand is rebuilt from the counters and published
//!   through a `watch` channel only when it actually changed. Readers always get
//!   an immutable `Arc<Demand>` snapshot.
//! - Removal is synchronous: once `unsubscribe_all` returns, the topic is gone
//!   from the published demand.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;

/// Opaque identity of one subscriber (usually one panel).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriberId(u64);

static NEXT_SUBSCRIBER: AtomicU64 = AtomicU64::new(1);

impl SubscriberId {
    /// Allocates a process-unique id.
    pub fn next() -> Self {
        Self(NEXT_SUBSCRIBER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "subscriber-{}", self.0)
    }
}

/// Per-subscription options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscribeOptions {
    /// Ask the source to deliver the whole history of the topic, not only
    /// messages around the playback position.
    pub preload_full_history: bool,
}

/// One entry of a `set_subscriptions` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionPayload {
    pub topic: String,
    pub preload_full_history: bool,
}

impl SubscriptionPayload {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            preload_full_history: false,
        }
    }

    pub fn preloading(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            preload_full_history: true,
        }
    }
}

/// The union of all subscriptions: topic name to "preload full history".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Demand {
    topics: BTreeMap<String, bool>,
}

impl Demand {
    pub fn contains(&self, topic: &str) -> bool {
        self.topics.contains_key(topic)
    }

    /// `Some(preload)` when `topic` is demanded.
    pub fn preload(&self, topic: &str) -> Option<bool> {
        self.topics.get(topic).copied()
    }

    pub fn topics(&self) -> impl Iterator<Item = (&str, bool)> {
        self.topics.iter().map(|(t, p)| (t.as_str(), *p))
    }

    pub fn topic_names(&self) -> Vec<String> {
        self.topics.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.topics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct TopicCounter {
    subscribers: usize,
    preloaders: usize,
}

#[derive(Debug, Default)]
struct RegistryState {
    /// Topic -> preload flag, per subscriber.
    by_subscriber: HashMap<SubscriberId, BTreeMap<String, bool>>,
    counts: BTreeMap<String, TopicCounter>,
}

impl RegistryState {
    fn add(&mut self, id: SubscriberId, topic: &str, preload: bool) {
        let previous = self
            .by_subscriber
            .entry(id)
            .or_default()
            .insert(topic.to_string(), preload);
        let counter = self.counts.entry(topic.to_string()).or_default();
        match previous {
            None => {
                counter.subscribers += 1;
                if preload {
                    counter.preloaders += 1;
                }
            }
            Some(was) if was != preload => {
                if preload {
                    counter.preloaders += 1;
                } else {
                    counter.preloaders = counter.preloaders.saturating_sub(1);
                }
            }
            Some(_) => {}
        }
    }

    fn remove(&mut self, topic: &str, preload: bool) {
        let Some(counter) = self.counts.get_mut(topic) else {
            return;
        };
        counter.subscribers = counter.subscribers.saturating_sub(1);
        if preload {
            counter.preloaders = counter.preloaders.saturating_sub(1);
        }
        if counter.subscribers == 0 {
            self.counts.remove(topic);
        }
    }

    fn remove_subscriber(&mut self, id: SubscriberId) -> usize {
        let Some(topics) = self.by_subscriber.remove(&id) else {
            return 0;
        };
        for (topic, preload) in &topics {
            self.remove(topic, *preload);
        }
        topics.len()
    }

    fn demand(&self) -> Demand {
        Demand {
            topics: self
                .counts
                .iter()
                .map(|(topic, c)| (topic.clone(), c.preloaders > 0))
                .collect(),
        }
    }
}

/// Registry of all subscriptions of one pipeline.
#[derive(Debug)]
pub struct SubscriptionRegistry {
    state: Mutex<RegistryState>,
    demand_tx: watch::Sender<Arc<Demand>>,
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        let (demand_tx, _) = watch::channel(Arc::new(Demand::default()));
        Self {
            state: Mutex::new(RegistryState::default()),
            demand_tx,
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Rebuilds the demand and publishes it if it differs from the current one.
    /// Must be called with the state lock held so publications stay ordered.
    fn publish(&self, state: &RegistryState) -> bool {
        let next = state.demand();
        if **self.demand_tx.borrow() == next {
            return false;
        }
        log::debug!("Demand changed: {} topic(s)", next.len());
        self.demand_tx.send_replace(Arc::new(next));
        true
    }

    /// Adds (or updates) one subscription. Re-subscribing the same topic with
    /// the same id overwrites the preload flag.
    pub fn subscribe(&self, id: SubscriberId, topic: &str, options: SubscribeOptions) {
        if topic.is_empty() {
            log::warn!("{} tried to subscribe to an empty topic name, ignored", id);
            return;
        }
        let mut state = self.lock();
        state.add(id, topic, options.preload_full_history);
        self.publish(&state);
    }

    /// Replaces every subscription of `id` with `payloads` in one step.
    pub fn set_subscriptions(&self, id: SubscriberId, payloads: &[SubscriptionPayload]) {
        let mut state = self.lock();
        state.remove_subscriber(id);
        for payload in payloads.iter().filter(|p| !p.topic.is_empty()) {
            state.add(id, &payload.topic, payload.preload_full_history);
        }
        self.publish(&state);
    }

    /// Removes one topic from `id`'s subscriptions.
    pub fn unsubscribe(&self, id: SubscriberId, topic: &str) {
        let mut state = self.lock();
        let removed = state
            .by_subscriber
            .get_mut(&id)
            .and_then(|topics| topics.remove(topic));
        if let Some(preload) = removed {
            state.remove(topic, preload);
            if state.by_subscriber.get(&id).is_some_and(BTreeMap::is_empty) {
                state.by_subscriber.remove(&id);
            }
            self.publish(&state);
        }
    }

    /// Drops every subscription of `id`. Idempotent.
    pub fn unsubscribe_all(&self, id: SubscriberId) {
        let mut state = self.lock();
        let removed = state.remove_subscriber(id);
        if removed > 0 {
            log::debug!("{} unsubscribed from {} topic(s)", id, removed);
            self.publish(&state);
        }
    }

    /// Snapshot of the current demand.
    pub fn current_demand(&self) -> Arc<Demand> {
        self.demand_tx.borrow().clone()
    }

    /// A receiver that observes every published demand change.
    pub fn watch(&self) -> watch::Receiver<Arc<Demand>> {
        self.demand_tx.subscribe()
    }

    /// Topics `id` is subscribed to.
    pub fn topics_of(&self, id: SubscriberId) -> Vec<String> {
        self.lock()
            .by_subscriber
            .get(&id)
            .map(|topics| topics.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().by_subscriber.len()
    }
}
