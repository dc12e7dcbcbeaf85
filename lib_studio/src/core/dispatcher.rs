//! # Frame Dispatcher
//!
//! Fans every frame out to all registered callbacks and publishes the shared
//! `PipelineSnapshot` the callbacks read from.
//!
//! ## Core Design Principles:
//!
//! 1.  **Zero-Copy Fan-out**: a frame is wrapped in an `Arc` once; every
//!     callback receives a reference to the same allocation.
//!
//! 2.  **Ordered, Serialized Delivery**: callbacks run in registration order.
//!     A dispatch lock makes sure all callbacks of frame N have returned before
//!     frame N+1 is delivered, and frames whose `seq` does not increase within
//!     the current session are rejected.
//!
//! 3.  **Stable Listener Set per Frame**: the listener list is copied when a
//!     dispatch starts. A callback registered while a frame is being delivered
//!     first hears about the next frame.
//!
//! 4.  **Isolation**: a panicking callback is caught and logged; the remaining
//!     callbacks still receive the frame. A callback that dispatches or
//!     updates state from inside its own delivery is refused with a warning.
//!
//! 5.  **Lock-free Snapshot Reads**: the snapshot lives in an `ArcSwap`, so
//!     readers outside the dispatch path never contend with the player.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::thread::{self, ThreadId};

use arc_swap::ArcSwap;
use thiserror::Error;

use super::player::PlayerPresence;
use crate::model::{Capabilities, Datatypes, Frame, Timestamp, Topic};

/// Everything a subscriber may read about the pipeline at one instant.
#[derive(Debug, Clone)]
pub struct PipelineSnapshot {
    pub presence: PlayerPresence,
    pub capabilities: Arc<Capabilities>,
    pub topics: Arc<Vec<Topic>>,
    pub datatypes: Arc<Datatypes>,
    /// The most recently dispatched frame of the current session.
    pub current_frame: Option<Arc<Frame>>,
    /// Receive time of the newest dispatched message, or the last seek target.
    pub current_time: Option<Timestamp>,
    /// Set when `presence` is `Error`.
    pub error: Option<Arc<str>>,
    pub session: u64,
}

impl Default for PipelineSnapshot {
    fn default() -> Self {
        Self {
            presence: PlayerPresence::NotPresent,
            capabilities: Arc::new(Capabilities::none()),
            topics: Arc::new(Vec::new()),
            datatypes: Arc::new(Datatypes::new()),
            current_frame: None,
            current_time: None,
            error: None,
            session: 0,
        }
    }
}

impl PipelineSnapshot {
    fn same_state(&self, other: &PipelineSnapshot) -> bool {
        self.presence == other.presence
            && self.capabilities == other.capabilities
            && Arc::ptr_eq(&self.topics, &other.topics)
            && Arc::ptr_eq(&self.datatypes, &other.datatypes)
            && self.error == other.error
            && self.session == other.session
            && self.current_time == other.current_time
    }
}

/// What a callback receives. `frame` is `None` for state-only updates
/// (presence, topics, capabilities changed without a new frame).
#[derive(Debug, Clone, Copy)]
pub struct RenderState<'a> {
    pub frame: Option<&'a Arc<Frame>>,
    pub snapshot: &'a PipelineSnapshot,
}

type Callback = Arc<dyn Fn(&RenderState<'_>) + Send + Sync>;

struct Listener {
    id: u64,
    callback: Callback,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("frame seq {seq} of session {session} is not after {last}")]
    NonMonotonic { session: u64, seq: u64, last: u64 },
    #[error("frame of session {frame_session} arrived while session {current} is active")]
    StaleSession { frame_session: u64, current: u64 },
    #[error("dispatch called from inside a listener callback")]
    Reentrant,
}

#[derive(Debug, Default)]
struct DispatchState {
    session: u64,
    last_seq: u64,
}

pub struct FrameDispatcher {
    listeners: Mutex<Vec<Listener>>,
    next_listener: AtomicU64,
    dispatch: Mutex<DispatchState>,
    /// Thread currently running callbacks while holding `dispatch`.
    notifying: Mutex<Option<ThreadId>>,
    snapshot: ArcSwap<PipelineSnapshot>,
}

impl Default for FrameDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl FrameDispatcher {
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(Vec::new()),
            next_listener: AtomicU64::new(1),
            dispatch: Mutex::new(DispatchState::default()),
            notifying: Mutex::new(None),
            snapshot: ArcSwap::from_pointee(PipelineSnapshot::default()),
        }
    }

    /// # Register
    ///
    /// Adds a callback at the end of the invocation order. The callback is
    /// removed when the returned guard is dropped.
    ///
    /// Callbacks run on the player task and must not block or dispatch.
    pub fn register<F>(self: &Arc<Self>, callback: F) -> ListenerGuard
    where
        F: Fn(&RenderState<'_>) + Send + Sync + 'static,
    {
        let id = self.next_listener.fetch_add(1, Ordering::Relaxed);
        lock(&self.listeners).push(Listener {
            id,
            callback: Arc::new(callback),
        });
        log::debug!("Listener {} registered", id);
        ListenerGuard {
            dispatcher: Arc::downgrade(self),
            id,
        }
    }

    fn unregister(&self, id: u64) {
        let mut listeners = lock(&self.listeners);
        let before = listeners.len();
        listeners.retain(|l| l.id != id);
        if listeners.len() != before {
            log::debug!("Listener {} removed", id);
        }
    }

    pub fn listener_count(&self) -> usize {
        lock(&self.listeners).len()
    }

    /// Current snapshot. Never blocks.
    pub fn snapshot(&self) -> Arc<PipelineSnapshot> {
        self.snapshot.load_full()
    }

    /// True when called by a callback of this dispatcher. Taking the dispatch
    /// lock there would deadlock.
    fn is_reentrant(&self, operation: &str) -> bool {
        let reentrant = *lock(&self.notifying) == Some(thread::current().id());
        if reentrant {
            log::warn!("Ignoring {} called from inside a listener callback", operation);
        }
        reentrant
    }

    /// Starts a new connection session: sequence numbers restart and the
    /// previous session's frame is dropped from the snapshot.
    ///
    /// Called from a callback it changes nothing and returns the current
    /// session.
    pub fn start_session(&self) -> u64 {
        if self.is_reentrant("start_session") {
            return self.snapshot.load().session;
        }
        let mut state = lock(&self.dispatch);
        state.session += 1;
        state.last_seq = 0;
        let session = state.session;
        let mut next = (*self.snapshot.load_full()).clone();
        next.session = session;
        next.current_frame = None;
        next.current_time = None;
        self.snapshot.store(Arc::new(next));
        log::info!("Dispatcher session {} started", session);
        session
    }

    /// # Dispatch
    ///
    /// Delivers `frame` to every listener registered when the call started.
    ///
    /// ## Logic:
    /// 1.  Takes the dispatch lock and checks the frame belongs to the active
    ///     session with a `seq` greater than the last one.
    /// 2.  Publishes the new snapshot (current frame, current time, and the
    ///     optional presence change) before any callback runs.
    /// 3.  Copies the listener list and invokes each callback, catching panics.
    ///
    /// A callback calling `dispatch` gets `DispatchError::Reentrant`.
    pub fn dispatch(&self, frame: Frame) -> Result<Arc<Frame>, DispatchError> {
        self.dispatch_with_presence(frame, None)
    }

    pub(crate) fn dispatch_with_presence(
        &self,
        frame: Frame,
        presence: Option<PlayerPresence>,
    ) -> Result<Arc<Frame>, DispatchError> {
        if self.is_reentrant("dispatch") {
            return Err(DispatchError::Reentrant);
        }
        let mut state = lock(&self.dispatch);
        if frame.session != state.session {
            return Err(DispatchError::StaleSession {
                frame_session: frame.session,
                current: state.session,
            });
        }
        if frame.seq <= state.last_seq {
            return Err(DispatchError::NonMonotonic {
                session: frame.session,
                seq: frame.seq,
                last: state.last_seq,
            });
        }
        state.last_seq = frame.seq;

        let frame = Arc::new(frame);
        let mut next = (*self.snapshot.load_full()).clone();
        if let Some(presence) = presence {
            next.presence = presence;
        }
        if let Some(time) = frame.latest_time() {
            next.current_time = Some(time);
        }
        next.current_frame = Some(Arc::clone(&frame));
        let next = Arc::new(next);
        self.snapshot.store(Arc::clone(&next));

        self.notify(&RenderState {
            frame: Some(&frame),
            snapshot: &next,
        });
        drop(state);
        Ok(frame)
    }

    /// Applies `mutate` to a copy of the snapshot and publishes it. Listeners
    /// get a state-only update when something observable changed. Returns
    /// false without applying `mutate` when called from a callback.
    pub fn update_state<F>(&self, mutate: F) -> bool
    where
        F: FnOnce(&mut PipelineSnapshot),
    {
        if self.is_reentrant("update_state") {
            return false;
        }
        let state = lock(&self.dispatch);
        let current = self.snapshot.load_full();
        let mut next = (*current).clone();
        mutate(&mut next);
        if next.same_state(&current) {
            return false;
        }
        let next = Arc::new(next);
        self.snapshot.store(Arc::clone(&next));
        self.notify(&RenderState {
            frame: None,
            snapshot: &next,
        });
        drop(state);
        true
    }

    /// Resets the snapshot to its disconnected default, keeping the session.
    pub fn reset(&self) {
        self.update_state(|snapshot| {
            let session = snapshot.session;
            *snapshot = PipelineSnapshot {
                session,
                ..PipelineSnapshot::default()
            };
        });
    }

    fn notify(&self, render: &RenderState<'_>) {
        let callbacks: Vec<(u64, Callback)> = lock(&self.listeners)
            .iter()
            .map(|l| (l.id, Arc::clone(&l.callback)))
            .collect();
        *lock(&self.notifying) = Some(thread::current().id());
        for (id, callback) in callbacks {
            if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(|| callback(render))) {
                let reason = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                log::error!("Listener {} panicked during dispatch: {}", id, reason);
            }
        }
        *lock(&self.notifying) = None;
    }
}

/// Disposer returned by `FrameDispatcher::register`.
#[must_use = "dropping the guard unregisters the listener"]
pub struct ListenerGuard {
    dispatcher: Weak<FrameDispatcher>,
    id: u64,
}

impl ListenerGuard {
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        if let Some(dispatcher) = self.dispatcher.upgrade() {
            dispatcher.unregister(self.id);
        }
    }
}

/// Derives a value from snapshots and keeps returning the same `Arc` while the
/// derived value stays equal, so consumers can compare by pointer.
pub struct MemoSelector<T, F> {
    select: F,
    last: Mutex<Option<Arc<T>>>,
}

impl<T, F> MemoSelector<T, F>
where
    T: PartialEq,
    F: Fn(&PipelineSnapshot) -> T,
{
    pub fn new(select: F) -> Self {
        Self {
            select,
            last: Mutex::new(None),
        }
    }

    pub fn select(&self, snapshot: &PipelineSnapshot) -> Arc<T> {
        let value = (self.select)(snapshot);
        let mut last = lock(&self.last);
        if let Some(previous) = last.as_ref() {
            if **previous == value {
                return Arc::clone(previous);
            }
        }
        let value = Arc::new(value);
        *last = Some(Arc::clone(&value));
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Message, StructuredValue};
    use std::sync::atomic::AtomicUsize;

    fn frame(session: u64, seq: u64) -> Frame {
        Frame {
            session,
            seq,
            did_seek: false,
            messages: vec![Arc::new(Message::new(
                "/a",
                "t/T",
                Timestamp::new(seq as u32, 0),
                StructuredValue::Null,
            ))],
        }
    }

    fn recorder(dispatcher: &Arc<FrameDispatcher>, log: &Arc<Mutex<Vec<String>>>, name: &'static str) -> ListenerGuard {
        let log = Arc::clone(log);
        dispatcher.register(move |render| {
            if let Some(frame) = render.frame {
                log.lock().unwrap().push(format!("{}:{}", name, frame.seq));
            }
        })
    }

    #[test]
    fn delivers_in_registration_order_and_rejects_old_frames() {
        let dispatcher = Arc::new(FrameDispatcher::new());
        let session = dispatcher.start_session();
        let log = Arc::new(Mutex::new(Vec::new()));
        let _a = recorder(&dispatcher, &log, "a");
        let _b = recorder(&dispatcher, &log, "b");

        dispatcher.dispatch(frame(session, 1)).unwrap();
        assert_eq!(
            dispatcher.dispatch(frame(session, 1)).unwrap_err(),
            DispatchError::NonMonotonic { session, seq: 1, last: 1 }
        );
        dispatcher.dispatch(frame(session, 2)).unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["a:1", "b:1", "a:2", "b:2"]);
        assert_eq!(dispatcher.snapshot().current_time, Some(Timestamp::new(2, 0)));
    }

    #[test]
    fn new_session_restarts_sequence() {
        let dispatcher = FrameDispatcher::new();
        let first = dispatcher.start_session();
        dispatcher.dispatch(frame(first, 5)).unwrap();
        let second = dispatcher.start_session();
        assert!(matches!(
            dispatcher.dispatch(frame(first, 6)),
            Err(DispatchError::StaleSession { .. })
        ));
        dispatcher.dispatch(frame(second, 1)).unwrap();
        assert!(dispatcher.snapshot().current_frame.is_some());
    }

    #[test]
    fn guard_drop_unregisters() {
        let dispatcher = Arc::new(FrameDispatcher::new());
        let guard = dispatcher.register(|_| {});
        assert_eq!(dispatcher.listener_count(), 1);
        drop(guard);
        assert_eq!(dispatcher.listener_count(), 0);
    }

    #[test]
    fn listener_registered_mid_dispatch_starts_next_frame() {
        let dispatcher = Arc::new(FrameDispatcher::new());
        let session = dispatcher.start_session();
        let late_calls = Arc::new(AtomicUsize::new(0));
        let late_guard: Arc<Mutex<Option<ListenerGuard>>> = Arc::new(Mutex::new(None));

        let _registrar = {
            let weak = Arc::downgrade(&dispatcher);
            let late_calls = Arc::clone(&late_calls);
            let late_guard = Arc::clone(&late_guard);
            dispatcher.register(move |render| {
                if render.frame.is_none() {
                    return;
                }
                let mut slot = late_guard.lock().unwrap();
                if slot.is_none() {
                    if let Some(dispatcher) = weak.upgrade() {
                        let late_calls = Arc::clone(&late_calls);
                        *slot = Some(dispatcher.register(move |_| {
                            late_calls.fetch_add(1, Ordering::SeqCst);
                        }));
                    }
                }
            })
        };

        dispatcher.dispatch(frame(session, 1)).unwrap();
        assert_eq!(late_calls.load(Ordering::SeqCst), 0);
        dispatcher.dispatch(frame(session, 2)).unwrap();
        assert_eq!(late_calls.load(Ordering::SeqCst), 1);
        late_guard.lock().unwrap().take();
    }

    #[test]
    fn panicking_listener_does_not_stop_others() {
        let dispatcher = Arc::new(FrameDispatcher::new());
        let session = dispatcher.start_session();
        let calls = Arc::new(AtomicUsize::new(0));
        let _bad = dispatcher.register(|render| {
            if render.frame.is_some() {
                panic!("listener bug");
            }
        });
        let _good = {
            let calls = Arc::clone(&calls);
            dispatcher.register(move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
            })
        };
        dispatcher.dispatch(frame(session, 1)).unwrap();
        dispatcher.dispatch(frame(session, 2)).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn state_updates_notify_without_frame_only_on_change() {
        let dispatcher = Arc::new(FrameDispatcher::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let _guard = {
            let seen = Arc::clone(&seen);
            dispatcher.register(move |render| {
                assert!(render.frame.is_none());
                seen.lock().unwrap().push(render.snapshot.presence);
            })
        };
        assert!(dispatcher.update_state(|s| s.presence = PlayerPresence::Initializing));
        assert!(!dispatcher.update_state(|s| s.presence = PlayerPresence::Initializing));
        assert_eq!(*seen.lock().unwrap(), vec![PlayerPresence::Initializing]);
    }

    #[test]
    fn listener_calling_back_into_dispatcher_is_refused() {
        let dispatcher = Arc::new(FrameDispatcher::new());
        let session = dispatcher.start_session();
        let outcomes = Arc::new(Mutex::new(Vec::new()));
        let _guard = {
            let weak = Arc::downgrade(&dispatcher);
            let outcomes = Arc::clone(&outcomes);
            dispatcher.register(move |render| {
                let (Some(frame), Some(dispatcher)) = (render.frame, weak.upgrade()) else {
                    return;
                };
                let nested = dispatcher.dispatch(self::frame(frame.session, frame.seq + 1));
                let updated = dispatcher.update_state(|s| s.presence = PlayerPresence::Error);
                let restarted = dispatcher.start_session();
                outcomes.lock().unwrap().push((nested.err(), updated, restarted));
            })
        };

        dispatcher.dispatch(frame(session, 1)).unwrap();
        assert_eq!(
            *outcomes.lock().unwrap(),
            vec![(Some(DispatchError::Reentrant), false, session)]
        );
        let snapshot = dispatcher.snapshot();
        assert_eq!(snapshot.presence, PlayerPresence::NotPresent);
        assert_eq!(snapshot.session, session);

        // The dispatcher is usable again once delivery returns.
        dispatcher.dispatch(frame(session, 2)).unwrap();
        assert!(dispatcher.update_state(|s| s.presence = PlayerPresence::Present));
    }

    #[test]
    fn memo_selector_keeps_pointer_while_equal() {
        let dispatcher = FrameDispatcher::new();
        let selector = MemoSelector::new(|s: &PipelineSnapshot| s.presence);
        let first = selector.select(&dispatcher.snapshot());
        dispatcher.update_state(|s| s.current_time = Some(Timestamp::new(3, 0)));
        let second = selector.select(&dispatcher.snapshot());
        assert!(Arc::ptr_eq(&first, &second));

        dispatcher.update_state(|s| s.presence = PlayerPresence::Present);
        let third = selector.select(&dispatcher.snapshot());
        assert!(!Arc::ptr_eq(&first, &third));
        assert_eq!(*third, PlayerPresence::Present);
    }
}
