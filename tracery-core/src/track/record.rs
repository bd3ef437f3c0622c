//! Read Recording
//!
//! While a tracked function runs, every distinct `(target, key)` pair it
//! reads is accumulated into a [`ReadMap`]. The map is installed as the
//! thread's current recording slot for the duration of the call and the
//! previous slot is restored on every exit path, so recording scopes nest
//! freely.
//!
//! The per-key boolean records whether a deferred change notification for
//! that pair was flushed while the map was still current. The auto-re-run
//! wrappers inspect it after a run: a flagged key means the run observed a
//! value that has already changed, so the run is stale before any watch is
//! installed.

use std::cell::RefCell;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;

use crate::key::{Key, TargetId};
use crate::track::batch::{self, BatchMode};

/// Ordered accumulator of `(target, key)` pairs read during a tracked run.
///
/// Cloning produces another handle to the same accumulator; the map itself
/// lives for one logical execution and is inspected or discarded
/// afterwards.
#[derive(Clone, Default)]
pub struct ReadMap {
    inner: Arc<Mutex<IndexMap<TargetId, IndexMap<Key, bool>>>>,
}

impl ReadMap {
    /// Create an empty recording map.
    pub fn new() -> Self {
        Self::default()
    }

    /// True if nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Number of distinct targets recorded.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Discard everything recorded so far.
    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    /// True if `(target, key)` was recorded.
    pub fn contains(&self, target: TargetId, key: impl Into<Key>) -> bool {
        let key = key.into();
        self.inner
            .lock()
            .get(&target)
            .is_some_and(|props| props.contains_key(&key))
    }

    /// The keys recorded for `target`, in first-read order.
    pub fn keys_of(&self, target: TargetId) -> Vec<Key> {
        self.inner
            .lock()
            .get(&target)
            .map(|props| props.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Record a read. First read wins; re-reading never resets the
    /// notified flag.
    pub(crate) fn record(&self, target: TargetId, key: Key) {
        let mut inner = self.inner.lock();
        let props = inner.entry(target).or_default();
        props.entry(key).or_insert(false);
    }

    /// Flag `(target, key)` as already notified, if it was recorded.
    pub(crate) fn set_notified(&self, target: TargetId, key: &Key) {
        let mut inner = self.inner.lock();
        if let Some(props) = inner.get_mut(&target) {
            if let Some(flag) = props.get_mut(key) {
                *flag = true;
            }
        }
    }

    /// Snapshot of the recorded pairs, in first-read order.
    pub(crate) fn snapshot(&self) -> Vec<(TargetId, Vec<(Key, bool)>)> {
        self.inner
            .lock()
            .iter()
            .map(|(target, props)| {
                let props = props
                    .iter()
                    .map(|(key, flag)| (key.clone(), *flag))
                    .collect();
                (*target, props)
            })
            .collect()
    }
}

impl std::fmt::Debug for ReadMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("ReadMap")
            .field("targets", &inner.len())
            .finish()
    }
}

thread_local! {
    /// The recording map currently collecting reads on this thread, if any.
    static CURRENT: RefCell<Option<ReadMap>> = const { RefCell::new(None) };
}

/// Run `f` with the thread's current recording map, if one is active.
pub(crate) fn with_current(f: impl FnOnce(&ReadMap)) {
    CURRENT.with(|current| {
        // Clone the handle out so `f` may itself re-enter the engine.
        let map = current.borrow().clone();
        if let Some(map) = map {
            f(&map);
        }
    });
}

/// True if a recording map is active on this thread.
pub fn is_recording() -> bool {
    CURRENT.with(|current| current.borrow().is_some())
}

/// Guard that restores the previous recording slot when dropped.
///
/// This keeps the slot correct even if the tracked function panics.
struct RecordGuard {
    previous: Option<ReadMap>,
}

impl RecordGuard {
    fn install(map: ReadMap) -> Self {
        let previous = CURRENT.with(|current| current.borrow_mut().replace(map));
        Self { previous }
    }
}

impl Drop for RecordGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        CURRENT.with(|current| {
            *current.borrow_mut() = previous;
        });
    }
}

/// Options for [`observe_with`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ObserveOptions {
    /// When set, the whole execution runs inside a batching scope; deferred
    /// notifications flush once on scope exit.
    pub postpone: Option<BatchMode>,
}

/// Run `f` with `map` installed as the active recording map.
///
/// Reads performed through [`mark_read`](crate::track::mark_read) inside
/// `f` are accumulated into `map`. The previous recording context is
/// restored on every exit path, so `observe` calls nest without
/// cross-contamination.
pub fn observe<T>(map: &ReadMap, f: impl FnOnce() -> T) -> T {
    observe_with(map, ObserveOptions::default(), f)
}

/// [`observe`] with explicit options.
pub fn observe_with<T>(map: &ReadMap, options: ObserveOptions, f: impl FnOnce() -> T) -> T {
    let _guard = RecordGuard::install(map.clone());
    match options.postpone {
        None => f(),
        Some(mode) => batch::postpone_with(mode, f),
    }
}
