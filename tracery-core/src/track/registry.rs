//! Watch Registry
//!
//! The process-wide subscription table: for each `(target, key)` pair, the
//! set of watcher callbacks interested in changes to it.
//!
//! Invariants:
//!
//! - Registration identity, not callback identity, is the cancellation key:
//!   registering the same closure twice yields two independently
//!   cancellable subscriptions.
//! - Cancellation is idempotent and eagerly garbage-collects empty key and
//!   target slots; the registry never accumulates dead entries.
//! - Notification iterates a snapshot taken before the round starts, so a
//!   watcher that unsubscribes itself or others mid-round cannot corrupt
//!   iteration, and a watcher added mid-round is not fired that round.
//! - Every callback is shield-wrapped at registration; a panicking watcher
//!   is reported and the round continues.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use dashmap::DashMap;
use indexmap::IndexMap;
use parking_lot::Mutex;
use smallvec::SmallVec;

use crate::key::{Key, TargetId};
use crate::report;

type WatchFn = Arc<dyn Fn() + Send + Sync>;

struct WatchEntry {
    id: u64,
    cb: WatchFn,
    disdeferable: bool,
}

type PropMap = IndexMap<Key, Vec<WatchEntry>>;

static WATCH_LIST: OnceLock<DashMap<TargetId, PropMap>> = OnceLock::new();

fn watch_list() -> &'static DashMap<TargetId, PropMap> {
    WATCH_LIST.get_or_init(DashMap::new)
}

fn next_watch_id() -> u64 {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// Which watchers a notification round addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Deliver {
    /// Everyone registered for the pair.
    All,
    /// Only watchers that must not be deferred (fired inside a batch).
    DisdeferableOnly,
    /// Only deferrable watchers (fired by the batch flush).
    DeferableOnly,
}

/// Idempotent handle that removes one registration.
///
/// Dropping the handle does **not** cancel the registration; cancellation is
/// structural and explicit. [`CancelWatch::cancel`] may be called any number
/// of times.
pub struct CancelWatch {
    action: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl CancelWatch {
    pub(crate) fn new(action: impl FnOnce() + Send + 'static) -> Self {
        Self {
            action: Mutex::new(Some(Box::new(action))),
        }
    }

    /// A canceller that does nothing, returned for registrations that were
    /// never established (for example, watching a stopped cell).
    pub(crate) fn noop() -> Self {
        Self {
            action: Mutex::new(None),
        }
    }

    /// Remove the registration. Subsequent calls are no-ops.
    pub fn cancel(&self) {
        let action = self.action.lock().take();
        if let Some(action) = action {
            action();
        }
    }

    /// True if the registration is still in place.
    pub fn is_active(&self) -> bool {
        self.action.lock().is_some()
    }
}

impl std::fmt::Debug for CancelWatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelWatch")
            .field("active", &self.is_active())
            .finish()
    }
}

/// Subscribe `cb` to changes of `(target, key)`.
///
/// `cb` is invoked inline whenever [`mark_change`](crate::track::mark_change)
/// fires for the pair. With `disdeferable` set, the callback fires
/// immediately even while a batching scope is deferring everyone else.
///
/// Returns an idempotent [`CancelWatch`]. Watcher panics are caught and
/// reported through the error hook, never propagated to the notifier.
pub fn watch_prop(
    target: TargetId,
    key: impl Into<Key>,
    cb: impl Fn() + Send + Sync + 'static,
    disdeferable: bool,
) -> CancelWatch {
    let key = key.into();
    let id = next_watch_id();
    let shielded: WatchFn = Arc::new(move || report::shield(&cb));

    watch_list()
        .entry(target)
        .or_default()
        .entry(key.clone())
        .or_default()
        .push(WatchEntry {
            id,
            cb: shielded,
            disdeferable,
        });

    CancelWatch::new(move || remove_entry(target, &key, id))
}

fn remove_entry(target: TargetId, key: &Key, id: u64) {
    let registry = watch_list();
    {
        let Some(mut props) = registry.get_mut(&target) else {
            return;
        };
        if let Some(entries) = props.get_mut(key) {
            entries.retain(|entry| entry.id != id);
            if entries.is_empty() {
                props.shift_remove(key);
            }
        }
    }
    // The shard guard is released above; removing the target slot while
    // holding it would deadlock.
    registry.remove_if(&target, |_, props| props.is_empty());
}

/// Fire the watchers registered for `(target, key)`.
///
/// The callback list is snapshotted before the round begins and the
/// registry locks are released before any callback runs, so callbacks may
/// freely re-enter the engine.
pub(crate) fn exec_watch(target: TargetId, key: &Key, deliver: Deliver) {
    let snapshot: SmallVec<[WatchFn; 4]> = {
        let Some(props) = watch_list().get(&target) else {
            return;
        };
        let Some(entries) = props.get(key) else {
            return;
        };
        entries
            .iter()
            .filter(|entry| match deliver {
                Deliver::All => true,
                Deliver::DisdeferableOnly => entry.disdeferable,
                Deliver::DeferableOnly => !entry.disdeferable,
            })
            .map(|entry| entry.cb.clone())
            .collect()
    };

    for cb in snapshot {
        cb();
    }
}

/// Number of live registrations for `(target, key)`. Test support.
#[cfg(test)]
pub(crate) fn watcher_count(target: TargetId, key: &Key) -> usize {
    watch_list()
        .get(&target)
        .and_then(|props| props.get(key).map(Vec::len))
        .unwrap_or(0)
}

/// True if the target has any live registrations. Test support.
#[cfg(test)]
pub(crate) fn has_target(target: TargetId) -> bool {
    watch_list().contains_key(&target)
}
