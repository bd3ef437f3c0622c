//! Mark Primitives
//!
//! The two low-level entry points every observable container is built on:
//! [`mark_read`] records a read into the active recording map, and
//! [`mark_change`] notifies the watchers of a `(target, key)` pair,
//! immediately or through the open batching scope.
//!
//! Both are cheap no-ops when nothing is listening: `mark_read` without an
//! active recording map and `mark_change` without registered watchers do no
//! work beyond a thread-local lookup.

use crate::key::{Key, TargetId};
use crate::track::batch;
use crate::track::record;
use crate::track::registry::{self, Deliver};

/// Record that `key` of `target` was read.
///
/// No-op unless a recording map is active on this thread (see
/// [`observe`](crate::track::observe)). Recording is idempotent: the first
/// read of a pair wins and later reads add no information.
pub fn mark_read(target: TargetId, key: impl Into<Key>) {
    let key = key.into();
    record::with_current(|map| map.record(target, key.clone()));
}

/// Mark `key` of `target` as changed and notify its watchers.
///
/// Inside a batching scope the pair is recorded for the scope's single
/// flush and only disdeferable watchers fire now; otherwise every watcher
/// registered for the pair fires inline, in registration order, over a
/// snapshot taken before the round starts.
pub fn mark_change(target: TargetId, key: impl Into<Key>) {
    let key = key.into();
    if batch::defer(target, key.clone()) {
        registry::exec_watch(target, &key, Deliver::DisdeferableOnly);
        return;
    }
    registry::exec_watch(target, &key, Deliver::All);
}
