//! Deferred Notification
//!
//! A batching scope coalesces a burst of changes: while one is open,
//! [`mark_change`](crate::track::mark_change) records `(target, key)` pairs
//! into the scope's wait list instead of firing deferrable watchers, and the
//! scope flushes each pair once on exit.
//!
//! Nesting rules:
//!
//! - A non-priority scope opened inside another scope joins it: both record
//!   into the same list and only the outermost call flushes.
//! - A priority scope always opens a fresh, independent list and flushes on
//!   its own exit, regardless of nesting.
//!
//! "Deferred" means batched within the same synchronous call stack; nothing
//! is scheduled onto a future tick.

use std::cell::RefCell;
use std::rc::Rc;

use indexmap::{IndexMap, IndexSet};

use crate::key::{Key, TargetId};
use crate::track::record;
use crate::track::registry::{self, Deliver};

/// How a batching scope relates to an enclosing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BatchMode {
    /// Join an enclosing batch when one is open; otherwise open a new one.
    #[default]
    Join,
    /// Always open a fresh, independent batch.
    Priority,
}

type WaitList = Rc<RefCell<IndexMap<TargetId, IndexSet<Key>>>>;

thread_local! {
    /// The wait list of the innermost open batching scope, if any.
    static WAIT: RefCell<Option<WaitList>> = const { RefCell::new(None) };
}

/// Record a change into the open batching scope.
///
/// Returns false when no scope is open, in which case the caller notifies
/// synchronously.
pub(crate) fn defer(target: TargetId, key: Key) -> bool {
    WAIT.with(|wait| {
        let wait = wait.borrow();
        let Some(list) = wait.as_ref() else {
            return false;
        };
        list.borrow_mut().entry(target).or_default().insert(key);
        true
    })
}

/// Flush every deferred pair: fire the deferrable watchers, then flag the
/// pair in the recording map active at flush time so in-flight tracked runs
/// can tell their reads are already stale.
fn run_deferred(list: &WaitList) {
    let entries: Vec<(TargetId, Vec<Key>)> = list
        .borrow()
        .iter()
        .map(|(target, keys)| (*target, keys.iter().cloned().collect()))
        .collect();

    tracing::trace!(
        target: "tracery",
        targets = entries.len(),
        "flushing deferred notifications"
    );

    for (target, keys) in entries {
        for key in keys {
            registry::exec_watch(target, &key, Deliver::DeferableOnly);
            record::with_current(|map| map.set_notified(target, &key));
        }
    }
}

/// Guard that restores the enclosing batch context and, when this scope
/// owns its list, flushes it, on every exit path, including panics.
struct BatchGuard {
    previous: Option<WaitList>,
    list: WaitList,
    owned: bool,
}

impl Drop for BatchGuard {
    fn drop(&mut self) {
        WAIT.with(|wait| {
            *wait.borrow_mut() = self.previous.take();
        });
        if self.owned {
            run_deferred(&self.list);
        }
    }
}

/// Run `f` inside a batching scope, joining an enclosing one if open.
pub fn postpone<T>(f: impl FnOnce() -> T) -> T {
    postpone_with(BatchMode::Join, f)
}

/// Run `f` inside a fresh batching scope that flushes on its own exit.
pub fn postpone_priority<T>(f: impl FnOnce() -> T) -> T {
    postpone_with(BatchMode::Priority, f)
}

/// Run `f` inside a batching scope with an explicit [`BatchMode`].
pub fn postpone_with<T>(mode: BatchMode, f: impl FnOnce() -> T) -> T {
    let _guard = WAIT.with(|wait| {
        let current = wait.borrow().clone();
        let (list, owned) = match (mode, current) {
            (BatchMode::Join, Some(existing)) => (existing, false),
            _ => (WaitList::default(), true),
        };
        let previous = wait.borrow_mut().replace(list.clone());
        BatchGuard {
            previous,
            list,
            owned,
        }
    });
    f()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::track::{mark_change, watch_prop};
    use std::sync::atomic::{AtomicI32, Ordering};
    use std::sync::Arc;

    #[test]
    fn changes_coalesce_within_a_scope() {
        let target = TargetId::new();
        let count = Arc::new(AtomicI32::new(0));

        let count_clone = count.clone();
        let _watch = watch_prop(
            target,
            "x",
            move || {
                count_clone.fetch_add(1, Ordering::SeqCst);
            },
            false,
        );

        postpone(|| {
            mark_change(target, "x");
            mark_change(target, "x");
            mark_change(target, "x");
            assert_eq!(count.load(Ordering::SeqCst), 0);
        });

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn nested_join_flushes_only_at_the_outermost_exit() {
        let target = TargetId::new();
        let count = Arc::new(AtomicI32::new(0));

        let count_clone = count.clone();
        let _watch = watch_prop(
            target,
            "x",
            move || {
                count_clone.fetch_add(1, Ordering::SeqCst);
            },
            false,
        );

        postpone(|| {
            postpone(|| {
                mark_change(target, "x");
            });
            // Inner scope joined the outer list: nothing flushed yet.
            assert_eq!(count.load(Ordering::SeqCst), 0);
        });

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn priority_scope_flushes_independently() {
        let target = TargetId::new();
        let count = Arc::new(AtomicI32::new(0));

        let count_clone = count.clone();
        let _watch = watch_prop(
            target,
            "x",
            move || {
                count_clone.fetch_add(1, Ordering::SeqCst);
            },
            false,
        );

        postpone(|| {
            postpone_priority(|| {
                mark_change(target, "x");
            });
            // The priority scope flushed on its own exit.
            assert_eq!(count.load(Ordering::SeqCst), 1);

            mark_change(target, "x");
            assert_eq!(count.load(Ordering::SeqCst), 1);
        });

        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn disdeferable_watchers_fire_inside_the_scope() {
        let target = TargetId::new();
        let immediate = Arc::new(AtomicI32::new(0));
        let deferred = Arc::new(AtomicI32::new(0));

        let immediate_clone = immediate.clone();
        let _a = watch_prop(
            target,
            "x",
            move || {
                immediate_clone.fetch_add(1, Ordering::SeqCst);
            },
            true,
        );
        let deferred_clone = deferred.clone();
        let _b = watch_prop(
            target,
            "x",
            move || {
                deferred_clone.fetch_add(1, Ordering::SeqCst);
            },
            false,
        );

        postpone(|| {
            mark_change(target, "x");
            assert_eq!(immediate.load(Ordering::SeqCst), 1);
            assert_eq!(deferred.load(Ordering::SeqCst), 0);
        });

        assert_eq!(immediate.load(Ordering::SeqCst), 1);
        assert_eq!(deferred.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn scope_flushes_even_when_the_body_panics() {
        let target = TargetId::new();
        let count = Arc::new(AtomicI32::new(0));

        let count_clone = count.clone();
        let _watch = watch_prop(
            target,
            "x",
            move || {
                count_clone.fetch_add(1, Ordering::SeqCst);
            },
            false,
        );

        let result = std::panic::catch_unwind(|| {
            postpone(|| {
                mark_change(target, "x");
                panic!("body failure");
            })
        });

        assert!(result.is_err());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
