//! Auto-Re-run Executables
//!
//! A [`Monitored`] wraps a function so that each run's recorded reads are
//! turned into live watch registrations, and any later write to one of
//! those pairs signals "changed" through a change callback.
//!
//! # How It Works
//!
//! 1. Each `exec()` cancels the previous run's watches and runs the
//!    function under a fresh [`ReadMap`].
//!
//! 2. An empty map settles the run: `cb(false)`, nothing to watch.
//!
//! 3. A key already flagged as notified means a dependency changed while
//!    the run itself was reading it; the run is stale on arrival and
//!    `cb(true)` fires instead of installing watches.
//!
//! 4. Otherwise every recorded pair gets a watch pointing at an internal
//!    trigger. The trigger cancels all of the run's watches first, so it
//!    fires `cb(true)` at most once per run.
//!
//! A panic in the wrapped function propagates to the caller; that run's
//! partially collected dependencies are discarded, no watches are
//! installed, and the change callback is not invoked; the instance tracks
//! nothing until it successfully reruns.

use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use smallvec::SmallVec;

use crate::report;
use crate::track::{observe_with, watch_prop, BatchMode, CancelWatch, ObserveOptions, ReadMap};

/// Options for [`monitor`] and [`exec`].
#[derive(Debug, Clone, Copy, Default)]
pub struct MonitorOptions {
    /// Run the wrapped function inside a batching scope.
    pub postpone: Option<BatchMode>,
    /// Register this instance's dependency watches as disdeferable: the
    /// trigger fires immediately even inside a batching scope.
    pub disdeferable: bool,
}

type ChangeFn = Box<dyn Fn(bool) + Send + Sync>;

/// State shared between an executable, its trigger closures in the watch
/// registry, and its stop handle.
struct MonitorShared {
    cb: ChangeFn,
    cancels: Mutex<Option<SmallVec<[CancelWatch; 4]>>>,
    disdeferable: bool,
}

impl MonitorShared {
    fn new(cb: impl Fn(bool) + Send + Sync + 'static, disdeferable: bool) -> Arc<Self> {
        Arc::new(Self {
            cb: Box::new(move |changed| report::shield(|| cb(changed))),
            cancels: Mutex::new(None),
            disdeferable,
        })
    }

    /// Cancel the current run's watches. Returns false when nothing was
    /// watched, which callers use to keep triggers and stops single-shot.
    fn cancel(&self) -> bool {
        let list = self.cancels.lock().take();
        match list {
            None => false,
            Some(list) => {
                for cancel in list {
                    cancel.cancel();
                }
                true
            }
        }
    }

    /// A dependency changed: tear down this run's watches and signal once.
    fn trigger(&self) {
        if self.cancel() {
            (self.cb)(true);
        }
    }

    /// Translate a completed run's reads into live watches.
    fn install(self: &Arc<Self>, map: &ReadMap) {
        let entries = map.snapshot();
        if entries.is_empty() {
            (self.cb)(false);
            return;
        }

        let mut pairs = Vec::new();
        for (target, keys) in entries {
            for (key, notified) in keys {
                if notified {
                    // A flush already invalidated this run's reads.
                    (self.cb)(true);
                    return;
                }
                pairs.push((target, key));
            }
        }

        let cancels = pairs
            .into_iter()
            .map(|(target, key)| {
                let weak = Arc::downgrade(self);
                watch_prop(
                    target,
                    key,
                    move || {
                        if let Some(shared) = weak.upgrade() {
                            shared.trigger();
                        }
                    },
                    self.disdeferable,
                )
            })
            .collect();
        *self.cancels.lock() = Some(cancels);
    }
}

impl Drop for MonitorShared {
    fn drop(&mut self) {
        // Registry entries hold only weak references back to this instance,
        // so they must be removed here or the registry would accumulate
        // entries that can never fire.
        if let Some(list) = self.cancels.get_mut().take() {
            for cancel in list {
                cancel.cancel();
            }
        }
    }
}

/// A repeatable auto-tracking executable. See [`monitor`].
pub struct Monitored<T, A = ()> {
    shared: Arc<MonitorShared>,
    run_fn: Box<dyn Fn(A) -> T + Send + Sync>,
    postpone: Option<BatchMode>,
}

impl<T, A> Monitored<T, A> {
    /// Run the wrapped function with `arg`, re-capturing dependencies.
    pub fn call(&self, arg: A) -> T {
        self.shared.cancel();
        let map = ReadMap::new();
        let options = ObserveOptions {
            postpone: self.postpone,
        };
        let result = catch_unwind(AssertUnwindSafe(|| {
            observe_with(&map, options, || (self.run_fn)(arg))
        }));
        match result {
            Ok(value) => {
                self.shared.install(&map);
                value
            }
            Err(payload) => {
                map.clear();
                resume_unwind(payload);
            }
        }
    }

    /// Cancel the current run's watches and settle with `cb(false)`.
    ///
    /// No-op when nothing is currently watched. The instance stays usable:
    /// a later `call`/`exec` re-establishes tracking.
    pub fn stop(&self) {
        if self.shared.cancel() {
            (self.shared.cb)(false);
        }
    }
}

impl<T> Monitored<T, ()> {
    /// Run the wrapped zero-argument function, re-capturing dependencies.
    pub fn exec(&self) -> T {
        self.call(())
    }
}

impl<T, A> std::fmt::Debug for Monitored<T, A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Monitored")
            .field("watching", &self.shared.cancels.lock().is_some())
            .finish()
    }
}

/// Wrap `f` so each run's reads become live dependency watches.
///
/// `cb(true)` fires when a watched dependency changes (at most once per
/// run); `cb(false)` fires when a run has nothing to watch or when the
/// executable is stopped. `cb` is shielded: a panic inside it is reported,
/// never propagated to the writer that triggered it.
pub fn monitor<T>(
    cb: impl Fn(bool) + Send + Sync + 'static,
    f: impl Fn() -> T + Send + Sync + 'static,
    options: MonitorOptions,
) -> Monitored<T> {
    monitor_params(cb, move |_: ()| f(), options)
}

/// [`monitor`] for functions taking an argument per run.
pub fn monitor_params<T, A>(
    cb: impl Fn(bool) + Send + Sync + 'static,
    f: impl Fn(A) -> T + Send + Sync + 'static,
    options: MonitorOptions,
) -> Monitored<T, A> {
    Monitored {
        shared: MonitorShared::new(cb, options.disdeferable),
        run_fn: Box::new(f),
        postpone: options.postpone,
    }
}

/// One-shot tracked execution, shared with its stop handle.
struct ExecShared {
    cb: ChangeFn,
    cancels: Mutex<Option<SmallVec<[CancelWatch; 4]>>>,
    ended: std::sync::atomic::AtomicBool,
}

impl ExecShared {
    fn cancel(&self) -> bool {
        use std::sync::atomic::Ordering;
        if self.ended.swap(true, Ordering::SeqCst) {
            return false;
        }
        if let Some(list) = self.cancels.lock().take() {
            for cancel in list {
                cancel.cancel();
            }
        }
        true
    }

    fn trigger(&self) {
        if self.cancel() {
            (self.cb)(true);
        }
    }
}

impl Drop for ExecShared {
    fn drop(&mut self) {
        if let Some(list) = self.cancels.get_mut().take() {
            for cancel in list {
                cancel.cancel();
            }
        }
    }
}

/// Result of a one-shot [`exec`]: the function's value plus a stop handle.
pub struct ExecResult<T> {
    /// What the tracked function returned.
    pub result: T,
    shared: Arc<ExecShared>,
}

impl<T> ExecResult<T> {
    /// Cancel the run's watches and settle with `cb(false)`.
    ///
    /// Idempotent; a run that already settled (no dependencies) or already
    /// triggered does not settle again.
    pub fn stop(&self) {
        if self.shared.cancel() {
            (self.shared.cb)(false);
        }
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for ExecResult<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecResult")
            .field("result", &self.result)
            .finish()
    }
}

/// Run `f` once under tracking and watch its recorded reads.
///
/// Settles immediately with `cb(false)` when the run recorded nothing;
/// otherwise the first dependency change fires `cb(true)` exactly once.
pub fn exec<T>(
    cb: impl Fn(bool) + Send + Sync + 'static,
    f: impl FnOnce() -> T,
    options: MonitorOptions,
) -> ExecResult<T> {
    let shared = Arc::new(ExecShared {
        cb: {
            let cb = Box::new(cb);
            Box::new(move |changed| report::shield(|| cb(changed)))
        },
        cancels: Mutex::new(None),
        ended: std::sync::atomic::AtomicBool::new(false),
    });

    let map = ReadMap::new();
    let observe_options = ObserveOptions {
        postpone: options.postpone,
    };
    let result = observe_with(&map, observe_options, f);

    let entries = map.snapshot();
    if entries.is_empty() {
        use std::sync::atomic::Ordering;
        shared.ended.store(true, Ordering::SeqCst);
        (shared.cb)(false);
    } else {
        let mut stale = false;
        let mut pairs = Vec::new();
        'scan: for (target, keys) in entries {
            for (key, notified) in keys {
                if notified {
                    stale = true;
                    break 'scan;
                }
                pairs.push((target, key));
            }
        }
        if stale {
            (shared.cb)(true);
        } else {
            let cancels = pairs
                .into_iter()
                .map(|(target, key)| {
                    let weak = Arc::downgrade(&shared);
                    watch_prop(
                        target,
                        key,
                        move || {
                            if let Some(shared) = weak.upgrade() {
                                shared.trigger();
                            }
                        },
                        options.disdeferable,
                    )
                })
                .collect();
            *shared.cancels.lock() = Some(cancels);
        }
    }

    ExecResult { result, shared }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::track::{mark_change, mark_read, postpone};
    use crate::key::TargetId;
    use std::sync::atomic::{AtomicI32, Ordering};

    fn recording_changes() -> (Arc<parking_lot::Mutex<Vec<bool>>>, impl Fn(bool) + Send + Sync) {
        let log = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let log_clone = log.clone();
        (log, move |changed| log_clone.lock().push(changed))
    }

    #[test]
    fn run_with_no_reads_settles() {
        let (log, cb) = recording_changes();
        let m = monitor(cb, || 42, MonitorOptions::default());

        assert_eq!(m.exec(), 42);
        assert_eq!(*log.lock(), vec![false]);

        // Nothing watched, so stop has nothing to settle.
        m.stop();
        assert_eq!(*log.lock(), vec![false]);
    }

    #[test]
    fn dependency_change_triggers_once_per_run() {
        let target = TargetId::new();
        let (log, cb) = recording_changes();
        let m = monitor(
            cb,
            move || {
                mark_read(target, "x");
                mark_read(target, "y");
            },
            MonitorOptions::default(),
        );

        m.exec();
        assert!(log.lock().is_empty());

        mark_change(target, "x");
        mark_change(target, "y");
        assert_eq!(*log.lock(), vec![true]);
    }

    #[test]
    fn rerun_reinstalls_watches() {
        let target = TargetId::new();
        let (log, cb) = recording_changes();
        let m = monitor(
            cb,
            move || mark_read(target, "x"),
            MonitorOptions::default(),
        );

        m.exec();
        mark_change(target, "x");
        m.exec();
        mark_change(target, "x");
        assert_eq!(*log.lock(), vec![true, true]);
    }

    #[test]
    fn stop_settles_an_actively_watching_run() {
        let target = TargetId::new();
        let (log, cb) = recording_changes();
        let m = monitor(
            cb,
            move || mark_read(target, "x"),
            MonitorOptions::default(),
        );

        m.exec();
        m.stop();
        m.stop();
        assert_eq!(*log.lock(), vec![false]);

        // Watches are gone: changes no longer trigger.
        mark_change(target, "x");
        assert_eq!(*log.lock(), vec![false]);
    }

    #[test]
    fn panic_discards_the_run() {
        let target = TargetId::new();
        let (log, cb) = recording_changes();
        let count = Arc::new(AtomicI32::new(0));
        let count_clone = count.clone();
        let m = monitor(
            cb,
            move || {
                mark_read(target, "x");
                if count_clone.fetch_add(1, Ordering::SeqCst) == 0 {
                    panic!("first run fails");
                }
            },
            MonitorOptions::default(),
        );

        let result = std::panic::catch_unwind(AssertUnwindSafe(|| m.exec()));
        assert!(result.is_err());
        assert!(log.lock().is_empty());

        // The failed run installed no watches.
        mark_change(target, "x");
        assert!(log.lock().is_empty());

        // A clean rerun tracks again.
        m.exec();
        mark_change(target, "x");
        assert_eq!(*log.lock(), vec![true]);
    }

    #[test]
    fn change_during_batched_run_marks_the_run_stale() {
        let target = TargetId::new();
        let (log, cb) = recording_changes();
        let m = monitor(
            cb,
            move || {
                mark_read(target, "x");
                // The write defers, then flushes while this run's map is
                // still current, flagging the read as already notified.
                postpone(|| mark_change(target, "x"));
            },
            MonitorOptions::default(),
        );

        m.exec();
        assert_eq!(*log.lock(), vec![true]);
    }

    #[test]
    fn one_shot_exec_settles_exactly_once() {
        let (log, cb) = recording_changes();
        let result = exec(cb, || 7, MonitorOptions::default());

        assert_eq!(result.result, 7);
        assert_eq!(*log.lock(), vec![false]);

        result.stop();
        result.stop();
        assert_eq!(*log.lock(), vec![false]);
    }

    #[test]
    fn one_shot_exec_triggers_once_then_goes_inert() {
        let target = TargetId::new();
        let (log, cb) = recording_changes();
        let result = exec(
            cb,
            || {
                mark_read(target, "x");
                1
            },
            MonitorOptions::default(),
        );

        mark_change(target, "x");
        mark_change(target, "x");
        assert_eq!(*log.lock(), vec![true]);

        result.stop();
        assert_eq!(*log.lock(), vec![true]);
    }

    #[test]
    fn disdeferable_monitor_triggers_inside_a_batch() {
        let target = TargetId::new();
        let (log, cb) = recording_changes();
        let m = monitor(
            cb,
            move || mark_read(target, "x"),
            MonitorOptions {
                disdeferable: true,
                ..Default::default()
            },
        );

        m.exec();
        postpone(|| {
            mark_change(target, "x");
            assert_eq!(*log.lock(), vec![true]);
        });
        assert_eq!(*log.lock(), vec![true]);
    }
}
