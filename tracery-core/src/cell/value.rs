//! Value Cells
//!
//! A [`Value`] is a shared-handle reactive cell. Reading it marks the
//! cell's own `"value"` key read, so any tracked execution that touches the
//! cell picks it up as a dependency; writing it marks the key changed,
//! firing whatever is watching.
//!
//! One type covers both backings: a plain mutable cell
//! ([`value`](crate::cell::value)) and a lazily derived cell
//! ([`computed`](crate::cell::computed)); consumers see the same interface
//! either way.
//!
//! # Lifecycle
//!
//! A cell is live until [`Value::stop`] is called. Stopping is terminal and
//! idempotent: watchers receive one final notification with `stopped =
//! true`, every registration is torn down, and later `watch` calls return
//! a no-op canceller. Dropping the last handle tears registrations down
//! silently, without the terminal notification.

use std::fmt;
use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::error::{Error, Result};
use crate::key::{Key, TargetId};
use crate::monitor::Monitored;
use crate::report;
use crate::track::{mark_change, mark_read, watch_prop, CancelWatch};

pub(super) type SetterFn<T> = Box<dyn Fn(T) + Send + Sync>;
type WatchCb<T> = Arc<dyn Fn(&Value<T>, bool) + Send + Sync>;

/// A reactive value cell.
///
/// Cloning produces another handle to the same cell. The type parameter
/// needs `PartialEq` so writes that do not actually change the value can be
/// short-circuited without notifying anyone.
///
/// # Example
///
/// ```rust,ignore
/// let count = value(0);
/// let double = computed({
///     let count = count.clone();
///     move || count.get() * 2
/// });
///
/// let _watch = double.watch(|cell, _stopped| {
///     println!("double is now {}", cell.get());
/// });
///
/// count.set(5); // prints: double is now 10
/// ```
pub struct Value<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    inner: Arc<Inner<T>>,
}

pub(super) struct Inner<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    /// Identity under which the cell's `"value"` key is tracked.
    id: TargetId,

    backing: Backing<T>,

    /// Active watch registrations. `None` once the terminal notification
    /// has been delivered.
    watchers: Mutex<Option<Vec<Arc<WatchNode<T>>>>>,

    stopped: AtomicBool,
}

pub(super) enum Backing<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    Plain { source: RwLock<T> },
    Computed(ComputedBacking<T>),
}

pub(super) struct ComputedBacking<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    /// Last successfully derived value.
    pub(super) cache: RwLock<Option<T>>,

    /// True while the cache reflects the current dependency state.
    pub(super) valid: AtomicBool,

    /// The getter wrapped as an auto-tracking executable.
    pub(super) executable: Monitored<T>,

    pub(super) setter: Option<SetterFn<T>>,
}

impl<T> ComputedBacking<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    /// Re-derive: run the getter through the executable and cache the
    /// result. The cache is only marked valid by a successful completion;
    /// a panicking getter leaves the cell eligible for re-attempt (unless
    /// it is already stopped) and the panic propagates to whoever forced
    /// the evaluation.
    pub(super) fn run(&self, stopped: &AtomicBool) -> T {
        self.valid.store(true, Ordering::SeqCst);
        match catch_unwind(AssertUnwindSafe(|| self.executable.exec())) {
            Ok(next) => {
                *self.cache.write() = Some(next.clone());
                next
            }
            Err(payload) => {
                if !stopped.load(Ordering::SeqCst) {
                    self.valid.store(false, Ordering::SeqCst);
                }
                resume_unwind(payload)
            }
        }
    }
}

struct WatchNode<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    cancelled: AtomicBool,
    registration: CancelWatch,
    cb: WatchCb<T>,
}

impl<T> Inner<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    pub(super) fn new(id: TargetId, backing: Backing<T>) -> Self {
        Self {
            id,
            backing,
            watchers: Mutex::new(Some(Vec::new())),
            stopped: AtomicBool::new(false),
        }
    }

    pub(super) fn target_id(&self) -> TargetId {
        self.id
    }

    pub(super) fn backing(&self) -> &Backing<T> {
        &self.backing
    }

    fn current(&self) -> T {
        match &self.backing {
            Backing::Plain { source } => source.read().clone(),
            Backing::Computed(computed) => {
                if computed.valid.load(Ordering::SeqCst) || self.stopped.load(Ordering::SeqCst) {
                    computed
                        .cache
                        .read()
                        .clone()
                        .expect("computed cell read before any successful evaluation")
                } else {
                    computed.run(&self.stopped)
                }
            }
        }
    }

    /// Watcher-set change hook, invoked on every add and remove.
    ///
    /// For a computed backing this performs first-watch activation: an
    /// unevaluated cell with at least one watcher evaluates now, so its
    /// dependency watches exist and upstream writes can reach the new
    /// subscriber.
    fn watchers_changed(&self) {
        if let Backing::Computed(computed) = &self.backing {
            if self.stopped.load(Ordering::SeqCst) || computed.valid.load(Ordering::SeqCst) {
                return;
            }
            let watched = self
                .watchers
                .lock()
                .as_ref()
                .is_some_and(|list| !list.is_empty());
            if watched {
                let _ = computed.run(&self.stopped);
            }
        }
    }
}

impl<T> Drop for Inner<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn drop(&mut self) {
        // Registry entries hold weak references back to this cell; remove
        // them so the registry does not accumulate slots that can never
        // fire again.
        if let Some(list) = self.watchers.get_mut().take() {
            for node in &list {
                node.registration.cancel();
            }
        }
    }
}

impl<T> Value<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    pub(super) fn from_inner(inner: Arc<Inner<T>>) -> Self {
        Self { inner }
    }

    /// The identity under which this cell is tracked. Collaborators can use
    /// it with [`watch_prop`] directly.
    pub fn id(&self) -> TargetId {
        self.inner.id
    }

    /// Read the current value.
    ///
    /// Marks the cell read in the active recording context. A computed cell
    /// returns its cache when still valid (or once stopped) and re-runs its
    /// getter otherwise.
    pub fn get(&self) -> T {
        mark_read(self.inner.id, Key::value());
        self.inner.current()
    }

    /// Read the current value without establishing a dependency.
    pub fn get_untracked(&self) -> T {
        self.inner.current()
    }

    /// Write a new value.
    ///
    /// For a plain cell, an unchanged value (by `PartialEq`) is not stored
    /// and notifies no one; a changed value is stored and the cell's
    /// watchers fire. For a computed cell the supplied setter runs instead;
    /// it is expected to mutate upstream state, which re-fires dependencies
    /// on its own; the cell does not re-derive synchronously.
    pub fn try_set(&self, next: T) -> Result<()> {
        match &self.inner.backing {
            Backing::Plain { source } => {
                {
                    let mut source = source.write();
                    if *source == next {
                        return Ok(());
                    }
                    *source = next;
                    // Write lock released before notifying, so watchers may
                    // read the cell.
                }
                mark_change(self.inner.id, Key::value());
                Ok(())
            }
            Backing::Computed(computed) => match &computed.setter {
                Some(setter) => {
                    report::shield(|| setter(next));
                    Ok(())
                }
                None => Err(Error::ReadOnly),
            },
        }
    }

    /// [`try_set`](Self::try_set), routing a read-only misuse to the error
    /// hook instead of the caller.
    pub fn set(&self, next: T) {
        if let Err(err) = self.try_set(next) {
            report::report_error(&err.to_string());
        }
    }

    /// Read-modify-write convenience.
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&T) -> T,
    {
        let next = f(&self.get_untracked());
        self.set(next);
    }

    /// Subscribe to changes of this cell.
    ///
    /// The callback receives the cell and a `stopped` flag; `stopped` is
    /// true only for the terminal notification delivered by
    /// [`stop`](Self::stop). Returns an idempotent canceller. Watching an
    /// already stopped cell returns a no-op canceller.
    pub fn watch<F>(&self, cb: F) -> CancelWatch
    where
        F: Fn(&Value<T>, bool) + Send + Sync + 'static,
    {
        self.watch_with(cb, false)
    }

    /// [`watch`](Self::watch) with an explicit disdeferable flag: a
    /// disdeferable watcher fires immediately even inside a batching scope.
    pub fn watch_with<F>(&self, cb: F, disdeferable: bool) -> CancelWatch
    where
        F: Fn(&Value<T>, bool) + Send + Sync + 'static,
    {
        let node = {
            let mut guard = self.inner.watchers.lock();
            let Some(list) = guard.as_mut() else {
                return CancelWatch::noop();
            };

            let cb: WatchCb<T> = Arc::new(cb);
            let relay = cb.clone();
            let weak = Arc::downgrade(&self.inner);
            let registration = watch_prop(
                self.inner.id,
                Key::value(),
                move || {
                    if let Some(inner) = weak.upgrade() {
                        let cell = Value { inner };
                        relay(&cell, false);
                    }
                },
                disdeferable,
            );

            let node = Arc::new(WatchNode {
                cancelled: AtomicBool::new(false),
                registration,
                cb,
            });
            list.push(node.clone());
            node
        };
        self.inner.watchers_changed();

        let weak = Arc::downgrade(&self.inner);
        CancelWatch::new(move || {
            if node.cancelled.swap(true, Ordering::SeqCst) {
                return;
            }
            node.registration.cancel();
            if let Some(inner) = weak.upgrade() {
                if let Some(list) = inner.watchers.lock().as_mut() {
                    list.retain(|other| !Arc::ptr_eq(other, &node));
                }
                inner.watchers_changed();
            }
        })
    }

    /// True while at least one watcher is subscribed.
    pub fn has_watchers(&self) -> bool {
        self.inner
            .watchers
            .lock()
            .as_ref()
            .is_some_and(|list| !list.is_empty())
    }

    /// True once [`stop`](Self::stop) has run.
    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    /// Terminate the cell.
    ///
    /// Idempotent. A computed cell that never evaluated successfully is
    /// evaluated one final time (best effort: a panicking getter is
    /// reported through the error hook so the stop always completes), and
    /// its executable is stopped. Every watcher is then notified once with
    /// `stopped = true` and unregistered.
    pub fn stop(&self) {
        if self.inner.stopped.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Backing::Computed(computed) = &self.inner.backing {
            if !computed.valid.load(Ordering::SeqCst) {
                report::shield(|| {
                    let _ = computed.run(&self.inner.stopped);
                });
            }
            computed.executable.stop();
        }

        let list = self.inner.watchers.lock().take();
        if let Some(list) = list {
            for node in list {
                if node.cancelled.swap(true, Ordering::SeqCst) {
                    continue;
                }
                node.registration.cancel();
                let cell = self.clone();
                let cb = node.cb.clone();
                report::shield(move || cb(&cell, true));
            }
        }
    }
}

impl<T> Clone for Value<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for Value<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Value")
            .field("id", &self.inner.id.raw())
            .field("stopped", &self.is_stopped())
            .field("watchers", &self.has_watchers())
            .finish()
    }
}

/// Tracked display: delegates to the current value, so formatting a cell
/// inside a tracked execution records the read.
impl<T> fmt::Display for Value<T>
where
    T: Clone + PartialEq + Send + Sync + fmt::Display + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.get())
    }
}

/// Create a plain mutable cell holding `initial`.
pub fn value<T>(initial: T) -> Value<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    Value {
        inner: Arc::new(Inner::new(
            TargetId::new(),
            Backing::Plain {
                source: RwLock::new(initial),
            },
        )),
    }
}
