//! Computed Cells
//!
//! A computed cell derives its value from a getter. The getter runs through
//! an auto-tracking executable, so every cell (or tracked object property)
//! it reads becomes a live dependency. The derived value is cached; a
//! dependency change merely invalidates the cache and re-notifies the
//! cell's own watchers; the getter does not run again until someone reads
//! the cell.
//!
//! Chaining falls out of this: a computed reading another computed watches
//! the upstream cell's `"value"` key like any other dependency, and
//! upstream invalidation propagates one hop per cell.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use super::value::{Backing, ComputedBacking, Inner, SetterFn, Value};
use crate::key::{Key, TargetId};
use crate::monitor::{monitor, MonitorOptions};
use crate::track::{mark_change, BatchMode};

/// Options for [`computed_with`] and [`computed_writable_with`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ComputedOptions {
    /// Run the getter inside a batching scope.
    pub postpone: Option<BatchMode>,
    /// Allow this cell's dependency watches to be deferred by a batching
    /// scope. By default they are disdeferable, so a computed cell
    /// invalidates immediately even mid-batch while its own watchers stay
    /// coalesced.
    pub deferable: bool,
}

/// Create a lazily derived, read-only cell.
///
/// The getter does not run until the cell is first read or watched.
pub fn computed<T, G>(getter: G) -> Value<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
    G: Fn() -> T + Send + Sync + 'static,
{
    make(getter, None, ComputedOptions::default())
}

/// [`computed`] with explicit options.
pub fn computed_with<T, G>(getter: G, options: ComputedOptions) -> Value<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
    G: Fn() -> T + Send + Sync + 'static,
{
    make(getter, None, options)
}

/// Create a derived cell that also accepts writes.
///
/// The setter receives the written value and is expected to mutate the
/// upstream state the getter derives from; the cell itself does not
/// re-derive synchronously on write.
pub fn computed_writable<T, G, S>(getter: G, setter: S) -> Value<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
    G: Fn() -> T + Send + Sync + 'static,
    S: Fn(T) + Send + Sync + 'static,
{
    make(getter, Some(Box::new(setter)), ComputedOptions::default())
}

/// [`computed_writable`] with explicit options.
pub fn computed_writable_with<T, G, S>(getter: G, setter: S, options: ComputedOptions) -> Value<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
    G: Fn() -> T + Send + Sync + 'static,
    S: Fn(T) + Send + Sync + 'static,
{
    make(getter, Some(Box::new(setter)), options)
}

fn make<T, G>(getter: G, setter: Option<SetterFn<T>>, options: ComputedOptions) -> Value<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
    G: Fn() -> T + Send + Sync + 'static,
{
    let id = TargetId::new();
    let inner = Arc::new_cyclic(|weak: &Weak<Inner<T>>| {
        let hook = weak.clone();
        let executable = monitor(
            move |changed| {
                let Some(inner) = hook.upgrade() else {
                    return;
                };
                if let Backing::Computed(computed) = inner.backing() {
                    computed.valid.store(!changed, Ordering::SeqCst);
                    if changed {
                        // Propagate outward: the cell's own watchers (and
                        // any downstream computed) see the invalidation.
                        mark_change(inner.target_id(), Key::value());
                    }
                }
            },
            getter,
            MonitorOptions {
                postpone: options.postpone,
                disdeferable: !options.deferable,
            },
        );
        Inner::new(
            id,
            Backing::Computed(ComputedBacking {
                cache: RwLock::new(None),
                valid: AtomicBool::new(false),
                executable,
                setter,
            }),
        )
    });
    Value::from_inner(inner)
}
