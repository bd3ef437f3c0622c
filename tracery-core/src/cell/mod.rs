//! Reactive Value Cells
//!
//! The consumer-facing layer of the engine: [`Value`] cells hold state,
//! [`computed`] cells derive state, and both expose the same read / write /
//! watch / stop contract. Everything here is a thin shape over the tracking
//! kernel: reads go through `mark_read`, writes through `mark_change`, and
//! subscriptions through the watch registry, so cells compose freely with
//! any other collaborator built on the same primitives.

mod computed;
mod value;

pub use computed::{
    computed, computed_with, computed_writable, computed_writable_with, ComputedOptions,
};
pub use value::{value, Value};

use parking_lot::Mutex;

/// Wrap a watch callback so it only forwards when the observed value
/// actually differs from the previously forwarded one.
///
/// Useful when a cell is notified through several paths in one burst (for
/// example a dependency that is both directly and transitively watched) and
/// the subscriber only cares about distinct values. Terminal `stopped`
/// notifications always forward.
pub fn merge<T, F>(cb: F) -> impl Fn(&Value<T>, bool) + Send + Sync
where
    T: Clone + PartialEq + Send + Sync + 'static,
    F: Fn(&Value<T>, bool) + Send + Sync + 'static,
{
    let seen: Mutex<Option<T>> = Mutex::new(None);
    move |cell, stopped| {
        if stopped {
            cb(cell, true);
            return;
        }
        let next = cell.get();
        {
            let mut seen = seen.lock();
            if seen.as_ref() == Some(&next) {
                return;
            }
            *seen = Some(next);
        }
        cb(cell, false);
    }
}
