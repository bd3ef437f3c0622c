//! Error Reporting
//!
//! Watcher callbacks run synchronously inside notification rounds, so a
//! panicking listener would otherwise abort delivery to every remaining
//! watcher. Instead, every registered callback is run through [`shield`]:
//! the panic is caught, routed to a globally settable reporting hook, and
//! the round continues.
//!
//! By default reports go to `tracing::error!`. Embedders that want to
//! collect listener failures (test harnesses, crash reporters) install a
//! hook with [`set_error_hook`].

use std::panic::{catch_unwind, AssertUnwindSafe};

use parking_lot::RwLock;

type Hook = std::sync::Arc<dyn Fn(&str) + Send + Sync>;

static HOOK: RwLock<Option<Hook>> = RwLock::new(None);

/// Install a global error-reporting hook.
///
/// The hook receives a message for every panic caught in a watcher or
/// listener callback. Replaces any previously installed hook.
pub fn set_error_hook<F>(hook: F)
where
    F: Fn(&str) + Send + Sync + 'static,
{
    *HOOK.write() = Some(std::sync::Arc::new(hook));
}

/// Remove the global error-reporting hook, restoring the default sink.
pub fn clear_error_hook() {
    *HOOK.write() = None;
}

/// Report an error message through the hook, or `tracing::error!` when no
/// hook is installed.
pub fn report_error(info: &str) {
    // Clone the hook out so it runs without the registry lock held; a hook
    // may itself install or clear hooks.
    let hook = HOOK.read().clone();
    match hook {
        Some(hook) => hook(info),
        None => tracing::error!(target: "tracery", "{info}"),
    }
}

/// Run a listener callback, reporting a panic instead of propagating it.
///
/// Notification rounds call every callback through this, so one bad watcher
/// cannot break delivery to the others.
pub(crate) fn shield(f: impl FnOnce()) {
    if let Err(payload) = catch_unwind(AssertUnwindSafe(f)) {
        report_error(&payload_message(payload.as_ref()));
    }
}

fn payload_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        format!("listener panicked: {msg}")
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        format!("listener panicked: {msg}")
    } else {
        "listener panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI32, Ordering};
    use std::sync::{Arc, Mutex};

    #[test]
    fn shield_swallows_panics() {
        let ran = Arc::new(AtomicI32::new(0));
        let ran_clone = ran.clone();

        shield(|| panic!("boom"));
        shield(move || {
            ran_clone.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn hook_receives_panic_message() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();

        set_error_hook(move |info| {
            seen_clone.lock().unwrap().push(info.to_string());
        });

        shield(|| panic!("specific failure"));
        clear_error_hook();

        let seen = seen.lock().unwrap();
        assert!(seen.iter().any(|m| m.contains("specific failure")));
    }
}
