//! Tracery Core
//!
//! This crate provides the dependency-tracking and notification kernel for
//! the Tracery fine-grained reactive state engine. It implements:
//!
//! - Read/write marking primitives and per-execution read recording
//! - The `(target, key)` watch registry with deferred, coalesced
//!   notification
//! - Auto-re-run executables that translate recorded reads into live
//!   subscriptions
//! - Derived value cells (`value` / `computed`)
//! - Tracked dynamic object graphs (`encase` / `recover`)
//!
//! Only the dependents of an actually-changed property are notified; there
//! is no tree-wide re-render and no scheduler; everything runs
//! synchronously on the caller's stack, with reentrant nesting of recording
//! and batching scopes.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `track`: the marking kernel: recording maps, the watch registry, and
//!   batched notification
//! - `monitor`: auto-tracking executables built on `track`
//! - `cell`: reactive value cells built on `monitor`
//! - `encase`: the tracked dynamic object model
//! - `report`: the global error hook shielding notification rounds
//!
//! # Example
//!
//! ```rust,ignore
//! use tracery_core::{computed, value};
//!
//! let count = value(1);
//! let doubled = computed({
//!     let count = count.clone();
//!     move || count.get() * 2
//! });
//!
//! let _watch = doubled.watch(|cell, _stopped| {
//!     println!("doubled: {}", cell.get());
//! });
//!
//! count.set(5);
//! // Watcher runs, prints: doubled: 10
//! ```

pub mod cell;
pub mod encase;
pub mod error;
pub mod monitor;
pub mod report;
pub mod track;

mod key;

pub use cell::{
    computed, computed_with, computed_writable, computed_writable_with, merge, value,
    ComputedOptions, Value,
};
pub use encase::{encase, encase_dyn, equal, recover, recover_dyn, Dynamic, Nest, Obj};
pub use error::{Error, Result};
pub use key::{Key, Symbol, TargetId};
pub use monitor::{exec, monitor, monitor_params, ExecResult, MonitorOptions, Monitored};
pub use report::{clear_error_hook, report_error, set_error_hook};
pub use track::{
    is_recording, mark_change, mark_read, observe, observe_with, postpone, postpone_priority,
    postpone_with, watch_prop, BatchMode, CancelWatch, ObserveOptions, ReadMap,
};
