//! Dependency Tracking Engine
//!
//! This module implements the read/write marking kernel everything else is
//! built on:
//!
//! - [`mark_read`] / [`mark_change`], the low-level tracking primitives,
//! - [`ReadMap`] and [`observe`], per-execution read recording,
//! - [`watch_prop`], the `(target, key)` subscription registry,
//! - [`postpone`], deferred and coalesced change notification.
//!
//! # Data Flow
//!
//! A caller runs a function under [`observe`]; reads inside it hit
//! [`mark_read`] and accumulate in the [`ReadMap`]. The caller then turns
//! the recorded pairs into live [`watch_prop`] registrations. A later
//! [`mark_change`], issued by a cell's setter or a tracked object's write
//! path, fires those watchers, either inline or coalesced through an open
//! [`postpone`] scope.
//!
//! # Reentrancy
//!
//! The recording slot and the batch slot are per-thread and save/restore
//! around each scope, so scopes of either kind nest freely, and every
//! notification round iterates a snapshot so watchers may re-enter the
//! engine.

mod batch;
mod mark;
mod record;
mod registry;

pub use batch::{postpone, postpone_priority, postpone_with, BatchMode};
pub use mark::{mark_change, mark_read};
pub use record::{is_recording, observe, observe_with, ObserveOptions, ReadMap};
pub use registry::{watch_prop, CancelWatch};
