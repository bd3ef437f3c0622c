//! Transparent Object Observation
//!
//! Rust has no ambient property interception, so observed object graphs are
//! declared through an explicit dynamic model instead: [`Obj`] holds the
//! data, [`encase`] produces a tracked view of it, and every read or write
//! through the view routes through the mark primitives. [`recover`] returns
//! the plain handle behind a view, and [`equal`] compares values as if no
//! view existed.
//!
//! The core tracking engine is independent of this module; any type that
//! owns a [`TargetId`](crate::TargetId) and calls
//! [`mark_read`](crate::mark_read)/[`mark_change`](crate::mark_change) in
//! its accessors participates in exactly the same way.

mod dynamic;
mod obj;

pub use dynamic::Dynamic;
pub use obj::{encase, encase_dyn, equal, recover, recover_dyn, Nest, Obj};
