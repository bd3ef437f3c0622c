//! Error Types
//!
//! The tracking hot path never fails: malformed registrations and writes to
//! torn-down state are policy no-ops, and listener panics are routed to the
//! reporting hook. What remains is direct API misuse, surfaced through
//! [`Error`].

use thiserror::Error;

/// Errors surfaced by the fallible parts of the public API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Error {
    /// Attempted to write a computed cell that was built without a setter.
    #[error("cell is read-only: computed without a setter")]
    ReadOnly,
}

/// Result alias for fallible cell operations.
pub type Result<T> = std::result::Result<T, Error>;
