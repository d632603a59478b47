//! # Error Types
//!
//! This module defines the error taxonomy for omapdb. The crate distinguishes
//! three failure classes:
//!
//! - **I/O failures** ([`OmapError::Io`], [`OmapError::ExtentNotFound`]):
//!   raised by the extent manager and propagated verbatim through every load,
//!   alloc, and copy-on-write path.
//! - **Structural corruption** ([`OmapError::CorruptTree`]): a tree invariant
//!   the algorithms rely on is broken (a routing gap, a kind/depth mismatch, a
//!   malformed slot). Fatal for the transaction; the caller is expected to
//!   trigger repair.
//! - **Transaction conflicts** ([`OmapError::Conflict`]): optimistic
//!   validation failed at commit. The whole operation must be retried on a
//!   fresh transaction; no partial effects are observable.
//!
//! Logical absences are *not* errors: a missing key reads as `None` and a
//! missing key on removal reports `false` at the tree surface.

use thiserror::Error;

use crate::store::Laddr;

/// Result type alias using OmapError.
pub type Result<T> = std::result::Result<T, OmapError>;

/// Errors that can occur in omapdb operations.
#[derive(Debug, Error)]
pub enum OmapError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("extent {laddr:#x} not found")]
    ExtentNotFound { laddr: Laddr },

    #[error("corrupt tree: {reason}")]
    CorruptTree { reason: String },

    #[error("transaction conflict on extent {laddr:#x}")]
    Conflict { laddr: Laddr },

    #[error("entry too large: {size} bytes (max {max})")]
    EntryTooLarge { size: usize, max: usize },

    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },
}
