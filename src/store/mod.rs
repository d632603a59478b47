//! # Store Module
//!
//! The extent layer under the tree: block-sized extents with node headers,
//! the logical delta journal, the transaction/extent-manager contract, and
//! the in-memory reference store.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │        B+tree core (crate::btree)            │
//! └──────────────┬───────────────────────────────┘
//!                │ OmapContext (txn + manager + config)
//! ┌──────────────▼───────────────────────────────┐
//! │  ExtentManager trait                         │
//! │    read / alloc / CoW clone / dec_ref /      │
//! │    commit — the suspension points            │
//! ├──────────────────────────────────────────────┤
//! │  Extent        one node per block,           │
//! │                Clean | Fresh | Pending       │
//! │  DeltaOp       logical journal + replay      │
//! ├──────────────────────────────────────────────┤
//! │  MemStore      versioned extent table,       │
//! │                optimistic commit             │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! Copy-on-write discipline: an extent loaded from the store is `Clean` and
//! read-only. The first mutation within a transaction clones it into the
//! pending set (same laddr, same content, writable); every further read of
//! that laddr inside the transaction resolves to the clone. Structural
//! rewrites (split, merge, balance) allocate `Fresh` extents instead and
//! retire the superseded ones.

mod delta;
mod extent;
mod memory;
mod txn;

pub use delta::DeltaOp;
pub use extent::{Extent, ExtentRef, ExtentState, Laddr, NodeHeader, NodeKind, NodeMeta};
pub use memory::MemStore;
pub use txn::{ExtentManager, OmapContext, Transaction};
