//! # omapdb - Transactional Copy-on-Write Ordered Map
//!
//! omapdb is an on-disk ordered key→value map (OMAP) implemented as a
//! transactional B+tree over variable-length byte-string keys and values.
//! The tree lives inside a copy-on-write extent store: every mutation
//! allocates new extents, retires the superseded ones, and records a
//! logical delta stream for crash recovery. Ordering is lexicographic on
//! raw bytes.
//!
//! ## Quick Start
//!
//! ```ignore
//! use omapdb::{MemStore, OmapConfig, OmapContext, OmapTree, ExtentManager};
//!
//! let store = MemStore::new();
//! let config = OmapConfig::default();
//!
//! let mut t = store.begin();
//! let mut oc = OmapContext::new(&mut t, &store, config);
//! let mut tree = OmapTree::create(&mut oc)?;
//! tree.insert(&mut oc, b"a", b"1")?;
//! assert_eq!(tree.get(&mut oc, b"a")?, Some(b"1".to_vec()));
//! let root = tree.root();
//! drop(oc);
//! store.commit(t)?;
//!
//! // later, on a fresh transaction
//! let mut t = store.begin();
//! let mut oc = OmapContext::new(&mut t, &store, config);
//! let tree = OmapTree::open(root);
//! let page = tree.list_keys(&mut oc, None, 100)?;
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │     Root handle (OmapTree)          │  public surface, root
//! │                                     │  split/collapse
//! ├─────────────────────────────────────┤
//! │  Inner algorithms │ Leaf algorithms │  descent, cascades, point
//! │  (btree::inner)   │ (btree::leaf)   │  ops, split/merge/balance
//! ├─────────────────────────────────────┤
//! │   Node layout (slotted views)       │  zerocopy headers + slots
//! ├─────────────────────────────────────┤
//! │   Transaction glue (store)          │  CoW clones, delta journal,
//! │                                     │  retirement batching
//! ├─────────────────────────────────────┤
//! │   ExtentManager (MemStore, ...)     │  allocation, loads, commit,
//! │                                     │  optimistic conflicts
//! └─────────────────────────────────────┘
//! ```
//!
//! ## Transactional Model
//!
//! All operations run inside a transaction owned by an extent manager.
//! The first mutation of any extent clones it into the transaction
//! (copy-on-write); structural rewrites allocate fresh extents and retire
//! the ones they replace. Commits validate optimistically: a transaction
//! that raced a conflicting commit fails with `Conflict` and is retried
//! wholesale. A lookup miss is `None` and a removal miss is `false` —
//! absences are never errors.
//!
//! ## Module Overview
//!
//! - [`btree`]: node layout, leaf/inner algorithms, root handle
//! - [`store`]: extents, delta journal, transactions, in-memory store
//! - [`config`]: block geometry (runtime-tunable for tests)
//! - [`error`]: the `Io` / `CorruptTree` / `Conflict` taxonomy

#[macro_use]
mod macros;

pub mod btree;
pub mod config;
pub mod error;
pub mod store;

pub use btree::{ListResult, MutationResult, OmapNode, OmapRoot, OmapTree, SearchResult};
pub use config::OmapConfig;
pub use error::{OmapError, Result};
pub use store::{
    DeltaOp, Extent, ExtentManager, ExtentRef, ExtentState, Laddr, MemStore, NodeKind, NodeMeta,
    OmapContext, Transaction,
};
