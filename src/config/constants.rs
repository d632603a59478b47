//! # Layout Constants
//!
//! This module centralizes the on-extent layout constants. Constants that
//! depend on each other are co-located and tied together with compile-time
//! assertions so the zerocopy struct definitions and the space accounting can
//! never drift apart.
//!
//! ## Dependency Graph
//!
//! ```text
//! OMAP_BLOCK_SIZE (4096 bytes, default; runtime-tunable via OmapConfig)
//!       │
//!       ├─> NODE_HEADER_SIZE (16 bytes, fixed)
//!       │     Must equal size_of::<NodeHeader>()
//!       │
//!       ├─> LEAF_SLOT_SIZE (16 bytes, fixed)
//!       │     Must equal size_of::<LeafSlot>()
//!       │
//!       ├─> INNER_SLOT_SIZE (16 bytes, fixed)
//!       │     Must equal size_of::<InnerSlot>()
//!       │
//!       └─> MIN_BLOCK_SIZE (derived)
//!             A block must hold the header plus a handful of slots, or
//!             split/merge cannot produce two viable halves.
//! ```
//!
//! The default minimum fill is half the block; it lives on
//! [`OmapConfig`](super::OmapConfig) because tests tune it together with the
//! block size.

/// Default size of each extent block in bytes (4KB).
/// This is the fundamental allocation unit of the tree.
pub const OMAP_BLOCK_SIZE: usize = 4096;

/// Size of the node header at the start of every extent.
pub const NODE_HEADER_SIZE: usize = 16;

/// Size of one leaf slot: `(key_off, key_len, val_off, val_len)`.
pub const LEAF_SLOT_SIZE: usize = 16;

/// Size of one inner (routing) slot: `(key_off, key_len, laddr)`.
pub const INNER_SLOT_SIZE: usize = 16;

/// Smallest block size a tree can operate on. Blocks below this cannot hold
/// enough entries for the split and balance policies to terminate.
pub const MIN_BLOCK_SIZE: usize = NODE_HEADER_SIZE + 8 * LEAF_SLOT_SIZE;

const _: () = assert!(
    NODE_HEADER_SIZE == std::mem::size_of::<crate::store::NodeHeader>(),
    "NODE_HEADER_SIZE must match the NodeHeader struct"
);

const _: () = assert!(
    LEAF_SLOT_SIZE == std::mem::size_of::<crate::btree::leaf::LeafSlot>(),
    "LEAF_SLOT_SIZE must match the LeafSlot struct"
);

const _: () = assert!(
    INNER_SLOT_SIZE == std::mem::size_of::<crate::btree::inner::InnerSlot>(),
    "INNER_SLOT_SIZE must match the InnerSlot struct"
);

const _: () = assert!(
    MIN_BLOCK_SIZE <= OMAP_BLOCK_SIZE,
    "default block size must be usable"
);
