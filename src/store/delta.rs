//! # Delta Journal
//!
//! Every mutation of a copy-on-write clone is recorded as a logical delta:
//! `(op, index, key bytes, value bytes or child address)`. Deltas are applied
//! to the in-memory block immediately and replayed against the committed base
//! during recovery to rebuild the final extent content.
//!
//! The journal path and the replay path share one implementation:
//! [`DeltaOp::apply`] drives the same slotted-layout mutators the tree
//! algorithms use, so a replayed block is bit-identical to the block the
//! transaction produced.
//!
//! ## Ordering
//!
//! The delta sequence on a node reflects the exact order of journal
//! emissions. The tree algorithms journal updates and removes before inserts
//! (neither can grow the node), so replay never overflows an intermediate
//! state that the original execution did not.

use crate::btree::inner::InnerViewMut;
use crate::btree::leaf::LeafViewMut;
use crate::error::Result;
use crate::store::extent::Laddr;

/// One logical mutation of a node, keyed by slot index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeltaOp {
    InnerInsert { at: u32, key: Vec<u8>, laddr: Laddr },
    InnerUpdate { at: u32, laddr: Laddr },
    InnerReplace { at: u32, key: Vec<u8>, laddr: Laddr },
    InnerRemove { at: u32 },
    LeafInsert { at: u32, key: Vec<u8>, value: Vec<u8> },
    LeafUpdate { at: u32, key: Vec<u8>, value: Vec<u8> },
    LeafRemove { at: u32 },
}

impl DeltaOp {
    /// Applies this delta to a node block.
    pub fn apply(&self, buf: &mut [u8]) -> Result<()> {
        match self {
            DeltaOp::InnerInsert { at, key, laddr } => {
                InnerViewMut::new(buf)?.insert_entry(*at as usize, key, *laddr)
            }
            DeltaOp::InnerUpdate { at, laddr } => {
                InnerViewMut::new(buf)?.update_laddr(*at as usize, *laddr)
            }
            DeltaOp::InnerReplace { at, key, laddr } => {
                InnerViewMut::new(buf)?.replace_entry(*at as usize, key, *laddr)
            }
            DeltaOp::InnerRemove { at } => InnerViewMut::new(buf)?.remove_entry(*at as usize),
            DeltaOp::LeafInsert { at, key, value } => {
                LeafViewMut::new(buf)?.insert_entry(*at as usize, key, value)
            }
            DeltaOp::LeafUpdate { at, key, value } => {
                LeafViewMut::new(buf)?.update_entry(*at as usize, key, value)
            }
            DeltaOp::LeafRemove { at } => LeafViewMut::new(buf)?.remove_entry(*at as usize),
        }
    }

    /// Replays a recorded delta sequence onto a base block.
    pub fn replay(base: &mut [u8], deltas: &[DeltaOp]) -> Result<()> {
        for op in deltas {
            op.apply(base)?;
        }
        Ok(())
    }
}
