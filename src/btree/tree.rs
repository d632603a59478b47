//! # Root Handle
//!
//! `OmapTree` owns the root extent's address and depth and exposes the
//! public map surface: `get`, `insert`, `remove`, `list_keys`, `list`,
//! `clear`. The root descriptor is plain data — callers persist it between
//! transactions and reopen the tree from it.
//!
//! ## Root Transitions
//!
//! ```text
//! WasSplit(left, right, pivot) from the root
//!     -> allocate a fresh inner node one level up with two entries,
//!        ("" -> left) and (pivot -> right), and point the handle at it.
//!        The empty key makes the leftmost spine route every key.
//!
//! successful remove
//!     -> while the root is an inner node with exactly one entry, promote
//!        the sole child and retire the old root (the deferred collapse of
//!        the 1-entry-root contract)
//! ```
//!
//! A split can surface from *either* insert or remove: rebalancing after a
//! removal may widen a pivot past what the parent can hold, which splits
//! the parent all the way up.
//!
//! The root is exempt from the minimum-fill rule, so a bare `NeedMerge`
//! reaching the handle needs no action beyond the collapse check.

use tracing::debug;

use crate::btree::inner::InnerView;
use crate::btree::{load_extent, ListResult, MutationResult, OmapNode};
use crate::config::LEAF_SLOT_SIZE;
use crate::error::{OmapError, Result};
use crate::store::{DeltaOp, ExtentRef, Laddr, NodeKind, OmapContext};

/// Persistent root descriptor: where the tree starts and how tall it is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OmapRoot {
    pub laddr: Laddr,
    pub depth: u32,
}

/// The tree's public surface, bound to a root descriptor.
#[derive(Debug, Clone)]
pub struct OmapTree {
    root: OmapRoot,
}

impl OmapTree {
    /// Creates an empty tree: a fresh leaf root at depth 1.
    pub fn create(oc: &mut OmapContext<'_>) -> Result<Self> {
        oc.config.validate()?;
        let ext = oc.alloc_node(NodeKind::Leaf, 1)?;
        let laddr = ext.borrow().laddr();
        debug!(laddr, "created empty omap");
        Ok(Self {
            root: OmapRoot { laddr, depth: 1 },
        })
    }

    /// Reopens a tree from a persisted root descriptor.
    pub fn open(root: OmapRoot) -> Self {
        Self { root }
    }

    pub fn root(&self) -> OmapRoot {
        self.root
    }

    pub fn depth(&self) -> u32 {
        self.root.depth
    }

    fn load_root(&self, oc: &mut OmapContext<'_>) -> Result<OmapNode> {
        load_extent(oc, self.root.laddr, self.root.depth)
    }

    /// Point lookup. `None` means absent; a miss is not an error.
    pub fn get(&self, oc: &mut OmapContext<'_>, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.load_root(oc)?.get_value(oc, key)
    }

    /// Inserts or overwrites `key`.
    pub fn insert(&mut self, oc: &mut OmapContext<'_>, key: &[u8], value: &[u8]) -> Result<()> {
        let size = LEAF_SLOT_SIZE + key.len() + value.len();
        let max = oc.config.max_entry_size();
        if size > max {
            return Err(OmapError::EntryTooLarge { size, max });
        }
        debug!(key_len = key.len(), value_len = value.len(), "omap insert");
        match self.load_root(oc)?.insert(oc, key, value)? {
            MutationResult::Success => Ok(()),
            MutationResult::WasSplit { left, right, pivot } => {
                self.install_new_root(oc, left, right, pivot)
            }
            other => Err(corrupt!("unexpected mutation result from insert: {:?}", other)),
        }
    }

    /// Removes `key`, reporting whether it was present.
    pub fn remove(&mut self, oc: &mut OmapContext<'_>, key: &[u8]) -> Result<bool> {
        debug!(key_len = key.len(), "omap remove");
        match self.load_root(oc)?.rm_key(oc, key)? {
            MutationResult::Fail => Ok(false),
            MutationResult::Success | MutationResult::NeedMerge { .. } => {
                self.maybe_collapse_root(oc)?;
                Ok(true)
            }
            MutationResult::WasSplit { left, right, pivot } => {
                // a rebalance widened a pivot past the old root's capacity
                self.install_new_root(oc, left, right, pivot)?;
                Ok(true)
            }
        }
    }

    /// Lists up to `max` keys from `start` (or the beginning); the returned
    /// cursor resumes the listing exactly where it stopped.
    pub fn list_keys(
        &self,
        oc: &mut OmapContext<'_>,
        start: Option<&[u8]>,
        max: usize,
    ) -> Result<ListResult<Vec<u8>>> {
        self.load_root(oc)?.list_keys(oc, start, max)
    }

    /// Lists up to `max` key/value pairs from `start` (or the beginning).
    pub fn list(
        &self,
        oc: &mut OmapContext<'_>,
        start: Option<&[u8]>,
        max: usize,
    ) -> Result<ListResult<(Vec<u8>, Vec<u8>)>> {
        self.load_root(oc)?.list(oc, start, max)
    }

    /// Retires every node of the tree and installs a fresh empty leaf root.
    pub fn clear(&mut self, oc: &mut OmapContext<'_>) -> Result<()> {
        debug!(laddr = self.root.laddr, depth = self.root.depth, "omap clear");
        self.load_root(oc)?.clear(oc)?;
        oc.dec_ref(self.root.laddr);
        let ext = oc.alloc_node(NodeKind::Leaf, 1)?;
        self.root = OmapRoot {
            laddr: ext.borrow().laddr(),
            depth: 1,
        };
        Ok(())
    }

    fn install_new_root(
        &mut self,
        oc: &mut OmapContext<'_>,
        left: ExtentRef,
        right: ExtentRef,
        pivot: Vec<u8>,
    ) -> Result<()> {
        let new_root = oc.alloc_node(NodeKind::Inner, self.root.depth + 1)?;
        let left_laddr = left.borrow().laddr();
        let right_laddr = right.borrow().laddr();
        {
            let mut ext = new_root.borrow_mut();
            // the empty key lower-bounds everything, so the leftmost spine
            // accepts keys below any currently stored key
            ext.journal_apply(DeltaOp::InnerInsert {
                at: 0,
                key: Vec::new(),
                laddr: left_laddr,
            })?;
            ext.journal_apply(DeltaOp::InnerInsert {
                at: 1,
                key: pivot,
                laddr: right_laddr,
            })?;
        }
        self.root = OmapRoot {
            laddr: new_root.borrow().laddr(),
            depth: self.root.depth + 1,
        };
        debug!(
            laddr = self.root.laddr,
            depth = self.root.depth,
            "root split, tree grew"
        );
        Ok(())
    }

    fn maybe_collapse_root(&mut self, oc: &mut OmapContext<'_>) -> Result<()> {
        while self.root.depth > 1 {
            let sole_child = {
                let ext = oc.read_extent(self.root.laddr)?;
                let ext = ext.borrow();
                let view = InnerView::new(ext.buf())?;
                if view.entry_count() == 1 {
                    Some(view.laddr_at(0)?)
                } else {
                    None
                }
            };
            match sole_child {
                Some(child_laddr) => {
                    oc.dec_ref(self.root.laddr);
                    self.root = OmapRoot {
                        laddr: child_laddr,
                        depth: self.root.depth - 1,
                    };
                    debug!(
                        laddr = self.root.laddr,
                        depth = self.root.depth,
                        "collapsed 1-entry root"
                    );
                }
                None => break,
            }
        }
        Ok(())
    }
}
