//! # B+tree Core
//!
//! A transactional copy-on-write B+tree over variable-length byte-string
//! keys and values, stored one node per extent.
//!
//! ## Architecture Overview
//!
//! ```text
//!                OmapTree (root handle)
//!                 │  installs new roots after splits,
//!                 │  collapses 1-entry roots after removes
//!                 ▼
//!            ┌─ OmapNode ─┐          load_extent(laddr, depth)
//!            │  dispatch   │          depth 1 -> leaf, else inner
//!            ▼             ▼
//!        InnerNode      LeafNode
//!        routing,       point ops,
//!        cascades       split/merge/balance
//! ```
//!
//! Control flow: an operation descends from the root through inner nodes to
//! a leaf; the leaf produces a [`MutationResult`] that bubbles back up. Each
//! inner node reacts by patching its routing entries, or by splitting or
//! merging itself, possibly propagating further. Whatever reaches the root
//! handle either completes, installs a taller root, or collapses a level.
//!
//! Every node access goes through the transaction context: loads resolve to
//! the transaction's pending clones first, mutations journal logical deltas,
//! and superseded extents are retired for reference-count release at commit.

pub mod inner;
pub mod leaf;
pub mod tree;

pub use inner::InnerNode;
pub use leaf::LeafNode;
pub use tree::{OmapRoot, OmapTree};

use crate::error::Result;
use crate::store::{ExtentRef, Laddr, NodeKind, OmapContext};

/// Outcome of a key search within one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchResult {
    Found(usize),
    NotFound(usize),
}

/// Outcome of a mutation, bubbled from child to parent.
#[derive(Debug, Clone)]
pub enum MutationResult {
    /// Operation complete.
    Success,
    /// No such key on removal. Lookup misses are not failures.
    Fail,
    /// The node split; the caller installs `right` next to `left` under the
    /// routing key `pivot` (the first key of `right`).
    WasSplit {
        left: ExtentRef,
        right: ExtentRef,
        pivot: Vec<u8>,
    },
    /// The node fell below minimum fill; the caller merges or rebalances it
    /// with a sibling.
    NeedMerge { node: ExtentRef },
}

/// One page of a range listing plus the cursor to resume from. `next` is
/// `None` when the range was exhausted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListResult<T> {
    pub items: Vec<T>,
    pub next: Option<Vec<u8>>,
}

/// A tree node of either kind, dispatching to the leaf or inner
/// implementation.
#[derive(Debug, Clone)]
pub enum OmapNode {
    Inner(InnerNode),
    Leaf(LeafNode),
}

impl OmapNode {
    pub fn from_extent(ext: ExtentRef) -> Result<Self> {
        let kind = ext.borrow().meta()?.kind;
        Ok(match kind {
            NodeKind::Inner => OmapNode::Inner(InnerNode::new(ext)),
            NodeKind::Leaf => OmapNode::Leaf(LeafNode::new(ext)),
            NodeKind::Unknown => unreachable!("meta() rejects unknown node kinds"),
        })
    }

    pub fn laddr(&self) -> Laddr {
        match self {
            OmapNode::Inner(node) => node.laddr(),
            OmapNode::Leaf(node) => node.laddr(),
        }
    }

    pub fn extent(&self) -> &ExtentRef {
        match self {
            OmapNode::Inner(node) => node.extent(),
            OmapNode::Leaf(node) => node.extent(),
        }
    }

    pub fn get_value(&self, oc: &mut OmapContext<'_>, key: &[u8]) -> Result<Option<Vec<u8>>> {
        match self {
            OmapNode::Inner(node) => node.get_value(oc, key),
            OmapNode::Leaf(node) => node.get_value(key),
        }
    }

    pub fn insert(
        &self,
        oc: &mut OmapContext<'_>,
        key: &[u8],
        value: &[u8],
    ) -> Result<MutationResult> {
        match self {
            OmapNode::Inner(node) => node.insert(oc, key, value),
            OmapNode::Leaf(node) => node.insert(oc, key, value),
        }
    }

    pub fn rm_key(&self, oc: &mut OmapContext<'_>, key: &[u8]) -> Result<MutationResult> {
        match self {
            OmapNode::Inner(node) => node.rm_key(oc, key),
            OmapNode::Leaf(node) => node.rm_key(oc, key),
        }
    }

    pub fn list_keys(
        &self,
        oc: &mut OmapContext<'_>,
        start: Option<&[u8]>,
        max: usize,
    ) -> Result<ListResult<Vec<u8>>> {
        match self {
            OmapNode::Inner(node) => node.list_keys(oc, start, max),
            OmapNode::Leaf(node) => node.list_keys(start, max),
        }
    }

    pub fn list(
        &self,
        oc: &mut OmapContext<'_>,
        start: Option<&[u8]>,
        max: usize,
    ) -> Result<ListResult<(Vec<u8>, Vec<u8>)>> {
        match self {
            OmapNode::Inner(node) => node.list(oc, start, max),
            OmapNode::Leaf(node) => node.list(start, max),
        }
    }

    pub fn clear(&self, oc: &mut OmapContext<'_>) -> Result<()> {
        match self {
            OmapNode::Inner(node) => node.clear(oc),
            OmapNode::Leaf(_) => Ok(()),
        }
    }

    pub fn is_below_min(&self, min_fill: u32) -> Result<bool> {
        let ext = self.extent().borrow();
        Ok(match self {
            OmapNode::Inner(_) => inner::InnerView::new(ext.buf())?.is_below_min(min_fill),
            OmapNode::Leaf(_) => leaf::LeafView::new(ext.buf())?.is_below_min(min_fill),
        })
    }

    /// Merges self and `right` (same kind, key-adjacent) into one fresh
    /// node. The caller retires both sources.
    pub(crate) fn make_full_merge(
        &self,
        oc: &mut OmapContext<'_>,
        right: &OmapNode,
    ) -> Result<ExtentRef> {
        match (self, right) {
            (OmapNode::Leaf(l), OmapNode::Leaf(r)) => l.make_full_merge(oc, r),
            (OmapNode::Inner(l), OmapNode::Inner(r)) => l.make_full_merge(oc, r),
            _ => Err(corrupt!("full merge of mismatched node kinds")),
        }
    }

    /// Redistributes self and `right` (same kind, key-adjacent) into two
    /// fresh nodes. The caller retires both sources.
    pub(crate) fn make_balanced(
        &self,
        oc: &mut OmapContext<'_>,
        right: &OmapNode,
    ) -> Result<(ExtentRef, ExtentRef, Vec<u8>)> {
        match (self, right) {
            (OmapNode::Leaf(l), OmapNode::Leaf(r)) => l.make_balanced(oc, r),
            (OmapNode::Inner(l), OmapNode::Inner(r)) => l.make_balanced(oc, r),
            _ => Err(corrupt!("balance of mismatched node kinds")),
        }
    }
}

/// Loads the node at `laddr`, expected at `depth` within the current
/// descent: depth 1 is a leaf, anything deeper an inner node. A header that
/// disagrees with the descent is structural corruption.
pub fn load_extent(oc: &mut OmapContext<'_>, laddr: Laddr, depth: u32) -> Result<OmapNode> {
    assert!(depth > 0, "tree descent below depth 1");
    let ext = oc.read_extent(laddr)?;
    let meta = ext.borrow().meta()?;
    if meta.depth != depth {
        return Err(corrupt!(
            "extent {:#x} has depth {}, descent expected {}",
            laddr,
            meta.depth,
            depth
        ));
    }
    let expected = if depth == 1 {
        NodeKind::Leaf
    } else {
        NodeKind::Inner
    };
    if meta.kind != expected {
        return Err(corrupt!(
            "extent {:#x} has kind {:?}, descent expected {:?}",
            laddr,
            meta.kind,
            expected
        ));
    }
    OmapNode::from_extent(ext)
}
