//! # Inner Nodes
//!
//! This module implements inner (routing) nodes: the slotted layout for
//! routing entries and the recursive algorithms that drive descent, split
//! propagation, and the merge/rebalance cascade.
//!
//! ## Extent Layout
//!
//! ```text
//! +----------------------+
//! | NodeHeader (16B)     |  kind = inner, depth >= 2
//! +----------------------+
//! | Slot Array           |  InnerSlot (16B each), sorted by key
//! | [Slot 0]             |  - key_off: u32   offset of routing key bytes
//! | [Slot 1]             |  - key_len: u32
//! | ...                  |  - laddr:   u64   child extent address
//! +----------------------+
//! | Free Space           |
//! +----------------------+
//! | Routing Key Bytes    |  grows upward from the block end
//! +----------------------+
//! ```
//!
//! ## Routing Semantics
//!
//! Routing keys are **lower bounds**: entry *i* routes any key `k` with
//! `entry[i].key <= k < entry[i+1].key`, and the last entry routes
//! everything at or above its key. The leftmost entry of the leftmost inner
//! node on every level carries the empty key, installed at root split and
//! preserved by splits and merges, so every descent lands on some child.
//! A search key below the first routing key therefore means the tree is
//! corrupt.
//!
//! Split pivots fit this scheme exactly: the pivot returned with a split is
//! the first key of the right half, which *is* the right child's lower
//! bound, so the parent installs it as the new routing key unchanged.
//!
//! ## Cascades
//!
//! A child split becomes `handle_split` here: the routing entry is updated
//! to the new left child (updates never grow the node, so they are
//! journaled first), then the pivot entry for the right child is inserted —
//! or, if it does not fit, this node splits too and the result propagates
//! upward.
//!
//! A child that reports `NeedMerge` is merged or rebalanced with a donor
//! sibling by `merge_entry`. Rebalancing may itself overflow this node when
//! the new pivot is wider than the old one; that path removes the stale
//! entry and re-enters the split machinery, which is how a *remove* can
//! propagate a split toward the root.

use std::cmp::Ordering;

use smallvec::{smallvec, SmallVec};
use tracing::trace;
use zerocopy::little_endian::{U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::btree::{load_extent, ListResult, MutationResult, OmapNode, SearchResult};
use crate::config::{INNER_SLOT_SIZE, NODE_HEADER_SIZE};
use crate::error::Result;
use crate::store::{DeltaOp, ExtentRef, Laddr, NodeHeader, NodeKind, OmapContext};

#[repr(C)]
#[derive(
    Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned, PartialEq, Eq,
)]
pub struct InnerSlot {
    key_off: U32,
    key_len: U32,
    laddr: U64,
}

impl InnerSlot {
    pub fn new(key_off: u32, key_len: u32, laddr: u64) -> Self {
        Self {
            key_off: U32::new(key_off),
            key_len: U32::new(key_len),
            laddr: U64::new(laddr),
        }
    }

    zerocopy_accessors! {
        key_off: u32,
        key_len: u32,
        laddr: u64,
    }
}

fn slot_offset(index: usize) -> usize {
    NODE_HEADER_SIZE + index * INNER_SLOT_SIZE
}

/// Read-only view of an inner block.
#[derive(Debug, Clone, Copy)]
pub struct InnerView<'a> {
    data: &'a [u8],
}

impl<'a> InnerView<'a> {
    pub fn new(data: &'a [u8]) -> Result<Self> {
        let header = NodeHeader::from_bytes(data)?;
        if header.kind() != NodeKind::Inner {
            return Err(corrupt!("expected inner node, got {:?}", header.kind()));
        }
        Ok(Self { data })
    }

    fn header(&self) -> &NodeHeader {
        NodeHeader::from_bytes(self.data).unwrap() // INVARIANT: validated in new
    }

    pub fn entry_count(&self) -> usize {
        self.header().entry_count() as usize
    }

    pub fn used_bytes(&self) -> usize {
        self.header().used_bytes() as usize
    }

    pub fn depth(&self) -> u32 {
        self.header().depth()
    }

    pub fn slot_at(&self, index: usize) -> Result<InnerSlot> {
        if index >= self.entry_count() {
            return Err(corrupt!(
                "inner slot index {} out of bounds (entry_count={})",
                index,
                self.entry_count()
            ));
        }
        let offset = slot_offset(index);
        InnerSlot::ref_from_bytes(&self.data[offset..offset + INNER_SLOT_SIZE])
            .map(|slot| *slot)
            .map_err(|e| corrupt!("failed to read inner slot at index {}: {:?}", index, e))
    }

    pub fn key_at(&self, index: usize) -> Result<&'a [u8]> {
        let slot = self.slot_at(index)?;
        let offset = slot.key_off() as usize;
        let len = slot.key_len() as usize;
        if offset + len > self.data.len() {
            return Err(corrupt!(
                "routing key extends beyond block: offset={}, len={}",
                offset,
                len
            ));
        }
        Ok(&self.data[offset..offset + len])
    }

    pub fn laddr_at(&self, index: usize) -> Result<Laddr> {
        Ok(self.slot_at(index)?.laddr())
    }

    pub fn entry_bytes(&self, index: usize) -> Result<usize> {
        Ok(INNER_SLOT_SIZE + self.slot_at(index)?.key_len() as usize)
    }

    pub fn find_key(&self, key: &[u8]) -> Result<SearchResult> {
        let mut lo = 0usize;
        let mut hi = self.entry_count();
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            match self.key_at(mid)?.cmp(key) {
                Ordering::Less => lo = mid + 1,
                Ordering::Equal => return Ok(SearchResult::Found(mid)),
                Ordering::Greater => hi = mid,
            }
        }
        Ok(SearchResult::NotFound(lo))
    }

    /// Index of the child whose key range covers `key`: the last entry with
    /// a routing key at or below it. A key below every routing key is a
    /// structural error.
    pub fn containing_child(&self, key: &[u8]) -> Result<usize> {
        let mut lo = 0usize;
        let mut hi = self.entry_count();
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if self.key_at(mid)? <= key {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        if lo == 0 {
            return Err(corrupt!(
                "no routing entry covers key ({} entries)",
                self.entry_count()
            ));
        }
        Ok(lo - 1)
    }

    /// Whether inserting a routing entry with `key_len` key bytes (the child
    /// address lives in the fixed-size slot) would exceed the block.
    pub fn will_overflow(&self, key_len: usize) -> bool {
        self.used_bytes() + INNER_SLOT_SIZE + key_len > self.data.len()
    }

    pub fn is_below_min(&self, min_fill: u32) -> bool {
        self.used_bytes() < min_fill as usize
    }
}

/// Mutable view of an inner block.
pub struct InnerViewMut<'a> {
    data: &'a mut [u8],
}

impl<'a> InnerViewMut<'a> {
    pub fn new(data: &'a mut [u8]) -> Result<Self> {
        let header = NodeHeader::from_bytes(data)?;
        if header.kind() != NodeKind::Inner {
            return Err(corrupt!("expected inner node, got {:?}", header.kind()));
        }
        Ok(Self { data })
    }

    /// Initializes an empty inner node in `data`.
    pub fn init(data: &'a mut [u8], depth: u32) -> Result<Self> {
        NodeHeader::new(NodeKind::Inner, depth).write_to(data)?;
        Ok(Self { data })
    }

    pub fn as_view(&self) -> InnerView<'_> {
        InnerView { data: self.data }
    }

    fn free_end(&self) -> Result<usize> {
        let view = self.as_view();
        let mut end = self.data.len();
        for i in 0..view.entry_count() {
            end = end.min(view.slot_at(i)?.key_off() as usize);
        }
        Ok(end)
    }

    fn write_slot(&mut self, index: usize, slot: InnerSlot) {
        let offset = slot_offset(index);
        self.data[offset..offset + INNER_SLOT_SIZE].copy_from_slice(slot.as_bytes());
    }

    pub fn insert_entry(&mut self, at: usize, key: &[u8], laddr: Laddr) -> Result<()> {
        let (count, used) = {
            let view = self.as_view();
            (view.entry_count(), view.used_bytes())
        };
        if at > count {
            return Err(corrupt!(
                "inner insert index {} out of bounds (entry_count={})",
                at,
                count
            ));
        }
        let need = INNER_SLOT_SIZE + key.len();
        if self.data.len() - used < need {
            return Err(corrupt!(
                "inner node overflow: need {}, have {}",
                need,
                self.data.len() - used
            ));
        }

        let free_end = self.free_end()?;
        let key_off = free_end - key.len();
        self.data[key_off..free_end].copy_from_slice(key);

        self.data.copy_within(
            slot_offset(at)..slot_offset(count),
            slot_offset(at) + INNER_SLOT_SIZE,
        );
        self.write_slot(at, InnerSlot::new(key_off as u32, key.len() as u32, laddr));

        let header = NodeHeader::from_bytes_mut(self.data)?;
        header.set_entry_count(count as u32 + 1);
        header.set_used_bytes((used + need) as u32);
        Ok(())
    }

    pub fn remove_entry(&mut self, at: usize) -> Result<()> {
        let (count, used, slot) = {
            let view = self.as_view();
            (view.entry_count(), view.used_bytes(), view.slot_at(at)?)
        };
        let off = slot.key_off() as usize;
        let cell = slot.key_len() as usize;
        let free_end = self.free_end()?;

        self.data.copy_within(free_end..off, free_end + cell);
        for i in 0..count {
            if i == at {
                continue;
            }
            let mut other = self.as_view().slot_at(i)?;
            if (other.key_off() as usize) < off {
                other.set_key_off(other.key_off() + cell as u32);
                self.write_slot(i, other);
            }
        }
        self.data
            .copy_within(slot_offset(at + 1)..slot_offset(count), slot_offset(at));

        let header = NodeHeader::from_bytes_mut(self.data)?;
        header.set_entry_count(count as u32 - 1);
        header.set_used_bytes((used - INNER_SLOT_SIZE - cell) as u32);
        Ok(())
    }

    /// Repoints the entry at `at` without touching its routing key. Never
    /// grows the node.
    pub fn update_laddr(&mut self, at: usize, laddr: Laddr) -> Result<()> {
        let mut slot = self.as_view().slot_at(at)?;
        slot.set_laddr(laddr);
        self.write_slot(at, slot);
        Ok(())
    }

    /// Replaces both the routing key and the address at `at`.
    pub fn replace_entry(&mut self, at: usize, key: &[u8], laddr: Laddr) -> Result<()> {
        self.remove_entry(at)?;
        self.insert_entry(at, key, laddr)
    }

    /// Appends an entry; the caller guarantees ascending key order.
    pub fn push_entry(&mut self, key: &[u8], laddr: Laddr) -> Result<()> {
        let count = self.as_view().entry_count();
        self.insert_entry(count, key, laddr)
    }
}

fn nth<'v, 'a>(
    l: &'v InnerView<'a>,
    r: &'v InnerView<'a>,
    left_count: usize,
    i: usize,
) -> (&'v InnerView<'a>, usize) {
    if i < left_count {
        (l, i)
    } else {
        (r, i - left_count)
    }
}

/// Copies `src` into two fresh inner nodes partitioned at the byte
/// midpoint. Returns the pivot: the first routing key of the right half.
pub(crate) fn split_into(
    src: &InnerView<'_>,
    left: &mut InnerViewMut<'_>,
    right: &mut InnerViewMut<'_>,
) -> Result<Vec<u8>> {
    let count = src.entry_count();
    if count < 2 {
        return Err(corrupt!("cannot split inner node with {} entries", count));
    }
    let total = src.used_bytes() - NODE_HEADER_SIZE;
    let mut split_at = count - 1;
    let mut acc = 0usize;
    for i in 0..count {
        acc += src.entry_bytes(i)?;
        if 2 * acc >= total {
            split_at = (i + 1).min(count - 1);
            break;
        }
    }
    for i in 0..split_at {
        left.push_entry(src.key_at(i)?, src.laddr_at(i)?)?;
    }
    for i in split_at..count {
        right.push_entry(src.key_at(i)?, src.laddr_at(i)?)?;
    }
    Ok(src.key_at(split_at)?.to_vec())
}

/// Copies all entries of `l` then `r` into `dst`.
pub(crate) fn merge_from(
    dst: &mut InnerViewMut<'_>,
    l: &InnerView<'_>,
    r: &InnerView<'_>,
) -> Result<()> {
    for i in 0..l.entry_count() {
        dst.push_entry(l.key_at(i)?, l.laddr_at(i)?)?;
    }
    for i in 0..r.entry_count() {
        dst.push_entry(r.key_at(i)?, r.laddr_at(i)?)?;
    }
    Ok(())
}

/// Redistributes all entries of `l` and `r` evenly by byte count into two
/// fresh inner nodes. Returns the new pivot.
pub(crate) fn balance_into(
    l: &InnerView<'_>,
    r: &InnerView<'_>,
    out_l: &mut InnerViewMut<'_>,
    out_r: &mut InnerViewMut<'_>,
) -> Result<Vec<u8>> {
    let left_count = l.entry_count();
    let count = left_count + r.entry_count();
    if count < 2 {
        return Err(corrupt!(
            "cannot balance {} entries across two inner nodes",
            count
        ));
    }
    let total = l.used_bytes() + r.used_bytes() - 2 * NODE_HEADER_SIZE;
    let mut split_at = count - 1;
    let mut acc = 0usize;
    for i in 0..count {
        let (view, j) = nth(l, r, left_count, i);
        acc += view.entry_bytes(j)?;
        if 2 * acc >= total {
            split_at = (i + 1).min(count - 1);
            break;
        }
    }
    for i in 0..split_at {
        let (view, j) = nth(l, r, left_count, i);
        out_l.push_entry(view.key_at(j)?, view.laddr_at(j)?)?;
    }
    for i in split_at..count {
        let (view, j) = nth(l, r, left_count, i);
        out_r.push_entry(view.key_at(j)?, view.laddr_at(j)?)?;
    }
    let (view, j) = nth(l, r, left_count, split_at);
    Ok(view.key_at(j)?.to_vec())
}

/// An inner node bound to its extent, implementing routing and the
/// split/merge cascade.
#[derive(Debug, Clone)]
pub struct InnerNode {
    ext: ExtentRef,
}

impl InnerNode {
    pub fn new(ext: ExtentRef) -> Self {
        Self { ext }
    }

    pub fn extent(&self) -> &ExtentRef {
        &self.ext
    }

    pub fn laddr(&self) -> Laddr {
        self.ext.borrow().laddr()
    }

    fn depth(&self) -> Result<u32> {
        Ok(self.ext.borrow().meta()?.depth)
    }

    fn is_pending(&self) -> bool {
        self.ext.borrow().is_pending()
    }

    fn journal(&self, op: DeltaOp) -> Result<()> {
        self.ext.borrow_mut().journal_apply(op)
    }

    fn to_mutable(&self, oc: &mut OmapContext<'_>) -> Result<InnerNode> {
        if self.is_pending() {
            return Ok(self.clone());
        }
        Ok(InnerNode::new(oc.get_mutable(&self.ext)?))
    }

    /// Routing index and child address for `key`.
    fn route(&self, key: &[u8]) -> Result<(usize, Laddr)> {
        let ext = self.ext.borrow();
        let view = InnerView::new(ext.buf())?;
        let at = view.containing_child(key)?;
        Ok((at, view.laddr_at(at)?))
    }

    pub fn get_value(&self, oc: &mut OmapContext<'_>, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let (_, child_laddr) = self.route(key)?;
        let child = load_extent(oc, child_laddr, self.depth()? - 1)?;
        child.get_value(oc, key)
    }

    pub fn insert(
        &self,
        oc: &mut OmapContext<'_>,
        key: &[u8],
        value: &[u8],
    ) -> Result<MutationResult> {
        let (at, child_laddr) = self.route(key)?;
        let child = load_extent(oc, child_laddr, self.depth()? - 1)?;
        match child.insert(oc, key, value)? {
            MutationResult::WasSplit { left, right, pivot } => {
                self.handle_split(oc, at, left, right, pivot)
            }
            other => {
                debug_assert!(matches!(other, MutationResult::Success));
                Ok(MutationResult::Success)
            }
        }
    }

    /// Installs a child split at routing index `at`: repoint the entry to
    /// the new left child, then insert the pivot entry for the right child,
    /// splitting self when it does not fit.
    fn handle_split(
        &self,
        oc: &mut OmapContext<'_>,
        at: usize,
        left: ExtentRef,
        right: ExtentRef,
        pivot: Vec<u8>,
    ) -> Result<MutationResult> {
        if !self.is_pending() {
            let mutable = self.to_mutable(oc)?;
            return mutable.handle_split(oc, at, left, right, pivot);
        }
        let left_laddr = left.borrow().laddr();
        let right_laddr = right.borrow().laddr();
        // the update cannot grow the node, so it goes first
        self.journal(DeltaOp::InnerUpdate {
            at: at as u32,
            laddr: left_laddr,
        })?;
        let overflow = {
            let ext = self.ext.borrow();
            InnerView::new(ext.buf())?.will_overflow(pivot.len())
        };
        if !overflow {
            self.journal(DeltaOp::InnerInsert {
                at: at as u32 + 1,
                key: pivot,
                laddr: right_laddr,
            })?;
            return Ok(MutationResult::Success);
        }
        trace!(laddr = self.laddr(), "inner full, split propagates");
        let result = self.make_split_insert(oc, at + 1, &pivot, right_laddr)?;
        oc.dec_ref(self.laddr());
        Ok(result)
    }

    /// Splits self into two fresh inner nodes and inserts the routing entry
    /// `(key, laddr)` at index `at` on the side that owns it.
    fn make_split_insert(
        &self,
        oc: &mut OmapContext<'_>,
        at: usize,
        key: &[u8],
        laddr: Laddr,
    ) -> Result<MutationResult> {
        let (left, right, pivot) = self.make_split_children(oc)?;
        let left_count = {
            let lext = left.borrow();
            InnerView::new(lext.buf())?.entry_count()
        };
        if key < pivot.as_slice() {
            InnerNode::new(left.clone()).journal(DeltaOp::InnerInsert {
                at: at as u32,
                key: key.to_vec(),
                laddr,
            })?;
        } else {
            InnerNode::new(right.clone()).journal(DeltaOp::InnerInsert {
                at: (at - left_count) as u32,
                key: key.to_vec(),
                laddr,
            })?;
        }
        Ok(MutationResult::WasSplit { left, right, pivot })
    }

    pub fn rm_key(&self, oc: &mut OmapContext<'_>, key: &[u8]) -> Result<MutationResult> {
        let (at, child_laddr) = self.route(key)?;
        let child = load_extent(oc, child_laddr, self.depth()? - 1)?;
        match child.rm_key(oc, key)? {
            result @ (MutationResult::Success | MutationResult::Fail) => Ok(result),
            MutationResult::NeedMerge { node } => {
                let entry_count = {
                    let ext = self.ext.borrow();
                    InnerView::new(ext.buf())?.entry_count()
                };
                if entry_count > 1 {
                    self.merge_entry(oc, at, node)
                } else {
                    // nothing to merge with; the root handle collapses
                    // 1-entry roots later
                    Ok(MutationResult::Success)
                }
            }
            MutationResult::WasSplit { left, right, pivot } => {
                self.handle_split(oc, at, left, right, pivot)
            }
        }
    }

    /// Merges or rebalances the under-filled child at routing index `at`
    /// with a donor sibling.
    fn merge_entry(
        &self,
        oc: &mut OmapContext<'_>,
        at: usize,
        child: ExtentRef,
    ) -> Result<MutationResult> {
        if !self.is_pending() {
            let mutable = self.to_mutable(oc)?;
            return mutable.merge_entry(oc, at, child);
        }
        let (entry_count, depth) = {
            let ext = self.ext.borrow();
            let view = InnerView::new(ext.buf())?;
            (view.entry_count(), view.depth())
        };
        let donor_on_left = at + 1 == entry_count;
        let donor_at = if donor_on_left { at - 1 } else { at + 1 };
        let donor_laddr = {
            let ext = self.ext.borrow();
            InnerView::new(ext.buf())?.laddr_at(donor_at)?
        };
        let donor = load_extent(oc, donor_laddr, depth - 1)?;
        let donor_below_min = donor.is_below_min(oc.config.min_fill)?;
        let entry = OmapNode::from_extent(child)?;
        debug_assert!(entry.is_below_min(oc.config.min_fill)?);

        let (l, r, l_at, r_at) = if donor_on_left {
            (donor, entry, donor_at, at)
        } else {
            (entry, donor, at, donor_at)
        };

        if donor_below_min {
            trace!(l = l.laddr(), r = r.laddr(), "full merge of siblings");
            let replacement = l.make_full_merge(oc, &r)?;
            let replacement_laddr = replacement.borrow().laddr();
            self.journal(DeltaOp::InnerUpdate {
                at: l_at as u32,
                laddr: replacement_laddr,
            })?;
            self.journal(DeltaOp::InnerRemove { at: r_at as u32 })?;
            let retired: SmallVec<[Laddr; 2]> = smallvec![l.laddr(), r.laddr()];
            oc.dec_refs(&retired);
            let below = {
                let ext = self.ext.borrow();
                InnerView::new(ext.buf())?.is_below_min(oc.config.min_fill)
            };
            if below {
                Ok(MutationResult::NeedMerge {
                    node: self.ext.clone(),
                })
            } else {
                Ok(MutationResult::Success)
            }
        } else {
            trace!(l = l.laddr(), r = r.laddr(), "rebalancing siblings");
            let (new_l, new_r, new_pivot) = l.make_balanced(oc, &r)?;
            let new_l_laddr = new_l.borrow().laddr();
            let new_r_laddr = new_r.borrow().laddr();
            // the update cannot grow the node, so it goes first
            self.journal(DeltaOp::InnerUpdate {
                at: l_at as u32,
                laddr: new_l_laddr,
            })?;
            let overflow = {
                let ext = self.ext.borrow();
                InnerView::new(ext.buf())?.will_overflow(new_pivot.len())
            };
            if !overflow {
                self.journal(DeltaOp::InnerReplace {
                    at: r_at as u32,
                    key: new_pivot,
                    laddr: new_r_laddr,
                })?;
                let retired: SmallVec<[Laddr; 2]> = smallvec![l.laddr(), r.laddr()];
                oc.dec_refs(&retired);
                Ok(MutationResult::Success)
            } else {
                // the wider pivot does not fit; remove first (removes never
                // split) and let the insert drive a split of self
                trace!(laddr = self.laddr(), "rebalance pivot overflows parent");
                self.journal(DeltaOp::InnerRemove { at: r_at as u32 })?;
                let result = self.make_split_insert(oc, r_at, &new_pivot, new_r_laddr)?;
                let retired: SmallVec<[Laddr; 3]> =
                    smallvec![l.laddr(), r.laddr(), self.laddr()];
                oc.dec_refs(&retired);
                Ok(result)
            }
        }
    }

    pub fn list_keys(
        &self,
        oc: &mut OmapContext<'_>,
        start: Option<&[u8]>,
        max: usize,
    ) -> Result<ListResult<Vec<u8>>> {
        let (entry_count, depth, mut at) = {
            let ext = self.ext.borrow();
            let view = InnerView::new(ext.buf())?;
            let at = match start {
                Some(key) => view.containing_child(key)?,
                None => 0,
            };
            (view.entry_count(), view.depth(), at)
        };
        let mut cursor: Option<Vec<u8>> = start.map(|key| key.to_vec());
        let mut items = Vec::new();
        while at < entry_count && items.len() < max {
            let child_laddr = {
                let ext = self.ext.borrow();
                InnerView::new(ext.buf())?.laddr_at(at)?
            };
            let child = load_extent(oc, child_laddr, depth - 1)?;
            let result = child.list_keys(oc, cursor.as_deref(), max - items.len())?;
            items.extend(result.items);
            at += 1;
            cursor = match result.next {
                // the child ran dry; resume at the next sibling's lower bound
                None if at < entry_count => Some({
                    let ext = self.ext.borrow();
                    InnerView::new(ext.buf())?.key_at(at)?.to_vec()
                }),
                other => other,
            };
        }
        Ok(ListResult {
            items,
            next: cursor,
        })
    }

    pub fn list(
        &self,
        oc: &mut OmapContext<'_>,
        start: Option<&[u8]>,
        max: usize,
    ) -> Result<ListResult<(Vec<u8>, Vec<u8>)>> {
        let (entry_count, depth, mut at) = {
            let ext = self.ext.borrow();
            let view = InnerView::new(ext.buf())?;
            let at = match start {
                Some(key) => view.containing_child(key)?,
                None => 0,
            };
            (view.entry_count(), view.depth(), at)
        };
        let mut cursor: Option<Vec<u8>> = start.map(|key| key.to_vec());
        let mut items = Vec::new();
        while at < entry_count && items.len() < max {
            let child_laddr = {
                let ext = self.ext.borrow();
                InnerView::new(ext.buf())?.laddr_at(at)?
            };
            let child = load_extent(oc, child_laddr, depth - 1)?;
            let result = child.list(oc, cursor.as_deref(), max - items.len())?;
            items.extend(result.items);
            at += 1;
            cursor = match result.next {
                None if at < entry_count => Some({
                    let ext = self.ext.borrow();
                    InnerView::new(ext.buf())?.key_at(at)?.to_vec()
                }),
                other => other,
            };
        }
        Ok(ListResult {
            items,
            next: cursor,
        })
    }

    /// Recursively clears and retires every child. Self is retired by the
    /// caller.
    pub fn clear(&self, oc: &mut OmapContext<'_>) -> Result<()> {
        let (entry_count, depth) = {
            let ext = self.ext.borrow();
            let view = InnerView::new(ext.buf())?;
            (view.entry_count(), view.depth())
        };
        for at in 0..entry_count {
            let child_laddr = {
                let ext = self.ext.borrow();
                InnerView::new(ext.buf())?.laddr_at(at)?
            };
            let child = load_extent(oc, child_laddr, depth - 1)?;
            child.clear(oc)?;
            oc.dec_ref(child_laddr);
        }
        Ok(())
    }

    pub(crate) fn make_split_children(
        &self,
        oc: &mut OmapContext<'_>,
    ) -> Result<(ExtentRef, ExtentRef, Vec<u8>)> {
        let depth = self.depth()?;
        let (left, right) = oc.alloc_node_pair(NodeKind::Inner, depth)?;
        let pivot = {
            let ext = self.ext.borrow();
            let src = InnerView::new(ext.buf())?;
            let mut lext = left.borrow_mut();
            let mut rext = right.borrow_mut();
            let mut lv = InnerViewMut::new(lext.buf_mut())?;
            let mut rv = InnerViewMut::new(rext.buf_mut())?;
            split_into(&src, &mut lv, &mut rv)?
        };
        Ok((left, right, pivot))
    }

    pub(crate) fn make_full_merge(
        &self,
        oc: &mut OmapContext<'_>,
        right: &InnerNode,
    ) -> Result<ExtentRef> {
        let depth = self.depth()?;
        let replacement = oc.alloc_node(NodeKind::Inner, depth)?;
        {
            let lext = self.ext.borrow();
            let rext = right.ext.borrow();
            let mut dext = replacement.borrow_mut();
            let mut dst = InnerViewMut::new(dext.buf_mut())?;
            merge_from(
                &mut dst,
                &InnerView::new(lext.buf())?,
                &InnerView::new(rext.buf())?,
            )?;
        }
        Ok(replacement)
    }

    pub(crate) fn make_balanced(
        &self,
        oc: &mut OmapContext<'_>,
        right: &InnerNode,
    ) -> Result<(ExtentRef, ExtentRef, Vec<u8>)> {
        let depth = self.depth()?;
        let (out_l, out_r) = oc.alloc_node_pair(NodeKind::Inner, depth)?;
        let pivot = {
            let lext = self.ext.borrow();
            let rext = right.ext.borrow();
            let mut olext = out_l.borrow_mut();
            let mut orext = out_r.borrow_mut();
            let mut lv = InnerViewMut::new(olext.buf_mut())?;
            let mut rv = InnerViewMut::new(orext.buf_mut())?;
            balance_into(
                &InnerView::new(lext.buf())?,
                &InnerView::new(rext.buf())?,
                &mut lv,
                &mut rv,
            )?
        };
        Ok((out_l, out_r, pivot))
    }
}
