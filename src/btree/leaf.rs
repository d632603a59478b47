//! # Leaf Nodes
//!
//! This module implements leaf nodes: the slotted on-extent layout and the
//! mutation algorithms that run on it. Leaves store the actual key/value
//! pairs in ascending key order.
//!
//! ## Extent Layout
//!
//! ```text
//! +----------------------+
//! | NodeHeader (16B)     |  kind = leaf, depth = 1
//! +----------------------+
//! | Slot Array           |  LeafSlot (16B each), sorted by key
//! | [Slot 0]             |  - key_off: u32   offset of key bytes
//! | [Slot 1]             |  - key_len: u32
//! | ...                  |  - val_off: u32   offset of value bytes
//! +----------------------+  - val_len: u32
//! | Free Space           |
//! +----------------------+
//! | Payload Cells        |  key bytes ++ value bytes, grows upward
//! |                      |  from the block end
//! +----------------------+
//! ```
//!
//! Payload is kept compact: removing a cell closes the hole immediately and
//! rewires the affected slot offsets, so free space is always one contiguous
//! range between the slot array and the payload region.
//!
//! ## Views vs. Algorithms
//!
//! [`LeafView`] / [`LeafViewMut`] are plain borrows of a block buffer and
//! know nothing about transactions; they implement search, space accounting,
//! and the slot/payload surgery. [`LeafNode`] wraps a shared extent handle
//! and implements the transactional algorithms on top: copy-on-write before
//! any mutation, delta journaling, and the split/merge/balance rewrites that
//! allocate replacement extents.
//!
//! ## Mutation Outcomes
//!
//! ```text
//! insert  -> Success, or WasSplit(left, right, pivot) when the entry does
//!            not fit; the pivot is the first key of the right half
//! rm_key  -> Fail on a miss, Success, or NeedMerge(self) when the leaf
//!            drops below the configured minimum fill
//! ```
//!
//! A lookup miss is not an error and not a `Fail`; it reads as `None`.

use std::cmp::Ordering;

use tracing::trace;
use zerocopy::little_endian::U32;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::btree::{ListResult, MutationResult, SearchResult};
use crate::config::{LEAF_SLOT_SIZE, NODE_HEADER_SIZE};
use crate::error::Result;
use crate::store::{DeltaOp, ExtentRef, Laddr, NodeHeader, NodeKind, OmapContext};

#[repr(C)]
#[derive(
    Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned, PartialEq, Eq,
)]
pub struct LeafSlot {
    key_off: U32,
    key_len: U32,
    val_off: U32,
    val_len: U32,
}

impl LeafSlot {
    pub fn new(key_off: u32, key_len: u32, val_off: u32, val_len: u32) -> Self {
        Self {
            key_off: U32::new(key_off),
            key_len: U32::new(key_len),
            val_off: U32::new(val_off),
            val_len: U32::new(val_len),
        }
    }

    zerocopy_accessors! {
        key_off: u32,
        key_len: u32,
        val_off: u32,
        val_len: u32,
    }
}

fn slot_offset(index: usize) -> usize {
    NODE_HEADER_SIZE + index * LEAF_SLOT_SIZE
}

/// Read-only view of a leaf block.
#[derive(Debug, Clone, Copy)]
pub struct LeafView<'a> {
    data: &'a [u8],
}

impl<'a> LeafView<'a> {
    pub fn new(data: &'a [u8]) -> Result<Self> {
        let header = NodeHeader::from_bytes(data)?;
        if header.kind() != NodeKind::Leaf {
            return Err(corrupt!("expected leaf node, got {:?}", header.kind()));
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

    pub fn slot_at(&self, index: usize) -> Result<LeafSlot> {
        if index >= self.entry_count() {
            return Err(corrupt!(
                "leaf slot index {} out of bounds (entry_count={})",
                index,
                self.entry_count()
            ));
        }
        let offset = slot_offset(index);
        LeafSlot::ref_from_bytes(&self.data[offset..offset + LEAF_SLOT_SIZE])
            .map(|slot| *slot)
            .map_err(|e| corrupt!("failed to read leaf slot at index {}: {:?}", index, e))
    }

    pub fn key_at(&self, index: usize) -> Result<&'a [u8]> {
        let slot = self.slot_at(index)?;
        let offset = slot.key_off() as usize;
        let len = slot.key_len() as usize;
        if offset + len > self.data.len() {
            return Err(corrupt!(
                "leaf key extends beyond block: offset={}, len={}",
                offset,
                len
            ));
        }
        Ok(&self.data[offset..offset + len])
    }

    pub fn value_at(&self, index: usize) -> Result<&'a [u8]> {
        let slot = self.slot_at(index)?;
        let offset = slot.val_off() as usize;
        let len = slot.val_len() as usize;
        if offset + len > self.data.len() {
            return Err(corrupt!(
                "leaf value extends beyond block: offset={}, len={}",
                offset,
                len
            ));
        }
        Ok(&self.data[offset..offset + len])
    }

    /// Slot plus payload footprint of one entry.
    pub fn entry_bytes(&self, index: usize) -> Result<usize> {
        let slot = self.slot_at(index)?;
        Ok(LEAF_SLOT_SIZE + (slot.key_len() + slot.val_len()) as usize)
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

    /// Position at which `key` would be inserted to preserve order.
    pub fn lower_bound(&self, key: &[u8]) -> Result<usize> {
        match self.find_key(key)? {
            SearchResult::Found(at) | SearchResult::NotFound(at) => Ok(at),
        }
    }

    /// Whether inserting `key_len` key bytes plus `val_len` value bytes
    /// (plus the slot) would exceed the block.
    pub fn will_overflow(&self, key_len: usize, val_len: usize) -> bool {
        self.used_bytes() + LEAF_SLOT_SIZE + key_len + val_len > self.data.len()
    }

    pub fn is_below_min(&self, min_fill: u32) -> bool {
        self.used_bytes() < min_fill as usize
    }
}

/// Mutable view of a leaf block. All slot and payload surgery lives here;
/// transactional concerns (CoW, journaling) stay in [`LeafNode`].
pub struct LeafViewMut<'a> {
    data: &'a mut [u8],
}

impl<'a> LeafViewMut<'a> {
    pub fn new(data: &'a mut [u8]) -> Result<Self> {
        let header = NodeHeader::from_bytes(data)?;
        if header.kind() != NodeKind::Leaf {
            return Err(corrupt!("expected leaf node, got {:?}", header.kind()));
        }
        Ok(Self { data })
    }

    /// Initializes an empty leaf in `data`.
    pub fn init(data: &'a mut [u8], depth: u32) -> Result<Self> {
        NodeHeader::new(NodeKind::Leaf, depth).write_to(data)?;
        Ok(Self { data })
    }

    pub fn as_view(&self) -> LeafView<'_> {
        LeafView { data: self.data }
    }

    /// Start of the payload region (lowest cell offset).
    fn free_end(&self) -> Result<usize> {
        let view = self.as_view();
        let mut end = self.data.len();
        for i in 0..view.entry_count() {
            end = end.min(view.slot_at(i)?.key_off() as usize);
        }
        Ok(end)
    }

    fn write_slot(&mut self, index: usize, slot: LeafSlot) {
        let offset = slot_offset(index);
        self.data[offset..offset + LEAF_SLOT_SIZE].copy_from_slice(slot.as_bytes());
    }

    pub fn insert_entry(&mut self, at: usize, key: &[u8], value: &[u8]) -> Result<()> {
        let (count, used) = {
            let view = self.as_view();
            (view.entry_count(), view.used_bytes())
        };
        if at > count {
            return Err(corrupt!(
                "leaf insert index {} out of bounds (entry_count={})",
                at,
                count
            ));
        }
        let cell = key.len() + value.len();
        let need = LEAF_SLOT_SIZE + cell;
        if self.data.len() - used < need {
            return Err(corrupt!(
                "leaf node overflow: need {}, have {}",
                need,
                self.data.len() - used
            ));
        }

        let free_end = self.free_end()?;
        let key_off = free_end - cell;
        let val_off = key_off + key.len();
        self.data[key_off..val_off].copy_from_slice(key);
        self.data[val_off..free_end].copy_from_slice(value);

        self.data
            .copy_within(slot_offset(at)..slot_offset(count), slot_offset(at) + LEAF_SLOT_SIZE);
        self.write_slot(
            at,
            LeafSlot::new(
                key_off as u32,
                key.len() as u32,
                val_off as u32,
                value.len() as u32,
            ),
        );

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
        let cell = (slot.key_len() + slot.val_len()) as usize;
        let free_end = self.free_end()?;

        // close the payload hole
        self.data.copy_within(free_end..off, free_end + cell);
        // rewire slots whose cells sat below the removed one
        for i in 0..count {
            if i == at {
                continue;
            }
            let mut other = self.as_view().slot_at(i)?;
            if (other.key_off() as usize) < off {
                other.set_key_off(other.key_off() + cell as u32);
                other.set_val_off(other.val_off() + cell as u32);
                self.write_slot(i, other);
            }
        }
        // drop the slot
        self.data
            .copy_within(slot_offset(at + 1)..slot_offset(count), slot_offset(at));

        let header = NodeHeader::from_bytes_mut(self.data)?;
        header.set_entry_count(count as u32 - 1);
        header.set_used_bytes((used - LEAF_SLOT_SIZE - cell) as u32);
        Ok(())
    }

    /// Replaces the entry at `at` in place (same index, new payload).
    pub fn update_entry(&mut self, at: usize, key: &[u8], value: &[u8]) -> Result<()> {
        self.remove_entry(at)?;
        self.insert_entry(at, key, value)
    }

    /// Appends an entry; the caller guarantees ascending key order.
    pub fn push_entry(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        let count = self.as_view().entry_count();
        self.insert_entry(count, key, value)
    }
}

fn nth<'v, 'a>(
    l: &'v LeafView<'a>,
    r: &'v LeafView<'a>,
    left_count: usize,
    i: usize,
) -> (&'v LeafView<'a>, usize) {
    if i < left_count {
        (l, i)
    } else {
        (r, i - left_count)
    }
}

/// Copies `src` into two fresh leaves partitioned at the byte midpoint.
/// Returns the pivot: the first key of the right half.
pub(crate) fn split_into(
    src: &LeafView<'_>,
    left: &mut LeafViewMut<'_>,
    right: &mut LeafViewMut<'_>,
) -> Result<Vec<u8>> {
    let count = src.entry_count();
    if count < 2 {
        return Err(corrupt!("cannot split leaf with {} entries", count));
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
        left.push_entry(src.key_at(i)?, src.value_at(i)?)?;
    }
    for i in split_at..count {
        right.push_entry(src.key_at(i)?, src.value_at(i)?)?;
    }
    Ok(src.key_at(split_at)?.to_vec())
}

/// Copies all entries of `l` then `r` into `dst`.
pub(crate) fn merge_from(
    dst: &mut LeafViewMut<'_>,
    l: &LeafView<'_>,
    r: &LeafView<'_>,
) -> Result<()> {
    for i in 0..l.entry_count() {
        dst.push_entry(l.key_at(i)?, l.value_at(i)?)?;
    }
    for i in 0..r.entry_count() {
        dst.push_entry(r.key_at(i)?, r.value_at(i)?)?;
    }
    Ok(())
}

/// Redistributes all entries of `l` and `r` evenly by byte count into two
/// fresh leaves. Returns the new pivot: the first key of the new right.
pub(crate) fn balance_into(
    l: &LeafView<'_>,
    r: &LeafView<'_>,
    out_l: &mut LeafViewMut<'_>,
    out_r: &mut LeafViewMut<'_>,
) -> Result<Vec<u8>> {
    let left_count = l.entry_count();
    let count = left_count + r.entry_count();
    if count < 2 {
        return Err(corrupt!("cannot balance {} entries across two leaves", count));
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
        out_l.push_entry(view.key_at(j)?, view.value_at(j)?)?;
    }
    for i in split_at..count {
        let (view, j) = nth(l, r, left_count, i);
        out_r.push_entry(view.key_at(j)?, view.value_at(j)?)?;
    }
    let (view, j) = nth(l, r, left_count, split_at);
    Ok(view.key_at(j)?.to_vec())
}

/// A leaf node bound to its extent, implementing the transactional mutation
/// algorithms.
#[derive(Debug, Clone)]
pub struct LeafNode {
    ext: ExtentRef,
}

impl LeafNode {
    pub fn new(ext: ExtentRef) -> Self {
        Self { ext }
    }

    pub fn extent(&self) -> &ExtentRef {
        &self.ext
    }

    pub fn laddr(&self) -> Laddr {
        self.ext.borrow().laddr()
    }

    fn is_pending(&self) -> bool {
        self.ext.borrow().is_pending()
    }

    fn journal(&self, op: DeltaOp) -> Result<()> {
        self.ext.borrow_mut().journal_apply(op)
    }

    /// Copy-on-write: self when already pending, else the transaction's
    /// mutable clone.
    fn to_mutable(&self, oc: &mut OmapContext<'_>) -> Result<LeafNode> {
        if self.is_pending() {
            return Ok(self.clone());
        }
        Ok(LeafNode::new(oc.get_mutable(&self.ext)?))
    }

    pub fn get_value(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let ext = self.ext.borrow();
        let view = LeafView::new(ext.buf())?;
        match view.find_key(key)? {
            SearchResult::Found(at) => Ok(Some(view.value_at(at)?.to_vec())),
            SearchResult::NotFound(_) => Ok(None),
        }
    }

    pub fn insert(
        &self,
        oc: &mut OmapContext<'_>,
        key: &[u8],
        value: &[u8],
    ) -> Result<MutationResult> {
        let overflow = {
            let ext = self.ext.borrow();
            LeafView::new(ext.buf())?.will_overflow(key.len(), value.len())
        };
        if !overflow {
            if !self.is_pending() {
                let mutable = self.to_mutable(oc)?;
                return mutable.insert(oc, key, value);
            }
            let found = {
                let ext = self.ext.borrow();
                LeafView::new(ext.buf())?.find_key(key)?
            };
            match found {
                SearchResult::Found(at) => self.journal(DeltaOp::LeafUpdate {
                    at: at as u32,
                    key: key.to_vec(),
                    value: value.to_vec(),
                })?,
                SearchResult::NotFound(at) => self.journal(DeltaOp::LeafInsert {
                    at: at as u32,
                    key: key.to_vec(),
                    value: value.to_vec(),
                })?,
            }
            return Ok(MutationResult::Success);
        }

        trace!(laddr = self.laddr(), "leaf full, splitting");
        let (left, right, pivot) = self.make_split_children(oc)?;
        let (found, left_count) = {
            let ext = self.ext.borrow();
            let lext = left.borrow();
            (
                LeafView::new(ext.buf())?.find_key(key)?,
                LeafView::new(lext.buf())?.entry_count(),
            )
        };
        // the pending write lands on whichever side now owns the key
        match found {
            SearchResult::Found(at) => {
                let (side, at) = if key < pivot.as_slice() {
                    (&left, at)
                } else {
                    (&right, at - left_count)
                };
                LeafNode::new(side.clone()).journal(DeltaOp::LeafUpdate {
                    at: at as u32,
                    key: key.to_vec(),
                    value: value.to_vec(),
                })?;
            }
            SearchResult::NotFound(at) => {
                let (side, at) = if key < pivot.as_slice() {
                    (&left, at)
                } else {
                    (&right, at - left_count)
                };
                LeafNode::new(side.clone()).journal(DeltaOp::LeafInsert {
                    at: at as u32,
                    key: key.to_vec(),
                    value: value.to_vec(),
                })?;
            }
        }
        oc.dec_ref(self.laddr());
        Ok(MutationResult::WasSplit { left, right, pivot })
    }

    pub fn rm_key(&self, oc: &mut OmapContext<'_>, key: &[u8]) -> Result<MutationResult> {
        if !self.is_pending() {
            let mutable = self.to_mutable(oc)?;
            return mutable.rm_key(oc, key);
        }
        let found = {
            let ext = self.ext.borrow();
            LeafView::new(ext.buf())?.find_key(key)?
        };
        match found {
            SearchResult::NotFound(_) => Ok(MutationResult::Fail),
            SearchResult::Found(at) => {
                self.journal(DeltaOp::LeafRemove { at: at as u32 })?;
                let below = {
                    let ext = self.ext.borrow();
                    LeafView::new(ext.buf())?.is_below_min(oc.config.min_fill)
                };
                if below {
                    Ok(MutationResult::NeedMerge {
                        node: self.ext.clone(),
                    })
                } else {
                    Ok(MutationResult::Success)
                }
            }
        }
    }

    pub fn list_keys(&self, start: Option<&[u8]>, max: usize) -> Result<ListResult<Vec<u8>>> {
        let ext = self.ext.borrow();
        let view = LeafView::new(ext.buf())?;
        let count = view.entry_count();
        let mut at = match start {
            Some(key) => view.lower_bound(key)?,
            None => 0,
        };
        let mut items = Vec::new();
        while at < count && items.len() < max {
            items.push(view.key_at(at)?.to_vec());
            at += 1;
        }
        let next = if at < count {
            Some(view.key_at(at)?.to_vec())
        } else {
            None
        };
        Ok(ListResult { items, next })
    }

    pub fn list(
        &self,
        start: Option<&[u8]>,
        max: usize,
    ) -> Result<ListResult<(Vec<u8>, Vec<u8>)>> {
        let ext = self.ext.borrow();
        let view = LeafView::new(ext.buf())?;
        let count = view.entry_count();
        let mut at = match start {
            Some(key) => view.lower_bound(key)?,
            None => 0,
        };
        let mut items = Vec::new();
        while at < count && items.len() < max {
            items.push((view.key_at(at)?.to_vec(), view.value_at(at)?.to_vec()));
            at += 1;
        }
        let next = if at < count {
            Some(view.key_at(at)?.to_vec())
        } else {
            None
        };
        Ok(ListResult { items, next })
    }

    /// Two fresh leaves with self's entries split at the byte midpoint, plus
    /// the pivot key.
    pub(crate) fn make_split_children(
        &self,
        oc: &mut OmapContext<'_>,
    ) -> Result<(ExtentRef, ExtentRef, Vec<u8>)> {
        let depth = self.ext.borrow().meta()?.depth;
        let (left, right) = oc.alloc_node_pair(NodeKind::Leaf, depth)?;
        let pivot = {
            let ext = self.ext.borrow();
            let src = LeafView::new(ext.buf())?;
            let mut lext = left.borrow_mut();
            let mut rext = right.borrow_mut();
            let mut lv = LeafViewMut::new(lext.buf_mut())?;
            let mut rv = LeafViewMut::new(rext.buf_mut())?;
            split_into(&src, &mut lv, &mut rv)?
        };
        Ok((left, right, pivot))
    }

    /// One fresh leaf holding all entries of self then `right`. The caller
    /// retires both sources.
    pub(crate) fn make_full_merge(
        &self,
        oc: &mut OmapContext<'_>,
        right: &LeafNode,
    ) -> Result<ExtentRef> {
        let depth = self.ext.borrow().meta()?.depth;
        let replacement = oc.alloc_node(NodeKind::Leaf, depth)?;
        {
            let lext = self.ext.borrow();
            let rext = right.ext.borrow();
            let mut dext = replacement.borrow_mut();
            let mut dst = LeafViewMut::new(dext.buf_mut())?;
            merge_from(
                &mut dst,
                &LeafView::new(lext.buf())?,
                &LeafView::new(rext.buf())?,
            )?;
        }
        trace!(
            l = self.laddr(),
            r = right.laddr(),
            "merged leaves into one replacement"
        );
        Ok(replacement)
    }

    /// Two fresh leaves with the entries of self and `right` redistributed
    /// evenly, plus the new pivot. The caller retires both sources.
    pub(crate) fn make_balanced(
        &self,
        oc: &mut OmapContext<'_>,
        right: &LeafNode,
    ) -> Result<(ExtentRef, ExtentRef, Vec<u8>)> {
        let depth = self.ext.borrow().meta()?.depth;
        let (out_l, out_r) = oc.alloc_node_pair(NodeKind::Leaf, depth)?;
        let pivot = {
            let lext = self.ext.borrow();
            let rext = right.ext.borrow();
            let mut olext = out_l.borrow_mut();
            let mut orext = out_r.borrow_mut();
            let mut lv = LeafViewMut::new(olext.buf_mut())?;
            let mut rv = LeafViewMut::new(orext.buf_mut())?;
            balance_into(
                &LeafView::new(lext.buf())?,
                &LeafView::new(rext.buf())?,
                &mut lv,
                &mut rv,
            )?
        };
        Ok((out_l, out_r, pivot))
    }
}
