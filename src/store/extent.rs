//! # Extents and Node Headers
//!
//! An extent is a fixed-size byte block holding exactly one tree node,
//! addressed by a logical address (`Laddr`). Every extent begins with a
//! 16-byte header describing the node it encodes.
//!
//! ## Node Header Layout (16 bytes)
//!
//! ```text
//! Offset  Size  Field        Description
//! ------  ----  -----------  ----------------------------------------
//! 0       1     kind         Node kind (1 = inner, 2 = leaf)
//! 1       3     reserved     Reserved for future use
//! 4       4     depth        Tree depth (leaves = 1, grows toward root)
//! 8       4     entry_count  Number of slots in this node
//! 12      4     used_bytes   Header + slot array + payload footprint
//! ```
//!
//! The header uses `zerocopy` for safe transmutation, so it is read in place
//! from the block buffer without copying.
//!
//! ## Extent States
//!
//! Within a transaction an extent is in one of three states:
//!
//! ```text
//! Clean            loaded committed content; read-only
//! Fresh            allocated by this transaction; written wholesale at commit
//! MutationPending  copy-on-write clone; every mutation is journaled
//! ```
//!
//! `Fresh` and `MutationPending` extents are *pending*: exclusively owned by
//! the transaction and safe to mutate in place. Journal calls apply the
//! delta to the buffer immediately and record it only in the
//! `MutationPending` state — fresh extents need no log because their full
//! content is installed at commit.
//!
//! ## Sharing
//!
//! Extents are shared within an operation through `Rc<RefCell<_>>` handles.
//! Holding an [`ExtentRef`] keeps the extent alive for the duration of a
//! traversal; the transaction's pending set holds the canonical reference to
//! every mutable extent.

use std::cell::RefCell;
use std::rc::Rc;

use zerocopy::little_endian::U32;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::config::NODE_HEADER_SIZE;
use crate::error::Result;
use crate::store::delta::DeltaOp;

/// Logical address of an extent.
pub type Laddr = u64;

/// Kind of tree node an extent encodes.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Unknown = 0x00,
    Inner = 0x01,
    Leaf = 0x02,
}

impl NodeKind {
    pub fn from_byte(b: u8) -> Self {
        match b {
            0x01 => NodeKind::Inner,
            0x02 => NodeKind::Leaf,
            _ => NodeKind::Unknown,
        }
    }
}

/// Kind and depth of a node, read from its header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeMeta {
    pub kind: NodeKind,
    pub depth: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct NodeHeader {
    kind: u8,
    reserved: [u8; 3],
    depth: U32,
    entry_count: U32,
    used_bytes: U32,
}

impl NodeHeader {
    pub fn new(kind: NodeKind, depth: u32) -> Self {
        Self {
            kind: kind as u8,
            reserved: [0; 3],
            depth: U32::new(depth),
            entry_count: U32::new(0),
            used_bytes: U32::new(NODE_HEADER_SIZE as u32),
        }
    }

    pub fn from_bytes(data: &[u8]) -> Result<&Self> {
        if data.len() < size_of::<Self>() {
            return Err(corrupt!(
                "buffer too small for NodeHeader: {} < {}",
                data.len(),
                size_of::<Self>()
            ));
        }
        Self::ref_from_bytes(&data[..size_of::<Self>()])
            .map_err(|e| corrupt!("failed to read NodeHeader: {:?}", e))
    }

    pub fn from_bytes_mut(data: &mut [u8]) -> Result<&mut Self> {
        if data.len() < size_of::<Self>() {
            return Err(corrupt!(
                "buffer too small for NodeHeader: {} < {}",
                data.len(),
                size_of::<Self>()
            ));
        }
        Self::mut_from_bytes(&mut data[..size_of::<Self>()])
            .map_err(|e| corrupt!("failed to read NodeHeader: {:?}", e))
    }

    pub fn write_to(&self, data: &mut [u8]) -> Result<()> {
        if data.len() < size_of::<Self>() {
            return Err(corrupt!(
                "buffer too small for NodeHeader: {} < {}",
                data.len(),
                size_of::<Self>()
            ));
        }
        data[..size_of::<Self>()].copy_from_slice(self.as_bytes());
        Ok(())
    }

    pub fn kind(&self) -> NodeKind {
        NodeKind::from_byte(self.kind)
    }

    pub fn set_kind(&mut self, kind: NodeKind) {
        self.kind = kind as u8;
    }

    pub fn meta(&self) -> NodeMeta {
        NodeMeta {
            kind: self.kind(),
            depth: self.depth(),
        }
    }

    zerocopy_accessors! {
        depth: u32,
        entry_count: u32,
        used_bytes: u32,
    }
}

/// State of an extent with respect to the current transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtentState {
    /// Committed content loaded from the store; must not be mutated.
    Clean,
    /// Allocated by this transaction; installed wholesale at commit.
    Fresh,
    /// Copy-on-write clone; mutations are applied in place and journaled.
    MutationPending { deltas: Vec<DeltaOp> },
}

/// A fixed-size block holding one tree node.
#[derive(Debug, Clone)]
pub struct Extent {
    laddr: Laddr,
    buf: Vec<u8>,
    state: ExtentState,
}

/// Shared handle to an extent within a single transaction.
pub type ExtentRef = Rc<RefCell<Extent>>;

impl Extent {
    pub fn new(laddr: Laddr, buf: Vec<u8>, state: ExtentState) -> Self {
        Self { laddr, buf, state }
    }

    /// Fresh extent with an initialized empty-node header.
    pub fn init_node(laddr: Laddr, size: u32, kind: NodeKind, depth: u32) -> Result<Self> {
        let mut buf = vec![0u8; size as usize];
        NodeHeader::new(kind, depth).write_to(&mut buf)?;
        Ok(Self {
            laddr,
            buf,
            state: ExtentState::Fresh,
        })
    }

    pub fn into_ref(self) -> ExtentRef {
        Rc::new(RefCell::new(self))
    }

    pub fn laddr(&self) -> Laddr {
        self.laddr
    }

    pub fn buf(&self) -> &[u8] {
        &self.buf
    }

    /// Direct mutable access to the block, bypassing the delta journal.
    ///
    /// Only valid for pending extents; split, merge, and balance write their
    /// replacement nodes through this before any journaled mutation runs.
    pub fn buf_mut(&mut self) -> &mut [u8] {
        debug_assert!(self.is_pending(), "direct write to a clean extent");
        &mut self.buf
    }

    pub fn state(&self) -> &ExtentState {
        &self.state
    }

    pub fn meta(&self) -> Result<NodeMeta> {
        let meta = NodeHeader::from_bytes(&self.buf)?.meta();
        if meta.kind == NodeKind::Unknown {
            return Err(corrupt!("extent {:#x} has unknown node kind", self.laddr));
        }
        Ok(meta)
    }

    /// True when this extent belongs to the current transaction's pending
    /// set and may be mutated in place.
    pub fn is_pending(&self) -> bool {
        !matches!(self.state, ExtentState::Clean)
    }

    /// Applies a delta to the block and records it in the journal when this
    /// is a copy-on-write clone.
    pub fn journal_apply(&mut self, op: DeltaOp) -> Result<()> {
        op.apply(&mut self.buf)?;
        if let ExtentState::MutationPending { deltas } = &mut self.state {
            deltas.push(op);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_header_is_16_bytes() {
        assert_eq!(size_of::<NodeHeader>(), NODE_HEADER_SIZE);
    }

    #[test]
    fn node_kind_from_byte() {
        assert_eq!(NodeKind::from_byte(0x00), NodeKind::Unknown);
        assert_eq!(NodeKind::from_byte(0x01), NodeKind::Inner);
        assert_eq!(NodeKind::from_byte(0x02), NodeKind::Leaf);
        assert_eq!(NodeKind::from_byte(0xFF), NodeKind::Unknown);
    }

    #[test]
    fn node_header_new_initializes_correctly() {
        let header = NodeHeader::new(NodeKind::Leaf, 1);

        assert_eq!(header.kind(), NodeKind::Leaf);
        assert_eq!(header.depth(), 1);
        assert_eq!(header.entry_count(), 0);
        assert_eq!(header.used_bytes(), NODE_HEADER_SIZE as u32);
    }

    #[test]
    fn node_header_round_trips_through_bytes() {
        let mut buf = [0u8; 64];
        let mut header = NodeHeader::new(NodeKind::Inner, 3);
        header.set_entry_count(7);
        header.set_used_bytes(200);
        header.write_to(&mut buf).unwrap();

        let read = NodeHeader::from_bytes(&buf).unwrap();
        assert_eq!(read.kind(), NodeKind::Inner);
        assert_eq!(read.depth(), 3);
        assert_eq!(read.entry_count(), 7);
        assert_eq!(read.used_bytes(), 200);
    }

    #[test]
    fn node_header_from_bytes_too_small() {
        let buf = [0u8; 8];
        assert!(NodeHeader::from_bytes(&buf).is_err());
    }

    #[test]
    fn node_header_from_bytes_mut_modifies_in_place() {
        let mut buf = [0u8; 16];
        NodeHeader::new(NodeKind::Leaf, 1).write_to(&mut buf).unwrap();

        {
            let header = NodeHeader::from_bytes_mut(&mut buf).unwrap();
            header.set_entry_count(42);
        }

        assert_eq!(NodeHeader::from_bytes(&buf).unwrap().entry_count(), 42);
    }

    #[test]
    fn init_node_produces_fresh_pending_extent() {
        let ext = Extent::init_node(7, 256, NodeKind::Leaf, 1).unwrap();

        assert_eq!(ext.laddr(), 7);
        assert_eq!(ext.buf().len(), 256);
        assert!(ext.is_pending());
        assert_eq!(
            ext.meta().unwrap(),
            NodeMeta {
                kind: NodeKind::Leaf,
                depth: 1
            }
        );
    }

    #[test]
    fn clean_extent_is_not_pending() {
        let fresh = Extent::init_node(1, 256, NodeKind::Leaf, 1).unwrap();
        let clean = Extent::new(1, fresh.buf().to_vec(), ExtentState::Clean);
        assert!(!clean.is_pending());
    }

    #[test]
    fn meta_rejects_unknown_kind() {
        let ext = Extent::new(3, vec![0u8; 256], ExtentState::Clean);
        assert!(ext.meta().is_err());
    }

    #[test]
    fn journal_apply_records_deltas_only_when_mutation_pending() {
        let mut fresh = Extent::init_node(1, 256, NodeKind::Leaf, 1).unwrap();
        fresh
            .journal_apply(DeltaOp::LeafInsert {
                at: 0,
                key: b"a".to_vec(),
                value: b"1".to_vec(),
            })
            .unwrap();
        assert!(matches!(fresh.state(), ExtentState::Fresh));

        let mut clone = Extent::new(
            1,
            fresh.buf().to_vec(),
            ExtentState::MutationPending { deltas: Vec::new() },
        );
        clone
            .journal_apply(DeltaOp::LeafInsert {
                at: 1,
                key: b"b".to_vec(),
                value: b"2".to_vec(),
            })
            .unwrap();
        match clone.state() {
            ExtentState::MutationPending { deltas } => assert_eq!(deltas.len(), 1),
            other => panic!("unexpected state {:?}", other),
        }
    }
}
