//! # Transactions and the Extent Manager Contract
//!
//! The tree core never touches storage directly. Every I/O point — extent
//! load, allocation, copy-on-write clone, retirement — is a call on an
//! [`ExtentManager`], and those calls are the suspension points of a tree
//! operation: a disk-backed manager may block or yield inside them, while the
//! node state between two calls is exclusively owned by the current
//! transaction.
//!
//! ## Transaction Anatomy
//!
//! ```text
//! Transaction
//! ├── pending   laddr -> ExtentRef     fresh allocations + CoW clones
//! ├── read_set  laddr -> version       first-observed commit version
//! └── retired   [laddr]                dec_ref'd; removed at commit
//! ```
//!
//! Reads within a transaction always resolve through the pending set first,
//! so an operation sees its own uncommitted mutations. The read set feeds
//! optimistic validation at commit: if any observed extent has moved on, the
//! whole transaction aborts with `Conflict` and leaves no trace.
//!
//! Retirements are accumulated and flushed at commit, after every
//! replacement extent has been populated; the observable semantics are the
//! same as retiring eagerly, without sprinkling store calls through the
//! mutation algorithms.
//!
//! ## Context
//!
//! [`OmapContext`] bundles the transaction, the manager, and the block
//! geometry, and is threaded through every tree operation.

use hashbrown::HashMap;

use crate::config::OmapConfig;
use crate::error::Result;
use crate::store::extent::{ExtentRef, ExtentState, Laddr, NodeKind};

/// One logical client request against the tree: a pending-mutation set, a
/// read set for conflict validation, and a retirement list.
///
/// Dropping a transaction aborts it; no compensation is needed.
#[derive(Debug, Default)]
pub struct Transaction {
    pending: HashMap<Laddr, ExtentRef>,
    read_set: HashMap<Laddr, u64>,
    retired: Vec<Laddr>,
}

impl Transaction {
    pub fn new() -> Self {
        Self::default()
    }

    /// The pending (mutable) extent for `laddr`, if this transaction owns
    /// one.
    pub fn pending(&self, laddr: Laddr) -> Option<ExtentRef> {
        self.pending.get(&laddr).cloned()
    }

    /// Records the commit version an extent was first observed at.
    pub fn track_read(&mut self, laddr: Laddr, version: u64) {
        self.read_set.entry(laddr).or_insert(version);
    }

    /// Adds a fresh allocation or CoW clone to the pending set.
    pub fn install_pending(&mut self, ext: ExtentRef) {
        let laddr = ext.borrow().laddr();
        self.pending.insert(laddr, ext);
    }

    /// Schedules an extent for retirement at commit.
    ///
    /// A fresh extent simply vanishes: it was never committed, so there is
    /// nothing to remove from the store. Anything else loses its pending
    /// clone (if any) and its committed version is dropped at commit.
    pub fn retire(&mut self, laddr: Laddr) {
        if let Some(ext) = self.pending.remove(&laddr) {
            if matches!(ext.borrow().state(), ExtentState::Fresh) {
                return;
            }
        }
        self.retired.push(laddr);
    }

    pub fn pending_extents(&self) -> impl Iterator<Item = (Laddr, &ExtentRef)> {
        self.pending.iter().map(|(l, e)| (*l, e))
    }

    pub fn read_set(&self) -> impl Iterator<Item = (Laddr, u64)> + '_ {
        self.read_set.iter().map(|(l, v)| (*l, *v))
    }

    pub fn retired(&self) -> &[Laddr] {
        &self.retired
    }
}

/// The transaction manager contract the tree core consumes.
///
/// Implementations own extent storage, addressing, and commit. Every method
/// taking a [`Transaction`] must resolve reads through its pending set so a
/// transaction observes its own mutations.
pub trait ExtentManager {
    /// Loads one extent. Fails with an I/O error when the address does not
    /// resolve.
    fn read_extent(&self, t: &mut Transaction, laddr: Laddr) -> Result<ExtentRef>;

    /// Allocates a fresh extent holding an initialized empty node.
    fn alloc_extent(
        &self,
        t: &mut Transaction,
        kind: NodeKind,
        depth: u32,
        size: u32,
    ) -> Result<ExtentRef>;

    /// Allocates two fresh extents at once (split and balance pairs).
    fn alloc_extent_pair(
        &self,
        t: &mut Transaction,
        kind: NodeKind,
        depth: u32,
        size: u32,
    ) -> Result<(ExtentRef, ExtentRef)> {
        Ok((
            self.alloc_extent(t, kind, depth, size)?,
            self.alloc_extent(t, kind, depth, size)?,
        ))
    }

    /// Returns a mutable form of `ext` owned by the transaction: the extent
    /// itself when already pending, else a copy-on-write clone with the same
    /// laddr and content.
    fn get_mutable_extent(&self, t: &mut Transaction, ext: &ExtentRef) -> Result<ExtentRef>;

    /// Marks an extent for retirement at commit.
    fn dec_ref(&self, t: &mut Transaction, laddr: Laddr) {
        t.retire(laddr);
    }

    /// Atomically validates and publishes the transaction.
    fn commit(&self, t: Transaction) -> Result<()>;
}

/// Everything a tree operation needs: the transaction, the extent manager,
/// and the block geometry.
pub struct OmapContext<'a> {
    pub t: &'a mut Transaction,
    pub tm: &'a dyn ExtentManager,
    pub config: OmapConfig,
}

impl<'a> OmapContext<'a> {
    pub fn new(t: &'a mut Transaction, tm: &'a dyn ExtentManager, config: OmapConfig) -> Self {
        Self { t, tm, config }
    }

    pub fn read_extent(&mut self, laddr: Laddr) -> Result<ExtentRef> {
        self.tm.read_extent(self.t, laddr)
    }

    pub fn alloc_node(&mut self, kind: NodeKind, depth: u32) -> Result<ExtentRef> {
        self.tm
            .alloc_extent(self.t, kind, depth, self.config.block_size)
    }

    pub fn alloc_node_pair(&mut self, kind: NodeKind, depth: u32) -> Result<(ExtentRef, ExtentRef)> {
        self.tm
            .alloc_extent_pair(self.t, kind, depth, self.config.block_size)
    }

    pub fn get_mutable(&mut self, ext: &ExtentRef) -> Result<ExtentRef> {
        self.tm.get_mutable_extent(self.t, ext)
    }

    pub fn dec_ref(&mut self, laddr: Laddr) {
        self.tm.dec_ref(self.t, laddr);
    }

    pub fn dec_refs(&mut self, laddrs: &[Laddr]) {
        for &laddr in laddrs {
            self.tm.dec_ref(self.t, laddr);
        }
    }
}
