//! # In-Memory Extent Store
//!
//! `MemStore` is the reference [`ExtentManager`]: a versioned in-memory
//! extent table with optimistic concurrency. It exists for two reasons:
//!
//! 1. It makes the crate usable and testable without a disk-backed
//!    transaction manager.
//! 2. Its commit path *replays the delta journal* against the committed base
//!    instead of installing the mutated buffer, so the recovery contract is
//!    exercised on every commit (with the direct buffer checked against the
//!    replay in debug builds).
//!
//! ## Commit Protocol
//!
//! ```text
//! 1. Validate: every read-set entry must still exist at the version it was
//!    first observed at; otherwise the transaction conflicts and nothing is
//!    published.
//! 2. Publish: fresh extents are installed wholesale; mutation-pending
//!    extents are rebuilt by replaying their delta log onto the committed
//!    base; retired extents are removed.
//! 3. Stamp: all published extents carry the new commit version.
//! ```
//!
//! Dropping a [`Transaction`] without committing aborts it — allocated
//! laddrs are simply never referenced again.

use hashbrown::HashMap;
use parking_lot::Mutex;

use crate::error::{OmapError, Result};
use crate::store::delta::DeltaOp;
use crate::store::extent::{Extent, ExtentRef, ExtentState, Laddr, NodeKind};
use crate::store::txn::{ExtentManager, Transaction};

#[derive(Debug, Clone)]
struct CommittedExtent {
    buf: Vec<u8>,
    version: u64,
}

#[derive(Debug, Default)]
struct StoreState {
    extents: HashMap<Laddr, CommittedExtent>,
    next_laddr: Laddr,
    version: u64,
}

/// Versioned in-memory extent store with optimistic conflict detection.
#[derive(Debug)]
pub struct MemStore {
    state: Mutex<StoreState>,
}

impl Default for MemStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(StoreState {
                extents: HashMap::new(),
                next_laddr: 1,
                version: 0,
            }),
        }
    }

    pub fn begin(&self) -> Transaction {
        Transaction::new()
    }

    /// Number of committed extents. A leak check for tests: after any
    /// committed operation this equals the number of live tree nodes.
    pub fn extent_count(&self) -> usize {
        self.state.lock().extents.len()
    }

    pub fn contains(&self, laddr: Laddr) -> bool {
        self.state.lock().extents.contains_key(&laddr)
    }

    /// Current commit version.
    pub fn version(&self) -> u64 {
        self.state.lock().version
    }
}

impl ExtentManager for MemStore {
    fn read_extent(&self, t: &mut Transaction, laddr: Laddr) -> Result<ExtentRef> {
        if let Some(ext) = t.pending(laddr) {
            return Ok(ext);
        }
        let state = self.state.lock();
        let committed = state
            .extents
            .get(&laddr)
            .ok_or(OmapError::ExtentNotFound { laddr })?;
        t.track_read(laddr, committed.version);
        Ok(Extent::new(laddr, committed.buf.clone(), ExtentState::Clean).into_ref())
    }

    fn alloc_extent(
        &self,
        t: &mut Transaction,
        kind: NodeKind,
        depth: u32,
        size: u32,
    ) -> Result<ExtentRef> {
        let laddr = {
            let mut state = self.state.lock();
            let laddr = state.next_laddr;
            state.next_laddr += 1;
            laddr
        };
        let ext = Extent::init_node(laddr, size, kind, depth)?.into_ref();
        t.install_pending(ext.clone());
        Ok(ext)
    }

    fn get_mutable_extent(&self, t: &mut Transaction, ext: &ExtentRef) -> Result<ExtentRef> {
        if ext.borrow().is_pending() {
            return Ok(ext.clone());
        }
        let laddr = ext.borrow().laddr();
        if let Some(pending) = t.pending(laddr) {
            return Ok(pending);
        }
        {
            // the clone's base must be validated at commit even if the
            // original read happened in an earlier operation
            let state = self.state.lock();
            let committed = state
                .extents
                .get(&laddr)
                .ok_or(OmapError::ExtentNotFound { laddr })?;
            t.track_read(laddr, committed.version);
        }
        let clone = Extent::new(
            laddr,
            ext.borrow().buf().to_vec(),
            ExtentState::MutationPending { deltas: Vec::new() },
        )
        .into_ref();
        t.install_pending(clone.clone());
        Ok(clone)
    }

    fn commit(&self, t: Transaction) -> Result<()> {
        let mut state = self.state.lock();

        for (laddr, observed) in t.read_set() {
            match state.extents.get(&laddr) {
                Some(committed) if committed.version == observed => {}
                _ => return Err(OmapError::Conflict { laddr }),
            }
        }

        let version = state.version + 1;
        for (laddr, ext) in t.pending_extents() {
            let ext = ext.borrow();
            let buf = match ext.state() {
                ExtentState::Fresh => ext.buf().to_vec(),
                ExtentState::MutationPending { deltas } => {
                    let base = state
                        .extents
                        .get(&laddr)
                        .ok_or(corrupt!("mutated extent {:#x} has no committed base", laddr))?;
                    let mut buf = base.buf.clone();
                    DeltaOp::replay(&mut buf, deltas)?;
                    debug_assert_eq!(buf, ext.buf(), "delta replay diverged from live block");
                    buf
                }
                ExtentState::Clean => continue,
            };
            state.extents.insert(laddr, CommittedExtent { buf, version });
        }
        for &laddr in t.retired() {
            state.extents.remove(&laddr);
        }
        state.version = version;
        Ok(())
    }
}
