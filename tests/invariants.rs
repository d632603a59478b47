//! # Structural Invariant Tests
//!
//! Walks committed trees and checks the structural invariants directly on
//! the extent layout:
//!
//! 1. routing keys are strictly ascending and bound their subtrees
//! 2. leaf keys are strictly ascending and unique
//! 3. depth is uniform (every descent step decrements by exactly one)
//! 4. every non-root node is non-empty and, where the workload admits a
//!    fill floor, at or above it (split and balance land halves just
//!    around half the block, so the floor is workload-dependent)
//! 5. in-order traversal equals the model: the sorted set of all
//!    inserted-and-not-removed keys with their last-written values
//! 6. every committed extent is reachable from the root (no retirement
//!    leaks)
//!
//! A property test runs randomized operation sequences against a
//! `BTreeMap` model, re-walking the tree after every commit batch.

use std::collections::BTreeMap;

use proptest::prelude::*;

use omapdb::btree::inner::InnerView;
use omapdb::btree::leaf::LeafView;
use omapdb::btree::load_extent;
use omapdb::{
    ExtentManager, Laddr, MemStore, OmapConfig, OmapContext, OmapNode, OmapRoot, OmapTree, Result,
};

struct TestDb {
    store: MemStore,
    config: OmapConfig,
    root: Option<OmapRoot>,
}

impl TestDb {
    fn new(block_size: u32) -> Self {
        Self {
            store: MemStore::new(),
            config: OmapConfig::with_block_size(block_size).unwrap(),
            root: None,
        }
    }

    fn with<T>(
        &mut self,
        f: impl FnOnce(&mut OmapTree, &mut OmapContext<'_>) -> Result<T>,
    ) -> Result<T> {
        let mut t = self.store.begin();
        let mut oc = OmapContext::new(&mut t, &self.store, self.config);
        let mut tree = match self.root {
            Some(root) => OmapTree::open(root),
            None => OmapTree::create(&mut oc)?,
        };
        let out = f(&mut tree, &mut oc)?;
        drop(oc);
        self.store.commit(t)?;
        self.root = Some(tree.root());
        Ok(out)
    }

    /// Walks the committed tree, asserting the structural invariants, and
    /// returns the in-order traversal plus the visited node count.
    ///
    /// `fill_floor` is the minimum byte footprint demanded of non-root
    /// nodes; pass 0 to only require them non-empty.
    fn check_tree(&mut self, fill_floor: u32) -> (Vec<(Vec<u8>, Vec<u8>)>, usize) {
        let root = self.root.expect("tree not created");
        let mut t = self.store.begin();
        let mut oc = OmapContext::new(&mut t, &self.store, self.config);
        let mut entries = Vec::new();
        let mut nodes = 0usize;
        check_node(
            &mut oc,
            root.laddr,
            root.depth,
            fill_floor,
            &[],
            None,
            true,
            &mut entries,
            &mut nodes,
        )
        .unwrap();
        (entries, nodes)
    }
}

#[allow(clippy::too_many_arguments)]
fn check_node(
    oc: &mut OmapContext<'_>,
    laddr: Laddr,
    depth: u32,
    fill_floor: u32,
    lower: &[u8],
    upper: Option<&[u8]>,
    is_root: bool,
    entries: &mut Vec<(Vec<u8>, Vec<u8>)>,
    nodes: &mut usize,
) -> Result<()> {
    *nodes += 1;
    // load_extent itself verifies kind and depth uniformity
    let node = load_extent(oc, laddr, depth)?;
    match node {
        OmapNode::Leaf(leaf) => {
            let ext = leaf.extent().borrow();
            let view = LeafView::new(ext.buf())?;
            if !is_root {
                assert!(view.entry_count() > 0, "empty non-root leaf {:#x}", laddr);
                assert!(
                    view.used_bytes() >= fill_floor as usize,
                    "leaf {:#x} underfull: {} < {}",
                    laddr,
                    view.used_bytes(),
                    fill_floor
                );
            }
            let mut prev: Option<Vec<u8>> = None;
            for i in 0..view.entry_count() {
                let key = view.key_at(i)?.to_vec();
                assert!(key.as_slice() >= lower, "leaf key below routing bound");
                if let Some(upper) = upper {
                    assert!(key.as_slice() < upper, "leaf key above routing bound");
                }
                if let Some(prev) = &prev {
                    assert!(prev.as_slice() < key.as_slice(), "leaf keys not ascending");
                }
                entries.push((key.clone(), view.value_at(i)?.to_vec()));
                prev = Some(key);
            }
        }
        OmapNode::Inner(inner) => {
            let (children, used) = {
                let ext = inner.extent().borrow();
                let view = InnerView::new(ext.buf())?;
                let mut children = Vec::new();
                for i in 0..view.entry_count() {
                    children.push((view.key_at(i)?.to_vec(), view.laddr_at(i)?));
                }
                (children, view.used_bytes())
            };
            assert!(!children.is_empty(), "inner node without children");
            if !is_root {
                assert!(
                    used >= fill_floor as usize,
                    "inner {:#x} underfull: {} < {}",
                    laddr,
                    used,
                    fill_floor
                );
            }
            assert!(
                children[0].0.as_slice() >= lower,
                "routing key below parent bound"
            );
            for pair in children.windows(2) {
                assert!(pair[0].0 < pair[1].0, "routing keys not strictly ascending");
            }
            if let Some(upper) = upper {
                assert!(
                    children.last().unwrap().0.as_slice() < upper,
                    "routing key above parent bound"
                );
            }
            for (i, (key, child)) in children.iter().enumerate() {
                let child_upper = children.get(i + 1).map(|(k, _)| k.as_slice()).or(upper);
                check_node(
                    oc,
                    *child,
                    depth - 1,
                    fill_floor,
                    key,
                    child_upper,
                    false,
                    entries,
                    nodes,
                )?;
            }
        }
    }
    Ok(())
}

fn key(i: usize) -> Vec<u8> {
    format!("key-{:03}", i).into_bytes()
}

#[test]
fn invariants_hold_while_growing() {
    let mut db = TestDb::new(512);
    for i in 0..300 {
        let k = key(i * 13 % 300);
        db.with(|tree, oc| tree.insert(oc, &k, &[0xEE; 8]))
            .unwrap();
        if i % 25 == 0 {
            db.check_tree(0);
        }
    }

    let (entries, nodes) = db.check_tree(0);
    assert_eq!(entries.len(), 300);
    assert!(entries.windows(2).all(|w| w[0].0 < w[1].0));
    assert_eq!(nodes, db.store.extent_count());
}

#[test]
fn invariants_hold_while_shrinking() {
    let mut db = TestDb::new(512);
    db.with(|tree, oc| {
        for i in 0..300 {
            tree.insert(oc, &key(i), &[0x11; 8])?;
        }
        Ok(())
    })
    .unwrap();

    for i in 0..300 {
        if i % 2 == 0 {
            db.with(|tree, oc| tree.remove(oc, &key(i)).map(|_| ()))
                .unwrap();
        }
        if i % 25 == 0 {
            db.check_tree(0);
        }
    }

    let (entries, nodes) = db.check_tree(0);
    assert_eq!(entries.len(), 150);
    assert!(entries.iter().all(|(k, _)| k[6] % 2 == 1));
    assert_eq!(nodes, db.store.extent_count());
}

#[test]
fn dense_removal_workload_keeps_nodes_reasonably_filled() {
    // 64-byte values in 4KB blocks: merges and balances keep surviving
    // nodes comfortably above half the merge threshold
    let mut db = TestDb::new(4096);
    db.with(|tree, oc| {
        for i in 0..100 {
            let k = format!("k{:02}", i);
            tree.insert(oc, k.as_bytes(), &[0xAB; 64])?;
        }
        Ok(())
    })
    .unwrap();

    for i in (0..100).step_by(2) {
        let k = format!("k{:02}", i);
        db.with(|tree, oc| tree.remove(oc, k.as_bytes()).map(|_| ()))
            .unwrap();
    }

    let floor = db.config.min_fill / 2;
    let (entries, _) = db.check_tree(floor);
    assert_eq!(entries.len(), 50);
}

#[test]
fn traversal_matches_model_after_mixed_workload() {
    let mut db = TestDb::new(512);
    let mut model: BTreeMap<Vec<u8>, Vec<u8>> = BTreeMap::new();

    for round in 0..6u8 {
        db.with(|tree, oc| {
            for i in 0..120usize {
                let k = key(i);
                match (i + round as usize) % 3 {
                    0 => {
                        let value = vec![round; (i % 20) + 1];
                        tree.insert(oc, &k, &value)?;
                        model.insert(k, value);
                    }
                    1 => {
                        let present = tree.remove(oc, &k)?;
                        assert_eq!(present, model.remove(&k).is_some());
                    }
                    _ => {
                        let got = tree.get(oc, &k)?;
                        assert_eq!(got, model.get(&k).cloned());
                    }
                }
            }
            Ok(())
        })
        .unwrap();

        let (entries, _) = db.check_tree(0);
        let expected: Vec<(Vec<u8>, Vec<u8>)> =
            model.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        assert_eq!(entries, expected);
    }
}

#[derive(Debug, Clone)]
enum Op {
    Insert(u8, u8),
    Remove(u8),
    Get(u8),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u8..60, any::<u8>()).prop_map(|(k, v)| Op::Insert(k, v)),
        (0u8..60).prop_map(Op::Remove),
        (0u8..60).prop_map(Op::Get),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn random_ops_match_btreemap(ops in prop::collection::vec(op_strategy(), 1..300)) {
        let mut db = TestDb::new(256);
        let mut model: BTreeMap<Vec<u8>, Vec<u8>> = BTreeMap::new();
        db.with(|_, _| Ok(())).unwrap();

        for chunk in ops.chunks(20) {
            db.with(|tree, oc| {
                for op in chunk {
                    match op {
                        Op::Insert(k, v) => {
                            let k = key(*k as usize);
                            let value = vec![*v; (*v % 16) as usize + 1];
                            tree.insert(oc, &k, &value)?;
                            model.insert(k, value);
                        }
                        Op::Remove(k) => {
                            let k = key(*k as usize);
                            let present = tree.remove(oc, &k)?;
                            assert_eq!(present, model.remove(&k).is_some());
                        }
                        Op::Get(k) => {
                            let k = key(*k as usize);
                            assert_eq!(tree.get(oc, &k)?, model.get(&k).cloned());
                        }
                    }
                }
                Ok(())
            }).unwrap();

            let (entries, nodes) = db.check_tree(0);
            let expected: Vec<(Vec<u8>, Vec<u8>)> =
                model.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
            prop_assert_eq!(entries, expected);
            prop_assert_eq!(nodes, db.store.extent_count());
        }
    }
}
