//! # End-to-End Tree Operation Tests
//!
//! Drives the full public surface — insert, get, remove, list, clear —
//! through committed transactions against the in-memory store, including
//! the multi-level split and merge scenarios.

use omapdb::{
    ExtentManager, ListResult, MemStore, OmapConfig, OmapContext, OmapRoot, OmapTree, Result,
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

    /// Runs `f` inside one committed transaction.
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

    fn insert(&mut self, key: &[u8], value: &[u8]) {
        self.with(|tree, oc| tree.insert(oc, key, value)).unwrap();
    }

    fn get(&mut self, key: &[u8]) -> Option<Vec<u8>> {
        self.with(|tree, oc| tree.get(oc, key)).unwrap()
    }

    fn remove(&mut self, key: &[u8]) -> bool {
        self.with(|tree, oc| tree.remove(oc, key)).unwrap()
    }

    fn list_keys(&mut self, start: Option<Vec<u8>>, max: usize) -> ListResult<Vec<u8>> {
        self.with(|tree, oc| tree.list_keys(oc, start.as_deref(), max))
            .unwrap()
    }

    fn list_all_keys(&mut self) -> Vec<Vec<u8>> {
        self.list_keys(None, usize::MAX).items
    }

    fn depth(&self) -> u32 {
        self.root.map(|root| root.depth).unwrap_or(1)
    }
}

fn key(i: usize) -> Vec<u8> {
    format!("k{:04}", i).into_bytes()
}

#[test]
fn point_ops_on_small_tree() {
    let mut db = TestDb::new(4096);
    db.insert(b"a", b"1");
    db.insert(b"b", b"2");

    assert_eq!(db.get(b"a"), Some(b"1".to_vec()));
    assert_eq!(db.get(b"b"), Some(b"2".to_vec()));
    assert_eq!(db.get(b"c"), None);
}

#[test]
fn overwrite_keeps_last_value() {
    let mut db = TestDb::new(4096);
    db.insert(b"k", b"v1");
    db.insert(b"k", b"v2");
    assert_eq!(db.get(b"k"), Some(b"v2".to_vec()));
}

#[test]
fn insert_remove_get_cycle() {
    let mut db = TestDb::new(4096);
    db.insert(b"a", b"1");
    db.insert(b"a", b"2");
    assert!(db.remove(b"a"));
    assert!(!db.remove(b"a"));
    assert_eq!(db.get(b"a"), None);
}

#[test]
fn thousand_keys_paginate_in_order() {
    let mut db = TestDb::new(4096);
    db.with(|tree, oc| {
        for i in 0..1000 {
            tree.insert(oc, &key(i), b"8-bytes!")?;
        }
        Ok(())
    })
    .unwrap();

    let first = db.list_keys(None, 100);
    assert_eq!(first.items.len(), 100);
    assert_eq!(first.items[0], key(0));
    assert_eq!(first.items[99], key(99));
    assert_eq!(first.next, Some(key(100)));

    // walking the cursor to exhaustion yields all keys in order
    let mut collected = first.items.clone();
    let mut cursor = first.next;
    while let Some(start) = cursor {
        let page = db.list_keys(Some(start), 100);
        collected.extend(page.items);
        cursor = page.next;
    }
    assert_eq!(collected.len(), 1000);
    assert_eq!(collected, (0..1000).map(key).collect::<Vec<_>>());
}

#[test]
fn pagination_equals_full_listing_for_odd_page_sizes() {
    let mut db = TestDb::new(512);
    for i in 0..200 {
        db.insert(&key(i * 7 % 200), &[i as u8; 4]);
    }
    let full = db.list_all_keys();

    let mut paged = Vec::new();
    let mut cursor = None;
    loop {
        let page = db.list_keys(cursor, 13);
        paged.extend(page.items);
        match page.next {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }
    assert_eq!(paged, full);
}

#[test]
fn forced_splits_build_a_taller_tree() {
    let mut db = TestDb::new(4096);
    for i in 0..100 {
        let key = format!("k{:02}", i);
        db.insert(key.as_bytes(), &[0xAB; 64]);
    }

    assert!(db.depth() >= 2, "tree should have split, depth {}", db.depth());
    let keys = db.list_all_keys();
    assert_eq!(keys.len(), 100);
    assert!(keys.windows(2).all(|w| w[0] < w[1]));
    for i in 0..100 {
        let key = format!("k{:02}", i);
        assert_eq!(db.get(key.as_bytes()), Some(vec![0xAB; 64]));
    }
}

#[test]
fn removing_every_other_key_keeps_the_rest() {
    let mut db = TestDb::new(4096);
    for i in 0..100 {
        let key = format!("k{:02}", i);
        db.insert(key.as_bytes(), &[0xCD; 64]);
    }
    for i in (0..100).step_by(2) {
        let key = format!("k{:02}", i);
        assert!(db.remove(key.as_bytes()), "failed to remove {}", key);
    }

    let keys = db.list_all_keys();
    let expected: Vec<Vec<u8>> = (0..100)
        .filter(|i| i % 2 == 1)
        .map(|i| format!("k{:02}", i).into_bytes())
        .collect();
    assert_eq!(keys, expected);
}

#[test]
fn exact_fill_does_not_split_but_one_more_byte_does() {
    // 4096 = 16 header + 102 entries of (16 slot + 4 key + 20 value)
    let mut db = TestDb::new(4096);
    db.with(|tree, oc| {
        for i in 0..102 {
            let key = format!("a{:03}", i);
            tree.insert(oc, key.as_bytes(), &[0u8; 20])?;
        }
        Ok(())
    })
    .unwrap();
    assert_eq!(db.depth(), 1, "an exactly-full leaf must not split");

    db.insert(b"zzzz", b"x");
    assert_eq!(db.depth(), 2, "any further insert must split");
    assert_eq!(db.list_all_keys().len(), 103);
}

#[test]
fn deep_tree_collapses_after_mass_removal() {
    let mut db = TestDb::new(256);
    db.with(|tree, oc| {
        for i in 0..200 {
            tree.insert(oc, &key(i), b"12345678")?;
        }
        Ok(())
    })
    .unwrap();
    let built_depth = db.depth();
    assert!(built_depth >= 3, "expected a deep tree, got {}", built_depth);

    for i in 1..200 {
        assert!(db.remove(&key(i)));
    }

    assert!(
        db.depth() < built_depth,
        "merge cascade should collapse the root: {} -> {}",
        built_depth,
        db.depth()
    );
    assert_eq!(db.list_all_keys(), vec![key(0)]);
    assert_eq!(db.get(&key(0)), Some(b"12345678".to_vec()));
}

#[test]
fn clear_empties_and_reuses_the_tree() {
    let mut db = TestDb::new(512);
    for i in 0..100 {
        db.insert(&key(i), b"v");
    }
    db.with(|tree, oc| tree.clear(oc)).unwrap();

    assert_eq!(db.depth(), 1);
    assert!(db.list_all_keys().is_empty());
    assert_eq!(db.store.extent_count(), 1);

    db.insert(b"after", b"clear");
    assert_eq!(db.get(b"after"), Some(b"clear".to_vec()));
}

#[test]
fn list_returns_key_value_pairs() {
    let mut db = TestDb::new(4096);
    for i in 0..10 {
        db.insert(&key(i), format!("v{}", i).as_bytes());
    }

    let page = db
        .with(|tree, oc| tree.list(oc, None, 4))
        .unwrap();
    assert_eq!(page.items.len(), 4);
    assert_eq!(page.items[0], (key(0), b"v0".to_vec()));
    assert_eq!(page.items[3], (key(3), b"v3".to_vec()));
    assert_eq!(page.next, Some(key(4)));

    let rest = db
        .with(|tree, oc| tree.list(oc, Some(&key(4)), usize::MAX))
        .unwrap();
    assert_eq!(rest.items.len(), 6);
    assert_eq!(rest.next, None);
}

#[test]
fn listing_from_a_mid_key_start_honors_lower_bound() {
    let mut db = TestDb::new(4096);
    for i in (0..20).step_by(2) {
        db.insert(&key(i), b"v");
    }

    // k0007 is absent; listing starts at the next present key
    let page = db.list_keys(Some(key(7)), 3);
    assert_eq!(page.items, vec![key(8), key(10), key(12)]);
}

#[test]
fn values_survive_structural_churn() {
    let mut db = TestDb::new(256);
    // interleave inserts, overwrites and removes across many transactions
    for round in 0..5 {
        for i in 0..60 {
            let value = format!("r{}-{}", round, i);
            db.insert(&key(i), value.as_bytes());
        }
        for i in (0..60).filter(|i| i % 3 == round % 3) {
            db.remove(&key(i));
        }
    }

    for i in 0..60 {
        let got = db.get(&key(i));
        if i % 3 == 4 % 3 {
            assert_eq!(got, None, "key {} should be gone", i);
        } else {
            assert_eq!(got, Some(format!("r4-{}", i).into_bytes()));
        }
    }
}
