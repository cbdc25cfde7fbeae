//! B+ tree invariants under bulk insert, lookup, and removal, with node
//! capacity forced down to exercise splits, merges, and redistributes.

use std::sync::Arc;

use rand::prelude::*;
use substrate::btree::{BPlusTree, KeyManager};
use substrate::disk::DiskManager;
use substrate::record::{Column, Field, Row, Schema, TypeId};
use substrate::{
    BufferPoolManager, RowId, CATALOG_META_PAGE_ID, DEFAULT_BUFFER_POOL_SIZE, INDEX_ROOTS_PAGE_ID,
};
use tempfile::tempdir;

fn open_pool(path: &std::path::Path) -> Arc<BufferPoolManager> {
    let disk = DiskManager::open(path).unwrap();
    let fresh = disk.is_fresh();
    let bpm = Arc::new(BufferPoolManager::new(DEFAULT_BUFFER_POOL_SIZE, disk));
    if fresh {
        let catalog_page = bpm.new_page().unwrap();
        assert_eq!(catalog_page.page_id(), CATALOG_META_PAGE_ID);
        let roots_page = bpm.new_page().unwrap();
        assert_eq!(roots_page.page_id(), INDEX_ROOTS_PAGE_ID);
    }
    bpm
}

fn int_tree(bpm: &Arc<BufferPoolManager>, leaf_max: u32, internal_max: u32) -> BPlusTree {
    let schema = Arc::new(Schema::new(vec![Column::new_scalar(
        "k",
        TypeId::Int,
        0,
        false,
        false,
    )]));
    let km = KeyManager::new(schema).unwrap();
    BPlusTree::new(0, Arc::clone(bpm), km, leaf_max, internal_max).unwrap()
}

fn key(tree: &BPlusTree, v: i32) -> Vec<u8> {
    tree.key_manager()
        .encode(&Row::new(vec![Field::Int(v)]))
        .unwrap()
}

#[test]
fn bulk_insert_lookup_and_remove_keep_the_tree_sound() {
    let dir = tempdir().unwrap();
    let bpm = open_pool(&dir.path().join("t.db"));
    let mut tree = int_tree(&bpm, 17, 17);

    let n: i32 = 10_000;
    let mut rng = StdRng::seed_from_u64(0xB7EE);
    let mut insert_order: Vec<i32> = (0..n).collect();
    insert_order.shuffle(&mut rng);
    for &v in &insert_order {
        let k = key(&tree, v);
        assert!(tree.insert(&k, RowId::new(v, v as u32)).unwrap());
    }
    assert!(tree.check(), "insert leaked a pin");
    tree.check_integrity().unwrap();

    let mut lookup_order: Vec<i32> = (0..n).collect();
    lookup_order.shuffle(&mut rng);
    for &v in &lookup_order {
        let found = tree.get_value(&key(&tree, v)).unwrap();
        assert_eq!(found, Some(RowId::new(v, v as u32)), "key {v} missing");
    }
    assert!(tree.check());

    let mut delete_order: Vec<i32> = (0..n).collect();
    delete_order.shuffle(&mut rng);
    let (removed, kept) = delete_order.split_at(n as usize / 2);
    for &v in removed {
        tree.remove(&key(&tree, v)).unwrap();
    }
    tree.check_integrity().unwrap();
    for &v in removed {
        assert_eq!(tree.get_value(&key(&tree, v)).unwrap(), None);
    }
    for &v in kept {
        assert_eq!(
            tree.get_value(&key(&tree, v)).unwrap(),
            Some(RowId::new(v, v as u32))
        );
    }
    assert!(tree.check(), "remove leaked a pin");
}

#[test]
fn duplicate_keys_are_rejected_without_modifying_the_tree() {
    let dir = tempdir().unwrap();
    let bpm = open_pool(&dir.path().join("t.db"));
    let mut tree = int_tree(&bpm, 17, 17);
    for v in 0..200 {
        assert!(tree.insert(&key(&tree, v), RowId::new(v, 0)).unwrap());
    }
    for v in 0..200 {
        assert!(!tree.insert(&key(&tree, v), RowId::new(v, 99)).unwrap());
        // The original payload survives the rejected insert.
        assert_eq!(
            tree.get_value(&key(&tree, v)).unwrap(),
            Some(RowId::new(v, 0))
        );
    }
    tree.check_integrity().unwrap();
}

#[test]
fn iteration_yields_keys_in_increasing_order() {
    let dir = tempdir().unwrap();
    let bpm = open_pool(&dir.path().join("t.db"));
    let mut tree = int_tree(&bpm, 17, 17);
    let mut values: Vec<i32> = (0..2_000).collect();
    values.shuffle(&mut StdRng::seed_from_u64(7));
    for &v in &values {
        tree.insert(&key(&tree, v), RowId::new(v, 0)).unwrap();
    }
    let decoded: Vec<i32> = tree
        .iter()
        .unwrap()
        .map(|entry| {
            let (k, _) = entry.unwrap();
            match tree.key_manager().decode(&k).unwrap().field(0) {
                Field::Int(v) => *v,
                _ => unreachable!(),
            }
        })
        .collect();
    let expected: Vec<i32> = (0..2_000).collect();
    assert_eq!(decoded, expected);
    assert!(tree.check());
}

#[test]
fn seeded_iteration_starts_at_the_first_key_not_below_the_seed() {
    let dir = tempdir().unwrap();
    let bpm = open_pool(&dir.path().join("t.db"));
    let mut tree = int_tree(&bpm, 17, 17);
    for v in (0..500).map(|v| v * 2) {
        tree.insert(&key(&tree, v), RowId::new(v, 0)).unwrap();
    }
    // 301 is absent; iteration must begin at 302.
    let first = tree
        .iter_from(&key(&tree, 301))
        .unwrap()
        .next()
        .unwrap()
        .unwrap();
    let row = tree.key_manager().decode(&first.0).unwrap();
    assert_eq!(row.field(0), &Field::Int(302));
}

#[test]
fn removing_absent_keys_is_a_no_op() {
    let dir = tempdir().unwrap();
    let bpm = open_pool(&dir.path().join("t.db"));
    let mut tree = int_tree(&bpm, 17, 17);
    tree.remove(&key(&tree, 3)).unwrap();
    assert!(tree.is_empty());
    for v in 0..50 {
        tree.insert(&key(&tree, v), RowId::new(v, 0)).unwrap();
    }
    tree.remove(&key(&tree, 999)).unwrap();
    tree.check_integrity().unwrap();
    for v in 0..50 {
        assert!(tree.get_value(&key(&tree, v)).unwrap().is_some());
    }
}

#[test]
fn removing_every_key_empties_the_tree() {
    let dir = tempdir().unwrap();
    let bpm = open_pool(&dir.path().join("t.db"));
    let mut tree = int_tree(&bpm, 4, 4);
    for v in 0..300 {
        tree.insert(&key(&tree, v), RowId::new(v, 0)).unwrap();
    }
    let root = tree.root_page_id();
    assert!(root >= 0);
    for v in 0..300 {
        tree.remove(&key(&tree, v)).unwrap();
    }
    assert!(tree.is_empty());
    assert!(tree.check());
    // A reopened handle agrees that the tree is gone.
    let reopened = int_tree(&bpm, 4, 4);
    assert!(reopened.is_empty());
}

#[test]
fn destroy_frees_every_page_of_the_tree() {
    let dir = tempdir().unwrap();
    let bpm = open_pool(&dir.path().join("t.db"));
    let mut tree = int_tree(&bpm, 4, 4);
    for v in 0..500 {
        tree.insert(&key(&tree, v), RowId::new(v, 0)).unwrap();
    }
    let root = tree.root_page_id();
    tree.destroy().unwrap();
    assert!(tree.is_empty());
    assert!(bpm.is_page_free(root));
    assert!(bpm.check_all_unpinned());
}

#[test]
fn tree_contents_survive_a_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("t.db");
    {
        let bpm = open_pool(&path);
        let mut tree = int_tree(&bpm, 17, 17);
        for v in 0..3_000 {
            tree.insert(&key(&tree, v), RowId::new(v, v as u32)).unwrap();
        }
        bpm.close().unwrap();
    }
    let bpm = open_pool(&path);
    let tree = int_tree(&bpm, 17, 17);
    assert!(!tree.is_empty());
    for v in 0..3_000 {
        assert_eq!(
            tree.get_value(&key(&tree, v)).unwrap(),
            Some(RowId::new(v, v as u32)),
            "key {v} lost across reopen"
        );
    }
    tree.check_integrity().unwrap();
}
