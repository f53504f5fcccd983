//! # End-to-End Tree Operation Tests
//!
//! Exercises the public surface of the index through full scenarios:
//! point lookups, range scans, bulk insert with splits, bulk delete with
//! rebalancing, and persistence across clean close/reopen cycles.

use tempfile::tempdir;
use treeline::BPlusTree;

#[test]
fn lifecycle_of_a_single_record() {
    let dir = tempdir().unwrap();
    let mut tree = BPlusTree::open(dir.path().join("t.idx")).unwrap();

    assert_eq!(tree.search(42).unwrap(), None);

    tree.insert(42, b"x").unwrap();
    assert_eq!(tree.search(42).unwrap(), Some(b"x".to_vec()));

    assert!(tree.delete(42).unwrap());
    assert_eq!(tree.search(42).unwrap(), None);
}

#[test]
fn range_query_returns_exact_slice() {
    let dir = tempdir().unwrap();
    let mut tree = BPlusTree::open(dir.path().join("t.idx")).unwrap();

    for i in 1..=50 {
        tree.insert(i, format!("d{}", i).as_bytes()).unwrap();
    }

    let results = tree.range_query(5, 10).unwrap();
    let expected: Vec<(i32, Vec<u8>)> = (5..=10)
        .map(|i| (i, format!("d{}", i).into_bytes()))
        .collect();
    assert_eq!(results, expected);
}

#[test]
fn five_thousand_sequential_inserts_split_both_node_kinds() {
    let dir = tempdir().unwrap();
    let mut tree = BPlusTree::open(dir.path().join("t.idx")).unwrap();

    for i in 0..5000 {
        tree.insert(i, format!("r{}", i).as_bytes()).unwrap();
    }

    for i in 0..5000 {
        assert_eq!(
            tree.search(i).unwrap(),
            Some(format!("r{}", i).into_bytes()),
            "key {} missing",
            i
        );
    }
}

#[test]
fn reverse_deletion_empties_the_tree() {
    let dir = tempdir().unwrap();
    let mut tree = BPlusTree::open(dir.path().join("t.idx")).unwrap();

    for i in 0..500 {
        tree.insert(i, format!("v{}", i).as_bytes()).unwrap();
    }
    for i in (0..500).rev() {
        assert!(tree.delete(i).unwrap(), "delete {} failed", i);
    }

    assert!(tree.is_empty());
}

#[test]
fn deleting_a_band_leaves_the_rest_scannable() {
    let dir = tempdir().unwrap();
    let mut tree = BPlusTree::open(dir.path().join("t.idx")).unwrap();

    for i in 0..100 {
        tree.insert(i, format!("v{}", i).as_bytes()).unwrap();
    }
    for i in 20..40 {
        assert!(tree.delete(i).unwrap());
    }

    let results = tree.range_query(10, 50).unwrap();
    assert_eq!(results.len(), 21);

    let keys: Vec<i32> = results.iter().map(|(k, _)| *k).collect();
    let expected: Vec<i32> = (10..20).chain(40..=50).collect();
    assert_eq!(keys, expected);
}

#[test]
fn scans_stay_sorted_under_random_churn() {
    let dir = tempdir().unwrap();
    let mut tree = BPlusTree::open(dir.path().join("t.idx")).unwrap();

    // Deterministic pseudo-random order without an RNG dependency.
    let mut keys: Vec<i32> = (0..2000).map(|i| (i * 7919) % 2000).collect();
    keys.dedup();
    for &k in &keys {
        tree.insert(k, format!("c{}", k).as_bytes()).unwrap();
    }
    for &k in keys.iter().filter(|k| *k % 3 == 0) {
        tree.delete(k).unwrap();
    }

    let results = tree.range_query(i32::MIN, i32::MAX).unwrap();
    for pair in results.windows(2) {
        assert!(pair[0].0 < pair[1].0, "scan out of order");
    }
    for (k, v) in &results {
        assert_ne!(k % 3, 0, "deleted key {} reappeared", k);
        assert_eq!(v, format!("c{}", k).as_bytes());
    }
}

#[test]
fn second_delete_of_a_key_is_not_found_and_changes_nothing() {
    let dir = tempdir().unwrap();
    let mut tree = BPlusTree::open(dir.path().join("t.idx")).unwrap();

    for i in 0..100 {
        tree.insert(i, format!("v{}", i).as_bytes()).unwrap();
    }

    assert!(tree.delete(50).unwrap());
    let after_first = tree.range_query(0, 99).unwrap();

    assert!(!tree.delete(50).unwrap());
    let after_second = tree.range_query(0, 99).unwrap();

    assert_eq!(after_first, after_second);
}

#[test]
fn upserts_never_split_or_grow() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("t.idx");
    let mut tree = BPlusTree::open(&path).unwrap();

    for i in 0..1000 {
        tree.insert(i, b"first").unwrap();
    }
    tree.sync().unwrap();
    let len_before = std::fs::metadata(&path).unwrap().len();

    for i in 0..1000 {
        tree.insert(i, b"second").unwrap();
    }
    tree.sync().unwrap();

    assert_eq!(std::fs::metadata(&path).unwrap().len(), len_before);
    for i in 0..1000 {
        assert_eq!(tree.search(i).unwrap(), Some(b"second".to_vec()));
    }
}

#[test]
fn clean_close_persists_everything() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("t.idx");

    {
        let mut tree = BPlusTree::open(&path).unwrap();
        for i in 0..2500 {
            tree.insert(i, format!("p{}", i).as_bytes()).unwrap();
        }
        tree.close().unwrap();
    }

    let mut tree = BPlusTree::open(&path).unwrap();
    for i in 0..2500 {
        assert_eq!(
            tree.search(i).unwrap(),
            Some(format!("p{}", i).into_bytes())
        );
    }

    let all = tree.range_query(0, 2499).unwrap();
    assert_eq!(all.len(), 2500);
}

#[test]
fn two_trees_in_one_process_do_not_interfere() {
    let dir = tempdir().unwrap();
    let mut a = BPlusTree::open(dir.path().join("a.idx")).unwrap();
    let mut b = BPlusTree::open(dir.path().join("b.idx")).unwrap();

    a.insert(1, b"from_a").unwrap();
    b.insert(1, b"from_b").unwrap();

    assert_eq!(a.search(1).unwrap(), Some(b"from_a".to_vec()));
    assert_eq!(b.search(1).unwrap(), Some(b"from_b".to_vec()));

    a.delete(1).unwrap();
    assert_eq!(b.search(1).unwrap(), Some(b"from_b".to_vec()));
}
