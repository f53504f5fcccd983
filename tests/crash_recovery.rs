//! # Crash Safety and Recovery Tests
//!
//! Simulates crashes by leaking the tree (`mem::forget` skips the clean
//! shutdown path entirely) and, where the scenario calls for it, by
//! clobbering data pages behind the tree's back so only WAL replay can
//! restore them. Also covers WAL-disabled persistence and free-list page
//! reuse.

use std::io::{Seek, SeekFrom, Write};

use tempfile::tempdir;
use treeline::config::{DEFAULT_POOL_SIZE, PAGE_SIZE};
use treeline::storage::{DiskManager, WriteAheadLog};
use treeline::BPlusTree;

/// Overwrites one page of the data file with zeros, as if the in-place
/// write after a WAL append never reached the file.
fn clobber_page(path: &std::path::Path, offset: u64) {
    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .open(path)
        .unwrap();
    file.seek(SeekFrom::Start(offset)).unwrap();
    file.write_all(&[0u8; PAGE_SIZE]).unwrap();
    file.sync_all().unwrap();
}

#[test]
fn flushed_inserts_survive_a_crash() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("t.idx");

    {
        let mut tree = BPlusTree::open(&path).unwrap();
        for i in 0..500 {
            tree.insert(i, format!("r{}", i).as_bytes()).unwrap();
        }
        tree.sync().unwrap();
        std::mem::forget(tree);
    }

    let mut tree = BPlusTree::open(&path).unwrap();
    for i in 0..500 {
        assert_eq!(
            tree.search(i).unwrap(),
            Some(format!("r{}", i).into_bytes()),
            "flushed key {} lost in the crash",
            i
        );
    }

    // Structural sanity: the full scan is intact and sorted.
    let all = tree.range_query(0, 499).unwrap();
    assert_eq!(all.len(), 500);
    for pair in all.windows(2) {
        assert!(pair[0].0 < pair[1].0);
    }
}

#[test]
fn wal_replay_restores_a_lost_page_write() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("t.idx");

    {
        let mut tree = BPlusTree::open(&path).unwrap();
        for i in 0..100 {
            tree.insert(i, format!("w{}", i).as_bytes()).unwrap();
        }
        tree.sync().unwrap();
        std::mem::forget(tree);
    }

    // The first allocated page holds the leftmost leaf. Zero it on disk;
    // only the log still has its contents.
    clobber_page(&path, PAGE_SIZE as u64);

    let mut tree = BPlusTree::open(&path).unwrap();
    for i in 0..100 {
        assert_eq!(
            tree.search(i).unwrap(),
            Some(format!("w{}", i).into_bytes()),
            "key {} not recovered from the WAL",
            i
        );
    }
}

#[test]
fn unflushed_tail_is_lost_but_the_tree_stays_valid() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("t.idx");

    {
        let mut tree = BPlusTree::open(&path).unwrap();
        for i in 0..500 {
            tree.insert(i, b"acknowledged").unwrap();
        }
        tree.sync().unwrap();

        // Unacknowledged tail: overwrites that never get flushed.
        for i in 0..500 {
            tree.insert(i, b"tail").unwrap();
        }
        std::mem::forget(tree);
    }

    let mut tree = BPlusTree::open(&path).unwrap();
    let all = tree.range_query(0, 499).unwrap();
    assert_eq!(all.len(), 500);
    for (i, (k, v)) in all.iter().enumerate() {
        assert_eq!(*k, i as i32);
        assert_eq!(v, b"acknowledged", "key {} shows an unflushed write", k);
    }
}

#[test]
fn clean_close_truncates_the_wal() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("t.idx");
    let wal_path = dir.path().join("t.idx.wal");

    let mut tree = BPlusTree::open(&path).unwrap();
    for i in 0..200 {
        tree.insert(i, b"data").unwrap();
    }
    tree.close().unwrap();

    // Just the 16-byte header remains after the shutdown checkpoint.
    assert_eq!(std::fs::metadata(&wal_path).unwrap().len(), 16);
}

#[test]
fn explicit_checkpoint_truncates_and_preserves_data() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("t.idx");
    let wal_path = dir.path().join("t.idx.wal");

    let mut tree = BPlusTree::open(&path).unwrap();
    for i in 0..300 {
        tree.insert(i, format!("c{}", i).as_bytes()).unwrap();
    }
    tree.checkpoint().unwrap();
    assert_eq!(std::fs::metadata(&wal_path).unwrap().len(), 16);

    // A crash after the checkpoint loses nothing.
    std::mem::forget(tree);
    let mut tree = BPlusTree::open(&path).unwrap();
    for i in 0..300 {
        assert_eq!(
            tree.search(i).unwrap(),
            Some(format!("c{}", i).into_bytes())
        );
    }
}

#[test]
fn recovery_is_idempotent_at_the_storage_level() {
    let dir = tempdir().unwrap();
    let idx = dir.path().join("t.idx");
    let wal_file = dir.path().join("t.idx.wal");

    let mut disk = DiskManager::open(&idx).unwrap();
    let off = disk.allocate_page().unwrap();

    let mut wal = WriteAheadLog::open(&wal_file).unwrap();
    wal.log_page_write(off, &[0x5Au8; PAGE_SIZE]).unwrap();
    wal.flush().unwrap();

    assert_eq!(wal.recover(&mut disk).unwrap(), 1);
    assert_eq!(wal.recover(&mut disk).unwrap(), 0);

    // A fresh handle over the truncated log also applies nothing.
    drop(wal);
    let mut wal = WriteAheadLog::open(&wal_file).unwrap();
    assert_eq!(wal.recover(&mut disk).unwrap(), 0);
    assert!(disk.page(off).unwrap().iter().all(|&b| b == 0x5A));
}

#[test]
fn recovery_extends_the_frontier_without_draining_the_free_list() {
    let dir = tempdir().unwrap();
    let idx = dir.path().join("t.idx");
    let wal_file = dir.path().join("t.idx.wal");

    let mut disk = DiskManager::open(&idx).unwrap();
    let mut wal = WriteAheadLog::open(&wal_file).unwrap();

    let a = disk.allocate_page().unwrap();
    let b = disk.allocate_page().unwrap();

    // A free, then a checkpoint: the free-list head is durable and the
    // log is truncated.
    disk.free_page(a).unwrap();
    wal.log_page_write(b, &[0x21u8; PAGE_SIZE]).unwrap();
    wal.begin_checkpoint().unwrap();
    wal.end_checkpoint().unwrap();

    // Allocate past the checkpointed frontier: the first allocation
    // reuses the freed page, the second grows the frontier.
    assert_eq!(disk.allocate_page().unwrap(), a);
    let c = disk.allocate_page().unwrap();
    wal.log_page_write(c, &[0x42u8; PAGE_SIZE]).unwrap();
    wal.flush().unwrap();

    // A second free with no further checkpoint, then a crash where the
    // frontier write covering `c` never became durable.
    disk.free_page(b).unwrap();
    disk.set_next_page_offset(c);
    disk.flush_metadata().unwrap();
    drop(wal);
    drop(disk);

    let mut disk = DiskManager::open(&idx).unwrap();
    assert_eq!(disk.free_list_head(), b);

    let mut wal = WriteAheadLog::open(&wal_file).unwrap();
    let applied = wal.recover(&mut disk).unwrap();

    // Only the post-checkpoint image replays, onto a re-extended file.
    assert_eq!(applied, 1);
    assert!(disk.next_page_offset() > c);
    assert!(disk.page(c).unwrap().iter().all(|&x| x == 0x42));

    // The free list survived recovery intact: the freed page is still
    // linked and comes back from the next allocation un-orphaned.
    assert_eq!(disk.free_list_head(), b);
    assert_eq!(disk.allocate_page().unwrap(), b);
}

#[test]
fn wal_disabled_tree_persists_across_clean_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("t.idx");

    {
        let mut tree = BPlusTree::open_with(&path, DEFAULT_POOL_SIZE, false).unwrap();
        for i in 0..50 {
            tree.insert(i, b"no_wal").unwrap();
        }
        tree.close().unwrap();
    }

    assert!(!dir.path().join("t.idx.wal").exists());

    let mut tree = BPlusTree::open_with(&path, DEFAULT_POOL_SIZE, false).unwrap();
    for i in 0..50 {
        assert_eq!(tree.search(i).unwrap(), Some(b"no_wal".to_vec()));
    }
}

#[test]
fn deleted_pages_are_reused_instead_of_growing_the_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("t.idx");

    let mut tree = BPlusTree::open(&path).unwrap();
    for i in 0..1000 {
        tree.insert(i, format!("a{}", i).as_bytes()).unwrap();
    }
    for i in 0..1000 {
        assert!(tree.delete(i).unwrap());
    }
    assert!(tree.is_empty());
    tree.sync().unwrap();
    let len_after_drain = std::fs::metadata(&path).unwrap().len();

    // The second batch is the same shape as the first, so the free list
    // must cover it entirely.
    for i in 2000..3000 {
        tree.insert(i, format!("b{}", i).as_bytes()).unwrap();
    }
    tree.sync().unwrap();

    assert_eq!(std::fs::metadata(&path).unwrap().len(), len_after_drain);
    for i in 2000..3000 {
        assert_eq!(
            tree.search(i).unwrap(),
            Some(format!("b{}", i).into_bytes())
        );
    }
}

#[test]
fn crash_between_checkpoints_only_replays_the_delta() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("t.idx");

    {
        let mut tree = BPlusTree::open(&path).unwrap();
        for i in 0..100 {
            tree.insert(i, b"first").unwrap();
        }
        tree.checkpoint().unwrap();

        for i in 100..150 {
            tree.insert(i, b"second").unwrap();
        }
        tree.sync().unwrap();
        std::mem::forget(tree);
    }

    let mut tree = BPlusTree::open(&path).unwrap();
    for i in 0..100 {
        assert_eq!(tree.search(i).unwrap(), Some(b"first".to_vec()));
    }
    for i in 100..150 {
        assert_eq!(tree.search(i).unwrap(), Some(b"second".to_vec()));
    }
}
