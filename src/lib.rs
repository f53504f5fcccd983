//! # Treeline — Persistent B+ Tree Key-Value Index
//!
//! Treeline is a single-process, disk-backed B+ tree index: fixed-size
//! records keyed by 32-bit integers, with point lookups, range scans, and
//! deletes that rebalance. The index survives process restarts, and — with
//! the write-ahead log enabled — sudden crashes of the host.
//!
//! ## Quick Start
//!
//! ```ignore
//! use treeline::BPlusTree;
//!
//! let mut tree = BPlusTree::open("my_index.idx")?;
//!
//! tree.insert(42, b"hello")?;
//! assert_eq!(tree.search(42)?, Some(b"hello".to_vec()));
//!
//! for (key, value) in tree.range_query(0, 100)? {
//!     println!("{key} => {}", String::from_utf8_lossy(&value));
//! }
//!
//! tree.close()?;
//! ```
//!
//! ## Architecture
//!
//! Four components, stacked; arrows point toward dependencies:
//!
//! ```text
//!  BPlusTree  ──►  BufferPool  ──►  DiskManager
//!        \              │
//!         └──────────►  WriteAheadLog
//! ```
//!
//! - **DiskManager**: one memory-mapped backing file, carved into 4 KiB
//!   pages addressed by byte offset; geometric growth; an on-disk free
//!   list of reclaimed pages; three metadata words on page 0.
//! - **BufferPool**: a fixed number of heap-owned page frames with
//!   pin/unpin accounting, LRU eviction of unpinned frames, and dirty
//!   write-back that always logs to the WAL first.
//! - **WriteAheadLog**: an append-only file of CRC-protected redo
//!   records (full page after-images plus checkpoint markers), replayed
//!   on open and truncated at checkpoints.
//! - **BPlusTree**: interprets pages as leaf or internal nodes and
//!   implements descent, split-on-insert, redistribute-or-merge on
//!   delete, root shrink, and leaf-chained range scans.
//!
//! ## File Layout
//!
//! ```text
//! my_index.idx        # data file: page 0 metadata, then tree pages
//! my_index.idx.wal    # write-ahead log: 16-byte header + redo records
//! ```
//!
//! ## Durability Model
//!
//! The WAL is redo-only: every dirty page is logged (and the log fsynced)
//! before the page itself is written in place. If the process dies
//! between those two steps, reopening the tree replays the log; callers
//! observe no error. A checkpoint flushes everything and truncates the
//! log. There is no undo logging and no transactional rollback.
//!
//! ## Concurrency
//!
//! None. Every operation runs to completion on the caller's thread, and a
//! tree must not be shared between threads without external
//! serialization. Each tree instance exclusively owns its backing file,
//! pool, and log, so multiple trees coexist in one process freely.
//!
//! ## Module Overview
//!
//! - [`btree`]: node views and the [`BPlusTree`] public surface
//! - [`storage`]: disk manager, buffer pool, and write-ahead log
//! - [`config`]: page layout, fan-out, and format constants

pub mod btree;
pub mod config;
pub mod storage;

pub use btree::{BPlusTree, TreeStats};
