//! # Storage Layer
//!
//! The foundational storage layer for the index: a memory-mapped page file,
//! a pin-counted LRU buffer pool, and a redo-only write-ahead log.
//!
//! ## Architecture
//!
//! ```text
//!  BPlusTree  ──►  BufferPool  ──►  DiskManager
//!        \              │
//!         └──────────►  WriteAheadLog
//! ```
//!
//! - [`DiskManager`] owns the backing `.idx` file, mapping it into memory
//!   and handing out page views by byte offset. It grows the file
//!   geometrically and recycles freed pages through an on-disk free list
//!   headed on the metadata page.
//! - [`BufferPool`] caches pages in heap-owned frames with a pin/unpin
//!   discipline and LRU eviction. Copying page bytes into frames insulates
//!   the tree from the mmap remap hazard, and the pool enforces the WAL
//!   protocol: log the after-image, fsync the log, only then touch the
//!   mapped page.
//! - [`WriteAheadLog`] is an append-only `.idx.wal` file of CRC-protected
//!   redo records, replayed once on open and truncated at checkpoints.
//!
//! ## Safety Model
//!
//! Mapped page views are invalidated whenever the file grows. The disk
//! manager's growth paths take `&mut self`, so the borrow checker rejects
//! any attempt to hold a view across them; no epochs, guards, or reference
//! counting are needed. Everything above the disk manager works on frame
//! buffers and never sees the mapping.
//!
//! ## Ownership
//!
//! Components hold no references to one another. The buffer pool borrows
//! the disk manager (and optionally the log) per call, so a single owner —
//! the tree — can hold all three as plain fields.

mod disk;
mod pool;
mod wal;

pub use disk::DiskManager;
pub use pool::BufferPool;
pub use wal::{LogRecordType, WriteAheadLog};
