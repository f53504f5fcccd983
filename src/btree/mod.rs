//! # B+ Tree Index
//!
//! A disk-backed B+ tree over `i32` keys and fixed 100-byte payloads. All
//! records live in leaf nodes; internal nodes route descent through
//! separator keys. Leaves are chained in key order for range scans.
//!
//! ## Node Types
//!
//! Every tree page starts with `num_keys` and an `is_leaf` flag, so a raw
//! page classifies itself before a typed view is built over it:
//!
//! - **Leaf** (`leaf`): sorted `[key | payload]` records plus a
//!   `next_leaf` chain pointer.
//! - **Internal** (`internal`): `[child | key]` slots; `n` keys guard
//!   `n + 1` children.
//!
//! ## Fan-out
//!
//! With 4 KiB pages a leaf holds up to 35 records and an internal node up
//! to 100 keys (101 children), so a three-level tree already addresses
//! millions of records.
//!
//! ## Balancing
//!
//! Inserts split overfull nodes and promote separators; deletes
//! redistribute single entries between siblings or merge nodes, shrinking
//! the root when it drains. Non-root nodes stay within
//! [`LEAF_MIN_KEYS`](crate::config::LEAF_MIN_KEYS) /
//! [`INTERNAL_MIN_KEYS`](crate::config::INTERNAL_MIN_KEYS) and their
//! maxima, and all leaves sit at the same depth.

mod internal;
mod leaf;
mod tree;

pub use internal::{InternalPage, InternalPageMut};
pub use leaf::{LeafPage, LeafPageMut, SearchResult};
pub use tree::{BPlusTree, TreeStats};

/// Reads the `is_leaf` flag at byte 4 of any tree page.
pub fn page_is_leaf(page: &[u8]) -> bool {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&page[4..8]);
    i32::from_le_bytes(buf) == 1
}
