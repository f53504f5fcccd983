//! # Treeline Configuration Constants
//!
//! This module centralizes the on-disk layout and tree fan-out constants,
//! grouping interdependent values together. Constants that derive from each
//! other are co-located to prevent mismatch bugs.
//!
//! ## Dependency Graph
//!
//! ```text
//! PAGE_SIZE (4096 bytes)
//!       │
//!       ├─> LEAF_MAX_KEYS (35)
//!       │     16-byte leaf header + 35 × 104-byte records = 3656 bytes
//!       │
//!       ├─> INTERNAL_MAX_KEYS (100)
//!       │     8-byte header + 101 × 12-byte slots = 1220 bytes
//!       │
//!       ├─> MIN_FILE_GROWTH (1 MiB)
//!       │     File growth rounds up to a PAGE_SIZE multiple
//!       │
//!       └─> WAL page-write payload size (one full page per record)
//!
//! DATA_SIZE (100 bytes)
//!       │
//!       └─> RECORD_SIZE (derived: 4-byte key + DATA_SIZE)
//!
//! LEAF_MAX_KEYS / INTERNAL_MAX_KEYS
//!       │
//!       └─> LEAF_MIN_KEYS / INTERNAL_MIN_KEYS
//!             Rebalance thresholds: a non-root node below its minimum is
//!             underful and must redistribute or merge.
//! ```
//!
//! ## Critical Invariants
//!
//! Enforced by compile-time assertions below:
//!
//! 1. A fully loaded leaf fits in a page.
//! 2. A fully loaded internal node (with its trailing child slot) fits in
//!    a page.
//! 3. The rebalance minima are the ceiling of half the respective maxima.

// ============================================================================
// PAGE LAYOUT
// ============================================================================

/// Size of each disk page in bytes. The fundamental unit of file I/O,
/// caching, and WAL after-images.
pub const PAGE_SIZE: usize = 4096;

/// Fixed record payload size. Shorter inserts are zero-padded to this.
pub const DATA_SIZE: usize = 100;

/// On-disk size of one leaf record: 4-byte key followed by the payload.
pub const RECORD_SIZE: usize = 4 + DATA_SIZE;

/// Leaf node header: num_keys(4) + is_leaf(4) + next_leaf(8).
pub const LEAF_HEADER_SIZE: usize = 16;

/// Internal node header: num_keys(4) + is_leaf(4).
pub const INTERNAL_HEADER_SIZE: usize = 8;

/// One internal slot: child pointer(8) + separator key(4). For `n` keys a
/// node occupies `n + 1` slots; the key field of the last slot is unused.
pub const INTERNAL_SLOT_SIZE: usize = 12;

// ============================================================================
// TREE FAN-OUT
// ============================================================================

/// Maximum records per leaf node.
pub const LEAF_MAX_KEYS: usize = 35;

/// Maximum separator keys per internal node (so at most 101 children).
pub const INTERNAL_MAX_KEYS: usize = 100;

/// Minimum records in a non-root leaf: ceil((LEAF_MAX_KEYS + 1) / 2).
pub const LEAF_MIN_KEYS: usize = (LEAF_MAX_KEYS + 1) / 2;

/// Minimum keys in a non-root internal node. Splitting a node with
/// INTERNAL_MAX_KEYS + 1 keys yields two halves of this size, and merging
/// an underful node (one below minimum) with a minimum sibling plus the
/// separator pulled down from the parent lands exactly at
/// INTERNAL_MAX_KEYS — any larger minimum would overflow the page.
pub const INTERNAL_MIN_KEYS: usize = (INTERNAL_MAX_KEYS + 1) / 2;

const _: () = assert!(
    LEAF_HEADER_SIZE + LEAF_MAX_KEYS * RECORD_SIZE <= PAGE_SIZE,
    "a full leaf node must fit in one page"
);

const _: () = assert!(
    INTERNAL_HEADER_SIZE + (INTERNAL_MAX_KEYS + 1) * INTERNAL_SLOT_SIZE <= PAGE_SIZE,
    "a full internal node must fit in one page"
);

const _: () = assert!(LEAF_MIN_KEYS == 18);
const _: () = assert!(INTERNAL_MIN_KEYS == 50);

const _: () = assert!(
    (LEAF_MIN_KEYS - 1) + LEAF_MIN_KEYS <= LEAF_MAX_KEYS,
    "a leaf merge must fit in one node"
);

const _: () = assert!(
    (INTERNAL_MIN_KEYS - 1) + 1 + INTERNAL_MIN_KEYS <= INTERNAL_MAX_KEYS,
    "an internal merge (with the pulled-down separator) must fit in one node"
);

// ============================================================================
// PAGE ADDRESSING
// ============================================================================

/// Pages are identified by their byte offset in the backing file.
/// `INVALID_PAGE_ID` is the "no page" sentinel used for the empty-tree
/// root, the terminal leaf's next pointer, and the empty free list.
pub const INVALID_PAGE_ID: i64 = -1;

// ============================================================================
// METADATA PAGE (page 0)
// ============================================================================

/// Byte offset of `root_offset` within page 0.
pub const META_ROOT_OFFSET: usize = 0;

/// Byte offset of `next_page_offset` within page 0.
pub const META_NEXT_PAGE: usize = 8;

/// Byte offset of `free_list_head` within page 0.
pub const META_FREE_LIST_HEAD: usize = 16;

/// A freed page stores the next free page's offset in its first 8 bytes.
pub const FREE_PAGE_NEXT_OFFSET: usize = 0;

// ============================================================================
// FILE GROWTH
// ============================================================================

/// Floor for geometric file growth. Growing by at least
/// max(2 × current, 1 MiB) amortizes remap cost to O(1) per allocation.
pub const MIN_FILE_GROWTH: usize = 1 << 20;

// ============================================================================
// BUFFER POOL
// ============================================================================

/// Default number of page frames (1024 frames = 4 MiB of cache).
pub const DEFAULT_POOL_SIZE: usize = 1024;

// ============================================================================
// WRITE-AHEAD LOG
// ============================================================================

/// WAL file magic: "WAL1" in ASCII, read as a little-endian u32.
pub const WAL_MAGIC: u32 = 0x5741_4C31;

/// WAL format version.
pub const WAL_VERSION: u32 = 1;

/// WAL file header size: magic(4) + version(4) + checkpoint_lsn(8).
pub const WAL_FILE_HEADER_SIZE: usize = 16;

/// Log record header size: lsn(8) + type(4) + reserved(4) + page_id(8) +
/// data_len(4) + checksum(4).
pub const LOG_RECORD_HEADER_SIZE: usize = 32;
