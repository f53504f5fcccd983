//! # B+ Tree
//!
//! This module implements the persistent B+ tree that ties the storage
//! layer together: descent, insert with split propagation, delete with
//! redistribute-or-merge rebalancing, leaf-chained range scans, and the
//! open/recover/checkpoint lifecycle.
//!
//! ## Structure
//!
//! ```text
//!                    [Internal @ 12288]
//!                    /       |        \
//!        [Leaf @4096]  [Leaf @8192]  [Leaf @16384]
//!              |------------>|------------>|        (next_leaf chain)
//! ```
//!
//! All records live in leaves; internal nodes hold separator keys and
//! child page offsets. All leaves sit at the same depth, and the leaf
//! chain enumerates every key in ascending order.
//!
//! ## Insert
//!
//! Descend to the target leaf. An existing key is overwritten in place
//! (upsert). A full leaf splits: the 36 records are materialized in
//! order, the left half keeps ceil(36/2) = 18, the rest move to a fresh
//! leaf spliced into the chain, and the new leaf's first key goes up as
//! the separator. A full internal node splits around its middle key,
//! which is promoted rather than copied. A split that unwinds past the
//! root installs a new internal root.
//!
//! ## Delete
//!
//! Descend to the leaf and close the gap. A node that drops below its
//! minimum reports underflow to its parent, which rebalances: borrow one
//! entry from the left sibling, else from the right, else merge into the
//! left sibling (or the right sibling into the child when no left
//! sibling exists) and drop the separator between them. An internal root
//! left with zero keys is replaced by its sole child; a drained root
//! leaf empties the tree.
//!
//! ## Pin Discipline
//!
//! Every page access pins through the buffer pool and unpins at a fixed
//! boundary inside the same helper; sibling contents are staged through
//! owned buffers during rebalancing so no two frame borrows overlap. No
//! pin outlives the call that acquired it.
//!
//! ## Concurrency
//!
//! Single-threaded by contract. Every operation runs to completion on
//! the caller's thread; concurrent callers need external serialization.

use std::path::{Path, PathBuf};

use eyre::{ensure, Result};
use tracing::debug;

use super::internal::{InternalPage, InternalPageMut};
use super::leaf::{LeafPage, LeafPageMut, SearchResult};
use super::page_is_leaf;
use crate::config::{
    DATA_SIZE, DEFAULT_POOL_SIZE, INTERNAL_MAX_KEYS, INTERNAL_MIN_KEYS, INVALID_PAGE_ID,
    LEAF_MAX_KEYS, LEAF_MIN_KEYS, PAGE_SIZE,
};
use crate::storage::{BufferPool, DiskManager, WriteAheadLog};

/// Buffer pool and WAL counters, exposed for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TreeStats {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub wal_bytes: u64,
    pub wal_records: u64,
    pub wal_enabled: bool,
}

/// Where a descent step leads from a given node.
enum NodeStep {
    Leaf,
    Internal { child_idx: usize, child_off: i64 },
}

/// A persistent, disk-backed B+ tree index over `i32` keys and fixed
/// 100-byte payloads.
///
/// Each instance exclusively owns its index file, buffer pool, and WAL;
/// multiple trees coexist in one process without interference. Data
/// survives restarts, and with the WAL enabled (the default) it also
/// survives crashes: reopening replays the log transparently.
///
/// ```ignore
/// let mut tree = BPlusTree::open("my_index.idx")?;
/// tree.insert(42, b"hello world")?;
///
/// if let Some(value) = tree.search(42)? {
///     println!("{}", String::from_utf8_lossy(&value));
/// }
/// ```
pub struct BPlusTree {
    disk: DiskManager,
    pool: BufferPool,
    wal: Option<WriteAheadLog>,
    root_offset: i64,
    next_page_offset: i64,
    closed: bool,
}

impl BPlusTree {
    /// Opens (or creates) a tree with the default pool size and the WAL
    /// enabled.
    pub fn open<P: AsRef<Path>>(index_path: P) -> Result<Self> {
        Self::open_with(index_path, DEFAULT_POOL_SIZE, true)
    }

    /// Opens (or creates) a tree, running WAL recovery before anything
    /// else touches the file.
    pub fn open_with<P: AsRef<Path>>(
        index_path: P,
        pool_size: usize,
        wal_enabled: bool,
    ) -> Result<Self> {
        ensure!(pool_size > 0, "buffer pool needs at least one frame");

        let index_path = index_path.as_ref();
        let mut disk = DiskManager::open(index_path)?;

        let wal = if wal_enabled {
            let mut wal = WriteAheadLog::open(wal_path_for(index_path))?;
            wal.recover(&mut disk)?;
            Some(wal)
        } else {
            None
        };

        let mut tree = Self {
            disk,
            pool: BufferPool::new(pool_size),
            wal,
            root_offset: INVALID_PAGE_ID,
            next_page_offset: PAGE_SIZE as i64,
            closed: false,
        };
        tree.read_metadata();

        debug!(
            path = %index_path.display(),
            root_offset = tree.root_offset,
            wal_enabled,
            "tree.open"
        );
        Ok(tree)
    }

    /// Writes metadata, flushes every dirty page, and (with the WAL
    /// enabled) checkpoints so the log is left truncated. Also runs on
    /// drop, where errors are swallowed; call this to observe them.
    pub fn close(mut self) -> Result<()> {
        self.shutdown()
    }

    // -- Core operations -----------------------------------------------------

    /// Inserts a record, overwriting the payload if the key already
    /// exists. Payloads shorter than [`DATA_SIZE`] are zero-padded.
    pub fn insert(&mut self, key: i32, data: &[u8]) -> Result<()> {
        ensure!(
            data.len() <= DATA_SIZE,
            "payload length {} exceeds the {}-byte record limit",
            data.len(),
            DATA_SIZE
        );
        let mut padded = [0u8; DATA_SIZE];
        padded[..data.len()].copy_from_slice(data);

        if self.root_offset == INVALID_PAGE_ID {
            let off = self.alloc_page()?;
            {
                let page = self.pin(off)?;
                let mut leaf = LeafPageMut::init(page)?;
                leaf.insert_record_at(0, key, &padded)?;
            }
            self.unpin(off, true);
            self.root_offset = off;
            self.write_metadata()?;
            return Ok(());
        }

        let root = self.root_offset;
        if let Some((split_key, new_off)) = self.insert_recursive(root, key, &padded)? {
            let new_root = self.alloc_page()?;
            {
                let page = self.pin(new_root)?;
                let mut node = InternalPageMut::init(page)?;
                node.set_key_at(0, split_key)?;
                node.set_child_at(0, root)?;
                node.set_child_at(1, new_off)?;
                node.set_num_keys(1);
            }
            self.unpin(new_root, true);
            self.root_offset = new_root;
            self.write_metadata()?;
        }

        Ok(())
    }

    /// Point lookup. Returns the payload with trailing zero padding
    /// trimmed, or `None` when the key is absent.
    pub fn search(&mut self, key: i32) -> Result<Option<Vec<u8>>> {
        if self.root_offset == INVALID_PAGE_ID {
            return Ok(None);
        }

        let leaf_off = self.find_leaf(key)?;
        if leaf_off == INVALID_PAGE_ID {
            return Ok(None);
        }

        let result = {
            let page = self.pin(leaf_off)?;
            let leaf = LeafPage::from_page(page)?;
            match leaf.find_key(key) {
                SearchResult::Found(i) => Some(trim_payload(leaf.payload_at(i)?)),
                SearchResult::NotFound(_) => None,
            }
        };
        self.unpin(leaf_off, false);
        Ok(result)
    }

    /// Returns every record with `lower <= key <= upper` in ascending key
    /// order. An empty tree or a disjoint range yields an empty vector.
    pub fn range_query(&mut self, lower: i32, upper: i32) -> Result<Vec<(i32, Vec<u8>)>> {
        ensure!(
            lower <= upper,
            "invalid range: lower {} > upper {}",
            lower,
            upper
        );

        let mut results = Vec::new();
        if self.root_offset == INVALID_PAGE_ID {
            return Ok(results);
        }

        let mut leaf_off = self.find_leaf(lower)?;
        while leaf_off >= PAGE_SIZE as i64 {
            let (next, done) = {
                let page = self.pin(leaf_off)?;
                let leaf = LeafPage::from_page(page)?;
                let mut done = false;
                for i in 0..leaf.num_keys() {
                    let k = leaf.key_at(i)?;
                    if k > upper {
                        done = true;
                        break;
                    }
                    if k >= lower {
                        results.push((k, trim_payload(leaf.payload_at(i)?)));
                    }
                }
                (leaf.next_leaf(), done)
            };
            self.unpin(leaf_off, false);

            if done {
                break;
            }
            leaf_off = next;
        }

        Ok(results)
    }

    /// Deletes a key, rebalancing underful nodes. Returns `false` (and
    /// leaves the tree untouched) when the key is absent.
    pub fn delete(&mut self, key: i32) -> Result<bool> {
        if self.root_offset == INVALID_PAGE_ID {
            return Ok(false);
        }
        if self.search(key)?.is_none() {
            return Ok(false);
        }

        let root = self.root_offset;
        let underful = self.delete_recursive(root, key)?;
        if underful {
            self.shrink_root()?;
        }
        Ok(true)
    }

    // -- Maintenance ---------------------------------------------------------

    /// Flushes every dirty page (logging them first when the WAL is
    /// enabled) and syncs the data file.
    pub fn sync(&mut self) -> Result<()> {
        self.pool.flush_all_pages(&mut self.disk, self.wal.as_mut())
    }

    /// Forces a WAL checkpoint: flush all dirty pages between the marker
    /// pair, then truncate the log. A no-op when the WAL is disabled.
    pub fn checkpoint(&mut self) -> Result<()> {
        if self.wal.is_none() {
            return Ok(());
        }
        if let Some(wal) = self.wal.as_mut() {
            wal.begin_checkpoint()?;
        }
        self.pool.flush_all_pages(&mut self.disk, self.wal.as_mut())?;
        if let Some(wal) = self.wal.as_mut() {
            wal.end_checkpoint()?;
        }
        Ok(())
    }

    // -- Queries -------------------------------------------------------------

    pub fn is_empty(&self) -> bool {
        self.root_offset == INVALID_PAGE_ID
    }

    pub fn path(&self) -> &Path {
        self.disk.path()
    }

    pub fn stats(&self) -> TreeStats {
        TreeStats {
            hits: self.pool.hits(),
            misses: self.pool.misses(),
            hit_rate: self.pool.hit_rate(),
            wal_bytes: self.wal.as_ref().map_or(0, |w| w.bytes_written()),
            wal_records: self.wal.as_ref().map_or(0, |w| w.records_written()),
            wal_enabled: self.wal.is_some(),
        }
    }

    // -- Page access helpers -------------------------------------------------

    fn pin(&mut self, page_id: i64) -> Result<&mut [u8]> {
        self.pool
            .fetch_page(&mut self.disk, self.wal.as_mut(), page_id)
    }

    fn unpin(&mut self, page_id: i64, dirty: bool) {
        self.pool.unpin_page(page_id, dirty);
    }

    /// Allocates a page through the pool (so it is born dirty and will be
    /// flushed) and refreshes the cached frontier.
    fn alloc_page(&mut self) -> Result<i64> {
        let (page_id, _) = self.pool.new_page(&mut self.disk, self.wal.as_mut())?;
        self.pool.unpin_page(page_id, true);
        self.next_page_offset = self.disk.next_page_offset();
        Ok(page_id)
    }

    /// Discards a page from the pool and returns it to the disk free
    /// list.
    fn dealloc_page(&mut self, page_id: i64) -> Result<()> {
        self.pool.delete_page(page_id);
        self.disk.free_page(page_id)
    }

    // -- Metadata ------------------------------------------------------------

    fn write_metadata(&mut self) -> Result<()> {
        self.disk.set_root_offset(self.root_offset);
        self.disk.set_next_page_offset(self.next_page_offset);
        self.disk.flush_metadata()
    }

    fn read_metadata(&mut self) {
        self.root_offset = self.disk.root_offset();
        self.next_page_offset = self.disk.next_page_offset();

        if self.next_page_offset < PAGE_SIZE as i64 {
            self.next_page_offset = PAGE_SIZE as i64;
        }
        if self.root_offset != INVALID_PAGE_ID
            && (self.root_offset < PAGE_SIZE as i64
                || self.root_offset >= self.disk.file_size() as i64)
        {
            self.root_offset = INVALID_PAGE_ID;
            self.next_page_offset = PAGE_SIZE as i64;
        }
    }

    fn shutdown(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.write_metadata()?;
        self.pool.flush_all_pages(&mut self.disk, self.wal.as_mut())?;
        if let Some(wal) = self.wal.as_mut() {
            wal.end_checkpoint()?;
        }
        Ok(())
    }

    // -- Descent -------------------------------------------------------------

    /// Pins `node_off` just long enough to classify it and pick the
    /// descent target for `key`.
    fn classify(&mut self, node_off: i64, key: i32) -> Result<NodeStep> {
        let step = {
            let page = self.pin(node_off)?;
            if page_is_leaf(page) {
                NodeStep::Leaf
            } else {
                let node = InternalPage::from_page(page)?;
                let (child_idx, child_off) = node.find_child(key)?;
                NodeStep::Internal {
                    child_idx,
                    child_off,
                }
            }
        };
        self.unpin(node_off, false);
        Ok(step)
    }

    /// Descends to the leaf that would contain `key`. Returns
    /// `INVALID_PAGE_ID` when a child pointer is out of range (a corrupt
    /// node), so reads degrade to "not found".
    fn find_leaf(&mut self, key: i32) -> Result<i64> {
        let mut current = self.root_offset;
        loop {
            match self.classify(current, key)? {
                NodeStep::Leaf => return Ok(current),
                NodeStep::Internal { child_off, .. } => {
                    if child_off < PAGE_SIZE as i64 {
                        return Ok(INVALID_PAGE_ID);
                    }
                    current = child_off;
                }
            }
        }
    }

    // -- Insert internals ----------------------------------------------------

    /// Recursive insert. Returns the promoted separator and new sibling
    /// offset when the node at `node_off` split.
    fn insert_recursive(
        &mut self,
        node_off: i64,
        key: i32,
        data: &[u8; DATA_SIZE],
    ) -> Result<Option<(i32, i64)>> {
        match self.classify(node_off, key)? {
            NodeStep::Leaf => self.insert_into_leaf(node_off, key, data),
            NodeStep::Internal { child_off, .. } => {
                ensure!(
                    child_off >= PAGE_SIZE as i64,
                    "corrupt internal node at {}: child offset {}",
                    node_off,
                    child_off
                );
                match self.insert_recursive(child_off, key, data)? {
                    None => Ok(None),
                    Some((sep, new_child)) => self.insert_into_internal(node_off, sep, new_child),
                }
            }
        }
    }

    fn insert_into_leaf(
        &mut self,
        leaf_off: i64,
        key: i32,
        data: &[u8; DATA_SIZE],
    ) -> Result<Option<(i32, i64)>> {
        // In-place update or insert when room exists; otherwise stage all
        // 36 records for the split.
        let staged = {
            let page = self.pin(leaf_off)?;
            let mut leaf = LeafPageMut::from_page(page)?;
            match leaf.find_key(key) {
                SearchResult::Found(i) => {
                    leaf.set_payload_at(i, data)?;
                    None
                }
                SearchResult::NotFound(i) => {
                    if leaf.num_keys() < LEAF_MAX_KEYS {
                        leaf.insert_record_at(i, key, data)?;
                        None
                    } else {
                        let mut records = leaf.as_ref().collect_records()?;
                        records.insert(i, (key, *data));
                        Some((records, leaf.next_leaf()))
                    }
                }
            }
        };

        let Some((records, old_next)) = staged else {
            self.unpin(leaf_off, true);
            return Ok(None);
        };
        self.unpin(leaf_off, false);

        // Left-heavy split: the original leaf keeps ceil(n/2) records.
        let mid = (records.len() + 1) / 2;
        let new_off = self.alloc_page()?;

        {
            let page = self.pin(new_off)?;
            let mut new_leaf = LeafPageMut::init(page)?;
            for (j, (k, d)) in records[mid..].iter().enumerate() {
                new_leaf.set_record(j, *k, d)?;
            }
            new_leaf.set_num_keys(records.len() - mid);
            new_leaf.set_next_leaf(old_next);
        }
        self.unpin(new_off, true);

        {
            let page = self.pin(leaf_off)?;
            let mut leaf = LeafPageMut::from_page(page)?;
            for (j, (k, d)) in records[..mid].iter().enumerate() {
                leaf.set_record(j, *k, d)?;
            }
            leaf.set_num_keys(mid);
            leaf.set_next_leaf(new_off);
        }
        self.unpin(leaf_off, true);

        Ok(Some((records[mid].0, new_off)))
    }

    /// Absorbs `(key, child_off)` into an internal node, splitting it
    /// around the middle key when full.
    fn insert_into_internal(
        &mut self,
        node_off: i64,
        key: i32,
        child_off: i64,
    ) -> Result<Option<(i32, i64)>> {
        let staged = {
            let page = self.pin(node_off)?;
            let mut node = InternalPageMut::from_page(page)?;
            let n = node.num_keys();

            if n < INTERNAL_MAX_KEYS {
                let mut i = n;
                while i > 0 && node.key_at(i - 1)? > key {
                    let k = node.key_at(i - 1)?;
                    node.set_key_at(i, k)?;
                    let c = node.child_at(i)?;
                    node.set_child_at(i + 1, c)?;
                    i -= 1;
                }
                node.set_key_at(i, key)?;
                node.set_child_at(i + 1, child_off)?;
                node.set_num_keys(n + 1);
                None
            } else {
                let mut keys = Vec::with_capacity(n + 1);
                let mut children = Vec::with_capacity(n + 2);
                for j in 0..n {
                    keys.push(node.key_at(j)?);
                }
                for j in 0..=n {
                    children.push(node.child_at(j)?);
                }
                Some((keys, children))
            }
        };

        let Some((mut keys, mut children)) = staged else {
            self.unpin(node_off, true);
            return Ok(None);
        };
        self.unpin(node_off, false);

        let pos = keys.partition_point(|&k| k < key);
        keys.insert(pos, key);
        children.insert(pos + 1, child_off);

        // The middle key is promoted, not copied down.
        let mid = keys.len() / 2;
        let promoted = keys[mid];

        {
            let page = self.pin(node_off)?;
            let mut node = InternalPageMut::from_page(page)?;
            for j in 0..mid {
                node.set_key_at(j, keys[j])?;
                node.set_child_at(j, children[j])?;
            }
            node.set_child_at(mid, children[mid])?;
            node.set_num_keys(mid);
        }
        self.unpin(node_off, true);

        let new_off = self.alloc_page()?;
        {
            let page = self.pin(new_off)?;
            let mut node = InternalPageMut::init(page)?;
            let right_n = keys.len() - mid - 1;
            for j in 0..right_n {
                node.set_key_at(j, keys[mid + 1 + j])?;
                node.set_child_at(j, children[mid + 1 + j])?;
            }
            node.set_child_at(right_n, children[keys.len()])?;
            node.set_num_keys(right_n);
        }
        self.unpin(new_off, true);

        Ok(Some((promoted, new_off)))
    }

    // -- Delete internals ----------------------------------------------------

    /// Recursive delete. Returns whether the node at `node_off` ended up
    /// underful (for the root: empty).
    fn delete_recursive(&mut self, node_off: i64, key: i32) -> Result<bool> {
        let (child_idx, child_off) = match self.classify(node_off, key)? {
            NodeStep::Leaf => return self.delete_from_leaf(node_off, key),
            NodeStep::Internal {
                child_idx,
                child_off,
            } => (child_idx, child_off),
        };

        ensure!(
            child_off >= PAGE_SIZE as i64,
            "corrupt internal node at {}: child offset {}",
            node_off,
            child_off
        );

        if !self.delete_recursive(child_off, key)? {
            return Ok(false);
        }

        self.fix_child(node_off, child_idx)?;

        let remaining = {
            let page = self.pin(node_off)?;
            InternalPage::from_page(page)?.num_keys()
        };
        self.unpin(node_off, false);

        if node_off == self.root_offset {
            Ok(remaining == 0)
        } else {
            Ok(remaining < INTERNAL_MIN_KEYS)
        }
    }

    fn delete_from_leaf(&mut self, leaf_off: i64, key: i32) -> Result<bool> {
        let remaining = {
            let page = self.pin(leaf_off)?;
            let mut leaf = LeafPageMut::from_page(page)?;
            match leaf.find_key(key) {
                SearchResult::Found(i) => {
                    leaf.remove_record_at(i)?;
                    Some(leaf.num_keys())
                }
                SearchResult::NotFound(_) => None,
            }
        };

        let Some(remaining) = remaining else {
            self.unpin(leaf_off, false);
            return Ok(false);
        };
        self.unpin(leaf_off, true);

        if leaf_off == self.root_offset {
            Ok(remaining == 0)
        } else {
            Ok(remaining < LEAF_MIN_KEYS)
        }
    }

    /// Rebalances the underful child at `child_idx` of the internal node
    /// at `parent_off`: redistribute from the left sibling, else from the
    /// right, else merge.
    fn fix_child(&mut self, parent_off: i64, child_idx: usize) -> Result<()> {
        let child_off = {
            let page = self.pin(parent_off)?;
            InternalPage::from_page(page)?.child_at(child_idx)?
        };
        self.unpin(parent_off, false);

        let child_is_leaf = {
            let page = self.pin(child_off)?;
            page_is_leaf(page)
        };
        self.unpin(child_off, false);

        if child_is_leaf {
            self.fix_leaf_child(parent_off, child_idx)
        } else {
            self.fix_internal_child(parent_off, child_idx)
        }
    }

    /// Parent-side facts needed for one rebalance: sibling offsets and
    /// the separators on either side of the child.
    fn sibling_info(
        &mut self,
        parent_off: i64,
        child_idx: usize,
    ) -> Result<(i64, i64, i64, i32, i32)> {
        let info = {
            let page = self.pin(parent_off)?;
            let parent = InternalPage::from_page(page)?;
            let n = parent.num_keys();
            let child = parent.child_at(child_idx)?;
            let (left, left_sep) = if child_idx > 0 {
                (parent.child_at(child_idx - 1)?, parent.key_at(child_idx - 1)?)
            } else {
                (INVALID_PAGE_ID, 0)
            };
            let (right, right_sep) = if child_idx < n {
                (parent.child_at(child_idx + 1)?, parent.key_at(child_idx)?)
            } else {
                (INVALID_PAGE_ID, 0)
            };
            (child, left, right, left_sep, right_sep)
        };
        self.unpin(parent_off, false);
        Ok(info)
    }

    fn fix_leaf_child(&mut self, parent_off: i64, child_idx: usize) -> Result<()> {
        let (child_off, left_off, right_off, _, _) = self.sibling_info(parent_off, child_idx)?;

        // Borrow the left sibling's last record.
        if left_off != INVALID_PAGE_ID {
            let borrowed = {
                let page = self.pin(left_off)?;
                let mut left = LeafPageMut::from_page(page)?;
                let n = left.num_keys();
                if n > LEAF_MIN_KEYS {
                    let k = left.key_at(n - 1)?;
                    let mut d = [0u8; DATA_SIZE];
                    d.copy_from_slice(left.as_ref().payload_at(n - 1)?);
                    left.set_num_keys(n - 1);
                    Some((k, d))
                } else {
                    None
                }
            };
            self.unpin(left_off, borrowed.is_some());

            if let Some((k, d)) = borrowed {
                {
                    let page = self.pin(child_off)?;
                    LeafPageMut::from_page(page)?.insert_record_at(0, k, &d)?;
                }
                self.unpin(child_off, true);
                {
                    let page = self.pin(parent_off)?;
                    InternalPageMut::from_page(page)?.set_key_at(child_idx - 1, k)?;
                }
                self.unpin(parent_off, true);
                return Ok(());
            }
        }

        // Borrow the right sibling's first record.
        if right_off != INVALID_PAGE_ID {
            let borrowed = {
                let page = self.pin(right_off)?;
                let mut right = LeafPageMut::from_page(page)?;
                let n = right.num_keys();
                if n > LEAF_MIN_KEYS {
                    let k = right.key_at(0)?;
                    let mut d = [0u8; DATA_SIZE];
                    d.copy_from_slice(right.as_ref().payload_at(0)?);
                    right.remove_record_at(0)?;
                    let new_first = right.key_at(0)?;
                    Some((k, d, new_first))
                } else {
                    None
                }
            };
            self.unpin(right_off, borrowed.is_some());

            if let Some((k, d, new_first)) = borrowed {
                {
                    let page = self.pin(child_off)?;
                    let mut child = LeafPageMut::from_page(page)?;
                    let n = child.num_keys();
                    child.insert_record_at(n, k, &d)?;
                }
                self.unpin(child_off, true);
                {
                    let page = self.pin(parent_off)?;
                    InternalPageMut::from_page(page)?.set_key_at(child_idx, new_first)?;
                }
                self.unpin(parent_off, true);
                return Ok(());
            }
        }

        // Merge, preferring "child into left sibling".
        let (merge_left, merge_right, sep_idx) = if left_off != INVALID_PAGE_ID {
            (left_off, child_off, child_idx - 1)
        } else {
            (child_off, right_off, child_idx)
        };

        let (right_records, right_next) = {
            let page = self.pin(merge_right)?;
            let right = LeafPage::from_page(page)?;
            (right.collect_records()?, right.next_leaf())
        };
        self.unpin(merge_right, false);

        {
            let page = self.pin(merge_left)?;
            let mut left = LeafPageMut::from_page(page)?;
            let n = left.num_keys();
            for (j, (k, d)) in right_records.iter().enumerate() {
                left.set_record(n + j, *k, d)?;
            }
            left.set_num_keys(n + right_records.len());
            left.set_next_leaf(right_next);
        }
        self.unpin(merge_left, true);

        self.dealloc_page(merge_right)?;
        self.remove_parent_entry(parent_off, sep_idx)
    }

    fn fix_internal_child(&mut self, parent_off: i64, child_idx: usize) -> Result<()> {
        let (child_off, left_off, right_off, left_sep, right_sep) =
            self.sibling_info(parent_off, child_idx)?;

        // Borrow through the parent: the separator comes down into the
        // child, the sibling's edge key replaces it.
        if left_off != INVALID_PAGE_ID {
            let borrowed = {
                let page = self.pin(left_off)?;
                let mut left = InternalPageMut::from_page(page)?;
                let n = left.num_keys();
                if n > INTERNAL_MIN_KEYS {
                    let k = left.key_at(n - 1)?;
                    let c = left.child_at(n)?;
                    left.set_num_keys(n - 1);
                    Some((k, c))
                } else {
                    None
                }
            };
            self.unpin(left_off, borrowed.is_some());

            if let Some((borrowed_key, borrowed_child)) = borrowed {
                {
                    let page = self.pin(child_off)?;
                    let mut child = InternalPageMut::from_page(page)?;
                    let n = child.num_keys();
                    let mut j = n;
                    while j > 0 {
                        let k = child.key_at(j - 1)?;
                        child.set_key_at(j, k)?;
                        let c = child.child_at(j)?;
                        child.set_child_at(j + 1, c)?;
                        j -= 1;
                    }
                    let c0 = child.child_at(0)?;
                    child.set_child_at(1, c0)?;
                    child.set_key_at(0, left_sep)?;
                    child.set_child_at(0, borrowed_child)?;
                    child.set_num_keys(n + 1);
                }
                self.unpin(child_off, true);
                {
                    let page = self.pin(parent_off)?;
                    InternalPageMut::from_page(page)?.set_key_at(child_idx - 1, borrowed_key)?;
                }
                self.unpin(parent_off, true);
                return Ok(());
            }
        }

        if right_off != INVALID_PAGE_ID {
            let borrowed = {
                let page = self.pin(right_off)?;
                let mut right = InternalPageMut::from_page(page)?;
                let n = right.num_keys();
                if n > INTERNAL_MIN_KEYS {
                    let k = right.key_at(0)?;
                    let c = right.child_at(0)?;
                    for j in 0..n - 1 {
                        let nk = right.key_at(j + 1)?;
                        right.set_key_at(j, nk)?;
                        let nc = right.child_at(j + 1)?;
                        right.set_child_at(j, nc)?;
                    }
                    let last = right.child_at(n)?;
                    right.set_child_at(n - 1, last)?;
                    right.set_num_keys(n - 1);
                    Some((k, c))
                } else {
                    None
                }
            };
            self.unpin(right_off, borrowed.is_some());

            if let Some((borrowed_key, borrowed_child)) = borrowed {
                {
                    let page = self.pin(child_off)?;
                    let mut child = InternalPageMut::from_page(page)?;
                    let n = child.num_keys();
                    child.set_key_at(n, right_sep)?;
                    child.set_child_at(n + 1, borrowed_child)?;
                    child.set_num_keys(n + 1);
                }
                self.unpin(child_off, true);
                {
                    let page = self.pin(parent_off)?;
                    InternalPageMut::from_page(page)?.set_key_at(child_idx, borrowed_key)?;
                }
                self.unpin(parent_off, true);
                return Ok(());
            }
        }

        // Merge: left + separator + right collapse into the left node.
        let (merge_left, merge_right, sep_idx, sep_key) = if left_off != INVALID_PAGE_ID {
            (left_off, child_off, child_idx - 1, left_sep)
        } else {
            (child_off, right_off, child_idx, right_sep)
        };

        let (right_keys, right_children) = {
            let page = self.pin(merge_right)?;
            let right = InternalPage::from_page(page)?;
            let n = right.num_keys();
            let mut keys = Vec::with_capacity(n);
            let mut children = Vec::with_capacity(n + 1);
            for j in 0..n {
                keys.push(right.key_at(j)?);
            }
            for j in 0..=n {
                children.push(right.child_at(j)?);
            }
            (keys, children)
        };
        self.unpin(merge_right, false);

        {
            let page = self.pin(merge_left)?;
            let mut left = InternalPageMut::from_page(page)?;
            let n = left.num_keys();
            left.set_key_at(n, sep_key)?;
            left.set_child_at(n + 1, right_children[0])?;
            for (j, &k) in right_keys.iter().enumerate() {
                left.set_key_at(n + 1 + j, k)?;
                left.set_child_at(n + 2 + j, right_children[j + 1])?;
            }
            left.set_num_keys(n + 1 + right_keys.len());
        }
        self.unpin(merge_left, true);

        self.dealloc_page(merge_right)?;
        self.remove_parent_entry(parent_off, sep_idx)
    }

    /// Drops separator `sep_idx` (and the child to its right) from the
    /// parent after a merge.
    fn remove_parent_entry(&mut self, parent_off: i64, sep_idx: usize) -> Result<()> {
        {
            let page = self.pin(parent_off)?;
            let mut parent = InternalPageMut::from_page(page)?;
            let n = parent.num_keys();
            for j in sep_idx..n - 1 {
                let k = parent.key_at(j + 1)?;
                parent.set_key_at(j, k)?;
                let c = parent.child_at(j + 2)?;
                parent.set_child_at(j + 1, c)?;
            }
            parent.set_num_keys(n - 1);
        }
        self.unpin(parent_off, true);
        Ok(())
    }

    /// Collapses the root after a delete left it empty: an internal root
    /// with zero keys hands the tree to its sole child, and a drained
    /// root leaf empties the tree entirely.
    fn shrink_root(&mut self) -> Result<()> {
        let root = self.root_offset;

        enum Shrink {
            Keep,
            Promote(i64),
            Empty,
        }

        let action = {
            let page = self.pin(root)?;
            if page_is_leaf(page) {
                if LeafPage::from_page(page)?.num_keys() == 0 {
                    Shrink::Empty
                } else {
                    Shrink::Keep
                }
            } else {
                let node = InternalPage::from_page(page)?;
                if node.num_keys() == 0 {
                    Shrink::Promote(node.child_at(0)?)
                } else {
                    Shrink::Keep
                }
            }
        };
        self.unpin(root, false);

        match action {
            Shrink::Keep => Ok(()),
            Shrink::Promote(child) => {
                self.root_offset = child;
                self.dealloc_page(root)?;
                self.write_metadata()
            }
            Shrink::Empty => {
                self.root_offset = INVALID_PAGE_ID;
                self.dealloc_page(root)?;
                self.write_metadata()
            }
        }
    }
}

impl Drop for BPlusTree {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

/// The WAL lives next to the index file as `<index>.wal`.
fn wal_path_for(index_path: &Path) -> PathBuf {
    let mut os = index_path.as_os_str().to_os_string();
    os.push(".wal");
    PathBuf::from(os)
}

/// Trims the zero padding appended at insert time. Interior zeros
/// survive; only the trailing run is removed.
fn trim_payload(payload: &[u8]) -> Vec<u8> {
    let len = payload
        .iter()
        .rposition(|&b| b != 0)
        .map_or(0, |i| i + 1);
    payload[..len].to_vec()
}
