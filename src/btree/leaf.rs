//! # Leaf Node View
//!
//! Typed views over a raw 4096-byte page holding a B+ tree leaf node. Leaf
//! nodes store the actual records — a 4-byte key followed by a fixed
//! 100-byte payload — sorted ascending by key, and are chained through
//! `next_leaf` for range scans.
//!
//! ## Page Layout
//!
//! ```text
//! Offset  Size    Field
//! ------  ------  --------------------------------
//! 0       4       num_keys    (i32)
//! 4       4       is_leaf = 1 (i32)
//! 8       8       next_leaf   (i64 page offset, -1 at the chain's end)
//! 16      N×104   records[]   — each record is [key(4) | payload(100)]
//! ```
//!
//! At most 35 records fit: 16 + 35 × 104 = 3656 bytes.
//!
//! ## View Pair
//!
//! `LeafPage` borrows immutably and serves reads; `LeafPageMut` borrows
//! mutably and adds record insertion, removal, and header updates. Both
//! validate the page size and the `is_leaf` flag on construction, so a
//! view is only ever built over an actual leaf. Neither view outlives the
//! buffer-pool pin that produced the byte slice — the borrow checker ties
//! the view's lifetime to it.
//!
//! ## Search
//!
//! Records are sorted and keys unique, so a linear scan with an early exit
//! suffices at this fan-out; `find_key` returns either the match index or
//! the sorted insertion point.

use eyre::{ensure, Result};
use zerocopy::little_endian::{I32, I64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::config::{DATA_SIZE, INVALID_PAGE_ID, LEAF_HEADER_SIZE, LEAF_MAX_KEYS, PAGE_SIZE, RECORD_SIZE};

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
struct LeafHeader {
    num_keys: I32,
    is_leaf: I32,
    next_leaf: I64,
}

const _: () = assert!(std::mem::size_of::<LeafHeader>() == LEAF_HEADER_SIZE);

/// Outcome of a key search within one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchResult {
    /// The key exists at this record index.
    Found(usize),
    /// The key is absent; inserting it in sorted order lands here.
    NotFound(usize),
}

fn record_offset(index: usize) -> usize {
    LEAF_HEADER_SIZE + index * RECORD_SIZE
}

#[derive(Debug)]
pub struct LeafPage<'a> {
    data: &'a [u8],
}

pub struct LeafPageMut<'a> {
    data: &'a mut [u8],
}

impl<'a> LeafPage<'a> {
    pub fn from_page(data: &'a [u8]) -> Result<Self> {
        ensure!(
            data.len() == PAGE_SIZE,
            "invalid page size: {} != {}",
            data.len(),
            PAGE_SIZE
        );
        let header = LeafHeader::ref_from_bytes(&data[..LEAF_HEADER_SIZE]).unwrap();
        ensure!(
            header.is_leaf.get() == 1,
            "expected a leaf page, got is_leaf={}",
            header.is_leaf.get()
        );
        Ok(Self { data })
    }

    fn header(&self) -> &LeafHeader {
        LeafHeader::ref_from_bytes(&self.data[..LEAF_HEADER_SIZE]).unwrap()
    }

    pub fn num_keys(&self) -> usize {
        self.header().num_keys.get() as usize
    }

    pub fn next_leaf(&self) -> i64 {
        self.header().next_leaf.get()
    }

    pub fn key_at(&self, index: usize) -> Result<i32> {
        self.check_index(index)?;
        let off = record_offset(index);
        let mut buf = [0u8; 4];
        buf.copy_from_slice(&self.data[off..off + 4]);
        Ok(i32::from_le_bytes(buf))
    }

    pub fn payload_at(&self, index: usize) -> Result<&'a [u8]> {
        self.check_index(index)?;
        let off = record_offset(index) + 4;
        Ok(&self.data[off..off + DATA_SIZE])
    }

    /// Copies every record out of the page, in key order.
    pub fn collect_records(&self) -> Result<Vec<(i32, [u8; DATA_SIZE])>> {
        let mut records = Vec::with_capacity(self.num_keys());
        for i in 0..self.num_keys() {
            let mut payload = [0u8; DATA_SIZE];
            payload.copy_from_slice(self.payload_at(i)?);
            records.push((self.key_at(i)?, payload));
        }
        Ok(records)
    }

    pub fn find_key(&self, key: i32) -> SearchResult {
        let count = self.num_keys();
        for i in 0..count {
            let k = match self.key_at(i) {
                Ok(k) => k,
                Err(_) => return SearchResult::NotFound(i),
            };
            if k == key {
                return SearchResult::Found(i);
            }
            if k > key {
                return SearchResult::NotFound(i);
            }
        }
        SearchResult::NotFound(count)
    }

    fn check_index(&self, index: usize) -> Result<()> {
        ensure!(
            index < self.num_keys(),
            "record index {} out of bounds (num_keys={})",
            index,
            self.num_keys()
        );
        Ok(())
    }
}

impl<'a> LeafPageMut<'a> {
    pub fn from_page(data: &'a mut [u8]) -> Result<Self> {
        LeafPage::from_page(&*data)?;
        Ok(Self { data })
    }

    /// Zero-initializes a raw page as an empty leaf with no successor.
    pub fn init(data: &'a mut [u8]) -> Result<Self> {
        ensure!(
            data.len() == PAGE_SIZE,
            "invalid page size: {} != {}",
            data.len(),
            PAGE_SIZE
        );
        data.fill(0);
        let header = LeafHeader {
            num_keys: I32::new(0),
            is_leaf: I32::new(1),
            next_leaf: I64::new(INVALID_PAGE_ID),
        };
        data[..LEAF_HEADER_SIZE].copy_from_slice(header.as_bytes());
        Ok(Self { data })
    }

    pub fn as_ref(&self) -> LeafPage<'_> {
        LeafPage { data: &*self.data }
    }

    fn header_mut(&mut self) -> &mut LeafHeader {
        LeafHeader::mut_from_bytes(&mut self.data[..LEAF_HEADER_SIZE]).unwrap()
    }

    pub fn num_keys(&self) -> usize {
        self.as_ref().num_keys()
    }

    pub fn next_leaf(&self) -> i64 {
        self.as_ref().next_leaf()
    }

    pub fn key_at(&self, index: usize) -> Result<i32> {
        self.as_ref().key_at(index)
    }

    pub fn find_key(&self, key: i32) -> SearchResult {
        self.as_ref().find_key(key)
    }

    pub fn set_num_keys(&mut self, count: usize) {
        self.header_mut().num_keys = I32::new(count as i32);
    }

    pub fn set_next_leaf(&mut self, offset: i64) {
        self.header_mut().next_leaf = I64::new(offset);
    }

    /// Overwrites the payload of an existing record.
    pub fn set_payload_at(&mut self, index: usize, payload: &[u8; DATA_SIZE]) -> Result<()> {
        self.as_ref().check_index(index)?;
        let off = record_offset(index) + 4;
        self.data[off..off + DATA_SIZE].copy_from_slice(payload);
        Ok(())
    }

    /// Writes a record at `index` without touching `num_keys`; used when
    /// rebuilding a node from a materialized record list.
    pub fn set_record(&mut self, index: usize, key: i32, payload: &[u8; DATA_SIZE]) -> Result<()> {
        ensure!(
            index < LEAF_MAX_KEYS,
            "record index {} exceeds leaf capacity {}",
            index,
            LEAF_MAX_KEYS
        );
        let off = record_offset(index);
        self.data[off..off + 4].copy_from_slice(&key.to_le_bytes());
        self.data[off + 4..off + 4 + DATA_SIZE].copy_from_slice(payload);
        Ok(())
    }

    /// Inserts a record at `index`, shifting later records one slot right.
    /// The node must have room.
    pub fn insert_record_at(
        &mut self,
        index: usize,
        key: i32,
        payload: &[u8; DATA_SIZE],
    ) -> Result<()> {
        let count = self.num_keys();
        ensure!(
            count < LEAF_MAX_KEYS,
            "cannot insert into a full leaf ({} records)",
            count
        );
        ensure!(
            index <= count,
            "insert index {} out of bounds (num_keys={})",
            index,
            count
        );

        let src = record_offset(index);
        let end = record_offset(count);
        self.data.copy_within(src..end, src + RECORD_SIZE);
        self.set_record(index, key, payload)?;
        self.set_num_keys(count + 1);
        Ok(())
    }

    /// Removes the record at `index`, shifting later records left to close
    /// the gap.
    pub fn remove_record_at(&mut self, index: usize) -> Result<()> {
        let count = self.num_keys();
        self.as_ref().check_index(index)?;

        let src = record_offset(index + 1);
        let end = record_offset(count);
        self.data.copy_within(src..end, record_offset(index));
        self.set_num_keys(count - 1);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(tag: u8) -> [u8; DATA_SIZE] {
        let mut p = [0u8; DATA_SIZE];
        p[0] = tag;
        p
    }

    #[test]
    fn init_produces_an_empty_terminal_leaf() {
        let mut page = [0xFFu8; PAGE_SIZE];
        let leaf = LeafPageMut::init(&mut page).unwrap();

        assert_eq!(leaf.num_keys(), 0);
        assert_eq!(leaf.next_leaf(), INVALID_PAGE_ID);
    }

    #[test]
    fn from_page_rejects_non_leaf_pages() {
        let page = [0u8; PAGE_SIZE];
        // is_leaf == 0 — an internal node (or a zeroed page).
        assert!(LeafPage::from_page(&page).is_err());
    }

    #[test]
    fn from_page_rejects_wrong_size() {
        let page = [0u8; 100];
        assert!(LeafPage::from_page(&page).is_err());
    }

    #[test]
    fn insert_keeps_records_sorted() {
        let mut page = [0u8; PAGE_SIZE];
        let mut leaf = LeafPageMut::init(&mut page).unwrap();

        leaf.insert_record_at(0, 20, &payload(2)).unwrap();
        leaf.insert_record_at(0, 10, &payload(1)).unwrap();
        leaf.insert_record_at(2, 30, &payload(3)).unwrap();

        assert_eq!(leaf.num_keys(), 3);
        assert_eq!(leaf.key_at(0).unwrap(), 10);
        assert_eq!(leaf.key_at(1).unwrap(), 20);
        assert_eq!(leaf.key_at(2).unwrap(), 30);
        assert_eq!(leaf.as_ref().payload_at(1).unwrap()[0], 2);
    }

    #[test]
    fn find_key_reports_match_and_insertion_point() {
        let mut page = [0u8; PAGE_SIZE];
        let mut leaf = LeafPageMut::init(&mut page).unwrap();
        for (i, key) in [10, 20, 30].into_iter().enumerate() {
            leaf.insert_record_at(i, key, &payload(i as u8)).unwrap();
        }

        assert_eq!(leaf.find_key(20), SearchResult::Found(1));
        assert_eq!(leaf.find_key(5), SearchResult::NotFound(0));
        assert_eq!(leaf.find_key(25), SearchResult::NotFound(2));
        assert_eq!(leaf.find_key(99), SearchResult::NotFound(3));
    }

    #[test]
    fn remove_closes_the_gap() {
        let mut page = [0u8; PAGE_SIZE];
        let mut leaf = LeafPageMut::init(&mut page).unwrap();
        for (i, key) in [1, 2, 3].into_iter().enumerate() {
            leaf.insert_record_at(i, key, &payload(key as u8)).unwrap();
        }

        leaf.remove_record_at(1).unwrap();

        assert_eq!(leaf.num_keys(), 2);
        assert_eq!(leaf.key_at(0).unwrap(), 1);
        assert_eq!(leaf.key_at(1).unwrap(), 3);
        assert_eq!(leaf.as_ref().payload_at(1).unwrap()[0], 3);
    }

    #[test]
    fn insert_rejects_a_full_leaf() {
        let mut page = [0u8; PAGE_SIZE];
        let mut leaf = LeafPageMut::init(&mut page).unwrap();
        for i in 0..LEAF_MAX_KEYS {
            leaf.insert_record_at(i, i as i32, &payload(0)).unwrap();
        }

        assert!(leaf.insert_record_at(0, -1, &payload(0)).is_err());
    }

    #[test]
    fn collect_records_round_trips() {
        let mut page = [0u8; PAGE_SIZE];
        let mut leaf = LeafPageMut::init(&mut page).unwrap();
        for (i, key) in [4, 8, 15].into_iter().enumerate() {
            leaf.insert_record_at(i, key, &payload(key as u8)).unwrap();
        }

        let records = leaf.as_ref().collect_records().unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[2].0, 15);
        assert_eq!(records[2].1[0], 15);
    }

    #[test]
    fn negative_keys_sort_before_positive() {
        let mut page = [0u8; PAGE_SIZE];
        let mut leaf = LeafPageMut::init(&mut page).unwrap();
        leaf.insert_record_at(0, 5, &payload(1)).unwrap();
        leaf.insert_record_at(0, -5, &payload(2)).unwrap();

        assert_eq!(leaf.find_key(-5), SearchResult::Found(0));
        assert_eq!(leaf.find_key(0), SearchResult::NotFound(1));
    }
}
