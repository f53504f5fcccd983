//! # Internal Node View
//!
//! Typed views over a raw 4096-byte page holding a B+ tree internal node.
//! Internal nodes store separator keys and child page offsets; they carry
//! no payloads.
//!
//! ## Page Layout
//!
//! ```text
//! Offset  Size    Field
//! ------  ------  --------------------------------
//! 0       4       num_keys    (i32)
//! 4       4       is_leaf = 0 (i32)
//! 8       N×12    slots[]     — each slot is [child(8) | key(4)]
//! ```
//!
//! For `n` keys there are `n + 1` children; the last child occupies the
//! child field of slot `n`, whose key field is unused. At most 100 keys
//! (101 children) fit: 8 + 101 × 12 = 1220 bytes.
//!
//! ## Navigation Semantics
//!
//! Keys in child `i` are strictly less than `key[i]`; keys in child
//! `i + 1` are >= `key[i]`. `find_child` therefore descends to the first
//! child whose upper separator exceeds the search key, sending equal keys
//! right.

use eyre::{ensure, Result};
use zerocopy::little_endian::I32;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::config::{INTERNAL_HEADER_SIZE, INTERNAL_MAX_KEYS, INTERNAL_SLOT_SIZE, PAGE_SIZE};

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
struct InternalHeader {
    num_keys: I32,
    is_leaf: I32,
}

const _: () = assert!(std::mem::size_of::<InternalHeader>() == INTERNAL_HEADER_SIZE);

fn slot_offset(index: usize) -> usize {
    INTERNAL_HEADER_SIZE + index * INTERNAL_SLOT_SIZE
}

#[derive(Debug)]
pub struct InternalPage<'a> {
    data: &'a [u8],
}

pub struct InternalPageMut<'a> {
    data: &'a mut [u8],
}

impl<'a> InternalPage<'a> {
    pub fn from_page(data: &'a [u8]) -> Result<Self> {
        ensure!(
            data.len() == PAGE_SIZE,
            "invalid page size: {} != {}",
            data.len(),
            PAGE_SIZE
        );
        let header = InternalHeader::ref_from_bytes(&data[..INTERNAL_HEADER_SIZE]).unwrap();
        ensure!(
            header.is_leaf.get() == 0,
            "expected an internal page, got is_leaf={}",
            header.is_leaf.get()
        );
        Ok(Self { data })
    }

    fn header(&self) -> &InternalHeader {
        InternalHeader::ref_from_bytes(&self.data[..INTERNAL_HEADER_SIZE]).unwrap()
    }

    pub fn num_keys(&self) -> usize {
        self.header().num_keys.get() as usize
    }

    pub fn key_at(&self, index: usize) -> Result<i32> {
        ensure!(
            index < self.num_keys(),
            "separator index {} out of bounds (num_keys={})",
            index,
            self.num_keys()
        );
        let off = slot_offset(index) + 8;
        let mut buf = [0u8; 4];
        buf.copy_from_slice(&self.data[off..off + 4]);
        Ok(i32::from_le_bytes(buf))
    }

    pub fn child_at(&self, index: usize) -> Result<i64> {
        ensure!(
            index <= self.num_keys(),
            "child index {} out of bounds (num_keys={})",
            index,
            self.num_keys()
        );
        let off = slot_offset(index);
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&self.data[off..off + 8]);
        Ok(i64::from_le_bytes(buf))
    }

    /// Picks the descent target for `key`: the first child whose upper
    /// separator is strictly greater, so equal keys go right. Returns the
    /// child index alongside its page offset.
    pub fn find_child(&self, key: i32) -> Result<(usize, i64)> {
        let count = self.num_keys();
        let mut index = 0;
        while index < count && key >= self.key_at(index)? {
            index += 1;
        }
        Ok((index, self.child_at(index)?))
    }
}

impl<'a> InternalPageMut<'a> {
    pub fn from_page(data: &'a mut [u8]) -> Result<Self> {
        InternalPage::from_page(&*data)?;
        Ok(Self { data })
    }

    /// Zero-initializes a raw page as an empty internal node.
    pub fn init(data: &'a mut [u8]) -> Result<Self> {
        ensure!(
            data.len() == PAGE_SIZE,
            "invalid page size: {} != {}",
            data.len(),
            PAGE_SIZE
        );
        data.fill(0);
        Ok(Self { data })
    }

    pub fn as_ref(&self) -> InternalPage<'_> {
        InternalPage { data: &*self.data }
    }

    pub fn num_keys(&self) -> usize {
        self.as_ref().num_keys()
    }

    pub fn key_at(&self, index: usize) -> Result<i32> {
        self.as_ref().key_at(index)
    }

    pub fn child_at(&self, index: usize) -> Result<i64> {
        self.as_ref().child_at(index)
    }

    pub fn set_num_keys(&mut self, count: usize) {
        let header =
            InternalHeader::mut_from_bytes(&mut self.data[..INTERNAL_HEADER_SIZE]).unwrap();
        header.num_keys = I32::new(count as i32);
    }

    /// Writes a separator key; `index` may address one past the current
    /// count while a node is being rebuilt or shifted.
    pub fn set_key_at(&mut self, index: usize, key: i32) -> Result<()> {
        ensure!(
            index < INTERNAL_MAX_KEYS,
            "separator index {} exceeds internal capacity {}",
            index,
            INTERNAL_MAX_KEYS
        );
        let off = slot_offset(index) + 8;
        self.data[off..off + 4].copy_from_slice(&key.to_le_bytes());
        Ok(())
    }

    pub fn set_child_at(&mut self, index: usize, child: i64) -> Result<()> {
        ensure!(
            index <= INTERNAL_MAX_KEYS,
            "child index {} exceeds internal capacity {}",
            index,
            INTERNAL_MAX_KEYS
        );
        let off = slot_offset(index);
        self.data[off..off + 8].copy_from_slice(&child.to_le_bytes());
        Ok(())
    }
}
