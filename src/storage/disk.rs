//! # Disk Manager
//!
//! This module implements `DiskManager`, the component that owns the backing
//! index file and exposes it as fixed-size pages via memory-mapped I/O.
//!
//! ## Responsibilities
//!
//! - Open or create the index file, initializing the metadata page
//! - Grow the file geometrically (ftruncate + remap) as pages are allocated
//! - Allocate fresh zeroed pages from the frontier or the free list
//! - Recycle freed pages through an on-disk singly-linked free list
//! - Persist the three metadata words stored on page 0
//!
//! ## File Layout
//!
//! ```text
//! Offset 0:      Page 0 — metadata
//!                  [0..8)   root_offset       (i64, -1 if tree is empty)
//!                  [8..16)  next_page_offset  (i64, allocation frontier)
//!                  [16..24) free_list_head    (i64, -1 if none)
//! Offset 4096:   Page 1
//! Offset 8192:   Page 2
//! ...
//! ```
//!
//! Pages are addressed by byte offset rather than page number; -1 is the
//! "no page" sentinel. A freed page stores the offset of the next free page
//! in its first 8 bytes, forming an intrusive linked list headed by the
//! `free_list_head` metadata word.
//!
//! ## Safety Model
//!
//! Memory-mapped regions become invalid when the file is grown and
//! remapped. Rather than runtime guards, the borrow checker enforces the
//! hazard at compile time:
//!
//! ```text
//! page(&self) -> &[u8]          // immutable borrow of self
//! page_mut(&mut self) -> &mut [u8]
//! allocate_page(&mut self)      // exclusive borrow — may remap
//! ```
//!
//! Since `allocate_page` takes `&mut self`, no page view can be held across
//! a call that might grow the file. The buffer pool above copies page
//! contents into its own heap-owned frames, so the tree never touches the
//! mapping directly.
//!
//! ## Growth Policy
//!
//! When an allocation requires more space, the file grows to the smallest
//! page-aligned length >= max(required, 2 × current, 1 MiB). Doubling
//! amortizes the ftruncate + remap cost to O(1) per allocation.
//!
//! ## Thread Safety
//!
//! Not thread-safe. The tree is single-threaded by contract; external
//! serialization is required for anything else.

use std::fs::OpenOptions;
use std::fs::File;
use std::path::{Path, PathBuf};

use eyre::{ensure, Result, WrapErr};
use memmap2::MmapMut;
use tracing::debug;

use crate::config::{
    FREE_PAGE_NEXT_OFFSET, INVALID_PAGE_ID, META_FREE_LIST_HEAD, META_NEXT_PAGE, META_ROOT_OFFSET,
    MIN_FILE_GROWTH, PAGE_SIZE,
};

#[derive(Debug)]
pub struct DiskManager {
    path: PathBuf,
    file: File,
    mmap: MmapMut,
    file_size: usize,
}

impl DiskManager {
    /// Opens (or creates) the index file at `path`.
    ///
    /// A brand-new file is extended to one page and its metadata defaults
    /// are written: empty tree, allocation frontier at `PAGE_SIZE`, empty
    /// free list.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .wrap_err_with(|| format!("failed to open index file '{}'", path.display()))?;

        let metadata = file
            .metadata()
            .wrap_err_with(|| format!("failed to stat index file '{}'", path.display()))?;

        let mut file_size = metadata.len() as usize;
        let is_new = file_size == 0;

        if is_new {
            file_size = PAGE_SIZE;
            file.set_len(file_size as u64)
                .wrap_err("failed to reserve the metadata page")?;
        }

        ensure!(
            file_size % PAGE_SIZE == 0,
            "index file '{}' size {} is not a multiple of page size {}",
            path.display(),
            file_size,
            PAGE_SIZE
        );

        // SAFETY: MmapMut::map_mut is unsafe because the file could be
        // modified externally. This is safe because:
        // 1. Each DiskManager exclusively owns its index file by contract
        // 2. The file length is a PAGE_SIZE multiple >= one page
        // 3. The mapping's lifetime is tied to this DiskManager
        // 4. All access goes through page()/page_mut() which bounds-check
        let mmap = unsafe {
            MmapMut::map_mut(&file)
                .wrap_err_with(|| format!("failed to memory-map '{}'", path.display()))?
        };

        let mut disk = Self {
            path: path.to_path_buf(),
            file,
            mmap,
            file_size,
        };

        if is_new {
            disk.set_root_offset(INVALID_PAGE_ID);
            disk.set_next_page_offset(PAGE_SIZE as i64);
            disk.set_free_list_head(INVALID_PAGE_ID);
            disk.flush_metadata()?;
        }

        Ok(disk)
    }

    /// Returns a read-only view of the page at byte `offset`.
    ///
    /// The view is valid only until the next call that can grow the file
    /// (`allocate_page`); the borrow checker enforces this.
    pub fn page(&self, offset: i64) -> Result<&[u8]> {
        self.check_bounds(offset)?;
        let start = offset as usize;
        Ok(&self.mmap[start..start + PAGE_SIZE])
    }

    /// Returns a writable view of the page at byte `offset`.
    pub fn page_mut(&mut self, offset: i64) -> Result<&mut [u8]> {
        self.check_bounds(offset)?;
        let start = offset as usize;
        Ok(&mut self.mmap[start..start + PAGE_SIZE])
    }

    fn check_bounds(&self, offset: i64) -> Result<()> {
        ensure!(
            offset >= 0 && offset as usize + PAGE_SIZE <= self.file_size,
            "page offset {} out of range (file_size={})",
            offset,
            self.file_size
        );
        Ok(())
    }

    /// Allocates a fresh zeroed page and returns its byte offset.
    ///
    /// Pops the free list when it is non-empty; otherwise reserves the page
    /// at the allocation frontier, growing the file if needed.
    pub fn allocate_page(&mut self) -> Result<i64> {
        let head = self.free_list_head();
        if head != INVALID_PAGE_ID {
            self.check_bounds(head)?;
            let next = {
                let page = self.page(head)?;
                read_i64(page, FREE_PAGE_NEXT_OFFSET)
            };
            self.page_mut(head)?.fill(0);
            self.set_free_list_head(next);
            return Ok(head);
        }

        let offset = self.next_page_offset();
        ensure!(
            offset >= PAGE_SIZE as i64,
            "corrupt metadata: allocation frontier {} overlaps the metadata page",
            offset
        );

        let new_frontier = offset + PAGE_SIZE as i64;
        self.ensure_capacity(new_frontier as usize)?;

        self.page_mut(offset)?.fill(0);
        self.set_next_page_offset(new_frontier);
        Ok(offset)
    }

    /// Advances the allocation frontier so the page at `offset` is
    /// addressable, growing the file as needed. The free list is left
    /// untouched: WAL recovery uses this to re-extend a data file whose
    /// durable frontier never reached a logged page, and popping free
    /// pages there would orphan them (the pop advances nothing, so a
    /// general-purpose allocation would drain the list one page at a
    /// time before the frontier ever moved).
    pub fn extend_frontier(&mut self, offset: i64) -> Result<()> {
        ensure!(
            offset >= PAGE_SIZE as i64,
            "cannot extend the frontier over the metadata page (offset {})",
            offset
        );

        let required = offset + PAGE_SIZE as i64;
        self.ensure_capacity(required as usize)?;
        if self.next_page_offset() < required {
            self.set_next_page_offset(required);
        }
        Ok(())
    }

    /// Pushes the page at `offset` onto the free list.
    ///
    /// Offsets below `PAGE_SIZE` are silently ignored: the metadata page is
    /// never freed.
    pub fn free_page(&mut self, offset: i64) -> Result<()> {
        if offset < PAGE_SIZE as i64 {
            return Ok(());
        }
        self.check_bounds(offset)?;

        let head = self.free_list_head();
        write_i64(self.page_mut(offset)?, FREE_PAGE_NEXT_OFFSET, head);
        self.set_free_list_head(offset);
        Ok(())
    }

    // -- Metadata accessors (page 0) -----------------------------------------

    pub fn root_offset(&self) -> i64 {
        read_i64(&self.mmap, META_ROOT_OFFSET)
    }

    pub fn set_root_offset(&mut self, offset: i64) {
        write_i64(&mut self.mmap, META_ROOT_OFFSET, offset);
    }

    pub fn next_page_offset(&self) -> i64 {
        read_i64(&self.mmap, META_NEXT_PAGE)
    }

    pub fn set_next_page_offset(&mut self, offset: i64) {
        write_i64(&mut self.mmap, META_NEXT_PAGE, offset);
    }

    pub fn free_list_head(&self) -> i64 {
        read_i64(&self.mmap, META_FREE_LIST_HEAD)
    }

    pub fn set_free_list_head(&mut self, offset: i64) {
        write_i64(&mut self.mmap, META_FREE_LIST_HEAD, offset);
    }

    /// Durably flushes page 0.
    pub fn flush_metadata(&self) -> Result<()> {
        self.mmap
            .flush_range(0, PAGE_SIZE)
            .wrap_err("failed to flush the metadata page")
    }

    // -- Synchronization -----------------------------------------------------

    /// Synchronously flushes the whole mapped region to disk.
    pub fn sync(&self) -> Result<()> {
        self.mmap.flush().wrap_err("failed to sync index file")
    }

    /// Schedules a background flush of the mapped region.
    pub fn sync_async(&self) -> Result<()> {
        self.mmap
            .flush_async()
            .wrap_err("failed to schedule async flush")
    }

    // -- Queries -------------------------------------------------------------

    pub fn file_size(&self) -> usize {
        self.file_size
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    // -- Internal ------------------------------------------------------------

    /// Grows the file (and remaps it) so that at least `required` bytes are
    /// addressable. No-op when the file is already large enough.
    fn ensure_capacity(&mut self, required: usize) -> Result<()> {
        if required <= self.file_size {
            return Ok(());
        }

        let min_size = required.div_ceil(PAGE_SIZE) * PAGE_SIZE;
        let new_size = min_size
            .max(self.file_size * 2)
            .max(MIN_FILE_GROWTH)
            .div_ceil(PAGE_SIZE)
            * PAGE_SIZE;

        self.mmap
            .flush_async()
            .wrap_err("failed to flush mapping before growth")?;

        self.file
            .set_len(new_size as u64)
            .wrap_err_with(|| format!("failed to extend index file to {} bytes", new_size))?;

        // SAFETY: remapping invalidates the old mapping. This is safe because:
        // 1. ensure_capacity takes &mut self, so no page views exist
        // 2. The old mapping was flushed above
        // 3. The file was extended to new_size before remapping
        // 4. The old mapping is dropped on assignment
        self.mmap = unsafe {
            MmapMut::map_mut(&self.file).wrap_err("failed to remap index file after growth")?
        };

        debug!(
            old_size = self.file_size,
            new_size, "disk.grow"
        );

        self.file_size = new_size;
        Ok(())
    }
}

impl Drop for DiskManager {
    fn drop(&mut self) {
        let _ = self.mmap.flush();
    }
}

fn read_i64(bytes: &[u8], offset: usize) -> i64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[offset..offset + 8]);
    i64::from_le_bytes(buf)
}

fn write_i64(bytes: &mut [u8], offset: usize, value: i64) {
    bytes[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
}
