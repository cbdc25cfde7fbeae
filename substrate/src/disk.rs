//! The disk manager: translates logical page ids to physical file offsets
//! and allocates pages out of bitmap-segmented extents.
//!
//! File layout: physical page 0 is the disk metadata page; each extent is a
//! bitmap page followed by `BITMAP_SIZE` data pages. Logical ids address
//! data pages only and skip the allocation metadata.

use std::fs::{create_dir_all, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::error::{Result, StorageError};
use crate::{substrate_debug_log, Page, PageId, PAGE_SIZE};

/// Bytes reserved at the head of a bitmap page for its own counters.
const BITMAP_HEADER: usize = 8;

/// Pages tracked by one bitmap page, i.e. data pages per extent.
pub const BITMAP_SIZE: u32 = ((PAGE_SIZE - BITMAP_HEADER) * 8) as u32;

/// Bytes reserved at the head of the meta page before the extent counters.
const META_HEADER: usize = 8;

/// Extent counters that fit on the meta page.
pub const MAX_EXTENTS: u32 = ((PAGE_SIZE - META_HEADER) / 4) as u32;

/// Highest number of logical pages a single database file can hold.
pub const MAX_VALID_PAGE_ID: u32 = MAX_EXTENTS * BITMAP_SIZE;

fn bitmap_physical_id(extent: u32) -> u64 {
    extent as u64 * (BITMAP_SIZE as u64 + 1) + 1
}

fn data_physical_id(logical: PageId) -> u64 {
    let extent = logical as u64 / BITMAP_SIZE as u64;
    let offset = logical as u64 % BITMAP_SIZE as u64;
    extent * (BITMAP_SIZE as u64 + 1) + offset + 2
}

fn bitmap_is_free(page: &Page, offset: u32) -> bool {
    if offset >= BITMAP_SIZE {
        return false;
    }
    let byte = page.data[BITMAP_HEADER + (offset / 8) as usize];
    byte & (1 << (offset % 8)) == 0
}

/// Sets the first free bit and returns its offset. The `next_free_page`
/// hint is advisory only; a stale hint falls back to a full scan.
fn bitmap_allocate(page: &mut Page) -> Option<u32> {
    let mut candidate = page.read_u32_at(4);
    if candidate >= BITMAP_SIZE || !bitmap_is_free(page, candidate) {
        candidate = (0..BITMAP_SIZE).find(|&o| bitmap_is_free(page, o))?;
    }
    let byte = BITMAP_HEADER + (candidate / 8) as usize;
    page.data[byte] |= 1 << (candidate % 8);
    page.write_u32_at(0, page.read_u32_at(0) + 1);
    let next = ((candidate + 1)..BITMAP_SIZE)
        .find(|&o| bitmap_is_free(page, o))
        .unwrap_or(BITMAP_SIZE);
    page.write_u32_at(4, next);
    Some(candidate)
}

/// Clears the given bit. Returns false if it was already clear.
fn bitmap_deallocate(page: &mut Page, offset: u32) -> bool {
    if offset >= BITMAP_SIZE || bitmap_is_free(page, offset) {
        return false;
    }
    let byte = BITMAP_HEADER + (offset / 8) as usize;
    page.data[byte] &= !(1 << (offset % 8));
    page.write_u32_at(0, page.read_u32_at(0) - 1);
    if offset < page.read_u32_at(4) {
        page.write_u32_at(4, offset);
    }
    true
}

pub struct DiskManager {
    file: File,
    /// Physical page 0, kept resident and written back on close.
    meta: Page,
    closed: bool,
}

impl DiskManager {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();
        substrate_debug_log!("[DiskManager::open] opening database file {path_ref:?}");
        if let Some(parent) = path_ref.parent() {
            if !parent.as_os_str().is_empty() {
                create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path_ref)?;

        let mut manager = Self {
            file,
            meta: Page::new(0),
            closed: false,
        };
        let mut meta = Page::new(0);
        manager.read_physical_page(0, &mut meta.data)?;
        manager.meta = meta;
        Ok(manager)
    }

    /// True until the first page has been allocated, i.e. for a new file.
    pub fn is_fresh(&self) -> bool {
        self.num_allocated_pages() == 0
    }

    pub fn num_allocated_pages(&self) -> u32 {
        self.meta.read_u32_at(0)
    }

    pub fn num_extents(&self) -> u32 {
        self.meta.read_u32_at(4)
    }

    fn extent_used_pages(&self, extent: u32) -> u32 {
        self.meta.read_u32_at(META_HEADER + extent as usize * 4)
    }

    fn set_extent_used_pages(&mut self, extent: u32, used: u32) {
        self.meta
            .write_u32_at(META_HEADER + extent as usize * 4, used);
    }

    /// Allocates a free logical page and returns its id.
    pub fn allocate_page(&mut self) -> Result<PageId> {
        if self.num_allocated_pages() >= MAX_VALID_PAGE_ID {
            return Err(StorageError::OutOfSpace);
        }
        let num_extents = self.num_extents();
        for extent in 0..num_extents {
            let used = self.extent_used_pages(extent);
            if used < BITMAP_SIZE {
                let mut bitmap = Page::new(0);
                self.read_physical_page(bitmap_physical_id(extent), &mut bitmap.data)?;
                let offset = bitmap_allocate(&mut bitmap)
                    .ok_or(StorageError::Corrupted("bitmap full under extent counter"))?;
                self.meta.write_u32_at(0, self.num_allocated_pages() + 1);
                self.set_extent_used_pages(extent, used + 1);
                self.write_physical_page(bitmap_physical_id(extent), &bitmap.data)?;
                return Ok((extent * BITMAP_SIZE + offset) as PageId);
            }
        }
        // Every extent is full: append a new one.
        if num_extents >= MAX_EXTENTS {
            return Err(StorageError::OutOfSpace);
        }
        let mut bitmap = Page::new(0);
        let offset = bitmap_allocate(&mut bitmap)
            .ok_or(StorageError::Corrupted("fresh bitmap refused allocation"))?;
        self.meta.write_u32_at(0, self.num_allocated_pages() + 1);
        self.meta.write_u32_at(4, num_extents + 1);
        self.set_extent_used_pages(num_extents, 1);
        self.write_physical_page(bitmap_physical_id(num_extents), &bitmap.data)?;
        substrate_debug_log!("[DiskManager::allocate_page] opened extent {num_extents}");
        Ok((num_extents * BITMAP_SIZE + offset) as PageId)
    }

    /// Returns the page to its extent's free pool.
    pub fn deallocate_page(&mut self, logical: PageId) -> Result<()> {
        if logical < 0 {
            return Err(StorageError::InvalidPage(logical));
        }
        let extent = logical as u32 / BITMAP_SIZE;
        let offset = logical as u32 % BITMAP_SIZE;
        if extent >= self.num_extents() {
            return Err(StorageError::InvalidPage(logical));
        }
        let mut bitmap = Page::new(0);
        self.read_physical_page(bitmap_physical_id(extent), &mut bitmap.data)?;
        if !bitmap_deallocate(&mut bitmap, offset) {
            return Err(StorageError::InvalidPage(logical));
        }
        self.meta.write_u32_at(0, self.num_allocated_pages() - 1);
        let used = self.extent_used_pages(extent);
        self.set_extent_used_pages(extent, used - 1);
        self.write_physical_page(bitmap_physical_id(extent), &bitmap.data)?;
        Ok(())
    }

    /// An id past the highest extent is considered free.
    pub fn is_page_free(&mut self, logical: PageId) -> bool {
        if logical < 0 {
            return false;
        }
        let extent = logical as u32 / BITMAP_SIZE;
        let offset = logical as u32 % BITMAP_SIZE;
        if extent >= self.num_extents() {
            return true;
        }
        let mut bitmap = Page::new(0);
        if self
            .read_physical_page(bitmap_physical_id(extent), &mut bitmap.data)
            .is_err()
        {
            return false;
        }
        bitmap_is_free(&bitmap, offset)
    }

    pub fn read_page(&mut self, logical: PageId, buf: &mut [u8; PAGE_SIZE]) -> Result<()> {
        if logical < 0 {
            return Err(StorageError::InvalidPage(logical));
        }
        self.read_physical_page(data_physical_id(logical), buf)
    }

    pub fn write_page(&mut self, logical: PageId, buf: &[u8; PAGE_SIZE]) -> Result<()> {
        if logical < 0 {
            return Err(StorageError::InvalidPage(logical));
        }
        self.write_physical_page(data_physical_id(logical), buf)
    }

    fn read_physical_page(&mut self, physical: u64, buf: &mut [u8; PAGE_SIZE]) -> Result<()> {
        let offset = physical * PAGE_SIZE as u64;
        let file_len = self.file.metadata()?.len();
        if offset >= file_len {
            buf.fill(0);
            return Ok(());
        }
        self.file.seek(SeekFrom::Start(offset))?;
        let mut read_total = 0;
        while read_total < PAGE_SIZE {
            let n = self.file.read(&mut buf[read_total..])?;
            if n == 0 {
                break;
            }
            read_total += n;
        }
        // A short read past end-of-file yields zeros, not an error.
        buf[read_total..].fill(0);
        Ok(())
    }

    fn write_physical_page(&mut self, physical: u64, buf: &[u8; PAGE_SIZE]) -> Result<()> {
        let offset = physical * PAGE_SIZE as u64;
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(buf)?;
        Ok(())
    }

    /// Forces everything written so far down to the device.
    pub fn sync(&mut self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }

    /// Persists the metadata page and syncs the file.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        let meta = self.meta.clone();
        self.write_physical_page(0, &meta.data)?;
        self.file.sync_all()?;
        self.closed = true;
        Ok(())
    }
}

impl Drop for DiskManager {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(e) = self.close() {
                substrate_debug_log!("[DiskManager::drop] close failed: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::prelude::*;
    use std::collections::HashSet;
    use tempfile::tempdir;

    fn open_manager(dir: &tempfile::TempDir) -> DiskManager {
        DiskManager::open(dir.path().join("test.db")).unwrap()
    }

    #[test]
    fn allocates_sequential_ids_from_a_fresh_file() {
        let dir = tempdir().unwrap();
        let mut disk = open_manager(&dir);
        assert!(disk.is_fresh());
        for expected in 0..16 {
            assert_eq!(disk.allocate_page().unwrap(), expected);
        }
        assert_eq!(disk.num_allocated_pages(), 16);
        assert_eq!(disk.num_extents(), 1);
    }

    #[test]
    fn deallocated_pages_are_reused_first() {
        let dir = tempdir().unwrap();
        let mut disk = open_manager(&dir);
        for _ in 0..8 {
            disk.allocate_page().unwrap();
        }
        disk.deallocate_page(3).unwrap();
        assert!(disk.is_page_free(3));
        assert_eq!(disk.allocate_page().unwrap(), 3);
        assert!(!disk.is_page_free(3));
    }

    #[test]
    fn deallocating_a_free_page_fails() {
        let dir = tempdir().unwrap();
        let mut disk = open_manager(&dir);
        disk.allocate_page().unwrap();
        assert!(matches!(
            disk.deallocate_page(1),
            Err(StorageError::InvalidPage(1))
        ));
        assert!(matches!(
            disk.deallocate_page(-4),
            Err(StorageError::InvalidPage(-4))
        ));
    }

    #[test]
    fn ids_past_the_highest_extent_count_as_free() {
        let dir = tempdir().unwrap();
        let mut disk = open_manager(&dir);
        disk.allocate_page().unwrap();
        assert!(disk.is_page_free(BITMAP_SIZE as PageId * 3));
    }

    #[test]
    fn allocation_bookkeeping_matches_a_random_workload() {
        let dir = tempdir().unwrap();
        let mut disk = open_manager(&dir);
        let mut rng = StdRng::seed_from_u64(0x5eed);
        let mut live: HashSet<PageId> = HashSet::new();
        for _ in 0..600 {
            if live.is_empty() || rng.gen_bool(0.6) {
                let id = disk.allocate_page().unwrap();
                assert!(live.insert(id), "page {id} handed out twice");
            } else {
                let id = *live.iter().choose(&mut rng).unwrap();
                live.remove(&id);
                disk.deallocate_page(id).unwrap();
            }
            assert_eq!(disk.num_allocated_pages() as usize, live.len());
        }
        for id in 0..800 {
            assert_eq!(disk.is_page_free(id), !live.contains(&id));
        }
    }

    #[test]
    fn page_contents_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");
        let page_id;
        {
            let mut disk = DiskManager::open(&path).unwrap();
            page_id = disk.allocate_page().unwrap();
            let mut buf = [0u8; PAGE_SIZE];
            buf[0] = 0xAB;
            buf[PAGE_SIZE - 1] = 0xCD;
            disk.write_page(page_id, &buf).unwrap();
            disk.close().unwrap();
        }
        let mut disk = DiskManager::open(&path).unwrap();
        assert_eq!(disk.num_allocated_pages(), 1);
        assert!(!disk.is_page_free(page_id));
        let mut buf = [0u8; PAGE_SIZE];
        disk.read_page(page_id, &mut buf).unwrap();
        assert_eq!(buf[0], 0xAB);
        assert_eq!(buf[PAGE_SIZE - 1], 0xCD);
    }

    #[test]
    fn reads_past_end_of_file_are_zero_filled() {
        let dir = tempdir().unwrap();
        let mut disk = open_manager(&dir);
        let id = disk.allocate_page().unwrap();
        let mut buf = [0xFFu8; PAGE_SIZE];
        disk.read_page(id, &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 0));
    }

    // The first extent holds BITMAP_SIZE pages; filling it and allocating
    // once more must open extent 1 at logical id BITMAP_SIZE.
    #[test]
    fn crossing_an_extent_boundary_opens_a_new_extent() {
        let dir = tempdir().unwrap();
        let mut disk = open_manager(&dir);
        for expected in 0..BITMAP_SIZE {
            assert_eq!(disk.allocate_page().unwrap(), expected as PageId);
        }
        assert_eq!(disk.num_extents(), 1);
        assert_eq!(disk.allocate_page().unwrap(), BITMAP_SIZE as PageId);
        assert_eq!(disk.num_extents(), 2);
    }

    #[test]
    fn stale_next_free_hint_falls_back_to_a_scan() {
        let mut bitmap = Page::new(0);
        assert_eq!(bitmap_allocate(&mut bitmap), Some(0));
        assert_eq!(bitmap_allocate(&mut bitmap), Some(1));
        // Poison the hint to point at an allocated bit.
        bitmap.write_u32_at(4, 0);
        assert_eq!(bitmap_allocate(&mut bitmap), Some(2));
        assert_eq!(bitmap.read_u32_at(0), 3);
    }
}
