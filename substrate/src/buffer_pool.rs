//! Manages the buffer pool, a fixed set of in-memory frames that cache
//! logical disk pages.
//!
//! Structural state (page table, free list, replacer) lives under one
//! coarse mutex; each frame's payload has its own readers-writer latch so
//! structural operations never wait on in-page work. Pages are handed out
//! as [`PageGuard`]s whose drop releases the pin, so a fetch can never
//! leak a pin count.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::disk::DiskManager;
use crate::error::{Result, StorageError};
use crate::{Page, PageId};

#[derive(Debug, Default)]
struct FrameMeta {
    pin_count: u32,
    is_dirty: bool,
}

/// A single frame in the buffer pool.
struct Frame {
    page: RwLock<Page>,
    meta: Mutex<FrameMeta>,
}

/// Least-recently-unpinned eviction order with lazy deletion: the queue may
/// carry stale entries, membership is authoritative.
#[derive(Default)]
struct LruReplacer {
    queue: VecDeque<usize>,
    members: HashSet<usize>,
}

impl LruReplacer {
    fn insert(&mut self, frame: usize) {
        if self.members.insert(frame) {
            self.queue.push_back(frame);
        }
    }

    fn remove(&mut self, frame: usize) {
        self.members.remove(&frame);
    }

    fn evict(&mut self) -> Option<usize> {
        while let Some(frame) = self.queue.pop_front() {
            if self.members.remove(&frame) {
                return Some(frame);
            }
        }
        None
    }
}

struct PoolInner {
    page_table: HashMap<PageId, usize>,
    /// Reverse mapping: which page each frame currently holds.
    frame_page: Vec<Option<PageId>>,
    free_list: Vec<usize>,
    replacer: LruReplacer,
}

/// The buffer pool manager.
pub struct BufferPoolManager {
    disk: Mutex<DiskManager>,
    frames: Vec<Frame>,
    inner: Mutex<PoolInner>,
}

/// An RAII pin on a resident page. `read`/`write` take the page latch;
/// `write` also marks the frame dirty. Dropping the guard unpins.
pub struct PageGuard<'a> {
    bpm: &'a BufferPoolManager,
    page_id: PageId,
    frame: &'a Frame,
}

impl PageGuard<'_> {
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn read(&self) -> RwLockReadGuard<'_, Page> {
        self.frame.page.read().unwrap()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, Page> {
        self.frame.meta.lock().unwrap().is_dirty = true;
        self.frame.page.write().unwrap()
    }
}

impl Drop for PageGuard<'_> {
    fn drop(&mut self) {
        self.bpm.unpin_page(self.page_id);
    }
}

impl BufferPoolManager {
    pub fn new(pool_size: usize, disk: DiskManager) -> Self {
        let mut frames = Vec::with_capacity(pool_size);
        let mut free_list = Vec::with_capacity(pool_size);
        for i in 0..pool_size {
            frames.push(Frame {
                page: RwLock::new(Page::new(0)),
                meta: Mutex::new(FrameMeta::default()),
            });
            free_list.push(i);
        }
        free_list.reverse();
        Self {
            disk: Mutex::new(disk),
            frames,
            inner: Mutex::new(PoolInner {
                page_table: HashMap::new(),
                frame_page: vec![None; pool_size],
                free_list,
                replacer: LruReplacer::default(),
            }),
        }
    }

    pub fn pool_size(&self) -> usize {
        self.frames.len()
    }

    /// Pins the page, reading it from disk if it is not resident.
    pub fn fetch_page(&self, page_id: PageId) -> Result<PageGuard<'_>> {
        if page_id < 0 {
            return Err(StorageError::InvalidPage(page_id));
        }
        let mut inner = self.inner.lock().unwrap();
        if let Some(&idx) = inner.page_table.get(&page_id) {
            self.pin_resident(&mut inner, idx);
            return Ok(self.guard(page_id, idx));
        }

        let idx = self.take_victim(&mut inner)?;
        let mut page = Page::new(page_id);
        if let Err(e) = self.disk.lock().unwrap().read_page(page_id, &mut page.data) {
            inner.free_list.push(idx);
            return Err(e);
        }
        let frame = &self.frames[idx];
        *frame.page.write().unwrap() = page;
        *frame.meta.lock().unwrap() = FrameMeta {
            pin_count: 1,
            is_dirty: false,
        };
        inner.page_table.insert(page_id, idx);
        inner.frame_page[idx] = Some(page_id);
        Ok(self.guard(page_id, idx))
    }

    /// Allocates a fresh logical page and pins it as a zeroed, dirty frame.
    pub fn new_page(&self) -> Result<PageGuard<'_>> {
        let mut inner = self.inner.lock().unwrap();
        let idx = self.take_victim(&mut inner)?;
        let page_id = match self.disk.lock().unwrap().allocate_page() {
            Ok(id) => id,
            Err(e) => {
                inner.free_list.push(idx);
                return Err(e);
            }
        };
        let frame = &self.frames[idx];
        *frame.page.write().unwrap() = Page::new(page_id);
        *frame.meta.lock().unwrap() = FrameMeta {
            pin_count: 1,
            is_dirty: true,
        };
        inner.page_table.insert(page_id, idx);
        inner.frame_page[idx] = Some(page_id);
        Ok(self.guard(page_id, idx))
    }

    /// Writes the page back if it is resident and dirty. Pin counts are
    /// unaffected.
    pub fn flush_page(&self, page_id: PageId) -> Result<()> {
        let inner = self.inner.lock().unwrap();
        if let Some(&idx) = inner.page_table.get(&page_id) {
            self.flush_frame(page_id, idx)?;
            self.disk.lock().unwrap().sync()?;
        }
        Ok(())
    }

    pub fn flush_all_pages(&self) -> Result<()> {
        let inner = self.inner.lock().unwrap();
        let resident: Vec<(PageId, usize)> =
            inner.page_table.iter().map(|(&id, &idx)| (id, idx)).collect();
        for (page_id, idx) in resident {
            self.flush_frame(page_id, idx)?;
        }
        self.disk.lock().unwrap().sync()?;
        Ok(())
    }

    /// Releases the frame (the page must be unpinned) and returns the
    /// logical page to the disk allocator.
    pub fn delete_page(&self, page_id: PageId) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(&idx) = inner.page_table.get(&page_id) {
            let mut meta = self.frames[idx].meta.lock().unwrap();
            if meta.pin_count > 0 {
                return Err(StorageError::InvalidPage(page_id));
            }
            *meta = FrameMeta::default();
            drop(meta);
            inner.page_table.remove(&page_id);
            inner.frame_page[idx] = None;
            inner.replacer.remove(idx);
            inner.free_list.push(idx);
        }
        self.disk.lock().unwrap().deallocate_page(page_id)
    }

    /// Debug predicate: true iff no frame holds a pin.
    pub fn check_all_unpinned(&self) -> bool {
        self.frames
            .iter()
            .all(|f| f.meta.lock().unwrap().pin_count == 0)
    }

    pub fn is_resident(&self, page_id: PageId) -> bool {
        self.inner.lock().unwrap().page_table.contains_key(&page_id)
    }

    pub fn is_page_free(&self, page_id: PageId) -> bool {
        self.disk.lock().unwrap().is_page_free(page_id)
    }

    /// Flushes every dirty frame and closes the underlying file.
    pub fn close(&self) -> Result<()> {
        self.flush_all_pages()?;
        self.disk.lock().unwrap().close()
    }

    fn guard(&self, page_id: PageId, idx: usize) -> PageGuard<'_> {
        PageGuard {
            bpm: self,
            page_id,
            frame: &self.frames[idx],
        }
    }

    fn pin_resident(&self, inner: &mut PoolInner, idx: usize) {
        let mut meta = self.frames[idx].meta.lock().unwrap();
        meta.pin_count += 1;
        if meta.pin_count == 1 {
            inner.replacer.remove(idx);
        }
    }

    /// Finds a frame for a new mapping: the free list first, then the
    /// least-recently-unpinned frame, writing its old page back if dirty.
    fn take_victim(&self, inner: &mut PoolInner) -> Result<usize> {
        if let Some(idx) = inner.free_list.pop() {
            return Ok(idx);
        }
        let idx = inner.replacer.evict().ok_or(StorageError::NoAvailableFrame)?;
        if let Some(old_id) = inner.frame_page[idx].take() {
            inner.page_table.remove(&old_id);
            let frame = &self.frames[idx];
            let mut meta = frame.meta.lock().unwrap();
            debug_assert_eq!(meta.pin_count, 0, "evicting a pinned frame");
            if meta.is_dirty {
                let page = frame.page.read().unwrap();
                self.disk.lock().unwrap().write_page(old_id, &page.data)?;
                meta.is_dirty = false;
            }
        }
        Ok(idx)
    }

    fn flush_frame(&self, page_id: PageId, idx: usize) -> Result<()> {
        let frame = &self.frames[idx];
        let mut meta = frame.meta.lock().unwrap();
        if meta.is_dirty {
            let page = frame.page.read().unwrap();
            self.disk.lock().unwrap().write_page(page_id, &page.data)?;
            meta.is_dirty = false;
        }
        Ok(())
    }

    fn unpin_page(&self, page_id: PageId) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(&idx) = inner.page_table.get(&page_id) {
            let mut meta = self.frames[idx].meta.lock().unwrap();
            debug_assert!(meta.pin_count > 0, "unpinning page {page_id} with pin 0");
            if meta.pin_count > 0 {
                meta.pin_count -= 1;
                if meta.pin_count == 0 {
                    inner.replacer.insert(idx);
                }
            }
        }
    }
}
