use std::cell::Cell;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use lazy_static::lazy_static;
use log::{debug, warn};

use crate::common::{Fd, PageId, PAGE_SIZE};
use crate::errors::Result;
use crate::storage::disk_manager::DiskManager;

use super::lru_replacer::LruReplacer;
use super::FrameId;

lazy_static! {
    static ref EMPTY_PAGE: [u8; PAGE_SIZE] = [0; PAGE_SIZE];
}

/// Scoped access to one pinned page. Construction pins the frame; `Drop`
/// performs the matching unpin, carrying the dirty flag set by `write`.
/// Callers therefore cannot leak a pin.
pub struct PageGuard<'a> {
    pool: &'a BufferManager,
    frame_id: FrameId,
    page_id: PageId,
    dirty: Cell<bool>,
}

impl<'a> PageGuard<'a> {
    fn new(pool: &'a BufferManager, frame_id: FrameId, page_id: PageId) -> Self {
        Self {
            pool,
            frame_id,
            page_id,
            dirty: Cell::new(false),
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn read(&self) -> RwLockReadGuard<'_, [u8; PAGE_SIZE]> {
        self.pool.pages[self.frame_id].read().unwrap()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, [u8; PAGE_SIZE]> {
        self.dirty.set(true);
        self.pool.pages[self.frame_id].write().unwrap()
    }
}

impl Drop for PageGuard<'_> {
    fn drop(&mut self) {
        if !self.pool.unpin_page(self.page_id, self.dirty.get()) {
            warn!("unpin of {} failed on guard drop", self.page_id);
        }
    }
}

struct FrameMeta {
    id: PageId,
    pin_count: i32,
    dirty: bool,
}

impl FrameMeta {
    fn reset(&mut self) {
        self.id = PageId::invalid();
        self.pin_count = 0;
        self.dirty = false;
    }
}

struct PoolState {
    frames: Box<[FrameMeta]>,
    page_table: HashMap<PageId, FrameId>,
    free_list: VecDeque<FrameId>,
}

/// BufferManager owns a fixed array of page-sized frames and maps logical
/// `PageId`s onto them. Hits are served from memory; misses evict a victim
/// (free list first, then LRU), writing it back when dirty, and read the
/// requested page from disk.
///
/// One mutex (the latch) guards the page table, the free list and all frame
/// metadata; page bytes sit behind per-frame `RwLock`s so readers of
/// distinct pages do not serialize. The replacer keeps its own subordinate
/// lock and is never held across a call back into the pool.
pub struct BufferManager {
    state: Mutex<PoolState>,
    pages: Box<[RwLock<[u8; PAGE_SIZE]>]>,
    replacer: LruReplacer,
    disk_manager: Arc<DiskManager>,
}

impl BufferManager {
    pub fn new(disk_manager: Arc<DiskManager>, pool_size: usize) -> Self {
        let frames = (0..pool_size)
            .map(|_| FrameMeta {
                id: PageId::invalid(),
                pin_count: 0,
                dirty: false,
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();
        let pages = (0..pool_size)
            .map(|_| RwLock::new([0u8; PAGE_SIZE]))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            state: Mutex::new(PoolState {
                frames,
                page_table: HashMap::new(),
                free_list: (0..pool_size).collect(),
            }),
            pages,
            replacer: LruReplacer::new(pool_size),
            disk_manager,
        }
    }

    /// Free frames are consumed before the LRU tail is churned.
    fn find_victim_frame(&self, state: &mut PoolState) -> Option<FrameId> {
        if let Some(frame_id) = state.free_list.pop_front() {
            return Some(frame_id);
        }
        if self.replacer.size() > 0 {
            return self.replacer.victim();
        }
        None
    }

    /// Writes the frame's current page back if dirty and removes its page
    /// table entry, leaving the frame ready to host another page.
    fn write_back_victim(&self, state: &mut PoolState, frame_id: FrameId) -> Result<()> {
        let meta = &mut state.frames[frame_id];
        if meta.dirty {
            debug!("writing back dirty victim {}", meta.id);
            let data = self.pages[frame_id].read().unwrap();
            self.disk_manager
                .write_page(meta.id.fd, meta.id.page_no, data.as_slice())?;
            state.frames[frame_id].dirty = false;
        }
        let old_id = state.frames[frame_id].id;
        state.page_table.remove(&old_id);
        Ok(())
    }

    /// Returns the requested page pinned, or `None` when every frame is
    /// pinned by someone else.
    pub fn fetch_page(&self, page_id: PageId) -> Result<Option<PageGuard<'_>>> {
        let mut state = self.state.lock().unwrap();

        if let Some(&frame_id) = state.page_table.get(&page_id) {
            state.frames[frame_id].pin_count += 1;
            self.replacer.pin(frame_id);
            return Ok(Some(PageGuard::new(self, frame_id, page_id)));
        }

        let frame_id = match self.find_victim_frame(&mut state) {
            Some(frame_id) => frame_id,
            None => return Ok(None),
        };
        self.write_back_victim(&mut state, frame_id)?;

        let read_result = {
            let mut data = self.pages[frame_id].write().unwrap();
            self.disk_manager
                .read_page(page_id.fd, page_id.page_no, data.as_mut_slice())
        };
        if let Err(e) = read_result {
            state.frames[frame_id].reset();
            state.free_list.push_back(frame_id);
            return Err(e);
        }

        let meta = &mut state.frames[frame_id];
        meta.id = page_id;
        meta.pin_count = 1;
        state.page_table.insert(page_id, frame_id);
        self.replacer.pin(frame_id);
        Ok(Some(PageGuard::new(self, frame_id, page_id)))
    }

    /// Allocates the next page number of `fd` and returns it pinned with
    /// zeroed contents. The caller fills the page and unpins dirty; nothing
    /// reaches disk before that write-back.
    pub fn new_page(&self, fd: Fd) -> Result<Option<PageGuard<'_>>> {
        let mut state = self.state.lock().unwrap();

        let frame_id = match self.find_victim_frame(&mut state) {
            Some(frame_id) => frame_id,
            None => return Ok(None),
        };
        self.write_back_victim(&mut state, frame_id)?;

        let page_no = match self.disk_manager.allocate_page(fd) {
            Ok(page_no) => page_no,
            Err(e) => {
                state.frames[frame_id].reset();
                state.free_list.push_back(frame_id);
                return Err(e);
            }
        };
        let page_id = PageId::new(fd, page_no);

        self.pages[frame_id]
            .write()
            .unwrap()
            .copy_from_slice(EMPTY_PAGE.as_slice());

        let meta = &mut state.frames[frame_id];
        meta.id = page_id;
        meta.pin_count = 1;
        state.page_table.insert(page_id, frame_id);
        self.replacer.pin(frame_id);
        Ok(Some(PageGuard::new(self, frame_id, page_id)))
    }

    /// Releases one pin. The dirty flag is OR-ed in, never cleared. Returns
    /// false for an unknown page or one that is not pinned.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        let mut state = self.state.lock().unwrap();

        let frame_id = match state.page_table.get(&page_id) {
            Some(&frame_id) => frame_id,
            None => return false,
        };
        let meta = &mut state.frames[frame_id];
        if meta.pin_count <= 0 {
            return false;
        }
        meta.pin_count -= 1;
        if is_dirty {
            meta.dirty = true;
        }
        if meta.pin_count == 0 {
            self.replacer.unpin(frame_id);
        }
        true
    }

    /// Writes the page to disk regardless of its dirty state. Returns false
    /// when the page is not resident.
    pub fn flush_page(&self, page_id: PageId) -> Result<bool> {
        let mut state = self.state.lock().unwrap();

        let frame_id = match state.page_table.get(&page_id) {
            Some(&frame_id) => frame_id,
            None => return Ok(false),
        };
        let data = self.pages[frame_id].read().unwrap();
        self.disk_manager
            .write_page(page_id.fd, page_id.page_no, data.as_slice())?;
        drop(data);
        state.frames[frame_id].dirty = false;
        Ok(true)
    }

    /// Drops the page from the pool, writing it back first when dirty.
    /// Absent pages report success; pinned pages refuse.
    pub fn delete_page(&self, page_id: PageId) -> Result<bool> {
        let mut state = self.state.lock().unwrap();

        let frame_id = match state.page_table.get(&page_id) {
            Some(&frame_id) => frame_id,
            None => return Ok(true),
        };
        if state.frames[frame_id].pin_count > 0 {
            return Ok(false);
        }
        if state.frames[frame_id].dirty {
            let data = self.pages[frame_id].read().unwrap();
            self.disk_manager
                .write_page(page_id.fd, page_id.page_no, data.as_slice())?;
        }
        state.page_table.remove(&page_id);
        state.frames[frame_id].reset();
        self.pages[frame_id]
            .write()
            .unwrap()
            .copy_from_slice(EMPTY_PAGE.as_slice());
        state.free_list.push_back(frame_id);
        self.replacer.pin(frame_id);
        Ok(true)
    }

    /// Writes back every resident page of `fd` and clears its dirty bit.
    pub fn flush_file_pages(&self, fd: Fd) -> Result<()> {
        let mut state = self.state.lock().unwrap();

        let resident: Vec<(PageId, FrameId)> = state
            .page_table
            .iter()
            .filter(|(page_id, _)| page_id.fd == fd)
            .map(|(&page_id, &frame_id)| (page_id, frame_id))
            .collect();
        for (page_id, frame_id) in resident {
            let data = self.pages[frame_id].read().unwrap();
            self.disk_manager
                .write_page(page_id.fd, page_id.page_no, data.as_slice())?;
            drop(data);
            state.frames[frame_id].dirty = false;
        }
        Ok(())
    }

    /// Flushes and removes every unpinned resident page of `fd`, so that a
    /// later open reusing the same fd value cannot observe stale frames.
    pub fn evict_file_pages(&self, fd: Fd) -> Result<()> {
        let mut state = self.state.lock().unwrap();

        let resident: Vec<(PageId, FrameId)> = state
            .page_table
            .iter()
            .filter(|(page_id, _)| page_id.fd == fd)
            .map(|(&page_id, &frame_id)| (page_id, frame_id))
            .collect();
        for (page_id, frame_id) in resident {
            if state.frames[frame_id].pin_count > 0 {
                warn!("leaving pinned page {} resident across close", page_id);
                continue;
            }
            if state.frames[frame_id].dirty {
                let data = self.pages[frame_id].read().unwrap();
                self.disk_manager
                    .write_page(page_id.fd, page_id.page_no, data.as_slice())?;
            }
            state.page_table.remove(&page_id);
            state.frames[frame_id].reset();
            state.free_list.push_back(frame_id);
            self.replacer.pin(frame_id);
        }
        Ok(())
    }
}
