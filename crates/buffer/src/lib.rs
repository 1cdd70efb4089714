//! Raw page I/O and the buffer pool that caches pages in memory.
//!
//! [`BaseFile`] owns one OS file and hands out page numbers; [`BufferPool`]
//! caches fixed-size frames on top of a set of registered `BaseFile`s,
//! enforcing pin/unpin accounting and strict LRU replacement.

#[cfg(test)]
mod tests;

use common::{fatal_io, PageId, PAGE_SIZE};
use std::collections::{HashMap, VecDeque};
use std::fs::OpenOptions;
use std::io;
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::sync::atomic::{AtomicU16, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

static NEXT_FILE_ID: AtomicU16 = AtomicU16::new(1);

/// Owns one OS file and assigns itself a file-id from a process-wide
/// counter starting at 1.
pub struct BaseFile {
    file_id: u16,
    file: std::fs::File,
    page_count: AtomicU32,
}

impl BaseFile {
    /// Opens (or creates) the backing file, truncating any prior content --
    /// every table and log file opens with create+read+write+truncate,
    /// matching the fact that this engine never replays a log on restart.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        let len = file.metadata()?.len();
        let page_count = (len / PAGE_SIZE as u64) as u32;
        let file_id = NEXT_FILE_ID.fetch_add(1, Ordering::SeqCst);
        Ok(Self {
            file_id,
            file,
            page_count: AtomicU32::new(page_count),
        })
    }

    pub fn id(&self) -> u16 {
        self.file_id
    }

    pub fn page_count(&self) -> u32 {
        self.page_count.load(Ordering::SeqCst)
    }

    /// Atomically claims the next page number, zero-fills it on disk and
    /// fsyncs before returning. OS errors here are fatal.
    pub fn create_page(&self) -> PageId {
        let page_num = self.page_count.fetch_add(1, Ordering::SeqCst);
        let zero = [0u8; PAGE_SIZE];
        let offset = page_num as u64 * PAGE_SIZE as u64;
        if let Err(e) = self.file.write_at(&zero, offset) {
            fatal_io("BaseFile::create_page write", &e);
        }
        if let Err(e) = self.file.sync_data() {
            fatal_io("BaseFile::create_page sync", &e);
        }
        PageId::new(self.file_id, page_num)
    }

    /// Writes `buf` at `pid`'s offset and fsyncs. `false` on any I/O error
    /// or a pid that doesn't belong to this file.
    pub fn flush_page(&self, pid: PageId, buf: &[u8; PAGE_SIZE]) -> bool {
        if !pid.is_valid() || pid.file_id() != self.file_id {
            return false;
        }
        let offset = pid.page_num() as u64 * PAGE_SIZE as u64;
        if self.file.write_at(buf, offset).is_err() {
            return false;
        }
        self.file.sync_data().is_ok()
    }

    /// Reads `PAGE_SIZE` bytes at `pid`'s offset. `false` on a short read,
    /// I/O error, or a pid that doesn't belong to this file.
    pub fn load_page(&self, pid: PageId, buf: &mut [u8; PAGE_SIZE]) -> bool {
        if !pid.is_valid() || pid.file_id() != self.file_id {
            return false;
        }
        let offset = pid.page_num() as u64 * PAGE_SIZE as u64;
        matches!(self.file.read_at(buf, offset), Ok(n) if n == PAGE_SIZE)
    }
}

struct FrameInner {
    page_id: PageId,
    pin_count: u16,
    is_dirty: bool,
    data: Box<[u8; PAGE_SIZE]>,
}

/// A pinned frame handed back from [`BufferPool::pin`]. Byte access goes
/// through [`Frame::with_data`], which locks the frame's own latch for the
/// duration of the closure.
pub struct Frame {
    pool: Arc<BufferPool>,
    idx: usize,
}

impl Frame {
    pub fn page_id(&self) -> PageId {
        self.pool.frames[self.idx].lock().unwrap().page_id
    }

    pub fn with_data<R>(&self, f: impl FnOnce(&mut [u8; PAGE_SIZE]) -> R) -> R {
        let mut inner = self.pool.frames[self.idx].lock().unwrap();
        f(&mut inner.data)
    }

    pub fn set_dirty(&self) {
        self.pool.frames[self.idx].lock().unwrap().is_dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.pool.frames[self.idx].lock().unwrap().is_dirty
    }
}

/// Cache of fixed-size page frames. Constructed with a fixed `page_count`;
/// never grows. [`BufferPool::pin`]/[`BufferPool::unpin`] track per-frame
/// pin counts and evict the least-recently-unpinned frame, flushing it
/// first if dirty.
pub struct BufferPool {
    frames: Vec<Mutex<FrameInner>>,
    page_map: Mutex<HashMap<PageId, usize>>,
    lru: Mutex<VecDeque<usize>>,
    file_map: Mutex<HashMap<u16, Arc<BaseFile>>>,
}

static SINGLETON: OnceLock<Mutex<Option<Arc<BufferPool>>>> = OnceLock::new();

fn singleton_cell() -> &'static Mutex<Option<Arc<BufferPool>>> {
    SINGLETON.get_or_init(|| Mutex::new(None))
}

impl BufferPool {
    pub fn new(page_count: usize) -> Arc<Self> {
        let frames = (0..page_count)
            .map(|_| {
                Mutex::new(FrameInner {
                    page_id: PageId::INVALID,
                    pin_count: 0,
                    is_dirty: false,
                    data: Box::new([0u8; PAGE_SIZE]),
                })
            })
            .collect();
        let lru = (0..page_count).collect();
        Arc::new(BufferPool {
            frames,
            page_map: Mutex::new(HashMap::new()),
            lru: Mutex::new(lru),
            file_map: Mutex::new(HashMap::new()),
        })
    }

    /// Installs the process-global pool. Must be called before any `get()`.
    pub fn initialize(page_count: usize) {
        *singleton_cell().lock().unwrap() = Some(BufferPool::new(page_count));
    }

    /// Flushes every dirty frame and drops the process-global pool.
    pub fn uninitialize() {
        if let Some(pool) = singleton_cell().lock().unwrap().take() {
            pool.flush_all();
        }
    }

    pub fn get() -> Arc<BufferPool> {
        singleton_cell()
            .lock()
            .unwrap()
            .clone()
            .expect("BufferPool::initialize must be called before use")
    }

    pub fn register_file(&self, bf: Arc<BaseFile>) {
        self.file_map.lock().unwrap().insert(bf.id(), bf);
    }

    /// Flushes every dirty frame through its registered `BaseFile`,
    /// regardless of pin state. Used by `uninitialize` at shutdown.
    pub fn flush_all(&self) {
        let file_map = self.file_map.lock().unwrap();
        for frame in &self.frames {
            let mut inner = frame.lock().unwrap();
            if inner.is_dirty && inner.page_id.is_valid() {
                if let Some(bf) = file_map.get(&inner.page_id.file_id()) {
                    if bf.flush_page(inner.page_id, &inner.data) {
                        inner.is_dirty = false;
                    }
                }
            }
        }
    }

    pub fn pin(self: &Arc<Self>, pid: PageId) -> Option<Frame> {
        if !pid.is_valid() {
            return None;
        }
        let mut page_map = self.page_map.lock().unwrap();
        let mut lru = self.lru.lock().unwrap();

        if let Some(&idx) = page_map.get(&pid) {
            if let Some(pos) = lru.iter().position(|&i| i == idx) {
                lru.remove(pos);
            }
            self.frames[idx].lock().unwrap().pin_count += 1;
            return Some(Frame {
                pool: self.clone(),
                idx,
            });
        }

        let idx = lru.pop_front()?;
        let mut frame = self.frames[idx].lock().unwrap();

        if frame.page_id.is_valid() {
            if frame.is_dirty {
                let flushed = {
                    let file_map = self.file_map.lock().unwrap();
                    file_map
                        .get(&frame.page_id.file_id())
                        .map(|bf| bf.flush_page(frame.page_id, &frame.data))
                        .unwrap_or(false)
                };
                if !flushed {
                    fatal_io(
                        "BufferPool::pin eviction flush",
                        &io::Error::other("dirty frame flush failed during eviction"),
                    );
                }
                frame.is_dirty = false;
            }
            page_map.remove(&frame.page_id);
        }

        let loaded = {
            let file_map = self.file_map.lock().unwrap();
            file_map
                .get(&pid.file_id())
                .map(|bf| bf.load_page(pid, &mut frame.data))
                .unwrap_or(false)
        };
        if !loaded {
            drop(frame);
            lru.push_front(idx);
            return None;
        }

        frame.page_id = pid;
        frame.pin_count = 1;
        frame.is_dirty = false;
        drop(frame);
        page_map.insert(pid, idx);

        Some(Frame {
            pool: self.clone(),
            idx,
        })
    }

    pub fn unpin(self: &Arc<Self>, frame: Frame) {
        let now_unpinned = {
            let mut inner = self.frames[frame.idx].lock().unwrap();
            inner.pin_count = inner.pin_count.saturating_sub(1);
            inner.pin_count == 0
        };
        let idx = frame.idx;
        if now_unpinned {
            self.lru.lock().unwrap().push_back(idx);
        }
    }

    /// Number of frames currently pinned. Exposed for tests asserting the
    /// pool's pin/eviction invariants.
    pub fn pinned_count(&self) -> usize {
        self.frames
            .iter()
            .filter(|f| f.lock().unwrap().pin_count > 0)
            .count()
    }

    pub fn capacity(&self) -> usize {
        self.frames.len()
    }
}
