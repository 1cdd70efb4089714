//! Append-only write-ahead log: an in-memory buffer flushed to a single
//! log file on demand. The log is written for durability bookkeeping only
//! -- this engine never replays it on restart.


use common::fatal_io;
use std::fs::OpenOptions;
use std::io;
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::sync::{Arc, Mutex, OnceLock};

/// `id(8) + type(1) + payload_size(4)` bytes, followed by the payload and
/// an 8-byte trailer holding the record's own starting LSN.
const HEADER_SIZE: usize = 13;
const TRAILER_SIZE: usize = 8;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum LogRecordType {
    Insert = 0,
    Update = 1,
    Delete = 2,
    Commit = 3,
    Abort = 4,
    End = 5,
}

struct BufferState {
    buf: Vec<u8>,
    offset: usize,
    durable_lsn: u64,
}

/// Owns the in-memory log buffer and the backing log file.
pub struct LogManager {
    file: std::fs::File,
    state: Mutex<BufferState>,
}

static SINGLETON: OnceLock<Mutex<Option<Arc<LogManager>>>> = OnceLock::new();

fn singleton_cell() -> &'static Mutex<Option<Arc<LogManager>>> {
    SINGLETON.get_or_init(|| Mutex::new(None))
}

impl LogManager {
    pub fn open(path: impl AsRef<Path>, buf_bytes: usize) -> io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        Ok(LogManager {
            file,
            state: Mutex::new(BufferState {
                buf: vec![0u8; buf_bytes],
                offset: 0,
                durable_lsn: 0,
            }),
        })
    }

    pub fn initialize(path: impl AsRef<Path>, buf_kb: usize) {
        let mgr = LogManager::open(path, buf_kb * 1024)
            .unwrap_or_else(|e| fatal_io("LogManager::initialize", &e));
        *singleton_cell().lock().unwrap() = Some(Arc::new(mgr));
    }

    pub fn uninitialize() {
        if let Some(mgr) = singleton_cell().lock().unwrap().take() {
            mgr.flush();
        }
    }

    pub fn get() -> Arc<LogManager> {
        singleton_cell()
            .lock()
            .unwrap()
            .clone()
            .expect("LogManager::initialize must be called before use")
    }

    fn append(&self, id: u64, rtype: LogRecordType, payload: &[u8]) -> bool {
        let mut state = self.state.lock().unwrap();
        let record_size = HEADER_SIZE + payload.len() + TRAILER_SIZE;
        if record_size > state.buf.len() {
            return false;
        }
        if record_size > state.buf.len() - state.offset {
            self.flush_locked(&mut state);
        }

        let current_lsn = state.durable_lsn + state.offset as u64;
        let start = state.offset;
        state.buf[start..start + 8].copy_from_slice(&id.to_le_bytes());
        state.buf[start + 8] = rtype as u8;
        state.buf[start + 9..start + 13].copy_from_slice(&(payload.len() as u32).to_le_bytes());
        let payload_start = start + HEADER_SIZE;
        state.buf[payload_start..payload_start + payload.len()].copy_from_slice(payload);
        let trailer_start = payload_start + payload.len();
        state.buf[trailer_start..trailer_start + TRAILER_SIZE]
            .copy_from_slice(&current_lsn.to_le_bytes());

        state.offset += record_size;
        true
    }

    pub fn log_insert(&self, id: u64, record: &[u8]) -> bool {
        self.append(id, LogRecordType::Insert, record)
    }

    pub fn log_update(&self, id: u64, record: &[u8]) -> bool {
        self.append(id, LogRecordType::Update, record)
    }

    pub fn log_delete(&self, id: u64) -> bool {
        self.append(id, LogRecordType::Delete, &[])
    }

    pub fn log_commit(&self, id: u64) -> bool {
        self.append(id, LogRecordType::Commit, &[])
    }

    pub fn log_abort(&self, id: u64) -> bool {
        self.append(id, LogRecordType::Abort, &[])
    }

    pub fn log_end(&self, id: u64) -> bool {
        self.append(id, LogRecordType::End, &[])
    }

    fn flush_locked(&self, state: &mut BufferState) {
        if state.offset == 0 {
            return;
        }
        if let Err(e) = self.file.write_at(&state.buf[..state.offset], state.durable_lsn) {
            fatal_io("LogManager::flush write", &e);
        }
        if let Err(e) = self.file.sync_data() {
            fatal_io("LogManager::flush sync", &e);
        }
        state.durable_lsn += state.offset as u64;
        state.offset = 0;
    }

    pub fn flush(&self) {
        let mut state = self.state.lock().unwrap();
        self.flush_locked(&mut state);
    }

    pub fn durable_lsn(&self) -> u64 {
        self.state.lock().unwrap().durable_lsn
    }

    pub fn current_lsn(&self) -> u64 {
        let state = self.state.lock().unwrap();
        state.durable_lsn + state.offset as u64
    }
}

impl Drop for LogManager {
    fn drop(&mut self) {
        let mut state = self.state.lock().unwrap();
        self.flush_locked(&mut state);
    }
}
