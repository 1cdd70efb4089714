//! A transaction bundles its timestamp (its identity for wait-die lock
//! ordering), the set of locks it currently holds, and its commit/abort
//! path through the process-global log and lock managers.


use common::Rid;
use lockmgr::{LockManager, LockMode};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use wal::LogManager;

/// Never produced by [`Transaction::new`] -- the counter starts at 1 -- so
/// it doubles as the "no timestamp" sentinel returned by a failed `abort`.
pub const INVALID_TIMESTAMP: u64 = 0;

static TS_COUNTER: AtomicU64 = AtomicU64::new(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TxnState {
    InProgress,
    Committed,
    Aborted,
}

pub struct Transaction {
    timestamp: u64,
    state: Mutex<TxnState>,
    locks: Mutex<Vec<Rid>>,
}

impl Transaction {
    pub fn new() -> Self {
        Transaction {
            timestamp: TS_COUNTER.fetch_add(1, Ordering::SeqCst),
            state: Mutex::new(TxnState::InProgress),
            locks: Mutex::new(Vec::new()),
        }
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn is_in_progress(&self) -> bool {
        *self.state.lock().unwrap() == TxnState::InProgress
    }

    pub fn is_committed(&self) -> bool {
        *self.state.lock().unwrap() == TxnState::Committed
    }

    pub fn is_aborted(&self) -> bool {
        *self.state.lock().unwrap() == TxnState::Aborted
    }

    /// Acquires `mode` on `rid` through the process-global `LockManager`,
    /// recording the rid on success so commit/abort can release it later.
    pub fn lock(&self, rid: Rid, mode: LockMode) -> bool {
        let granted = LockManager::get().acquire_lock(self.timestamp, rid, mode);
        if granted {
            self.locks.lock().unwrap().push(rid);
        }
        granted
    }

    fn release_all_locks(&self) {
        let mgr = LockManager::get();
        let mut locks = self.locks.lock().unwrap();
        for rid in locks.drain(..) {
            mgr.release_lock(self.timestamp, rid);
        }
    }

    pub fn commit(&self) -> bool {
        let log = LogManager::get();
        if !log.log_commit(self.timestamp) {
            return false;
        }
        log.flush();
        if !log.log_end(self.timestamp) {
            return false;
        }
        self.release_all_locks();
        *self.state.lock().unwrap() = TxnState::Committed;
        true
    }

    pub fn abort(&self) -> u64 {
        let log = LogManager::get();
        if !log.log_abort(self.timestamp) {
            return INVALID_TIMESTAMP;
        }
        log.flush();
        if !log.log_end(self.timestamp) {
            return INVALID_TIMESTAMP;
        }
        self.release_all_locks();
        *self.state.lock().unwrap() = TxnState::Aborted;
        self.timestamp
    }
}

impl Default for Transaction {
    fn default() -> Self {
        Transaction::new()
    }
}
