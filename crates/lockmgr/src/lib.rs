//! Record-granularity lock manager: a table of per-rid lock heads, each
//! with a FIFO request queue, granted under a configurable no-wait/wait-die
//! deadlock policy.
//!
//! Transactions are identified here by their timestamp (`u64`) rather than
//! by a `Transaction` reference -- the `txn` crate depends on `lockmgr`, not
//! the other way around, and the timestamp alone is enough to order
//! wait-die decisions and recognize a transaction's own granted requests.


use common::{DeadlockPolicy, Rid};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockMode {
    Nl,
    Sh,
    Xl,
}

impl LockMode {
    fn compatible(a: LockMode, b: LockMode) -> bool {
        matches!((a, b), (LockMode::Sh, LockMode::Sh))
    }
}

struct LockRequest {
    ts: u64,
    mode: LockMode,
    granted: AtomicBool,
}

impl LockRequest {
    fn new(ts: u64, mode: LockMode, granted: bool) -> Arc<Self> {
        Arc::new(LockRequest {
            ts,
            mode,
            granted: AtomicBool::new(granted),
        })
    }
}

struct LockHeadState {
    current_mode: LockMode,
    queue: VecDeque<Arc<LockRequest>>,
}

/// One entry in the lock table: a FIFO queue of requests against a single
/// rid, latched together since grant decisions need both at once.
struct LockHead {
    state: Mutex<LockHeadState>,
}

impl LockHead {
    fn new() -> Arc<Self> {
        Arc::new(LockHead {
            state: Mutex::new(LockHeadState {
                current_mode: LockMode::Nl,
                queue: VecDeque::new(),
            }),
        })
    }
}

/// Process-global. See [`LockManager::acquire_lock`] and
/// [`LockManager::release_lock`] for the exact grant/release algorithm.
pub struct LockManager {
    policy: DeadlockPolicy,
    table: Mutex<HashMap<u64, Arc<LockHead>>>,
}

static SINGLETON: OnceLock<Mutex<Option<Arc<LockManager>>>> = OnceLock::new();

fn singleton_cell() -> &'static Mutex<Option<Arc<LockManager>>> {
    SINGLETON.get_or_init(|| Mutex::new(None))
}

impl LockManager {
    pub fn new(policy: DeadlockPolicy) -> Arc<Self> {
        Arc::new(LockManager {
            policy,
            table: Mutex::new(HashMap::new()),
        })
    }

    pub fn initialize(policy: DeadlockPolicy) {
        *singleton_cell().lock().unwrap() = Some(LockManager::new(policy));
    }

    pub fn uninitialize() {
        *singleton_cell().lock().unwrap() = None;
    }

    pub fn get() -> Arc<LockManager> {
        singleton_cell()
            .lock()
            .unwrap()
            .clone()
            .expect("LockManager::initialize must be called before use")
    }

    pub fn policy(&self) -> DeadlockPolicy {
        self.policy
    }

    fn head_for(&self, rid: Rid) -> (Arc<LockHead>, bool) {
        let mut table = self.table.lock().unwrap();
        if let Some(head) = table.get(&rid.0) {
            (head.clone(), false)
        } else {
            let head = LockHead::new();
            table.insert(rid.0, head.clone());
            (head, true)
        }
    }

    /// Requests `mode` on `rid` for the transaction identified by `tx_ts`.
    /// `NL` is always a no-op granted immediately.
    pub fn acquire_lock(&self, tx_ts: u64, rid: Rid, mode: LockMode) -> bool {
        if mode == LockMode::Nl {
            return true;
        }

        let (head, freshly_created) = self.head_for(rid);
        let mut state = head.state.lock().unwrap();

        if freshly_created || state.queue.is_empty() {
            state.queue.push_back(LockRequest::new(tx_ts, mode, true));
            state.current_mode = mode;
            return true;
        }

        if let Some(existing) = state
            .queue
            .iter()
            .find(|r| r.ts == tx_ts && r.granted.load(Ordering::Acquire))
        {
            if existing.mode == LockMode::Xl || existing.mode == mode {
                return true;
            }
        }

        let pred = state.queue.back().unwrap().clone();
        if pred.granted.load(Ordering::Acquire) && LockMode::compatible(pred.mode, mode) {
            state.queue.push_back(LockRequest::new(tx_ts, mode, true));
            state.current_mode = mode;
            return true;
        }

        match self.policy {
            DeadlockPolicy::NoWait => false,
            DeadlockPolicy::WaitDie => {
                if tx_ts >= pred.ts {
                    // tx is younger than (or equal to, a programming error) the
                    // blocking predecessor: die rather than wait.
                    return false;
                }
                let req = LockRequest::new(tx_ts, mode, false);
                state.queue.push_back(req.clone());
                drop(state);

                while !req.granted.load(Ordering::Acquire) {
                    std::hint::spin_loop();
                }

                let mut state = head.state.lock().unwrap();
                state.current_mode = mode;
                true
            }
        }
    }

    /// Releases `tx_ts`'s granted lock on `rid`, granting the next eligible
    /// waiter(s): a released XL grants the next XL alone or every contiguous
    /// SH waiter behind it; a released SH only grants a waiting XL if the
    /// released request was the queue head.
    pub fn release_lock(&self, tx_ts: u64, rid: Rid) -> bool {
        let head = {
            let table = self.table.lock().unwrap();
            match table.get(&rid.0) {
                Some(head) => head.clone(),
                None => return false,
            }
        };

        let mut state = head.state.lock().unwrap();
        if state.current_mode == LockMode::Nl {
            return false;
        }
        let Some(pos) = state
            .queue
            .iter()
            .position(|r| r.ts == tx_ts && r.granted.load(Ordering::Acquire))
        else {
            return false;
        };

        let released_mode = state.queue[pos].mode;
        let released_was_head = pos == 0;
        state.queue.remove(pos);

        if let Some(next) = state.queue.get(pos).cloned() {
            if !next.granted.load(Ordering::Acquire) {
                match (released_mode, next.mode) {
                    (LockMode::Xl, LockMode::Xl) => next.granted.store(true, Ordering::Release),
                    (LockMode::Xl, LockMode::Sh) => {
                        let mut i = pos;
                        while let Some(r) = state.queue.get(i) {
                            if r.mode == LockMode::Sh && !r.granted.load(Ordering::Acquire) {
                                r.granted.store(true, Ordering::Release);
                                i += 1;
                            } else {
                                break;
                            }
                        }
                    }
                    (LockMode::Sh, LockMode::Xl) => {
                        if released_was_head {
                            next.granted.store(true, Ordering::Release);
                        }
                    }
                    _ => {}
                }
            }
        }

        state.current_mode = match state.queue.front() {
            Some(front) if front.granted.load(Ordering::Acquire) => front.mode,
            Some(_) => state.current_mode,
            None => LockMode::Nl,
        };

        true
    }
}
