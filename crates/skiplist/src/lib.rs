//! Ordered key -> RID maps backed by a skip list: an in-memory variant over
//! an index arena, and a page-backed variant whose towers live as records
//! in a [`storage::Table`].


use common::{Rid, MAX_LEVEL};
use rand::Rng;
use std::io;
use std::path::Path;
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use storage::Table;

/// Per-level rw-latches: an array of `MAX_LEVEL` rw-locks.
/// `acquire(write_below)` takes levels `[0, write_below)` in write mode and
/// `[write_below, MAX_LEVEL)` in read mode, ascending, and holds them all
/// until the returned guard vector is dropped.
struct LevelLatches {
    latches: Vec<RwLock<()>>,
}

enum LevelGuard<'a> {
    Read(RwLockReadGuard<'a, ()>),
    Write(RwLockWriteGuard<'a, ()>),
}

impl LevelLatches {
    fn new() -> Self {
        LevelLatches {
            latches: (0..MAX_LEVEL).map(|_| RwLock::new(())).collect(),
        }
    }

    fn acquire(&self, write_below: usize) -> Vec<LevelGuard<'_>> {
        (0..MAX_LEVEL)
            .map(|level| {
                if level < write_below {
                    LevelGuard::Write(self.latches[level].write().unwrap())
                } else {
                    LevelGuard::Read(self.latches[level].read().unwrap())
                }
            })
            .collect()
    }
}

fn random_height() -> usize {
    let mut rng = rand::thread_rng();
    let mut height = 1;
    while height < MAX_LEVEL && rng.gen::<bool>() {
        height += 1;
    }
    height
}

const HEAD: usize = 0;
const TAIL: usize = 1;

#[derive(Clone)]
struct Node {
    key: Vec<u8>,
    rid: Rid,
    nlevels: usize,
    next: [usize; MAX_LEVEL],
}

impl Node {
    fn sentinel() -> Self {
        Node {
            key: Vec::new(),
            rid: Rid::INVALID,
            nlevels: MAX_LEVEL,
            next: [TAIL; MAX_LEVEL],
        }
    }
}

struct Arena {
    nodes: Vec<Node>,
    free: Vec<usize>,
}

impl Arena {
    fn new() -> Self {
        // index 0 = head, index 1 = tail; both reserved for the life of the arena.
        Arena {
            nodes: vec![Node::sentinel(), Node::sentinel()],
            free: Vec::new(),
        }
    }

    fn alloc(&mut self, key: Vec<u8>, rid: Rid, nlevels: usize) -> usize {
        let node = Node {
            key,
            rid,
            nlevels,
            next: [TAIL; MAX_LEVEL],
        };
        if let Some(idx) = self.free.pop() {
            self.nodes[idx] = node;
            idx
        } else {
            self.nodes.push(node);
            self.nodes.len() - 1
        }
    }

    fn release(&mut self, idx: usize) {
        self.nodes[idx] = Node::sentinel();
        self.free.push(idx);
    }
}

/// Finds the rightmost node at each level whose key is strictly less than
/// `key`, returning the exact match (if any) found one hop past that
/// predecessor at level 0. When `out_preds` is supplied it is filled at
/// every level regardless of where the match was found, so deletion can
/// unsplice a node at every level its tower occupies.
fn traverse(arena: &Arena, key: &[u8], mut out_preds: Option<&mut [usize; MAX_LEVEL]>) -> Option<usize> {
    let mut cur = HEAD;
    for level in (0..MAX_LEVEL).rev() {
        loop {
            let next = arena.nodes[cur].next[level];
            if next == TAIL || arena.nodes[next].key.as_slice() >= key {
                break;
            }
            cur = next;
        }
        if let Some(preds) = out_preds.as_deref_mut() {
            preds[level] = cur;
        }
    }
    let candidate = arena.nodes[cur].next[0];
    if candidate != TAIL && arena.nodes[candidate].key.as_slice() == key {
        Some(candidate)
    } else {
        None
    }
}

/// In-memory probabilistic ordered map of fixed-width byte keys to RIDs.
pub struct SkipList {
    key_size: usize,
    arena: Mutex<Arena>,
    latches: LevelLatches,
}

impl SkipList {
    pub fn new(key_size: usize) -> Self {
        SkipList {
            key_size,
            arena: Mutex::new(Arena::new()),
            latches: LevelLatches::new(),
        }
    }

    pub fn key_size(&self) -> usize {
        self.key_size
    }

    pub fn insert(&self, key: &[u8], rid: Rid) -> bool {
        debug_assert_eq!(key.len(), self.key_size);
        let height = random_height();
        let _guards = self.latches.acquire(height);
        let mut arena = self.arena.lock().unwrap();

        let mut preds = [HEAD; MAX_LEVEL];
        if traverse(&arena, key, Some(&mut preds)).is_some() {
            return false;
        }

        let idx = arena.alloc(key.to_vec(), rid, height);
        for level in 0..height {
            let pred = preds[level];
            let next = arena.nodes[pred].next[level];
            arena.nodes[idx].next[level] = next;
            arena.nodes[pred].next[level] = idx;
        }
        true
    }

    pub fn search(&self, key: &[u8]) -> Option<Rid> {
        let _guards = self.latches.acquire(0);
        let arena = self.arena.lock().unwrap();
        traverse(&arena, key, None).map(|idx| arena.nodes[idx].rid)
    }

    pub fn update(&self, key: &[u8], rid: Rid) -> bool {
        let _guards = self.latches.acquire(1);
        let mut arena = self.arena.lock().unwrap();
        match traverse(&arena, key, None) {
            Some(idx) => {
                arena.nodes[idx].rid = rid;
                true
            }
            None => false,
        }
    }

    pub fn delete(&self, key: &[u8]) -> bool {
        let _guards = self.latches.acquire(MAX_LEVEL);
        let mut arena = self.arena.lock().unwrap();
        let mut preds = [HEAD; MAX_LEVEL];
        let Some(idx) = traverse(&arena, key, Some(&mut preds)) else {
            return false;
        };
        let nlevels = arena.nodes[idx].nlevels;
        for level in 0..nlevels {
            let pred = preds[level];
            let next = arena.nodes[idx].next[level];
            arena.nodes[pred].next[level] = next;
        }
        arena.release(idx);
        true
    }

    /// Scans ascending from `start_key` (smallest key if `None`), collecting
    /// up to `nkeys` `(key, rid)` pairs. `inclusive` controls whether a node
    /// whose key equals `start_key` is included.
    pub fn forward_scan(
        &self,
        start_key: Option<&[u8]>,
        nkeys: usize,
        inclusive: bool,
    ) -> Vec<(Vec<u8>, Rid)> {
        if nkeys == 0 {
            return Vec::new();
        }
        let _guards = self.latches.acquire(0);
        let arena = self.arena.lock().unwrap();

        let mut cur = HEAD;
        if let Some(key) = start_key {
            let mut preds = [HEAD; MAX_LEVEL];
            traverse(&arena, key, Some(&mut preds));
            cur = preds[0];
            if !inclusive {
                let next = arena.nodes[cur].next[0];
                if next != TAIL && arena.nodes[next].key.as_slice() == key {
                    cur = next;
                }
            }
        }

        let mut out = Vec::new();
        let mut node = arena.nodes[cur].next[0];
        while node != TAIL && out.len() < nkeys {
            out.push((arena.nodes[node].key.clone(), arena.nodes[node].rid));
            node = arena.nodes[node].next[0];
        }
        out
    }
}

const NODE_HEADER_SIZE: usize = 1 + 8 + 8 * MAX_LEVEL;

fn precord_size(key_size: usize) -> usize {
    NODE_HEADER_SIZE + key_size
}

fn pdecode_nlevels(rec: &[u8]) -> usize {
    rec[0] as usize
}

fn pdecode_rid(rec: &[u8]) -> Rid {
    Rid(u64::from_le_bytes(rec[1..9].try_into().unwrap()))
}

fn pdecode_next(rec: &[u8], level: usize) -> Rid {
    let off = 9 + level * 8;
    Rid(u64::from_le_bytes(rec[off..off + 8].try_into().unwrap()))
}

fn pdecode_key(rec: &[u8], key_size: usize) -> &[u8] {
    &rec[NODE_HEADER_SIZE..NODE_HEADER_SIZE + key_size]
}

fn pencode_rid(rec: &mut [u8], rid: Rid) {
    rec[1..9].copy_from_slice(&rid.0.to_le_bytes());
}

fn pencode_next(rec: &mut [u8], level: usize, next: Rid) {
    let off = 9 + level * 8;
    rec[off..off + 8].copy_from_slice(&next.0.to_le_bytes());
}

fn pencode_node(nlevels: usize, rid: Rid, next: &[Rid; MAX_LEVEL], key: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(NODE_HEADER_SIZE + key.len());
    buf.push(nlevels as u8);
    buf.extend_from_slice(&rid.0.to_le_bytes());
    for n in next {
        buf.extend_from_slice(&n.0.to_le_bytes());
    }
    buf.extend_from_slice(key);
    buf
}

/// Page-backed variant of [`SkipList`]: towers live as records in a
/// [`storage::Table`] sized `size_of::<NodeHeader>() + key_size`, and
/// `next[i]` holds an RID instead of an in-memory pointer. Head and tail
/// are themselves ordinary records; their RIDs are recorded fresh on every
/// open (this engine never replays state across restarts).
pub struct PSkipList {
    key_size: usize,
    table: Table,
    head: Rid,
    tail: Rid,
    latches: LevelLatches,
}

impl PSkipList {
    pub fn open(
        path: impl AsRef<Path>,
        key_size: usize,
        pool: Arc<buffer::BufferPool>,
    ) -> io::Result<Self> {
        let table = Table::open(path, precord_size(key_size) as u16, pool)?;
        let empty_key = vec![0u8; key_size];

        let tail = table.insert(&pencode_node(MAX_LEVEL, Rid::INVALID, &[Rid::INVALID; MAX_LEVEL], &empty_key));
        let head = table.insert(&pencode_node(MAX_LEVEL, Rid::INVALID, &[tail; MAX_LEVEL], &empty_key));

        Ok(PSkipList {
            key_size,
            table,
            head,
            tail,
            latches: LevelLatches::new(),
        })
    }

    pub fn key_size(&self) -> usize {
        self.key_size
    }

    fn traverse(&self, key: &[u8], mut out_preds: Option<&mut [Rid; MAX_LEVEL]>) -> Option<Rid> {
        let mut cur = self.head;
        for level in (0..MAX_LEVEL).rev() {
            loop {
                let cur_rec = self.table.read(cur).expect("skiplist node record missing");
                let next = pdecode_next(&cur_rec, level);
                if next == self.tail {
                    break;
                }
                let next_rec = self.table.read(next).expect("skiplist node record missing");
                if pdecode_key(&next_rec, self.key_size) >= key {
                    break;
                }
                cur = next;
            }
            if let Some(preds) = out_preds.as_deref_mut() {
                preds[level] = cur;
            }
        }
        let cur_rec = self.table.read(cur).expect("skiplist node record missing");
        let candidate = pdecode_next(&cur_rec, 0);
        if candidate != self.tail {
            let cand_rec = self.table.read(candidate).expect("skiplist node record missing");
            if pdecode_key(&cand_rec, self.key_size) == key {
                return Some(candidate);
            }
        }
        None
    }

    pub fn insert(&self, key: &[u8], rid: Rid) -> bool {
        debug_assert_eq!(key.len(), self.key_size);
        let height = random_height();
        let _guards = self.latches.acquire(height);

        let mut preds = [self.head; MAX_LEVEL];
        if self.traverse(key, Some(&mut preds)).is_some() {
            return false;
        }

        let mut next = [self.tail; MAX_LEVEL];
        for (level, next_slot) in next.iter_mut().enumerate().take(height) {
            let pred_rec = self.table.read(preds[level]).expect("pred record missing");
            *next_slot = pdecode_next(&pred_rec, level);
        }

        let new_rid = self.table.insert(&pencode_node(height, rid, &next, key));

        for (level, pred) in preds.iter().enumerate().take(height) {
            let mut pred_rec = self.table.read(*pred).expect("pred record missing");
            pencode_next(&mut pred_rec, level, new_rid);
            self.table.update(*pred, &pred_rec);
        }
        true
    }

    pub fn search(&self, key: &[u8]) -> Option<Rid> {
        let _guards = self.latches.acquire(0);
        self.traverse(key, None)
            .map(|target| pdecode_rid(&self.table.read(target).expect("node record missing")))
    }

    pub fn update(&self, key: &[u8], rid: Rid) -> bool {
        let _guards = self.latches.acquire(1);
        match self.traverse(key, None) {
            Some(target) => {
                let mut rec = self.table.read(target).expect("node record missing");
                pencode_rid(&mut rec, rid);
                self.table.update(target, &rec)
            }
            None => false,
        }
    }

    pub fn delete(&self, key: &[u8]) -> bool {
        let _guards = self.latches.acquire(MAX_LEVEL);
        let mut preds = [self.head; MAX_LEVEL];
        let Some(target) = self.traverse(key, Some(&mut preds)) else {
            return false;
        };
        let target_rec = self.table.read(target).expect("node record missing");
        let nlevels = pdecode_nlevels(&target_rec);
        for (level, pred) in preds.iter().enumerate().take(nlevels) {
            let target_next = pdecode_next(&target_rec, level);
            let mut pred_rec = self.table.read(*pred).expect("pred record missing");
            pencode_next(&mut pred_rec, level, target_next);
            self.table.update(*pred, &pred_rec);
        }
        self.table.delete(target)
    }

    pub fn forward_scan(
        &self,
        start_key: Option<&[u8]>,
        nkeys: usize,
        inclusive: bool,
    ) -> Vec<(Vec<u8>, Rid)> {
        if nkeys == 0 {
            return Vec::new();
        }
        let _guards = self.latches.acquire(0);

        let mut cur = self.head;
        if let Some(key) = start_key {
            let mut preds = [self.head; MAX_LEVEL];
            self.traverse(key, Some(&mut preds));
            cur = preds[0];
            if !inclusive {
                let cur_rec = self.table.read(cur).expect("node record missing");
                let next = pdecode_next(&cur_rec, 0);
                if next != self.tail {
                    let next_rec = self.table.read(next).expect("node record missing");
                    if pdecode_key(&next_rec, self.key_size) == key {
                        cur = next;
                    }
                }
            }
        }

        let mut out = Vec::new();
        let cur_rec = self.table.read(cur).expect("node record missing");
        let mut node = pdecode_next(&cur_rec, 0);
        while node != self.tail && out.len() < nkeys {
            let rec = self.table.read(node).expect("node record missing");
            out.push((pdecode_key(&rec, self.key_size).to_vec(), pdecode_rid(&rec)));
            node = pdecode_next(&rec, 0);
        }
        out
    }
}
