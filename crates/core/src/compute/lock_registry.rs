//! Process-wide single-flight locks.
//!
//! A [`LockRegistry`] is a fixed set of mutex slots; a key maps to a slot
//! by hash. Two keys sharing a slot only cost each other some waiting,
//! since waiters re-read the cache and retry. Create one registry at
//! process start and hand the same `Arc` to every pool.
//!
//! Pools pass keys already prefixed with their namespace, so a registry
//! never confuses the same key in two namespaces.

use std::thread::{self, ThreadId};

use parking_lot::{Mutex, MutexGuard};

/// Default number of lock slots.
pub const DEFAULT_SLOTS: usize = 64;

/// What the current thread is already computing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Nesting {
    /// Not inside a recompute callback.
    Outermost,
    /// Inside a recompute callback for another key.
    OtherKey,
    /// Inside the recompute callback for this very key.
    SameKey,
}

/// Keyed single-flight locks shared by every pool of a process.
#[derive(Debug)]
pub struct LockRegistry {
    slots: Vec<Mutex<()>>,
    computing: Mutex<Vec<(ThreadId, String)>>,
}

impl Default for LockRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_SLOTS)
    }
}

impl LockRegistry {
    /// Registry with `slots` mutexes (at least one).
    #[must_use]
    pub fn new(slots: usize) -> Self {
        Self {
            slots: (0..slots.max(1)).map(|_| Mutex::new(())).collect(),
            computing: Mutex::new(Vec::new()),
        }
    }

    /// Number of lock slots.
    #[must_use]
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Slot guarding `key`.
    #[must_use]
    pub fn slot_for(&self, key: &str) -> usize {
        let digest = blake3::hash(key.as_bytes());
        let mut head = [0_u8; 8];
        head.copy_from_slice(&digest.as_bytes()[..8]);
        let slot = u64::from_le_bytes(head) % self.slots.len() as u64;
        usize::try_from(slot).unwrap_or(0)
    }

    /// Take the lock for `key` if nobody holds it.
    pub fn try_lock(&self, key: &str) -> Option<MutexGuard<'_, ()>> {
        self.slots[self.slot_for(key)].try_lock()
    }

    /// Block until whoever holds the lock for `key` releases it.
    pub fn wait(&self, key: &str) {
        drop(self.slots[self.slot_for(key)].lock());
    }

    /// How the current thread relates to computations already running.
    pub fn nesting(&self, key: &str) -> Nesting {
        let me = thread::current().id();
        let computing = self.computing.lock();
        let mut mine = computing.iter().filter(|(thread, _)| *thread == me).peekable();
        if mine.peek().is_none() {
            Nesting::Outermost
        } else if mine.any(|(_, k)| k == key) {
            Nesting::SameKey
        } else {
            Nesting::OtherKey
        }
    }

    /// Mark the current thread as computing `key` until the guard drops.
    pub fn enter(&self, key: &str) -> ComputingGuard<'_> {
        let entry = (thread::current().id(), key.to_string());
        self.computing.lock().push(entry.clone());
        ComputingGuard { registry: self, entry }
    }
}

/// Removes its computation marker on drop, including on unwind.
#[derive(Debug)]
pub struct ComputingGuard<'a> {
    registry: &'a LockRegistry,
    entry: (ThreadId, String),
}

impl Drop for ComputingGuard<'_> {
    fn drop(&mut self) {
        let mut computing = self.registry.computing.lock();
        if let Some(pos) = computing.iter().rposition(|e| *e == self.entry) {
            computing.swap_remove(pos);
        }
    }
}
