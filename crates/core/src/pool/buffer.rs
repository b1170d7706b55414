//! Deferred write buffer.

use std::collections::{BTreeSet, HashMap};

use cachette_domain::Expiry;

/// A marshalled value waiting for `commit`.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingWrite {
    pub payload: Vec<u8>,
    pub expiry: Expiry,
    pub ctime_ms: Option<u32>,
    pub tags: BTreeSet<String>,
}

/// Logical key to pending write. The last write for a key wins.
#[derive(Debug, Default)]
pub struct DeferredBuffer {
    pending: HashMap<String, PendingWrite>,
}

impl DeferredBuffer {
    pub fn insert(&mut self, key: String, write: PendingWrite) {
        self.pending.insert(key, write);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.pending.contains_key(key)
    }

    pub fn contains_any<'a>(&self, mut keys: impl Iterator<Item = &'a str>) -> bool {
        !self.pending.is_empty() && keys.any(|k| self.pending.contains_key(k))
    }

    pub fn remove(&mut self, key: &str) -> Option<PendingWrite> {
        self.pending.remove(key)
    }

    /// Empty the buffer, returning what it held.
    pub fn drain(&mut self) -> HashMap<String, PendingWrite> {
        std::mem::take(&mut self.pending)
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }
}
