//! One independent slice of the sharded index.

use crate::entry::EntryHandle;
use crate::error::{Error, ErrorKind};
use crate::index::rwlock::HybridRwLock;
use crate::index::trie::Trie;

/// A single shard: one trie behind one [`HybridRwLock`].
#[derive(Default)]
pub struct Shard {
    trie: HybridRwLock<Trie>,
}

impl Shard {
    /// Creates an empty shard.
    pub fn new() -> Self {
        Shard {
            trie: HybridRwLock::new(Trie::new()),
        }
    }

    /// Inserts `handle` under `key`. On success the index adopts the
    /// entry's initial reference (the one [`crate::entry::Entry::new`]
    /// was constructed with); the caller must not also hold it.
    pub fn insert(&self, key: &[u8], handle: EntryHandle) -> Result<(), Error> {
        let mut guard = self.trie.write();
        guard.insert(key, handle)?;
        Ok(())
    }

    /// Looks up `key`, acquiring a caller reference on the returned
    /// handle.
    pub fn lookup(&self, key: &[u8]) -> Option<EntryHandle> {
        let guard = self.trie.read();
        let handle = guard.lookup(key)?;
        handle.acquire();
        Some(handle)
    }

    /// Removes `key` from the shard, transferring the index reference to
    /// the caller.
    pub fn remove(&self, key: &[u8]) -> Result<EntryHandle, Error> {
        let mut guard = self.trie.write();
        guard
            .remove(key)
            .ok_or_else(|| Error::new(ErrorKind::NotFound, "key not found"))
    }

    /// Whether `key` is present, without acquiring any reference.
    pub fn contains(&self, key: &[u8]) -> bool {
        self.trie.read().lookup(key).is_some()
    }

    /// Tears down this shard, returning every handle it held.
    pub fn drain(&self) -> Vec<EntryHandle> {
        self.trie.write().drain()
    }
}

impl std::fmt::Debug for Shard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shard").finish_non_exhaustive()
    }
}
