//! Atomic operation counters exposed through [`crate::Cache::get_stat`].
//!
//! Counters only ever increase (or, for `BytesInUse`, track the
//! allocator's live total) — this satisfies the "statistics
//! monotonicity" property: a counter never decreases except
//! `BytesInUse`, which tracks a real resource level rather than an
//! event count.

use std::sync::atomic::{AtomicU64, Ordering};

/// Which counter to read with [`crate::Cache::get_stat`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stat {
    /// Successful `put` calls.
    Puts,
    /// `get` calls that found their key.
    Hits,
    /// `get` calls that did not find their key.
    Misses,
    /// Entries removed via `evict` (explicit or LRU-selected).
    Evictions,
    /// Bytes currently handed out by the extent allocator.
    BytesInUse,
}

#[derive(Default, Debug)]
pub struct Stats {
    puts: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl Stats {
    pub fn new() -> Self {
        Stats::default()
    }

    pub fn record_put(&self) {
        self.puts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self, stat: Stat, bytes_in_use: u64) -> u64 {
        match stat {
            Stat::Puts => self.puts.load(Ordering::Relaxed),
            Stat::Hits => self.hits.load(Ordering::Relaxed),
            Stat::Misses => self.misses.load(Ordering::Relaxed),
            Stat::Evictions => self.evictions.load(Ordering::Relaxed),
            Stat::BytesInUse => bytes_in_use,
        }
    }
}
