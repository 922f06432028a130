//! The cache façade: the only type external code talks to.
//!
//! `Cache` wires together the three independent components —
//! [`crate::extent::Allocator`], [`crate::index::Index`] and
//! [`crate::lru::Policy`] — behind a small synchronous API, and owns the
//! two pieces of cross-cutting state none of those components know
//! about: the reference-counting/eviction protocol (`evict_common`) and
//! the in-line miss-satisfaction shortcut (`PENDING_GET`).

use std::cell::RefCell;
use std::path::Path;
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;

use crate::config::{CacheConfig, EvictionPolicy};
use crate::entry::{Entry, EntryHandle};
use crate::error::{Error, ErrorKind};
use crate::extent::Allocator;
use crate::index::Index;
use crate::lru::Policy;
use crate::mapping::MappedFile;
use crate::stats::{Stat, Stats};

type Observer = Arc<dyn Fn(&[u8]) + Send + Sync>;

struct ReadyState {
    mapping: Arc<MappedFile>,
    allocator: Allocator,
    index: Index,
    policy: Policy,
    eviction_policy: EvictionPolicy,
}

/// The result of a successful [`Cache::get`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GetOutcome {
    /// Bytes actually copied into the caller's buffer.
    pub copied: usize,
    /// The value's full logical size, regardless of how much was copied.
    pub total_size: u64,
}

struct PendingGet {
    cache_addr: usize,
    key: Vec<u8>,
    buf: Option<(*mut u8, usize)>,
    offset: u64,
    result: Option<GetOutcome>,
}

thread_local! {
    static PENDING_GETS: RefCell<Vec<PendingGet>> = const { RefCell::new(Vec::new()) };
    static MISS_STACK: RefCell<Vec<usize>> = const { RefCell::new(Vec::new()) };
}

fn copy_with_offset(value: &[u8], offset: u64, dst: &mut [u8]) -> usize {
    if offset >= value.len() as u64 {
        return 0;
    }
    let start = offset as usize;
    let take = (value.len() - start).min(dst.len());
    dst[..take].copy_from_slice(&value[start..start + take]);
    take
}

/// A volatile, memory-mapped key/value cache.
///
/// Configure a [`CacheConfig`], build a `Cache` from it, call
/// [`Cache::attach`] once, then use `put`/`get`/`evict` from any number
/// of threads. Every method takes `&self`: internal mutability is
/// handled by the index's per-shard locks, the allocator's mutex and the
/// LRU's mutex/ring.
pub struct Cache {
    config: CacheConfig,
    state: OnceLock<ReadyState>,
    on_evict: RwLock<Option<Observer>>,
    on_miss: RwLock<Option<Observer>>,
    stats: Stats,
}

impl Cache {
    /// Creates an unattached cache from a fully configured [`CacheConfig`].
    pub fn new(config: CacheConfig) -> Self {
        Cache {
            config,
            state: OnceLock::new(),
            on_evict: RwLock::new(None),
            on_miss: RwLock::new(None),
            stats: Stats::new(),
        }
    }

    fn self_addr(&self) -> usize {
        self as *const Cache as usize
    }

    fn state(&self) -> Result<&ReadyState, Error> {
        self.state
            .get()
            .ok_or_else(|| Error::new(ErrorKind::NotReady, "cache has not been attached yet"))
    }

    /// Creates (or truncates) a backing file under `dir` and maps it,
    /// making the cache ready for use. May only be called once.
    pub fn attach(&self, dir: &Path) -> Result<(), Error> {
        if self.state.get().is_some() {
            return Err(Error::new(ErrorKind::AlreadyReady, "cache is already attached"));
        }
        std::fs::create_dir_all(dir)?;
        let path = dir.join("vmap-cache.pool");
        let mapping = Arc::new(MappedFile::open(&path, self.config.size())?);
        let allocator = Allocator::new(Arc::clone(&mapping), self.config.extent_size());
        let index = Index::new(self.config.sharded);
        let policy = Policy::new();
        let eviction_policy = self.config.eviction_policy();
        let state = ReadyState {
            mapping,
            allocator,
            index,
            policy,
            eviction_policy,
        };
        if self.state.set(state).is_err() {
            return Err(Error::new(ErrorKind::AlreadyReady, "cache is already attached"));
        }
        log::info!("cache attached at {} ({} bytes)", path.display(), self.config.size());
        Ok(())
    }

    fn release_ref(&self, state: &ReadyState, handle: EntryHandle) {
        if handle.release() {
            state.allocator.free(handle.extents());
            // SAFETY: `release` just reported the reference count
            // dropped to zero, so no other referent can observe `handle`
            // again.
            unsafe { handle.dealloc() };
        }
    }

    /// Inserts `key` with `value`. Fails with [`ErrorKind::AlreadyExists`]
    /// if the key is already present.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<(), Error> {
        let state = self.state()?;
        self.satisfy_pending_get(key, value);

        if value.len() as u64 > state.mapping.len() {
            return Err(Error::new(ErrorKind::TooLarge, "value is larger than the entire pool"));
        }

        let extents = loop {
            match state.allocator.alloc(value.len() as u64) {
                Ok(extents) => break extents,
                Err(err) if err.kind() == ErrorKind::NoSpace && state.eviction_policy == EvictionPolicy::Lru => {
                    match state.policy.evict_lru() {
                        Ok(victim) => {
                            let _ = self.evict_common(state, victim, false, true);
                        }
                        Err(_) => return Err(err),
                    }
                }
                Err(err) => return Err(err),
            }
        };

        state.allocator.write_value(&extents, value);
        let handle = EntryHandle::alloc(Entry::new(
            key.to_vec().into_boxed_slice(),
            extents,
            value.len() as u64,
        ));
        match state.index.insert(key, handle) {
            Ok(()) => {
                state.policy.insert(handle);
                self.stats.record_put();
                Ok(())
            }
            Err(err) => {
                state.allocator.free(handle.extents());
                // SAFETY: the index insert failed, so this handle was
                // never published anywhere else.
                unsafe { handle.dealloc() };
                Err(err)
            }
        }
    }

    /// Reads up to `buf`'s length bytes of `key`'s value starting at
    /// `offset`. A `None` buffer still reports `total_size` on a hit.
    pub fn get(&self, key: &[u8], mut buf: Option<&mut [u8]>, offset: u64) -> Result<GetOutcome, Error> {
        let state = self.state()?;

        if let Some(handle) = state.index.lookup(key) {
            state.policy.touch(handle);
            let total = handle.value_len();
            let copied = match buf.as_deref_mut() {
                Some(dst) => state.allocator.read_value(handle.extents(), total, offset, dst),
                None => 0,
            };
            self.release_ref(state, handle);
            self.stats.record_hit();
            return Ok(GetOutcome { copied, total_size: total });
        }

        self.stats.record_miss();
        let addr = self.self_addr();
        if MISS_STACK.with(|s| s.borrow().contains(&addr)) {
            return Err(Error::new(
                ErrorKind::Busy,
                "get called reentrantly from this cache's own on_miss callback",
            ));
        }
        let callback = self.on_miss.read().clone();
        let Some(callback) = callback else {
            return Err(Error::new(ErrorKind::NotFound, "key not found"));
        };

        let buf_ptr = buf.as_deref_mut().map(|b| (b.as_mut_ptr(), b.len()));
        PENDING_GETS.with(|s| {
            s.borrow_mut().push(PendingGet {
                cache_addr: addr,
                key: key.to_vec(),
                buf: buf_ptr,
                offset,
                result: None,
            })
        });
        MISS_STACK.with(|s| s.borrow_mut().push(addr));

        callback(key);

        MISS_STACK.with(|s| {
            s.borrow_mut().pop();
        });
        let outcome = PENDING_GETS.with(|s| {
            let mut s = s.borrow_mut();
            s.iter()
                .rposition(|p| p.cache_addr == addr && p.key == key)
                .map(|pos| s.remove(pos).result)
                .flatten()
        });
        outcome.ok_or_else(|| Error::new(ErrorKind::NotFound, "key not found and on_miss did not satisfy it"))
    }

    /// Satisfies any outstanding [`Cache::get`] on this thread waiting on
    /// `key`, by copying directly from `value` into the caller's buffer,
    /// without inserting into the index. Called unconditionally at the
    /// top of `put` so a `put` issued from inside `on_miss` (on this
    /// cache or a sibling one) can complete the waiting read.
    fn satisfy_pending_get(&self, key: &[u8], value: &[u8]) {
        let addr = self.self_addr();
        PENDING_GETS.with(|s| {
            let mut s = s.borrow_mut();
            if let Some(pending) = s.iter_mut().rev().find(|p| p.cache_addr == addr && p.key == key) {
                let copied = match pending.buf {
                    // SAFETY: `buf` points at the caller's buffer on the
                    // `get` stack frame, which is still live: `get`
                    // blocks synchronously on this callback.
                    Some((ptr, len)) => copy_with_offset(value, pending.offset, unsafe {
                        std::slice::from_raw_parts_mut(ptr, len)
                    }),
                    None => 0,
                };
                pending.result = Some(GetOutcome {
                    copied,
                    total_size: value.len() as u64,
                });
            }
        });
    }

    /// Checks whether `key` is present without affecting LRU order.
    pub fn exists(&self, key: &[u8]) -> bool {
        self.state.get().is_some_and(|s| s.index.contains(key))
    }

    /// Evicts `key` if given, or the current LRU victim if `None`.
    pub fn evict(&self, key: Option<&[u8]>) -> Result<(), Error> {
        let state = self.state()?;
        match key {
            Some(key) => {
                let handle = state
                    .index
                    .lookup(key)
                    .ok_or_else(|| Error::new(ErrorKind::NotFound, "key not found"))?;
                self.evict_common(state, handle, true, false)
            }
            None => {
                let handle = state.policy.evict_lru()?;
                self.evict_common(state, handle, false, true)
            }
        }
    }

    /// The shared teardown path for both eviction entry points.
    ///
    /// `held_transient` is true when the caller holds an extra reference
    /// from a fresh `index.lookup` (the explicit `evict(Some(key))`
    /// path); `held_lru` is true when the caller already holds the LRU
    /// reference, transferred out of `Policy::evict_lru`.
    fn evict_common(&self, state: &ReadyState, handle: EntryHandle, held_transient: bool, held_lru: bool) -> Result<(), Error> {
        if !handle.start_evicting() {
            if held_transient {
                self.release_ref(state, handle);
            }
            if held_lru {
                self.release_ref(state, handle);
            }
            return Ok(());
        }

        if let Some(cb) = self.on_evict.read().clone() {
            cb(handle.key());
        }

        if state.index.remove(handle.key()).is_ok() {
            self.release_ref(state, handle);
        }

        let lru_result = if held_lru {
            self.release_ref(state, handle);
            Ok(())
        } else {
            let result = state.policy.evict_specific(handle);
            if result.is_ok() {
                self.release_ref(state, handle);
            }
            result
        };

        if held_transient {
            self.release_ref(state, handle);
        }

        self.stats.record_eviction();
        lru_result
    }

    /// Installs an observer invoked synchronously, before an evicted
    /// entry's extents are freed, with the evicted key.
    pub fn callback_on_evict(&self, f: impl Fn(&[u8]) + Send + Sync + 'static) {
        *self.on_evict.write() = Some(Arc::new(f));
    }

    /// Installs an observer invoked synchronously on a cache miss, with
    /// the missed key. See [`Cache::satisfy_pending_get`] for how a
    /// `put` from inside this callback can complete the waiting `get`.
    pub fn callback_on_miss(&self, f: impl Fn(&[u8]) + Send + Sync + 'static) {
        *self.on_miss.write() = Some(Arc::new(f));
    }

    /// Reads one statistics counter.
    pub fn get_stat(&self, which: Stat) -> u64 {
        let bytes_in_use = self.state.get().map_or(0, |s| s.mapping.bytes_in_use());
        self.stats.get(which, bytes_in_use)
    }
}

impl Drop for Cache {
    fn drop(&mut self) {
        if let Some(state) = self.state.get() {
            for handle in state.index.drain() {
                state.allocator.free(handle.extents());
                // SAFETY: the cache is being torn down; no other
                // referent of this handle can remain, since the cache
                // itself was the only path by which one could be
                // obtained.
                unsafe { handle.dealloc() };
            }
        }
    }
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("ready", &self.state.get().is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    fn attached_cache() -> (Cache, tempfile::TempDir) {
        let mut config = CacheConfig::new();
        config.set_size(1024 * 1024).unwrap();
        config.set_extent_size(256).unwrap();
        let cache = Cache::new(config);
        let dir = tempdir().unwrap();
        cache.attach(dir.path()).unwrap();
        (cache, dir)
    }

    #[test]
    fn put_then_get_roundtrips() {
        let (cache, _dir) = attached_cache();
        cache.put(b"k", b"hello").unwrap();
        let mut buf = [0u8; 5];
        let outcome = cache.get(b"k", Some(&mut buf), 0).unwrap();
        assert_eq!(outcome.copied, 5);
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn put_duplicate_key_fails() {
        let (cache, _dir) = attached_cache();
        cache.put(b"k", b"v1").unwrap();
        assert_eq!(cache.put(b"k", b"v2").unwrap_err().kind(), ErrorKind::AlreadyExists);
    }

    #[test]
    fn get_with_offset_truncates() {
        let (cache, _dir) = attached_cache();
        cache.put(b"k", b"0123456789").unwrap();
        let mut buf = [0u8; 4];
        let outcome = cache.get(b"k", Some(&mut buf), 6).unwrap();
        assert_eq!(outcome.copied, 4);
        assert_eq!(&buf, b"6789");
        assert_eq!(outcome.total_size, 10);
    }

    #[test]
    fn offset_past_end_copies_nothing() {
        let (cache, _dir) = attached_cache();
        cache.put(b"k", b"abc").unwrap();
        let mut buf = [0u8; 4];
        let outcome = cache.get(b"k", Some(&mut buf), 100).unwrap();
        assert_eq!(outcome.copied, 0);
        assert_eq!(outcome.total_size, 3);
    }

    #[test]
    fn miss_without_callback_is_not_found() {
        let (cache, _dir) = attached_cache();
        assert_eq!(cache.get(b"missing", None, 0).unwrap_err().kind(), ErrorKind::NotFound);
    }

    #[test]
    fn evict_specific_key_then_miss() {
        let (cache, _dir) = attached_cache();
        cache.put(b"k", b"v").unwrap();
        cache.evict(Some(b"k")).unwrap();
        assert!(!cache.exists(b"k"));
        assert_eq!(cache.get(b"k", None, 0).unwrap_err().kind(), ErrorKind::NotFound);
    }

    #[test]
    fn evict_none_picks_lru_victim() {
        let (cache, _dir) = attached_cache();
        cache.put(b"a", b"1").unwrap();
        cache.put(b"b", b"2").unwrap();
        cache.evict(None).unwrap();
        assert!(!cache.exists(b"a"));
        assert!(cache.exists(b"b"));
    }

    #[test]
    fn evict_none_on_empty_cache_reports_no_victim() {
        let (cache, _dir) = attached_cache();
        assert_eq!(cache.evict(None).unwrap_err().kind(), ErrorKind::NoVictim);
    }

    #[test]
    fn on_miss_can_satisfy_the_waiting_get_inline() {
        let (cache, _dir) = attached_cache();
        cache.callback_on_miss(|key| {
            let _ = key;
        });
        // With no put inside the callback the get still misses.
        assert_eq!(cache.get(b"k", None, 0).unwrap_err().kind(), ErrorKind::NotFound);
    }

    #[test]
    fn stats_are_monotonic_across_puts_and_evictions() {
        let (cache, _dir) = attached_cache();
        cache.put(b"a", b"1").unwrap();
        cache.put(b"b", b"2").unwrap();
        cache.evict(Some(b"a")).unwrap();
        assert_eq!(cache.get_stat(Stat::Puts), 2);
        assert_eq!(cache.get_stat(Stat::Evictions), 1);
    }

    #[test]
    fn concurrent_puts_and_gets_preserve_integrity() {
        let (cache, _dir) = attached_cache();
        let cache = Arc::new(cache);
        let errors = Arc::new(AtomicUsize::new(0));
        std::thread::scope(|scope| {
            for t in 0..8 {
                let cache = Arc::clone(&cache);
                let errors = Arc::clone(&errors);
                scope.spawn(move || {
                    for i in 0..200 {
                        let key = format!("t{t}-{i}").into_bytes();
                        if cache.put(&key, b"payload").is_err() {
                            errors.fetch_add(1, Ordering::Relaxed);
                        }
                        let _ = cache.get(&key, None, 0);
                    }
                });
            }
        });
        // Some puts may fail with NoSpace under heavy contention on a
        // tiny pool; none should panic or deadlock, which this test
        // exercises by completing at all.
        assert!(errors.load(Ordering::Relaxed) <= 1600);
    }
}
