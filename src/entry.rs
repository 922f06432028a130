//! The cache entry descriptor.
//!
//! # Design philosophy
//!
//! Every cached value is described by exactly one [`Entry`], heap-allocated
//! and referenced from up to three places at once: the index (one
//! reference while the key is reachable by lookup), the LRU list (one
//! reference while the entry is a candidate for eviction), and any
//! in-flight caller holding a transient reference acquired by `get`. The
//! reference count and the `evicting` flag are the only state shared
//! across those referents; everything else is written once at `put` time
//! and read-only thereafter.
//!
//! # Memory layout
//!
//! - `key: Box<[u8]>` - the full key, owned.
//! - `extents: Vec<Extent>` - the value's storage, possibly fragmented
//!   across several non-contiguous ranges of the mapped pool.
//! - `value_len: u64` - the logical size of the value (`<=` sum of extent
//!   lengths, since extents are rounded up to the granularity).
//! - `refs: AtomicU32` - see [`Entry::acquire`] / [`Entry::release`].
//! - `evicting: AtomicBool` - see [`Entry::start_evicting`].
//! - `slot: Slot` - this entry's position in the LRU list, an atomic
//!   tri-state owned by [`crate::lru`].

use std::fmt;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use crate::extent::Extent;
use crate::lru::Slot;

/// A manually reference-counted pointer to a heap-allocated [`Entry`].
///
/// This crate does not use `Arc<Entry>`: the eviction protocol needs to
/// observe the reference count crossing specific values under a CAS
/// (see [`Entry::start_evicting`]), which `Arc`'s opaque strong count
/// does not expose. `EntryHandle` is `Copy` — copying it does **not**
/// acquire a reference; callers must call [`Entry::acquire`] /
/// [`Entry::release`] explicitly, the same way the index and the LRU
/// list do.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct EntryHandle(NonNull<Entry>);

impl EntryHandle {
    /// Allocates `entry` on the heap and returns a handle to it.
    pub fn alloc(entry: Entry) -> Self {
        EntryHandle(NonNull::from(Box::leak(Box::new(entry))))
    }

    /// Reclaims the heap allocation behind this handle.
    ///
    /// # Safety
    ///
    /// The caller must guarantee that this is the last `EntryHandle`
    /// referring to this allocation (i.e. the entry's reference count
    /// has just reached zero) and that no other handle will be
    /// dereferenced afterwards.
    pub unsafe fn dealloc(self) {
        // SAFETY: forwarded from the caller's guarantee above.
        drop(unsafe { Box::from_raw(self.0.as_ptr()) });
    }

    /// The raw address of this handle's allocation, stable for as long
    /// as the allocation lives. Used only as an opaque ring/slot key.
    pub fn addr(&self) -> usize {
        self.0.as_ptr() as usize
    }
}

impl std::ops::Deref for EntryHandle {
    type Target = Entry;

    fn deref(&self) -> &Entry {
        // SAFETY: a live `EntryHandle` always holds a reference that
        // keeps the pointee allocated; see the type's invariant.
        unsafe { self.0.as_ref() }
    }
}

impl fmt::Debug for EntryHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        (**self).fmt(f)
    }
}

// SAFETY: `Entry` is Send + Sync (all fields are atomics or owned,
// non-shared data), so a pointer to one guarded by the reference-count
// protocol is safe to move and share across threads.
unsafe impl Send for EntryHandle {}
unsafe impl Sync for EntryHandle {}

/// A single cached (key, value) pair's bookkeeping.
///
/// `Entry` itself never copies value bytes; it only records where they
/// live in the mapped pool. Byte copies happen in [`crate::cache`] through
/// the [`crate::mapping::MappedFile`].
pub struct Entry {
    key: Box<[u8]>,
    extents: Vec<Extent>,
    value_len: u64,
    refs: AtomicU32,
    evicting: AtomicBool,
    slot: Slot,
}

impl Entry {
    /// Creates a new entry with a single initial reference. `put` hands
    /// this reference straight to the index on a successful insert (see
    /// [`crate::index::shard::Shard::insert`]); it is never separately
    /// acquired for the index.
    pub fn new(key: Box<[u8]>, extents: Vec<Extent>, value_len: u64) -> Self {
        Entry {
            key,
            extents,
            value_len,
            refs: AtomicU32::new(1),
            evicting: AtomicBool::new(false),
            slot: Slot::new(),
        }
    }

    /// The entry's key.
    pub fn key(&self) -> &[u8] {
        &self.key
    }

    /// The extents backing this entry's value, in value order.
    pub fn extents(&self) -> &[Extent] {
        &self.extents
    }

    /// The logical length of the value in bytes.
    pub fn value_len(&self) -> u64 {
        self.value_len
    }

    /// This entry's LRU slot.
    pub fn slot(&self) -> &Slot {
        &self.slot
    }

    /// Acquires an additional reference. Returns the new count.
    #[inline]
    pub fn acquire(&self) -> u32 {
        self.refs.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Releases a reference. Returns `true` if this was the last reference
    /// (the caller is responsible for freeing the entry's extents and
    /// dropping the descriptor).
    #[inline]
    pub fn release(&self) -> bool {
        self.refs.fetch_sub(1, Ordering::AcqRel) == 1
    }

    /// The current reference count. For diagnostics/tests only: the count
    /// can change concurrently.
    pub fn ref_count(&self) -> u32 {
        self.refs.load(Ordering::Acquire)
    }

    /// Attempts the false -> true transition on the `evicting` flag.
    /// Returns `true` if this call won the race.
    #[inline]
    pub fn start_evicting(&self) -> bool {
        self.evicting
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Whether this entry has begun eviction (by this thread or another).
    pub fn is_evicting(&self) -> bool {
        self.evicting.load(Ordering::Acquire)
    }
}

impl fmt::Debug for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entry")
            .field("key_len", &self.key.len())
            .field("extents", &self.extents.len())
            .field("value_len", &self.value_len)
            .field("refs", &self.ref_count())
            .field("evicting", &self.is_evicting())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extent::Extent;

    fn dummy() -> Entry {
        Entry::new(
            b"k".to_vec().into_boxed_slice(),
            vec![Extent::new(0, 256)],
            4,
        )
    }

    #[test]
    fn starts_with_one_reference() {
        let e = dummy();
        assert_eq!(e.ref_count(), 1);
    }

    #[test]
    fn acquire_and_release_track_count() {
        let e = dummy();
        assert_eq!(e.acquire(), 2);
        assert!(!e.release());
        assert!(e.release());
    }

    #[test]
    fn evicting_flag_transitions_once() {
        let e = dummy();
        assert!(e.start_evicting());
        assert!(!e.start_evicting());
        assert!(e.is_evicting());
    }
}
