//! A hybrid reader/writer lock optimized for the read-heavy shard access
//! pattern.
//!
//! A single 64-bit atomic packs two 32-bit counters: the low half counts
//! "fast" readers, the high half counts writers (in practice 0 or 1, but
//! kept as a counter so a writer can always make its intent visible with
//! a single `fetch_add`). A reader increments the low half and proceeds
//! without ever touching the mutex *unless* a writer is active, in which
//! case it backs off and falls through to a plain mutex for the
//! duration of its read. A writer sets its bit in the high half, spins
//! until the low half drains to zero, then takes the mutex (which also
//! serializes it against any reader currently on the slow path and
//! against other writers).

use std::cell::UnsafeCell;
use std::hint;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, MutexGuard};

const READER_MASK: u64 = 0xFFFF_FFFF;
const WRITER_UNIT: u64 = 1 << 32;

/// A read/write lock over `T` using the fast-path/slow-path protocol
/// described above.
pub struct HybridRwLock<T> {
    state: AtomicU64,
    slow: Mutex<()>,
    data: UnsafeCell<T>,
}

// SAFETY: access to `data` is always gated by either the fast-path
// reader count (shared access only, no-one holds `&mut T`) or the slow
// mutex (exclusive access granted by either a writer or a backed-off
// reader, each of which only takes the corresponding reference kind).
unsafe impl<T: Send> Send for HybridRwLock<T> {}
unsafe impl<T: Send> Sync for HybridRwLock<T> {}

enum ReadGuardKind<'a> {
    Fast,
    Slow(#[allow(dead_code)] MutexGuard<'a, ()>),
}

/// A shared-access guard returned by [`HybridRwLock::read`].
pub struct ReadGuard<'a, T> {
    lock: &'a HybridRwLock<T>,
    kind: ReadGuardKind<'a>,
}

impl<T> Deref for ReadGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: see the lock's top-level safety argument.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> Drop for ReadGuard<'_, T> {
    fn drop(&mut self) {
        if matches!(self.kind, ReadGuardKind::Fast) {
            self.lock.state.fetch_sub(1, Ordering::AcqRel);
        }
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for ReadGuard<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadGuard").field("value", &**self).finish()
    }
}

/// An exclusive-access guard returned by [`HybridRwLock::write`].
pub struct WriteGuard<'a, T> {
    lock: &'a HybridRwLock<T>,
    _slow: MutexGuard<'a, ()>,
}

impl<T> Deref for WriteGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: see the lock's top-level safety argument.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for WriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: see the lock's top-level safety argument.
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T> Drop for WriteGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.state.fetch_sub(WRITER_UNIT, Ordering::AcqRel);
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for WriteGuard<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteGuard").field("value", &**self).finish()
    }
}

impl<T> HybridRwLock<T> {
    /// Wraps `value` in a new lock.
    pub fn new(value: T) -> Self {
        HybridRwLock {
            state: AtomicU64::new(0),
            slow: Mutex::new(()),
            data: UnsafeCell::new(value),
        }
    }

    /// Acquires shared access, preferring the lock-free fast path.
    pub fn read(&self) -> ReadGuard<'_, T> {
        let before = self.state.fetch_add(1, Ordering::AcqRel);
        if before & !READER_MASK == 0 {
            return ReadGuard {
                lock: self,
                kind: ReadGuardKind::Fast,
            };
        }
        // A writer is active or pending: back off the fast-path counter
        // and fall back to the shared mutex for the duration of the read.
        self.state.fetch_sub(1, Ordering::AcqRel);
        let guard = self.slow.lock();
        ReadGuard {
            lock: self,
            kind: ReadGuardKind::Slow(guard),
        }
    }

    /// Acquires exclusive access.
    pub fn write(&self) -> WriteGuard<'_, T> {
        self.state.fetch_add(WRITER_UNIT, Ordering::AcqRel);
        while self.state.load(Ordering::Acquire) & READER_MASK != 0 {
            hint::spin_loop();
        }
        let guard = self.slow.lock();
        WriteGuard {
            lock: self,
            _slow: guard,
        }
    }
}

impl<T: Default> Default for HybridRwLock<T> {
    fn default() -> Self {
        HybridRwLock::new(T::default())
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for HybridRwLock<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HybridRwLock").field("value", &*self.read()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn read_allows_concurrent_access() {
        let lock = Arc::new(HybridRwLock::new(42));
        let a = lock.read();
        let b = lock.read();
        assert_eq!(*a, 42);
        assert_eq!(*b, 42);
    }

    #[test]
    fn write_is_exclusive_and_visible() {
        let lock = HybridRwLock::new(0);
        {
            let mut w = lock.write();
            *w = 7;
        }
        assert_eq!(*lock.read(), 7);
    }

    #[test]
    fn concurrent_writers_serialize() {
        let lock = Arc::new(HybridRwLock::new(0u64));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let lock = Arc::clone(&lock);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        *lock.write() += 1;
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(*lock.read(), 8000);
    }
}
