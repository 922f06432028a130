//! Least-recently-used eviction policy.
//!
//! The LRU order lives in a doubly-linked [`crate::list::List`] guarded
//! by a single mutex. To keep the hot `get` path off that mutex, a
//! [`Policy`] additionally keeps a bounded, lock-free ring of recently
//! touched entries (`crossbeam::queue::ArrayQueue`): a touch tries to
//! push into the ring first and only falls back to the list mutex when
//! the ring is full, at which point every pending entry is drained to
//! the tail in one pass.
//!
//! # Eventual consistency
//!
//! An entry touched very recently may sit in the ring rather than at the
//! tail of the list for a short while. Eviction treats the ring as an
//! extension of the list's most-recently-used end: before giving up, it
//! drains the ring and retries. This bounded delay is an accepted
//! trade-off of keeping `get` lock-free in the common case.

use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam::queue::ArrayQueue;
use parking_lot::Mutex;

use crate::entry::EntryHandle;
use crate::error::{Error, ErrorKind};
use crate::list::{self, List};

/// Capacity of the lock-free "recently touched" ring.
pub const RING_CAPACITY: usize = 4096;

type LruNode = list::Node<EntryHandle>;

const EVICTED: usize = 0;
const LOCKED: usize = 1;

/// An entry's atomic position within the LRU list.
///
/// Three states, encoded as a tagged `usize`:
/// - `Evicted` (`0`): not currently tracked by the policy.
/// - `Locked` (`1`): a thread has exclusive claim on this entry's slot,
///   either to move it within the list or to evict it.
/// - `Present(ptr)`: linked into the list at `ptr`.
#[derive(Debug)]
pub struct Slot(AtomicUsize);

enum SlotState {
    Evicted,
    Locked,
    Present(NonNull<LruNode>),
}

fn decode_slot(word: usize) -> SlotState {
    match word {
        EVICTED => SlotState::Evicted,
        LOCKED => SlotState::Locked,
        ptr => SlotState::Present(NonNull::new(ptr as *mut LruNode).expect("non-null slot pointer")),
    }
}

impl Slot {
    /// A freshly created, untracked slot.
    pub fn new() -> Self {
        Slot(AtomicUsize::new(EVICTED))
    }

    fn state(&self) -> SlotState {
        decode_slot(self.0.load(Ordering::Acquire))
    }

    fn cas(&self, from: usize, to: usize) -> bool {
        self.0
            .compare_exchange(from, to, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl Default for Slot {
    fn default() -> Self {
        Self::new()
    }
}

/// The LRU replacement policy.
pub struct Policy {
    list: Mutex<List<EntryHandle>>,
    ring: ArrayQueue<usize>,
}

impl Policy {
    /// Creates an empty policy.
    pub fn new() -> Self {
        Policy {
            list: Mutex::new(List::new()),
            ring: ArrayQueue::new(RING_CAPACITY),
        }
    }

    /// Registers `handle` with the policy, taking an LRU reference and
    /// placing it at the most-recently-used end.
    pub fn insert(&self, handle: EntryHandle) {
        handle.acquire();
        let node = Box::into_raw(Box::new(LruNode::new(handle)));
        let node_addr = node as usize;
        handle.slot().0.store(node_addr, Ordering::Release);
        let mut list = self.list.lock();
        // SAFETY: `node` was just allocated and is not linked anywhere.
        unsafe { list.push_back(NonNull::new_unchecked(node)) };
    }

    /// Records that `handle` was just accessed.
    pub fn touch(&self, handle: EntryHandle) {
        let slot = handle.slot();
        let node = match slot.state() {
            SlotState::Evicted | SlotState::Locked => return,
            SlotState::Present(node) => node,
        };
        if !slot.cas(node.as_ptr() as usize, LOCKED) {
            // Lost a race with a concurrent toucher or evictor; whichever
            // of us loses just skips this touch, which is fine for LRU.
            return;
        }
        if self.ring.push(node.as_ptr() as usize).is_err() {
            // Ring is full: drain it under the list lock, then place
            // this node directly.
            let mut list = self.list.lock();
            self.drain_ring_locked(&mut list);
            // SAFETY: we hold the list lock and this node is currently
            // linked (it was Present before we locked it above).
            unsafe { list.move_to_back(node) };
            slot.0.store(node.as_ptr() as usize, Ordering::Release);
        }
        // else: the node stays `Locked` until a drain moves it to the
        // tail and restores `Present`.
    }

    fn drain_ring_locked(&self, list: &mut List<EntryHandle>) {
        while let Some(addr) = self.ring.pop() {
            // SAFETY: addresses pushed into the ring always originate
            // from a currently-linked, locked node (see `touch`).
            let node = unsafe { NonNull::new_unchecked(addr as *mut LruNode) };
            unsafe { list.move_to_back(node) };
            let handle = unsafe { node.as_ref() }.value();
            handle.slot().0.store(addr, Ordering::Release);
        }
    }

    /// Evicts and returns the current least-recently-used entry,
    /// transferring its LRU reference to the caller.
    ///
    /// The caller is responsible for calling [`crate::entry::Entry::release`]
    /// on the returned handle once it is done with it.
    pub fn evict_lru(&self) -> Result<EntryHandle, Error> {
        for attempt in 0..2 {
            let mut list = self.list.lock();
            if attempt == 1 {
                self.drain_ring_locked(&mut list);
            }
            let mut cursor = list.front();
            while let Some(node) = cursor {
                let handle = *unsafe { node.as_ref() }.value();
                let next = unsafe { list.next(node) };
                if handle.slot().cas(node.as_ptr() as usize, EVICTED) {
                    unsafe { list.unlink(node) };
                    drop(list);
                    // SAFETY: we just unlinked the node we allocated in `insert`.
                    drop(unsafe { Box::from_raw(node.as_ptr()) });
                    return Ok(handle);
                }
                cursor = next;
            }
        }
        Err(Error::new(ErrorKind::NoVictim, "no evictable entry in the LRU list"))
    }

    /// Evicts a specific entry that the caller already owns a reference
    /// to, transferring its LRU reference to the caller.
    pub fn evict_specific(&self, handle: EntryHandle) -> Result<(), Error> {
        let slot = handle.slot();
        for _ in 0..8 {
            match slot.state() {
                SlotState::Evicted => return Ok(()),
                SlotState::Locked => {
                    let mut list = self.list.lock();
                    self.drain_ring_locked(&mut list);
                    continue;
                }
                SlotState::Present(node) => {
                    if slot.cas(node.as_ptr() as usize, EVICTED) {
                        let mut list = self.list.lock();
                        unsafe { list.unlink(node) };
                        drop(list);
                        // SAFETY: this node was allocated in `insert` and
                        // we just unlinked the only reference to it.
                        drop(unsafe { Box::from_raw(node.as_ptr()) });
                        return Ok(());
                    }
                }
            }
        }
        Err(Error::new(
            ErrorKind::Busy,
            "could not win the eviction race for this entry",
        ))
    }

    /// Number of entries currently tracked (approximate: entries mid-touch
    /// in the ring are still counted, since they remain linked).
    pub fn len(&self) -> usize {
        self.list.lock().len()
    }

    /// Whether the policy currently tracks no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for Policy {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Policy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Policy").field("len", &self.len()).finish()
    }
}
