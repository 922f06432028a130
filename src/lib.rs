//! A volatile, in-process, memory-mapped key/value cache.
//!
//! A [`Cache`] maps byte-string keys to byte-string values inside a
//! single fixed-size [`memmap2`] mapping. There is no persistence
//! contract: the backing file lives in a temporary directory and is
//! meaningless once the process that created it exits. Three
//! independent pieces make that mapping behave like a cache instead of
//! just an arena:
//!
//! - [`extent`]: an allocator that carves the mapping into
//!   granularity-aligned extents, tracked by an in-band header/footer
//!   pair for O(1) neighbour coalescing and a size-indexed free list for
//!   fast best-fit allocation.
//! - [`index`]: a 256-way sharded 4-bit radix trie, each shard behind its
//!   own hybrid reader/writer lock, mapping keys to entries.
//! - [`lru`]: a least-recently-used replacement policy combining an
//!   intrusive doubly-linked list with a lock-free ring buffer so the hot
//!   `get` path rarely touches a mutex.
//!
//! # Example
//!
//! ```no_run
//! use vmap_cache::{Cache, CacheConfig};
//!
//! let mut config = CacheConfig::new();
//! config.set_size(16 * 1024 * 1024).unwrap();
//! let cache = Cache::new(config);
//! cache.attach(std::path::Path::new("/tmp/my-cache")).unwrap();
//!
//! cache.put(b"hello", b"world").unwrap();
//! let mut buf = [0u8; 5];
//! let outcome = cache.get(b"hello", Some(&mut buf), 0).unwrap();
//! assert_eq!(&buf[..outcome.copied], b"world");
//! ```

/// The cache façade tying the allocator, index and replacement policy
/// together, plus the reference-counting and miss-satisfaction protocols
/// that span all three.
pub mod cache;

/// Staged cache configuration, validated as it is set.
pub mod config;

/// The cache entry descriptor and its manually reference-counted handle.
pub mod entry;

/// Error types returned by cache operations.
pub mod error;

/// The extent allocator: in-band header/footer coalescing plus a
/// size-indexed free list.
pub mod extent;

/// The sharded radix-trie key index.
pub mod index;

/// An intrusive doubly-linked list used internally by [`lru`].
///
/// **Note**: internal infrastructure exposing unsafe raw-pointer
/// operations. Use [`Cache`] instead of this module directly.
pub(crate) mod list;

/// The LRU replacement policy.
pub mod lru;

/// The memory-mapped backing store.
pub mod mapping;

/// Atomic operation counters.
pub mod stats;

pub use cache::{Cache, GetOutcome};
pub use config::{CacheConfig, EvictionPolicy, MIN_EXTENT_SIZE, MIN_POOL_SIZE};
pub use error::{Error, ErrorKind, Result};
pub use stats::Stat;
