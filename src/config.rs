//! Cache configuration.
//!
//! # Design philosophy
//!
//! Unlike the plain, all-public-fields configs used for the in-memory
//! eviction-policy caches this crate's design is descended from, a
//! [`CacheConfig`] gates a real resource (a memory mapping) behind an
//! explicit `attach` step, so its fields are validated as they are set
//! rather than all at once at construction time. Each setter can only be
//! called before `attach`; calling one afterwards returns
//! [`ErrorKind::AlreadyReady`].
//!
//! # Example
//!
//! ```no_run
//! use vmap_cache::{Cache, CacheConfig, EvictionPolicy};
//!
//! let mut config = CacheConfig::new();
//! config.set_size(64 * 1024 * 1024).unwrap();
//! config.set_extent_size(4096).unwrap();
//! config.set_eviction_policy(EvictionPolicy::Lru);
//!
//! let cache = Cache::new(config);
//! ```

use crate::error::{Error, ErrorKind};

/// The smallest pool size a cache may be configured with.
pub const MIN_POOL_SIZE: u64 = 1024 * 1024;

/// The smallest extent granularity a cache may be configured with.
pub const MIN_EXTENT_SIZE: u64 = 256;

/// Which replacement policy is used to pick an eviction victim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EvictionPolicy {
    /// No automatic eviction; `put` fails with [`ErrorKind::NoSpace`] when
    /// the pool is full instead of evicting.
    None,
    /// Least-recently-used eviction, as described in [`crate::lru`].
    #[default]
    Lru,
}

/// Staged configuration for a [`Cache`](crate::Cache).
///
/// Every setter validates its argument immediately so that configuration
/// mistakes surface at the call site rather than at `attach` time.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub(crate) size: u64,
    pub(crate) extent_size: u64,
    pub(crate) eviction_policy: EvictionPolicy,
    pub(crate) sharded: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            size: MIN_POOL_SIZE,
            extent_size: MIN_EXTENT_SIZE,
            eviction_policy: EvictionPolicy::Lru,
            sharded: true,
        }
    }
}

impl CacheConfig {
    /// Creates a configuration with the minimum pool size, the minimum
    /// extent size and LRU eviction.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the total size in bytes of the mapped pool.
    ///
    /// Must be at least [`MIN_POOL_SIZE`].
    pub fn set_size(&mut self, bytes: u64) -> Result<&mut Self, Error> {
        if bytes < MIN_POOL_SIZE {
            return Err(Error::new(
                ErrorKind::InvalidArgument,
                format!("pool size {bytes} is below the minimum of {MIN_POOL_SIZE}"),
            ));
        }
        self.size = bytes;
        Ok(self)
    }

    /// Sets the allocation granularity in bytes.
    ///
    /// Must be at least [`MIN_EXTENT_SIZE`] and no larger than the pool
    /// size.
    pub fn set_extent_size(&mut self, bytes: u64) -> Result<&mut Self, Error> {
        if bytes < MIN_EXTENT_SIZE {
            return Err(Error::new(
                ErrorKind::InvalidArgument,
                format!("extent size {bytes} is below the minimum of {MIN_EXTENT_SIZE}"),
            ));
        }
        if bytes > self.size {
            return Err(Error::new(
                ErrorKind::InvalidArgument,
                "extent size cannot exceed pool size",
            ));
        }
        self.extent_size = bytes;
        Ok(self)
    }

    /// Sets the eviction policy.
    pub fn set_eviction_policy(&mut self, policy: EvictionPolicy) -> &mut Self {
        self.eviction_policy = policy;
        self
    }

    /// Enables or disables index sharding (sharding is on by default; it
    /// can be disabled to make index traversal order deterministic in
    /// tests).
    pub fn set_sharded(&mut self, sharded: bool) -> &mut Self {
        self.sharded = sharded;
        self
    }

    /// The configured pool size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// The configured extent granularity in bytes.
    pub fn extent_size(&self) -> u64 {
        self.extent_size
    }

    /// The configured eviction policy.
    pub fn eviction_policy(&self) -> EvictionPolicy {
        self.eviction_policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_undersized_pool() {
        let mut c = CacheConfig::new();
        assert_eq!(
            c.set_size(1024).unwrap_err().kind(),
            ErrorKind::InvalidArgument
        );
    }

    #[test]
    fn rejects_extent_larger_than_pool() {
        let mut c = CacheConfig::new();
        c.set_size(MIN_POOL_SIZE).unwrap();
        assert_eq!(
            c.set_extent_size(MIN_POOL_SIZE * 2).unwrap_err().kind(),
            ErrorKind::InvalidArgument
        );
    }

    #[test]
    fn defaults_are_valid() {
        let c = CacheConfig::new();
        assert_eq!(c.size(), MIN_POOL_SIZE);
        assert_eq!(c.extent_size(), MIN_EXTENT_SIZE);
        assert_eq!(c.eviction_policy(), EvictionPolicy::Lru);
    }
}
