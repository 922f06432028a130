//! Error types returned by cache operations.
//!
//! The original C ABI this crate's design traces back to reported failures
//! through a per-thread error-message slot and a small set of integer
//! codes. Here every fallible operation returns a typed [`Error`] instead.

use std::fmt;
use std::io;

use thiserror::Error as ThisError;

/// The category of failure behind an [`Error`].
///
/// Kinds are the stable part of the contract: callers should match on
/// `ErrorKind`, not on the `Display` text of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A configuration value or call argument was out of range.
    InvalidArgument,
    /// The cache has not been attached yet; the operation requires `attach`.
    NotReady,
    /// `attach` was called on a cache that is already ready.
    AlreadyReady,
    /// The requested key is not present.
    NotFound,
    /// `put` was called with a key that is already present.
    AlreadyExists,
    /// The value is larger than the entire pool could ever hold.
    TooLarge,
    /// The allocator could not satisfy the request, even after eviction.
    NoSpace,
    /// `evict(None)` found no victim (the LRU is empty or every entry is pinned).
    NoVictim,
    /// The targeted entry is concurrently being evicted by another thread.
    Busy,
    /// A heap allocation failed.
    OutOfMemory,
    /// The backing file or mapping could not be created or accessed.
    Io,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::InvalidArgument => "invalid argument",
            ErrorKind::NotReady => "cache is not ready",
            ErrorKind::AlreadyReady => "cache is already ready",
            ErrorKind::NotFound => "key not found",
            ErrorKind::AlreadyExists => "key already exists",
            ErrorKind::TooLarge => "value too large for pool",
            ErrorKind::NoSpace => "no space available",
            ErrorKind::NoVictim => "no eviction victim available",
            ErrorKind::Busy => "entry is busy",
            ErrorKind::OutOfMemory => "out of memory",
            ErrorKind::Io => "I/O error",
        };
        f.write_str(s)
    }
}

/// The error type returned by every fallible operation in this crate.
#[derive(Debug, ThisError)]
#[error("{kind}: {message}")]
pub struct Error {
    kind: ErrorKind,
    message: String,
    #[source]
    source: Option<io::Error>,
}

impl Error {
    /// Builds an error of the given kind with a human-readable message.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Error {
            kind,
            message: message.into(),
            source: None,
        }
    }

    pub(crate) fn io(source: io::Error) -> Self {
        Error {
            kind: ErrorKind::Io,
            message: source.to_string(),
            source: Some(source),
        }
    }

    /// The category of this failure.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }
}

impl From<io::Error> for Error {
    fn from(source: io::Error) -> Self {
        Error::io(source)
    }
}

/// A `Result` specialized to this crate's [`Error`] type.
pub type Result<T> = std::result::Result<T, Error>;
