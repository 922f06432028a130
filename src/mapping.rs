//! The memory-mapped backing store.
//!
//! `MappedFile` is the one place in the crate that touches the file
//! system or calls into `memmap2`. Everything above it (the allocator,
//! the cache façade) only ever deals in byte offsets and lengths.

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use memmap2::MmapMut;
use parking_lot::Mutex;

use crate::error::Error;

/// A mutable memory mapping over a fixed-size backing file.
///
/// The backing file is created (or truncated to size) in `open` and is
/// not expected to outlive the process: this crate caches volatile data,
/// not persisted data, so the file is typically created in a temporary
/// directory and removed by the caller (or the OS) after the cache is
/// dropped.
///
/// Header/footer words are read and written through `write_at`/`read_at`
/// under the `mmap` mutex, since the allocator coalesces neighbours by
/// reading and writing them while holding its own free-list lock and
/// those words are shared state with no other ordering. Payload bytes
/// are different: an already-allocated extent belongs to exactly one
/// entry, and access to it is ordered by that entry's reference count,
/// not by anything here, so two `get`s (or a `put`'s initial write)
/// never race on the same bytes. Routing payload copies through the
/// mapping-wide mutex would serialize every `get`/`put` against every
/// other one regardless of which extents they touch; `write_payload`/
/// `read_payload` instead go straight through a raw pointer into the
/// mapping, keeping the hot path lock-free.
pub struct MappedFile {
    mmap: Mutex<MmapMut>,
    base: *mut u8,
    len: u64,
    bytes_in_use: AtomicU64,
}

// SAFETY: `base` points into the mapping owned by `mmap` and stays valid
// for `len` bytes for as long as this `MappedFile` lives — the mapping
// is never resized, remapped or moved. Sharing `base` across threads is
// sound because callers only ever dereference it within the extent
// range they currently hold a live reference to (see `write_payload`/
// `read_payload`'s safety contracts), and the allocator never hands the
// same extent to two entries at once.
unsafe impl Send for MappedFile {}
unsafe impl Sync for MappedFile {}

impl MappedFile {
    /// Creates (or truncates) a file at `path` to exactly `len` bytes and
    /// maps it into the process.
    pub fn open(path: &Path, len: u64) -> Result<Self, Error> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len(len)?;
        // SAFETY: `file` outlives this call and the resulting mapping is
        // exclusively owned by the `MappedFile` we return; no other
        // process or handle shares this path for the lifetime of the map.
        let mut mmap = unsafe { MmapMut::map_mut(&file)? };
        let base = mmap.as_mut_ptr();
        log::debug!("mapped {} bytes at {}", len, path.display());
        Ok(MappedFile {
            mmap: Mutex::new(mmap),
            base,
            len,
            bytes_in_use: AtomicU64::new(0),
        })
    }

    /// The total mapped length in bytes.
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Copies `src` into the mapping at `offset`, serialized against
    /// other header/footer readers and writers.
    pub fn write_at(&self, offset: u64, src: &[u8]) {
        let mut mmap = self.mmap.lock();
        let start = offset as usize;
        mmap[start..start + src.len()].copy_from_slice(src);
    }

    /// Copies `len` bytes starting at `offset` out of the mapping into
    /// `dst`, serialized against other header/footer readers and writers.
    pub fn read_at(&self, offset: u64, dst: &mut [u8]) {
        let mmap = self.mmap.lock();
        let start = offset as usize;
        dst.copy_from_slice(&mmap[start..start + dst.len()]);
    }

    /// Writes an 8-byte little-endian word at `offset`, used for extent
    /// headers and footers.
    pub fn write_u64(&self, offset: u64, value: u64) {
        self.write_at(offset, &value.to_le_bytes());
    }

    /// Reads an 8-byte little-endian word at `offset`.
    pub fn read_u64(&self, offset: u64) -> u64 {
        let mut buf = [0u8; 8];
        self.read_at(offset, &mut buf);
        u64::from_le_bytes(buf)
    }

    /// Copies `src` into the mapping at `offset` without taking the
    /// mapping mutex.
    ///
    /// # Safety
    ///
    /// `offset..offset + src.len()` must lie entirely within a single
    /// extent, and no other thread may be concurrently reading or
    /// writing that same range.
    pub unsafe fn write_payload(&self, offset: u64, src: &[u8]) {
        debug_assert!(offset + src.len() as u64 <= self.len);
        // SAFETY: forwarded from the caller's contract above.
        unsafe {
            std::ptr::copy_nonoverlapping(src.as_ptr(), self.base.add(offset as usize), src.len());
        }
    }

    /// Copies bytes out of the mapping at `offset` into `dst` without
    /// taking the mapping mutex.
    ///
    /// # Safety
    ///
    /// `offset..offset + dst.len()` must lie entirely within a single
    /// extent that the caller currently holds a live reference to.
    pub unsafe fn read_payload(&self, offset: u64, dst: &mut [u8]) {
        debug_assert!(offset + dst.len() as u64 <= self.len);
        // SAFETY: forwarded from the caller's contract above.
        unsafe {
            std::ptr::copy_nonoverlapping(self.base.add(offset as usize), dst.as_mut_ptr(), dst.len());
        }
    }

    pub(crate) fn track_alloc(&self, bytes: u64) {
        self.bytes_in_use.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn track_free(&self, bytes: u64) {
        self.bytes_in_use.fetch_sub(bytes, Ordering::Relaxed);
    }

    /// Bytes currently handed out by the allocator (for [`crate::stats`]).
    pub fn bytes_in_use(&self) -> u64 {
        self.bytes_in_use.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for MappedFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MappedFile").field("len", &self.len).finish()
    }
}
