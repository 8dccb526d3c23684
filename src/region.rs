use std::{
    fmt,
    mem::ManuallyDrop,
    ptr::{self, NonNull},
    slice,
    sync::Arc,
};

use crate::{
    error::{ArenaError, Result},
    kernel::MemorySource,
};

/// The raw storage owned by one arena.
///
/// Dropping a `Region` gives its bytes back to the source. When the chain
/// describing the region turns out to be corrupt the arena calls
/// [`Region::leak`] instead, and the storage is never returned.
pub(crate) struct Region {
    addr: NonNull<u8>,
    len: usize,
    source: Arc<dyn MemorySource>,
}

// SAFETY: the region is the only owner of `addr`; nothing else aliases the
// mapping, so moving it to another thread moves the only way to reach it.
unsafe impl Send for Region {}

impl Region {
    /// Asks `source` for `len` bytes and zeroes them.
    pub fn acquire(len: usize, source: Arc<dyn MemorySource>) -> Result<Self> {
        let addr = source
            .request_memory(len)
            .ok_or(ArenaError::AllocationFailed { requested: len })?;

        // SAFETY: the source guarantees `len` writable bytes at `addr`.
        unsafe { ptr::write_bytes(addr.as_ptr(), 0, len) };

        Ok(Self { addr, len, source })
    }

    /// The `len` bytes starting at `offset`.
    ///
    /// Callers get offsets from block descriptors, which always lie inside the
    /// region; the bounds are still checked.
    pub fn bytes(&self, offset: usize, len: usize) -> &[u8] {
        assert!(offset <= self.len && len <= self.len - offset, "range outside region");
        unsafe { slice::from_raw_parts(self.addr.as_ptr().add(offset), len) }
    }

    pub fn bytes_mut(&mut self, offset: usize, len: usize) -> &mut [u8] {
        assert!(offset <= self.len && len <= self.len - offset, "range outside region");
        unsafe { slice::from_raw_parts_mut(self.addr.as_ptr().add(offset), len) }
    }

    /// Gives up the storage without returning it to the source. The source
    /// itself is still released.
    pub fn leak(self) {
        let region = ManuallyDrop::new(self);
        // SAFETY: `region` is never used again, so the source is dropped once.
        drop(unsafe { ptr::read(&region.source) });
    }
}

impl Drop for Region {
    fn drop(&mut self) {
        unsafe { self.source.return_memory(self.addr, self.len) }
    }
}

impl fmt::Debug for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Region")
            .field("addr", &self.addr)
            .field("len", &self.len)
            .finish()
    }
}
