use std::{ptr::NonNull, sync::OnceLock};

/// Virtual memory page size of the computer. This is usually 4096.
static PAGE_SIZE: OnceLock<usize> = OnceLock::new();

/// Where arenas get their raw storage from.
///
/// The arena zeroes every region it receives, so sources may hand out dirty
/// memory. Implementations must be shareable between registries, hence
/// `Send + Sync`.
///
/// # Safety
///
/// A pointer returned by [`MemorySource::request_memory`] for `len` bytes
/// must be valid for reads and writes of `len` bytes and must not be reachable
/// through anything else until it is handed back with
/// [`MemorySource::return_memory`].
pub unsafe trait MemorySource: Send + Sync {
    /// Request a memory region of `len` bytes. Returns `None` if the
    /// underlying source cannot provide it.
    fn request_memory(&self, len: usize) -> Option<NonNull<u8>>;

    /// Give the region of `len` bytes starting at `addr` back to the source.
    ///
    /// # Safety
    ///
    /// `addr` must have been returned by [`MemorySource::request_memory`] on
    /// this same source with the same `len`, and must not be used afterwards.
    unsafe fn return_memory(&self, addr: NonNull<u8>, len: usize);
}

/// Anonymous private mappings straight from the kernel (`mmap` on unix,
/// `VirtualAlloc` on Windows). Requests are rounded up to whole pages.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemMemory;

/// Low level memory syscalls, one implementation per platform.
trait PlatformMemory {
    unsafe fn map(len: usize) -> Option<NonNull<u8>>;

    unsafe fn unmap(addr: *mut u8, len: usize);

    /// Returns the virtual memory page size of the computer in bytes.
    unsafe fn page_size() -> usize;
}

/// Rounds `len` up to a multiple of `to`, which must be a power of two.
#[inline]
pub(crate) fn align(len: usize, to: usize) -> usize {
    (len + to - 1) & !(to - 1)
}

/// Wrapper to calculate the computer's page size once.
#[inline]
pub fn page_size() -> usize {
    *PAGE_SIZE.get_or_init(|| unsafe { SystemMemory::page_size() })
}

unsafe impl MemorySource for SystemMemory {
    fn request_memory(&self, len: usize) -> Option<NonNull<u8>> {
        // Rounding up must not wrap around.
        if len == 0 || len > usize::MAX - page_size() {
            return None;
        }
        unsafe { SystemMemory::map(align(len, page_size())) }
    }

    unsafe fn return_memory(&self, addr: NonNull<u8>, len: usize) {
        unsafe { SystemMemory::unmap(addr.as_ptr(), align(len, page_size())) }
    }
}

#[cfg(unix)]
mod unix {
    use super::{PlatformMemory, SystemMemory};

    use libc::{mmap, munmap, off_t, size_t};

    use std::{
        os::raw::{c_int, c_void},
        ptr::NonNull,
    };

    impl PlatformMemory for SystemMemory {
        unsafe fn map(len: usize) -> Option<NonNull<u8>> {
            const ADDR: *mut c_void = std::ptr::null_mut::<c_void>();
            // Read-Write only memory.
            const PROT: c_int = libc::PROT_READ | libc::PROT_WRITE;
            const FLAGS: c_int = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;
            const FD: c_int = -1;
            const OFFSET: off_t = 0;

            unsafe {
                let addr = mmap(ADDR, len as size_t, PROT, FLAGS, FD, OFFSET);

                match addr {
                    libc::MAP_FAILED => None,
                    addr => NonNull::new(addr.cast::<u8>()),
                }
            }
        }

        unsafe fn unmap(addr: *mut u8, len: usize) {
            unsafe {
                munmap(addr as *mut c_void, len as size_t);
            }
        }

        unsafe fn page_size() -> usize {
            unsafe { libc::sysconf(libc::_SC_PAGE_SIZE) as usize }
        }
    }
}

#[cfg(windows)]
mod windows {
    use std::{mem::MaybeUninit, os::raw::c_void, ptr::NonNull};

    use super::{PlatformMemory, SystemMemory};

    use windows::Win32::System::{Memory, SystemInformation};

    impl PlatformMemory for SystemMemory {
        unsafe fn map(len: usize) -> Option<NonNull<u8>> {
            // Read-Write only.
            let protection = Memory::PAGE_READWRITE;

            let flags = Memory::MEM_RESERVE | Memory::MEM_COMMIT;

            unsafe {
                let addr = Memory::VirtualAlloc(None, len, flags, protection);

                NonNull::new(addr.cast())
            }
        }

        unsafe fn unmap(addr: *mut u8, _len: usize) {
            unsafe {
                let _ = Memory::VirtualFree(addr as *mut c_void, 0, Memory::MEM_RELEASE);
            }
        }

        unsafe fn page_size() -> usize {
            unsafe {
                let mut system_info = MaybeUninit::uninit();
                SystemInformation::GetSystemInfo(system_info.as_mut_ptr());

                system_info.assume_init().dwPageSize as usize
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requests_round_up_to_pages() {
        assert_eq!(align(1, 4096), 4096);
        assert_eq!(align(4096, 4096), 4096);
        assert_eq!(align(4097, 4096), 8192);
        assert_eq!(align(100, page_size()), page_size());
    }

    #[test]
    fn page_size_is_power_of_two() {
        assert!(page_size().is_power_of_two());
    }

    #[test]
    fn mapped_memory_is_writable() {
        let source = SystemMemory;
        let addr = source.request_memory(100).expect("mapping 100 bytes");

        unsafe {
            addr.as_ptr().write_bytes(0xAB, 100);
            assert_eq!(*addr.as_ptr().add(99), 0xAB);
            source.return_memory(addr, 100);
        }
    }

    #[test]
    fn zero_length_request_fails() {
        assert!(SystemMemory.request_memory(0).is_none());
    }
}
