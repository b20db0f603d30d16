use crate::error::{Error, Result};
use std::alloc::{Layout, alloc_zeroed, dealloc, handle_alloc_error};
use std::ffi::CString;
use std::io;
use std::ptr::NonNull;

/// Alignment every region guarantees for its base address.
pub const REGION_ALIGN: usize = 128;

/// Host-resident memory backing a channel pool.
///
/// # Safety
///
/// Implementors must guarantee that `as_ptr()` is valid for reads and writes
/// of `len()` bytes for as long as the region is alive, is aligned to
/// [`REGION_ALIGN`], and was zero-filled when first created.
pub unsafe trait Region: Send + Sync {
    fn as_ptr(&self) -> NonNull<u8>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A zeroed heap allocation, for a drain agent living in the same process.
#[derive(Debug)]
pub struct HeapRegion {
    ptr: NonNull<u8>,
    layout: Layout,
}

unsafe impl Send for HeapRegion {}
unsafe impl Sync for HeapRegion {}

impl HeapRegion {
    pub fn new(len: usize) -> Result<Self> {
        let layout = Layout::from_size_align(len.max(1), REGION_ALIGN)
            .map_err(|e| Error::InvalidConfig(format!("region of {len} bytes: {e}")))?;
        let ptr = unsafe { alloc_zeroed(layout) };
        let Some(ptr) = NonNull::new(ptr) else {
            handle_alloc_error(layout)
        };
        Ok(Self { ptr, layout })
    }
}

unsafe impl Region for HeapRegion {
    #[inline(always)]
    fn as_ptr(&self) -> NonNull<u8> {
        self.ptr
    }

    #[inline(always)]
    fn len(&self) -> usize {
        self.layout.size()
    }
}

impl Drop for HeapRegion {
    fn drop(&mut self) {
        unsafe { dealloc(self.ptr.as_ptr(), self.layout) }
    }
}

/// A POSIX shared-memory region, so the drain agent can run in another
/// process.
///
/// The name must follow POSIX shared-memory naming rules: it starts with
/// `'/'` and contains no other `'/'`. The mapping is removed when the region
/// is dropped; the named object itself persists until [`ShmRegion::unlink`].
#[derive(Debug)]
pub struct ShmRegion {
    ptr: NonNull<u8>,
    len: usize,
}

unsafe impl Send for ShmRegion {}
unsafe impl Sync for ShmRegion {}

impl ShmRegion {
    /// Creates a new named region of `len` bytes. Fails if it already exists.
    pub fn create(name: &str, len: usize) -> io::Result<Self> {
        let name = shm_name(name)?;
        unsafe {
            let fd = libc::shm_open(
                name.as_ptr(),
                libc::O_CREAT | libc::O_EXCL | libc::O_RDWR,
                0o600,
            );
            if fd == -1 {
                return Err(io::Error::last_os_error());
            }
            // A freshly truncated object reads as zeros.
            if libc::ftruncate(fd, len as libc::off_t) == -1 {
                let err = io::Error::last_os_error();
                libc::close(fd);
                libc::shm_unlink(name.as_ptr());
                return Err(err);
            }
            let mapped = map_fd(fd, len);
            libc::close(fd);
            if mapped.is_err() {
                libc::shm_unlink(name.as_ptr());
            }
            Ok(Self { ptr: mapped?, len })
        }
    }

    /// Maps an existing named region with its current size.
    pub fn open(name: &str) -> io::Result<Self> {
        let name = shm_name(name)?;
        unsafe {
            let fd = libc::shm_open(name.as_ptr(), libc::O_RDWR, 0o600);
            if fd == -1 {
                return Err(io::Error::last_os_error());
            }
            let mut stat: libc::stat = std::mem::zeroed();
            if libc::fstat(fd, &mut stat) == -1 {
                let err = io::Error::last_os_error();
                libc::close(fd);
                return Err(err);
            }
            let len = stat.st_size as usize;
            let mapped = map_fd(fd, len);
            libc::close(fd); // mapping stays valid
            Ok(Self { ptr: mapped?, len })
        }
    }

    /// Removes the named object. Existing mappings stay valid.
    pub fn unlink(name: &str) -> io::Result<()> {
        let name = shm_name(name)?;
        if unsafe { libc::shm_unlink(name.as_ptr()) } == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

unsafe impl Region for ShmRegion {
    #[inline(always)]
    fn as_ptr(&self) -> NonNull<u8> {
        self.ptr
    }

    #[inline(always)]
    fn len(&self) -> usize {
        self.len
    }
}

impl Drop for ShmRegion {
    fn drop(&mut self) {
        if unsafe { libc::munmap(self.ptr.as_ptr().cast(), self.len) } == -1 {
            tracing::warn!(
                len = self.len,
                "failed to unmap shared region: {}",
                io::Error::last_os_error()
            );
        }
    }
}

fn shm_name(name: &str) -> io::Result<CString> {
    CString::new(name).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))
}

unsafe fn map_fd(fd: libc::c_int, len: usize) -> io::Result<NonNull<u8>> {
    if len == 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "shared region must be non-empty",
        ));
    }
    let addr = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            len,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_SHARED,
            fd,
            0,
        )
    };
    if addr == libc::MAP_FAILED {
        return Err(io::Error::last_os_error());
    }
    NonNull::new(addr.cast::<u8>())
        .ok_or_else(|| io::Error::other("mmap returned null"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unique_name(tag: &str) -> String {
        format!("/ro_channel_region_{tag}_{}", std::process::id())
    }

    #[test]
    fn heap_region_is_zeroed_and_aligned() {
        let region = HeapRegion::new(1000).unwrap();
        assert_eq!(region.len(), 1000);
        assert_eq!(region.as_ptr().as_ptr() as usize % REGION_ALIGN, 0);
        let bytes = unsafe { std::slice::from_raw_parts(region.as_ptr().as_ptr(), region.len()) };
        assert!(bytes.iter().all(|&b| b == 0));
    }

    #[test]
    fn shm_region_is_shared_between_mappings() {
        let name = unique_name("shared");
        let _ = ShmRegion::unlink(&name);

        let a = ShmRegion::create(&name, 4096).unwrap();
        let b = ShmRegion::open(&name).unwrap();
        assert_eq!(b.len(), 4096);

        unsafe {
            assert_eq!(*b.as_ptr().as_ptr().add(17), 0);
            *a.as_ptr().as_ptr().add(17) = 0x5A;
            assert_eq!(*b.as_ptr().as_ptr().add(17), 0x5A);
        }

        ShmRegion::unlink(&name).unwrap();
    }

    #[test]
    fn shm_create_twice_fails() {
        let name = unique_name("twice");
        let _ = ShmRegion::unlink(&name);

        let _first = ShmRegion::create(&name, 128).unwrap();
        let err = ShmRegion::create(&name, 128).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);

        ShmRegion::unlink(&name).unwrap();
    }

    #[test]
    fn shm_open_missing_fails() {
        let err = ShmRegion::open(&unique_name("missing")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
