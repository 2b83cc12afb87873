use std::sync::OnceLock;

use parking_lot::{MappedMutexGuard, Mutex, MutexGuard};

/// Smallest alignment used for pinned allocations.
pub const MIN_PAGE_SIZE: usize = 4096;

/// Page size of the platform, never below [`MIN_PAGE_SIZE`].
pub fn page_size() -> usize {
    static PAGE: OnceLock<usize> = OnceLock::new();
    *PAGE.get_or_init(|| {
        let queried = query_page_size();
        if queried < MIN_PAGE_SIZE || !queried.is_power_of_two() {
            log::debug!("page size {queried} unusable, aligning to {MIN_PAGE_SIZE}");
            return MIN_PAGE_SIZE;
        }
        queried
    })
}

#[cfg(unix)]
fn query_page_size() -> usize {
    // SAFETY: sysconf has no preconditions.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    usize::try_from(size).unwrap_or(0)
}

#[cfg(not(unix))]
fn query_page_size() -> usize {
    MIN_PAGE_SIZE
}

/// CPU-addressable bytes backing one transfer slot.
///
/// Pinned allocations over-allocate by one page and expose a page-aligned
/// window, so a backend may hand the same memory to the GPU. Staging
/// allocations hold the contents of a mapped GPU buffer while it is mapped.
///
/// The lock only guards against accidental overlap; exclusive ownership of a
/// slot is established by the stream protocol, not by this mutex.
#[derive(Debug)]
pub struct HostMemory {
    storage: Mutex<Vec<u8>>,
    offset: usize,
    len: usize,
    pinned: bool,
}

impl HostMemory {
    /// Page-aligned allocation of `len` bytes.
    pub fn pinned(len: usize) -> Self {
        let page = page_size();
        let storage = vec![0u8; len + page];
        let misalignment = storage.as_ptr() as usize % page;
        let offset = (page - misalignment) % page;

        Self {
            storage: Mutex::new(storage),
            offset,
            len,
            pinned: true,
        }
    }

    /// Plain allocation of `len` bytes.
    pub fn staging(len: usize) -> Self {
        Self {
            storage: Mutex::new(vec![0u8; len]),
            offset: 0,
            len,
            pinned: false,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn is_pinned(&self) -> bool {
        self.pinned
    }

    /// Locks the visible window.
    pub fn lock(&self) -> MappedMutexGuard<'_, [u8]> {
        let (offset, len) = (self.offset, self.len);
        MutexGuard::map(self.storage.lock(), move |bytes| &mut bytes[offset..offset + len])
    }

    /// Address of the first visible byte.
    pub fn address(&self) -> usize {
        self.storage.lock().as_ptr() as usize + self.offset
    }

    /// Copies the full contents of `other` into `self`.
    pub fn copy_from(&self, other: &HostMemory) {
        let src = other.lock();
        let mut dst = self.lock();
        let n = src.len().min(dst.len());
        dst[..n].copy_from_slice(&src[..n]);
    }
}
