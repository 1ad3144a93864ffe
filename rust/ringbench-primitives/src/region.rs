use std::alloc::{Layout, alloc_zeroed, dealloc};
use std::mem::{align_of, size_of};
use std::ptr::NonNull;

/// Alignment of every region handed out by this crate.
pub const REGION_ALIGN: usize = 64;

/// A contiguous byte range addressed by offset.
///
/// `Region` is a non-owning view: it stays valid only as long as whatever
/// produced it (a [`HeapRegion`] or a [`SharedSegment`](crate::SharedSegment))
/// is alive. Structures inside a region refer to each other by offset, never
/// by address, so two processes can map the same bytes at different bases.
#[derive(Clone, Copy, Debug)]
pub struct Region {
    base: NonNull<u8>,
    len: usize,
}

impl Region {
    /// Create a region from a raw pointer and length.
    ///
    /// # Safety
    ///
    /// - `base` must be valid for reads and writes of `len` bytes
    /// - `base` must be aligned to [`REGION_ALIGN`]
    /// - the memory must outlive every use of the returned `Region`
    pub unsafe fn from_raw(base: *mut u8, len: usize) -> Self {
        let base = NonNull::new(base).expect("region base must be non-null");
        debug_assert!((base.as_ptr() as usize).is_multiple_of(REGION_ALIGN));
        Self { base, len }
    }

    /// Base address of this mapping of the region.
    #[inline]
    pub fn as_ptr(&self) -> *mut u8 {
        self.base.as_ptr()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Pointer to a `T` living at byte offset `off`.
    ///
    /// Panics if `T` would run past the end of the region or if `off` is not
    /// aligned for `T`. Dereferencing the pointer is up to the caller.
    #[inline]
    pub fn at<T>(&self, off: usize) -> NonNull<T> {
        let end = off.checked_add(size_of::<T>());
        assert!(
            end.is_some_and(|end| end <= self.len),
            "{} bytes at offset {off} out of bounds (len={})",
            size_of::<T>(),
            self.len
        );
        assert!(
            off.is_multiple_of(align_of::<T>()),
            "offset {off} misaligned for alignment {}",
            align_of::<T>()
        );
        // SAFETY: in bounds per the assertion above.
        unsafe { NonNull::new_unchecked(self.as_ptr().add(off).cast::<T>()) }
    }

    /// Pointer to `len` raw bytes starting at `off`.
    #[inline]
    pub fn bytes_at(&self, off: usize, len: usize) -> NonNull<u8> {
        assert!(
            off.checked_add(len).is_some_and(|end| end <= self.len),
            "byte range {off}+{len} out of bounds (len={})",
            self.len
        );
        // SAFETY: in bounds per the assertion above.
        unsafe { NonNull::new_unchecked(self.as_ptr().add(off)) }
    }
}

// SAFETY: a Region is an address range; synchronizing access to the bytes is
// the job of the primitives stored inside it.
unsafe impl Send for Region {}
unsafe impl Sync for Region {}

/// Zeroed, 64-byte aligned heap allocation used by the thread transport.
pub struct HeapRegion {
    base: NonNull<u8>,
    len: usize,
    layout: Layout,
}

impl HeapRegion {
    /// Allocate `size` zeroed bytes.
    pub fn zeroed(size: usize) -> Self {
        let layout = Layout::from_size_align(size.max(1), REGION_ALIGN)
            .expect("invalid heap region layout");
        // SAFETY: the layout has non-zero size.
        let ptr = unsafe { alloc_zeroed(layout) };
        let Some(base) = NonNull::new(ptr) else {
            std::alloc::handle_alloc_error(layout);
        };
        Self {
            base,
            len: size,
            layout,
        }
    }

    #[inline]
    pub fn region(&self) -> Region {
        // SAFETY: the allocation lives as long as `self` and is REGION_ALIGN aligned.
        unsafe { Region::from_raw(self.base.as_ptr(), self.len) }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Drop for HeapRegion {
    fn drop(&mut self) {
        // SAFETY: allocated in `zeroed` with this exact layout.
        unsafe { dealloc(self.base.as_ptr(), self.layout) };
    }
}

unsafe impl Send for HeapRegion {}
unsafe impl Sync for HeapRegion {}
