//! Block allocator capability
//!
//! Queue buffers are obtained through this trait instead of the global
//! allocator directly, so an embedding can back them with an arena or a
//! thread-local pool. The scheduler only needs fixed-size, fixed-alignment
//! blocks; it never resizes in place.

use core::alloc::Layout;
use core::ptr::NonNull;

/// Allocate and free fixed-layout memory blocks.
///
/// # Safety
///
/// Implementations must return blocks valid for reads and writes of
/// `layout.size()` bytes at `layout.align()` alignment, and must accept
/// back any block they handed out together with the same layout.
pub unsafe trait BlockAllocator: Send + Sync {
    /// Allocate an uninitialized block. `None` on exhaustion.
    fn allocate(&self, layout: Layout) -> Option<NonNull<u8>>;

    /// Return a block previously obtained from `allocate`.
    ///
    /// # Safety
    ///
    /// `ptr` must come from `self.allocate(layout)` with the same `layout`
    /// and must not be used afterwards.
    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout);
}

/// Forwards to the process-global allocator.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemAllocator;

unsafe impl BlockAllocator for SystemAllocator {
    #[inline]
    fn allocate(&self, layout: Layout) -> Option<NonNull<u8>> {
        if layout.size() == 0 {
            // Zero-sized blocks never get dereferenced; hand out a dangling
            // pointer with the right alignment.
            return NonNull::new(layout.align() as *mut u8);
        }
        // Safety: layout has non-zero size.
        NonNull::new(unsafe { std::alloc::alloc(layout) })
    }

    #[inline]
    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        if layout.size() != 0 {
            std::alloc::dealloc(ptr.as_ptr(), layout);
        }
    }
}
