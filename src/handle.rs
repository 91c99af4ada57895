//! Segment handles
//!
//! A [`SegmentHandle`] is a borrow of allocator state, not an owner: it stays
//! valid from `try_rent` until the segment is returned (or the allocator is
//! cleared), after which the pointer dangles. The allocator detects a second
//! return of the same segment and reports it; it never silences one.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::ptr::NonNull;

use crate::error::{Result, SuballocError};
use crate::registry::{OwnerInfo, SuballocatorRegistry};

/// Lightweight descriptor of a rented segment
///
/// Carries the owning buffer's base pointer, the segment's first element and
/// the recorded element count. Plain value: copying it does not duplicate the
/// rental.
pub struct SegmentHandle<T> {
    buffer: NonNull<T>,
    ptr: NonNull<T>,
    length: usize,
}

impl<T> SegmentHandle<T> {
    /// Builds a handle from raw parts
    ///
    /// Normally handles come from `Suballocator::try_rent`; building one by
    /// hand is for feeding externally produced segments to the trackers.
    /// Nothing is dereferenced and no ownership is implied.
    pub fn new(buffer: NonNull<T>, ptr: NonNull<T>, length: usize) -> Self {
        Self {
            buffer,
            ptr,
            length,
        }
    }

    /// Pointer to the segment's first element
    #[inline]
    pub fn as_ptr(&self) -> NonNull<T> {
        self.ptr
    }

    /// Base pointer of the owning buffer
    #[inline]
    pub fn buffer_ptr(&self) -> NonNull<T> {
        self.buffer
    }

    /// Recorded segment length in elements
    ///
    /// May exceed the requested length due to block rounding.
    #[inline]
    pub fn len(&self) -> usize {
        self.length
    }

    /// Whether the segment is empty (never true for rented segments)
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Element offset of the segment start within the owning buffer
    #[inline]
    pub fn offset(&self) -> usize {
        debug_assert!(size_of::<T>() > 0);
        (self.ptr.as_ptr() as usize - self.buffer.as_ptr() as usize) / size_of::<T>()
    }

    /// Pointer to element `index` of the segment
    ///
    /// Pointer arithmetic only; nothing is dereferenced. Panics when `index`
    /// is out of bounds, like slice indexing.
    pub fn element_ptr(&self, index: usize) -> NonNull<T> {
        assert!(index < self.length, "element index out of bounds");
        // SAFETY: index < length keeps the pointer inside the rented segment,
        // which lies inside the buffer allocation.
        unsafe { self.ptr.add(index) }
    }

    /// Shared view of the rented elements
    ///
    /// # Safety
    ///
    /// The segment must still be rented (not returned, not cleared away, and
    /// the allocator not dropped), and no exclusive access to these elements
    /// may exist for `'a`.
    pub unsafe fn as_slice<'a>(&self) -> &'a [T] {
        // SAFETY: caller guarantees the segment is live; length was recorded
        // by the allocator and lies within the buffer.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.length) }
    }

    /// Exclusive view of the rented elements
    ///
    /// # Safety
    ///
    /// Same as [`as_slice`](Self::as_slice), and additionally no other view
    /// of these elements may exist for `'a`.
    pub unsafe fn as_mut_slice<'a>(&self) -> &'a mut [T] {
        // SAFETY: as above; exclusivity is the caller's contract.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.length) }
    }

    /// Looks up the owning suballocator in the process-wide registry
    ///
    /// Returns `None` when the buffer base is not registered (owner dropped,
    /// or the handle was forged).
    pub fn owner(&self) -> Option<OwnerInfo> {
        SuballocatorRegistry::global().lookup(self.buffer.as_ptr() as usize)
    }

    /// Asks the owning suballocator for this segment's recorded length
    ///
    /// Returns `None` when the buffer base is not registered; otherwise the
    /// owner's verdict, which fails with `UnknownSegment` once the segment
    /// has been returned or cleared away.
    ///
    /// # Safety
    ///
    /// The owning suballocator must still be alive and must not be executing
    /// or mutably borrowed elsewhere during the call.
    pub unsafe fn owner_segment_length(&self) -> Option<Result<usize>> {
        let base_addr = self.buffer.as_ptr() as usize;
        let addr = self.ptr.as_ptr() as usize;
        // SAFETY: liveness and exclusivity of the owner are the caller's
        // contract, forwarded verbatim.
        unsafe {
            SuballocatorRegistry::global()
                .with_allocator(base_addr, |alloc| alloc.segment_length_addr(addr))
        }
    }

    /// Returns the segment through the registry, consuming the handle
    ///
    /// Fallback for call sites that no longer know the owner; prefer
    /// `Suballocator::return_segment`.
    ///
    /// # Safety
    ///
    /// The owning suballocator must still be alive and must not be executing
    /// or borrowed elsewhere during the call.
    pub unsafe fn dispose(self) -> Result<usize> {
        let base_addr = self.buffer.as_ptr() as usize;
        let addr = self.ptr.as_ptr() as usize;
        // SAFETY: liveness and exclusivity of the owner are the caller's
        // contract, forwarded verbatim.
        unsafe {
            SuballocatorRegistry::global()
                .with_allocator_mut(base_addr, |alloc| alloc.return_addr(addr))
        }
        .unwrap_or(Err(SuballocError::unknown_segment(self.ptr.as_ptr())))
    }
}

impl<T> Clone for SegmentHandle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for SegmentHandle<T> {}

impl<T> PartialEq for SegmentHandle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.buffer == other.buffer && self.ptr == other.ptr && self.length == other.length
    }
}

impl<T> Eq for SegmentHandle<T> {}

impl<T> Hash for SegmentHandle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.buffer.hash(state);
        self.ptr.hash(state);
        self.length.hash(state);
    }
}

impl<T> fmt::Debug for SegmentHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SegmentHandle")
            .field("buffer", &self.buffer.as_ptr())
            .field("ptr", &self.ptr.as_ptr())
            .field("length", &self.length)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offset_and_element_ptr() {
        let mut backing = [0u32; 16];
        let base = NonNull::new(backing.as_mut_ptr()).unwrap();
        // SAFETY: within the array.
        let seg = unsafe { base.add(4) };
        let handle = SegmentHandle::new(base, seg, 8);
        assert_eq!(handle.offset(), 4);
        assert_eq!(handle.len(), 8);
        assert_eq!(
            handle.element_ptr(3).as_ptr() as usize,
            seg.as_ptr() as usize + 3 * size_of::<u32>()
        );
    }

    #[test]
    #[should_panic(expected = "out of bounds")]
    fn test_element_ptr_bounds() {
        let mut backing = [0u8; 4];
        let base = NonNull::new(backing.as_mut_ptr()).unwrap();
        let handle = SegmentHandle::new(base, base, 4);
        let _ = handle.element_ptr(4);
    }

    #[test]
    fn test_span_reads_buffer_contents() {
        let mut backing = [7i64; 6];
        let base = NonNull::new(backing.as_mut_ptr()).unwrap();
        let handle = SegmentHandle::new(base, base, 6);
        // SAFETY: backing outlives the view, no aliasing writes.
        let view = unsafe { handle.as_slice() };
        assert_eq!(view, &[7i64; 6]);
    }

    #[test]
    fn test_value_semantics() {
        let mut backing = [0u8; 2];
        let base = NonNull::new(backing.as_mut_ptr()).unwrap();
        let a = SegmentHandle::new(base, base, 2);
        let b = a;
        assert_eq!(a, b);
    }
}
