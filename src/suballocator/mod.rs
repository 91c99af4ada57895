//! Suballocator policies and their common contract
//!
//! All policies rent block-aligned, block-rounded segments out of one fixed
//! buffer and share the [`Suballocator`] contract. Each instance is owned by
//! exactly one logical task; no operation suspends and none takes a lock.

use std::fmt;
use std::ptr::NonNull;

use crate::SegmentHandle;
use crate::error::{Result, SuballocError};
use crate::registry::{ErasedSuballocator, SuballocatorRegistry};

pub mod buddy;
pub mod directional;
pub mod sequential;

pub use buddy::BuddySuballocator;
pub use directional::{
    DefaultDirectionStrategy, DirectionStrategy, DirectionalFitSuballocator,
};
pub use sequential::SequentialFitSuballocator;

/// Read-only statistics snapshot of a suballocator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SuballocatorStats {
    /// Total buffer capacity in elements
    pub capacity_length: usize,
    /// Elements currently rented (block-rounded)
    pub used_length: usize,
    /// Elements currently free (`capacity_length - used_length`)
    pub free_length: usize,
    /// Number of live segments
    pub allocations: usize,
}

impl fmt::Display for SuballocatorStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} elements used in {} segments ({} free)",
            self.used_length, self.capacity_length, self.allocations, self.free_length
        )
    }
}

/// Common contract of every suballocation policy
///
/// Segments are created exclusively by [`try_rent`](Self::try_rent), stay
/// valid until returned, and all dangle at once after
/// [`clear`](Self::clear). Out-of-memory is the one soft failure; every other
/// error is a caller programming error.
pub trait Suballocator<T> {
    /// Rents a segment of at least `length` elements
    ///
    /// The segment starts on a block boundary and its recorded length is
    /// `length` rounded up to whole blocks (clamped to the buffer end).
    /// Fails with [`SuballocError::OutOfMemory`] when no sufficient free run
    /// exists; allocator state is unchanged in that case.
    fn try_rent(&mut self, length: usize) -> Result<SegmentHandle<T>>;

    /// Reclaims the segment starting at `ptr`, returning its element count
    fn return_ptr(&mut self, ptr: NonNull<T>) -> Result<usize>;

    /// Recorded element count of the segment starting at `ptr`
    fn segment_length(&self, ptr: NonNull<T>) -> Result<usize>;

    /// Resets to the fully-free state; all outstanding handles dangle
    fn clear(&mut self);

    /// Total buffer capacity in elements
    fn capacity_length(&self) -> usize;

    /// Elements currently rented
    fn used_length(&self) -> usize;

    /// Number of live segments
    fn allocations(&self) -> usize;

    /// Block length in elements (the allocation quantum)
    fn block_length(&self) -> usize;

    /// Base pointer of the managed buffer
    fn buffer_ptr(&self) -> NonNull<T>;

    /// Live segments in ascending address order
    ///
    /// The iterator borrows the allocator, so any mutating call first requires
    /// dropping it, so a snapshot can never observe a torn state.
    fn segments(&self) -> Box<dyn Iterator<Item = SegmentHandle<T>> + '_>;

    /// Elements currently free
    fn free_length(&self) -> usize {
        self.capacity_length() - self.used_length()
    }

    /// Reclaims a rented segment, consuming its handle
    ///
    /// Verifies the handle against the recorded state first, so a stale
    /// handle whose region was cleared and re-rented at a different length
    /// is rejected rather than silently freeing the new tenant.
    fn return_segment(&mut self, handle: SegmentHandle<T>) -> Result<usize> {
        if handle.buffer_ptr() != self.buffer_ptr() {
            return Err(SuballocError::unknown_segment(handle.as_ptr().as_ptr()));
        }
        if let Ok(recorded) = self.segment_length(handle.as_ptr())
            && recorded != handle.len()
        {
            return Err(SuballocError::unknown_segment(handle.as_ptr().as_ptr()));
        }
        self.return_ptr(handle.as_ptr())
    }

    /// Statistics snapshot
    fn stats(&self) -> SuballocatorStats {
        SuballocatorStats {
            capacity_length: self.capacity_length(),
            used_length: self.used_length(),
            free_length: self.free_length(),
            allocations: self.allocations(),
        }
    }
}

/// Buffer ownership: allocated and pinned by us, or supplied by the caller
enum BufferSource<T> {
    Owned(#[allow(dead_code)] Box<[T]>),
    External,
}

/// Fixed buffer plus block geometry and usage counters
///
/// Embedded by every policy's heap-pinned state. Pointer validation, handle
/// construction and the used/allocations accounting live here so the policies
/// only deal in block indices.
pub(crate) struct BufferCore<T> {
    base: NonNull<T>,
    capacity: usize,
    block_len: usize,
    block_count: usize,
    used: usize,
    live: usize,
    _source: BufferSource<T>,
}

impl<T> BufferCore<T> {
    fn validate(capacity: usize, block_len: usize) -> Result<()> {
        if size_of::<T>() == 0 {
            return Err(SuballocError::invalid_argument(
                "element type must not be zero-sized",
            ));
        }
        if capacity == 0 {
            return Err(SuballocError::invalid_argument("capacity must be positive"));
        }
        if block_len == 0 {
            return Err(SuballocError::invalid_argument(
                "block length must be positive",
            ));
        }
        if block_len > capacity {
            return Err(SuballocError::invalid_argument(
                "block length exceeds capacity",
            ));
        }
        Ok(())
    }

    /// Allocates and pins a buffer of `capacity` default elements
    pub(crate) fn new_owned(capacity: usize, block_len: usize) -> Result<Self>
    where
        T: Copy + Default,
    {
        Self::validate(capacity, block_len)?;
        let mut owned = vec![T::default(); capacity].into_boxed_slice();
        // SAFETY: capacity > 0, so the slice has a real allocation.
        let base = unsafe { NonNull::new_unchecked(owned.as_mut_ptr()) };
        Ok(Self {
            base,
            capacity,
            block_len,
            block_count: capacity.div_ceil(block_len),
            used: 0,
            live: 0,
            _source: BufferSource::Owned(owned),
        })
    }

    /// Adopts a caller-supplied buffer
    ///
    /// # Safety
    ///
    /// `base` must point to `capacity` valid elements that outlive this core,
    /// and the caller must not touch the region for the core's lifetime.
    pub(crate) unsafe fn new_external(
        base: NonNull<T>,
        capacity: usize,
        block_len: usize,
    ) -> Result<Self> {
        Self::validate(capacity, block_len)?;
        Ok(Self {
            base,
            capacity,
            block_len,
            block_count: capacity.div_ceil(block_len),
            used: 0,
            live: 0,
            _source: BufferSource::External,
        })
    }

    #[inline]
    pub(crate) fn base(&self) -> NonNull<T> {
        self.base
    }

    #[inline]
    pub(crate) fn base_addr(&self) -> usize {
        self.base.as_ptr() as usize
    }

    #[inline]
    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub(crate) fn block_len(&self) -> usize {
        self.block_len
    }

    #[inline]
    pub(crate) fn block_count(&self) -> usize {
        self.block_count
    }

    #[inline]
    pub(crate) fn used(&self) -> usize {
        self.used
    }

    #[inline]
    pub(crate) fn live(&self) -> usize {
        self.live
    }

    /// Blocks needed to cover `length` elements
    #[inline]
    pub(crate) fn blocks_for(&self, length: usize) -> usize {
        length.div_ceil(self.block_len)
    }

    /// Element count of a `blocks`-block run starting at `block`, clamped to
    /// the buffer end (the trailing block may be partial)
    #[inline]
    pub(crate) fn run_len(&self, block: usize, blocks: usize) -> usize {
        (blocks * self.block_len).min(self.capacity - block * self.block_len)
    }

    /// Maps a segment pointer back to its block index
    ///
    /// The pointer must lie on a block boundary inside the buffer.
    pub(crate) fn block_index_of(&self, ptr: NonNull<T>) -> Result<usize> {
        let addr = ptr.as_ptr() as usize;
        let base = self.base_addr();
        let block_bytes = self.block_len * size_of::<T>();
        if addr < base || (addr - base) % block_bytes != 0 {
            return Err(SuballocError::unknown_segment(ptr.as_ptr()));
        }
        let index = (addr - base) / block_bytes;
        if index >= self.block_count {
            return Err(SuballocError::unknown_segment(ptr.as_ptr()));
        }
        Ok(index)
    }

    /// Builds the handle for a `blocks`-block run starting at `block`
    pub(crate) fn handle_for(&self, block: usize, blocks: usize) -> SegmentHandle<T> {
        // SAFETY: block < block_count, so the offset stays inside the buffer.
        let ptr = unsafe { self.base.add(block * self.block_len) };
        SegmentHandle::new(self.base, ptr, self.run_len(block, blocks))
    }

    pub(crate) fn note_rent(&mut self, length: usize) {
        self.used += length;
        self.live += 1;
    }

    pub(crate) fn note_return(&mut self, length: usize) {
        debug_assert!(self.used >= length && self.live > 0);
        self.used -= length;
        self.live -= 1;
    }

    pub(crate) fn reset_counters(&mut self) {
        self.used = 0;
        self.live = 0;
    }
}

/// Registers a policy's pinned state as the owner of its buffer base
///
/// Rolls nothing back on conflict: the caller drops the state, whose
/// identity-checked deregistration leaves the live owner untouched.
pub(crate) fn register_allocator<A>(
    inner: &mut A,
    base_addr: usize,
    capacity: usize,
    element_size: usize,
) -> Result<()>
where
    A: ErasedSuballocator + 'static,
{
    let erased = inner as *mut A as *mut dyn ErasedSuballocator;
    // SAFETY: derived from a live reference, so never null.
    let erased = unsafe { NonNull::new_unchecked(erased) };
    SuballocatorRegistry::global().register(base_addr, erased, capacity, element_size)
}

/// Deregisters a policy's pinned state; called from its `Drop`
pub(crate) fn deregister_allocator<A>(inner: &A, base_addr: usize) {
    SuballocatorRegistry::global().deregister(base_addr, inner as *const A as *const ());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_validation() {
        assert!(BufferCore::<u32>::new_owned(0, 1).is_err());
        assert!(BufferCore::<u32>::new_owned(16, 0).is_err());
        assert!(BufferCore::<u32>::new_owned(4, 8).is_err());
        assert!(BufferCore::<()>::new_owned(4, 1).is_err());
    }

    #[test]
    fn test_core_geometry() {
        let core = BufferCore::<u32>::new_owned(100, 32).unwrap();
        assert_eq!(core.block_count(), 4);
        assert_eq!(core.blocks_for(1), 1);
        assert_eq!(core.blocks_for(33), 2);
        // Trailing partial block clamps to the buffer end.
        assert_eq!(core.run_len(0, 4), 100);
        assert_eq!(core.run_len(3, 1), 4);
    }

    #[test]
    fn test_block_index_roundtrip() {
        let core = BufferCore::<u16>::new_owned(64, 8).unwrap();
        let handle = core.handle_for(3, 2);
        assert_eq!(core.block_index_of(handle.as_ptr()).unwrap(), 3);
        assert_eq!(handle.offset(), 24);
        assert_eq!(handle.len(), 16);

        // Misaligned interior pointer is rejected.
        // SAFETY: stays inside the buffer.
        let inside = unsafe { core.base().add(25) };
        assert!(core.block_index_of(inside).is_err());
        // Out-of-range pointer is rejected.
        // SAFETY: one-past-the-end arithmetic only, never dereferenced.
        let past = unsafe { core.base().add(64) };
        assert!(core.block_index_of(past).is_err());
    }
}
