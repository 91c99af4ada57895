//! Sequential-fit suballocator (first-fit forward sweep)
//!
//! The run list is implicit: the index cell at block `i` holds the length of
//! the run starting there, and the next run starts at `i + length`. Renting
//! sweeps forward from a roving cursor, merging free neighbours as it goes;
//! returning is O(1) and leaves merging to the next sweep.

use std::iter;
use std::ptr::NonNull;

use tracing::{debug, trace};

use crate::SegmentHandle;
use crate::error::{Result, SuballocError};
use crate::index::BlockArray;
use crate::registry::ErasedSuballocator;
use crate::suballocator::{
    BufferCore, Suballocator, deregister_allocator, register_allocator,
};

/// One run-header cell: occupied flag plus 31-bit block count
///
/// Only cells at run starts are meaningful; a zero cell is "not a run start".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct IndexEntry(u32);

impl IndexEntry {
    const OCCUPIED: u32 = 1 << 31;
    /// Largest representable run, in blocks
    pub(crate) const MAX_BLOCKS: usize = (Self::OCCUPIED - 1) as usize;

    const EMPTY: Self = Self(0);

    fn free(blocks: usize) -> Self {
        debug_assert!(blocks > 0 && blocks <= Self::MAX_BLOCKS);
        Self(blocks as u32)
    }

    fn occupied(blocks: usize) -> Self {
        debug_assert!(blocks > 0 && blocks <= Self::MAX_BLOCKS);
        Self(blocks as u32 | Self::OCCUPIED)
    }

    #[inline]
    fn is_occupied(self) -> bool {
        self.0 & Self::OCCUPIED != 0
    }

    #[inline]
    fn blocks(self) -> usize {
        (self.0 & !Self::OCCUPIED) as usize
    }

    #[inline]
    fn is_run_start(self) -> bool {
        self.blocks() != 0
    }
}

struct SequentialInner<T> {
    core: BufferCore<T>,
    index: BlockArray<IndexEntry>,
    /// Roving cursor: block index of the most recent rental (locality bias)
    cursor: usize,
}

impl<T> SequentialInner<T> {
    fn init_index(&mut self) {
        self.index.reset();
        // One free run spanning the buffer, chunked at the 31-bit field limit.
        let mut offset = 0;
        let mut remaining = self.core.block_count();
        while remaining > 0 {
            let chunk = remaining.min(IndexEntry::MAX_BLOCKS);
            self.index.set(offset, IndexEntry::free(chunk));
            offset += chunk;
            remaining -= chunk;
        }
        self.cursor = 0;
    }

    fn try_rent(&mut self, length: usize) -> Result<SegmentHandle<T>> {
        if length == 0 {
            return Err(SuballocError::invalid_argument("length must be positive"));
        }
        let need = self.core.blocks_for(length);
        if need > self.core.block_count() || need > IndexEntry::MAX_BLOCKS {
            return Err(SuballocError::out_of_memory(length));
        }

        let start = self.cursor;
        let mut at = start;
        let mut wrapped = false;
        loop {
            if wrapped && at >= start {
                trace!(length, "sequential rent swept full ring without a fit");
                return Err(SuballocError::out_of_memory(length));
            }
            let entry = self.index.get(at);
            debug_assert!(entry.is_run_start());
            let mut blocks = entry.blocks();
            if !entry.is_occupied() {
                // Opportunistic merge with free successors, deferred from Return.
                while blocks < need {
                    let next = at + blocks;
                    if next >= self.core.block_count() {
                        break;
                    }
                    let next_entry = self.index.get(next);
                    if next_entry.is_occupied() {
                        break;
                    }
                    if blocks + next_entry.blocks() > IndexEntry::MAX_BLOCKS {
                        break;
                    }
                    self.index.set(next, IndexEntry::EMPTY);
                    // The absorbed run start may be the roving cursor.
                    if next == self.cursor {
                        self.cursor = at;
                    }
                    blocks += next_entry.blocks();
                    self.index.set(at, IndexEntry::free(blocks));
                }
                // A run ending in the trailing partial block can satisfy the
                // block count yet fall short in elements.
                if blocks >= need && self.core.run_len(at, need) >= length {
                    // Split the remainder first, then claim the head; this
                    // ordering keeps cursor placement deterministic across
                    // merge/split boundaries.
                    if blocks > need {
                        self.index.set(at + need, IndexEntry::free(blocks - need));
                    }
                    self.index.set(at, IndexEntry::occupied(need));
                    self.cursor = at;
                    let rented = self.core.run_len(at, need);
                    self.core.note_rent(rented);
                    trace!(block = at, blocks = need, rented, "sequential rent");
                    return Ok(self.core.handle_for(at, need));
                }
            }
            at += blocks;
            // A merge may have jumped the sweep origin; catch that before the
            // wrap below would reset `at` and mask it.
            if wrapped && at >= start {
                trace!(length, "sequential rent swept full ring without a fit");
                return Err(SuballocError::out_of_memory(length));
            }
            if at >= self.core.block_count() {
                at = 0;
                wrapped = true;
            }
        }
    }

    fn return_ptr(&mut self, ptr: NonNull<T>) -> Result<usize> {
        let block = self.core.block_index_of(ptr)?;
        let entry = self.index.get(block);
        if !entry.is_run_start() {
            return Err(SuballocError::unknown_segment(ptr.as_ptr()));
        }
        if !entry.is_occupied() {
            return Err(SuballocError::double_free(ptr.as_ptr()));
        }
        // Merging is deferred to the next rent sweep.
        self.index.set(block, IndexEntry::free(entry.blocks()));
        let reclaimed = self.core.run_len(block, entry.blocks());
        self.core.note_return(reclaimed);
        trace!(block, reclaimed, "sequential return");
        Ok(reclaimed)
    }

    fn segment_length(&self, ptr: NonNull<T>) -> Result<usize> {
        let block = self.core.block_index_of(ptr)?;
        let entry = self.index.get(block);
        if !entry.is_run_start() || !entry.is_occupied() {
            return Err(SuballocError::unknown_segment(ptr.as_ptr()));
        }
        Ok(self.core.run_len(block, entry.blocks()))
    }

    fn clear(&mut self) {
        self.init_index();
        self.core.reset_counters();
        debug!(capacity = self.core.capacity(), "sequential allocator cleared");
    }

    fn segments(&self) -> impl Iterator<Item = SegmentHandle<T>> + '_ {
        let mut at = 0;
        iter::from_fn(move || {
            while at < self.core.block_count() {
                let entry = self.index.get(at);
                debug_assert!(entry.is_run_start());
                let run = at;
                at += entry.blocks();
                if entry.is_occupied() {
                    return Some(self.core.handle_for(run, entry.blocks()));
                }
            }
            None
        })
    }
}

impl<T> ErasedSuballocator for SequentialInner<T> {
    fn return_addr(&mut self, addr: usize) -> Result<usize> {
        let ptr = NonNull::new(addr as *mut T)
            .ok_or(SuballocError::UnknownSegment { addr })?;
        self.return_ptr(ptr)
    }

    fn segment_length_addr(&self, addr: usize) -> Result<usize> {
        let ptr = NonNull::new(addr as *mut T)
            .ok_or(SuballocError::UnknownSegment { addr })?;
        self.segment_length(ptr)
    }
}

impl<T> Drop for SequentialInner<T> {
    fn drop(&mut self) {
        deregister_allocator(self, self.core.base_addr());
    }
}

/// First-fit forward-sweep suballocator with a roving cursor
///
/// The cheapest policy: O(1) returns, amortised O(runs traversed) rents, and
/// a locality bias that keeps consecutive rentals adjacent.
pub struct SequentialFitSuballocator<T: 'static> {
    inner: Box<SequentialInner<T>>,
}

impl<T: Copy + Default + 'static> SequentialFitSuballocator<T> {
    /// Creates an allocator over an internally allocated, pinned buffer
    pub fn new(capacity: usize, block_len: usize) -> Result<Self> {
        Self::from_core(BufferCore::new_owned(capacity, block_len)?)
    }
}

impl<T: 'static> SequentialFitSuballocator<T> {
    /// Creates an allocator over a caller-supplied buffer
    ///
    /// # Safety
    ///
    /// `base` must point to `capacity` valid elements that outlive the
    /// allocator, and the caller must not touch the region for its lifetime.
    pub unsafe fn with_buffer(
        base: NonNull<T>,
        capacity: usize,
        block_len: usize,
    ) -> Result<Self> {
        // SAFETY: forwarded caller contract.
        Self::from_core(unsafe { BufferCore::new_external(base, capacity, block_len)? })
    }

    fn from_core(core: BufferCore<T>) -> Result<Self> {
        let block_count = core.block_count();
        let mut inner = Box::new(SequentialInner {
            core,
            index: BlockArray::new(block_count),
            cursor: 0,
        });
        inner.init_index();
        let (base_addr, capacity) = (inner.core.base_addr(), inner.core.capacity());
        register_allocator(&mut *inner, base_addr, capacity, size_of::<T>())?;
        debug!(
            capacity = inner.core.capacity(),
            block_len = inner.core.block_len(),
            "sequential allocator created"
        );
        Ok(Self { inner })
    }
}

impl<T: 'static> Suballocator<T> for SequentialFitSuballocator<T> {
    fn try_rent(&mut self, length: usize) -> Result<SegmentHandle<T>> {
        self.inner.try_rent(length)
    }

    fn return_ptr(&mut self, ptr: NonNull<T>) -> Result<usize> {
        self.inner.return_ptr(ptr)
    }

    fn segment_length(&self, ptr: NonNull<T>) -> Result<usize> {
        self.inner.segment_length(ptr)
    }

    fn clear(&mut self) {
        self.inner.clear();
    }

    fn capacity_length(&self) -> usize {
        self.inner.core.capacity()
    }

    fn used_length(&self) -> usize {
        self.inner.core.used()
    }

    fn allocations(&self) -> usize {
        self.inner.core.live()
    }

    fn block_length(&self) -> usize {
        self.inner.core.block_len()
    }

    fn buffer_ptr(&self) -> NonNull<T> {
        self.inner.core.base()
    }

    fn segments(&self) -> Box<dyn Iterator<Item = SegmentHandle<T>> + '_> {
        Box::new(self.inner.segments())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rent_rounds_to_blocks() {
        let mut alloc = SequentialFitSuballocator::<u32>::new(64, 8).unwrap();
        let seg = alloc.try_rent(1).unwrap();
        assert_eq!(seg.len(), 8);
        assert_eq!(alloc.used_length(), 8);
        assert_eq!(alloc.free_length(), 56);
        assert_eq!(alloc.allocations(), 1);
    }

    #[test]
    fn test_rent_zero_is_invalid() {
        let mut alloc = SequentialFitSuballocator::<u8>::new(16, 1).unwrap();
        assert!(matches!(
            alloc.try_rent(0),
            Err(SuballocError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn test_exhaustion_is_soft() {
        let mut alloc = SequentialFitSuballocator::<u8>::new(16, 1).unwrap();
        let _ = alloc.try_rent(16).unwrap();
        let err = alloc.try_rent(1).unwrap_err();
        assert!(err.is_out_of_memory());
        // State unchanged by the failed rent.
        assert_eq!(alloc.used_length(), 16);
        assert_eq!(alloc.allocations(), 1);
    }

    #[test]
    fn test_return_and_reuse_after_merge() {
        let mut alloc = SequentialFitSuballocator::<u8>::new(100, 1).unwrap();
        let a = alloc.try_rent(40).unwrap();
        let b = alloc.try_rent(40).unwrap();
        let _c = alloc.try_rent(20).unwrap();
        assert_eq!(alloc.free_length(), 0);

        alloc.return_segment(a).unwrap();
        alloc.return_segment(b).unwrap();
        // The two freed runs merge during the next sweep.
        let big = alloc.try_rent(80).unwrap();
        assert_eq!(big.len(), 80);
        assert_eq!(big.offset(), 0);
    }

    #[test]
    fn test_double_free_and_unknown_segment() {
        let mut alloc = SequentialFitSuballocator::<u8>::new(32, 4).unwrap();
        let seg = alloc.try_rent(8).unwrap();
        let ptr = seg.as_ptr();
        assert_eq!(alloc.return_ptr(ptr).unwrap(), 8);
        assert!(matches!(
            alloc.return_ptr(ptr),
            Err(SuballocError::DoubleFree { .. })
        ));
        // A block-aligned address that never started a segment.
        // SAFETY: stays inside the buffer.
        let interior = unsafe { alloc.buffer_ptr().add(4) };
        assert!(matches!(
            alloc.return_ptr(interior),
            Err(SuballocError::UnknownSegment { .. })
        ));
    }

    #[test]
    fn test_cursor_bias_keeps_rentals_adjacent() {
        let mut alloc = SequentialFitSuballocator::<u8>::new(64, 1).unwrap();
        let a = alloc.try_rent(8).unwrap();
        let b = alloc.try_rent(8).unwrap();
        assert_eq!(b.offset(), a.offset() + 8);
        // Returning an early segment does not move later rentals back while
        // the cursor still points past it.
        alloc.return_segment(a).unwrap();
        let c = alloc.try_rent(8).unwrap();
        assert_eq!(c.offset(), 16);
    }

    #[test]
    fn test_wrap_around_finds_freed_prefix() {
        let mut alloc = SequentialFitSuballocator::<u8>::new(32, 1).unwrap();
        let a = alloc.try_rent(16).unwrap();
        let _b = alloc.try_rent(16).unwrap();
        alloc.return_segment(a).unwrap();
        // Cursor sits at the tail; the sweep must wrap to find the prefix.
        let c = alloc.try_rent(10).unwrap();
        assert_eq!(c.offset(), 0);
    }

    #[test]
    fn test_failed_rent_merging_past_origin_terminates() {
        let mut alloc = SequentialFitSuballocator::<u8>::new(16, 1).unwrap();
        let _a = alloc.try_rent(4).unwrap();
        let _b = alloc.try_rent(4).unwrap();
        let c = alloc.try_rent(4).unwrap();
        let d = alloc.try_rent(4).unwrap();
        // Free the cursor run and its predecessor, so the sweep's merge
        // absorbs the origin run from below.
        alloc.return_segment(d).unwrap();
        alloc.return_segment(c).unwrap();
        assert!(alloc.try_rent(9).unwrap_err().is_out_of_memory());
        // The cursor survived the merge and the freed tail is still rentable.
        let e = alloc.try_rent(8).unwrap();
        assert_eq!(e.offset(), 8);
    }

    #[test]
    fn test_segments_enumerates_in_address_order() {
        let mut alloc = SequentialFitSuballocator::<u8>::new(64, 1).unwrap();
        let a = alloc.try_rent(8).unwrap();
        let b = alloc.try_rent(8).unwrap();
        let c = alloc.try_rent(8).unwrap();
        alloc.return_segment(b).unwrap();
        let offsets: Vec<usize> = alloc.segments().map(|s| s.offset()).collect();
        assert_eq!(offsets, vec![a.offset(), c.offset()]);
    }

    #[test]
    fn test_clear_is_idempotent() {
        let mut alloc = SequentialFitSuballocator::<u8>::new(48, 2).unwrap();
        let _ = alloc.try_rent(10).unwrap();
        alloc.clear();
        assert_eq!(alloc.used_length(), 0);
        assert_eq!(alloc.allocations(), 0);
        alloc.clear();
        assert_eq!(alloc.used_length(), 0);
        let seg = alloc.try_rent(48).unwrap();
        assert_eq!(seg.len(), 48);
    }

    #[test]
    fn test_segment_length_queries() {
        let mut alloc = SequentialFitSuballocator::<u16>::new(40, 5).unwrap();
        let seg = alloc.try_rent(7).unwrap();
        assert_eq!(alloc.segment_length(seg.as_ptr()).unwrap(), 10);
        alloc.return_segment(seg).unwrap();
        assert!(alloc.segment_length(seg.as_ptr()).is_err());
    }
}
