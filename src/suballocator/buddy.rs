//! Buddy suballocator (power-of-two splitting and merging)
//!
//! Block runs carry a power-of-two order; each order has a doubly linked free
//! list threaded through the header table as block indices (`u32::MAX` =
//! NONE), with a one-word bit set summarising which orders are non-empty.
//! A non-power-of-two block count is seeded as its binary decomposition,
//! largest chunk first, so every chunk is naturally aligned to its own size
//! and the whole buffer is rentable without rounding the capacity.

use std::iter;
use std::ptr::NonNull;

use tracing::{debug, trace};

use crate::SegmentHandle;
use crate::error::{Result, SuballocError};
use crate::index::{BitSet, BlockArray};
use crate::registry::ErasedSuballocator;
use crate::suballocator::{
    BufferCore, Suballocator, deregister_allocator, register_allocator,
};
use crate::utils::{ceil_log2, next_power_of_two};

/// NONE sentinel for free-list links
const NONE: u32 = u32::MAX;

/// Largest supported block count (indices must fit the 31-bit contract)
const MAX_BLOCK_COUNT: usize = 1 << 31;

const VALID: u8 = 1 << 0;
const OCCUPIED: u8 = 1 << 1;

/// Header of a block run
///
/// Only run starts are valid; split and merge keep interior headers invalid so
/// a stale pointer can never pass for a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct BuddyHeader {
    flags: u8,
    /// Base-2 log of the run's block count
    order: u8,
    prev_free: u32,
    next_free: u32,
}

impl Default for BuddyHeader {
    fn default() -> Self {
        Self {
            flags: 0,
            order: 0,
            prev_free: NONE,
            next_free: NONE,
        }
    }
}

impl BuddyHeader {
    #[inline]
    fn is_valid(self) -> bool {
        self.flags & VALID != 0
    }

    #[inline]
    fn is_occupied(self) -> bool {
        self.flags & OCCUPIED != 0
    }
}

struct BuddyInner<T> {
    core: BufferCore<T>,
    headers: BlockArray<BuddyHeader>,
    /// Head block index of the free list per order, NONE when empty
    free_heads: Vec<u32>,
    /// Bit `k` set ⇔ order-`k` free list is non-empty
    order_summary: BitSet,
    max_order: u32,
}

impl<T> BuddyInner<T> {
    fn init_index(&mut self) {
        self.headers.reset();
        self.free_heads.fill(NONE);
        self.order_summary.reset();
        // Binary decomposition of the block count, largest chunk at offset 0.
        // Each chunk lands on an offset that is a multiple of its own size, so
        // XOR buddy arithmetic stays closed within the chunks.
        let block_count = self.core.block_count();
        let mut offset = 0u32;
        for order in (0..=self.max_order).rev() {
            if block_count & (1usize << order) != 0 {
                self.push_free(offset, order);
                offset += 1u32 << order;
            }
        }
    }

    fn push_free(&mut self, block: u32, order: u32) {
        let head = self.free_heads[order as usize];
        self.headers.set(
            block as usize,
            BuddyHeader {
                flags: VALID,
                order: order as u8,
                prev_free: NONE,
                next_free: head,
            },
        );
        if head != NONE {
            let mut header = self.headers.get(head as usize);
            header.prev_free = block;
            self.headers.set(head as usize, header);
        }
        self.free_heads[order as usize] = block;
        self.order_summary.set(order as usize);
    }

    /// Detaches `block` from its order's free list; its header is left for
    /// the caller to rewrite
    fn unlink_free(&mut self, block: u32) {
        let header = self.headers.get(block as usize);
        debug_assert!(header.is_valid() && !header.is_occupied());
        let order = header.order as usize;
        if header.prev_free == NONE {
            self.free_heads[order] = header.next_free;
            if header.next_free == NONE {
                self.order_summary.clear(order);
            }
        } else {
            let mut prev = self.headers.get(header.prev_free as usize);
            prev.next_free = header.next_free;
            self.headers.set(header.prev_free as usize, prev);
        }
        if header.next_free != NONE {
            let mut next = self.headers.get(header.next_free as usize);
            next.prev_free = header.prev_free;
            self.headers.set(header.next_free as usize, next);
        }
    }

    fn try_rent(&mut self, length: usize) -> Result<SegmentHandle<T>> {
        if length == 0 {
            return Err(SuballocError::invalid_argument("length must be positive"));
        }
        let blocks = self.core.blocks_for(length);
        if blocks > self.core.block_count() {
            return Err(SuballocError::out_of_memory(length));
        }
        let need_blocks = next_power_of_two(blocks);
        let need_order = ceil_log2(need_blocks);

        // Lowest-order candidate whose span also satisfies the element count:
        // at most one block per order (the one reaching the trailing partial
        // block) can fall short, so walk past it.
        let mut candidate = None;
        let mut scan_from = need_order as usize;
        while let Some(order) = self.order_summary.lowest_set_at_or_above(scan_from) {
            let mut node = self.free_heads[order];
            while node != NONE {
                if self.core.run_len(node as usize, need_blocks) >= length {
                    candidate = Some(node);
                    break;
                }
                node = self.headers.get(node as usize).next_free;
            }
            if candidate.is_some() {
                break;
            }
            scan_from = order + 1;
        }
        let Some(at) = candidate else {
            trace!(length, need_order, "buddy rent found no free order");
            return Err(SuballocError::out_of_memory(length));
        };
        let pick = self.headers.get(at as usize).order as usize;
        self.unlink_free(at);

        // Halve down to the needed order; the lower half stays the candidate
        // and the upper half becomes the free buddy.
        let mut order = pick as u32;
        while order > need_order {
            order -= 1;
            self.push_free(at + (1u32 << order), order);
        }

        self.headers.set(
            at as usize,
            BuddyHeader {
                flags: VALID | OCCUPIED,
                order: need_order as u8,
                prev_free: NONE,
                next_free: NONE,
            },
        );
        let rented = self.core.run_len(at as usize, need_blocks);
        self.core.note_rent(rented);
        trace!(block = at, order = need_order, rented, "buddy rent");
        Ok(self.core.handle_for(at as usize, need_blocks))
    }

    fn return_ptr(&mut self, ptr: NonNull<T>) -> Result<usize> {
        let block = self.core.block_index_of(ptr)?;
        let header = self.headers.get(block);
        if !header.is_valid() {
            return Err(SuballocError::unknown_segment(ptr.as_ptr()));
        }
        if !header.is_occupied() {
            return Err(SuballocError::double_free(ptr.as_ptr()));
        }

        let mut order = header.order as u32;
        let reclaimed = self.core.run_len(block, 1usize << order);
        // Invalidate while coalescing; the surviving index gets a fresh
        // header from push_free.
        self.headers.set(block, BuddyHeader::default());

        let mut at = block as u32;
        while order < self.max_order {
            let buddy = at ^ (1u32 << order);
            if buddy as usize >= self.core.block_count() {
                break;
            }
            let buddy_header = self.headers.get(buddy as usize);
            if !buddy_header.is_valid()
                || buddy_header.is_occupied()
                || buddy_header.order as u32 != order
            {
                break;
            }
            self.unlink_free(buddy);
            self.headers.set(buddy as usize, BuddyHeader::default());
            // The lower index survives the merge.
            at = at.min(buddy);
            order += 1;
        }
        self.push_free(at, order);
        self.core.note_return(reclaimed);
        trace!(block, reclaimed, merged_order = order, "buddy return");
        Ok(reclaimed)
    }

    fn segment_length(&self, ptr: NonNull<T>) -> Result<usize> {
        let block = self.core.block_index_of(ptr)?;
        let header = self.headers.get(block);
        if !header.is_valid() || !header.is_occupied() {
            return Err(SuballocError::unknown_segment(ptr.as_ptr()));
        }
        Ok(self.core.run_len(block, 1usize << header.order))
    }

    fn clear(&mut self) {
        self.init_index();
        self.core.reset_counters();
        debug!(capacity = self.core.capacity(), "buddy allocator cleared");
    }

    fn segments(&self) -> impl Iterator<Item = SegmentHandle<T>> + '_ {
        let mut at = 0;
        iter::from_fn(move || {
            while at < self.core.block_count() {
                let header = self.headers.get(at);
                debug_assert!(header.is_valid());
                let run = at;
                let blocks = 1usize << header.order;
                at += blocks;
                if header.is_occupied() {
                    return Some(self.core.handle_for(run, blocks));
                }
            }
            None
        })
    }

    /// Free-list/summary consistency: every head's order matches its header,
    /// and summary bit `k` is set exactly when the order-`k` list is non-empty
    #[cfg(test)]
    fn free_lists_consistent(&self) -> bool {
        (0..=self.max_order as usize).all(|order| {
            let head = self.free_heads[order];
            if self.order_summary.get(order) != (head != NONE) {
                return false;
            }
            let mut at = head;
            let mut prev = NONE;
            while at != NONE {
                let header = self.headers.get(at as usize);
                if !header.is_valid()
                    || header.is_occupied()
                    || header.order as usize != order
                    || header.prev_free != prev
                {
                    return false;
                }
                prev = at;
                at = header.next_free;
            }
            true
        })
    }
}

impl<T> ErasedSuballocator for BuddyInner<T> {
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

impl<T> Drop for BuddyInner<T> {
    fn drop(&mut self) {
        deregister_allocator(self, self.core.base_addr());
    }
}

/// Power-of-two buddy suballocator with per-order free lists
///
/// Rents and returns in O(log n): rentals round up to a power of two of
/// blocks, splits take the lower half, and returns coalesce with the XOR
/// buddy while it is free and of equal order.
pub struct BuddySuballocator<T: 'static> {
    inner: Box<BuddyInner<T>>,
}

impl<T: Copy + Default + 'static> BuddySuballocator<T> {
    /// Creates an allocator over an internally allocated, pinned buffer
    pub fn new(capacity: usize, block_len: usize) -> Result<Self> {
        Self::from_core(BufferCore::new_owned(capacity, block_len)?)
    }
}

impl<T: 'static> BuddySuballocator<T> {
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
        if block_count > MAX_BLOCK_COUNT {
            return Err(SuballocError::invalid_argument(
                "block count exceeds the 2^31 ceiling",
            ));
        }
        let max_order = ceil_log2(block_count);
        let mut inner = Box::new(BuddyInner {
            core,
            headers: BlockArray::new(block_count),
            free_heads: vec![NONE; max_order as usize + 1],
            order_summary: BitSet::new(max_order as usize + 1),
            max_order,
        });
        inner.init_index();
        let (base_addr, capacity) = (inner.core.base_addr(), inner.core.capacity());
        register_allocator(&mut *inner, base_addr, capacity, size_of::<T>())?;
        debug!(
            capacity = inner.core.capacity(),
            block_len = inner.core.block_len(),
            max_order = inner.max_order,
            "buddy allocator created"
        );
        Ok(Self { inner })
    }

    /// Minimum buffer length that never needs defragmentation for `max_count`
    /// simultaneously live items
    ///
    /// The Cholleti bound for binary buddy systems:
    /// `ceil(max_count * (floor(log2 max_count) + 1) / 2)`.
    pub fn min_buffer_length(max_count: usize) -> usize {
        if max_count == 0 {
            return 0;
        }
        let floor_log2 = (usize::BITS - 1 - max_count.leading_zeros()) as usize;
        (max_count * (floor_log2 + 1)).div_ceil(2)
    }
}

impl<T: 'static> Suballocator<T> for BuddySuballocator<T> {
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
