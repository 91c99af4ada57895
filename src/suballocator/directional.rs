//! Directional-fit suballocator (bidirectional sweep)
//!
//! Runs form a bidirectional list: each header packs the occupied flag with a
//! 31-bit block count and carries the preceding run's count, so the sweep can
//! walk either way. A signed balance approximates where the free blocks are
//! relative to the roving cursor, and a pluggable strategy turns that plus the
//! cursor position into a search direction.

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

/// Chooses the sweep direction for the next rental
///
/// Inputs are normalised: `free_balance` in `[-1, 1]` (positive = more free
/// blocks ahead of the cursor), `head_offset` in `[-1, 1]` (cursor position
/// relative to the buffer centre), `prev_direction` in `{-1.0, 1.0}`.
/// Returns `true` to search forward.
pub trait DirectionStrategy {
    fn choose(&self, free_balance: f64, head_offset: f64, prev_direction: f64) -> bool;
}

impl<F> DirectionStrategy for F
where
    F: Fn(f64, f64, f64) -> bool,
{
    fn choose(&self, free_balance: f64, head_offset: f64, prev_direction: f64) -> bool {
        self(free_balance, head_offset, prev_direction)
    }
}

/// Stateless default strategy
///
/// Follows the free-block balance with a mild bias towards keeping the
/// previous direction; the cursor position carries no weight.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultDirectionStrategy;

impl DefaultDirectionStrategy {
    const BALANCE_WEIGHT: f64 = 1.0;
    const OFFSET_WEIGHT: f64 = 0.0;
    const PREV_WEIGHT: f64 = 0.3;
}

impl DirectionStrategy for DefaultDirectionStrategy {
    fn choose(&self, free_balance: f64, head_offset: f64, prev_direction: f64) -> bool {
        free_balance * Self::BALANCE_WEIGHT
            + head_offset * Self::OFFSET_WEIGHT
            + prev_direction * Self::PREV_WEIGHT
            >= 0.0
    }
}

/// One run header: occupied flag + 31-bit count, plus the preceding run's
/// count for backward traversal
///
/// Invariant: for every run start `i`, the successor header at
/// `i + blocks(i)` stores `prev == blocks(i)`. The first run stores 0.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct DirEntry {
    tag: u32,
    prev: u32,
}

impl DirEntry {
    const OCCUPIED: u32 = 1 << 31;
    /// Largest representable run, in blocks
    const MAX_BLOCKS: usize = (Self::OCCUPIED - 1) as usize;

    const EMPTY: Self = Self { tag: 0, prev: 0 };

    fn free(blocks: usize, prev: usize) -> Self {
        debug_assert!(blocks > 0 && blocks <= Self::MAX_BLOCKS && prev <= Self::MAX_BLOCKS);
        Self {
            tag: blocks as u32,
            prev: prev as u32,
        }
    }

    fn occupied(blocks: usize, prev: usize) -> Self {
        debug_assert!(blocks > 0 && blocks <= Self::MAX_BLOCKS && prev <= Self::MAX_BLOCKS);
        Self {
            tag: blocks as u32 | Self::OCCUPIED,
            prev: prev as u32,
        }
    }

    #[inline]
    fn is_occupied(self) -> bool {
        self.tag & Self::OCCUPIED != 0
    }

    #[inline]
    fn blocks(self) -> usize {
        (self.tag & !Self::OCCUPIED) as usize
    }

    #[inline]
    fn prev_blocks(self) -> usize {
        self.prev as usize
    }

    #[inline]
    fn is_run_start(self) -> bool {
        self.blocks() != 0
    }
}

struct DirectionalInner<T> {
    core: BufferCore<T>,
    index: BlockArray<DirEntry>,
    /// Roving cursor; always a run start
    cursor: usize,
    /// Free blocks at `index >= cursor` minus free blocks below it
    balance: i64,
    /// Total free blocks, for balance normalisation
    free_blocks: usize,
    prev_forward: bool,
    strategy: Box<dyn DirectionStrategy>,
}

impl<T> DirectionalInner<T> {
    fn init_index(&mut self) {
        self.index.reset();
        // One free run spanning the buffer, chunked at the 31-bit field limit
        // with prev links threaded through.
        let mut offset = 0;
        let mut prev = 0;
        let mut remaining = self.core.block_count();
        while remaining > 0 {
            let chunk = remaining.min(DirEntry::MAX_BLOCKS);
            self.index.set(offset, DirEntry::free(chunk, prev));
            offset += chunk;
            prev = chunk;
            remaining -= chunk;
        }
        self.cursor = 0;
        self.balance = self.core.block_count() as i64;
        self.free_blocks = self.core.block_count();
        self.prev_forward = true;
    }

    fn choose_direction(&self) -> bool {
        let free_balance = if self.free_blocks == 0 {
            0.0
        } else {
            self.balance as f64 / self.free_blocks as f64
        };
        let centre = self.core.block_count() as f64 / 2.0;
        let head_offset = (self.cursor as f64 - centre) / centre;
        let prev_direction = if self.prev_forward { 1.0 } else { -1.0 };
        self.strategy
            .choose(free_balance, head_offset, prev_direction)
    }

    fn try_rent(&mut self, length: usize) -> Result<SegmentHandle<T>> {
        if length == 0 {
            return Err(SuballocError::invalid_argument("length must be positive"));
        }
        let need = self.core.blocks_for(length);
        if need > self.core.block_count() || need > DirEntry::MAX_BLOCKS {
            return Err(SuballocError::out_of_memory(length));
        }

        let snapshot = (self.cursor, self.balance);
        let mut forward = self.choose_direction();
        let mut at = self.cursor;
        let mut bal = self.balance;
        let mut turnarounds = 0;
        loop {
            let entry = self.index.get(at);
            debug_assert!(entry.is_run_start());
            if !entry.is_occupied() && entry.blocks() >= need {
                // The claimed span depends on the travel direction; a span
                // ending in the trailing partial block can satisfy the block
                // count yet fall short in elements.
                let claim_at = if forward {
                    at
                } else {
                    at + entry.blocks() - need
                };
                if self.core.run_len(claim_at, need) >= length {
                    return Ok(self.commit_rent(at, need, bal, forward));
                }
                if !forward && self.core.run_len(at, need) >= length {
                    // Only the run's tail is short; claim its head instead.
                    return Ok(self.commit_rent(at, need, bal, true));
                }
            }

            let advanced = if forward {
                let next = at + entry.blocks();
                if next < self.core.block_count() {
                    // The crossed run moves behind the reference point.
                    if !entry.is_occupied() {
                        bal -= 2 * entry.blocks() as i64;
                    }
                    at = next;
                    true
                } else {
                    false
                }
            } else {
                let prev = entry.prev_blocks();
                if prev != 0 {
                    at -= prev;
                    let prev_entry = self.index.get(at);
                    debug_assert_eq!(prev_entry.blocks(), prev);
                    // The crossed run moves ahead of the reference point.
                    if !prev_entry.is_occupied() {
                        bal += 2 * prev_entry.blocks() as i64;
                    }
                    true
                } else {
                    false
                }
            };

            if !advanced {
                turnarounds += 1;
                if turnarounds == 2 {
                    trace!(length, "directional rent failed after two turnarounds");
                    return Err(SuballocError::out_of_memory(length));
                }
                forward = !forward;
                (at, bal) = snapshot;
            }
        }
    }

    /// Carves `need` blocks out of the free run at `at` and reseats the cursor
    ///
    /// `bal` is the balance relative to `at`; it is adjusted for the claimed
    /// blocks and for whatever run the cursor finally lands on.
    fn commit_rent(
        &mut self,
        at: usize,
        need: usize,
        mut bal: i64,
        forward: bool,
    ) -> SegmentHandle<T> {
        let entry = self.index.get(at);
        let blocks = entry.blocks();
        let succ = at + blocks;

        let alloc_at = if forward {
            if blocks > need {
                // Low half occupied, trailing free run records the new prev.
                self.index.set(at + need, DirEntry::free(blocks - need, need));
                if succ < self.core.block_count() {
                    let mut s = self.index.get(succ);
                    s.prev = (blocks - need) as u32;
                    self.index.set(succ, s);
                }
            }
            self.index
                .set(at, DirEntry::occupied(need, entry.prev_blocks()));
            at
        } else {
            // Trailing portion occupied, leading free run keeps its prev.
            let alloc_at = at + (blocks - need);
            if blocks > need {
                self.index
                    .set(at, DirEntry::free(blocks - need, entry.prev_blocks()));
                self.index
                    .set(alloc_at, DirEntry::occupied(need, blocks - need));
            } else {
                self.index
                    .set(at, DirEntry::occupied(need, entry.prev_blocks()));
            }
            if succ < self.core.block_count() {
                let mut s = self.index.get(succ);
                s.prev = need as u32;
                self.index.set(succ, s);
            }
            alloc_at
        };

        // The claimed blocks leave the free population ahead of `at`.
        bal -= need as i64;
        self.free_blocks -= need;

        // Advance one more step so the cursor lands on the next run.
        let cursor = if forward {
            if at + need < self.core.block_count() {
                at + need
            } else {
                at
            }
        } else if blocks > need {
            at
        } else if entry.prev_blocks() != 0 {
            let prev_at = at - entry.prev_blocks();
            let prev_entry = self.index.get(prev_at);
            if !prev_entry.is_occupied() {
                bal += 2 * prev_entry.blocks() as i64;
            }
            prev_at
        } else {
            at
        };

        self.cursor = cursor;
        self.balance = bal;
        self.prev_forward = forward;

        let rented = self.core.run_len(alloc_at, need);
        self.core.note_rent(rented);
        trace!(block = alloc_at, blocks = need, forward, "directional rent");
        self.core.handle_for(alloc_at, need)
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

        let count = entry.blocks();
        let reclaimed = self.core.run_len(block, count);
        if block >= self.cursor {
            self.balance += count as i64;
        } else {
            self.balance -= count as i64;
        }
        self.free_blocks += count;
        self.index
            .set(block, DirEntry::free(count, entry.prev_blocks()));

        // Merge with free neighbours in both directions, saturating at the
        // 31-bit count field.
        let mut start = block;
        let mut total = count;
        let mut start_prev = entry.prev_blocks();
        loop {
            let succ = start + total;
            if succ >= self.core.block_count() {
                break;
            }
            let succ_entry = self.index.get(succ);
            if succ_entry.is_occupied() || total + succ_entry.blocks() > DirEntry::MAX_BLOCKS {
                break;
            }
            self.index.set(succ, DirEntry::EMPTY);
            total += succ_entry.blocks();
        }
        while start_prev != 0 {
            let prev_at = start - start_prev;
            let prev_entry = self.index.get(prev_at);
            debug_assert_eq!(prev_entry.blocks(), start_prev);
            if prev_entry.is_occupied() || total + prev_entry.blocks() > DirEntry::MAX_BLOCKS {
                break;
            }
            self.index.set(start, DirEntry::EMPTY);
            start = prev_at;
            total += prev_entry.blocks();
            start_prev = prev_entry.prev_blocks();
        }
        self.index.set(start, DirEntry::free(total, start_prev));
        let succ = start + total;
        if succ < self.core.block_count() {
            let mut s = self.index.get(succ);
            s.prev = total as u32;
            self.index.set(succ, s);
        }

        // A merge that swallowed the cursor snaps it to the run start; the
        // free blocks between start and the old cursor flip sides.
        if self.cursor > start && self.cursor < start + total {
            self.balance += ((self.cursor - start) as i64) << 1;
            self.cursor = start;
        }

        self.core.note_return(reclaimed);
        trace!(block, reclaimed, "directional return");
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
        debug!(
            capacity = self.core.capacity(),
            "directional allocator cleared"
        );
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

    /// Full structural check: run list closes, prev links match, cursor is a
    /// run start, and balance/free counters equal their recomputed values
    #[cfg(test)]
    fn consistent(&self) -> bool {
        let mut at = 0;
        let mut prev = 0;
        let mut balance = 0i64;
        let mut free = 0usize;
        let mut cursor_seen = false;
        while at < self.core.block_count() {
            let entry = self.index.get(at);
            if !entry.is_run_start() || entry.prev_blocks() != prev {
                return false;
            }
            if at == self.cursor {
                cursor_seen = true;
            }
            if !entry.is_occupied() {
                free += entry.blocks();
                if at >= self.cursor {
                    balance += entry.blocks() as i64;
                } else {
                    balance -= entry.blocks() as i64;
                }
            }
            prev = entry.blocks();
            at += entry.blocks();
        }
        at == self.core.block_count()
            && cursor_seen
            && balance == self.balance
            && free == self.free_blocks
    }
}

impl<T> ErasedSuballocator for DirectionalInner<T> {
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

impl<T> Drop for DirectionalInner<T> {
    fn drop(&mut self) {
        deregister_allocator(self, self.core.base_addr());
    }
}

/// Bidirectional-sweep suballocator with a pluggable direction strategy
///
/// Sweeps from the cursor in whichever direction the strategy picks, turning
/// around at the buffer ends; two turnarounds without a fit is out-of-memory.
pub struct DirectionalFitSuballocator<T: 'static> {
    inner: Box<DirectionalInner<T>>,
}

impl<T: Copy + Default + 'static> DirectionalFitSuballocator<T> {
    /// Creates an allocator with the default direction strategy
    pub fn new(capacity: usize, block_len: usize) -> Result<Self> {
        Self::with_strategy(capacity, block_len, DefaultDirectionStrategy)
    }

    /// Creates an allocator with a custom direction strategy
    pub fn with_strategy(
        capacity: usize,
        block_len: usize,
        strategy: impl DirectionStrategy + 'static,
    ) -> Result<Self> {
        Self::from_core(BufferCore::new_owned(capacity, block_len)?, Box::new(strategy))
    }
}

impl<T: 'static> DirectionalFitSuballocator<T> {
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
        let core = unsafe { BufferCore::new_external(base, capacity, block_len)? };
        Self::from_core(core, Box::new(DefaultDirectionStrategy))
    }

    fn from_core(core: BufferCore<T>, strategy: Box<dyn DirectionStrategy>) -> Result<Self> {
        let block_count = core.block_count();
        let mut inner = Box::new(DirectionalInner {
            core,
            index: BlockArray::new(block_count),
            cursor: 0,
            balance: 0,
            free_blocks: 0,
            prev_forward: true,
            strategy,
        });
        inner.init_index();
        let (base_addr, capacity) = (inner.core.base_addr(), inner.core.capacity());
        register_allocator(&mut *inner, base_addr, capacity, size_of::<T>())?;
        debug!(
            capacity = inner.core.capacity(),
            block_len = inner.core.block_len(),
            "directional allocator created"
        );
        Ok(Self { inner })
    }
}

impl<T: 'static> Suballocator<T> for DirectionalFitSuballocator<T> {
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

    fn forward_only() -> impl DirectionStrategy {
        |_: f64, _: f64, _: f64| true
    }

    fn backward_only() -> impl DirectionStrategy {
        |_: f64, _: f64, _: f64| false
    }

    #[test]
    fn test_default_strategy_weights() {
        let strategy = DefaultDirectionStrategy;
        // Balance dominates.
        assert!(!strategy.choose(-1.0, 0.0, 1.0));
        assert!(strategy.choose(1.0, 0.0, -1.0));
        // Previous direction tips a dead-even balance.
        assert!(strategy.choose(0.0, 0.0, 1.0));
        assert!(!strategy.choose(0.0, 0.0, -1.0));
        // Head offset carries no weight.
        assert!(strategy.choose(0.0, -1.0, 1.0));
    }

    #[test]
    fn test_forward_rent_splits_low_half() {
        let mut alloc =
            DirectionalFitSuballocator::<u8>::with_strategy(64, 1, forward_only()).unwrap();
        let a = alloc.try_rent(16).unwrap();
        assert_eq!(a.offset(), 0);
        let b = alloc.try_rent(16).unwrap();
        assert_eq!(b.offset(), 16);
        assert!(alloc.inner.consistent());
    }

    #[test]
    fn test_backward_rent_takes_trailing_portion() {
        let mut alloc =
            DirectionalFitSuballocator::<u8>::with_strategy(64, 1, backward_only()).unwrap();
        // The run under the cursor already fits; a backward hit claims its
        // trailing portion and the leading free run keeps its prev link.
        let a = alloc.try_rent(16).unwrap();
        assert_eq!(a.offset(), 48);
        assert_eq!(alloc.inner.cursor, 0);
        assert!(alloc.inner.consistent());
        // The next backward rental stacks directly below the first.
        let b = alloc.try_rent(16).unwrap();
        assert_eq!(b.offset(), 32);
        assert!(alloc.inner.consistent());
    }

    #[test]
    fn test_backward_hit_splits_high_half() {
        let mut alloc =
            DirectionalFitSuballocator::<u8>::with_strategy(64, 1, forward_only()).unwrap();
        let a = alloc.try_rent(16).unwrap();
        let b = alloc.try_rent(16).unwrap();
        let _c = alloc.try_rent(16).unwrap();
        let _d = alloc.try_rent(16).unwrap();
        alloc.return_segment(a).unwrap();
        alloc.return_segment(b).unwrap();
        // Cursor sits at 48; the backward sweep walks down to the merged
        // free prefix [0, 32) and claims its trailing portion.
        alloc.inner.strategy = Box::new(backward_only());
        let e = alloc.try_rent(8).unwrap();
        assert_eq!(e.offset(), 24);
        assert_eq!(alloc.inner.cursor, 0);
        assert!(alloc.inner.consistent());
    }

    #[test]
    fn test_two_turnarounds_out_of_memory() {
        let mut alloc = DirectionalFitSuballocator::<u8>::new(32, 1).unwrap();
        let _a = alloc.try_rent(16).unwrap();
        let _b = alloc.try_rent(16).unwrap();
        let err = alloc.try_rent(1).unwrap_err();
        assert!(err.is_out_of_memory());
        assert!(alloc.inner.consistent());
        // Failed rent left cursor and balance untouched.
        assert_eq!(alloc.used_length(), 32);
    }

    #[test]
    fn test_return_merges_both_directions() {
        let mut alloc =
            DirectionalFitSuballocator::<u8>::with_strategy(64, 1, forward_only()).unwrap();
        let a = alloc.try_rent(16).unwrap();
        let b = alloc.try_rent(16).unwrap();
        let c = alloc.try_rent(16).unwrap();
        let _d = alloc.try_rent(16).unwrap();
        alloc.return_segment(a).unwrap();
        alloc.return_segment(c).unwrap();
        // Returning b bridges a and c into one 48-block run.
        alloc.return_segment(b).unwrap();
        assert!(alloc.inner.consistent());
        let big = alloc.try_rent(48).unwrap();
        assert_eq!(big.offset(), 0);
        assert!(alloc.inner.consistent());
    }

    #[test]
    fn test_return_straddling_cursor_snaps_to_run_start() {
        let mut alloc =
            DirectionalFitSuballocator::<u8>::with_strategy(32, 1, forward_only()).unwrap();
        let _a = alloc.try_rent(8).unwrap();
        let _b = alloc.try_rent(8).unwrap();
        let c = alloc.try_rent(8).unwrap();
        let d = alloc.try_rent(8).unwrap();
        // Buffer full; cursor sits on d's run start (24).
        assert_eq!(alloc.inner.cursor, 24);
        alloc.return_segment(c).unwrap();
        assert!(alloc.inner.consistent());
        // Returning d merges [16, 32) into one free run that engulfs the
        // cursor, snapping it back to 16.
        alloc.return_segment(d).unwrap();
        assert_eq!(alloc.inner.cursor, 16);
        assert!(alloc.inner.consistent());
    }

    #[test]
    fn test_prev_link_invariant_across_operations() {
        let mut alloc = DirectionalFitSuballocator::<u8>::new(128, 4).unwrap();
        let mut live = Vec::new();
        for len in [5, 9, 16, 3, 30, 1] {
            live.push(alloc.try_rent(len).unwrap());
            assert!(alloc.inner.consistent());
        }
        for seg in live.drain(..).step_by(2).collect::<Vec<_>>() {
            alloc.return_segment(seg).unwrap();
            assert!(alloc.inner.consistent());
        }
    }

    #[test]
    fn test_double_free_and_unknown_segment() {
        let mut alloc = DirectionalFitSuballocator::<u8>::new(32, 2).unwrap();
        let seg = alloc.try_rent(4).unwrap();
        let ptr = seg.as_ptr();
        alloc.return_ptr(ptr).unwrap();
        assert!(matches!(
            alloc.return_ptr(ptr),
            Err(SuballocError::DoubleFree { .. })
        ));
        // SAFETY: stays inside the buffer.
        let interior = unsafe { alloc.buffer_ptr().add(2) };
        assert!(matches!(
            alloc.return_ptr(interior),
            Err(SuballocError::UnknownSegment { .. })
        ));
    }

    #[test]
    fn test_clear_is_idempotent() {
        let mut alloc = DirectionalFitSuballocator::<u16>::new(60, 3).unwrap();
        let _ = alloc.try_rent(30).unwrap();
        alloc.clear();
        alloc.clear();
        assert_eq!(alloc.used_length(), 0);
        assert_eq!(alloc.allocations(), 0);
        assert!(alloc.inner.consistent());
        let seg = alloc.try_rent(60).unwrap();
        assert_eq!(seg.len(), 60);
    }

    #[test]
    fn test_segments_enumeration_order() {
        let mut alloc = DirectionalFitSuballocator::<u8>::new(64, 1).unwrap();
        let a = alloc.try_rent(8).unwrap();
        let b = alloc.try_rent(8).unwrap();
        let c = alloc.try_rent(8).unwrap();
        alloc.return_segment(b).unwrap();
        let offsets: Vec<usize> = alloc.segments().map(|s| s.offset()).collect();
        assert_eq!(offsets, vec![a.offset(), c.offset()]);
    }
}
