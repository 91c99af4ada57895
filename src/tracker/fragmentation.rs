//! Fragmentation tracking and relocation nomination
//!
//! Approximates local density with an ordered range-bucket map: segments whose
//! starts share an under-filled neighbourhood are good candidates to
//! evict-and-rerent somewhere denser, without reasoning globally. A bucket is
//! judged together with its successor so a hole spanning a bucket boundary is
//! still seen from both sides.

use std::ptr::NonNull;

use crate::SegmentHandle;
use crate::error::Result;
use crate::index::RangeBucketMap;

/// Nominates segments in under-filled buckets for relocation
pub struct FragmentationTracker<T> {
    map: RangeBucketMap<()>,
    base: Option<NonNull<T>>,
}

impl<T> FragmentationTracker<T> {
    /// Creates a tracker over a `capacity`-element span with
    /// `bucket_len`-element buckets
    pub fn new(capacity: usize, bucket_len: usize) -> Result<Self> {
        Ok(Self {
            map: RangeBucketMap::new(capacity, bucket_len)?,
            base: None,
        })
    }

    /// Number of tracked segments
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Whether nothing is tracked
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Records a rented segment
    pub fn track_rental(&mut self, segment: &SegmentHandle<T>) {
        debug_assert!(
            self.base.is_none() || self.base == Some(segment.buffer_ptr()),
            "tracker observed segments from two different buffers"
        );
        self.base.get_or_insert(segment.buffer_ptr());
        self.map.insert(segment.offset(), segment.len(), ());
    }

    /// Forgets a returned segment
    pub fn track_return(&mut self, segment: &SegmentHandle<T>) {
        self.map.remove(segment.offset());
    }

    /// Replaces the tracked entry keyed by the segment's offset
    pub fn track_update(&mut self, segment: &SegmentHandle<T>) {
        self.map.replace(segment.offset(), segment.len(), ());
    }

    /// Drops every tracked segment
    pub fn clear(&mut self) {
        self.map.clear();
        self.base = None;
    }

    /// Fill percentage of bucket `index` evaluated together with its
    /// successor, counting only non-empty buckets' spans
    fn window_fill_pct(&self, index: usize) -> f64 {
        let mut fill = self.map.bucket_fill(index);
        let mut span = if fill > 0 {
            self.map.bucket_span(index)
        } else {
            0
        };
        if index + 1 < self.map.bucket_count() {
            let next_fill = self.map.bucket_fill(index + 1);
            if next_fill > 0 {
                fill += next_fill;
                span += self.map.bucket_span(index + 1);
            }
        }
        if span == 0 {
            0.0
        } else {
            fill as f64 / span as f64
        }
    }

    /// Segments originating in buckets whose neighbourhood is at least
    /// `min_frag_pct` empty
    ///
    /// A fully packed tracker yields nothing for any positive threshold; a
    /// threshold of 0 nominates every tracked segment.
    pub fn fragmented(&self, min_frag_pct: f64) -> impl Iterator<Item = SegmentHandle<T>> + '_ {
        let base = self.base;
        (0..self.map.bucket_count())
            .filter(move |&bucket| {
                self.map.bucket_fill(bucket) > 0
                    && 1.0 - self.window_fill_pct(bucket) >= min_frag_pct
            })
            .flat_map(move |bucket| {
                self.map.ranges_in_bucket(bucket).filter_map(move |range| {
                    let base = base?;
                    // SAFETY: offsets were derived from handles into this
                    // buffer, so the arithmetic stays in bounds.
                    let ptr = unsafe { base.add(range.start) };
                    Some(SegmentHandle::new(base, ptr, range.length))
                })
            })
    }
}
