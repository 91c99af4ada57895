//! Ordered range-bucket map with per-bucket fill statistics
//!
//! Partitions `[0, capacity)` into equal-length buckets (the last may be
//! short). A range *originates* in the bucket containing its start and is
//! stored there ordered by start; its fill contribution is split across every
//! bucket it touches, so each bucket's fill never exceeds the bucket span.
//! This keeps local-density percentages well-formed for the fragmentation
//! tracker without any global scan.

use std::collections::BTreeMap;

use crate::error::{Result, SuballocError};

/// A range stored in the map, viewed through iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketRange<'a, V> {
    /// Element offset of the range start
    pub start: usize,
    /// Range length in elements
    pub length: usize,
    /// Value stored alongside the range
    pub value: &'a V,
}

#[derive(Debug)]
struct Bucket<V> {
    /// Summed overlap of all ranges touching this bucket, in elements
    fill: usize,
    /// Ranges originating here, keyed and ordered by start offset
    ranges: BTreeMap<usize, (usize, V)>,
}

impl<V> Bucket<V> {
    fn new() -> Self {
        Self {
            fill: 0,
            ranges: BTreeMap::new(),
        }
    }
}

/// Bucketed map `start offset → (length, value)` over a fixed element span
#[derive(Debug)]
pub struct RangeBucketMap<V> {
    capacity: usize,
    bucket_len: usize,
    buckets: Vec<Bucket<V>>,
    range_count: usize,
}

impl<V> RangeBucketMap<V> {
    /// Creates a map over `[0, capacity)` with `bucket_len`-element buckets
    pub fn new(capacity: usize, bucket_len: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(SuballocError::invalid_argument("capacity must be positive"));
        }
        if bucket_len == 0 {
            return Err(SuballocError::invalid_argument(
                "bucket length must be positive",
            ));
        }
        if bucket_len > capacity {
            return Err(SuballocError::invalid_argument(
                "bucket length exceeds capacity",
            ));
        }
        let bucket_count = capacity.div_ceil(bucket_len);
        let mut buckets = Vec::with_capacity(bucket_count);
        buckets.resize_with(bucket_count, Bucket::new);
        Ok(Self {
            capacity,
            bucket_len,
            buckets,
            range_count: 0,
        })
    }

    /// Total element span covered by the map
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Configured bucket length in elements
    #[inline]
    pub fn bucket_len(&self) -> usize {
        self.bucket_len
    }

    /// Number of buckets (last may be short)
    #[inline]
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Number of stored ranges
    #[inline]
    pub fn len(&self) -> usize {
        self.range_count
    }

    /// Whether no ranges are stored
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.range_count == 0
    }

    /// Actual element span of bucket `index`
    #[inline]
    pub fn bucket_span(&self, index: usize) -> usize {
        debug_assert!(index < self.buckets.len());
        let start = index * self.bucket_len;
        (self.capacity - start).min(self.bucket_len)
    }

    /// Summed fill of bucket `index` in elements
    #[inline]
    pub fn bucket_fill(&self, index: usize) -> usize {
        self.buckets[index].fill
    }

    #[inline]
    fn bucket_of(&self, offset: usize) -> usize {
        offset / self.bucket_len
    }

    /// Adds `delta` (signed via `add`) of a range's overlap to every touched bucket
    fn apply_fill(&mut self, start: usize, length: usize, add: bool) {
        let end = start + length;
        let first = self.bucket_of(start);
        let last = self.bucket_of(end - 1);
        for b in first..=last {
            let bucket_start = b * self.bucket_len;
            let bucket_end = bucket_start + self.bucket_span(b);
            let overlap = end.min(bucket_end) - start.max(bucket_start);
            if add {
                self.buckets[b].fill += overlap;
            } else {
                self.buckets[b].fill -= overlap;
            }
        }
    }

    /// Inserts the range `[start, start + length)`, displacing any range with
    /// the same start
    ///
    /// The range must be non-empty and lie within `[0, capacity)`.
    pub fn insert(&mut self, start: usize, length: usize, value: V) -> Option<(usize, V)> {
        debug_assert!(length > 0);
        debug_assert!(start + length <= self.capacity);
        let displaced = self.remove(start);
        self.apply_fill(start, length, true);
        let origin = self.bucket_of(start);
        self.buckets[origin].ranges.insert(start, (length, value));
        self.range_count += 1;
        displaced
    }

    /// Removes the range keyed by `start`, returning its length and value
    pub fn remove(&mut self, start: usize) -> Option<(usize, V)> {
        if start >= self.capacity {
            return None;
        }
        let origin = self.bucket_of(start);
        let (length, value) = self.buckets[origin].ranges.remove(&start)?;
        self.apply_fill(start, length, false);
        self.range_count -= 1;
        Some((length, value))
    }

    /// Replaces the entry keyed by `start`, returning the previous one
    ///
    /// Unlike [`insert`](Self::insert), the key must already be present.
    pub fn replace(&mut self, start: usize, length: usize, value: V) -> Option<(usize, V)> {
        let previous = self.remove(start)?;
        self.insert(start, length, value);
        Some(previous)
    }

    /// Looks up the range keyed by `start`
    pub fn get(&self, start: usize) -> Option<(usize, &V)> {
        if start >= self.capacity {
            return None;
        }
        self.buckets[self.bucket_of(start)]
            .ranges
            .get(&start)
            .map(|(length, value)| (*length, value))
    }

    /// Iterates the ranges originating in bucket `index`, ordered by start
    pub fn ranges_in_bucket(&self, index: usize) -> impl Iterator<Item = BucketRange<'_, V>> {
        self.buckets[index]
            .ranges
            .iter()
            .map(|(&start, (length, value))| BucketRange {
                start,
                length: *length,
                value,
            })
    }

    /// Iterates every stored range in ascending start order
    pub fn iter(&self) -> impl Iterator<Item = BucketRange<'_, V>> {
        (0..self.buckets.len()).flat_map(move |bucket| self.ranges_in_bucket(bucket))
    }

    /// Removes every range and zeroes all fill statistics
    pub fn clear(&mut self) {
        for bucket in &mut self.buckets {
            bucket.fill = 0;
            bucket.ranges.clear();
        }
        self.range_count = 0;
    }
}
