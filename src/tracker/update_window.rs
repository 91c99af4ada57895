//! Update-window coalescing
//!
//! Batches observed rental/return/update addresses into a minimal sorted set
//! of non-overlapping windows, for consumers that must re-sync changed byte
//! ranges over a slow channel. Two windows are combinable when their joint
//! fill percentage stays at or above the configured threshold; combinable
//! pairs are merged transitively.

use std::fmt;
use std::ptr::NonNull;

use crate::SegmentHandle;
use crate::error::{Result, SuballocError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EventKind {
    Rental,
    Return,
    Update,
}

#[derive(Debug, Clone, Copy)]
struct TrackedSegment {
    offset: usize,
    length: usize,
    kind: EventKind,
}

/// One coalesced update window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateWindow<T> {
    /// Pointer to the window's first element
    pub ptr: NonNull<T>,
    /// Element offset within the buffer
    pub offset: usize,
    /// Window length in elements
    pub length: usize,
}

/// Result of a [`UpdateWindowTracker::build`] pass
#[derive(Debug, Clone)]
pub struct UpdateWindows<T> {
    windows: Vec<UpdateWindow<T>>,
    total_length: usize,
    spread_length: usize,
}

impl<T> UpdateWindows<T> {
    /// The coalesced windows in ascending address order
    pub fn windows(&self) -> &[UpdateWindow<T>] {
        &self.windows
    }

    /// Number of windows
    pub fn count(&self) -> usize {
        self.windows.len()
    }

    /// Summed window length in elements
    pub fn total_length(&self) -> usize {
        self.total_length
    }

    /// Distance from the lowest window start to the highest window end
    pub fn spread_length(&self) -> usize {
        self.spread_length
    }

    /// Whether no windows were produced
    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    /// Iterates the windows
    pub fn iter(&self) -> impl Iterator<Item = &UpdateWindow<T>> {
        self.windows.iter()
    }
}

impl<T> fmt::Display for UpdateWindows<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} windows, {} elements over a spread of {}",
            self.count(),
            self.total_length,
            self.spread_length
        )
    }
}

/// Coalesces rental/return/update events into minimal update windows
///
/// `min_fill_pct` controls the merge greed: windows `[a, a+la)` and
/// `[b, b+lb)` with `a <= b` combine when
/// `(la + lb) / (b + lb - a) >= min_fill_pct`. At 0 everything collapses into
/// one window; at 1 only overlapping or abutting windows combine.
pub struct UpdateWindowTracker<T> {
    min_fill_pct: f64,
    base: Option<NonNull<T>>,
    events: Vec<TrackedSegment>,
}

impl<T> UpdateWindowTracker<T> {
    /// Creates a tracker with the given merge threshold in `[0, 1]`
    pub fn new(min_fill_pct: f64) -> Result<Self> {
        if !(0.0..=1.0).contains(&min_fill_pct) {
            return Err(SuballocError::invalid_argument(
                "minimum fill percentage must lie in [0, 1]",
            ));
        }
        Ok(Self {
            min_fill_pct,
            base: None,
            events: Vec::new(),
        })
    }

    /// Configured merge threshold
    pub fn min_fill_pct(&self) -> f64 {
        self.min_fill_pct
    }

    /// Number of recorded events
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether nothing has been observed
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    fn observe(&mut self, segment: &SegmentHandle<T>, kind: EventKind) {
        debug_assert!(
            self.base.is_none() || self.base == Some(segment.buffer_ptr()),
            "tracker observed segments from two different buffers"
        );
        self.base.get_or_insert(segment.buffer_ptr());
        self.events.push(TrackedSegment {
            offset: segment.offset(),
            length: segment.len(),
            kind,
        });
    }

    /// Records a rented segment
    pub fn track_rental(&mut self, segment: &SegmentHandle<T>) {
        self.observe(segment, EventKind::Rental);
    }

    /// Records a returned segment
    ///
    /// A return matching the immediately preceding rental cancels it instead
    /// of recording anything, so a rent-then-return inside one batch produces
    /// no window.
    pub fn track_return(&mut self, segment: &SegmentHandle<T>) {
        if let Some(last) = self.events.last()
            && last.kind == EventKind::Rental
            && last.offset == segment.offset()
            && last.length == segment.len()
        {
            self.events.pop();
            return;
        }
        self.observe(segment, EventKind::Return);
    }

    /// Records an in-place update of a rented segment
    pub fn track_update(&mut self, segment: &SegmentHandle<T>) {
        self.observe(segment, EventKind::Update);
    }

    /// Drops all observations
    pub fn clear(&mut self) {
        self.events.clear();
        self.base = None;
    }

    /// Coalesces the observed events into the minimal window set
    pub fn build(&self) -> UpdateWindows<T> {
        let mut spans: Vec<(usize, usize)> = self
            .events
            .iter()
            .map(|event| (event.offset, event.length))
            .collect();
        spans.sort_by_key(|&(offset, _)| offset);

        // Sweep until a pass merges nothing: a tail window that grows can
        // become combinable with its predecessor, and the contract demands
        // transitive merging.
        loop {
            let mut merged: Vec<(usize, usize)> = Vec::with_capacity(spans.len());
            for &(start, length) in &spans {
                if let Some(&mut (a, ref mut la)) = merged.last_mut() {
                    let joint_span = start + length - a;
                    let fill = (*la + length) as f64 / joint_span as f64;
                    if fill >= self.min_fill_pct {
                        // A contained window keeps the tail's end.
                        *la = (a + *la).max(start + length) - a;
                        continue;
                    }
                }
                merged.push((start, length));
            }
            let stable = merged.len() == spans.len();
            spans = merged;
            if stable {
                break;
            }
        }

        let total_length = spans.iter().map(|&(_, length)| length).sum();
        let spread_length = match (spans.first(), spans.last()) {
            (Some(&(first, _)), Some(&(last, last_len))) => last + last_len - first,
            _ => 0,
        };
        let windows = match self.base {
            Some(base) => spans
                .into_iter()
                .map(|(offset, length)| UpdateWindow {
                    // SAFETY: offsets were derived from handles into this
                    // buffer, so the arithmetic stays in bounds.
                    ptr: unsafe { base.add(offset) },
                    offset,
                    length,
                })
                .collect(),
            None => Vec::new(),
        };

        UpdateWindows {
            windows,
            total_length,
            spread_length,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(base: NonNull<u32>, offset: usize, length: usize) -> SegmentHandle<u32> {
        // SAFETY: test offsets stay inside the backing array.
        let ptr = unsafe { base.add(offset) };
        SegmentHandle::new(base, ptr, length)
    }

    fn base_of(backing: &mut [u32]) -> NonNull<u32> {
        NonNull::new(backing.as_mut_ptr()).unwrap()
    }

    #[test]
    fn test_threshold_validation() {
        assert!(UpdateWindowTracker::<u32>::new(-0.1).is_err());
        assert!(UpdateWindowTracker::<u32>::new(1.1).is_err());
        assert!(UpdateWindowTracker::<u32>::new(0.0).is_ok());
        assert!(UpdateWindowTracker::<u32>::new(1.0).is_ok());
    }

    #[test]
    fn test_empty_build() {
        let tracker = UpdateWindowTracker::<u32>::new(0.5).unwrap();
        let windows = tracker.build();
        assert!(windows.is_empty());
        assert_eq!(windows.total_length(), 0);
        assert_eq!(windows.spread_length(), 0);
    }

    #[test]
    fn test_dense_segments_combine() {
        let mut backing = [0u32; 64];
        let base = base_of(&mut backing);
        let mut tracker = UpdateWindowTracker::new(0.5).unwrap();
        // Gaps of 2 between length-8 segments: pairwise fill 16/18.
        for i in 0..4 {
            tracker.track_rental(&handle(base, i * 10, 8));
        }
        let windows = tracker.build();
        assert_eq!(windows.count(), 1);
        assert_eq!(windows.windows()[0].offset, 0);
        assert_eq!(windows.windows()[0].length, 38);
        assert_eq!(windows.spread_length(), 38);
    }

    #[test]
    fn test_sparse_segments_stay_apart() {
        let mut backing = [0u32; 256];
        let base = base_of(&mut backing);
        let mut tracker = UpdateWindowTracker::new(0.5).unwrap();
        // Gaps of 24 between length-8 segments: pairwise fill 16/40.
        for i in 0..4 {
            tracker.track_rental(&handle(base, i * 32, 8));
        }
        let windows = tracker.build();
        assert_eq!(windows.count(), 4);
        assert_eq!(windows.total_length(), 32);
        assert_eq!(windows.spread_length(), 3 * 32 + 8);
        // No surviving pair may pass the fill test.
        for pair in windows.windows().windows(2) {
            let (a, la) = (pair[0].offset, pair[0].length);
            let (b, lb) = (pair[1].offset, pair[1].length);
            assert!(((la + lb) as f64 / (b + lb - a) as f64) < 0.5);
        }
    }

    #[test]
    fn test_return_cancels_matching_tail_rental() {
        let mut backing = [0u32; 64];
        let base = base_of(&mut backing);
        let mut tracker = UpdateWindowTracker::new(1.0).unwrap();
        let seg = handle(base, 8, 4);
        tracker.track_rental(&seg);
        tracker.track_return(&seg);
        assert!(tracker.is_empty());
        assert!(tracker.build().is_empty());
    }

    #[test]
    fn test_return_without_matching_tail_is_recorded() {
        let mut backing = [0u32; 64];
        let base = base_of(&mut backing);
        let mut tracker = UpdateWindowTracker::new(1.0).unwrap();
        let seg = handle(base, 8, 4);
        tracker.track_rental(&seg);
        tracker.track_rental(&handle(base, 20, 4));
        // Not the tail event any more: recorded as a change.
        tracker.track_return(&seg);
        let windows = tracker.build();
        assert_eq!(windows.count(), 2);
        assert_eq!(windows.total_length(), 12);
    }

    #[test]
    fn test_contained_window_merges_without_extending() {
        let mut backing = [0u32; 64];
        let base = base_of(&mut backing);
        let mut tracker = UpdateWindowTracker::new(1.0).unwrap();
        tracker.track_rental(&handle(base, 0, 16));
        tracker.track_update(&handle(base, 4, 4));
        let windows = tracker.build();
        assert_eq!(windows.count(), 1);
        assert_eq!(windows.windows()[0].length, 16);
    }

    #[test]
    fn test_zero_threshold_collapses_everything() {
        let mut backing = [0u32; 256];
        let base = base_of(&mut backing);
        let mut tracker = UpdateWindowTracker::new(0.0).unwrap();
        tracker.track_rental(&handle(base, 200, 1));
        tracker.track_rental(&handle(base, 0, 1));
        let windows = tracker.build();
        assert_eq!(windows.count(), 1);
        assert_eq!(windows.spread_length(), 201);
    }

    #[test]
    fn test_clear_forgets_observations() {
        let mut backing = [0u32; 16];
        let base = base_of(&mut backing);
        let mut tracker = UpdateWindowTracker::new(0.5).unwrap();
        tracker.track_rental(&handle(base, 0, 8));
        tracker.clear();
        assert!(tracker.is_empty());
        assert!(tracker.build().is_empty());
    }
}
