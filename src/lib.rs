//! # suballoc
//!
//! Variable-size suballocators for large, long-lived, externally visible
//! buffers (device-shared memory and friends), plus trackers that watch the
//! rental traffic. A suballocator carves one fixed pinned buffer into rented
//! block-aligned segments; trackers coalesce the observed addresses into
//! minimal update windows or nominate segments for compaction.
//!
//! Three policies share one contract:
//!
//! - [`SequentialFitSuballocator`]: first-fit forward sweep with a roving
//!   cursor; O(1) returns.
//! - [`BuddySuballocator`]: power-of-two orders with per-order free lists;
//!   O(log n) rent and return.
//! - [`DirectionalFitSuballocator`]: bidirectional sweep steered by a
//!   pluggable [`DirectionStrategy`].
//!
//! ```
//! use suballoc::{SequentialFitSuballocator, Suballocator};
//!
//! let mut alloc = SequentialFitSuballocator::<u32>::new(1024, 16)?;
//! let segment = alloc.try_rent(100)?;
//! assert_eq!(segment.len(), 112); // rounded up to whole blocks
//! let reclaimed = alloc.return_segment(segment)?;
//! assert_eq!(reclaimed, 112);
//! # Ok::<(), suballoc::SuballocError>(())
//! ```
//!
//! Each suballocator and tracker is owned by one logical task at a time and
//! never suspends or locks; the only shared state is the process-wide
//! [`SuballocatorRegistry`] that maps buffer bases back to their owners for
//! detached handle disposal.

pub mod error;
pub mod handle;
pub mod index;
pub mod registry;
pub mod suballocator;
pub mod tracker;
pub mod utils;

pub use error::{Result, SuballocError};
pub use handle::SegmentHandle;
pub use registry::{OwnerInfo, SuballocatorRegistry};
pub use suballocator::{
    BuddySuballocator, DefaultDirectionStrategy, DirectionStrategy,
    DirectionalFitSuballocator, SequentialFitSuballocator, Suballocator, SuballocatorStats,
};
pub use tracker::{FragmentationTracker, UpdateWindow, UpdateWindowTracker, UpdateWindows};
