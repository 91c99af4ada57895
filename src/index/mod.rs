//! Index structures shared by the suballocators and trackers
//!
//! All three allocation policies keep their bookkeeping in flat, block-indexed
//! tables rather than pointer graphs: links are array indices with a sentinel
//! for NONE, so the whole index lives in one contiguous slab.

mod bit_set;
mod block_array;
mod range_bucket;

pub use bit_set::BitSet;
pub use block_array::BlockArray;
pub use range_bucket::{BucketRange, RangeBucketMap};
