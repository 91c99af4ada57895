//! Rental-traffic analysis trackers
//!
//! Trackers observe the same segment handles the suballocators hand out, as a
//! side channel: they never touch buffer contents and never influence the
//! allocation decision.

mod fragmentation;
mod update_window;

pub use fragmentation::FragmentationTracker;
pub use update_window::{UpdateWindow, UpdateWindowTracker, UpdateWindows};
