//! Process-wide registry mapping buffer base pointers to suballocators
//!
//! Every suballocator registers its buffer base address on construction and
//! deregisters on drop. The registry is the only shared mutable state in the
//! crate; it exists so a detached [`SegmentHandle`](crate::SegmentHandle) can
//! find its owner. The preferred path is always passing the allocator
//! explicitly to `return_segment`; the registry is the fallback.

use std::ptr::NonNull;
use std::sync::OnceLock;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::debug;

use crate::error::{Result, SuballocError};

/// Type-erased suballocator surface reachable through the registry
///
/// Implemented by every suballocator's heap-pinned state; operates on raw
/// element addresses so the registry needs no element-type knowledge.
pub(crate) trait ErasedSuballocator {
    /// Reclaims the segment starting at raw address `addr`
    fn return_addr(&mut self, addr: usize) -> Result<usize>;

    /// Recorded element count of the segment starting at raw address `addr`
    fn segment_length_addr(&self, addr: usize) -> Result<usize>;
}

/// Metadata about a registered suballocator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OwnerInfo {
    /// Raw address of the buffer base
    pub base_addr: usize,
    /// Capacity of the backing buffer in elements
    pub capacity: usize,
    /// Size of one element in bytes
    pub element_size: usize,
}

pub(crate) struct RegistryEntry {
    allocator: NonNull<dyn ErasedSuballocator>,
    capacity: usize,
    element_size: usize,
}

// SAFETY: RegistryEntry crosses threads only as an opaque pointer plus plain
// metadata. The pointer is dereferenced solely inside `with_allocator_mut`,
// an unsafe fn whose caller guarantees the single-owner discipline required
// by the allocators themselves (one logical task at a time).
unsafe impl Send for RegistryEntry {}
unsafe impl Sync for RegistryEntry {}

/// Process-wide map from buffer base address to owning suballocator
pub struct SuballocatorRegistry {
    entries: DashMap<usize, RegistryEntry>,
}

static GLOBAL_REGISTRY: OnceLock<SuballocatorRegistry> = OnceLock::new();

impl SuballocatorRegistry {
    fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// The process-wide registry instance
    pub fn global() -> &'static SuballocatorRegistry {
        GLOBAL_REGISTRY.get_or_init(SuballocatorRegistry::new)
    }

    /// Registers `allocator` as the owner of `base_addr`
    pub(crate) fn register(
        &self,
        base_addr: usize,
        allocator: NonNull<dyn ErasedSuballocator>,
        capacity: usize,
        element_size: usize,
    ) -> Result<()> {
        match self.entries.entry(base_addr) {
            Entry::Occupied(_) => Err(SuballocError::RegistryConflict { addr: base_addr }),
            Entry::Vacant(slot) => {
                slot.insert(RegistryEntry {
                    allocator,
                    capacity,
                    element_size,
                });
                debug!(base_addr, capacity, "suballocator registered");
                Ok(())
            }
        }
    }

    /// Removes the entry for `base_addr`, but only if `identity` still owns it
    ///
    /// Identity-checked so a construction that failed with
    /// [`RegistryConflict`](SuballocError::RegistryConflict) cannot evict the
    /// live owner while unwinding.
    pub(crate) fn deregister(&self, base_addr: usize, identity: *const ()) {
        let removed = self
            .entries
            .remove_if(&base_addr, |_, entry| {
                entry.allocator.as_ptr().cast::<()>().cast_const() == identity
            })
            .is_some();
        if removed {
            debug!(base_addr, "suballocator deregistered");
        }
    }

    /// Whether `base_addr` is currently registered
    pub fn contains(&self, base_addr: usize) -> bool {
        self.entries.contains_key(&base_addr)
    }

    /// Metadata for the suballocator owning `base_addr`, if any
    pub fn lookup(&self, base_addr: usize) -> Option<OwnerInfo> {
        self.entries.get(&base_addr).map(|entry| OwnerInfo {
            base_addr,
            capacity: entry.capacity,
            element_size: entry.element_size,
        })
    }

    /// Number of registered suballocators
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no suballocator is registered
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Runs `f` against the suballocator owning `base_addr`
    ///
    /// # Safety
    ///
    /// Caller must guarantee the owning suballocator is still alive and that
    /// no other reference to it is active during the call (the single-owner
    /// discipline of the crate's concurrency model). Deregistration on drop
    /// keeps stale entries out, but cannot protect against a concurrently
    /// executing owner.
    pub(crate) unsafe fn with_allocator_mut<R>(
        &self,
        base_addr: usize,
        f: impl FnOnce(&mut dyn ErasedSuballocator) -> R,
    ) -> Option<R> {
        let mut entry = self.entries.get_mut(&base_addr)?;
        // SAFETY: entry.allocator points to heap-pinned allocator state that
        // deregisters itself on drop; liveness and exclusivity are the
        // caller's contract.
        let allocator = unsafe { entry.allocator.as_mut() };
        Some(f(allocator))
    }

    /// Runs `f` against a shared view of the suballocator owning `base_addr`
    ///
    /// # Safety
    ///
    /// Same contract as [`with_allocator_mut`](Self::with_allocator_mut).
    pub(crate) unsafe fn with_allocator<R>(
        &self,
        base_addr: usize,
        f: impl FnOnce(&dyn ErasedSuballocator) -> R,
    ) -> Option<R> {
        let entry = self.entries.get(&base_addr)?;
        // SAFETY: as in with_allocator_mut.
        let allocator = unsafe { entry.allocator.as_ref() };
        Some(f(allocator))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubAllocator {
        capacity: usize,
        returned: usize,
    }

    impl ErasedSuballocator for StubAllocator {
        fn return_addr(&mut self, _addr: usize) -> Result<usize> {
            self.returned += 1;
            Ok(self.capacity)
        }

        fn segment_length_addr(&self, addr: usize) -> Result<usize> {
            if addr == 0 {
                return Err(SuballocError::UnknownSegment { addr });
            }
            Ok(self.capacity)
        }
    }

    fn erase(stub: &mut StubAllocator) -> NonNull<dyn ErasedSuballocator> {
        let ptr = stub as *mut StubAllocator as *mut dyn ErasedSuballocator;
        // SAFETY: derived from a live reference, so never null.
        unsafe { NonNull::new_unchecked(ptr) }
    }

    #[test]
    fn test_register_conflict_and_identity_checked_deregister() {
        let registry = SuballocatorRegistry::new();
        let mut a = StubAllocator {
            capacity: 10,
            returned: 0,
        };
        let mut b = StubAllocator {
            capacity: 20,
            returned: 0,
        };
        let base = 0x1000;

        registry.register(base, erase(&mut a), 10, 4).unwrap();
        assert!(matches!(
            registry.register(base, erase(&mut b), 20, 4),
            Err(SuballocError::RegistryConflict { .. })
        ));

        // Losing registrant must not evict the live owner.
        registry.deregister(base, erase(&mut b).as_ptr().cast::<()>().cast_const());
        assert!(registry.contains(base));

        registry.deregister(base, erase(&mut a).as_ptr().cast::<()>().cast_const());
        assert!(!registry.contains(base));
    }

    #[test]
    fn test_lookup_metadata() {
        let registry = SuballocatorRegistry::new();
        let mut a = StubAllocator {
            capacity: 64,
            returned: 0,
        };
        registry.register(0x2000, erase(&mut a), 64, 8).unwrap();
        let info = registry.lookup(0x2000).unwrap();
        assert_eq!(info.capacity, 64);
        assert_eq!(info.element_size, 8);
        assert_eq!(registry.lookup(0x3000), None);
        registry.deregister(0x2000, erase(&mut a).as_ptr().cast::<()>().cast_const());
    }

    #[test]
    fn test_with_allocator_mut_reaches_owner() {
        let registry = SuballocatorRegistry::new();
        let mut a = StubAllocator {
            capacity: 8,
            returned: 0,
        };
        registry.register(0x4000, erase(&mut a), 8, 1).unwrap();
        // SAFETY: `a` is alive and not otherwise borrowed.
        let reclaimed = unsafe {
            registry.with_allocator_mut(0x4000, |alloc| alloc.return_addr(0x4000))
        };
        assert_eq!(reclaimed, Some(Ok(8)));
        registry.deregister(0x4000, erase(&mut a).as_ptr().cast::<()>().cast_const());
        assert_eq!(a.returned, 1);
    }
}
