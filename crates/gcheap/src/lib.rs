//! gcheap: region-based heap allocation for a generational garbage collector.
//!
//! This is the top-level facade crate that re-exports the public API from
//! the gcheap sub-crates. For most users, adding `gcheap` as a single
//! dependency is sufficient.
//!
//! # Quick start
//!
//! ```rust
//! use std::sync::Arc;
//! use gcheap::prelude::*;
//!
//! // 8 regions of 1024 words each.
//! let heap = Arc::new(Heap::new(HeapConfig::new(1024, 8)).unwrap());
//! let allocator = DefaultAllocator::new(Arc::clone(&heap));
//!
//! // Mutator phase.
//! allocator.init_mutator_alloc_region(&heap.lock()).unwrap();
//! let obj = allocator.attempt_allocation(16, AllocationContext::current()).unwrap();
//! assert_eq!(heap.region_containing(obj).unwrap().kind(), RegionKind::Eden);
//! allocator.release_mutator_alloc_region(&heap.lock());
//!
//! // A GC pause with one worker.
//! let mut info = EvacuationInfo::new();
//! allocator.init_gc_alloc_regions(&mut info).unwrap();
//! let mut worker = DefaultParGcAllocator::new(&allocator);
//! let copy = worker.allocate(Destination::Old, 16, AllocationContext::current());
//! assert!(copy.is_some());
//! worker.retire_alloc_buffers();
//! allocator.release_gc_alloc_regions(&mut info);
//! assert_eq!(info.regions_used(AllocRole::Old), 1);
//! ```
//!
//! # Modules
//!
//! | Module | Sub-crate | Contents |
//! |--------|-----------|----------|
//! | [`types`] | `gcheap-core` | Addresses, identifiers, destinations, errors |
//! | [`alloc`] | `gcheap-alloc` | Heap, allocation regions, PLABs, archive allocator |

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

/// Core address and identifier types (`gcheap-core`).
///
/// Contains [`types::HeapAddr`], [`types::RegionIndex`],
/// [`types::Destination`], and the error types
/// [`types::ContractViolation`] and [`types::ConfigError`].
pub use gcheap_core as types;

/// Heap and allocators (`gcheap-alloc`).
///
/// [`alloc::HeapAllocator`] serves the mutator and owns the shared GC
/// allocation regions; [`alloc::ParGcAllocator`] is the per-worker view
/// used during evacuation; [`alloc::ArchiveAllocator`] builds archive
/// regions at the top of the heap.
pub use gcheap_alloc as alloc;

/// Common imports for typical gcheap usage.
///
/// ```rust
/// use gcheap::prelude::*;
/// ```
pub mod prelude {
    // Core types
    pub use gcheap_core::{
        AllocRole, AllocationContext, Destination, HeapAddr, MemRange, RegionIndex, RegionKind,
    };

    // Errors
    pub use gcheap_core::{ConfigError, ContractViolation};

    // Heap
    pub use gcheap_alloc::{EvacuationInfo, Heap, HeapConfig, HeapLockGuard};

    // Allocators
    pub use gcheap_alloc::{
        create_allocator, create_par_allocator, ArchiveAllocator, DefaultAllocator,
        DefaultParGcAllocator, HeapAllocator, ParGcAllocator,
    };
}
