//! Region-based allocation for a generational, incremental collector.
//!
//! Three clients carve memory out of fixed-size heap regions:
//!
//! - the **mutator**, bump-allocating into eden under the heap lock;
//! - parallel **GC workers**, evacuating through private PLABs backed by
//!   shared survivor and old allocation regions;
//! - the **archive allocator**, taking regions from the top of the heap
//!   for immutable data that is never collected.
//!
//! # Architecture
//!
//! ```text
//! Heap (shared, Arc)
//! ├── RegionTable → HeapRegion[] (atomic bump top, kind tag)
//! ├── Box<dyn RegionDirectory> (free / owned / committed)
//! ├── heap lock (HeapLockGuard proves it is held)
//! ├── PlabStats × 2 (young, old)
//! └── CardTable (archive regions exempt)
//!
//! DefaultAllocator: HeapAllocator
//! ├── AllocRegion mutator / survivor / old (CAS replacement)
//! └── retained old region slot, "full" latches
//!
//! DefaultParGcAllocator<'a>: ParGcAllocator (one per worker)
//! └── Plab × 2 (young, old), borrowing &'a dyn HeapAllocator
//!
//! ArchiveAllocator (independent session, consumed by complete_archive)
//! ```
//!
//! Addresses are plain byte offsets ([`HeapAddr`](gcheap_core::HeapAddr));
//! nothing here dereferences memory, so the crate is entirely safe code.
//! Running out of space is reported as `None`; broken caller contracts
//! as [`ContractViolation`](gcheap_core::ContractViolation).

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod alloc_region;
pub mod allocator;
pub mod archive;
pub mod card_table;
pub mod config;
pub mod directory;
pub mod evacuation;
pub mod heap;
pub mod par_allocator;
pub mod plab;
pub mod region;
pub mod stats;

// Public re-exports for the primary API surface.
pub use alloc_region::{AllocRegion, RegionSlot};
pub use allocator::{create_allocator, DefaultAllocator, HeapAllocator};
pub use archive::{ArchiveAllocator, ArchiveRanges};
pub use card_table::CardTable;
pub use config::HeapConfig;
pub use directory::{FreeRegionList, Ownership, RegionDirectory};
pub use evacuation::EvacuationInfo;
pub use heap::{Heap, HeapLockGuard};
pub use par_allocator::{create_par_allocator, DefaultParGcAllocator, ParGcAllocator};
pub use plab::Plab;
pub use region::{HeapRegion, RegionTable};
pub use stats::{PlabStats, PlabStatsSnapshot};
