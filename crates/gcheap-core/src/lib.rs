//! Core types for the gcheap region allocator.
//!
//! This is the leaf crate with zero internal dependencies. It defines
//! the vocabulary shared by every other gcheap crate: heap addresses and
//! byte ranges, region and context identifiers, evacuation destinations,
//! and the error types for contract violations and bad configuration.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod addr;
pub mod error;
pub mod id;

pub use addr::{HeapAddr, MemRange, HEAP_WORD_SIZE};
pub use error::{ConfigError, ContractViolation};
pub use id::{AllocRole, AllocationContext, Destination, RegionIndex, RegionKind};
