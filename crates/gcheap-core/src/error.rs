//! Error types for the gcheap allocators.
//!
//! Running out of heap is not an error here: every allocation path
//! reports exhaustion as `None` and leaves the recovery policy to the
//! pause orchestrator. The types below cover the two remaining cases:
//! broken caller contracts, which are fatal, and bad configuration,
//! which is rejected at heap construction.

use std::error::Error;
use std::fmt;

use crate::addr::HeapAddr;
use crate::id::{AllocRole, RegionIndex};

/// A caller broke an allocator contract.
///
/// These are programming errors. Continuing after one risks heap
/// corruption, so callers must treat them as fatal. The checks that
/// produce them run in debug and test builds; release builds trust the
/// caller on the fast paths.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ContractViolation {
    /// An undo named an address inside the buffer that is not the most
    /// recent allocation.
    UndoNotAtFrontier {
        /// Address passed to the undo.
        addr: HeapAddr,
        /// Size passed to the undo, in words.
        words: usize,
        /// Current bump frontier of the buffer.
        top: HeapAddr,
    },
    /// An undo named an address outside the buffer that does not lie in
    /// a region of the destination's role.
    UndoOutsideRegionRole {
        /// Address passed to the undo.
        addr: HeapAddr,
    },
    /// A buffer was dropped or re-pointed while still live.
    BufferNotRetired,
    /// A region was handed to a second owner.
    RegionDoubleOwned {
        /// The region in question.
        region: RegionIndex,
    },
    /// A region was returned by something that does not own it.
    RegionNotOwned {
        /// The region in question.
        region: RegionIndex,
    },
    /// An allocation region was initialised while still holding a region.
    AllocRegionAlreadyHeld {
        /// Role of the allocation region.
        role: AllocRole,
        /// The region still held.
        region: RegionIndex,
    },
    /// A zero-word allocation was requested.
    ZeroSizedAllocation,
    /// An archive end alignment is not a power-of-two word multiple
    /// smaller than an archive chunk.
    InvalidEndAlignment {
        /// The requested alignment in bytes.
        alignment: usize,
    },
}

impl fmt::Display for ContractViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UndoNotAtFrontier { addr, words, top } => write!(
                f,
                "undo of {words} words at {addr} is not the last allocation (top {top})"
            ),
            Self::UndoOutsideRegionRole { addr } => {
                write!(f, "undo at {addr} is outside every region of its destination")
            }
            Self::BufferNotRetired => write!(f, "allocation buffer has not been retired"),
            Self::RegionDoubleOwned { region } => {
                write!(f, "region {region} handed to a second owner")
            }
            Self::RegionNotOwned { region } => {
                write!(f, "region {region} returned by a non-owner")
            }
            Self::AllocRegionAlreadyHeld { role, region } => {
                write!(f, "{role} alloc region initialised while holding region {region}")
            }
            Self::ZeroSizedAllocation => write!(f, "allocation size must not be zero"),
            Self::InvalidEndAlignment { alignment } => {
                write!(f, "invalid archive end alignment {alignment}")
            }
        }
    }
}

impl Error for ContractViolation {}

/// Errors detected while validating a heap configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConfigError {
    /// Region size is not a power of two or is too small.
    InvalidRegionSize {
        /// Configured region size in words.
        words: usize,
    },
    /// The heap has no regions, or more than a region index can name.
    InvalidRegionCount {
        /// Configured region count.
        count: usize,
    },
    /// The heap base is null or not region aligned.
    MisalignedHeapBase {
        /// Configured base address.
        base: HeapAddr,
    },
    /// An alignment is not a power of two or is below the word size.
    InvalidAlignment {
        /// Which setting was wrong.
        name: &'static str,
        /// The configured value in bytes.
        value: usize,
    },
    /// A size setting is outside its allowed range.
    OutOfRange {
        /// Which setting was wrong.
        name: &'static str,
        /// Human-readable description of the constraint.
        reason: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidRegionSize { words } => write!(
                f,
                "region size must be a power of two and >= 1024 words (got {words})"
            ),
            Self::InvalidRegionCount { count } => {
                write!(f, "region count must be in 1..=u32::MAX - 1 (got {count})")
            }
            Self::MisalignedHeapBase { base } => {
                write!(f, "heap base {base} must be non-null and region aligned")
            }
            Self::InvalidAlignment { name, value } => write!(
                f,
                "{name} must be a power of two and at least one word (got {value})"
            ),
            Self::OutOfRange { name, reason } => write!(f, "{name}: {reason}"),
        }
    }
}

impl Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn violation_messages_name_the_problem() {
        let v = ContractViolation::UndoNotAtFrontier {
            addr: HeapAddr(0x100),
            words: 4,
            top: HeapAddr(0x140),
        };
        assert_eq!(
            v.to_string(),
            "undo of 4 words at 0x100 is not the last allocation (top 0x140)"
        );
        assert_eq!(
            ContractViolation::BufferNotRetired.to_string(),
            "allocation buffer has not been retired"
        );
    }

    #[test]
    fn config_error_messages() {
        let e = ConfigError::InvalidRegionSize { words: 100 };
        assert!(e.to_string().contains("got 100"));
        let e = ConfigError::InvalidAlignment {
            name: "survivor_alignment_bytes",
            value: 3,
        };
        assert!(e.to_string().starts_with("survivor_alignment_bytes"));
    }
}
