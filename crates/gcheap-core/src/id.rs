//! Strongly-typed identifiers and allocation tags.

use std::fmt;

/// Identifies a region within the reserved heap.
///
/// Regions are numbered from the lowest address upward: region `n`
/// starts at `heap_base + n * region_bytes`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegionIndex(pub u32);

impl RegionIndex {
    /// Index as a `usize`, for table lookups.
    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for RegionIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for RegionIndex {
    fn from(v: u32) -> Self {
        Self(v)
    }
}

/// Opaque token partitioning allocation pools.
///
/// Every per-role lookup in the allocators is keyed by a context. The
/// default allocator serves a single context, but callers always pass
/// one so that context-aware allocators can be added without changing
/// the interface.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AllocationContext(pub u8);

impl AllocationContext {
    /// The system-wide default context.
    pub const DEFAULT: AllocationContext = AllocationContext(0);

    /// The context of the current allocation request.
    pub fn current() -> Self {
        Self::DEFAULT
    }

    /// Context to charge system-internal allocations to.
    pub fn system() -> Self {
        Self::DEFAULT
    }
}

impl Default for AllocationContext {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl fmt::Display for AllocationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where an evacuated object is headed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Destination {
    /// The object is not in the collection set. Never an allocation target.
    NotInCSet,
    /// Survivor space of the young generation.
    Young,
    /// The old generation.
    Old,
}

impl Destination {
    /// Number of destinations that can receive allocations.
    pub const NUM_VALID: usize = 2;

    /// All destinations that can receive allocations, in index order.
    pub const VALID: [Destination; Self::NUM_VALID] = [Destination::Young, Destination::Old];

    /// Whether this destination is the survivor space.
    pub fn is_young(self) -> bool {
        matches!(self, Self::Young)
    }

    /// Whether this destination is the old generation.
    pub fn is_old(self) -> bool {
        matches!(self, Self::Old)
    }

    /// Whether allocations may target this destination.
    pub fn is_valid(self) -> bool {
        !matches!(self, Self::NotInCSet)
    }

    /// Dense index for per-destination arrays, or `None` for `NotInCSet`.
    pub fn index(self) -> Option<usize> {
        match self {
            Self::NotInCSet => None,
            Self::Young => Some(0),
            Self::Old => Some(1),
        }
    }

    /// The allocation role that serves this destination.
    pub fn role(self) -> Option<AllocRole> {
        match self {
            Self::NotInCSet => None,
            Self::Young => Some(AllocRole::Survivor),
            Self::Old => Some(AllocRole::Old),
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotInCSet => write!(f, "not-in-cset"),
            Self::Young => write!(f, "young"),
            Self::Old => write!(f, "old"),
        }
    }
}

/// The client an allocation region serves.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AllocRole {
    /// The running program, allocating into eden.
    Mutator,
    /// GC workers copying young survivors.
    Survivor,
    /// GC workers promoting into the old generation.
    Old,
}

impl AllocRole {
    /// The kind a freshly acquired region takes on for this role.
    pub fn region_kind(self) -> RegionKind {
        match self {
            Self::Mutator => RegionKind::Eden,
            Self::Survivor => RegionKind::Survivor,
            Self::Old => RegionKind::Old,
        }
    }
}

impl fmt::Display for AllocRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mutator => write!(f, "mutator"),
            Self::Survivor => write!(f, "survivor"),
            Self::Old => write!(f, "old"),
        }
    }
}

/// What a region is currently used for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RegionKind {
    /// On the free list; holds no objects.
    Free = 0,
    /// Young generation, mutator allocations.
    Eden = 1,
    /// Young generation, objects that survived a pause.
    Survivor = 2,
    /// Old generation.
    Old = 3,
    /// Immutable archived data. Never collected, scanned, or marked.
    Archive = 4,
}

impl RegionKind {
    /// Decode from the `u8` representation.
    ///
    /// # Panics
    ///
    /// Panics on a value that is not a valid discriminant.
    pub fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Free,
            1 => Self::Eden,
            2 => Self::Survivor,
            3 => Self::Old,
            4 => Self::Archive,
            _ => panic!("invalid RegionKind discriminant {v}"),
        }
    }

    /// Whether the region belongs to the young generation.
    pub fn is_young(self) -> bool {
        matches!(self, Self::Eden | Self::Survivor)
    }
}

impl fmt::Display for RegionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Free => write!(f, "free"),
            Self::Eden => write!(f, "eden"),
            Self::Survivor => write!(f, "survivor"),
            Self::Old => write!(f, "old"),
            Self::Archive => write!(f, "archive"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn destination_indices_are_dense() {
        for (i, dest) in Destination::VALID.iter().enumerate() {
            assert_eq!(dest.index(), Some(i));
            assert!(dest.is_valid());
        }
        assert_eq!(Destination::NotInCSet.index(), None);
        assert!(!Destination::NotInCSet.is_valid());
    }

    #[test]
    fn destination_maps_to_role() {
        assert_eq!(Destination::Young.role(), Some(AllocRole::Survivor));
        assert_eq!(Destination::Old.role(), Some(AllocRole::Old));
        assert_eq!(Destination::NotInCSet.role(), None);
    }

    #[test]
    fn role_region_kinds() {
        assert_eq!(AllocRole::Mutator.region_kind(), RegionKind::Eden);
        assert_eq!(AllocRole::Survivor.region_kind(), RegionKind::Survivor);
        assert_eq!(AllocRole::Old.region_kind(), RegionKind::Old);
    }

    #[test]
    fn region_kind_u8_round_trip() {
        for kind in [
            RegionKind::Free,
            RegionKind::Eden,
            RegionKind::Survivor,
            RegionKind::Old,
            RegionKind::Archive,
        ] {
            assert_eq!(RegionKind::from_u8(kind as u8), kind);
        }
    }

    #[test]
    #[should_panic(expected = "invalid RegionKind")]
    fn region_kind_rejects_garbage() {
        RegionKind::from_u8(200);
    }

    #[test]
    fn default_context_is_current() {
        assert_eq!(AllocationContext::current(), AllocationContext::DEFAULT);
        assert_eq!(AllocationContext::default(), AllocationContext::DEFAULT);
    }
}
