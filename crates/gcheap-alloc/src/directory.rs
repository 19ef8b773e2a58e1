//! The region directory: who owns which region.
//!
//! [`RegionDirectory`] is the interface the allocators consume to obtain
//! and relinquish regions. It is the single authority over region
//! ownership: a region is either free, owned by exactly one allocation
//! target, or committed (holding data, owned by nobody). Handing a region
//! from one owner to the next always goes through retirement here.
//!
//! [`FreeRegionList`] is the in-crate implementation, a free set guarded
//! by a mutex with per-region ownership tracking.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, PoisonError};

use gcheap_core::{ContractViolation, RegionIndex, RegionKind};
use log::trace;

use crate::region::HeapRegion;

/// Source and sink of heap regions.
///
/// Implementations serialise their own state; every method may be called
/// from any GC worker concurrently.
pub trait RegionDirectory: Send + Sync {
    /// Take the lowest free region and mark it owned as `kind`.
    fn request_region(&self, kind: RegionKind) -> Option<RegionIndex>;

    /// Take the highest free region strictly below `below` (anywhere when
    /// `None`) and mark it owned as [`RegionKind::Archive`].
    fn request_highest_free_region(&self, below: Option<RegionIndex>) -> Option<RegionIndex>;

    /// Relinquish ownership of a region.
    ///
    /// `unused_tail_bytes` is the space above the region's top that its
    /// owner never used. An empty region goes straight back to the free
    /// set; anything else becomes committed.
    fn return_region(&self, region: &HeapRegion, unused_tail_bytes: usize);

    /// Take ownership of a committed region again so it can resume as an
    /// allocation target. Returns `false` if the region is not committed.
    fn reacquire_region(&self, region: &HeapRegion) -> bool;

    /// Reclaim a committed region: reset it and put it on the free set.
    fn free_region(&self, region: &HeapRegion);

    /// Number of free regions.
    fn free_count(&self) -> usize;
}

impl<D: RegionDirectory + ?Sized> RegionDirectory for Arc<D> {
    fn request_region(&self, kind: RegionKind) -> Option<RegionIndex> {
        (**self).request_region(kind)
    }

    fn request_highest_free_region(&self, below: Option<RegionIndex>) -> Option<RegionIndex> {
        (**self).request_highest_free_region(below)
    }

    fn return_region(&self, region: &HeapRegion, unused_tail_bytes: usize) {
        (**self).return_region(region, unused_tail_bytes)
    }

    fn reacquire_region(&self, region: &HeapRegion) -> bool {
        (**self).reacquire_region(region)
    }

    fn free_region(&self, region: &HeapRegion) {
        (**self).free_region(region)
    }

    fn free_count(&self) -> usize {
        (**self).free_count()
    }
}

/// Ownership state of a single region.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Ownership {
    /// On the free set.
    Free,
    /// Held by one allocation target.
    Owned(RegionKind),
    /// Holds data; owned by nobody until reacquired or freed.
    Committed(RegionKind),
}

struct DirectoryState {
    ownership: Vec<Ownership>,
    free: BTreeSet<u32>,
    returned_tail_bytes: usize,
}

/// Mutex-guarded free set with ownership tracking.
///
/// Ownership errors (returning a region twice, handing out a region that
/// is not free) are contract violations and panic.
pub struct FreeRegionList {
    state: Mutex<DirectoryState>,
}

impl FreeRegionList {
    /// A directory over `region_count` regions, all initially free.
    pub fn new(region_count: usize) -> Self {
        Self {
            state: Mutex::new(DirectoryState {
                ownership: vec![Ownership::Free; region_count],
                free: (0..region_count as u32).collect(),
                returned_tail_bytes: 0,
            }),
        }
    }

    /// Current ownership of `index`.
    pub fn ownership(&self, index: RegionIndex) -> Ownership {
        self.lock().ownership[index.as_usize()]
    }

    /// Total unused tail bytes reported by returned regions.
    pub fn returned_tail_bytes(&self) -> usize {
        self.lock().returned_tail_bytes
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, DirectoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl DirectoryState {
    fn take(&mut self, index: u32, kind: RegionKind) -> RegionIndex {
        let slot = &mut self.ownership[index as usize];
        if *slot != Ownership::Free {
            panic!(
                "{}",
                ContractViolation::RegionDoubleOwned {
                    region: RegionIndex(index)
                }
            );
        }
        *slot = Ownership::Owned(kind);
        self.free.remove(&index);
        RegionIndex(index)
    }
}

impl RegionDirectory for FreeRegionList {
    fn request_region(&self, kind: RegionKind) -> Option<RegionIndex> {
        let mut state = self.lock();
        let index = *state.free.first()?;
        Some(state.take(index, kind))
    }

    fn request_highest_free_region(&self, below: Option<RegionIndex>) -> Option<RegionIndex> {
        let mut state = self.lock();
        let limit = below.map_or(u32::MAX, |b| b.0);
        let index = *state.free.range(..limit).next_back()?;
        Some(state.take(index, RegionKind::Archive))
    }

    fn return_region(&self, region: &HeapRegion, unused_tail_bytes: usize) {
        let mut state = self.lock();
        let index = region.index();
        let kind = match state.ownership[index.as_usize()] {
            Ownership::Owned(kind) => kind,
            _ => panic!("{}", ContractViolation::RegionNotOwned { region: index }),
        };
        state.returned_tail_bytes += unused_tail_bytes;
        if region.is_empty() {
            region.reset();
            state.ownership[index.as_usize()] = Ownership::Free;
            state.free.insert(index.0);
            trace!("region {index} returned empty, back on free list");
        } else {
            state.ownership[index.as_usize()] = Ownership::Committed(kind);
            trace!(
                "region {index} committed as {kind}: used {} bytes, tail {unused_tail_bytes} bytes",
                region.used()
            );
        }
    }

    fn reacquire_region(&self, region: &HeapRegion) -> bool {
        let mut state = self.lock();
        let slot = &mut state.ownership[region.index().as_usize()];
        match *slot {
            Ownership::Committed(kind) => {
                *slot = Ownership::Owned(kind);
                true
            }
            _ => false,
        }
    }

    fn free_region(&self, region: &HeapRegion) {
        let mut state = self.lock();
        let index = region.index();
        match state.ownership[index.as_usize()] {
            Ownership::Committed(_) => {
                region.reset();
                state.ownership[index.as_usize()] = Ownership::Free;
                state.free.insert(index.0);
            }
            _ => panic!("{}", ContractViolation::RegionNotOwned { region: index }),
        }
    }

    fn free_count(&self) -> usize {
        self.lock().free.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gcheap_core::HeapAddr;

    fn regions(n: usize) -> Vec<HeapRegion> {
        (0..n)
            .map(|i| HeapRegion::new(RegionIndex(i as u32), HeapAddr(0x10000 * (i + 1)), 1024))
            .collect()
    }

    #[test]
    fn request_hands_out_lowest_free_region() {
        let dir = FreeRegionList::new(4);
        assert_eq!(dir.request_region(RegionKind::Eden), Some(RegionIndex(0)));
        assert_eq!(dir.request_region(RegionKind::Old), Some(RegionIndex(1)));
        assert_eq!(dir.ownership(RegionIndex(1)), Ownership::Owned(RegionKind::Old));
        assert_eq!(dir.free_count(), 2);
    }

    #[test]
    fn request_fails_when_exhausted() {
        let dir = FreeRegionList::new(1);
        assert!(dir.request_region(RegionKind::Eden).is_some());
        assert!(dir.request_region(RegionKind::Eden).is_none());
    }

    #[test]
    fn highest_free_respects_limit() {
        let dir = FreeRegionList::new(4);
        assert_eq!(dir.request_highest_free_region(None), Some(RegionIndex(3)));
        assert_eq!(
            dir.request_highest_free_region(Some(RegionIndex(3))),
            Some(RegionIndex(2))
        );
        assert_eq!(dir.request_highest_free_region(Some(RegionIndex(0))), None);
        assert_eq!(
            dir.ownership(RegionIndex(2)),
            Ownership::Owned(RegionKind::Archive)
        );
    }

    #[test]
    fn returning_empty_region_frees_it() {
        let regions = regions(2);
        let dir = FreeRegionList::new(2);
        let idx = dir.request_region(RegionKind::Survivor).unwrap();
        dir.return_region(&regions[idx.as_usize()], 8192);
        assert_eq!(dir.ownership(idx), Ownership::Free);
        assert_eq!(dir.free_count(), 2);
        assert_eq!(dir.returned_tail_bytes(), 8192);
    }

    #[test]
    fn returning_used_region_commits_it() {
        let regions = regions(2);
        let dir = FreeRegionList::new(2);
        let idx = dir.request_region(RegionKind::Old).unwrap();
        regions[idx.as_usize()].par_allocate(10).unwrap();
        dir.return_region(&regions[idx.as_usize()], 0);
        assert_eq!(dir.ownership(idx), Ownership::Committed(RegionKind::Old));
        assert!(dir.reacquire_region(&regions[idx.as_usize()]));
        assert_eq!(dir.ownership(idx), Ownership::Owned(RegionKind::Old));
        assert!(!dir.reacquire_region(&regions[idx.as_usize()]));
    }

    #[test]
    fn free_region_resets_and_recycles() {
        let regions = regions(1);
        let dir = FreeRegionList::new(1);
        let idx = dir.request_region(RegionKind::Eden).unwrap();
        regions[0].par_allocate(10).unwrap();
        dir.return_region(&regions[0], 0);
        dir.free_region(&regions[0]);
        assert!(regions[0].is_empty());
        assert_eq!(dir.request_region(RegionKind::Eden), Some(idx));
    }

    #[test]
    #[should_panic(expected = "returned by a non-owner")]
    fn double_return_is_fatal() {
        let regions = regions(1);
        let dir = FreeRegionList::new(1);
        dir.request_region(RegionKind::Eden).unwrap();
        regions[0].par_allocate(10).unwrap();
        dir.return_region(&regions[0], 0);
        dir.return_region(&regions[0], 0);
    }

    #[test]
    #[should_panic(expected = "returned by a non-owner")]
    fn freeing_an_owned_region_is_fatal() {
        let regions = regions(1);
        let dir = FreeRegionList::new(1);
        dir.request_region(RegionKind::Eden).unwrap();
        dir.free_region(&regions[0]);
    }
}
