//! The reserved heap shared by every allocator.
//!
//! [`Heap`] ties together the region table, the region directory, the
//! heap-wide lock that serialises mutator region replacement, the PLAB
//! statistics sinks, and the card table. It is built once and shared by
//! reference (usually behind an `Arc`) between the allocator, the GC
//! workers, and the archive allocator.

use std::sync::{Mutex, MutexGuard, PoisonError};

use gcheap_core::{AllocRole, ConfigError, Destination, HeapAddr, RegionIndex, RegionKind};
use log::trace;

use crate::card_table::CardTable;
use crate::config::HeapConfig;
use crate::directory::{FreeRegionList, RegionDirectory};
use crate::region::{HeapRegion, RegionTable};
use crate::stats::PlabStats;

/// Proof that the heap-wide allocation lock is held.
///
/// Operations that read or replace the mutator region without further
/// synchronisation take a `&HeapLockGuard` so the requirement is checked
/// by the compiler rather than by a runtime owner assertion.
#[must_use]
pub struct HeapLockGuard<'a> {
    _guard: MutexGuard<'a, ()>,
}

/// Reserved heap state shared by all allocation clients.
pub struct Heap {
    config: HeapConfig,
    regions: RegionTable,
    directory: Box<dyn RegionDirectory>,
    heap_lock: Mutex<()>,
    plab_stats: [PlabStats; Destination::NUM_VALID],
    card_table: CardTable,
}

// Compile-time assertion: Heap must be Send + Sync.
const _: fn() = || {
    fn assert<T: Send + Sync>() {}
    assert::<Heap>();
};

impl Heap {
    /// Build a heap with a [`FreeRegionList`] directory.
    pub fn new(config: HeapConfig) -> Result<Self, ConfigError> {
        let directory = Box::new(FreeRegionList::new(config.region_count));
        Self::with_directory(config, directory)
    }

    /// Build a heap over a caller-supplied region directory.
    ///
    /// The directory must track exactly `config.region_count` regions,
    /// all initially free.
    pub fn with_directory(
        config: HeapConfig,
        directory: Box<dyn RegionDirectory>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let regions = RegionTable::new(&config);
        let card_table = CardTable::new(regions.reserved(), config.card_shift);
        let plab_stats = [
            PlabStats::new(
                config.young_plab_words,
                config.min_plab_words,
                config.max_plab_words,
            ),
            PlabStats::new(
                config.old_plab_words,
                config.min_plab_words,
                config.max_plab_words,
            ),
        ];
        Ok(Self {
            config,
            regions,
            directory,
            heap_lock: Mutex::new(()),
            plab_stats,
            card_table,
        })
    }

    /// The configuration the heap was built with.
    pub fn config(&self) -> &HeapConfig {
        &self.config
    }

    /// All regions of the reserved heap.
    pub fn regions(&self) -> &RegionTable {
        &self.regions
    }

    /// The region with the given index.
    pub fn region(&self, index: RegionIndex) -> &HeapRegion {
        self.regions.get(index)
    }

    /// The region containing `addr`, if any.
    pub fn region_containing(&self, addr: HeapAddr) -> Option<&HeapRegion> {
        self.regions.region_containing(addr)
    }

    /// The region directory.
    pub fn directory(&self) -> &dyn RegionDirectory {
        self.directory.as_ref()
    }

    /// The card table.
    pub fn card_table(&self) -> &CardTable {
        &self.card_table
    }

    /// Acquire the heap-wide allocation lock.
    pub fn lock(&self) -> HeapLockGuard<'_> {
        HeapLockGuard {
            _guard: self.heap_lock.lock().unwrap_or_else(PoisonError::into_inner),
        }
    }

    /// PLAB statistics sink for `dest`.
    ///
    /// # Panics
    ///
    /// Panics for [`Destination::NotInCSet`].
    pub fn plab_stats(&self, dest: Destination) -> &PlabStats {
        match dest.index() {
            Some(i) => &self.plab_stats[i],
            None => panic!("no PLAB statistics for destination {dest}"),
        }
    }

    /// The PLAB size workers should use for `dest`, never above a region.
    pub fn desired_plab_words(&self, dest: Destination) -> usize {
        self.plab_stats(dest)
            .desired_plab_words()
            .min(self.config.region_words)
    }

    /// Obtain a fresh, empty region to serve `role`.
    pub fn new_alloc_region(&self, role: AllocRole) -> Option<&HeapRegion> {
        let kind = role.region_kind();
        let index = self.directory.request_region(kind)?;
        let region = self.regions.get(index);
        debug_assert!(region.is_empty(), "fresh region {index} is not empty");
        region.set_kind(kind);
        trace!("region {index} allocated for {role}");
        Some(region)
    }

    /// Hand a retired allocation region back to the directory.
    pub fn retire_alloc_region(&self, region: &HeapRegion, unused_tail_bytes: usize) {
        trace!(
            "region {} retired: used {} bytes, wasted {unused_tail_bytes} bytes",
            region.index(),
            region.used()
        );
        self.directory.return_region(region, unused_tail_bytes);
    }

    /// Obtain the highest free region strictly below `below` for archived data.
    pub fn alloc_highest_free_region(&self, below: Option<RegionIndex>) -> Option<&HeapRegion> {
        let index = self.directory.request_highest_free_region(below)?;
        let region = self.regions.get(index);
        debug_assert!(region.is_empty(), "fresh region {index} is not empty");
        region.set_kind(RegionKind::Archive);
        trace!("region {index} allocated for archive");
        Some(region)
    }

    /// Reclaim a committed region, making it free again.
    pub fn free_region(&self, index: RegionIndex) {
        self.directory.free_region(self.regions.get(index));
    }

    /// Whether `addr` lies in an archive region.
    pub fn is_archive(&self, addr: HeapAddr) -> bool {
        self.region_containing(addr)
            .is_some_and(|r| r.is_archive())
    }

    /// Post-write barrier for a reference store into `field`.
    ///
    /// Archived objects are never scanned, so stores into them leave the
    /// card table untouched. Returns whether a card was dirtied.
    pub fn write_ref_field(&self, field: HeapAddr, release: bool) -> bool {
        if self.is_archive(field) {
            return false;
        }
        self.card_table.write_ref_field(field, release);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn heap() -> Heap {
        Heap::new(HeapConfig::new(1024, 4)).unwrap()
    }

    #[test]
    fn rejects_invalid_config() {
        assert!(matches!(
            Heap::new(HeapConfig::new(1000, 4)),
            Err(ConfigError::InvalidRegionSize { .. })
        ));
    }

    #[test]
    fn new_alloc_region_tags_kind() {
        let heap = heap();
        let r = heap.new_alloc_region(AllocRole::Survivor).unwrap();
        assert_eq!(r.kind(), RegionKind::Survivor);
        assert_eq!(r.index(), RegionIndex(0));
        assert_eq!(heap.directory().free_count(), 3);
    }

    #[test]
    fn new_alloc_region_fails_when_heap_full() {
        let heap = heap();
        for _ in 0..4 {
            assert!(heap.new_alloc_region(AllocRole::Mutator).is_some());
        }
        assert!(heap.new_alloc_region(AllocRole::Mutator).is_none());
    }

    #[test]
    fn retired_empty_region_is_reusable() {
        let heap = heap();
        let r = heap.new_alloc_region(AllocRole::Old).unwrap();
        let index = r.index();
        heap.retire_alloc_region(r, r.free());
        assert_eq!(r.kind(), RegionKind::Free);
        assert_eq!(heap.new_alloc_region(AllocRole::Old).unwrap().index(), index);
    }

    #[test]
    fn desired_plab_words_comes_from_stats() {
        let heap = heap();
        assert_eq!(heap.desired_plab_words(Destination::Young), 32);
        assert_eq!(heap.desired_plab_words(Destination::Old), 8);
    }

    #[test]
    #[should_panic(expected = "no PLAB statistics")]
    fn not_in_cset_has_no_stats() {
        heap().plab_stats(Destination::NotInCSet);
    }

    #[test]
    fn archive_stores_skip_card_table() {
        let heap = heap();
        let archive = heap.alloc_highest_free_region(None).unwrap();
        assert_eq!(archive.index(), RegionIndex(3));
        let old = heap.new_alloc_region(AllocRole::Old).unwrap();

        assert!(!heap.write_ref_field(archive.bottom(), true));
        assert!(!heap.card_table().is_dirty(archive.bottom()));
        assert!(heap.write_ref_field(old.bottom(), false));
        assert!(heap.card_table().is_dirty(old.bottom()));
    }

    #[test]
    fn lock_is_exclusive() {
        let heap = heap();
        let guard = heap.lock();
        assert!(heap.heap_lock.try_lock().is_err());
        drop(guard);
        assert!(heap.heap_lock.try_lock().is_ok());
    }
}
