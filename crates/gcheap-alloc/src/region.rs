//! Heap regions and the table that lays them out.
//!
//! A [`HeapRegion`] is a fixed-size, contiguous span of the reserved heap
//! with an atomic bump pointer. A [`RegionTable`] creates every region up
//! front at consecutive addresses and resolves indices and addresses to
//! regions in O(1). Which region is free and who owns it is tracked
//! elsewhere, by the [`RegionDirectory`](crate::directory::RegionDirectory).

use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

use gcheap_core::addr::words_to_bytes;
use gcheap_core::{HeapAddr, MemRange, RegionIndex, RegionKind, HEAP_WORD_SIZE};

use crate::config::HeapConfig;

/// A single fixed-size region with bump allocation.
///
/// `top` only moves forward while the region is an allocation target, and
/// is moved with compare-exchange so several GC workers may bump the same
/// region at once. `bottom <= top <= end` always holds.
pub struct HeapRegion {
    index: RegionIndex,
    bottom: HeapAddr,
    end: HeapAddr,
    /// Bump pointer: next free byte.
    top: AtomicUsize,
    /// Current [`RegionKind`], stored as its `u8` discriminant.
    kind: AtomicU8,
}

impl HeapRegion {
    /// Create an empty, free region of `words` words starting at `bottom`.
    pub fn new(index: RegionIndex, bottom: HeapAddr, words: usize) -> Self {
        Self {
            index,
            bottom,
            end: bottom.add_words(words),
            top: AtomicUsize::new(bottom.as_usize()),
            kind: AtomicU8::new(RegionKind::Free as u8),
        }
    }

    /// Index of this region in the heap.
    pub fn index(&self) -> RegionIndex {
        self.index
    }

    /// First byte of the region.
    pub fn bottom(&self) -> HeapAddr {
        self.bottom
    }

    /// One past the last byte of the region.
    pub fn end(&self) -> HeapAddr {
        self.end
    }

    /// Current bump pointer.
    pub fn top(&self) -> HeapAddr {
        HeapAddr(self.top.load(Ordering::Acquire))
    }

    /// Move the bump pointer. Only for single-owner users (archive
    /// allocation, reclamation); concurrent allocators go through
    /// [`HeapRegion::par_allocate`].
    pub fn set_top(&self, top: HeapAddr) {
        debug_assert!(
            self.bottom <= top && top <= self.end,
            "set_top {top} outside region {}",
            self.index
        );
        self.top.store(top.as_usize(), Ordering::Release);
    }

    /// What the region is used for.
    pub fn kind(&self) -> RegionKind {
        RegionKind::from_u8(self.kind.load(Ordering::Acquire))
    }

    /// Retag the region.
    pub fn set_kind(&self, kind: RegionKind) {
        self.kind.store(kind as u8, Ordering::Release);
    }

    /// Whether the region holds archived data.
    pub fn is_archive(&self) -> bool {
        self.kind() == RegionKind::Archive
    }

    /// Bytes allocated so far.
    pub fn used(&self) -> usize {
        self.bottom.bytes_until(self.top())
    }

    /// Bytes still free above `top`.
    pub fn free(&self) -> usize {
        self.top().bytes_until(self.end)
    }

    /// Capacity in words.
    pub fn capacity_words(&self) -> usize {
        self.bottom.words_until(self.end)
    }

    /// Whether nothing has been allocated.
    pub fn is_empty(&self) -> bool {
        self.top() == self.bottom
    }

    /// Whether the bump pointer has reached the end.
    pub fn is_full(&self) -> bool {
        self.top() == self.end
    }

    /// Whether `addr` lies inside this region.
    pub fn contains(&self, addr: HeapAddr) -> bool {
        self.bottom <= addr && addr < self.end
    }

    /// The whole region as a byte range.
    pub fn mem_range(&self) -> MemRange {
        MemRange::new(self.bottom, self.end)
    }

    /// Bump-allocate `words` words, racing other allocators.
    ///
    /// Returns the start of the allocation, or `None` when the remaining
    /// space is too small. Never spins on a full region.
    pub fn par_allocate(&self, words: usize) -> Option<HeapAddr> {
        let bytes = words_to_bytes(words);
        let end = self.end.as_usize();
        let mut current = self.top.load(Ordering::Acquire);
        loop {
            let new_top = current.checked_add(bytes)?;
            if new_top > end {
                return None;
            }
            match self
                .top
                .compare_exchange_weak(current, new_top, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return Some(HeapAddr(current)),
                Err(observed) => current = observed,
            }
        }
    }

    /// Close the region to further allocation by moving `top` to `end`.
    ///
    /// Returns the number of bytes that were still free. Any bump racing
    /// with this call either lands before it (and is counted as used) or
    /// fails.
    pub fn fill_remaining(&self) -> usize {
        let previous = self.top.swap(self.end.as_usize(), Ordering::AcqRel);
        self.end.as_usize() - previous
    }

    /// Return the region to its pristine free state.
    pub fn reset(&self) {
        self.top.store(self.bottom.as_usize(), Ordering::Release);
        self.set_kind(RegionKind::Free);
    }
}

impl std::fmt::Debug for HeapRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeapRegion")
            .field("index", &self.index)
            .field("bottom", &self.bottom)
            .field("top", &self.top())
            .field("end", &self.end)
            .field("kind", &self.kind())
            .finish()
    }
}

/// Every region of the reserved heap, at consecutive addresses.
///
/// The table is built once and never grows; region `n` covers
/// `[base + n * region_bytes, base + (n + 1) * region_bytes)`.
pub struct RegionTable {
    regions: Vec<HeapRegion>,
    base: HeapAddr,
    region_words: usize,
}

impl RegionTable {
    /// Lay out `config.region_count` regions starting at `config.heap_base`.
    pub fn new(config: &HeapConfig) -> Self {
        let mut regions = Vec::with_capacity(config.region_count);
        for i in 0..config.region_count {
            let bottom = HeapAddr(config.heap_base.as_usize() + i * config.region_bytes());
            regions.push(HeapRegion::new(
                RegionIndex(i as u32),
                bottom,
                config.region_words,
            ));
        }
        Self {
            regions,
            base: config.heap_base,
            region_words: config.region_words,
        }
    }

    /// The region with the given index.
    ///
    /// # Panics
    ///
    /// Panics if `index` is outside the table.
    pub fn get(&self, index: RegionIndex) -> &HeapRegion {
        &self.regions[index.as_usize()]
    }

    /// The region containing `addr`, if `addr` is inside the reserved heap.
    pub fn region_containing(&self, addr: HeapAddr) -> Option<&HeapRegion> {
        if addr < self.base {
            return None;
        }
        let offset = self.base.bytes_until(addr);
        self.regions
            .get(offset / (self.region_words * HEAP_WORD_SIZE))
    }

    /// Number of regions.
    pub fn len(&self) -> usize {
        self.regions.len()
    }

    /// Whether the table has no regions (never true for a validated config).
    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// Words per region.
    pub fn region_words(&self) -> usize {
        self.region_words
    }

    /// The whole reserved heap as a byte range.
    pub fn reserved(&self) -> MemRange {
        MemRange::new(
            self.base,
            self.base.add_words(self.region_words * self.regions.len()),
        )
    }

    /// Iterate over all regions in address order.
    pub fn iter(&self) -> impl Iterator<Item = &HeapRegion> {
        self.regions.iter()
    }

    /// Bytes used across all regions of the given kind.
    pub fn used_bytes(&self, kind: RegionKind) -> usize {
        self.regions
            .iter()
            .filter(|r| r.kind() == kind)
            .map(|r| r.used())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region(words: usize) -> HeapRegion {
        HeapRegion::new(RegionIndex(0), HeapAddr(0x10000), words)
    }

    #[test]
    fn region_sequential_alloc() {
        let r = region(1024);
        let a = r.par_allocate(100).unwrap();
        let b = r.par_allocate(200).unwrap();
        assert_eq!(a, HeapAddr(0x10000));
        assert_eq!(b, a.add_words(100));
        assert_eq!(r.used(), 300 * HEAP_WORD_SIZE);
    }

    #[test]
    fn region_alloc_fails_when_full() {
        let r = region(1024);
        assert!(r.par_allocate(1024).is_some());
        assert!(r.is_full());
        assert!(r.par_allocate(1).is_none());
    }

    #[test]
    fn exactly_region_size_alloc_succeeds() {
        let r = region(1024);
        assert_eq!(r.par_allocate(1024), Some(r.bottom()));
    }

    #[test]
    fn oversized_alloc_returns_none_not_panic() {
        let r = region(1024);
        assert!(r.par_allocate(1025).is_none());
        assert!(r.par_allocate(usize::MAX / 8).is_none());
        assert!(r.is_empty());
    }

    #[test]
    fn fill_remaining_closes_region() {
        let r = region(1024);
        r.par_allocate(24).unwrap();
        assert_eq!(r.fill_remaining(), 1000 * HEAP_WORD_SIZE);
        assert!(r.is_full());
        assert!(r.par_allocate(1).is_none());
        assert_eq!(r.fill_remaining(), 0);
    }

    #[test]
    fn reset_allows_reuse() {
        let r = region(1024);
        r.set_kind(RegionKind::Old);
        r.par_allocate(512).unwrap();
        r.reset();
        assert!(r.is_empty());
        assert_eq!(r.kind(), RegionKind::Free);
        assert_eq!(r.par_allocate(10), Some(r.bottom()));
    }

    #[test]
    fn concurrent_bumps_are_disjoint() {
        let r = region(4096);
        let mut all: Vec<HeapAddr> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    s.spawn(|| {
                        let mut mine = Vec::new();
                        while let Some(a) = r.par_allocate(4) {
                            mine.push(a);
                        }
                        mine
                    })
                })
                .collect();
            handles
                .into_iter()
                .flat_map(|h| h.join().unwrap())
                .collect()
        });
        all.sort();
        assert_eq!(all.len(), 1024);
        for pair in all.windows(2) {
            assert_eq!(pair[0].add_words(4), pair[1]);
        }
    }

    #[test]
    fn table_lays_out_consecutive_regions() {
        let config = HeapConfig::new(1024, 4);
        let table = RegionTable::new(&config);
        assert_eq!(table.len(), 4);
        for (i, r) in table.iter().enumerate() {
            assert_eq!(r.index(), RegionIndex(i as u32));
            assert_eq!(
                r.bottom(),
                HeapAddr(config.heap_base.as_usize() + i * config.region_bytes())
            );
            assert_eq!(r.capacity_words(), 1024);
        }
        assert_eq!(table.reserved().byte_size(), config.heap_bytes());
    }

    #[test]
    fn region_containing_resolves_addresses() {
        let config = HeapConfig::new(1024, 4);
        let table = RegionTable::new(&config);
        let r2 = table.get(RegionIndex(2));
        assert_eq!(
            table.region_containing(r2.bottom().add_words(5)).map(|r| r.index()),
            Some(RegionIndex(2))
        );
        assert!(table.region_containing(HeapAddr(8)).is_none());
        assert!(table.region_containing(table.reserved().end).is_none());
    }

    #[test]
    fn used_bytes_by_kind() {
        let config = HeapConfig::new(1024, 4);
        let table = RegionTable::new(&config);
        table.get(RegionIndex(0)).set_kind(RegionKind::Old);
        table.get(RegionIndex(0)).par_allocate(10).unwrap();
        table.get(RegionIndex(3)).set_kind(RegionKind::Old);
        table.get(RegionIndex(3)).par_allocate(6).unwrap();
        assert_eq!(table.used_bytes(RegionKind::Old), 16 * HEAP_WORD_SIZE);
        assert_eq!(table.used_bytes(RegionKind::Eden), 0);
    }
}
