//! Write-once allocation for archived data.
//!
//! The archive allocator takes regions from the top of the reserved heap
//! downward, each strictly below the lowest region it already holds, so
//! the archive stays contiguous and away from ordinary regions. Inside a
//! region it bump-allocates upward through a window one chunk
//! (`archive_chunk_words`) wide. When a request does not fit the window,
//! or would leave a gap too small to hold a filler object, the rest of the
//! window is filled and allocation moves on to the next chunk, then to a
//! new region.
//!
//! Archive regions are never collected, scanned or marked, and stores
//! into them are not recorded by the card table.

use std::sync::Arc;

use gcheap_core::addr::{align_up, words_to_bytes};
use gcheap_core::{ContractViolation, HeapAddr, MemRange, RegionIndex, HEAP_WORD_SIZE};
use log::{debug, trace};
use smallvec::SmallVec;

use crate::heap::Heap;

/// Address ranges of a completed archive, ascending.
pub type ArchiveRanges = SmallVec<[MemRange; 4]>;

/// Single-session allocator for immutable, never-collected data.
///
/// Allocate with [`ArchiveAllocator::archive_mem_allocate`], then finish
/// with [`ArchiveAllocator::complete_archive`], which consumes the
/// allocator and publishes the ranges it used.
pub struct ArchiveAllocator {
    heap: Arc<Heap>,
    current_region: Option<RegionIndex>,
    /// Regions taken this session, highest address first.
    allocated_regions: Vec<RegionIndex>,
    summary_bytes_used: usize,
    // Allocation window inside the current region.
    bottom: HeapAddr,
    top: HeapAddr,
    max: HeapAddr,
}

impl ArchiveAllocator {
    /// An allocator with no regions yet.
    pub fn new(heap: Arc<Heap>) -> Self {
        Self {
            heap,
            current_region: None,
            allocated_regions: Vec::new(),
            summary_bytes_used: 0,
            bottom: HeapAddr::NULL,
            top: HeapAddr::NULL,
            max: HeapAddr::NULL,
        }
    }

    /// Regions taken so far, highest address first.
    pub fn allocated_regions(&self) -> &[RegionIndex] {
        &self.allocated_regions
    }

    /// Bytes allocated by this allocator, fillers included.
    pub fn used(&self) -> usize {
        self.summary_bytes_used
    }

    /// Forget the bytes already reported, for callers that recompute heap
    /// usage from region state.
    pub fn clear_used(&mut self) {
        self.summary_bytes_used = 0;
    }

    /// Take the highest free region below every region held so far and
    /// start allocating in its lowest chunk. Returns `false` when there is
    /// none.
    fn alloc_new_region(&mut self) -> bool {
        let below = self.allocated_regions.last().copied();
        let Some(region) = self.heap.alloc_highest_free_region(below) else {
            return false;
        };
        self.allocated_regions.push(region.index());
        self.current_region = Some(region.index());
        self.bottom = region.bottom();
        self.top = region.bottom();
        self.max = self.bottom.add_words(self.heap.config().archive_chunk_words);
        trace!("archive region {} taken", region.index());
        true
    }

    /// Allocate `words` words of archive space.
    ///
    /// Returns `None` when no region is left below the archive, or when
    /// the request is larger than an archive chunk.
    pub fn archive_mem_allocate(&mut self, words: usize) -> Option<HeapAddr> {
        debug_assert!(words != 0, "{}", ContractViolation::ZeroSizedAllocation);
        let config = self.heap.config();
        let chunk_words = config.archive_chunk_words;
        let min_fill_words = config.min_fill_words;
        if words > chunk_words {
            return None;
        }
        if self.current_region.is_none() && !self.alloc_new_region() {
            return None;
        }

        let mut old_top = self.top;
        let new_top = old_top.add_words(words);
        let too_small_gap = new_top < self.max && new_top.words_until(self.max) < min_fill_words;
        if new_top > self.max || too_small_gap {
            // Fill the rest of the window and move to the next chunk.
            self.summary_bytes_used += old_top.bytes_until(self.max);
            self.set_top(self.max);
            self.bottom = self.max;
            old_top = self.max;

            let region_end = self.current().end();
            if self.bottom != region_end {
                self.max = self.bottom.add_words(chunk_words);
            } else {
                if !self.alloc_new_region() {
                    return None;
                }
                old_top = self.bottom;
            }
        }

        self.set_top(old_top.add_words(words));
        self.summary_bytes_used += words_to_bytes(words);
        Some(old_top)
    }

    /// Finish the session and return the address ranges it used.
    ///
    /// With a non-zero `end_alignment_bytes`, the archive is first padded
    /// with a filler so its last range ends on that boundary. Ranges are
    /// ascending and adjacent regions are merged. The regions pass to the
    /// directory as committed archive regions; a region with nothing in it
    /// contributes no range and goes back to the free set.
    pub fn complete_archive(
        mut self,
        end_alignment_bytes: usize,
    ) -> Result<ArchiveRanges, ContractViolation> {
        let chunk_bytes = words_to_bytes(self.heap.config().archive_chunk_words);
        if end_alignment_bytes % HEAP_WORD_SIZE != 0
            || end_alignment_bytes >= chunk_bytes
            || (end_alignment_bytes != 0 && !end_alignment_bytes.is_power_of_two())
        {
            return Err(ContractViolation::InvalidEndAlignment {
                alignment: end_alignment_bytes,
            });
        }
        if self.current_region.is_none() {
            return Ok(ArchiveRanges::new());
        }

        if end_alignment_bytes != 0 {
            self.pad_to_alignment(end_alignment_bytes);
        }

        let heap = Arc::clone(&self.heap);
        let mut ranges = ArchiveRanges::new();
        let mut iter = self
            .allocated_regions
            .iter()
            .rev()
            .map(|&i| heap.region(i))
            .filter(|r| !r.is_empty());
        if let Some(lowest) = iter.next() {
            let mut range = lowest.mem_range();
            range.end = lowest.top();
            for region in iter {
                if region.bottom() != range.end {
                    ranges.push(range);
                    range.start = region.bottom();
                }
                range.end = region.top();
            }
            ranges.push(range);
        }

        for &index in &self.allocated_regions {
            let region = heap.region(index);
            heap.directory().return_region(region, region.free());
        }
        debug!(
            "archive complete: {} regions, {} ranges, {} bytes used",
            self.allocated_regions.len(),
            ranges.len(),
            self.summary_bytes_used
        );
        self.allocated_regions.clear();
        self.current_region = None;
        Ok(ranges)
    }

    fn pad_to_alignment(&mut self, end_alignment_bytes: usize) {
        let min_fill_words = self.heap.config().min_fill_words;
        let current_top = self.top;
        let mut new_top = current_top.align_up(end_alignment_bytes);
        let mut fill_words = current_top.words_until(new_top);
        if fill_words == 0 {
            return;
        }
        if fill_words < min_fill_words {
            // Too small for a filler; pad to the following boundary.
            new_top = HeapAddr(align_up(
                current_top.add_words(min_fill_words).as_usize(),
                end_alignment_bytes,
            ));
            fill_words = current_top.words_until(new_top);
        }
        let filler = self.archive_mem_allocate(fill_words);
        debug_assert_eq!(filler, Some(current_top), "end padding left the window");
    }

    fn current(&self) -> &crate::region::HeapRegion {
        match self.current_region {
            Some(index) => self.heap.region(index),
            None => panic!("archive allocator has no current region"),
        }
    }

    fn set_top(&mut self, top: HeapAddr) {
        self.top = top;
        self.current().set_top(top);
    }
}

#[cfg(debug_assertions)]
impl Drop for ArchiveAllocator {
    fn drop(&mut self) {
        if self.current_region.is_some() && !std::thread::panicking() {
            panic!("archive allocator dropped without complete_archive");
        }
    }
}
