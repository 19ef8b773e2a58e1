//! Per-worker evacuation allocation.
//!
//! Each GC worker owns one [`ParGcAllocator`]. It allocates from its
//! private PLAB for the destination first; when that fails it either
//! refills the PLAB from the shared allocation region (small requests) or
//! allocates directly in the shared region (requests large enough that a
//! refill would waste too much of the old buffer).

use gcheap_core::addr::{align_up, words_to_bytes};
use gcheap_core::{
    AllocRole, AllocationContext, ContractViolation, Destination, HeapAddr, HEAP_WORD_SIZE,
};

use crate::allocator::HeapAllocator;
use crate::plab::Plab;

/// A GC worker's allocation front end.
///
/// `'a` is the lifetime of the shared allocator the worker borrows for
/// the pause.
pub trait ParGcAllocator<'a> {
    /// The shared allocator.
    fn allocator(&self) -> &'a dyn HeapAllocator;

    /// The worker's buffer for `dest`.
    fn alloc_buffer(&self, dest: Destination, ctx: AllocationContext) -> &Plab;

    /// The worker's buffer for `dest`, mutably.
    fn alloc_buffer_mut(&mut self, dest: Destination, ctx: AllocationContext) -> &mut Plab;

    /// Survivor alignment in bytes, or 0 when survivors need no alignment
    /// beyond the object alignment.
    fn survivor_alignment_bytes(&self) -> usize;

    /// Allocate `words` words for an object headed to `dest`.
    ///
    /// `None` means the destination has no capacity left; the caller
    /// decides whether to try another destination or fail the evacuation.
    fn allocate(
        &mut self,
        dest: Destination,
        words: usize,
        ctx: AllocationContext,
    ) -> Option<HeapAddr> {
        if let Some(obj) = self.plab_allocate(dest, words, ctx) {
            return Some(obj);
        }
        self.allocate_direct_or_new_plab(dest, words, ctx)
    }

    /// Allocate from the worker's buffer only.
    fn plab_allocate(
        &mut self,
        dest: Destination,
        words: usize,
        ctx: AllocationContext,
    ) -> Option<HeapAddr> {
        let alignment = self.survivor_alignment_bytes();
        let buf = self.alloc_buffer_mut(dest, ctx);
        if alignment > 0 && dest.is_young() {
            buf.allocate_aligned(words, alignment)
        } else {
            buf.allocate(words)
        }
    }

    /// Slow path once the buffer cannot satisfy a request.
    ///
    /// Requests below `buffer_waste_pct` percent of the desired PLAB size
    /// retire the buffer and retry in a fresh one; anything larger goes
    /// straight to the shared region. With survivor alignment in effect,
    /// young carves and direct allocations are rounded up to whole
    /// alignment granules.
    fn allocate_direct_or_new_plab(
        &mut self,
        dest: Destination,
        words: usize,
        ctx: AllocationContext,
    ) -> Option<HeapAddr> {
        let allocator = self.allocator();
        let heap = allocator.heap();
        if words > heap.config().region_words {
            return None;
        }
        // Keep the shared survivor region's top aligned so every carve from
        // it starts on the survivor boundary.
        let alignment = self.survivor_alignment_bytes();
        let granule = if alignment > 0 && dest.is_young() {
            alignment / HEAP_WORD_SIZE
        } else {
            1
        };
        let plab_words = align_up(heap.desired_plab_words(dest), granule);
        if words * 100 < plab_words * heap.config().buffer_waste_pct {
            let buf = self.alloc_buffer_mut(dest, ctx);
            buf.retire();
            let start = allocator.par_allocate_during_gc(dest, plab_words, ctx)?;
            if let Err(violation) = buf.set_buf(start, plab_words) {
                panic!("{violation}");
            }
            self.plab_allocate(dest, words, ctx)
        } else {
            allocator.par_allocate_during_gc(dest, align_up(words, granule), ctx)
        }
    }

    /// Roll back an allocation of `words` words at `obj` for `dest`.
    ///
    /// Only the most recent buffer allocation can be rolled back. A direct
    /// allocation cannot and is recorded as undo waste; in debug builds it
    /// must lie in a region of the destination's role.
    fn undo_allocation(
        &mut self,
        dest: Destination,
        obj: HeapAddr,
        words: usize,
        ctx: AllocationContext,
    ) -> Result<(), ContractViolation> {
        let allocator = self.allocator();
        let buf = self.alloc_buffer_mut(dest, ctx);
        if cfg!(debug_assertions) && !buf.contains(obj) {
            let expected = dest.role().map(AllocRole::region_kind);
            let actual = allocator.heap().region_containing(obj).map(|r| r.kind());
            if expected.is_none() || actual != expected {
                return Err(ContractViolation::UndoOutsideRegionRole { addr: obj });
            }
        }
        buf.undo_allocation(obj, words)
    }

    /// Retire every buffer and flush its counters into the heap's PLAB
    /// statistics. Calling it again is a no-op.
    fn retire_alloc_buffers(&mut self) {
        let allocator = self.allocator();
        for &ctx in allocator.contexts() {
            for dest in Destination::VALID {
                let stats = allocator.heap().plab_stats(dest);
                self.alloc_buffer_mut(dest, ctx).flush_and_retire_stats(stats);
            }
        }
    }

    /// Add this worker's retirement waste and undo waste, in bytes, to
    /// the two accumulators. The two are never mixed.
    fn waste_into(&self, wasted: &mut usize, undo_wasted: &mut usize) {
        for &ctx in self.allocator().contexts() {
            for dest in Destination::VALID {
                let buf = self.alloc_buffer(dest, ctx);
                *wasted += words_to_bytes(buf.waste());
                *undo_wasted += words_to_bytes(buf.undo_waste());
            }
        }
    }

    /// `(wasted, undo_wasted)` bytes since the buffers were last flushed.
    fn waste(&self) -> (usize, usize) {
        let mut wasted = 0;
        let mut undo_wasted = 0;
        self.waste_into(&mut wasted, &mut undo_wasted);
        (wasted, undo_wasted)
    }
}

/// Worker allocator for the default allocation context.
///
/// Dropping it with live buffers is a contract violation; call
/// [`ParGcAllocator::retire_alloc_buffers`] first.
pub struct DefaultParGcAllocator<'a> {
    allocator: &'a dyn HeapAllocator,
    buffers: [Plab; Destination::NUM_VALID],
    survivor_alignment_bytes: usize,
}

impl<'a> DefaultParGcAllocator<'a> {
    /// A worker allocator with retired, empty buffers.
    pub fn new(allocator: &'a dyn HeapAllocator) -> Self {
        Self {
            survivor_alignment_bytes: allocator.heap().config().survivor_alignment_in_effect(),
            allocator,
            buffers: [Plab::new(), Plab::new()],
        }
    }
}

impl<'a> ParGcAllocator<'a> for DefaultParGcAllocator<'a> {
    fn allocator(&self) -> &'a dyn HeapAllocator {
        self.allocator
    }

    fn alloc_buffer(&self, dest: Destination, ctx: AllocationContext) -> &Plab {
        debug_assert_eq!(ctx, AllocationContext::DEFAULT);
        match dest.index() {
            Some(i) => &self.buffers[i],
            None => panic!("no allocation buffer for destination {dest}"),
        }
    }

    fn alloc_buffer_mut(&mut self, dest: Destination, ctx: AllocationContext) -> &mut Plab {
        debug_assert_eq!(ctx, AllocationContext::DEFAULT);
        match dest.index() {
            Some(i) => &mut self.buffers[i],
            None => panic!("no allocation buffer for destination {dest}"),
        }
    }

    fn survivor_alignment_bytes(&self) -> usize {
        self.survivor_alignment_bytes
    }
}

/// Build a worker allocator over `allocator`.
pub fn create_par_allocator<'a>(allocator: &'a dyn HeapAllocator) -> Box<dyn ParGcAllocator<'a> + 'a> {
    Box::new(DefaultParGcAllocator::new(allocator))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::DefaultAllocator;
    use crate::config::HeapConfig;
    use crate::evacuation::EvacuationInfo;
    use crate::heap::Heap;
    use crate::stats::PlabStatsSnapshot;
    use gcheap_core::RegionIndex;
    use std::sync::Arc;

    const CTX: AllocationContext = AllocationContext::DEFAULT;

    fn allocator(config: HeapConfig) -> DefaultAllocator {
        let a = DefaultAllocator::new(Arc::new(Heap::new(config).unwrap()));
        a.init_gc_alloc_regions(&mut EvacuationInfo::new()).unwrap();
        a
    }

    fn region_sized_plabs() -> HeapConfig {
        let mut config = HeapConfig::new(1024, 8);
        config.young_plab_words = 1024;
        config.old_plab_words = 1024;
        config
    }

    #[test]
    fn small_requests_are_served_from_plab() {
        let shared = allocator(HeapConfig::new(1024, 4));
        let mut worker = DefaultParGcAllocator::new(&shared);
        let a = worker.allocate(Destination::Young, 2, CTX).unwrap();
        let b = worker.allocate(Destination::Young, 2, CTX).unwrap();
        assert_eq!(b, a.add_words(2));
        assert!(worker.alloc_buffer(Destination::Young, CTX).contains(a));
        assert_eq!(worker.alloc_buffer(Destination::Young, CTX).word_size(), 32);
        worker.retire_alloc_buffers();
    }

    #[test]
    fn region_sized_plab_scenario() {
        let shared = allocator(region_sized_plabs());
        let mut worker = DefaultParGcAllocator::new(&shared);
        let heap = shared.heap();
        let r0 = heap.region(RegionIndex(0));

        assert_eq!(worker.allocate(Destination::Young, 100, CTX), Some(r0.bottom()));
        assert_eq!(
            worker.allocate(Destination::Young, 100, CTX),
            Some(r0.bottom().add_words(100))
        );
        let big = worker.allocate(Destination::Young, 900, CTX).unwrap();
        assert_eq!(big, heap.region(RegionIndex(1)).bottom());
        assert_eq!(
            worker.alloc_buffer(Destination::Young, CTX).words_remaining(),
            824
        );

        worker.retire_alloc_buffers();
        assert_eq!(
            heap.plab_stats(Destination::Young).snapshot(),
            PlabStatsSnapshot {
                allocated: 1024,
                wasted: 0,
                undo_wasted: 0,
                unused: 824,
            }
        );
    }

    #[test]
    fn generous_waste_threshold_refills_region_sized_plab() {
        let mut config = region_sized_plabs();
        config.buffer_waste_pct = 100;
        let shared = allocator(config);
        let mut worker = DefaultParGcAllocator::new(&shared);
        let heap = shared.heap();

        worker.allocate(Destination::Young, 100, CTX).unwrap();
        worker.allocate(Destination::Young, 100, CTX).unwrap();
        // 900 words is under the whole desired PLAB size, so the buffer is
        // retired with its 824 spare words and replaced by region 1.
        let big = worker.allocate(Destination::Young, 900, CTX).unwrap();
        assert_eq!(big, heap.region(RegionIndex(1)).bottom());
        assert!(worker.alloc_buffer(Destination::Young, CTX).contains(big));
        assert_eq!(worker.waste(), (824 * 8, 0));

        worker.retire_alloc_buffers();
        let stats = heap.plab_stats(Destination::Young).snapshot();
        assert_eq!(stats.allocated, 2048);
        assert_eq!(stats.wasted, 824);
        assert_eq!(stats.unused, 124);
    }

    #[test]
    fn request_larger_than_a_region_fails_without_latching() {
        let shared = allocator(HeapConfig::new(1024, 4));
        let mut worker = DefaultParGcAllocator::new(&shared);
        for words in [1025, usize::MAX / 64, usize::MAX] {
            assert_eq!(worker.allocate(Destination::Old, words, CTX), None);
            assert_eq!(worker.allocate(Destination::Young, words, CTX), None);
        }
        assert!(!shared.is_full(Destination::Old));
        assert!(!shared.is_full(Destination::Young));
        assert!(worker.allocate(Destination::Old, 8, CTX).is_some());
        worker.retire_alloc_buffers();
    }

    #[test]
    fn refill_retires_old_buffer_as_waste() {
        let shared = allocator(HeapConfig::new(1024, 4));
        let mut worker = DefaultParGcAllocator::new(&shared);
        // 32-word young PLABs: 3-word requests refill, ten of them leave 2 words.
        for _ in 0..10 {
            worker.allocate(Destination::Young, 3, CTX).unwrap();
        }
        assert_eq!(worker.waste(), (0, 0));
        worker.allocate(Destination::Young, 3, CTX).unwrap();
        assert_eq!(worker.waste(), (2 * 8, 0));
        worker.retire_alloc_buffers();
        assert_eq!(worker.waste(), (0, 0));
    }

    #[test]
    fn survivor_allocations_are_aligned() {
        let mut config = HeapConfig::new(1024, 8);
        config.survivor_alignment_bytes = 64;
        let shared = allocator(config);
        let mut worker = DefaultParGcAllocator::new(&shared);
        assert_eq!(worker.survivor_alignment_bytes(), 64);
        for words in [1, 3, 2, 5, 1, 7] {
            let a = worker.allocate(Destination::Young, words, CTX).unwrap();
            assert!(a.is_aligned(64), "{a} not aligned");
        }
        let old = worker.allocate(Destination::Old, 1, CTX).unwrap();
        let next = worker.allocate(Destination::Old, 1, CTX).unwrap();
        assert_eq!(next, old.add_words(1));
        worker.retire_alloc_buffers();
        assert!(shared.heap().plab_stats(Destination::Young).snapshot().wasted > 0);
    }

    #[test]
    fn undo_then_allocate_returns_same_address() {
        let shared = allocator(HeapConfig::new(1024, 4));
        let mut worker = DefaultParGcAllocator::new(&shared);
        let a = worker.allocate(Destination::Young, 3, CTX).unwrap();
        worker.undo_allocation(Destination::Young, a, 3, CTX).unwrap();
        assert_eq!(worker.allocate(Destination::Young, 3, CTX), Some(a));
        worker.retire_alloc_buffers();
    }

    #[test]
    fn undo_of_direct_allocation_is_undo_waste() {
        let shared = allocator(HeapConfig::new(1024, 4));
        let mut worker = DefaultParGcAllocator::new(&shared);
        let big = worker.allocate(Destination::Old, 500, CTX).unwrap();
        assert!(!worker.alloc_buffer(Destination::Old, CTX).contains(big));
        worker.undo_allocation(Destination::Old, big, 500, CTX).unwrap();
        assert_eq!(worker.waste(), (0, 500 * 8));
        worker.retire_alloc_buffers();
        assert_eq!(
            shared.heap().plab_stats(Destination::Old).snapshot().undo_wasted,
            500
        );
    }

    #[test]
    fn undo_in_wrong_role_region_is_rejected() {
        let shared = allocator(HeapConfig::new(1024, 4));
        let mut worker = DefaultParGcAllocator::new(&shared);
        let survivor = worker.allocate(Destination::Young, 500, CTX).unwrap();
        if cfg!(debug_assertions) {
            assert_eq!(
                worker.undo_allocation(Destination::Old, survivor, 500, CTX),
                Err(ContractViolation::UndoOutsideRegionRole { addr: survivor })
            );
        }
        worker.retire_alloc_buffers();
    }

    #[test]
    fn double_retire_does_not_double_count() {
        let shared = allocator(HeapConfig::new(1024, 4));
        let mut worker = DefaultParGcAllocator::new(&shared);
        worker.allocate(Destination::Young, 2, CTX).unwrap();
        worker.retire_alloc_buffers();
        let once = shared.heap().plab_stats(Destination::Young).snapshot();
        worker.retire_alloc_buffers();
        assert_eq!(shared.heap().plab_stats(Destination::Young).snapshot(), once);
        assert_eq!(once.allocated, 32);
        assert_eq!(once.unused, 30);
    }

    #[test]
    fn exhausted_destination_returns_none() {
        let shared = allocator(HeapConfig::new(1024, 1));
        let mut worker = DefaultParGcAllocator::new(&shared);
        assert!(worker.allocate(Destination::Old, 1000, CTX).is_some());
        assert_eq!(worker.allocate(Destination::Old, 1000, CTX), None);
        assert_eq!(worker.allocate(Destination::Young, 1, CTX), None);
        worker.retire_alloc_buffers();
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "has not been retired")]
    fn dropping_worker_with_live_buffers_panics() {
        let shared = allocator(HeapConfig::new(1024, 4));
        let mut worker = DefaultParGcAllocator::new(&shared);
        worker.allocate(Destination::Young, 1, CTX).unwrap();
    }

    #[test]
    fn boxed_worker_allocator() {
        let shared = allocator(HeapConfig::new(1024, 4));
        let mut worker = create_par_allocator(&shared);
        assert!(worker.allocate(Destination::Young, 4, CTX).is_some());
        worker.retire_alloc_buffers();
    }

    #[test]
    fn workers_on_threads_never_overlap() {
        let shared = allocator(HeapConfig::new(1024, 64));
        let mut all: Vec<(HeapAddr, usize)> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..4)
                .map(|t| {
                    let shared = &shared;
                    s.spawn(move || {
                        let mut worker = DefaultParGcAllocator::new(shared);
                        let mut out = Vec::new();
                        for i in 0..300 {
                            let words = 1 + (i * 7 + t) % 40;
                            let dest = if i % 3 == 0 {
                                Destination::Old
                            } else {
                                Destination::Young
                            };
                            out.push((worker.allocate(dest, words, CTX).unwrap(), words));
                        }
                        worker.retire_alloc_buffers();
                        out
                    })
                })
                .collect();
            handles.into_iter().flat_map(|h| h.join().unwrap()).collect()
        });
        all.sort();
        for pair in all.windows(2) {
            assert!(pair[0].0.add_words(pair[0].1) <= pair[1].0);
        }
    }
}
