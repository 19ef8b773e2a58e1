//! The heap-wide allocator: mutator, survivor and old allocation regions.
//!
//! [`HeapAllocator`] is the capability the pause orchestrator, the mutator
//! and the GC workers program against. Implementors supply storage (the
//! allocation regions per context, the retained old region, the "full"
//! latches); the lifecycle and allocation paths are provided methods, so
//! a context-aware allocator only has to change where state lives.
//!
//! [`DefaultAllocator`] serves the single default allocation context.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use gcheap_core::{
    AllocRole, AllocationContext, ContractViolation, Destination, HeapAddr, RegionIndex,
    RegionKind,
};
use log::{debug, warn};

use crate::alloc_region::{AllocRegion, RegionSlot};
use crate::evacuation::EvacuationInfo;
use crate::heap::{Heap, HeapLockGuard};

/// Allocation regions for every role and context, plus their lifecycle.
///
/// All methods take `&self`; one allocator is shared by the mutator, the
/// orchestrator and every GC worker.
pub trait HeapAllocator: Send + Sync {
    /// The heap this allocator carves regions from.
    fn heap(&self) -> &Heap;

    /// Allocation contexts served by this allocator.
    fn contexts(&self) -> &[AllocationContext];

    /// The mutator allocation region for `ctx`.
    fn mutator_alloc_region(&self, ctx: AllocationContext) -> &AllocRegion;

    /// The survivor allocation region for `ctx`.
    fn survivor_gc_alloc_region(&self, ctx: AllocationContext) -> &AllocRegion;

    /// The old allocation region for `ctx`.
    fn old_gc_alloc_region(&self, ctx: AllocationContext) -> &AllocRegion;

    /// Slot holding the old region kept across the pause boundary.
    fn retained_old_region_slot(&self) -> &RegionSlot;

    /// Latch set once `dest` could not obtain another region this pause.
    fn full_latch(&self, dest: Destination) -> &AtomicBool;

    /// The allocation region serving `dest`.
    ///
    /// # Panics
    ///
    /// Panics for [`Destination::NotInCSet`].
    fn gc_alloc_region(&self, dest: Destination, ctx: AllocationContext) -> &AllocRegion {
        match dest {
            Destination::Young => self.survivor_gc_alloc_region(ctx),
            Destination::Old => self.old_gc_alloc_region(ctx),
            Destination::NotInCSet => panic!("no allocation region for destination {dest}"),
        }
    }

    /// Prepare the mutator regions for allocation.
    ///
    /// No mutator region may be held. A fresh region is acquired eagerly
    /// when one is free; otherwise the first allocation retries.
    fn init_mutator_alloc_region(&self, _lock: &HeapLockGuard<'_>) -> Result<(), ContractViolation> {
        for &ctx in self.contexts() {
            let region = self.mutator_alloc_region(ctx);
            region.init()?;
            if !region.acquire(self.heap()) {
                warn!("no free region for mutator allocation in context {ctx}");
            }
        }
        Ok(())
    }

    /// Retire every mutator region. Holding none is fine.
    fn release_mutator_alloc_region(&self, _lock: &HeapLockGuard<'_>) {
        for &ctx in self.contexts() {
            self.mutator_alloc_region(ctx).release(self.heap());
        }
    }

    /// Bytes used in the mutator regions.
    fn used_in_alloc_regions(&self, _lock: &HeapLockGuard<'_>) -> usize {
        self.contexts()
            .iter()
            .map(|&ctx| self.mutator_alloc_region(ctx).used_in_current(self.heap()))
            .sum()
    }

    /// Mutator allocation. Takes the heap lock for the duration.
    fn attempt_allocation(&self, words: usize, ctx: AllocationContext) -> Option<HeapAddr> {
        let lock = self.heap().lock();
        self.attempt_allocation_locked(&lock, words, ctx)
    }

    /// Mutator allocation for a caller already holding the heap lock.
    fn attempt_allocation_locked(
        &self,
        _lock: &HeapLockGuard<'_>,
        words: usize,
        ctx: AllocationContext,
    ) -> Option<HeapAddr> {
        debug_assert!(words > 0, "{}", ContractViolation::ZeroSizedAllocation);
        self.mutator_alloc_region(ctx).allocate(self.heap(), words)
    }

    /// Open the GC allocation regions for a pause.
    fn init_gc_alloc_regions(&self, info: &mut EvacuationInfo) -> Result<(), ContractViolation> {
        for &ctx in self.contexts() {
            self.survivor_gc_alloc_region(ctx).init()?;
            let old = self.old_gc_alloc_region(ctx);
            old.init()?;
            self.reuse_retained_old_region(info, old, self.retained_old_region_slot());
        }
        for dest in Destination::VALID {
            self.full_latch(dest).store(false, Ordering::Relaxed);
        }
        debug!("gc alloc regions initialised");
        Ok(())
    }

    /// Close the GC allocation regions at the end of a pause.
    ///
    /// Records region counts and copied bytes in `info`. The released old
    /// region is kept as the retained region for the next pause.
    fn release_gc_alloc_regions(&self, info: &mut EvacuationInfo) {
        let mut survivor_count = 0;
        let mut old_count = 0;
        let mut retained = None;
        for &ctx in self.contexts() {
            let survivor = self.survivor_gc_alloc_region(ctx);
            let old = self.old_gc_alloc_region(ctx);
            survivor_count += survivor.count();
            old_count += old.count();
            info.add_bytes_copied(survivor.allocated_bytes() + old.allocated_bytes());

            survivor.release(self.heap());
            if let Some(index) = old.release(self.heap()) {
                // An empty region went back to the free list and cannot be retained.
                if self.heap().region(index).kind() == RegionKind::Old {
                    retained = Some(index);
                }
            }
        }
        info.set_regions_used(AllocRole::Survivor, survivor_count);
        info.set_regions_used(AllocRole::Old, old_count);
        info.set_allocation_regions(survivor_count + old_count);
        self.retained_old_region_slot().store(retained);
        debug!(
            "gc alloc regions released: {survivor_count} survivor, {old_count} old, retained {retained:?}"
        );
    }

    /// Failure-path teardown of the GC allocation regions.
    ///
    /// Held regions go back to the directory without retirement
    /// accounting and the retained region is forgotten.
    fn abandon_gc_alloc_regions(&self) {
        for &ctx in self.contexts() {
            self.survivor_gc_alloc_region(ctx).abandon(self.heap());
            self.old_gc_alloc_region(ctx).abandon(self.heap());
        }
        self.retained_old_region_slot().store(None);
        debug!("gc alloc regions abandoned");
    }

    /// Whether `region` is the old region retained across the pause boundary.
    fn is_retained_old_region(&self, region: RegionIndex) -> bool {
        self.retained_old_region_slot().load() == Some(region)
    }

    /// Resume allocation in the old region kept from the previous pause.
    ///
    /// The region is reused only if it is still an old region that is
    /// neither empty nor full and the directory hands it back; otherwise
    /// `old` acquires fresh regions on demand. The slot is empty afterwards.
    fn reuse_retained_old_region(
        &self,
        info: &mut EvacuationInfo,
        old: &AllocRegion,
        retained: &RegionSlot,
    ) {
        let Some(index) = retained.take() else {
            return;
        };
        let heap = self.heap();
        let region = heap.region(index);
        let reusable = region.kind() == RegionKind::Old
            && !region.is_empty()
            && !region.is_full()
            && heap.directory().reacquire_region(region);
        if !reusable {
            debug!("retained old region {index} not reusable");
            return;
        }
        if let Err(violation) = old.set(region) {
            panic!("{violation}");
        }
        info.set_alloc_regions_used_before(region.used());
        debug!(
            "reusing retained old region {index} with {} bytes used",
            region.used()
        );
    }

    /// Direct allocation in the shared region for `dest` during a pause.
    ///
    /// Once a destination fails to obtain a region it stays full until the
    /// next [`HeapAllocator::init_gc_alloc_regions`].
    fn par_allocate_during_gc(
        &self,
        dest: Destination,
        words: usize,
        ctx: AllocationContext,
    ) -> Option<HeapAddr> {
        debug_assert!(dest.is_valid(), "allocation for destination {dest}");
        debug_assert!(words > 0, "{}", ContractViolation::ZeroSizedAllocation);
        if words > self.heap().config().region_words {
            return None;
        }
        let latch = self.full_latch(dest);
        if latch.load(Ordering::Relaxed) {
            return None;
        }
        let addr = self.gc_alloc_region(dest, ctx).allocate(self.heap(), words);
        if addr.is_none() && !latch.swap(true, Ordering::Relaxed) {
            warn!("{dest} space exhausted during evacuation");
        }
        addr
    }

    /// Whether `dest` is latched full for the rest of the pause.
    fn is_full(&self, dest: Destination) -> bool {
        self.full_latch(dest).load(Ordering::Relaxed)
    }
}

/// Allocator serving the default allocation context.
pub struct DefaultAllocator {
    heap: Arc<Heap>,
    contexts: [AllocationContext; 1],
    mutator: AllocRegion,
    survivor: AllocRegion,
    old: AllocRegion,
    retained_old: RegionSlot,
    full: [AtomicBool; Destination::NUM_VALID],
}

impl DefaultAllocator {
    /// An allocator with empty allocation regions over `heap`.
    pub fn new(heap: Arc<Heap>) -> Self {
        let ctx = AllocationContext::DEFAULT;
        let max_survivor = u32::try_from(heap.config().max_survivor_regions).unwrap_or(u32::MAX);
        Self {
            contexts: [ctx],
            mutator: AllocRegion::new(AllocRole::Mutator, ctx),
            survivor: AllocRegion::with_max_regions(AllocRole::Survivor, ctx, max_survivor),
            old: AllocRegion::new(AllocRole::Old, ctx),
            retained_old: RegionSlot::empty(),
            full: [AtomicBool::new(false), AtomicBool::new(false)],
            heap,
        }
    }

    /// Shared handle to the heap.
    pub fn heap_arc(&self) -> &Arc<Heap> {
        &self.heap
    }
}

impl HeapAllocator for DefaultAllocator {
    fn heap(&self) -> &Heap {
        &self.heap
    }

    fn contexts(&self) -> &[AllocationContext] {
        &self.contexts
    }

    fn mutator_alloc_region(&self, ctx: AllocationContext) -> &AllocRegion {
        debug_assert_eq!(ctx, AllocationContext::DEFAULT);
        &self.mutator
    }

    fn survivor_gc_alloc_region(&self, ctx: AllocationContext) -> &AllocRegion {
        debug_assert_eq!(ctx, AllocationContext::DEFAULT);
        &self.survivor
    }

    fn old_gc_alloc_region(&self, ctx: AllocationContext) -> &AllocRegion {
        debug_assert_eq!(ctx, AllocationContext::DEFAULT);
        &self.old
    }

    fn retained_old_region_slot(&self) -> &RegionSlot {
        &self.retained_old
    }

    fn full_latch(&self, dest: Destination) -> &AtomicBool {
        match dest.index() {
            Some(i) => &self.full[i],
            None => panic!("no full latch for destination {dest}"),
        }
    }
}

/// Build the allocator for `heap`.
pub fn create_allocator(heap: Arc<Heap>) -> Box<dyn HeapAllocator> {
    Box::new(DefaultAllocator::new(heap))
}
