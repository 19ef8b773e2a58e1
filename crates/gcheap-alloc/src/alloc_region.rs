//! Allocation regions: the shared bump target of one role.
//!
//! An [`AllocRegion`] holds at most one heap region at a time in a
//! [`RegionSlot`]. Allocation bumps the held region; when it runs out, the
//! region is replaced through a single-winner compare-exchange race:
//!
//! 1. read the slot once into a local,
//! 2. request a fresh region from the directory and allocate in it
//!    before anyone else can see it,
//! 3. try to swing the slot from the observed region to the fresh one.
//!
//! The winner retires the observed region (fills its tail so no late bump
//! can land there, then hands it to the directory). A loser gives its
//! fresh region straight back and retries against whatever was installed.
//! A racer whose request fails while another replacement is in flight
//! waits for that replacement to settle and retries, so running out of
//! regions is only reported once nobody is about to install one.
//! Mutator allocation runs the same code under the heap lock, where the
//! race always has a single participant.

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use gcheap_core::addr::words_to_bytes;
use gcheap_core::{AllocRole, AllocationContext, ContractViolation, HeapAddr, RegionIndex};
use log::{debug, trace};

use crate::heap::Heap;
use crate::region::HeapRegion;

const NO_REGION: u32 = u32::MAX;

/// Atomic, optional region index.
///
/// Readers load the slot once into a local and use that value for the
/// whole operation; a second load may observe a different region.
pub struct RegionSlot(AtomicU32);

impl RegionSlot {
    /// An empty slot.
    pub const fn empty() -> Self {
        Self(AtomicU32::new(NO_REGION))
    }

    /// The region currently in the slot.
    pub fn load(&self) -> Option<RegionIndex> {
        decode(self.0.load(Ordering::Acquire))
    }

    /// Overwrite the slot.
    pub fn store(&self, region: Option<RegionIndex>) {
        self.0.store(encode(region), Ordering::Release);
    }

    /// Empty the slot, returning what it held.
    pub fn take(&self) -> Option<RegionIndex> {
        decode(self.0.swap(NO_REGION, Ordering::AcqRel))
    }

    /// Install `new` if the slot still holds `current`.
    ///
    /// On failure returns the value actually found.
    pub fn compare_exchange(
        &self,
        current: Option<RegionIndex>,
        new: Option<RegionIndex>,
    ) -> Result<(), Option<RegionIndex>> {
        self.0
            .compare_exchange(
                encode(current),
                encode(new),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map(|_| ())
            .map_err(decode)
    }
}

impl Default for RegionSlot {
    fn default() -> Self {
        Self::empty()
    }
}

impl std::fmt::Debug for RegionSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("RegionSlot").field(&self.load()).finish()
    }
}

fn encode(region: Option<RegionIndex>) -> u32 {
    region.map_or(NO_REGION, |r| r.0)
}

fn decode(raw: u32) -> Option<RegionIndex> {
    (raw != NO_REGION).then_some(RegionIndex(raw))
}

/// The current allocation target for one role and context.
pub struct AllocRegion {
    role: AllocRole,
    context: AllocationContext,
    current: RegionSlot,
    /// Regions installed since the last `init`.
    count: AtomicU32,
    /// Replacements between their region request and their install.
    replacing: AtomicU32,
    /// Bumped each time a replacement holding a fresh region settles.
    settled: AtomicU32,
    max_regions: u32,
    /// Bytes already in use in a region reused via [`AllocRegion::set`].
    used_bytes_before: AtomicUsize,
    /// Bytes handed out since the last `init`.
    allocated_bytes: AtomicUsize,
}

impl AllocRegion {
    /// An empty allocation region with no cap on installed regions.
    pub fn new(role: AllocRole, context: AllocationContext) -> Self {
        Self::with_max_regions(role, context, u32::MAX)
    }

    /// An empty allocation region that stops acquiring regions once
    /// `max_regions` have been installed in one phase.
    pub fn with_max_regions(role: AllocRole, context: AllocationContext, max_regions: u32) -> Self {
        Self {
            role,
            context,
            current: RegionSlot::empty(),
            count: AtomicU32::new(0),
            replacing: AtomicU32::new(0),
            settled: AtomicU32::new(0),
            max_regions,
            used_bytes_before: AtomicUsize::new(0),
            allocated_bytes: AtomicUsize::new(0),
        }
    }

    /// The role this region serves.
    pub fn role(&self) -> AllocRole {
        self.role
    }

    /// The allocation context this region serves.
    pub fn context(&self) -> AllocationContext {
        self.context
    }

    /// The region currently held, if any.
    pub fn get(&self) -> Option<RegionIndex> {
        self.current.load()
    }

    /// Regions installed since the last [`AllocRegion::init`].
    pub fn count(&self) -> u32 {
        self.count.load(Ordering::Relaxed)
    }

    /// Bytes that were already in use in a reused region.
    pub fn used_bytes_before(&self) -> usize {
        self.used_bytes_before.load(Ordering::Relaxed)
    }

    /// Bytes allocated through this region since the last `init`.
    pub fn allocated_bytes(&self) -> usize {
        self.allocated_bytes.load(Ordering::Relaxed)
    }

    /// Start a new phase. No region may be held.
    pub fn init(&self) -> Result<(), ContractViolation> {
        if cfg!(debug_assertions) {
            if let Some(region) = self.current.load() {
                return Err(ContractViolation::AllocRegionAlreadyHeld {
                    role: self.role,
                    region,
                });
            }
        }
        self.count.store(0, Ordering::Relaxed);
        self.used_bytes_before.store(0, Ordering::Relaxed);
        self.allocated_bytes.store(0, Ordering::Relaxed);
        Ok(())
    }

    /// Install an already owned, partially used region.
    pub fn set(&self, region: &HeapRegion) -> Result<(), ContractViolation> {
        if let Err(Some(held)) = self.current.compare_exchange(None, Some(region.index())) {
            return Err(ContractViolation::AllocRegionAlreadyHeld {
                role: self.role,
                region: held,
            });
        }
        self.count.fetch_add(1, Ordering::Relaxed);
        self.used_bytes_before
            .store(region.used(), Ordering::Relaxed);
        trace!("{} alloc region set to region {}", self.role, region.index());
        Ok(())
    }

    /// Acquire a fresh region if none is held. Returns whether a region
    /// is held afterwards.
    pub fn acquire(&self, heap: &Heap) -> bool {
        if self.current.load().is_some() {
            return true;
        }
        let Some(fresh) = self.new_region(heap) else {
            return false;
        };
        match self.current.compare_exchange(None, Some(fresh.index())) {
            Ok(()) => {
                self.count.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(_) => {
                heap.directory().return_region(fresh, 0);
                true
            }
        }
    }

    /// Bump the held region without replacing it.
    pub fn attempt_allocation(&self, heap: &Heap, words: usize) -> Option<HeapAddr> {
        let index = self.current.load()?;
        let addr = heap.region(index).par_allocate(words)?;
        self.record(words);
        Some(addr)
    }

    /// Allocate `words` words, replacing the held region when it is
    /// exhausted.
    ///
    /// Returns `None` when the request is larger than a region, when the
    /// directory has no free region, or when the per-phase region cap is
    /// reached.
    pub fn allocate(&self, heap: &Heap, words: usize) -> Option<HeapAddr> {
        if words > heap.config().region_words {
            return None;
        }
        loop {
            let observed = self.current.load();
            if let Some(index) = observed {
                if let Some(addr) = heap.region(index).par_allocate(words) {
                    self.record(words);
                    return Some(addr);
                }
            }

            let generation = self.settled.load(Ordering::Acquire);
            let in_flight = InFlight::enter(&self.replacing);
            let Some(fresh) = self.new_region(heap) else {
                drop(in_flight);
                if self.nothing_settled_since(generation, observed) {
                    return None;
                }
                continue;
            };
            let Some(addr) = fresh.par_allocate(words) else {
                heap.directory().return_region(fresh, 0);
                in_flight.settle(&self.settled);
                return None;
            };
            match self.current.compare_exchange(observed, Some(fresh.index())) {
                Ok(()) => {
                    self.count.fetch_add(1, Ordering::Relaxed);
                    self.record(words);
                    if let Some(old) = observed {
                        retire_filled(heap, heap.region(old));
                    }
                    in_flight.settle(&self.settled);
                    trace!(
                        "{} alloc region replaced {:?} with {}",
                        self.role,
                        observed,
                        fresh.index()
                    );
                    return Some(addr);
                }
                Err(installed) => {
                    // Nobody else has seen the fresh region; undo and give it back.
                    fresh.set_top(fresh.bottom());
                    heap.directory().return_region(fresh, 0);
                    in_flight.settle(&self.settled);
                    trace!(
                        "{} alloc region lost replacement race to {:?}",
                        self.role,
                        installed
                    );
                }
            }
        }
    }

    /// Bytes used in the held region, reading the slot exactly once.
    pub fn used_in_current(&self, heap: &Heap) -> usize {
        match self.current.load() {
            Some(index) => heap.region(index).used(),
            None => 0,
        }
    }

    /// End the phase: hand the held region to the directory without
    /// filling its tail. Returns the released region.
    pub fn release(&self, heap: &Heap) -> Option<RegionIndex> {
        let index = self.current.take()?;
        let region = heap.region(index);
        heap.retire_alloc_region(region, region.free());
        Some(index)
    }

    /// Failure-path teardown: give the held region back with no
    /// retirement accounting.
    pub fn abandon(&self, heap: &Heap) {
        if let Some(index) = self.current.take() {
            heap.directory().return_region(heap.region(index), 0);
            debug!("{} alloc region abandoned region {index}", self.role);
        }
    }

    /// Wait out replacements in flight, then report whether the slot
    /// still holds `observed` and no racer holding a fresh region has
    /// settled since `generation`. Only then is a failed region request
    /// real exhaustion rather than a concurrent install or hand-back.
    fn nothing_settled_since(&self, generation: u32, observed: Option<RegionIndex>) -> bool {
        while self.replacing.load(Ordering::Acquire) > 0 {
            if self.current.load() != observed {
                return false;
            }
            std::thread::yield_now();
        }
        self.settled.load(Ordering::Acquire) == generation && self.current.load() == observed
    }

    fn new_region<'h>(&self, heap: &'h Heap) -> Option<&'h HeapRegion> {
        if self.count() >= self.max_regions {
            return None;
        }
        heap.new_alloc_region(self.role)
    }

    fn record(&self, words: usize) {
        self.allocated_bytes
            .fetch_add(words_to_bytes(words), Ordering::Relaxed);
    }
}

impl std::fmt::Debug for AllocRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AllocRegion")
            .field("role", &self.role)
            .field("context", &self.context)
            .field("current", &self.current)
            .field("count", &self.count())
            .finish()
    }
}

/// Marks one replacement in flight until dropped.
struct InFlight<'a>(&'a AtomicU32);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicU32) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(counter)
    }

    /// Leave after holding a fresh region, publishing the outcome.
    fn settle(self, generation: &AtomicU32) {
        generation.fetch_add(1, Ordering::AcqRel);
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Close an exhausted region and hand it to the directory.
fn retire_filled(heap: &Heap, region: &HeapRegion) {
    let waste = region.fill_remaining();
    heap.retire_alloc_region(region, waste);
}
