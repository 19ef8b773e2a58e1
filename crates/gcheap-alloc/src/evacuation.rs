//! Per-pause evacuation bookkeeping handed to post-pause policy.

use gcheap_core::AllocRole;

/// What the GC allocation regions did during one pause.
///
/// Filled in by [`HeapAllocator::init_gc_alloc_regions`] and
/// [`HeapAllocator::release_gc_alloc_regions`], read by whatever sizes the
/// next pause.
///
/// [`HeapAllocator::init_gc_alloc_regions`]: crate::allocator::HeapAllocator::init_gc_alloc_regions
/// [`HeapAllocator::release_gc_alloc_regions`]: crate::allocator::HeapAllocator::release_gc_alloc_regions
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EvacuationInfo {
    survivor_regions: u32,
    old_regions: u32,
    allocation_regions: u32,
    alloc_regions_used_before: usize,
    bytes_copied: usize,
}

impl EvacuationInfo {
    /// An empty record for a new pause.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record how many regions a GC role used.
    ///
    /// # Panics
    ///
    /// Panics for [`AllocRole::Mutator`], which is not a GC role.
    pub fn set_regions_used(&mut self, role: AllocRole, count: u32) {
        match role {
            AllocRole::Survivor => self.survivor_regions = count,
            AllocRole::Old => self.old_regions = count,
            AllocRole::Mutator => panic!("mutator regions are not tracked per pause"),
        }
    }

    /// Regions used by a GC role during the pause.
    pub fn regions_used(&self, role: AllocRole) -> u32 {
        match role {
            AllocRole::Survivor => self.survivor_regions,
            AllocRole::Old => self.old_regions,
            AllocRole::Mutator => 0,
        }
    }

    /// Record the total number of GC allocation regions used.
    pub fn set_allocation_regions(&mut self, count: u32) {
        self.allocation_regions = count;
    }

    /// Total GC allocation regions used during the pause.
    pub fn allocation_regions(&self) -> u32 {
        self.allocation_regions
    }

    /// Record bytes already in use in a reused retained region.
    pub fn set_alloc_regions_used_before(&mut self, bytes: usize) {
        self.alloc_regions_used_before = bytes;
    }

    /// Bytes that were already in use in reused allocation regions.
    pub fn alloc_regions_used_before(&self) -> usize {
        self.alloc_regions_used_before
    }

    /// Add bytes copied into GC allocation regions.
    pub fn add_bytes_copied(&mut self, bytes: usize) {
        self.bytes_copied += bytes;
    }

    /// Bytes copied into GC allocation regions during the pause.
    pub fn bytes_copied(&self) -> usize {
        self.bytes_copied
    }
}
