//! Archive sessions sharing a heap with ordinary allocation.

use std::sync::Arc;

use gcheap::alloc::{ArchiveAllocator, DefaultAllocator, HeapAllocator};
use gcheap::types::{AllocationContext, HeapAddr, RegionIndex, RegionKind, HEAP_WORD_SIZE};
use gcheap_test_utils::TestHeapBuilder;

const CTX: AllocationContext = AllocationContext::DEFAULT;

#[test]
fn archive_and_mutator_never_share_regions() {
    let heap = TestHeapBuilder::new().regions(1024, 8).build();

    let mut archive = ArchiveAllocator::new(Arc::clone(&heap));
    let archived: Vec<HeapAddr> = (0..15)
        .map(|_| archive.archive_mem_allocate(100).unwrap())
        .collect();
    assert_eq!(archive.allocated_regions(), &[RegionIndex(7), RegionIndex(6)]);
    let ranges = archive.complete_archive(0).unwrap();

    // Region 7 is filled to its end, region 6 only halfway, so the two
    // ranges cannot merge.
    assert_eq!(ranges.len(), 2);
    assert!(ranges[0].end <= ranges[1].start);
    let covered: usize = ranges.iter().map(|r| r.word_size()).sum();
    assert_eq!(covered, 500 + 1024);
    for &obj in &archived {
        assert!(ranges.iter().any(|r| r.contains_words(obj, 100)));
        assert!(heap.is_archive(obj));
    }

    let allocator = DefaultAllocator::new(Arc::clone(&heap));
    allocator.init_mutator_alloc_region(&heap.lock()).unwrap();
    let mut eden = Vec::new();
    while let Some(obj) = allocator.attempt_allocation(100, CTX) {
        eden.push(obj);
    }
    allocator.release_mutator_alloc_region(&heap.lock());
    // Six ordinary regions of ten objects each.
    assert_eq!(eden.len(), 60);
    for &obj in &eden {
        assert!(!heap.is_archive(obj));
        assert!(ranges.iter().all(|r| !r.contains(obj)));
    }
    for index in [6, 7] {
        assert_eq!(heap.region(RegionIndex(index)).kind(), RegionKind::Archive);
    }
}

#[test]
fn stores_into_archive_are_not_recorded() {
    let heap = TestHeapBuilder::new().build();
    let mut archive = ArchiveAllocator::new(Arc::clone(&heap));
    let archived = archive.archive_mem_allocate(64).unwrap();
    archive.complete_archive(0).unwrap();

    let allocator = DefaultAllocator::new(Arc::clone(&heap));
    allocator.init_mutator_alloc_region(&heap.lock()).unwrap();
    let obj = allocator.attempt_allocation(64, CTX).unwrap();
    allocator.release_mutator_alloc_region(&heap.lock());

    assert!(!heap.write_ref_field(archived.add_words(3), true));
    assert!(!heap.card_table().is_dirty(archived.add_words(3)));
    assert!(heap.write_ref_field(obj.add_words(3), true));
    assert!(heap.card_table().is_dirty(obj.add_words(3)));
}

#[test]
fn end_alignment_rounds_last_range() {
    let heap = TestHeapBuilder::new().build();
    let mut archive = ArchiveAllocator::new(Arc::clone(&heap));
    archive.archive_mem_allocate(10).unwrap();
    let ranges = archive.complete_archive(4096).unwrap();
    assert_eq!(ranges.len(), 1);
    assert!(ranges[0].end.is_aligned(4096));
    assert_eq!(ranges[0].byte_size(), 4096);
    assert_eq!(ranges[0].word_size() * HEAP_WORD_SIZE, ranges[0].byte_size());
}

#[test]
fn archive_stops_at_ordinary_regions() {
    let heap = TestHeapBuilder::new().regions(1024, 4).build();
    // Ordinary allocation takes every region before the archive starts.
    let allocator = DefaultAllocator::new(Arc::clone(&heap));
    allocator.init_mutator_alloc_region(&heap.lock()).unwrap();
    for _ in 0..40 {
        allocator.attempt_allocation(100, CTX).unwrap();
    }
    allocator.release_mutator_alloc_region(&heap.lock());
    assert_eq!(heap.directory().free_count(), 0);

    let mut archive = ArchiveAllocator::new(Arc::clone(&heap));
    assert_eq!(archive.archive_mem_allocate(8), None);
    assert!(archive.complete_archive(0).unwrap().is_empty());
}
