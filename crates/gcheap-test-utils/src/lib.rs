//! Test utilities and mock types for gcheap development.
//!
//! Provides a [`TestHeapBuilder`] for small, fast test heaps, a
//! [`RecordingDirectory`] that logs every region hand-off, and
//! [`run_evacuation`], which drives a batch of GC workers over a shared
//! allocator and collects what they allocated.

#![forbid(unsafe_code)]
#![allow(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

use std::sync::{Arc, Mutex, PoisonError};

use crossbeam_channel::{bounded, Sender};

use gcheap_alloc::{
    DefaultParGcAllocator, FreeRegionList, Heap, HeapAllocator, HeapConfig, HeapRegion,
    ParGcAllocator, RegionDirectory,
};
use gcheap_core::{AllocationContext, Destination, HeapAddr, RegionIndex, RegionKind};

/// Builder for small heaps with test-friendly geometry.
///
/// Defaults to 16 regions of 1024 words, which keeps PLABs at 32 words
/// (young) and 8 words (old).
pub struct TestHeapBuilder {
    config: HeapConfig,
}

impl TestHeapBuilder {
    pub fn new() -> Self {
        Self {
            config: HeapConfig::new(1024, 16),
        }
    }

    /// Replace the region geometry.
    ///
    /// Everything but the survivor alignment is rederived from the new
    /// geometry, so call this before the other setters.
    pub fn regions(mut self, region_words: usize, region_count: usize) -> Self {
        let alignment = self.config.survivor_alignment_bytes;
        self.config = HeapConfig::new(region_words, region_count);
        self.config.survivor_alignment_bytes = alignment;
        self
    }

    pub fn survivor_alignment(mut self, bytes: usize) -> Self {
        self.config.survivor_alignment_bytes = bytes;
        self
    }

    /// Set both initial PLAB sizes, widening the clamps to admit them.
    pub fn plab_words(mut self, young: usize, old: usize) -> Self {
        self.config.young_plab_words = young;
        self.config.old_plab_words = old;
        self.config.min_plab_words = self.config.min_plab_words.min(young).min(old);
        self
    }

    pub fn buffer_waste_pct(mut self, pct: usize) -> Self {
        self.config.buffer_waste_pct = pct;
        self
    }

    pub fn max_survivor_regions(mut self, regions: usize) -> Self {
        self.config.max_survivor_regions = regions;
        self
    }

    pub fn archive_chunk_words(mut self, words: usize) -> Self {
        self.config.archive_chunk_words = words;
        self
    }

    pub fn config(&self) -> &HeapConfig {
        &self.config
    }

    /// Build a heap over a fresh [`FreeRegionList`].
    ///
    /// Panics if the configuration is invalid.
    pub fn build(self) -> Arc<Heap> {
        match Heap::new(self.config) {
            Ok(heap) => Arc::new(heap),
            Err(e) => panic!("invalid test heap config: {e}"),
        }
    }

    /// Build a heap and keep a handle on its directory for inspection.
    pub fn build_with_list(self) -> (Arc<Heap>, Arc<FreeRegionList>) {
        let list = Arc::new(FreeRegionList::new(self.config.region_count));
        let heap = self.build_over(Box::new(Arc::clone(&list)));
        (heap, list)
    }

    /// Build a heap over a [`RecordingDirectory`].
    pub fn build_recording(self) -> (Arc<Heap>, Arc<RecordingDirectory>) {
        let recorder = Arc::new(RecordingDirectory::new(self.config.region_count));
        let heap = self.build_over(Box::new(Arc::clone(&recorder)));
        (heap, recorder)
    }

    fn build_over(self, directory: Box<dyn RegionDirectory>) -> Arc<Heap> {
        match Heap::with_directory(self.config, directory) {
            Ok(heap) => Arc::new(heap),
            Err(e) => panic!("invalid test heap config: {e}"),
        }
    }
}

impl Default for TestHeapBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// One call observed by a [`RecordingDirectory`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DirectoryEvent {
    Requested(RegionIndex, RegionKind),
    Returned {
        region: RegionIndex,
        used_bytes: usize,
        unused_tail_bytes: usize,
    },
    Reacquired(RegionIndex),
    Freed(RegionIndex),
}

/// A [`FreeRegionList`] that records every hand-off.
///
/// Failed requests are not recorded.
pub struct RecordingDirectory {
    inner: FreeRegionList,
    events: Mutex<Vec<DirectoryEvent>>,
}

impl RecordingDirectory {
    pub fn new(region_count: usize) -> Self {
        Self {
            inner: FreeRegionList::new(region_count),
            events: Mutex::new(Vec::new()),
        }
    }

    /// Everything recorded so far, in call order.
    pub fn events(&self) -> Vec<DirectoryEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Regions requested minus regions returned.
    pub fn outstanding(&self) -> usize {
        let events = self.events();
        let taken = events
            .iter()
            .filter(|e| matches!(e, DirectoryEvent::Requested(..) | DirectoryEvent::Reacquired(_)))
            .count();
        let given_back = events
            .iter()
            .filter(|e| matches!(e, DirectoryEvent::Returned { .. }))
            .count();
        taken - given_back
    }

    pub fn inner(&self) -> &FreeRegionList {
        &self.inner
    }

    fn record(&self, event: DirectoryEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}

impl RegionDirectory for RecordingDirectory {
    fn request_region(&self, kind: RegionKind) -> Option<RegionIndex> {
        let index = self.inner.request_region(kind)?;
        self.record(DirectoryEvent::Requested(index, kind));
        Some(index)
    }

    fn request_highest_free_region(&self, below: Option<RegionIndex>) -> Option<RegionIndex> {
        let index = self.inner.request_highest_free_region(below)?;
        self.record(DirectoryEvent::Requested(index, RegionKind::Archive));
        Some(index)
    }

    fn return_region(&self, region: &HeapRegion, unused_tail_bytes: usize) {
        self.record(DirectoryEvent::Returned {
            region: region.index(),
            used_bytes: region.used(),
            unused_tail_bytes,
        });
        self.inner.return_region(region, unused_tail_bytes);
    }

    fn reacquire_region(&self, region: &HeapRegion) -> bool {
        let ok = self.inner.reacquire_region(region);
        if ok {
            self.record(DirectoryEvent::Reacquired(region.index()));
        }
        ok
    }

    fn free_region(&self, region: &HeapRegion) {
        self.record(DirectoryEvent::Freed(region.index()));
        self.inner.free_region(region);
    }

    fn free_count(&self) -> usize {
        self.inner.free_count()
    }
}

/// A single object copy a worker is asked to perform.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CopyRequest {
    pub dest: Destination,
    pub words: usize,
}

impl CopyRequest {
    pub fn new(dest: Destination, words: usize) -> Self {
        Self { dest, words }
    }
}

/// Outcome of one [`CopyRequest`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Copied {
    pub worker: usize,
    pub dest: Destination,
    pub words: usize,
    /// `None` if the destination ran out of space.
    pub addr: Option<HeapAddr>,
}

/// Run one GC worker per entry of `work`, each with its own
/// [`DefaultParGcAllocator`] over `allocator`.
///
/// Workers report every allocation over a bounded channel and retire
/// their buffers before exiting. GC allocation regions must already be
/// initialised; releasing them is left to the caller.
pub fn run_evacuation(allocator: &dyn HeapAllocator, work: Vec<Vec<CopyRequest>>) -> Vec<Copied> {
    let (tx, rx) = bounded::<Copied>(64);
    std::thread::scope(|s| {
        for (worker, requests) in work.into_iter().enumerate() {
            let tx = tx.clone();
            s.spawn(move || evacuation_worker(allocator, worker, requests, tx));
        }
        drop(tx);
        rx.iter().collect()
    })
}

fn evacuation_worker(
    allocator: &dyn HeapAllocator,
    worker: usize,
    requests: Vec<CopyRequest>,
    tx: Sender<Copied>,
) {
    let mut par = DefaultParGcAllocator::new(allocator);
    for req in requests {
        let addr = par.allocate(req.dest, req.words, AllocationContext::current());
        let copied = Copied {
            worker,
            dest: req.dest,
            words: req.words,
            addr,
        };
        if tx.send(copied).is_err() {
            break;
        }
    }
    par.retire_alloc_buffers();
}

/// Panics if any two successful copies overlap.
pub fn assert_disjoint(copies: &[Copied]) {
    let mut spans: Vec<(HeapAddr, HeapAddr)> = copies
        .iter()
        .filter_map(|c| c.addr.map(|a| (a, a.add_words(c.words))))
        .collect();
    spans.sort();
    for pair in spans.windows(2) {
        assert!(
            pair[0].1 <= pair[1].0,
            "allocations overlap: [{}, {}) and [{}, {})",
            pair[0].0,
            pair[0].1,
            pair[1].0,
            pair[1].1
        );
    }
}

/// Panics unless every successful copy lies in a region of the kind its
/// destination maps to.
pub fn assert_in_destination(heap: &Heap, copies: &[Copied]) {
    for c in copies {
        let Some(addr) = c.addr else { continue };
        let region = heap
            .region_containing(addr)
            .unwrap_or_else(|| panic!("{addr} is outside the heap"));
        let expected = c.dest.role().map(|r| r.region_kind());
        assert_eq!(
            Some(region.kind()),
            expected,
            "{addr} ({} words, {}) landed in a {} region",
            c.words,
            c.dest,
            region.kind()
        );
    }
}
