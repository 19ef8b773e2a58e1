//! PLAB statistics sink and adaptive PLAB sizing.
//!
//! Every GC worker flushes its buffers' counters into the heap's
//! [`PlabStats`] for the matching destination when it retires them. After
//! the pause, the orchestrator calls
//! [`PlabStats::adjust_desired_plab_words`] to turn the counters into the
//! PLAB size the next pause should use, then the counters start over.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use log::debug;

/// Percentage of PLAB space the sizing policy aims to lose to waste.
const TARGET_PLAB_WASTE_PCT: f64 = 10.0;

/// Expected ratio of survivor space used at the end of a pause, in percent.
const TARGET_SURVIVOR_RATIO: f64 = 50.0;

/// Weight of the newest sample in the exponentially decaying average.
const PLAB_WEIGHT: f64 = 75.0;

/// Point-in-time copy of [`PlabStats`] counters, in words.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PlabStatsSnapshot {
    /// Words handed out to PLABs.
    pub allocated: usize,
    /// Words lost to retirement tails and alignment padding.
    pub wasted: usize,
    /// Words lost to undone allocations that could not be rolled back.
    pub undo_wasted: usize,
    /// Words still unused in the last buffer of each worker.
    pub unused: usize,
}

/// Shared, lock-free accumulator for one destination's PLAB counters.
pub struct PlabStats {
    allocated: AtomicUsize,
    wasted: AtomicUsize,
    undo_wasted: AtomicUsize,
    unused: AtomicUsize,
    desired_plab_words: AtomicUsize,
    /// Decaying average of sampled PLAB sizes, as `f64` bits.
    filtered_words: AtomicU64,
    min_words: usize,
    max_words: usize,
}

impl PlabStats {
    /// Create a sink whose desired PLAB size starts at `initial_words`
    /// and is kept within `[min_words, max_words]`.
    pub fn new(initial_words: usize, min_words: usize, max_words: usize) -> Self {
        Self {
            allocated: AtomicUsize::new(0),
            wasted: AtomicUsize::new(0),
            undo_wasted: AtomicUsize::new(0),
            unused: AtomicUsize::new(0),
            desired_plab_words: AtomicUsize::new(initial_words),
            filtered_words: AtomicU64::new((initial_words as f64).to_bits()),
            min_words,
            max_words,
        }
    }

    /// Add words handed out to PLABs.
    pub fn add_allocated(&self, words: usize) {
        self.allocated.fetch_add(words, Ordering::Relaxed);
    }

    /// Add words lost to retirement and padding.
    pub fn add_wasted(&self, words: usize) {
        self.wasted.fetch_add(words, Ordering::Relaxed);
    }

    /// Add words lost to undo.
    pub fn add_undo_wasted(&self, words: usize) {
        self.undo_wasted.fetch_add(words, Ordering::Relaxed);
    }

    /// Add words left in a worker's final buffer.
    pub fn add_unused(&self, words: usize) {
        self.unused.fetch_add(words, Ordering::Relaxed);
    }

    /// Current counter values.
    pub fn snapshot(&self) -> PlabStatsSnapshot {
        PlabStatsSnapshot {
            allocated: self.allocated.load(Ordering::Relaxed),
            wasted: self.wasted.load(Ordering::Relaxed),
            undo_wasted: self.undo_wasted.load(Ordering::Relaxed),
            unused: self.unused.load(Ordering::Relaxed),
        }
    }

    /// The PLAB size workers should request, in words.
    pub fn desired_plab_words(&self) -> usize {
        self.desired_plab_words.load(Ordering::Relaxed)
    }

    /// Zero all counters. The desired size is kept.
    pub fn reset(&self) {
        self.allocated.store(0, Ordering::Relaxed);
        self.wasted.store(0, Ordering::Relaxed);
        self.undo_wasted.store(0, Ordering::Relaxed);
        self.unused.store(0, Ordering::Relaxed);
    }

    /// Recompute the desired PLAB size from this pause's counters, then
    /// reset them.
    ///
    /// Aims for the number of refills per worker that keeps the unused
    /// tail of the final buffers near the target waste percentage. Must
    /// not race with workers flushing into this sink.
    pub fn adjust_desired_plab_words(&self, worker_count: usize) {
        let s = self.snapshot();
        if s.allocated == 0 {
            self.reset();
            return;
        }
        let wasted_frac = s.unused as f64 / s.allocated as f64;
        let target_refills =
            ((wasted_frac * TARGET_SURVIVOR_RATIO) / TARGET_PLAB_WASTE_PCT).max(1.0) as usize;
        let used = s.allocated.saturating_sub(s.wasted + s.unused);
        let sample = used as f64 / (target_refills * worker_count.max(1)) as f64;

        let previous = f64::from_bits(self.filtered_words.load(Ordering::Relaxed));
        let filtered = ((100.0 - PLAB_WEIGHT) * previous + PLAB_WEIGHT * sample) / 100.0;
        self.filtered_words
            .store(filtered.to_bits(), Ordering::Relaxed);

        let desired = (filtered as usize).clamp(self.min_words, self.max_words);
        self.desired_plab_words.store(desired, Ordering::Relaxed);
        debug!(
            "plab sizing: allocated {} wasted {} unused {} used {used} -> desired {desired} words",
            s.allocated, s.wasted, s.unused
        );
        self.reset();
    }
}
