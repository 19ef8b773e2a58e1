//! Promotion-local allocation buffers.
//!
//! A [`Plab`] is a GC worker's private bump range, carved out of a shared
//! allocation region. Workers allocate from it without any
//! synchronisation; the only shared state it touches is the
//! [`PlabStats`] sink it flushes into when retired.
//!
//! Every buffer that was pointed at memory must be retired before it is
//! re-pointed or dropped. Debug builds enforce this at drop time.

use gcheap_core::{ContractViolation, HeapAddr};

use crate::stats::PlabStats;

/// A worker-private bump buffer.
///
/// `bottom <= top <= end` always holds. A retired buffer covers no memory
/// and satisfies no allocation until [`Plab::set_buf`] points it somewhere
/// again. Counters are in words and accumulate across buffers until
/// [`Plab::flush_and_retire_stats`] hands them to the sink.
#[derive(Debug)]
pub struct Plab {
    word_size: usize,
    bottom: HeapAddr,
    top: HeapAddr,
    end: HeapAddr,
    allocated: usize,
    wasted: usize,
    undo_wasted: usize,
    retired: bool,
}

impl Plab {
    /// An empty, retired buffer.
    pub fn new() -> Self {
        Self {
            word_size: 0,
            bottom: HeapAddr::NULL,
            top: HeapAddr::NULL,
            end: HeapAddr::NULL,
            allocated: 0,
            wasted: 0,
            undo_wasted: 0,
            retired: true,
        }
    }

    /// Point the buffer at `[buf, buf + words)`.
    ///
    /// The buffer must be retired.
    pub fn set_buf(&mut self, buf: HeapAddr, words: usize) -> Result<(), ContractViolation> {
        if cfg!(debug_assertions) && !self.retired {
            return Err(ContractViolation::BufferNotRetired);
        }
        self.word_size = words;
        self.bottom = buf;
        self.top = buf;
        self.end = buf.add_words(words);
        self.allocated += words;
        self.retired = false;
        Ok(())
    }

    /// Bump-allocate `words` words. Succeeds iff they fit below `end`.
    pub fn allocate(&mut self, words: usize) -> Option<HeapAddr> {
        if self.words_remaining() < words {
            return None;
        }
        let obj = self.top;
        self.top = obj.add_words(words);
        Some(obj)
    }

    /// Allocate `words` words starting at an `alignment_bytes` boundary.
    ///
    /// The padding skipped to reach the boundary counts as waste. Nothing
    /// changes if the padded request does not fit.
    pub fn allocate_aligned(&mut self, words: usize, alignment_bytes: usize) -> Option<HeapAddr> {
        let aligned = self.top.align_up(alignment_bytes);
        if aligned > self.end || aligned.words_until(self.end) < words {
            return None;
        }
        self.wasted += self.top.words_until(aligned);
        self.top = aligned;
        self.allocate(words)
    }

    /// Roll back the allocation of `words` words at `obj`.
    ///
    /// Inside the buffer only the most recent allocation can be undone.
    /// An allocation outside the buffer (made directly in a shared region)
    /// cannot be reclaimed and is counted as undo waste.
    pub fn undo_allocation(&mut self, obj: HeapAddr, words: usize) -> Result<(), ContractViolation> {
        if self.contains(obj) {
            if cfg!(debug_assertions) && self.top.sub_words(words) != obj {
                return Err(ContractViolation::UndoNotAtFrontier {
                    addr: obj,
                    words,
                    top: self.top,
                });
            }
            self.top = obj;
        } else {
            self.undo_wasted += words;
        }
        Ok(())
    }

    /// Whether `addr` lies inside the current buffer.
    pub fn contains(&self, addr: HeapAddr) -> bool {
        self.bottom <= addr && addr < self.end
    }

    /// Words left between `top` and `end`.
    pub fn words_remaining(&self) -> usize {
        self.top.words_until(self.end)
    }

    /// Size of the current buffer in words.
    pub fn word_size(&self) -> usize {
        self.word_size
    }

    /// Current bump frontier.
    pub fn top(&self) -> HeapAddr {
        self.top
    }

    /// Whether the buffer is retired.
    pub fn is_retired(&self) -> bool {
        self.retired
    }

    /// Words lost to retirement tails and alignment padding.
    pub fn waste(&self) -> usize {
        self.wasted
    }

    /// Words lost to undo of allocations outside the buffer.
    pub fn undo_waste(&self) -> usize {
        self.undo_wasted
    }

    /// Words handed to this buffer since the last flush.
    pub fn allocated(&self) -> usize {
        self.allocated
    }

    /// Retire the buffer, counting its unused tail as waste.
    ///
    /// Retiring an already retired buffer changes nothing.
    pub fn retire(&mut self) {
        self.wasted += self.retire_internal();
    }

    /// Retire the buffer and move every counter into `stats`.
    ///
    /// The unused tail of the final buffer is reported as `unused`, not
    /// `wasted`: it says the buffer was too large, not that it was lost.
    /// Counters are zeroed, so a second flush adds nothing.
    pub fn flush_and_retire_stats(&mut self, stats: &PlabStats) {
        let unused = self.retire_internal();
        stats.add_allocated(self.allocated);
        stats.add_wasted(self.wasted);
        stats.add_undo_wasted(self.undo_wasted);
        stats.add_unused(unused);
        self.allocated = 0;
        self.wasted = 0;
        self.undo_wasted = 0;
    }

    fn retire_internal(&mut self) -> usize {
        if self.retired {
            return 0;
        }
        let tail = self.words_remaining();
        self.bottom = self.end;
        self.top = self.end;
        self.retired = true;
        tail
    }
}

impl Default for Plab {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(debug_assertions)]
impl Drop for Plab {
    fn drop(&mut self) {
        if !self.retired && !std::thread::panicking() {
            panic!("{}", ContractViolation::BufferNotRetired);
        }
    }
}
