//! Heap addresses and byte ranges.
//!
//! The allocator never touches memory directly. It hands out positions
//! inside the reserved heap as [`HeapAddr`] values (byte addresses) and
//! describes spans with [`MemRange`]. Allocation requests are sized in
//! heap words of [`HEAP_WORD_SIZE`] bytes.

use std::fmt;

/// Size of one heap word in bytes.
pub const HEAP_WORD_SIZE: usize = 8;

/// Convert a word count to bytes.
pub const fn words_to_bytes(words: usize) -> usize {
    words * HEAP_WORD_SIZE
}

/// Round `value` up to a multiple of `alignment` (a power of two).
pub const fn align_up(value: usize, alignment: usize) -> usize {
    (value + alignment - 1) & !(alignment - 1)
}

/// A byte address within the reserved heap.
///
/// Addresses handed out by the allocators are always word aligned.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HeapAddr(pub usize);

impl HeapAddr {
    /// The null address. Never inside the reserved heap.
    pub const NULL: HeapAddr = HeapAddr(0);

    /// Raw byte value of this address.
    pub fn as_usize(self) -> usize {
        self.0
    }

    /// The address `words` heap words above this one.
    pub fn add_words(self, words: usize) -> HeapAddr {
        HeapAddr(self.0 + words_to_bytes(words))
    }

    /// The address `words` heap words below this one.
    pub fn sub_words(self, words: usize) -> HeapAddr {
        HeapAddr(self.0 - words_to_bytes(words))
    }

    /// Number of whole words from `self` up to `end`.
    ///
    /// # Panics
    ///
    /// Panics in debug builds if `end < self`.
    pub fn words_until(self, end: HeapAddr) -> usize {
        debug_assert!(end >= self, "words_until: {end} is below {self}");
        (end.0 - self.0) / HEAP_WORD_SIZE
    }

    /// Number of bytes from `self` up to `end`.
    pub fn bytes_until(self, end: HeapAddr) -> usize {
        debug_assert!(end >= self, "bytes_until: {end} is below {self}");
        end.0 - self.0
    }

    /// Round this address up to a multiple of `alignment_bytes`.
    pub fn align_up(self, alignment_bytes: usize) -> HeapAddr {
        HeapAddr(align_up(self.0, alignment_bytes))
    }

    /// Whether this address is a multiple of `alignment_bytes`.
    pub fn is_aligned(self, alignment_bytes: usize) -> bool {
        self.0 % alignment_bytes == 0
    }
}

impl fmt::Display for HeapAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// A half-open byte range `[start, end)` of the heap.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MemRange {
    /// First byte of the range.
    pub start: HeapAddr,
    /// One past the last byte of the range.
    pub end: HeapAddr,
}

impl MemRange {
    /// Create a range. `start` must not be above `end`.
    pub fn new(start: HeapAddr, end: HeapAddr) -> Self {
        debug_assert!(start <= end, "MemRange start {start} above end {end}");
        Self { start, end }
    }

    /// Length of the range in bytes.
    pub fn byte_size(&self) -> usize {
        self.end.0 - self.start.0
    }

    /// Length of the range in heap words.
    pub fn word_size(&self) -> usize {
        self.byte_size() / HEAP_WORD_SIZE
    }

    /// Whether the range covers no bytes.
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Whether `addr` falls inside the range.
    pub fn contains(&self, addr: HeapAddr) -> bool {
        self.start <= addr && addr < self.end
    }

    /// Whether `[addr, addr + words)` lies entirely inside the range.
    pub fn contains_words(&self, addr: HeapAddr, words: usize) -> bool {
        self.start <= addr && addr.add_words(words) <= self.end
    }
}

impl fmt::Display for MemRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}
