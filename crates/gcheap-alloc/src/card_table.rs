//! Card-table post-write barrier.
//!
//! One byte per card of heap. A reference store dirties the card that
//! holds the updated field; whatever scans cards later is outside this
//! crate. Archive regions never get dirtied, see
//! [`Heap::write_ref_field`](crate::heap::Heap::write_ref_field).

use std::sync::atomic::{AtomicU8, Ordering};

use gcheap_core::{HeapAddr, MemRange};

/// Card value after a reference store.
pub const DIRTY_CARD: u8 = 0;

/// Card value with no pending reference stores.
pub const CLEAN_CARD: u8 = 0xff;

/// Byte-per-card table covering the reserved heap.
pub struct CardTable {
    cards: Vec<AtomicU8>,
    covered: MemRange,
    card_shift: u32,
}

impl CardTable {
    /// A clean table covering `covered` with cards of `1 << card_shift` bytes.
    pub fn new(covered: MemRange, card_shift: u32) -> Self {
        let count = covered.byte_size().div_ceil(1 << card_shift);
        Self {
            cards: (0..count).map(|_| AtomicU8::new(CLEAN_CARD)).collect(),
            covered,
            card_shift,
        }
    }

    /// Card size in bytes.
    pub fn card_size(&self) -> usize {
        1 << self.card_shift
    }

    /// Number of cards.
    pub fn len(&self) -> usize {
        self.cards.len()
    }

    /// Whether the table covers nothing.
    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }

    /// Index of the card holding `addr`.
    ///
    /// # Panics
    ///
    /// Panics in debug builds if `addr` is outside the covered range.
    pub fn index_for(&self, addr: HeapAddr) -> usize {
        debug_assert!(
            self.covered.contains(addr),
            "address {addr} outside card table {}",
            self.covered
        );
        self.covered.start.bytes_until(addr) >> self.card_shift
    }

    /// Dirty the card for a reference store into `field`.
    ///
    /// With `release`, the dirtying store is ordered after every earlier
    /// store of the writing thread, so a scanner that sees the dirty card
    /// also sees the new reference.
    pub fn write_ref_field(&self, field: HeapAddr, release: bool) {
        let card = &self.cards[self.index_for(field)];
        if release {
            card.store(DIRTY_CARD, Ordering::Release);
        } else {
            card.store(DIRTY_CARD, Ordering::Relaxed);
        }
    }

    /// Whether the card holding `addr` is dirty.
    pub fn is_dirty(&self, addr: HeapAddr) -> bool {
        self.cards[self.index_for(addr)].load(Ordering::Acquire) == DIRTY_CARD
    }

    /// Number of dirty cards whose range intersects `range`.
    pub fn dirty_cards_in(&self, range: MemRange) -> usize {
        if range.is_empty() {
            return 0;
        }
        let first = self.index_for(range.start);
        let last = self.index_for(range.end.sub_words(1));
        self.cards[first..=last]
            .iter()
            .filter(|c| c.load(Ordering::Acquire) == DIRTY_CARD)
            .count()
    }

    /// Mark every card clean.
    pub fn clear(&self) {
        for card in &self.cards {
            card.store(CLEAN_CARD, Ordering::Relaxed);
        }
    }
}
