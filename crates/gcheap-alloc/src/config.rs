//! Heap configuration parameters.

use gcheap_core::addr::{words_to_bytes, HEAP_WORD_SIZE};
use gcheap_core::{ConfigError, HeapAddr};

/// Configuration for the reserved heap and its allocators.
///
/// Controls region geometry, PLAB sizing, alignment, and the archive
/// allocator's window. Checked by [`HeapConfig::validate`] when the heap
/// is built; immutable afterwards.
#[derive(Clone, Debug)]
pub struct HeapConfig {
    /// Size of each region in heap words.
    ///
    /// Default: 131_072 (1 MiB). Must be a power of two and at least 1024.
    pub region_words: usize,

    /// Number of regions in the reserved heap.
    ///
    /// Default: 64.
    pub region_count: usize,

    /// Byte address of region 0. Must be non-null and region aligned.
    pub heap_base: HeapAddr,

    /// Baseline alignment of every object, in bytes.
    pub object_alignment_bytes: usize,

    /// Alignment of objects copied into survivor space, in bytes.
    ///
    /// Must be at least `object_alignment_bytes`. When equal, survivor
    /// alignment is switched off.
    pub survivor_alignment_bytes: usize,

    /// Initial desired size of survivor PLABs, in words.
    pub young_plab_words: usize,

    /// Initial desired size of old-generation PLABs, in words.
    pub old_plab_words: usize,

    /// Lower clamp for adaptive PLAB sizing, in words.
    pub min_plab_words: usize,

    /// Upper clamp for adaptive PLAB sizing, in words. Never above a region.
    pub max_plab_words: usize,

    /// Percentage of a PLAB that may be wasted when refilling it.
    ///
    /// A request smaller than `plab_words * buffer_waste_pct / 100`
    /// retires the current PLAB and starts a new one; larger requests
    /// are allocated directly in the shared region.
    pub buffer_waste_pct: usize,

    /// Maximum survivor regions a single pause may fill.
    pub max_survivor_regions: usize,

    /// Size of the archive allocator's window inside a region, in words.
    ///
    /// Must divide `region_words`.
    pub archive_chunk_words: usize,

    /// Smallest gap, in words, that a filler object can cover.
    pub min_fill_words: usize,

    /// log2 of the card size in bytes.
    pub card_shift: u32,
}

impl HeapConfig {
    /// Default region size: 1 MiB / 8 bytes = 128K words.
    pub const DEFAULT_REGION_WORDS: usize = 131_072;

    /// Default region count.
    pub const DEFAULT_REGION_COUNT: usize = 64;

    /// Default heap base address.
    pub const DEFAULT_HEAP_BASE: HeapAddr = HeapAddr(0x1000_0000);

    /// Smallest permitted region size in words.
    pub const MIN_REGION_WORDS: usize = 1024;

    /// Create a config for `region_count` regions of `region_words` words.
    ///
    /// PLAB and archive sizes are derived from the region size; every
    /// other parameter takes its default.
    pub fn new(region_words: usize, region_count: usize) -> Self {
        Self {
            region_words,
            region_count,
            heap_base: Self::DEFAULT_HEAP_BASE,
            object_alignment_bytes: HEAP_WORD_SIZE,
            survivor_alignment_bytes: HEAP_WORD_SIZE,
            young_plab_words: (region_words / 32).max(1),
            old_plab_words: (region_words / 128).max(1),
            min_plab_words: (region_words / 512).max(1),
            max_plab_words: region_words,
            buffer_waste_pct: 10,
            max_survivor_regions: region_count,
            archive_chunk_words: region_words,
            min_fill_words: 2,
            card_shift: 9,
        }
    }

    /// Total bytes in a single region.
    pub fn region_bytes(&self) -> usize {
        words_to_bytes(self.region_words)
    }

    /// Total bytes in the reserved heap.
    pub fn heap_bytes(&self) -> usize {
        self.region_bytes() * self.region_count
    }

    /// Survivor alignment in effect, in bytes.
    ///
    /// Returns 0 when survivors need no alignment beyond the object
    /// alignment, so the hot path can test against zero.
    pub fn survivor_alignment_in_effect(&self) -> usize {
        if self.survivor_alignment_bytes == self.object_alignment_bytes {
            0
        } else {
            self.survivor_alignment_bytes
        }
    }

    /// Check every structural invariant.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.region_words.is_power_of_two() || self.region_words < Self::MIN_REGION_WORDS {
            return Err(ConfigError::InvalidRegionSize {
                words: self.region_words,
            });
        }
        if self.region_count == 0 || self.region_count >= u32::MAX as usize {
            return Err(ConfigError::InvalidRegionCount {
                count: self.region_count,
            });
        }
        if self.heap_base == HeapAddr::NULL || !self.heap_base.is_aligned(self.region_bytes()) {
            return Err(ConfigError::MisalignedHeapBase {
                base: self.heap_base,
            });
        }
        if self
            .heap_base
            .as_usize()
            .checked_add(self.heap_bytes())
            .is_none()
        {
            return Err(ConfigError::OutOfRange {
                name: "region_count",
                reason: "reserved heap overflows the address space".to_string(),
            });
        }
        check_alignment("object_alignment_bytes", self.object_alignment_bytes)?;
        check_alignment("survivor_alignment_bytes", self.survivor_alignment_bytes)?;
        if self.survivor_alignment_bytes < self.object_alignment_bytes {
            return Err(ConfigError::OutOfRange {
                name: "survivor_alignment_bytes",
                reason: format!(
                    "must be >= object_alignment_bytes ({})",
                    self.object_alignment_bytes
                ),
            });
        }
        if self.survivor_alignment_bytes >= self.region_bytes() {
            return Err(ConfigError::OutOfRange {
                name: "survivor_alignment_bytes",
                reason: "must be smaller than a region".to_string(),
            });
        }
        if self.min_plab_words == 0 || self.min_plab_words > self.max_plab_words {
            return Err(ConfigError::OutOfRange {
                name: "min_plab_words",
                reason: format!(
                    "must be in 1..={} (got {})",
                    self.max_plab_words, self.min_plab_words
                ),
            });
        }
        if self.max_plab_words > self.region_words {
            return Err(ConfigError::OutOfRange {
                name: "max_plab_words",
                reason: format!("must not exceed region_words ({})", self.region_words),
            });
        }
        for (name, words) in [
            ("young_plab_words", self.young_plab_words),
            ("old_plab_words", self.old_plab_words),
        ] {
            if words < self.min_plab_words || words > self.max_plab_words {
                return Err(ConfigError::OutOfRange {
                    name,
                    reason: format!(
                        "must be in {}..={} (got {words})",
                        self.min_plab_words, self.max_plab_words
                    ),
                });
            }
        }
        if self.buffer_waste_pct == 0 || self.buffer_waste_pct > 100 {
            return Err(ConfigError::OutOfRange {
                name: "buffer_waste_pct",
                reason: format!("must be in 1..=100 (got {})", self.buffer_waste_pct),
            });
        }
        if self.archive_chunk_words == 0
            || self.archive_chunk_words > self.region_words
            || self.region_words % self.archive_chunk_words != 0
        {
            return Err(ConfigError::OutOfRange {
                name: "archive_chunk_words",
                reason: format!(
                    "must divide region_words ({}) (got {})",
                    self.region_words, self.archive_chunk_words
                ),
            });
        }
        if self.min_fill_words == 0 || self.min_fill_words >= self.archive_chunk_words {
            return Err(ConfigError::OutOfRange {
                name: "min_fill_words",
                reason: format!(
                    "must be in 1..{} (got {})",
                    self.archive_chunk_words, self.min_fill_words
                ),
            });
        }
        if self.card_shift < 3 || (1usize << self.card_shift) > self.region_bytes() {
            return Err(ConfigError::OutOfRange {
                name: "card_shift",
                reason: format!("card size must be in 8..=region size (got 2^{})", self.card_shift),
            });
        }
        Ok(())
    }
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self::new(Self::DEFAULT_REGION_WORDS, Self::DEFAULT_REGION_COUNT)
    }
}

fn check_alignment(name: &'static str, value: usize) -> Result<(), ConfigError> {
    if !value.is_power_of_two() || value < HEAP_WORD_SIZE {
        return Err(ConfigError::InvalidAlignment { name, value });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_region_is_1mb() {
        let config = HeapConfig::default();
        assert_eq!(config.region_bytes(), 1024 * 1024);
        assert_eq!(config.heap_bytes(), 64 * 1024 * 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn small_config_is_valid() {
        let config = HeapConfig::new(1024, 8);
        assert!(config.validate().is_ok());
        assert_eq!(config.young_plab_words, 32);
        assert_eq!(config.old_plab_words, 8);
    }

    #[test]
    fn survivor_alignment_off_when_equal_to_object_alignment() {
        let mut config = HeapConfig::default();
        assert_eq!(config.survivor_alignment_in_effect(), 0);
        config.survivor_alignment_bytes = 64;
        assert_eq!(config.survivor_alignment_in_effect(), 64);
    }

    #[test]
    fn rejects_non_power_of_two_region() {
        let config = HeapConfig::new(1000, 8);
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidRegionSize { words: 1000 })
        );
    }

    #[test]
    fn rejects_zero_regions() {
        let config = HeapConfig::new(1024, 0);
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidRegionCount { count: 0 })
        );
    }

    #[test]
    fn rejects_misaligned_base() {
        let mut config = HeapConfig::new(1024, 8);
        config.heap_base = HeapAddr(0x1008);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MisalignedHeapBase { .. })
        ));
    }

    #[test]
    fn rejects_survivor_alignment_below_object_alignment() {
        let mut config = HeapConfig::new(1024, 8);
        config.object_alignment_bytes = 16;
        config.survivor_alignment_bytes = 8;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::OutOfRange {
                name: "survivor_alignment_bytes",
                ..
            })
        ));
    }

    #[test]
    fn rejects_chunk_that_does_not_divide_region() {
        let mut config = HeapConfig::new(1024, 8);
        config.archive_chunk_words = 300;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::OutOfRange {
                name: "archive_chunk_words",
                ..
            })
        ));
    }

    #[test]
    fn rejects_plab_larger_than_region() {
        let mut config = HeapConfig::new(1024, 8);
        config.max_plab_words = 2048;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::OutOfRange {
                name: "max_plab_words",
                ..
            })
        ));
    }
}
