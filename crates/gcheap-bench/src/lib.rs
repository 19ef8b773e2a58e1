//! Benchmark profiles and utilities for the gcheap region allocator.
//!
//! Provides pre-built [`HeapConfig`] profiles and workloads:
//!
//! - [`reference_profile`]: 64 regions of 1 MiB, default PLAB sizing
//! - [`stress_profile`]: 512 small regions, so region replacement is frequent
//! - [`object_sizes`]: deterministic object-size stream via seed

#![forbid(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

use gcheap_alloc::HeapConfig;

/// Build the reference benchmark profile: 64 regions of 128K words.
pub fn reference_profile() -> HeapConfig {
    HeapConfig::default()
}

/// Build the stress profile: 512 regions of 4096 words.
///
/// PLABs are 128 words (young) and 32 words (old), so a worker refills
/// its buffers and the shared regions turn over many times per pause.
pub fn stress_profile() -> HeapConfig {
    let mut config = HeapConfig::new(4096, 512);
    config.survivor_alignment_bytes = 16;
    config
}

/// Generate `n` deterministic object sizes in words.
///
/// Most objects are small (2..=16 words); roughly one in sixteen is
/// medium (up to 256 words), which exercises the direct-allocation path.
pub fn object_sizes(n: usize, seed: u64) -> Vec<usize> {
    let mut state = seed | 1;
    (0..n)
        .map(|_| {
            // xorshift64
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            if state % 16 == 0 {
                17 + (state >> 8) as usize % 240
            } else {
                2 + (state >> 8) as usize % 15
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_profile_validates() {
        reference_profile().validate().unwrap();
    }

    #[test]
    fn stress_profile_validates() {
        let config = stress_profile();
        config.validate().unwrap();
        assert_eq!(config.survivor_alignment_in_effect(), 16);
    }

    #[test]
    fn object_sizes_in_range() {
        let sizes = object_sizes(10_000, 42);
        assert_eq!(sizes.len(), 10_000);
        assert!(sizes.iter().all(|&w| (2..=256).contains(&w)));
        assert!(sizes.iter().any(|&w| w > 16), "no medium objects generated");
    }

    #[test]
    fn object_sizes_deterministic() {
        assert_eq!(object_sizes(100, 7), object_sizes(100, 7));
        assert_ne!(object_sizes(100, 7), object_sizes(100, 8));
    }
}
