//! Deterministic RNG for seeded scheduling
//!
//! TigerStyle: ChaCha20-based RNG for reproducibility.
//!
//! Only used when a bubble is configured with a seed. It picks which
//! runnable task is polled next, so one seed always yields one interleaving.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;

/// Deterministic random number generator
///
/// Owned by the bubble state, which is already behind the bubble lock, so
/// no interior locking is needed.
#[derive(Debug, Clone)]
pub struct DeterministicRng {
    seed: u64,
    rng: ChaCha20Rng,
}

impl DeterministicRng {
    /// Create a new deterministic RNG with the given seed
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            rng: ChaCha20Rng::seed_from_u64(seed),
        }
    }

    /// The seed used to create this RNG (log it to replay a run)
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Generate a random u64
    pub fn next_u64(&mut self) -> u64 {
        self.rng.gen()
    }

    /// Generate a random index for a collection of the given length
    pub fn next_index(&mut self, len: usize) -> usize {
        assert!(len > 0, "length must be positive");
        self.rng.gen_range(0..len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rng_reproducibility() {
        let mut rng1 = DeterministicRng::new(12345);
        let mut rng2 = DeterministicRng::new(12345);

        for _ in 0..100 {
            assert_eq!(rng1.next_u64(), rng2.next_u64());
        }
    }

    #[test]
    fn test_rng_different_seeds() {
        let mut rng1 = DeterministicRng::new(12345);
        let mut rng2 = DeterministicRng::new(54321);

        let seq1: Vec<_> = (0..10).map(|_| rng1.next_u64()).collect();
        let seq2: Vec<_> = (0..10).map(|_| rng2.next_u64()).collect();
        assert_ne!(seq1, seq2);
    }

    #[test]
    fn test_next_index_in_bounds() {
        let mut rng = DeterministicRng::new(42);
        for len in 1..50 {
            assert!(rng.next_index(len) < len);
        }
    }
}
