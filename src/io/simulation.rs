//! Deterministic RNG for simulation testing

use super::Rng;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Seeded ChaCha8 generator; the same seed always yields the same stream
#[derive(Debug, Clone)]
pub struct SimulatedRng {
    rng: ChaCha8Rng,
    seed: u64,
}

impl SimulatedRng {
    pub fn new(seed: u64) -> Self {
        SimulatedRng {
            rng: ChaCha8Rng::seed_from_u64(seed),
            seed,
        }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Independent generator derived from this one
    pub fn fork(&mut self) -> Self {
        SimulatedRng::new(self.rng.next_u64())
    }
}

impl Rng for SimulatedRng {
    fn next_u64(&mut self) -> u64 {
        self.rng.next_u64()
    }
}
