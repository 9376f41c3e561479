//! Randomness abstraction
//!
//! Fault injection and workload generation draw from an `Rng` so that
//! simulations replay exactly given the same seed.

pub mod simulation;

pub use simulation::SimulatedRng;

/// Source of randomness for fault injection and workloads
pub trait Rng: Send {
    fn next_u64(&mut self) -> u64;

    /// Uniform value in `[min, max)`; returns `min` when the range is empty
    fn gen_range(&mut self, min: u64, max: u64) -> u64 {
        if min >= max {
            return min;
        }
        min + (self.next_u64() % (max - min))
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        for chunk in dest.chunks_mut(8) {
            let bytes = self.next_u64().to_le_bytes();
            chunk.copy_from_slice(&bytes[..chunk.len()]);
        }
    }
}
