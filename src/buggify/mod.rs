//! BUGGIFY - Deterministic Fault Injection
//!
//! Every storage call made under simulation is a potential fault site. A
//! site asks `buggify!` whether to fail; the answer comes from a seeded RNG,
//! so a failing seed replays the exact fault sequence.
//!
//! ```ignore
//! if buggify!(&mut rng, faults::storage::PUT_FAIL, config.put_fail_prob) {
//!     return Err(IoError::new(ErrorKind::Other, "simulated put failure"));
//! }
//! ```

pub mod faults;

use tracing::trace;

/// Check a fault at `probability`, clamped to `[0, 1]`
#[inline]
pub fn should_buggify<R: crate::io::Rng>(rng: &mut R, fault_id: &str, probability: f64) -> bool {
    if probability <= 0.0 {
        return false;
    }
    let triggered = roll(rng) < probability.min(1.0);
    if triggered {
        trace!(fault = fault_id, "buggify triggered");
    }
    triggered
}

fn roll<R: crate::io::Rng>(rng: &mut R) -> f64 {
    rng.gen_range(0, 1_000_000) as f64 / 1_000_000.0
}

/// Fault injection check: `buggify!(rng, fault_id, probability)`
#[macro_export]
macro_rules! buggify {
    ($rng:expr, $fault_id:expr, $prob:expr) => {
        $crate::buggify::should_buggify($rng, $fault_id, $prob)
    };
}
