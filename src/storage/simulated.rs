//! Simulated Blob Storage with Fault Injection
//!
//! DST wrapper that injects faults with buggify from a seeded RNG. Faults are
//! decided before the inner call, so a failed call leaves no trace in the
//! inner store. The one exception is an ambiguous PUT, which stores the
//! object and still reports failure.

use crate::blob::BlobIdentifier;
use crate::buggify::faults::storage as faults;
use crate::io::Rng;
use crate::storage::{BlobStorage, StorageFuture};
use parking_lot::Mutex;
use serde::Serialize;
use std::io::{Error as IoError, ErrorKind, Result as IoResult};
use std::time::Duration;

/// Fault probabilities for the simulated store
#[derive(Debug, Clone)]
pub struct SimulatedStorageConfig {
    pub put_fail_prob: f64,
    /// PUT lands but the caller sees an error
    pub ambiguous_put_prob: f64,
    pub read_fail_prob: f64,
    pub compose_fail_prob: f64,
    pub copy_fail_prob: f64,
    pub delete_fail_prob: f64,
    pub timeout_prob: f64,
    /// Simulated latency range in microseconds (min, max)
    pub latency_range_us: (u64, u64),
}

impl Default for SimulatedStorageConfig {
    fn default() -> Self {
        SimulatedStorageConfig {
            put_fail_prob: 0.01,           // 1%
            ambiguous_put_prob: 0.005,     // 0.5%
            read_fail_prob: 0.01,          // 1%
            compose_fail_prob: 0.01,       // 1%
            copy_fail_prob: 0.01,          // 1%
            delete_fail_prob: 0.01,        // 1%
            timeout_prob: 0.005,           // 0.5%
            latency_range_us: (0, 0),
        }
    }
}

impl SimulatedStorageConfig {
    /// High chaos configuration for stress testing
    pub fn high_chaos() -> Self {
        SimulatedStorageConfig {
            put_fail_prob: 0.05,
            ambiguous_put_prob: 0.03,
            read_fail_prob: 0.05,
            compose_fail_prob: 0.05,
            copy_fail_prob: 0.05,
            delete_fail_prob: 0.05,
            timeout_prob: 0.02,
            latency_range_us: (0, 0),
        }
    }

    /// No faults - for baseline testing
    pub fn no_faults() -> Self {
        SimulatedStorageConfig {
            put_fail_prob: 0.0,
            ambiguous_put_prob: 0.0,
            read_fail_prob: 0.0,
            compose_fail_prob: 0.0,
            copy_fail_prob: 0.0,
            delete_fail_prob: 0.0,
            timeout_prob: 0.0,
            latency_range_us: (0, 0),
        }
    }

    /// Adds real sleeps between `min_us` and `max_us` to every call
    pub fn with_latency(mut self, min_us: u64, max_us: u64) -> Self {
        self.latency_range_us = (min_us, max_us);
        self
    }
}

/// Counts of attempted calls and injected faults
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SimulatedStorageStats {
    pub put_attempts: u64,
    pub put_failures: u64,
    pub ambiguous_puts: u64,
    pub read_attempts: u64,
    pub read_failures: u64,
    pub compose_attempts: u64,
    pub compose_failures: u64,
    pub copy_attempts: u64,
    pub copy_failures: u64,
    pub delete_attempts: u64,
    pub delete_failures: u64,
    pub timeouts: u64,
}

impl SimulatedStorageStats {
    /// Total injected faults
    pub fn faults(&self) -> u64 {
        self.put_failures
            + self.ambiguous_puts
            + self.read_failures
            + self.compose_failures
            + self.copy_failures
            + self.delete_failures
            + self.timeouts
    }
}

struct SimulatedState<R: Rng> {
    rng: R,
    stats: SimulatedStorageStats,
}

/// Fault-injecting wrapper around another `BlobStorage`
pub struct SimulatedBlobStorage<S: BlobStorage, R: Rng> {
    inner: S,
    config: SimulatedStorageConfig,
    state: Mutex<SimulatedState<R>>,
}

/// Which call a fault check belongs to
#[derive(Debug, Clone, Copy)]
enum Op {
    Put,
    Read,
    Compose,
    Copy,
    Delete,
}

impl<S: BlobStorage, R: Rng + 'static> SimulatedBlobStorage<S, R> {
    pub fn new(inner: S, rng: R, config: SimulatedStorageConfig) -> Self {
        SimulatedBlobStorage {
            inner,
            config,
            state: Mutex::new(SimulatedState {
                rng,
                stats: SimulatedStorageStats::default(),
            }),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn config(&self) -> &SimulatedStorageConfig {
        &self.config
    }

    pub fn stats(&self) -> SimulatedStorageStats {
        self.state.lock().stats
    }

    pub fn reset_stats(&self) {
        self.state.lock().stats = SimulatedStorageStats::default();
    }

    /// Decide whether `op` fails before reaching the inner store.
    /// Records the attempt and any injected fault.
    fn inject(&self, op: Op) -> IoResult<()> {
        let mut guard = self.state.lock();
        let s = &mut *guard;

        let (fault_id, prob, msg) = match op {
            Op::Put => {
                s.stats.put_attempts += 1;
                (faults::PUT_FAIL, self.config.put_fail_prob, "simulated put failure")
            }
            Op::Read => {
                s.stats.read_attempts += 1;
                (faults::READ_FAIL, self.config.read_fail_prob, "simulated read failure")
            }
            Op::Compose => {
                s.stats.compose_attempts += 1;
                (
                    faults::COMPOSE_FAIL,
                    self.config.compose_fail_prob,
                    "simulated compose failure",
                )
            }
            Op::Copy => {
                s.stats.copy_attempts += 1;
                (faults::COPY_FAIL, self.config.copy_fail_prob, "simulated copy failure")
            }
            Op::Delete => {
                s.stats.delete_attempts += 1;
                (
                    faults::DELETE_FAIL,
                    self.config.delete_fail_prob,
                    "simulated delete failure",
                )
            }
        };

        if crate::buggify!(&mut s.rng, faults::TIMEOUT, self.config.timeout_prob) {
            s.stats.timeouts += 1;
            return Err(IoError::new(ErrorKind::TimedOut, "simulated timeout"));
        }

        if crate::buggify!(&mut s.rng, fault_id, prob) {
            match op {
                Op::Put => s.stats.put_failures += 1,
                Op::Read => s.stats.read_failures += 1,
                Op::Compose => s.stats.compose_failures += 1,
                Op::Copy => s.stats.copy_failures += 1,
                Op::Delete => s.stats.delete_failures += 1,
            }
            return Err(IoError::new(ErrorKind::Other, msg));
        }

        Ok(())
    }

    fn ambiguous_put(&self) -> bool {
        let mut guard = self.state.lock();
        let s = &mut *guard;
        let hit = crate::buggify!(
            &mut s.rng,
            faults::AMBIGUOUS_PUT,
            self.config.ambiguous_put_prob
        );
        if hit {
            s.stats.ambiguous_puts += 1;
        }
        hit
    }

    fn latency(&self) -> Option<Duration> {
        let (min, max) = self.config.latency_range_us;
        if min == 0 && max == 0 {
            return None;
        }
        let us = if max > min {
            self.state.lock().rng.gen_range(min, max)
        } else {
            min
        };
        (us > 0).then(|| Duration::from_micros(us))
    }

    async fn simulate_latency(&self) {
        if let Some(delay) = self.latency() {
            tokio::time::sleep(delay).await;
        }
    }
}

impl<S: BlobStorage, R: Rng + 'static> BlobStorage for SimulatedBlobStorage<S, R> {
    fn put_object<'a>(&'a self, blob: &'a BlobIdentifier, data: &'a [u8]) -> StorageFuture<'a, ()> {
        Box::pin(async move {
            self.inject(Op::Put)?;
            self.simulate_latency().await;
            self.inner.put_object(blob, data).await?;
            if self.ambiguous_put() {
                return Err(IoError::new(
                    ErrorKind::ConnectionReset,
                    "simulated lost response after put",
                ));
            }
            Ok(())
        })
    }

    fn read_range<'a>(
        &'a self,
        blob: &'a BlobIdentifier,
        offset: u64,
        length: u64,
    ) -> StorageFuture<'a, Vec<u8>> {
        Box::pin(async move {
            self.inject(Op::Read)?;
            self.simulate_latency().await;
            self.inner.read_range(blob, offset, length).await
        })
    }

    fn compose<'a>(
        &'a self,
        sources: &'a [BlobIdentifier],
        destination: &'a BlobIdentifier,
    ) -> StorageFuture<'a, ()> {
        Box::pin(async move {
            self.inject(Op::Compose)?;
            self.simulate_latency().await;
            self.inner.compose(sources, destination).await
        })
    }

    fn copy<'a>(
        &'a self,
        source: &'a BlobIdentifier,
        destination: &'a BlobIdentifier,
    ) -> StorageFuture<'a, ()> {
        Box::pin(async move {
            self.inject(Op::Copy)?;
            self.simulate_latency().await;
            self.inner.copy(source, destination).await
        })
    }

    fn delete<'a>(&'a self, blob: &'a BlobIdentifier) -> StorageFuture<'a, bool> {
        Box::pin(async move {
            self.inject(Op::Delete)?;
            self.simulate_latency().await;
            self.inner.delete(blob).await
        })
    }

    fn exists<'a>(&'a self, blob: &'a BlobIdentifier) -> StorageFuture<'a, bool> {
        Box::pin(async move { self.inner.exists(blob).await })
    }

    fn size<'a>(&'a self, blob: &'a BlobIdentifier) -> StorageFuture<'a, u64> {
        Box::pin(async move { self.inner.size(blob).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::SimulatedRng;
    use crate::storage::InMemoryBlobStorage;

    fn blob(object: &str) -> BlobIdentifier {
        BlobIdentifier::new("bucket", object).unwrap()
    }

    #[tokio::test]
    async fn test_simulated_storage_no_faults() {
        let storage = SimulatedBlobStorage::new(
            InMemoryBlobStorage::new(),
            SimulatedRng::new(42),
            SimulatedStorageConfig::no_faults(),
        );

        storage.put_object(&blob("key1"), b"value1").await.unwrap();
        assert_eq!(storage.read_range(&blob("key1"), 0, 6).await.unwrap(), b"value1");

        let stats = storage.stats();
        assert_eq!(stats.put_attempts, 1);
        assert_eq!(stats.read_attempts, 1);
        assert_eq!(stats.faults(), 0);
    }

    #[tokio::test]
    async fn test_simulated_storage_deterministic() {
        let config = SimulatedStorageConfig {
            put_fail_prob: 0.5,
            ..SimulatedStorageConfig::no_faults()
        };
        let store1 = SimulatedBlobStorage::new(
            InMemoryBlobStorage::new(),
            SimulatedRng::new(12345),
            config.clone(),
        );
        let store2 =
            SimulatedBlobStorage::new(InMemoryBlobStorage::new(), SimulatedRng::new(12345), config);

        let mut results1 = Vec::new();
        let mut results2 = Vec::new();
        for i in 0..20 {
            let b = blob(&format!("key{}", i));
            results1.push(store1.put_object(&b, b"data").await.is_ok());
            results2.push(store2.put_object(&b, b"data").await.is_ok());
        }

        assert_eq!(results1, results2, "same seed must inject the same faults");
    }

    #[tokio::test]
    async fn test_failed_put_stores_nothing() {
        let inner = InMemoryBlobStorage::new();
        let storage = SimulatedBlobStorage::new(
            inner.clone(),
            SimulatedRng::new(999),
            SimulatedStorageConfig {
                put_fail_prob: 1.0,
                ..SimulatedStorageConfig::no_faults()
            },
        );

        assert!(storage.put_object(&blob("key"), b"value").await.is_err());
        assert!(inner.is_empty());
        assert_eq!(storage.stats().put_failures, 1);
    }

    #[tokio::test]
    async fn test_ambiguous_put_stores_and_fails() {
        let inner = InMemoryBlobStorage::new();
        let storage = SimulatedBlobStorage::new(
            inner.clone(),
            SimulatedRng::new(7),
            SimulatedStorageConfig {
                ambiguous_put_prob: 1.0,
                ..SimulatedStorageConfig::no_faults()
            },
        );

        let err = storage.put_object(&blob("key"), b"value").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConnectionReset);
        assert!(inner.contains(&blob("key")));
        assert_eq!(storage.stats().ambiguous_puts, 1);
    }

    #[tokio::test]
    async fn test_failed_compose_leaves_sources() {
        let inner = InMemoryBlobStorage::new();
        inner.put_object(&blob("a"), b"x").await.unwrap();
        let storage = SimulatedBlobStorage::new(
            inner.clone(),
            SimulatedRng::new(1),
            SimulatedStorageConfig {
                compose_fail_prob: 1.0,
                ..SimulatedStorageConfig::no_faults()
            },
        );

        assert!(storage.compose(&[blob("a")], &blob("out")).await.is_err());
        assert!(inner.contains(&blob("a")));
        assert!(!inner.contains(&blob("out")));
    }

    #[tokio::test]
    async fn test_simulated_storage_high_chaos() {
        let storage = SimulatedBlobStorage::new(
            InMemoryBlobStorage::new(),
            SimulatedRng::new(42),
            SimulatedStorageConfig::high_chaos(),
        );

        let mut successes = 0;
        let mut failures = 0;
        for i in 0..200 {
            match storage.put_object(&blob(&format!("key{}", i)), b"data").await {
                Ok(_) => successes += 1,
                Err(_) => failures += 1,
            }
        }

        assert!(failures > 0, "Expected some failures with high chaos config");
        assert!(successes > 0, "Expected some successes even with high chaos");
        assert!(storage.stats().faults() > 0);
    }
}
