//! Deterministic Simulation Testing for the Recoverable Writer
//!
//! Shadow-state harness: a seeded workload writes, flushes, persists and
//! crashes a stream over a fault-injecting store while a shadow copy tracks
//! the bytes the stream has accepted. At the end the stream is closed and
//! committed with retries, and the final blob must equal the shadow copy.
//!
//! ```text
//! for seed in 0..10000 {
//!     let mut harness = WriterDSTHarness::new(WriterDSTConfig::chaos(seed));
//!     harness.run(500).await;
//!     harness.check_invariants().await;   // violations carry the seed
//! }
//! ```

use crate::blob::{BlobIdentifier, TEMPORARY_OBJECT_PREFIX};
use crate::config::WriterOptions;
use crate::error::WriterError;
use crate::io::{Rng, SimulatedRng};
use crate::storage::{
    BlobStorage, InMemoryBlobStorage, SimulatedBlobStorage, SimulatedStorageConfig,
    SimulatedStorageStats,
};
use crate::writer::codec::{CommitStateSerializer, ResumeStateSerializer, StateSerializer};
use crate::writer::committer::plan_commit;
use crate::writer::recoverable::RecoverableWriter;
use crate::writer::stream::RecoverableOutputStream;
use serde::Serialize;
use std::sync::Arc;

const FINAL_BUCKET: &str = "dst-bucket";
const SCRATCH_BUCKET: &str = "dst-scratch";

/// Configuration for writer DST
#[derive(Debug, Clone)]
pub struct WriterDSTConfig {
    /// Random seed for reproducibility
    pub seed: u64,
    /// Storage fault configuration
    pub storage_config: SimulatedStorageConfig,
    /// Writer options (small chunks and groups to force multi-level commits)
    pub options: WriterOptions,
    pub flush_probability: f64,
    pub persist_probability: f64,
    /// Probability of crash and recovery from the last checkpoint
    pub crash_probability: f64,
    /// Largest single write in bytes
    pub max_write_len: u64,
    /// Attempts for close and for commit before giving up
    pub max_finish_attempts: usize,
}

impl Default for WriterDSTConfig {
    fn default() -> Self {
        WriterDSTConfig {
            seed: 0,
            storage_config: SimulatedStorageConfig::default(),
            options: WriterOptions::test().with_compose_group_size(4),
            flush_probability: 0.1,
            persist_probability: 0.1,
            crash_probability: 0.01,
            max_write_len: 40,
            max_finish_attempts: 1000,
        }
    }
}

impl WriterDSTConfig {
    pub fn new(seed: u64) -> Self {
        WriterDSTConfig {
            seed,
            ..Default::default()
        }
    }

    /// Calm mode - no faults, no crashes
    pub fn calm(seed: u64) -> Self {
        WriterDSTConfig {
            seed,
            storage_config: SimulatedStorageConfig::no_faults(),
            crash_probability: 0.0,
            ..Default::default()
        }
    }

    /// Moderate fault injection
    pub fn moderate(seed: u64) -> Self {
        WriterDSTConfig {
            seed,
            storage_config: SimulatedStorageConfig::default(),
            crash_probability: 0.02,
            ..Default::default()
        }
    }

    /// Chaos mode - aggressive fault injection
    pub fn chaos(seed: u64) -> Self {
        WriterDSTConfig {
            seed,
            storage_config: SimulatedStorageConfig::high_chaos(),
            crash_probability: 0.05,
            ..Default::default()
        }
    }

    /// Stage temporaries in a scratch bucket
    pub fn with_scratch_bucket(mut self) -> Self {
        self.options = self.options.with_temporary_bucket(SCRATCH_BUCKET);
        self
    }

    pub fn with_entropy_injection(mut self) -> Self {
        self.options = self.options.with_entropy_injection(true);
        self
    }
}

/// Writer operation type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriterOperation {
    Write { len: u64 },
    Flush,
    /// Persist and keep the serialized state as the checkpoint
    Persist,
    /// Drop the stream and recover from the checkpoint
    CrashRecover,
}

/// Workload generator
pub struct WriterWorkload {
    rng: SimulatedRng,
    config: WriterDSTConfig,
}

impl WriterWorkload {
    pub fn new(config: WriterDSTConfig) -> Self {
        WriterWorkload {
            rng: SimulatedRng::new(config.seed),
            config,
        }
    }

    pub fn next_operation(&mut self) -> WriterOperation {
        let roll = self.rng.next_u64() as f64 / u64::MAX as f64;
        let crash = self.config.crash_probability;
        let flush = crash + self.config.flush_probability;
        let persist = flush + self.config.persist_probability;

        if roll < crash {
            WriterOperation::CrashRecover
        } else if roll < flush {
            WriterOperation::Flush
        } else if roll < persist {
            WriterOperation::Persist
        } else {
            WriterOperation::Write {
                len: self.rng.gen_range(0, self.config.max_write_len + 1),
            }
        }
    }

    pub fn payload(&mut self, len: u64) -> Vec<u8> {
        let mut data = vec![0u8; len as usize];
        self.rng.fill_bytes(&mut data);
        data
    }
}

/// Result of a DST run
#[derive(Debug, Clone, Serialize)]
pub struct WriterDSTResult {
    pub seed: u64,
    pub total_operations: u64,
    pub successful_operations: u64,
    /// Failed operations (expected under faults)
    pub failed_operations: u64,
    /// Writes that stored part of their bytes before failing
    pub partial_writes: u64,
    pub flushes: u64,
    pub persists: u64,
    pub crashes: u64,
    pub close_attempts: u64,
    pub commit_attempts: u64,
    pub bytes_committed: u64,
    pub components_committed: usize,
    /// Temporaries left by crashes (written after the last checkpoint)
    pub orphaned_temporaries: usize,
    pub storage_stats: SimulatedStorageStats,
    pub invariant_violations: Vec<String>,
}

impl WriterDSTResult {
    pub fn new(seed: u64) -> Self {
        WriterDSTResult {
            seed,
            total_operations: 0,
            successful_operations: 0,
            failed_operations: 0,
            partial_writes: 0,
            flushes: 0,
            persists: 0,
            crashes: 0,
            close_attempts: 0,
            commit_attempts: 0,
            bytes_committed: 0,
            components_committed: 0,
            orphaned_temporaries: 0,
            storage_stats: SimulatedStorageStats::default(),
            invariant_violations: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.invariant_violations.is_empty()
    }

    pub fn summary(&self) -> String {
        format!(
            "Seed {}: {} ops ({} ok, {} failed, {} partial), {} flushes, {} persists, {} crashes, \
             {} bytes in {} components, {} commit attempts, {} faults, {} orphans, {} violations",
            self.seed,
            self.total_operations,
            self.successful_operations,
            self.failed_operations,
            self.partial_writes,
            self.flushes,
            self.persists,
            self.crashes,
            self.bytes_committed,
            self.components_committed,
            self.commit_attempts,
            self.storage_stats.faults(),
            self.orphaned_temporaries,
            self.invariant_violations.len()
        )
    }
}

type DSTStorage = SimulatedBlobStorage<InMemoryBlobStorage, SimulatedRng>;

/// Main DST harness for the recoverable writer
pub struct WriterDSTHarness {
    config: WriterDSTConfig,
    storage: Arc<DSTStorage>,
    inner: InMemoryBlobStorage,
    writer: RecoverableWriter,
    workload: WriterWorkload,
    final_blob: BlobIdentifier,
    stream: RecoverableOutputStream,
    /// Bytes the stream has accepted, durable or buffered
    shadow: Vec<u8>,
    /// Last serialized ResumeState
    checkpoint: Option<Vec<u8>>,
    result: WriterDSTResult,
}

impl WriterDSTHarness {
    /// Panics if `config.options` do not validate
    pub fn new(config: WriterDSTConfig) -> Self {
        let inner = InMemoryBlobStorage::new();
        let storage = Arc::new(SimulatedBlobStorage::new(
            inner.clone(),
            SimulatedRng::new(config.seed.wrapping_add(1)), // Different seed for storage
            config.storage_config.clone(),
        ));
        let writer = RecoverableWriter::new(storage.clone(), config.options.clone())
            .unwrap_or_else(|e| panic!("invalid DST writer options: {}", e));

        let final_blob = BlobIdentifier::new(FINAL_BUCKET, format!("out/seed-{}", config.seed))
            .unwrap_or_else(|e| panic!("invalid DST blob: {}", e));
        let stream = writer.open_blob(final_blob.clone());

        WriterDSTHarness {
            workload: WriterWorkload::new(config.clone()),
            result: WriterDSTResult::new(config.seed),
            config,
            storage,
            inner,
            writer,
            final_blob,
            stream,
            shadow: Vec::new(),
            checkpoint: None,
        }
    }

    /// Run the workload for a specified number of operations
    pub async fn run(&mut self, operations: usize) {
        for _ in 0..operations {
            let op = self.workload.next_operation();
            self.execute_operation(op).await;
            self.check_position();
        }
    }

    async fn execute_operation(&mut self, op: WriterOperation) {
        self.result.total_operations += 1;

        let ok = match op {
            WriterOperation::Write { len } => {
                let data = self.workload.payload(len);
                match self.stream.write(&data).await {
                    Ok(()) => {
                        self.shadow.extend_from_slice(&data);
                        true
                    }
                    Err(WriterError::PartialWrite { accepted, .. }) => {
                        self.shadow.extend_from_slice(&data[..accepted]);
                        self.result.partial_writes += 1;
                        false
                    }
                    Err(_) => false,
                }
            }
            WriterOperation::Flush => {
                self.result.flushes += 1;
                self.stream.flush().await.is_ok()
            }
            WriterOperation::Persist => {
                self.result.persists += 1;
                match self.stream.persist().await {
                    Ok(state) => {
                        if state.position() != self.shadow.len() as u64 {
                            self.violation(format!(
                                "persisted position {} != accepted bytes {}",
                                state.position(),
                                self.shadow.len()
                            ));
                        }
                        self.checkpoint = Some(ResumeStateSerializer.serialize(&state));
                        true
                    }
                    Err(_) => false,
                }
            }
            WriterOperation::CrashRecover => {
                self.result.crashes += 1;
                self.crash_and_recover()
            }
        };

        if ok {
            self.result.successful_operations += 1;
        } else {
            self.result.failed_operations += 1;
        }
    }

    /// Lose the stream and its buffer; resume from the checkpoint if any
    fn crash_and_recover(&mut self) -> bool {
        let Some(bytes) = &self.checkpoint else {
            self.stream = self.writer.open_blob(self.final_blob.clone());
            self.shadow.clear();
            return true;
        };

        match ResumeStateSerializer.deserialize(bytes) {
            Ok(state) => {
                self.shadow.truncate(state.position() as usize);
                self.stream = self.writer.recover(&state);
                true
            }
            Err(e) => {
                self.violation(format!("checkpoint failed to decode: {}", e));
                false
            }
        }
    }

    fn check_position(&mut self) {
        if self.stream.pos() != self.shadow.len() as u64 {
            self.violation(format!(
                "stream position {} != accepted bytes {}",
                self.stream.pos(),
                self.shadow.len()
            ));
        }
    }

    /// Close and commit with retries, then check the committed bytes and
    /// that no temporary of the committed lineage survives
    pub async fn check_invariants(&mut self) {
        let mut commit_state = None;
        for _ in 0..self.config.max_finish_attempts {
            self.result.close_attempts += 1;
            if let Ok(state) = self.stream.close().await {
                commit_state = Some(state);
                break;
            }
        }
        let Some(commit_state) = commit_state else {
            self.violation("close did not succeed within the attempt budget".to_string());
            return;
        };

        // Commit from the serialized state, as after a restart
        let encoded = CommitStateSerializer.serialize(&commit_state);
        let decoded = match CommitStateSerializer.deserialize(&encoded) {
            Ok(state) => state,
            Err(e) => {
                self.violation(format!("commit state failed to decode: {}", e));
                return;
            }
        };
        let committer = self.writer.recover_for_commit(&decoded);

        let mut committed = false;
        for attempt in 0..self.config.max_finish_attempts {
            self.result.commit_attempts += 1;
            let outcome = if attempt == 0 {
                committer.commit().await
            } else {
                committer.commit_after_recovery().await
            };
            match outcome {
                Ok(()) => {
                    committed = true;
                    break;
                }
                Err(e @ WriterError::RecoveryInconsistency { .. }) if attempt > 0 => {
                    self.violation(format!("commit after recovery failed: {}", e));
                    return;
                }
                Err(_) => {}
            }
        }
        if !committed {
            self.violation("commit did not succeed within the attempt budget".to_string());
            return;
        }

        self.result.components_committed = decoded.component_ids().len();
        self.result.storage_stats = self.storage.stats();

        match self.inner.get(&self.final_blob) {
            Some(content) => {
                self.result.bytes_committed = content.len() as u64;
                if content.as_ref() != self.shadow.as_slice() {
                    self.violation(format!(
                        "final blob has {} bytes, expected {} accepted bytes",
                        content.len(),
                        self.shadow.len()
                    ));
                }
            }
            None => self.violation("final blob missing after commit".to_string()),
        }

        let naming = self.writer.naming();
        let mut lineage: Vec<BlobIdentifier> = decoded
            .component_ids()
            .iter()
            .map(|id| naming.temporary_blob(&self.final_blob, *id))
            .collect();
        lineage.extend(
            plan_commit(&decoded, naming, self.config.options.compose_group_size)
                .iter()
                .map(|step| step.target().clone())
                .filter(|target| *target != self.final_blob),
        );
        let survivors: Vec<String> = lineage
            .iter()
            .filter(|blob| self.inner.contains(blob))
            .map(|blob| blob.to_string())
            .collect();
        if !survivors.is_empty() {
            self.violation(format!("temporaries survived commit: {:?}", survivors));
        }

        self.result.orphaned_temporaries = [FINAL_BUCKET, SCRATCH_BUCKET]
            .iter()
            .flat_map(|bucket| self.inner.object_names(bucket))
            .filter(|name| name.contains(TEMPORARY_OBJECT_PREFIX))
            .count();
    }

    fn violation(&mut self, message: String) {
        self.result
            .invariant_violations
            .push(format!("seed {}: {}", self.config.seed, message));
    }

    pub fn result(&self) -> &WriterDSTResult {
        &self.result
    }

    pub fn into_result(self) -> WriterDSTResult {
        self.result
    }

    /// The store beneath fault injection
    pub fn inner_storage(&self) -> &InMemoryBlobStorage {
        &self.inner
    }
}

/// Run a batch of DST runs with consecutive seeds
pub async fn run_dst_batch(
    base_seed: u64,
    count: usize,
    ops_per_run: usize,
    config_fn: impl Fn(u64) -> WriterDSTConfig,
) -> Vec<WriterDSTResult> {
    let mut results = Vec::with_capacity(count);

    for i in 0..count {
        let seed = base_seed + i as u64;
        let mut harness = WriterDSTHarness::new(config_fn(seed));
        harness.run(ops_per_run).await;
        harness.check_invariants().await;
        results.push(harness.into_result());
    }

    results
}

/// Summary of batch results
pub fn summarize_batch(results: &[WriterDSTResult]) -> String {
    let total = results.len();
    let passed = results.iter().filter(|r| r.is_success()).count();
    let failed_seeds: Vec<u64> = results
        .iter()
        .filter(|r| !r.is_success())
        .map(|r| r.seed)
        .collect();

    let total_ops: u64 = results.iter().map(|r| r.total_operations).sum();
    let total_crashes: u64 = results.iter().map(|r| r.crashes).sum();
    let total_bytes: u64 = results.iter().map(|r| r.bytes_committed).sum();
    let total_faults: u64 = results.iter().map(|r| r.storage_stats.faults()).sum();

    let mut summary = format!(
        "Batch: {}/{} passed, {} total ops, {} crashes, {} faults, {} bytes committed",
        passed, total, total_ops, total_crashes, total_faults, total_bytes
    );

    if !failed_seeds.is_empty() {
        summary.push_str(&format!("\nFailed seeds: {:?}", failed_seeds));
    }

    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_dst_harness_calm() {
        let mut harness = WriterDSTHarness::new(WriterDSTConfig::calm(42));
        harness.run(200).await;
        harness.check_invariants().await;

        let result = harness.result();
        assert!(
            result.is_success(),
            "Calm mode should not have invariant violations: {:?}",
            result.invariant_violations
        );
        assert_eq!(result.failed_operations, 0);
        assert_eq!(result.orphaned_temporaries, 0);
        assert!(result.bytes_committed > 0);
    }

    #[tokio::test]
    async fn test_dst_harness_chaos() {
        let mut harness = WriterDSTHarness::new(WriterDSTConfig::chaos(123));
        harness.run(300).await;
        harness.check_invariants().await;

        let result = harness.result();
        assert!(result.is_success(), "{:?}", result.invariant_violations);
        assert!(result.storage_stats.faults() > 0);
    }

    #[tokio::test]
    async fn test_dst_deterministic() {
        let seed = 12345;

        let mut harness1 = WriterDSTHarness::new(WriterDSTConfig::moderate(seed));
        harness1.run(100).await;
        let r1 = harness1.into_result();

        let mut harness2 = WriterDSTHarness::new(WriterDSTConfig::moderate(seed));
        harness2.run(100).await;
        let r2 = harness2.into_result();

        assert_eq!(r1.successful_operations, r2.successful_operations);
        assert_eq!(r1.failed_operations, r2.failed_operations);
        assert_eq!(r1.crashes, r2.crashes);
    }

    #[tokio::test]
    async fn test_workload_generator() {
        let mut workload = WriterWorkload::new(WriterDSTConfig::new(42));

        let (mut writes, mut flushes, mut persists, mut crashes) = (0, 0, 0, 0);
        for _ in 0..1000 {
            match workload.next_operation() {
                WriterOperation::Write { len } => {
                    assert!(len <= 40);
                    writes += 1;
                }
                WriterOperation::Flush => flushes += 1,
                WriterOperation::Persist => persists += 1,
                WriterOperation::CrashRecover => crashes += 1,
            }
        }

        assert!(writes > 600, "Expected mostly writes");
        assert!(flushes > 0 && persists > 0 && crashes > 0);
    }

    #[tokio::test]
    async fn test_crash_recovery_cycle() {
        let mut config = WriterDSTConfig::calm(999);
        config.crash_probability = 0.2;

        let mut harness = WriterDSTHarness::new(config);
        harness.run(200).await;
        harness.check_invariants().await;

        let result = harness.result();
        assert!(result.crashes > 0, "Should have some crashes");
        assert!(result.is_success(), "{:?}", result.invariant_violations);
    }

    #[tokio::test]
    async fn test_dst_batch_scratch_bucket() {
        let results = run_dst_batch(500, 10, 100, |seed| {
            WriterDSTConfig::moderate(seed).with_scratch_bucket()
        })
        .await;

        let summary = summarize_batch(&results);
        assert!(results.iter().all(|r| r.is_success()), "{}", summary);
    }
}
