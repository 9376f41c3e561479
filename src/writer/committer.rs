//! Commit: compose temporaries into the final blob
//!
//! ## Plan
//!
//! Components are composed in write order, at most `group_size` at a time.
//! While more sources remain than one compose accepts, each fixed-size group
//! is composed into an intermediate blob and the intermediates form the next
//! level. A group of one is carried up unchanged.
//!
//! ```text
//! c0 .. c31 | c32 .. c63 | c64     (65 components, group 32)
//!     i0          i1        c64
//!            final
//! ```
//!
//! Intermediate ids are UUIDv5 of their sources' ids, so re-running a commit
//! from the same `CommitState` reproduces the same names. Sources are deleted
//! once their parent compose has succeeded.
//!
//! With a scratch bucket the last compose targets an intermediate in the
//! scratch bucket which is then copied into the final bucket (compose cannot
//! cross buckets).

use crate::blob::{BlobIdentifier, BlobNaming};
use crate::error::{WriterError, WriterResult};
use crate::storage::{BlobStorage, COMPOSE_MAX_BLOBS};
use crate::writer::state::CommitState;
use futures::future::try_join_all;
use std::collections::{HashMap, HashSet};
use std::io::ErrorKind;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Namespace for intermediate compose ids
const INTERMEDIATE_NAMESPACE: Uuid = Uuid::from_u128(0x6b1d_54c2_3f0e_4a7b_9d21_c8e5_70a4_1f36);

/// One storage operation of a commit
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitStep {
    /// Write a zero-length final blob
    WriteEmpty { target: BlobIdentifier },
    /// Compose `sources` in order into `target`, then delete the sources
    Compose {
        sources: Vec<BlobIdentifier>,
        target: BlobIdentifier,
    },
    /// Copy `source` to `target`, then delete the source
    Copy {
        source: BlobIdentifier,
        target: BlobIdentifier,
    },
}

impl CommitStep {
    pub fn target(&self) -> &BlobIdentifier {
        match self {
            CommitStep::WriteEmpty { target }
            | CommitStep::Compose { target, .. }
            | CommitStep::Copy { target, .. } => target,
        }
    }

    /// Blobs deleted once this step succeeds
    pub fn sources(&self) -> &[BlobIdentifier] {
        match self {
            CommitStep::WriteEmpty { .. } => &[],
            CommitStep::Compose { sources, .. } => sources,
            CommitStep::Copy { source, .. } => std::slice::from_ref(source),
        }
    }
}

/// Build the ordered steps that turn `state` into its final blob.
///
/// Panics if `group_size` is outside `2..=COMPOSE_MAX_BLOBS`.
pub fn plan_commit(state: &CommitState, naming: &BlobNaming, group_size: usize) -> Vec<CommitStep> {
    assert!(
        (2..=COMPOSE_MAX_BLOBS).contains(&group_size),
        "compose group size {} outside 2..={}",
        group_size,
        COMPOSE_MAX_BLOBS
    );

    let final_blob = state.final_blob();
    if state.component_ids().is_empty() {
        return vec![CommitStep::WriteEmpty {
            target: final_blob.clone(),
        }];
    }

    let mut steps = Vec::new();
    let mut level: Vec<(Uuid, BlobIdentifier)> = state
        .component_ids()
        .iter()
        .map(|id| (*id, naming.temporary_blob(final_blob, *id)))
        .collect();

    while level.len() > group_size {
        let mut next = Vec::with_capacity(level.len().div_ceil(group_size));
        for group in level.chunks(group_size) {
            if let [single] = group {
                next.push(single.clone());
                continue;
            }
            let (id, target) = intermediate(final_blob, naming, group);
            steps.push(CommitStep::Compose {
                sources: group.iter().map(|(_, blob)| blob.clone()).collect(),
                target: target.clone(),
            });
            next.push((id, target));
        }
        level = next;
    }

    if !naming.uses_scratch_bucket(final_blob) {
        steps.push(CommitStep::Compose {
            sources: level.into_iter().map(|(_, blob)| blob).collect(),
            target: final_blob.clone(),
        });
        return steps;
    }

    let source = match level.as_slice() {
        [(_, single)] => single.clone(),
        _ => {
            let (_, target) = intermediate(final_blob, naming, &level);
            steps.push(CommitStep::Compose {
                sources: level.into_iter().map(|(_, blob)| blob).collect(),
                target: target.clone(),
            });
            target
        }
    };
    steps.push(CommitStep::Copy {
        source,
        target: final_blob.clone(),
    });
    steps
}

fn intermediate(
    final_blob: &BlobIdentifier,
    naming: &BlobNaming,
    group: &[(Uuid, BlobIdentifier)],
) -> (Uuid, BlobIdentifier) {
    let mut seed = Vec::with_capacity(group.len() * 16);
    for (id, _) in group {
        seed.extend_from_slice(id.as_bytes());
    }
    let id = Uuid::new_v5(&INTERMEDIATE_NAMESPACE, &seed);
    (id, naming.temporary_blob(final_blob, id))
}

/// Finalizes one `CommitState`
pub struct Committer {
    storage: Arc<dyn BlobStorage>,
    naming: BlobNaming,
    group_size: usize,
    state: CommitState,
}

impl Committer {
    pub fn new(
        storage: Arc<dyn BlobStorage>,
        naming: BlobNaming,
        group_size: usize,
        state: CommitState,
    ) -> Self {
        Committer {
            storage,
            naming,
            group_size,
            state,
        }
    }

    pub fn commit_state(&self) -> &CommitState {
        &self.state
    }

    pub fn plan(&self) -> Vec<CommitStep> {
        plan_commit(&self.state, &self.naming, self.group_size)
    }

    /// Commit, failing with `RecoveryInconsistency` if any source is missing
    pub async fn commit(&self) -> WriterResult<()> {
        self.run(false).await
    }

    /// Commit again after an interrupted attempt. Steps the earlier attempt
    /// finished are skipped and only their leftover sources are deleted.
    pub async fn commit_after_recovery(&self) -> WriterResult<()> {
        self.run(true).await
    }

    async fn run(&self, recovering: bool) -> WriterResult<()> {
        let final_blob = self.state.final_blob();
        let steps = self.plan();
        info!(
            blob = %final_blob,
            components = self.state.component_ids().len(),
            steps = steps.len(),
            recovering,
            "committing"
        );

        let done = if recovering {
            self.completed_steps(&steps).await?
        } else {
            vec![false; steps.len()]
        };

        for (step, done) in steps.iter().zip(done) {
            if done {
                debug!(target = %step.target(), "step completed by an earlier attempt");
                self.delete_leftovers(step.sources()).await?;
                continue;
            }
            match self.execute(step).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    return Err(self.inconsistency(step.sources(), e).await);
                }
                Err(e) => return Err(WriterError::Storage(e)),
            }
            self.delete_all(step.sources()).await?;
        }

        info!(blob = %final_blob, "commit complete");
        Ok(())
    }

    /// Which steps an interrupted attempt already ran.
    ///
    /// Steps run in plan order and a step deletes its sources only after its
    /// target is written. A source that is gone is therefore evidence that its
    /// step ran, provided it is a component or an intermediate whose own step
    /// ran. The last step with such evidence is where the attempt stopped:
    /// every earlier step must have lost all of its sources and that step's
    /// target must exist. The final blob existing proves nothing on its own,
    /// it may predate this commit.
    async fn completed_steps(&self, steps: &[CommitStep]) -> WriterResult<Vec<bool>> {
        let producer: HashMap<&BlobIdentifier, usize> = steps
            .iter()
            .enumerate()
            .map(|(i, step)| (step.target(), i))
            .collect();

        let mut missing: HashSet<&BlobIdentifier> = HashSet::new();
        for source in steps.iter().flat_map(CommitStep::sources) {
            if !self.storage.exists(source).await? {
                missing.insert(source);
            }
        }

        let mut ran = vec![false; steps.len()];
        for (i, step) in steps.iter().enumerate() {
            let deleted = step.sources().iter().any(|source| {
                missing.contains(source) && producer.get(source).map_or(true, |&p| ran[p])
            });
            ran[i] = deleted;
        }

        let Some(last) = ran.iter().rposition(|&r| r) else {
            return Ok(ran);
        };

        let stalled = steps[..last]
            .iter()
            .flat_map(CommitStep::sources)
            .any(|source| !missing.contains(source));
        if stalled || !self.storage.exists(steps[last].target()).await? {
            let blob = steps
                .iter()
                .flat_map(CommitStep::sources)
                .find(|source| missing.contains(source) && !producer.contains_key(source))
                .unwrap_or_else(|| steps[last].target())
                .clone();
            warn!(
                target = %steps[last].target(),
                missing = %blob,
                "interrupted commit does not match its plan"
            );
            return Err(WriterError::RecoveryInconsistency { blob });
        }

        debug!(
            target = %steps[last].target(),
            step = last,
            "resuming after step finished by an earlier attempt"
        );
        ran[..=last].iter_mut().for_each(|r| *r = true);
        Ok(ran)
    }

    async fn execute(&self, step: &CommitStep) -> std::io::Result<()> {
        match step {
            CommitStep::WriteEmpty { target } => {
                debug!(target = %target, "writing empty final blob");
                self.storage.put_object(target, &[]).await
            }
            CommitStep::Compose { sources, target } => {
                debug!(target = %target, sources = sources.len(), "composing");
                self.storage.compose(sources, target).await
            }
            CommitStep::Copy { source, target } => {
                debug!(source = %source, target = %target, "copying");
                self.storage.copy(source, target).await
            }
        }
    }

    async fn delete_all(&self, blobs: &[BlobIdentifier]) -> WriterResult<()> {
        try_join_all(blobs.iter().map(|blob| async move {
            let existed = self.storage.delete(blob).await?;
            debug!(blob = %blob, existed, "deleted temporary");
            Ok::<_, std::io::Error>(())
        }))
        .await?;
        Ok(())
    }

    /// Delete the sources of a finished step that are still present
    async fn delete_leftovers(&self, blobs: &[BlobIdentifier]) -> WriterResult<()> {
        let mut present = Vec::new();
        for blob in blobs {
            if self.storage.exists(blob).await? {
                present.push(blob.clone());
            }
        }
        self.delete_all(&present).await
    }

    /// Name the missing source behind a `NotFound`
    async fn inconsistency(
        &self,
        sources: &[BlobIdentifier],
        cause: std::io::Error,
    ) -> WriterError {
        for source in sources {
            match self.storage.exists(source).await {
                Ok(false) => {
                    return WriterError::RecoveryInconsistency {
                        blob: source.clone(),
                    }
                }
                Ok(true) => {}
                Err(e) => return WriterError::Storage(e),
            }
        }
        WriterError::Storage(cause)
    }
}

impl std::fmt::Debug for Committer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Committer")
            .field("state", &self.state)
            .field("group_size", &self.group_size)
            .finish()
    }
}
