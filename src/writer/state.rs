//! Recoverable state snapshots
//!
//! `ResumeState` is taken mid-write by `persist()`; `CommitState` is produced
//! once by `close()`. Both hold the component list as `Arc<[Uuid]>`, which
//! has no mutating API. Cloning a state shares the list.
//!
//! ```compile_fail
//! use blobsink::{BlobIdentifier, ResumeState};
//!
//! let blob = BlobIdentifier::new("bucket", "object").unwrap();
//! let state = ResumeState::new(blob, Vec::<uuid::Uuid>::new(), 0, false);
//! state.component_ids().push(uuid::Uuid::nil());
//! ```

use crate::blob::BlobIdentifier;
use std::sync::Arc;
use uuid::Uuid;

/// Snapshot of an open stream, sufficient to resume writing after a crash
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResumeState {
    final_blob: BlobIdentifier,
    component_ids: Arc<[Uuid]>,
    position: u64,
    closed: bool,
}

impl ResumeState {
    pub fn new(
        final_blob: BlobIdentifier,
        component_ids: impl Into<Arc<[Uuid]>>,
        position: u64,
        closed: bool,
    ) -> Self {
        ResumeState {
            final_blob,
            component_ids: component_ids.into(),
            position,
            closed,
        }
    }

    pub fn final_blob(&self) -> &BlobIdentifier {
        &self.final_blob
    }

    /// Component ids in write order
    pub fn component_ids(&self) -> &[Uuid] {
        &self.component_ids
    }

    /// Bytes durably written so far
    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// The commit state this snapshot would produce if closed now
    pub fn to_commit_state(&self) -> CommitState {
        CommitState {
            final_blob: self.final_blob.clone(),
            component_ids: self.component_ids.clone(),
        }
    }
}

/// Everything needed to finalize a closed stream
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CommitState {
    final_blob: BlobIdentifier,
    component_ids: Arc<[Uuid]>,
}

impl CommitState {
    pub fn new(final_blob: BlobIdentifier, component_ids: impl Into<Arc<[Uuid]>>) -> Self {
        CommitState {
            final_blob,
            component_ids: component_ids.into(),
        }
    }

    pub fn final_blob(&self) -> &BlobIdentifier {
        &self.final_blob
    }

    pub fn component_ids(&self) -> &[Uuid] {
        &self.component_ids
    }
}
