//! Recoverable Writer
//!
//! ## Architecture
//!
//! ```text
//! RecoverableWriter::open() ──> RecoverableOutputStream
//!                                   │ write/flush: one temporary per chunk
//!                                   │ persist()  ──> ResumeState ──> recover()
//!                                   ▼
//!                               close() ──> CommitState ──> Committer
//!                                                             │ compose ≤32 at a time
//!                                                             ▼
//!                                                         final blob
//! ```
//!
//! All I/O goes through `BlobStorage`, so the whole path runs unchanged
//! against the in-memory and fault-injecting stores in DST.

pub mod codec;
pub mod committer;
pub mod dst;
pub mod recoverable;
pub mod state;
pub mod stream;

pub use codec::{CodecError, CommitStateSerializer, ResumeStateSerializer, StateSerializer};
pub use committer::{plan_commit, CommitStep, Committer};
pub use recoverable::RecoverableWriter;
pub use state::{CommitState, ResumeState};
pub use stream::RecoverableOutputStream;
