//! Writer error taxonomy

use crate::blob::BlobIdentifier;
use crate::writer::codec::CodecError;
use std::io::{Error as IoError, ErrorKind};

/// Errors surfaced by the recoverable writer
#[derive(Debug, thiserror::Error)]
pub enum WriterError {
    /// Malformed path or argument; raised before any storage call
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A single storage call failed; the stream state is unchanged and the
    /// same call may be retried
    #[error("storage error: {0}")]
    Storage(#[from] IoError),

    /// A write made `accepted` bytes of the call durable or buffered before a
    /// chunk flush failed. Resume with the remaining bytes.
    #[error("write interrupted after {accepted} bytes were accepted: {source}")]
    PartialWrite {
        accepted: usize,
        #[source]
        source: IoError,
    },

    /// Recoverable state references a blob that no longer exists
    #[error("recoverable state references missing blob {blob}")]
    RecoveryInconsistency { blob: BlobIdentifier },

    /// Write, flush, persist or close on a closed stream
    #[error("stream is closed")]
    Closed,

    /// Recoverable state could not be decoded
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// Invalid writer configuration
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl WriterError {
    /// Whether retrying the same call can succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            WriterError::Storage(e) | WriterError::PartialWrite { source: e, .. } => {
                is_transient(e)
            }
            _ => false,
        }
    }
}

/// Storage errors worth retrying. Missing objects and rejected arguments are
/// permanent.
pub fn is_transient(e: &IoError) -> bool {
    !matches!(
        e.kind(),
        ErrorKind::NotFound
            | ErrorKind::InvalidInput
            | ErrorKind::PermissionDenied
            | ErrorKind::AlreadyExists
            | ErrorKind::Unsupported
    )
}

/// Result alias for writer operations
pub type WriterResult<T> = Result<T, WriterError>;
