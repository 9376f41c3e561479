//! Recoverable writer: opens, resumes, commits and cleans up streams

use crate::blob::{BlobIdentifier, BlobNaming, DEFAULT_SCHEME};
use crate::config::WriterOptions;
use crate::error::WriterResult;
use crate::storage::BlobStorage;
use crate::writer::codec::{CommitStateSerializer, ResumeStateSerializer};
use crate::writer::committer::Committer;
use crate::writer::state::{CommitState, ResumeState};
use crate::writer::stream::RecoverableOutputStream;
use futures::future::try_join_all;
use std::sync::Arc;
use tracing::{debug, info};

/// Entry point for recoverable writes against one storage client
#[derive(Clone)]
pub struct RecoverableWriter {
    storage: Arc<dyn BlobStorage>,
    options: WriterOptions,
    naming: BlobNaming,
    scheme: String,
}

impl RecoverableWriter {
    /// Fails with `Config` if `options` do not validate
    pub fn new(storage: Arc<dyn BlobStorage>, options: WriterOptions) -> WriterResult<Self> {
        options.validate()?;
        let naming = BlobNaming::new(options.temporary_bucket.clone(), options.entropy_injection);
        Ok(RecoverableWriter {
            storage,
            options,
            naming,
            scheme: DEFAULT_SCHEME.to_string(),
        })
    }

    /// URI scheme accepted by `open` (default `gs`)
    pub fn with_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = scheme.into();
        self
    }

    pub fn options(&self) -> &WriterOptions {
        &self.options
    }

    pub fn naming(&self) -> &BlobNaming {
        &self.naming
    }

    /// Open a stream onto `scheme://bucket/object`. Makes no storage call.
    pub fn open(&self, path: &str) -> WriterResult<RecoverableOutputStream> {
        let final_blob = BlobIdentifier::parse_uri(path, &self.scheme)?;
        Ok(self.open_blob(final_blob))
    }

    pub fn open_blob(&self, final_blob: BlobIdentifier) -> RecoverableOutputStream {
        info!(
            blob = %final_blob,
            chunk_size = self.options.chunk_size,
            "opening recoverable stream"
        );
        RecoverableOutputStream::new(
            self.storage.clone(),
            self.naming.clone(),
            self.options.chunk_size,
            self.options.compose_group_size,
            final_blob,
        )
    }

    /// Continue a stream from a persisted snapshot. Makes no storage call.
    pub fn recover(&self, state: &ResumeState) -> RecoverableOutputStream {
        info!(
            blob = %state.final_blob(),
            position = state.position(),
            components = state.component_ids().len(),
            "recovering stream"
        );
        RecoverableOutputStream::resume(
            self.storage.clone(),
            self.naming.clone(),
            self.options.chunk_size,
            self.options.compose_group_size,
            state,
        )
    }

    pub fn recover_for_commit(&self, state: &CommitState) -> Committer {
        Committer::new(
            self.storage.clone(),
            self.naming.clone(),
            self.options.compose_group_size,
            state.clone(),
        )
    }

    /// Delete the components named by `state`. Returns whether any existed.
    pub async fn cleanup_recoverable_state(&self, state: &ResumeState) -> WriterResult<bool> {
        let final_blob = state.final_blob();
        let deleted = try_join_all(state.component_ids().iter().map(|id| {
            let blob = self.naming.temporary_blob(final_blob, *id);
            async move { self.storage.delete(&blob).await }
        }))
        .await?;

        let removed = deleted.iter().filter(|d| **d).count();
        debug!(blob = %final_blob, removed, "cleaned up recoverable state");
        Ok(removed > 0)
    }

    /// False when temporaries are removed by the bucket itself
    pub fn requires_cleanup_of_recoverable_state(&self) -> bool {
        !self.options.temporary_objects_expire
    }

    pub fn supports_resume(&self) -> bool {
        true
    }

    pub fn resume_state_serializer(&self) -> ResumeStateSerializer {
        ResumeStateSerializer
    }

    pub fn commit_state_serializer(&self) -> CommitStateSerializer {
        CommitStateSerializer
    }
}

impl std::fmt::Debug for RecoverableWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecoverableWriter")
            .field("scheme", &self.scheme)
            .field("options", &self.options)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WriterError;
    use crate::storage::InMemoryBlobStorage;
    use crate::writer::codec::StateSerializer;

    fn writer(storage: &InMemoryBlobStorage, options: WriterOptions) -> RecoverableWriter {
        RecoverableWriter::new(Arc::new(storage.clone()), options).unwrap()
    }

    #[test]
    fn test_open_rejects_bad_paths_without_storage_calls() {
        let storage = InMemoryBlobStorage::new();
        let writer = writer(&storage, WriterOptions::test());

        for path in ["gs:///bar", "gs://foo/", "gs://foo", "s3://foo/bar", "foo/bar"] {
            let err = writer.open(path).unwrap_err();
            assert!(matches!(err, WriterError::InvalidArgument(_)), "{}", path);
        }
        assert!(writer.open("gs://foo/bar").is_ok());
        assert_eq!(storage.call_counts().total(), 0);
    }

    #[test]
    fn test_custom_scheme() {
        let storage = InMemoryBlobStorage::new();
        let writer = writer(&storage, WriterOptions::test()).with_scheme("mem");
        assert!(writer.open("mem://bucket/a").is_ok());
        assert!(writer.open("gs://bucket/a").is_err());
    }

    #[test]
    fn test_invalid_options_rejected() {
        let storage = InMemoryBlobStorage::new();
        let err = RecoverableWriter::new(
            Arc::new(storage),
            WriterOptions::test().with_compose_group_size(64),
        )
        .unwrap_err();
        assert!(matches!(err, WriterError::Config(_)));
    }

    #[tokio::test]
    async fn test_recover_position() {
        let storage = InMemoryBlobStorage::new();
        let writer = writer(&storage, WriterOptions::test());

        let mut stream = writer.open("gs://bucket/out").unwrap();
        stream.write(b"0123456789").await.unwrap();
        let state = stream.persist().await.unwrap();

        let before = storage.call_counts();
        let recovered = writer.recover(&state);
        assert_eq!(storage.call_counts(), before);
        assert_eq!(recovered.pos(), 10);
        assert_eq!(recovered.component_ids(), state.component_ids());
    }

    #[tokio::test]
    async fn test_recover_for_commit() {
        let storage = InMemoryBlobStorage::new();
        let writer = writer(&storage, WriterOptions::test());

        let mut stream = writer.open("gs://bucket/out").unwrap();
        stream.write(b"hello").await.unwrap();
        let state = stream.close().await.unwrap();

        let bytes = writer.commit_state_serializer().serialize(&state);
        let decoded = writer.commit_state_serializer().deserialize(&bytes).unwrap();
        let committer = writer.recover_for_commit(&decoded);
        assert_eq!(committer.commit_state(), &state);
        committer.commit().await.unwrap();

        let out = BlobIdentifier::new("bucket", "out").unwrap();
        assert_eq!(storage.get(&out).unwrap().as_ref(), b"hello");
    }

    #[tokio::test]
    async fn test_cleanup_is_idempotent() {
        let storage = InMemoryBlobStorage::new();
        let writer = writer(&storage, WriterOptions::test());

        let mut stream = writer.open("gs://bucket/out").unwrap();
        stream.write(&[7u8; 40]).await.unwrap();
        let state = stream.persist().await.unwrap();
        assert!(!storage.is_empty());

        assert!(writer.cleanup_recoverable_state(&state).await.unwrap());
        assert!(storage.is_empty());
        assert!(!writer.cleanup_recoverable_state(&state).await.unwrap());
    }

    #[test]
    fn test_capabilities() {
        let storage = InMemoryBlobStorage::new();
        let writer = writer(&storage, WriterOptions::test());
        assert!(writer.supports_resume());
        assert!(writer.requires_cleanup_of_recoverable_state());
        assert_eq!(writer.resume_state_serializer().version(), 1);

        let expiring = WriterOptions {
            temporary_objects_expire: true,
            ..WriterOptions::test()
        };
        assert!(!self::writer(&storage, expiring).requires_cleanup_of_recoverable_state());
    }
}
