//! FileSystem facade over a blob store
//!
//! `BlobFileSystem` resolves `scheme://bucket/object` paths and hands out
//! recoverable writers. `create` returns a `CommittingOutputStream`, a plain
//! write-then-close stream whose close composes the final blob.

use crate::blob::{BlobIdentifier, DEFAULT_SCHEME};
use crate::config::WriterOptions;
use crate::error::{WriterError, WriterResult};
use crate::storage::BlobStorage;
use crate::writer::{CommitState, Committer, RecoverableOutputStream, RecoverableWriter};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Object store presented through path-based operations
#[derive(Clone)]
pub struct BlobFileSystem {
    scheme: String,
    storage: Arc<dyn BlobStorage>,
    options: WriterOptions,
}

impl BlobFileSystem {
    pub fn new(
        scheme: impl Into<String>,
        storage: Arc<dyn BlobStorage>,
        options: WriterOptions,
    ) -> WriterResult<Self> {
        options.validate()?;
        Ok(BlobFileSystem {
            scheme: scheme.into(),
            storage,
            options,
        })
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn options(&self) -> &WriterOptions {
        &self.options
    }

    pub fn create_recoverable_writer(&self) -> WriterResult<RecoverableWriter> {
        Ok(RecoverableWriter::new(self.storage.clone(), self.options.clone())?
            .with_scheme(self.scheme.clone()))
    }

    /// Open a stream whose `close` also commits
    pub fn create(&self, path: &str) -> WriterResult<CommittingOutputStream> {
        let stream = self.create_recoverable_writer()?.open(path)?;
        Ok(CommittingOutputStream {
            stream,
            committer: None,
            attempts: 0,
            committed: false,
        })
    }

    pub async fn exists(&self, path: &str) -> WriterResult<bool> {
        let blob = self.resolve(path)?;
        Ok(self.storage.exists(&blob).await?)
    }

    pub async fn size(&self, path: &str) -> WriterResult<u64> {
        let blob = self.resolve(path)?;
        Ok(self.storage.size(&blob).await?)
    }

    pub async fn read_range(&self, path: &str, offset: u64, length: u64) -> WriterResult<Vec<u8>> {
        let blob = self.resolve(path)?;
        Ok(self.storage.read_range(&blob, offset, length).await?)
    }

    /// Returns whether the object existed
    pub async fn delete(&self, path: &str) -> WriterResult<bool> {
        let blob = self.resolve(path)?;
        Ok(self.storage.delete(&blob).await?)
    }

    fn resolve(&self, path: &str) -> WriterResult<BlobIdentifier> {
        BlobIdentifier::parse_uri(path, &self.scheme)
    }
}

impl std::fmt::Debug for BlobFileSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobFileSystem")
            .field("scheme", &self.scheme)
            .field("options", &self.options)
            .finish()
    }
}

/// Stream returned by `BlobFileSystem::create`.
///
/// A failed `close` keeps the commit state, so calling `close` again resumes
/// the commit instead of leaking the temporaries.
#[derive(Debug)]
pub struct CommittingOutputStream {
    stream: RecoverableOutputStream,
    committer: Option<Committer>,
    attempts: u32,
    committed: bool,
}

impl CommittingOutputStream {
    pub fn pos(&self) -> u64 {
        self.stream.pos()
    }

    pub async fn write(&mut self, data: &[u8]) -> WriterResult<()> {
        self.stream.write(data).await
    }

    pub async fn flush(&mut self) -> WriterResult<()> {
        self.stream.flush().await
    }

    /// State of the pending commit, once the stream has been closed
    pub fn commit_state(&self) -> Option<&CommitState> {
        self.committer.as_ref().map(Committer::commit_state)
    }

    /// Close the stream and compose the final blob. Safe to call again after
    /// an error; fails with `Closed` once the blob is committed.
    pub async fn close(&mut self) -> WriterResult<()> {
        if self.committed {
            return Err(WriterError::Closed);
        }
        let committer = match self.committer.take() {
            Some(committer) => committer,
            None => self.stream.close_for_commit().await?,
        };

        self.attempts += 1;
        let result = if self.attempts == 1 {
            committer.commit().await
        } else {
            committer.commit_after_recovery().await
        };
        self.committed = result.is_ok();
        self.committer = Some(committer);
        result
    }
}

/// Builds `BlobFileSystem`s from flat configuration properties
#[derive(Debug, Clone)]
pub struct BlobFileSystemPlugin {
    scheme: String,
}

impl Default for BlobFileSystemPlugin {
    fn default() -> Self {
        BlobFileSystemPlugin::new(DEFAULT_SCHEME)
    }
}

impl BlobFileSystemPlugin {
    pub fn new(scheme: impl Into<String>) -> Self {
        BlobFileSystemPlugin {
            scheme: scheme.into(),
        }
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn create(
        &self,
        properties: &HashMap<String, String>,
        storage: Arc<dyn BlobStorage>,
    ) -> WriterResult<BlobFileSystem> {
        let options = WriterOptions::from_properties(properties)?;
        info!(
            scheme = %self.scheme,
            chunk_size = options.chunk_size,
            temporary_bucket = ?options.temporary_bucket,
            entropy_injection = options.entropy_injection,
            compose_group_size = options.compose_group_size,
            temporary_objects_expire = options.temporary_objects_expire,
            retry_max_attempts = options.retry.max_attempts,
            "creating blob filesystem"
        );
        BlobFileSystem::new(self.scheme.clone(), storage, options)
    }
}
