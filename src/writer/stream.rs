//! Recoverable output stream
//!
//! Buffers written bytes and flushes every full chunk as a new temporary
//! component. The component list only grows, and only by the id of a chunk
//! whose PUT succeeded. A failed flush keeps its component id so the retry
//! overwrites the same temporary instead of leaking a second one.

use crate::blob::{BlobIdentifier, BlobNaming};
use crate::error::{WriterError, WriterResult};
use crate::storage::BlobStorage;
use crate::writer::committer::Committer;
use crate::writer::state::{CommitState, ResumeState};
use std::io::Result as IoResult;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Append-style stream onto one final blob
pub struct RecoverableOutputStream {
    storage: Arc<dyn BlobStorage>,
    naming: BlobNaming,
    chunk_size: usize,
    group_size: usize,
    final_blob: BlobIdentifier,
    buffer: Vec<u8>,
    /// Id reserved for the chunk currently being flushed
    pending_component: Option<Uuid>,
    component_ids: Vec<Uuid>,
    /// Bytes durably stored in components
    position: u64,
    closed: bool,
}

impl RecoverableOutputStream {
    pub(crate) fn new(
        storage: Arc<dyn BlobStorage>,
        naming: BlobNaming,
        chunk_size: usize,
        group_size: usize,
        final_blob: BlobIdentifier,
    ) -> Self {
        RecoverableOutputStream {
            storage,
            naming,
            chunk_size,
            group_size,
            final_blob,
            buffer: Vec::with_capacity(chunk_size),
            pending_component: None,
            component_ids: Vec::new(),
            position: 0,
            closed: false,
        }
    }

    pub(crate) fn resume(
        storage: Arc<dyn BlobStorage>,
        naming: BlobNaming,
        chunk_size: usize,
        group_size: usize,
        state: &ResumeState,
    ) -> Self {
        let mut stream = Self::new(
            storage,
            naming,
            chunk_size,
            group_size,
            state.final_blob().clone(),
        );
        // A closed snapshot still resumes Open so close() can re-derive its CommitState
        stream.component_ids = state.component_ids().to_vec();
        stream.position = state.position();
        stream
    }

    pub fn final_blob(&self) -> &BlobIdentifier {
        &self.final_blob
    }

    /// Durable components in write order
    pub fn component_ids(&self) -> &[Uuid] {
        &self.component_ids
    }

    /// Logical position: durable bytes plus buffered bytes
    pub fn pos(&self) -> u64 {
        self.position + self.buffer.len() as u64
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Append `data`, flushing each chunk that fills up.
    ///
    /// If a flush fails, bytes of this call that were not stored are dropped
    /// from the buffer. The error is `Storage` when nothing of `data` was
    /// accepted, else `PartialWrite { accepted }`: retry with
    /// `&data[accepted..]`.
    pub async fn write(&mut self, data: &[u8]) -> WriterResult<()> {
        self.ensure_open()?;

        let mut offset = 0;
        while offset < data.len() {
            let take = (self.chunk_size - self.buffer.len()).min(data.len() - offset);
            self.buffer.extend_from_slice(&data[offset..offset + take]);
            offset += take;

            if self.buffer.len() < self.chunk_size {
                continue;
            }
            if let Err(e) = self.flush_buffer().await {
                self.buffer.truncate(self.buffer.len() - take);
                let accepted = offset - take;
                return Err(if accepted == 0 {
                    WriterError::Storage(e)
                } else {
                    WriterError::PartialWrite {
                        accepted,
                        source: e,
                    }
                });
            }
        }
        Ok(())
    }

    /// Store any buffered bytes as a component
    pub async fn flush(&mut self) -> WriterResult<()> {
        self.ensure_open()?;
        self.flush_buffer().await?;
        Ok(())
    }

    pub async fn sync(&mut self) -> WriterResult<()> {
        self.flush().await
    }

    /// Flush, then snapshot everything written so far
    pub async fn persist(&mut self) -> WriterResult<ResumeState> {
        self.flush().await?;
        Ok(ResumeState::new(
            self.final_blob.clone(),
            self.component_ids.clone(),
            self.position,
            false,
        ))
    }

    /// Flush remaining bytes and close. A failed flush leaves the stream
    /// open so `close` can be retried.
    pub async fn close(&mut self) -> WriterResult<CommitState> {
        self.ensure_open()?;
        self.flush_buffer().await?;
        self.closed = true;
        debug!(
            blob = %self.final_blob,
            components = self.component_ids.len(),
            position = self.position,
            "stream closed"
        );
        Ok(CommitState::new(
            self.final_blob.clone(),
            self.component_ids.clone(),
        ))
    }

    /// Close and return the committer for the resulting state
    pub async fn close_for_commit(&mut self) -> WriterResult<Committer> {
        let state = self.close().await?;
        Ok(Committer::new(
            self.storage.clone(),
            self.naming.clone(),
            self.group_size,
            state,
        ))
    }

    fn ensure_open(&self) -> WriterResult<()> {
        if self.closed {
            return Err(WriterError::Closed);
        }
        Ok(())
    }

    async fn flush_buffer(&mut self) -> IoResult<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        let id = *self.pending_component.get_or_insert_with(Uuid::new_v4);
        let blob = self.naming.temporary_blob(&self.final_blob, id);
        self.storage.put_object(&blob, &self.buffer).await?;

        debug!(blob = %blob, bytes = self.buffer.len(), "flushed component");
        self.component_ids.push(id);
        self.position += self.buffer.len() as u64;
        self.buffer.clear();
        self.pending_component = None;
        Ok(())
    }
}

impl std::fmt::Debug for RecoverableOutputStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecoverableOutputStream")
            .field("final_blob", &self.final_blob)
            .field("components", &self.component_ids.len())
            .field("position", &self.position)
            .field("buffered", &self.buffer.len())
            .field("closed", &self.closed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::SimulatedRng;
    use crate::storage::{
        InMemoryBlobStorage, SimulatedBlobStorage, SimulatedStorageConfig, StorageFuture,
    };
    use std::io::ErrorKind;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn stream_on(storage: Arc<dyn BlobStorage>, chunk_size: usize) -> RecoverableOutputStream {
        RecoverableOutputStream::new(
            storage,
            BlobNaming::default(),
            chunk_size,
            32,
            BlobIdentifier::new("bucket", "out").unwrap(),
        )
    }

    #[tokio::test]
    async fn test_write_flushes_full_chunks() {
        let storage = InMemoryBlobStorage::new();
        let mut stream = stream_on(Arc::new(storage.clone()), 4);

        stream.write(b"abcdefghij").await.unwrap();
        assert_eq!(stream.component_ids().len(), 2);
        assert_eq!(stream.pos(), 10);
        assert_eq!(storage.call_counts().puts, 2);

        let state = stream.persist().await.unwrap();
        assert_eq!(state.position(), 10);
        assert_eq!(state.component_ids().len(), 3);
        assert!(!state.is_closed());
    }

    #[tokio::test]
    async fn test_close_twice_and_write_after_close() {
        let mut stream = stream_on(Arc::new(InMemoryBlobStorage::new()), 4);
        stream.write(b"xy").await.unwrap();

        let state = stream.close().await.unwrap();
        assert_eq!(state.component_ids().len(), 1);
        assert!(matches!(stream.close().await, Err(WriterError::Closed)));
        assert!(matches!(stream.write(b"z").await, Err(WriterError::Closed)));
        assert!(matches!(stream.persist().await, Err(WriterError::Closed)));
    }

    #[tokio::test]
    async fn test_empty_flush_stores_nothing() {
        let storage = InMemoryBlobStorage::new();
        let mut stream = stream_on(Arc::new(storage.clone()), 4);
        stream.flush().await.unwrap();
        stream.sync().await.unwrap();
        assert!(stream.component_ids().is_empty());
        assert_eq!(storage.call_counts().total(), 0);
    }

    #[tokio::test]
    async fn test_failed_flush_keeps_components_and_reuses_id() {
        let inner = InMemoryBlobStorage::new();
        let failing: Arc<dyn BlobStorage> = Arc::new(SimulatedBlobStorage::new(
            inner.clone(),
            SimulatedRng::new(1),
            SimulatedStorageConfig {
                ambiguous_put_prob: 1.0,
                ..SimulatedStorageConfig::no_faults()
            },
        ));
        let mut stream = stream_on(failing, 4);

        // Nothing of the call was accepted
        let err = stream.write(b"abcd").await.unwrap_err();
        assert!(matches!(err, WriterError::Storage(_)));
        assert!(stream.component_ids().is_empty());
        assert_eq!(stream.pos(), 0);
        let pending = stream.pending_component.unwrap();

        // Swap in a healthy store; the retried chunk lands on the same name
        stream.storage = Arc::new(inner.clone());
        stream.write(b"abcd").await.unwrap();
        assert_eq!(stream.component_ids(), &[pending]);
        assert_eq!(inner.len(), 1);
    }

    /// Lets `ok_puts` PUTs through, then fails every PUT
    struct FailAfter {
        inner: InMemoryBlobStorage,
        ok_puts: AtomicUsize,
    }

    impl FailAfter {
        fn new(inner: InMemoryBlobStorage, ok_puts: usize) -> Self {
            FailAfter {
                inner,
                ok_puts: AtomicUsize::new(ok_puts),
            }
        }
    }

    impl BlobStorage for FailAfter {
        fn put_object<'a>(
            &'a self,
            blob: &'a BlobIdentifier,
            data: &'a [u8],
        ) -> StorageFuture<'a, ()> {
            Box::pin(async move {
                let allowed = self
                    .ok_puts
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok();
                if !allowed {
                    return Err(std::io::Error::new(ErrorKind::Other, "injected put failure"));
                }
                self.inner.put_object(blob, data).await
            })
        }

        fn read_range<'a>(
            &'a self,
            blob: &'a BlobIdentifier,
            offset: u64,
            length: u64,
        ) -> StorageFuture<'a, Vec<u8>> {
            self.inner.read_range(blob, offset, length)
        }

        fn compose<'a>(
            &'a self,
            sources: &'a [BlobIdentifier],
            destination: &'a BlobIdentifier,
        ) -> StorageFuture<'a, ()> {
            self.inner.compose(sources, destination)
        }

        fn copy<'a>(
            &'a self,
            source: &'a BlobIdentifier,
            destination: &'a BlobIdentifier,
        ) -> StorageFuture<'a, ()> {
            self.inner.copy(source, destination)
        }

        fn delete<'a>(&'a self, blob: &'a BlobIdentifier) -> StorageFuture<'a, bool> {
            self.inner.delete(blob)
        }

        fn exists<'a>(&'a self, blob: &'a BlobIdentifier) -> StorageFuture<'a, bool> {
            self.inner.exists(blob)
        }

        fn size<'a>(&'a self, blob: &'a BlobIdentifier) -> StorageFuture<'a, u64> {
            self.inner.size(blob)
        }
    }

    #[tokio::test]
    async fn test_partial_write_reports_accepted_bytes() {
        let inner = InMemoryBlobStorage::new();
        let mut stream = stream_on(Arc::new(FailAfter::new(inner.clone(), 1)), 4);

        let data = b"abcdefghij";
        match stream.write(data).await.unwrap_err() {
            WriterError::PartialWrite { accepted, .. } => assert_eq!(accepted, 4),
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(stream.pos(), 4);
        assert_eq!(stream.component_ids().len(), 1);

        stream.storage = Arc::new(inner.clone());
        stream.write(&data[4..]).await.unwrap();
        let committer = stream.close_for_commit().await.unwrap();
        assert_eq!(committer.commit_state().component_ids().len(), 3);
        committer.commit().await.unwrap();

        let out = BlobIdentifier::new("bucket", "out").unwrap();
        assert_eq!(inner.get(&out).unwrap().as_ref(), data);
        assert_eq!(inner.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_chunk_drops_only_bytes_of_the_call() {
        let inner = InMemoryBlobStorage::new();
        let mut stream = stream_on(Arc::new(FailAfter::new(inner.clone(), 0)), 4);
        stream.write(b"ab").await.unwrap();

        let err = stream.write(b"cdef").await.unwrap_err();
        assert!(matches!(err, WriterError::Storage(_)));
        assert_eq!(stream.pos(), 2);

        let err = stream.close().await.unwrap_err();
        assert!(err.is_retryable());
        assert!(!stream.is_closed());

        stream.storage = Arc::new(inner.clone());
        stream.write(b"cdef").await.unwrap();
        let state = stream.close().await.unwrap();
        assert_eq!(state.component_ids().len(), 2);
        assert_eq!(stream.pos(), 6);
    }
}
