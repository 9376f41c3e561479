//! Per-call retry wrapper
//!
//! Each storage call is idempotent for the writer's purposes (PUT overwrites,
//! compose rewrites the same destination, delete reports absence), so a
//! failed call is simply re-issued after a backoff.

use crate::blob::BlobIdentifier;
use crate::config::RetryOptions;
use crate::error::is_transient;
use crate::storage::{BlobStorage, StorageFuture};
use std::io::Result as IoResult;
use tracing::{debug, warn};

/// Retries transient failures of the wrapped storage with exponential backoff
pub struct RetryingBlobStorage<S: BlobStorage> {
    inner: S,
    options: RetryOptions,
}

impl<S: BlobStorage> RetryingBlobStorage<S> {
    pub fn new(inner: S, options: RetryOptions) -> Self {
        RetryingBlobStorage { inner, options }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn options(&self) -> &RetryOptions {
        &self.options
    }

    async fn with_retry<'a, T, F>(&'a self, op: &'static str, call: F) -> IoResult<T>
    where
        F: Fn(&'a S) -> StorageFuture<'a, T>,
    {
        let mut attempt = 1;
        loop {
            match call(&self.inner).await {
                Ok(value) => return Ok(value),
                Err(e) if !is_transient(&e) => return Err(e),
                Err(e) if attempt >= self.options.max_attempts => {
                    warn!(op, attempts = attempt, error = %e, "storage call failed, giving up");
                    return Err(e);
                }
                Err(e) => {
                    let delay = self.options.backoff(attempt);
                    debug!(op, attempt, ?delay, error = %e, "storage call failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

impl<S: BlobStorage> BlobStorage for RetryingBlobStorage<S> {
    fn put_object<'a>(&'a self, blob: &'a BlobIdentifier, data: &'a [u8]) -> StorageFuture<'a, ()> {
        Box::pin(self.with_retry("put_object", move |s| s.put_object(blob, data)))
    }

    fn read_range<'a>(
        &'a self,
        blob: &'a BlobIdentifier,
        offset: u64,
        length: u64,
    ) -> StorageFuture<'a, Vec<u8>> {
        Box::pin(self.with_retry("read_range", move |s| s.read_range(blob, offset, length)))
    }

    fn compose<'a>(
        &'a self,
        sources: &'a [BlobIdentifier],
        destination: &'a BlobIdentifier,
    ) -> StorageFuture<'a, ()> {
        Box::pin(self.with_retry("compose", move |s| s.compose(sources, destination)))
    }

    fn copy<'a>(
        &'a self,
        source: &'a BlobIdentifier,
        destination: &'a BlobIdentifier,
    ) -> StorageFuture<'a, ()> {
        Box::pin(self.with_retry("copy", move |s| s.copy(source, destination)))
    }

    fn delete<'a>(&'a self, blob: &'a BlobIdentifier) -> StorageFuture<'a, bool> {
        Box::pin(self.with_retry("delete", move |s| s.delete(blob)))
    }

    fn exists<'a>(&'a self, blob: &'a BlobIdentifier) -> StorageFuture<'a, bool> {
        Box::pin(self.with_retry("exists", move |s| s.exists(blob)))
    }

    fn size<'a>(&'a self, blob: &'a BlobIdentifier) -> StorageFuture<'a, u64> {
        Box::pin(self.with_retry("size", move |s| s.size(blob)))
    }
}
