//! Blob Storage Abstraction
//!
//! The capability the writer consumes from the object store: whole-object
//! PUT, ranged reads, bounded server-side compose, copy, delete and existence
//! checks. Errors are `std::io::Error`; `ErrorKind::NotFound` always means a
//! named object is missing and `ErrorKind::InvalidInput` a rejected request.
//!
//! Implementations:
//! - `InMemoryBlobStorage`: unit tests and DST
//! - `LocalFsBlobStorage`: development and local testing
//! - `SimulatedBlobStorage`: fault injection wrapper
//! - `RetryingBlobStorage`: per-call retry wrapper
//! - `CloudBlobStorage`: GCS / S3 through `object_store` (feature-gated)

#[cfg(feature = "cloud")]
pub mod cloud;
pub mod local_fs;
pub mod memory;
pub mod retry;
pub mod simulated;

pub use local_fs::LocalFsBlobStorage;
pub use memory::{InMemoryBlobStorage, StorageCallCounts};
pub use retry::RetryingBlobStorage;
pub use simulated::{SimulatedBlobStorage, SimulatedStorageConfig, SimulatedStorageStats};
#[cfg(feature = "cloud")]
pub use cloud::CloudBlobStorage;

use crate::blob::BlobIdentifier;
use std::future::Future;
use std::io::{Error as IoError, ErrorKind, Result as IoResult};
use std::pin::Pin;
use std::sync::Arc;

/// The maximum number of blobs that can be composed in a single operation
pub const COMPOSE_MAX_BLOBS: usize = 32;

/// Boxed future returned by storage operations
pub type StorageFuture<'a, T> = Pin<Box<dyn Future<Output = IoResult<T>> + Send + 'a>>;

/// Object store capability used by the recoverable writer.
///
/// Must be safe for concurrent use by independent streams working on
/// disjoint names.
pub trait BlobStorage: Send + Sync + 'static {
    /// Write a whole object, replacing any previous content
    fn put_object<'a>(&'a self, blob: &'a BlobIdentifier, data: &'a [u8]) -> StorageFuture<'a, ()>;

    /// Read up to `length` bytes starting at `offset`. Ranges past the end
    /// are clamped.
    fn read_range<'a>(
        &'a self,
        blob: &'a BlobIdentifier,
        offset: u64,
        length: u64,
    ) -> StorageFuture<'a, Vec<u8>>;

    /// Concatenate `sources` in order into `destination`.
    ///
    /// Fails with `InvalidInput` when there are no sources, more than
    /// `COMPOSE_MAX_BLOBS` sources or sources outside the destination
    /// bucket, and with `NotFound` when any source is missing.
    fn compose<'a>(
        &'a self,
        sources: &'a [BlobIdentifier],
        destination: &'a BlobIdentifier,
    ) -> StorageFuture<'a, ()>;

    /// Copy one object, possibly across buckets
    fn copy<'a>(
        &'a self,
        source: &'a BlobIdentifier,
        destination: &'a BlobIdentifier,
    ) -> StorageFuture<'a, ()>;

    /// Delete an object. Returns whether it existed; a missing object is not
    /// an error.
    fn delete<'a>(&'a self, blob: &'a BlobIdentifier) -> StorageFuture<'a, bool>;

    /// Check if an object exists
    fn exists<'a>(&'a self, blob: &'a BlobIdentifier) -> StorageFuture<'a, bool>;

    /// Object size in bytes
    fn size<'a>(&'a self, blob: &'a BlobIdentifier) -> StorageFuture<'a, u64>;
}

impl<S: BlobStorage + ?Sized> BlobStorage for Arc<S> {
    fn put_object<'a>(&'a self, blob: &'a BlobIdentifier, data: &'a [u8]) -> StorageFuture<'a, ()> {
        (**self).put_object(blob, data)
    }

    fn read_range<'a>(
        &'a self,
        blob: &'a BlobIdentifier,
        offset: u64,
        length: u64,
    ) -> StorageFuture<'a, Vec<u8>> {
        (**self).read_range(blob, offset, length)
    }

    fn compose<'a>(
        &'a self,
        sources: &'a [BlobIdentifier],
        destination: &'a BlobIdentifier,
    ) -> StorageFuture<'a, ()> {
        (**self).compose(sources, destination)
    }

    fn copy<'a>(
        &'a self,
        source: &'a BlobIdentifier,
        destination: &'a BlobIdentifier,
    ) -> StorageFuture<'a, ()> {
        (**self).copy(source, destination)
    }

    fn delete<'a>(&'a self, blob: &'a BlobIdentifier) -> StorageFuture<'a, bool> {
        (**self).delete(blob)
    }

    fn exists<'a>(&'a self, blob: &'a BlobIdentifier) -> StorageFuture<'a, bool> {
        (**self).exists(blob)
    }

    fn size<'a>(&'a self, blob: &'a BlobIdentifier) -> StorageFuture<'a, u64> {
        (**self).size(blob)
    }
}

/// Request validation shared by backends that implement compose themselves
pub(crate) fn validate_compose(
    sources: &[BlobIdentifier],
    destination: &BlobIdentifier,
) -> IoResult<()> {
    if sources.is_empty() {
        return Err(IoError::new(
            ErrorKind::InvalidInput,
            format!("compose into {} has no sources", destination),
        ));
    }
    if sources.len() > COMPOSE_MAX_BLOBS {
        return Err(IoError::new(
            ErrorKind::InvalidInput,
            format!(
                "compose into {} has {} sources, limit is {}",
                destination,
                sources.len(),
                COMPOSE_MAX_BLOBS
            ),
        ));
    }
    if let Some(foreign) = sources.iter().find(|s| s.bucket() != destination.bucket()) {
        return Err(IoError::new(
            ErrorKind::InvalidInput,
            format!(
                "compose source {} is outside destination bucket {}",
                foreign,
                destination.bucket()
            ),
        ));
    }
    Ok(())
}

/// Clamp `[offset, offset + length)` to an object of `size` bytes
pub(crate) fn clamp_range(size: u64, offset: u64, length: u64) -> (u64, u64) {
    let start = offset.min(size);
    let end = offset.saturating_add(length).min(size);
    (start, end)
}

pub(crate) fn not_found(blob: &BlobIdentifier) -> IoError {
    IoError::new(ErrorKind::NotFound, format!("Blob not found: {}", blob))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blob(bucket: &str, object: &str) -> BlobIdentifier {
        BlobIdentifier::new(bucket, object).unwrap()
    }

    #[test]
    fn test_validate_compose_limits() {
        let dest = blob("b", "dest");
        let sources: Vec<_> = (0..COMPOSE_MAX_BLOBS + 1)
            .map(|i| blob("b", &format!("s{}", i)))
            .collect();

        assert!(validate_compose(&sources[..COMPOSE_MAX_BLOBS], &dest).is_ok());
        let err = validate_compose(&sources, &dest).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert_eq!(
            validate_compose(&[], &dest).unwrap_err().kind(),
            ErrorKind::InvalidInput
        );
        assert_eq!(
            validate_compose(&[blob("other", "s")], &dest)
                .unwrap_err()
                .kind(),
            ErrorKind::InvalidInput
        );
    }

    #[test]
    fn test_clamp_range() {
        assert_eq!(clamp_range(10, 2, 3), (2, 5));
        assert_eq!(clamp_range(10, 8, 5), (8, 10));
        assert_eq!(clamp_range(10, 12, 5), (10, 10));
        assert_eq!(clamp_range(10, 0, u64::MAX), (0, 10));
    }
}
