//! Cloud Blob Storage
//!
//! Adapter over the `object_store` crate for GCS and S3 buckets. One
//! `object_store` client is held per bucket. `object_store` has no
//! server-side compose, so compose is emulated by reading the sources in
//! order and writing the destination with a single PUT.

use crate::blob::BlobIdentifier;
use crate::credentials::{CredentialProvider, GcpCredentialBridge};
use crate::storage::{clamp_range, not_found, validate_compose, BlobStorage, StorageFuture};
use bytes::{Bytes, BytesMut};
use object_store::aws::AmazonS3Builder;
use object_store::gcp::GoogleCloudStorageBuilder;
use object_store::path::Path as ObjectPath;
use object_store::ObjectStore as ObjectStoreTrait;
use std::collections::HashMap;
use std::io::{Error as IoError, ErrorKind, Result as IoResult};
use std::sync::Arc;

/// Blob storage backed by `object_store` clients, one per bucket
#[derive(Clone, Default)]
pub struct CloudBlobStorage {
    buckets: HashMap<String, Arc<dyn ObjectStoreTrait>>,
}

impl CloudBlobStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an existing client for `bucket` (for testing)
    pub fn with_store(
        mut self,
        bucket: impl Into<String>,
        store: Arc<dyn ObjectStoreTrait>,
    ) -> Self {
        self.buckets.insert(bucket.into(), store);
        self
    }

    /// GCS clients for `buckets`.
    ///
    /// Without a provider, credentials come from the environment
    /// (`GOOGLE_SERVICE_ACCOUNT`, `GOOGLE_APPLICATION_CREDENTIALS`).
    pub fn gcs<I, B>(buckets: I, credentials: Option<Arc<dyn CredentialProvider>>) -> IoResult<Self>
    where
        I: IntoIterator<Item = B>,
        B: Into<String>,
    {
        let mut storage = Self::new();
        for bucket in buckets {
            let bucket = bucket.into();
            let mut builder = GoogleCloudStorageBuilder::from_env().with_bucket_name(&bucket);
            if let Some(provider) = &credentials {
                let bridge = GcpCredentialBridge::new(provider.clone());
                builder = builder.with_credentials(Arc::new(bridge));
            }
            let store = builder.build().map_err(|e| {
                IoError::new(
                    ErrorKind::InvalidInput,
                    format!("Failed to create GCS store for {}: {}", bucket, e),
                )
            })?;
            storage.buckets.insert(bucket, Arc::new(store));
        }
        Ok(storage)
    }

    /// S3 clients for `buckets`, configured from the `AWS_*` environment.
    /// A custom endpoint selects an S3-compatible service such as MinIO.
    pub fn s3<I, B>(buckets: I, region: &str, endpoint: Option<&str>) -> IoResult<Self>
    where
        I: IntoIterator<Item = B>,
        B: Into<String>,
    {
        let mut storage = Self::new();
        for bucket in buckets {
            let bucket = bucket.into();
            let mut builder = AmazonS3Builder::from_env()
                .with_bucket_name(&bucket)
                .with_region(region);
            if let Some(endpoint) = endpoint {
                builder = builder
                    .with_endpoint(endpoint)
                    .with_allow_http(endpoint.starts_with("http://"));
            }
            let store = builder.build().map_err(|e| {
                IoError::new(
                    ErrorKind::InvalidInput,
                    format!("Failed to create S3 store for {}: {}", bucket, e),
                )
            })?;
            storage.buckets.insert(bucket, Arc::new(store));
        }
        Ok(storage)
    }

    fn store(&self, bucket: &str) -> IoResult<&Arc<dyn ObjectStoreTrait>> {
        self.buckets.get(bucket).ok_or_else(|| {
            IoError::new(
                ErrorKind::InvalidInput,
                format!("No client configured for bucket {}", bucket),
            )
        })
    }

    fn path(blob: &BlobIdentifier) -> ObjectPath {
        ObjectPath::from(blob.object())
    }

    async fn get_all(&self, blob: &BlobIdentifier) -> IoResult<Bytes> {
        let store = self.store(blob.bucket())?;
        let result = store
            .get(&Self::path(blob))
            .await
            .map_err(|e| Self::map_error(blob, e))?;
        result.bytes().await.map_err(|e| Self::map_error(blob, e))
    }

    async fn put(&self, blob: &BlobIdentifier, data: Bytes) -> IoResult<()> {
        let store = self.store(blob.bucket())?;
        store
            .put(&Self::path(blob), data.into())
            .await
            .map(|_| ())
            .map_err(|e| Self::map_error(blob, e))
    }

    /// Convert object_store errors to IoError
    fn map_error(blob: &BlobIdentifier, err: object_store::Error) -> IoError {
        match &err {
            object_store::Error::NotFound { .. } => not_found(blob),
            object_store::Error::AlreadyExists { .. } => {
                IoError::new(ErrorKind::AlreadyExists, err.to_string())
            }
            object_store::Error::Precondition { .. } | object_store::Error::InvalidPath { .. } => {
                IoError::new(ErrorKind::InvalidInput, err.to_string())
            }
            _ => IoError::new(ErrorKind::Other, err.to_string()),
        }
    }
}

impl std::fmt::Debug for CloudBlobStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut buckets: Vec<_> = self.buckets.keys().collect();
        buckets.sort();
        f.debug_struct("CloudBlobStorage")
            .field("buckets", &buckets)
            .finish()
    }
}

impl BlobStorage for CloudBlobStorage {
    fn put_object<'a>(&'a self, blob: &'a BlobIdentifier, data: &'a [u8]) -> StorageFuture<'a, ()> {
        Box::pin(async move { self.put(blob, Bytes::copy_from_slice(data)).await })
    }

    fn read_range<'a>(
        &'a self,
        blob: &'a BlobIdentifier,
        offset: u64,
        length: u64,
    ) -> StorageFuture<'a, Vec<u8>> {
        Box::pin(async move {
            let size = self.size(blob).await?;
            let (start, end) = clamp_range(size, offset, length);
            if start == end {
                return Ok(Vec::new());
            }
            let store = self.store(blob.bucket())?;
            let data = store
                .get_range(&Self::path(blob), start as usize..end as usize)
                .await
                .map_err(|e| Self::map_error(blob, e))?;
            Ok(data.to_vec())
        })
    }

    fn compose<'a>(
        &'a self,
        sources: &'a [BlobIdentifier],
        destination: &'a BlobIdentifier,
    ) -> StorageFuture<'a, ()> {
        Box::pin(async move {
            validate_compose(sources, destination)?;
            let mut composed = BytesMut::new();
            for source in sources {
                composed.extend_from_slice(&self.get_all(source).await?);
            }
            self.put(destination, composed.freeze()).await
        })
    }

    fn copy<'a>(
        &'a self,
        source: &'a BlobIdentifier,
        destination: &'a BlobIdentifier,
    ) -> StorageFuture<'a, ()> {
        Box::pin(async move {
            if source.bucket() == destination.bucket() {
                let store = self.store(source.bucket())?;
                return store
                    .copy(&Self::path(source), &Self::path(destination))
                    .await
                    .map_err(|e| Self::map_error(source, e));
            }
            let data = self.get_all(source).await?;
            self.put(destination, data).await
        })
    }

    fn delete<'a>(&'a self, blob: &'a BlobIdentifier) -> StorageFuture<'a, bool> {
        Box::pin(async move {
            // Stores differ on whether deleting a missing key fails
            if !self.exists(blob).await? {
                return Ok(false);
            }
            let store = self.store(blob.bucket())?;
            match store.delete(&Self::path(blob)).await {
                Ok(()) => Ok(true),
                Err(object_store::Error::NotFound { .. }) => Ok(false),
                Err(e) => Err(Self::map_error(blob, e)),
            }
        })
    }

    fn exists<'a>(&'a self, blob: &'a BlobIdentifier) -> StorageFuture<'a, bool> {
        Box::pin(async move {
            let store = self.store(blob.bucket())?;
            match store.head(&Self::path(blob)).await {
                Ok(_) => Ok(true),
                Err(object_store::Error::NotFound { .. }) => Ok(false),
                Err(e) => Err(Self::map_error(blob, e)),
            }
        })
    }

    fn size<'a>(&'a self, blob: &'a BlobIdentifier) -> StorageFuture<'a, u64> {
        Box::pin(async move {
            let store = self.store(blob.bucket())?;
            let meta = store
                .head(&Self::path(blob))
                .await
                .map_err(|e| Self::map_error(blob, e))?;
            Ok(meta.size as u64)
        })
    }
}
