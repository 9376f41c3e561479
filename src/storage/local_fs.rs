//! Local filesystem blob storage for development and testing
//!
//! Objects live at `<root>/<bucket>/<object>`. Writes go to a staging file
//! under `<root>/.staging` and are renamed into place, so readers never see
//! a partially written object.

use crate::blob::BlobIdentifier;
use crate::storage::{clamp_range, not_found, validate_compose, BlobStorage, StorageFuture};
use std::io::{ErrorKind, Result as IoResult, SeekFrom};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use uuid::Uuid;

const STAGING_DIR: &str = ".staging";

/// Local filesystem blob storage
#[derive(Debug, Clone)]
pub struct LocalFsBlobStorage {
    root: PathBuf,
}

impl LocalFsBlobStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        LocalFsBlobStorage { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn full_path(&self, blob: &BlobIdentifier) -> PathBuf {
        self.root.join(blob.bucket()).join(blob.object())
    }

    /// Write via staging file + rename
    async fn write_atomic(&self, path: &Path, data: &[u8]) -> IoResult<()> {
        let staging_dir = self.root.join(STAGING_DIR);
        tokio::fs::create_dir_all(&staging_dir).await?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let staging = staging_dir.join(Uuid::new_v4().to_string());
        tokio::fs::write(&staging, data).await?;
        if let Err(e) = tokio::fs::rename(&staging, path).await {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(e);
        }
        Ok(())
    }

    async fn read_all(&self, blob: &BlobIdentifier) -> IoResult<Vec<u8>> {
        match tokio::fs::read(self.full_path(blob)).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(not_found(blob)),
            Err(e) => Err(e),
        }
    }
}

impl BlobStorage for LocalFsBlobStorage {
    fn put_object<'a>(&'a self, blob: &'a BlobIdentifier, data: &'a [u8]) -> StorageFuture<'a, ()> {
        Box::pin(async move { self.write_atomic(&self.full_path(blob), data).await })
    }

    fn read_range<'a>(
        &'a self,
        blob: &'a BlobIdentifier,
        offset: u64,
        length: u64,
    ) -> StorageFuture<'a, Vec<u8>> {
        Box::pin(async move {
            let mut file = match tokio::fs::File::open(self.full_path(blob)).await {
                Ok(file) => file,
                Err(e) if e.kind() == ErrorKind::NotFound => return Err(not_found(blob)),
                Err(e) => return Err(e),
            };
            let size = file.metadata().await?.len();
            let (start, end) = clamp_range(size, offset, length);

            file.seek(SeekFrom::Start(start)).await?;
            let mut buf = Vec::with_capacity((end - start) as usize);
            file.take(end - start).read_to_end(&mut buf).await?;
            Ok(buf)
        })
    }

    fn compose<'a>(
        &'a self,
        sources: &'a [BlobIdentifier],
        destination: &'a BlobIdentifier,
    ) -> StorageFuture<'a, ()> {
        Box::pin(async move {
            validate_compose(sources, destination)?;

            let mut composed = Vec::new();
            for source in sources {
                composed.extend_from_slice(&self.read_all(source).await?);
            }
            self.write_atomic(&self.full_path(destination), &composed).await
        })
    }

    fn copy<'a>(
        &'a self,
        source: &'a BlobIdentifier,
        destination: &'a BlobIdentifier,
    ) -> StorageFuture<'a, ()> {
        Box::pin(async move {
            let data = self.read_all(source).await?;
            self.write_atomic(&self.full_path(destination), &data).await
        })
    }

    fn delete<'a>(&'a self, blob: &'a BlobIdentifier) -> StorageFuture<'a, bool> {
        Box::pin(async move {
            match tokio::fs::remove_file(self.full_path(blob)).await {
                Ok(()) => Ok(true),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(false), // Already deleted
                Err(e) => Err(e),
            }
        })
    }

    fn exists<'a>(&'a self, blob: &'a BlobIdentifier) -> StorageFuture<'a, bool> {
        Box::pin(async move {
            let path = self.full_path(blob);
            Ok(tokio::fs::try_exists(&path).await? && path.is_file())
        })
    }

    fn size<'a>(&'a self, blob: &'a BlobIdentifier) -> StorageFuture<'a, u64> {
        Box::pin(async move {
            match tokio::fs::metadata(self.full_path(blob)).await {
                Ok(meta) => Ok(meta.len()),
                Err(e) if e.kind() == ErrorKind::NotFound => Err(not_found(blob)),
                Err(e) => Err(e),
            }
        })
    }
}
