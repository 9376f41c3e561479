//! In-memory blob storage for unit tests and deterministic simulation

use crate::blob::BlobIdentifier;
use crate::storage::{clamp_range, not_found, validate_compose, BlobStorage, StorageFuture};
use bytes::{Bytes, BytesMut};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Number of calls made per operation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StorageCallCounts {
    pub puts: u64,
    pub reads: u64,
    pub composes: u64,
    pub copies: u64,
    pub deletes: u64,
    pub exists: u64,
    pub sizes: u64,
    /// Largest source list seen by a single compose
    pub max_compose_sources: u64,
}

impl StorageCallCounts {
    /// Total calls across all operations
    pub fn total(&self) -> u64 {
        self.puts
            + self.reads
            + self.composes
            + self.copies
            + self.deletes
            + self.exists
            + self.sizes
    }
}

#[derive(Debug, Default)]
struct Counters {
    puts: AtomicU64,
    reads: AtomicU64,
    composes: AtomicU64,
    copies: AtomicU64,
    deletes: AtomicU64,
    exists: AtomicU64,
    sizes: AtomicU64,
    max_compose_sources: AtomicU64,
}

/// In-memory blob storage. Clones share the same objects.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBlobStorage {
    data: Arc<RwLock<HashMap<BlobIdentifier, Bytes>>>,
    counters: Arc<Counters>,
}

impl InMemoryBlobStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    /// Object content, bypassing call accounting
    pub fn get(&self, blob: &BlobIdentifier) -> Option<Bytes> {
        self.data.read().get(blob).cloned()
    }

    /// Whether an object exists, bypassing call accounting
    pub fn contains(&self, blob: &BlobIdentifier) -> bool {
        self.data.read().contains_key(blob)
    }

    /// Sorted object names in `bucket`
    pub fn object_names(&self, bucket: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .data
            .read()
            .keys()
            .filter(|b| b.bucket() == bucket)
            .map(|b| b.object().to_string())
            .collect();
        names.sort();
        names
    }

    /// Snapshot of per-operation call counts
    pub fn call_counts(&self) -> StorageCallCounts {
        let c = &self.counters;
        StorageCallCounts {
            puts: c.puts.load(Ordering::Relaxed),
            reads: c.reads.load(Ordering::Relaxed),
            composes: c.composes.load(Ordering::Relaxed),
            copies: c.copies.load(Ordering::Relaxed),
            deletes: c.deletes.load(Ordering::Relaxed),
            exists: c.exists.load(Ordering::Relaxed),
            sizes: c.sizes.load(Ordering::Relaxed),
            max_compose_sources: c.max_compose_sources.load(Ordering::Relaxed),
        }
    }

    /// Remove all objects
    pub fn clear(&self) {
        self.data.write().clear();
    }
}

impl BlobStorage for InMemoryBlobStorage {
    fn put_object<'a>(&'a self, blob: &'a BlobIdentifier, data: &'a [u8]) -> StorageFuture<'a, ()> {
        Box::pin(async move {
            self.counters.puts.fetch_add(1, Ordering::Relaxed);
            self.data
                .write()
                .insert(blob.clone(), Bytes::copy_from_slice(data));
            Ok(())
        })
    }

    fn read_range<'a>(
        &'a self,
        blob: &'a BlobIdentifier,
        offset: u64,
        length: u64,
    ) -> StorageFuture<'a, Vec<u8>> {
        Box::pin(async move {
            self.counters.reads.fetch_add(1, Ordering::Relaxed);
            let data = self.data.read();
            let content = data.get(blob).ok_or_else(|| not_found(blob))?;
            let (start, end) = clamp_range(content.len() as u64, offset, length);
            Ok(content[start as usize..end as usize].to_vec())
        })
    }

    fn compose<'a>(
        &'a self,
        sources: &'a [BlobIdentifier],
        destination: &'a BlobIdentifier,
    ) -> StorageFuture<'a, ()> {
        Box::pin(async move {
            self.counters.composes.fetch_add(1, Ordering::Relaxed);
            self.counters
                .max_compose_sources
                .fetch_max(sources.len() as u64, Ordering::Relaxed);
            validate_compose(sources, destination)?;

            let mut data = self.data.write();
            let mut composed = BytesMut::new();
            for source in sources {
                let content = data.get(source).ok_or_else(|| not_found(source))?;
                composed.extend_from_slice(content);
            }
            data.insert(destination.clone(), composed.freeze());
            Ok(())
        })
    }

    fn copy<'a>(
        &'a self,
        source: &'a BlobIdentifier,
        destination: &'a BlobIdentifier,
    ) -> StorageFuture<'a, ()> {
        Box::pin(async move {
            self.counters.copies.fetch_add(1, Ordering::Relaxed);
            let mut data = self.data.write();
            let content = data.get(source).cloned().ok_or_else(|| not_found(source))?;
            data.insert(destination.clone(), content);
            Ok(())
        })
    }

    fn delete<'a>(&'a self, blob: &'a BlobIdentifier) -> StorageFuture<'a, bool> {
        Box::pin(async move {
            self.counters.deletes.fetch_add(1, Ordering::Relaxed);
            Ok(self.data.write().remove(blob).is_some())
        })
    }

    fn exists<'a>(&'a self, blob: &'a BlobIdentifier) -> StorageFuture<'a, bool> {
        Box::pin(async move {
            self.counters.exists.fetch_add(1, Ordering::Relaxed);
            Ok(self.data.read().contains_key(blob))
        })
    }

    fn size<'a>(&'a self, blob: &'a BlobIdentifier) -> StorageFuture<'a, u64> {
        Box::pin(async move {
            self.counters.sizes.fetch_add(1, Ordering::Relaxed);
            self.data
                .read()
                .get(blob)
                .map(|content| content.len() as u64)
                .ok_or_else(|| not_found(blob))
        })
    }
}
