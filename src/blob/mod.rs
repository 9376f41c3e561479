//! Blob Addressing
//!
//! A blob is addressed by `(bucket, object)`. Paths handed to the writer use
//! the `scheme://bucket/object` form; everything after the first slash that
//! follows the bucket is the object name, taken verbatim.

pub mod naming;

pub use naming::{BlobNaming, TEMPORARY_OBJECT_PREFIX};

use crate::error::{WriterError, WriterResult};
use std::fmt;

/// Scheme used when none is configured
pub const DEFAULT_SCHEME: &str = "gs";

/// Identifies one object in the store
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlobIdentifier {
    bucket: String,
    object: String,
}

impl BlobIdentifier {
    /// Build an identifier, rejecting empty names and buckets containing `/`
    pub fn new(bucket: impl Into<String>, object: impl Into<String>) -> WriterResult<Self> {
        let bucket = bucket.into();
        let object = object.into();

        if bucket.trim().is_empty() || bucket.contains('/') {
            return Err(WriterError::InvalidArgument(format!(
                "bucket name {:?} is invalid",
                bucket
            )));
        }
        if object.trim().is_empty() {
            return Err(WriterError::InvalidArgument(format!(
                "object name {:?} is invalid",
                object
            )));
        }

        Ok(BlobIdentifier { bucket, object })
    }

    /// Parse `scheme://bucket/object`.
    ///
    /// `gs://bucket/foo/bar` yields bucket `bucket` and object `foo/bar`.
    /// An empty bucket (`gs:///bar`), an empty object (`gs://foo/`) and a
    /// missing object (`gs://foo`) are all rejected.
    pub fn parse_uri(uri: &str, scheme: &str) -> WriterResult<Self> {
        let rest = uri
            .strip_prefix(scheme)
            .and_then(|r| r.strip_prefix("://"))
            .ok_or_else(|| {
                WriterError::InvalidArgument(format!("URI scheme for {} must be {}", uri, scheme))
            })?;

        let (bucket, path) = match rest.find('/') {
            Some(idx) => (&rest[..idx], &rest[idx + 1..]),
            None => (rest, ""),
        };

        if bucket.trim().is_empty() {
            return Err(WriterError::InvalidArgument(format!(
                "Bucket name in {} is invalid",
                uri
            )));
        }
        if path.trim().is_empty() {
            return Err(WriterError::InvalidArgument(format!(
                "Object name in {} is invalid",
                uri
            )));
        }

        BlobIdentifier::new(bucket, path)
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn object(&self) -> &str {
        &self.object
    }

    /// Render back to `scheme://bucket/object`
    pub fn to_uri(&self, scheme: &str) -> String {
        format!("{}://{}/{}", scheme, self.bucket, self.object)
    }
}

impl fmt::Display for BlobIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bucket, self.object)
    }
}
