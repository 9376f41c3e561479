//! Temporary Blob Naming
//!
//! Every component of an in-progress write lives under
//! `.inprogress/<bucket>/<escaped object>/`. The object name is escaped so
//! that it holds no `/`; the segment therefore ends at the first slash and the
//! partial name of one final blob can never be a prefix of another's.
//!
//! With entropy injection the component id is also placed in front of the
//! partial name (`<id>.inprogress/<bucket>/<object>/<id>`) so that temporary
//! keys spread over the store's key space.

use crate::blob::BlobIdentifier;
use uuid::Uuid;

/// Reserved prefix for temporary objects
pub const TEMPORARY_OBJECT_PREFIX: &str = ".inprogress";

/// Derives temporary blob names for a final blob
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BlobNaming {
    temporary_bucket: Option<String>,
    entropy_injection: bool,
}

impl BlobNaming {
    pub fn new(temporary_bucket: Option<String>, entropy_injection: bool) -> Self {
        BlobNaming {
            temporary_bucket,
            entropy_injection,
        }
    }

    /// Scratch bucket when configured, otherwise the final blob's bucket
    pub fn temporary_bucket_name<'a>(&'a self, final_blob: &'a BlobIdentifier) -> &'a str {
        self.temporary_bucket
            .as_deref()
            .unwrap_or_else(|| final_blob.bucket())
    }

    /// `.inprogress/<bucket>/<escaped object>/`, trailing slash included
    pub fn temporary_object_partial_name(final_blob: &BlobIdentifier) -> String {
        format!(
            "{}/{}/{}/",
            TEMPORARY_OBJECT_PREFIX,
            final_blob.bucket(),
            escape_object_name(final_blob.object())
        )
    }

    /// Partial name followed by the component id
    pub fn temporary_object_name(final_blob: &BlobIdentifier, component_id: Uuid) -> String {
        format!(
            "{}{}",
            Self::temporary_object_partial_name(final_blob),
            component_id
        )
    }

    /// Component id, partial name, component id
    pub fn temporary_object_name_with_entropy(
        final_blob: &BlobIdentifier,
        component_id: Uuid,
    ) -> String {
        format!(
            "{}{}{}",
            component_id,
            Self::temporary_object_partial_name(final_blob),
            component_id
        )
    }

    /// Resolve the temporary blob for one component of `final_blob`
    pub fn temporary_blob(
        &self,
        final_blob: &BlobIdentifier,
        component_id: Uuid,
    ) -> BlobIdentifier {
        let object = if self.entropy_injection {
            Self::temporary_object_name_with_entropy(final_blob, component_id)
        } else {
            Self::temporary_object_name(final_blob, component_id)
        };
        BlobIdentifier {
            bucket: self.temporary_bucket_name(final_blob).to_string(),
            object,
        }
    }

    /// True when temporaries are composed in a bucket other than the final one
    pub fn uses_scratch_bucket(&self, final_blob: &BlobIdentifier) -> bool {
        self.temporary_bucket_name(final_blob) != final_blob.bucket()
    }
}

fn escape_object_name(object: &str) -> String {
    let mut escaped = String::with_capacity(object.len());
    for c in object.chars() {
        match c {
            '%' => escaped.push_str("%25"),
            '/' => escaped.push_str("%2F"),
            _ => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blob(bucket: &str, object: &str) -> BlobIdentifier {
        BlobIdentifier::new(bucket, object).unwrap()
    }

    #[test]
    fn test_partial_name() {
        assert_eq!(
            BlobNaming::temporary_object_partial_name(&blob("foo", "bar")),
            ".inprogress/foo/bar/"
        );
        assert_eq!(
            BlobNaming::temporary_object_partial_name(&blob("foo", "a/b")),
            ".inprogress/foo/a%2Fb/"
        );
    }

    #[test]
    fn test_temporary_object_name() {
        let id = Uuid::new_v4();
        let name = BlobNaming::temporary_object_name(&blob("foo", "bar"), id);
        assert_eq!(name, format!(".inprogress/foo/bar/{}", id));
    }

    #[test]
    fn test_temporary_object_name_with_entropy() {
        let id = Uuid::new_v4();
        let name = BlobNaming::temporary_object_name_with_entropy(&blob("foo", "bar"), id);
        assert_eq!(name, format!("{}.inprogress/foo/bar/{}", id, id));
    }

    #[test]
    fn test_temporary_bucket_defaults_to_final() {
        let naming = BlobNaming::default();
        let final_blob = blob("foo", "bar");
        let temp = naming.temporary_blob(&final_blob, Uuid::new_v4());
        assert_eq!(temp.bucket(), "foo");
        assert!(!naming.uses_scratch_bucket(&final_blob));
    }

    #[test]
    fn test_scratch_bucket_and_entropy() {
        let naming = BlobNaming::new(Some("scratch".to_string()), true);
        let final_blob = blob("foo", "bar");
        let id = Uuid::new_v4();
        let temp = naming.temporary_blob(&final_blob, id);
        assert_eq!(temp.bucket(), "scratch");
        assert!(temp.object().starts_with(&id.to_string()));
        assert!(temp.object().ends_with(&id.to_string()));
        assert!(naming.uses_scratch_bucket(&final_blob));
    }

    #[test]
    fn test_partial_names_never_nest() {
        // "a" and "a/b" would nest if slashes were kept
        let names = ["a", "a/b", "a/b/c", "a%2Fb", "ab", "a/"];
        for x in names {
            for y in names {
                if x == y {
                    continue;
                }
                let px = BlobNaming::temporary_object_partial_name(&blob("bkt", x));
                let py = BlobNaming::temporary_object_partial_name(&blob("bkt", y));
                assert!(
                    !py.starts_with(&px),
                    "{:?} is a prefix of {:?}",
                    px,
                    py
                );
            }
        }
    }

    #[test]
    fn test_partial_names_differ_across_buckets() {
        let a = BlobNaming::temporary_object_partial_name(&blob("ab", "c"));
        let b = BlobNaming::temporary_object_partial_name(&blob("a", "bc"));
        assert_ne!(a, b);
        assert!(!a.starts_with(&b) && !b.starts_with(&a));
    }
}
