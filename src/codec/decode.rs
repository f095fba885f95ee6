//! Manifest decoder.
//!
//! Reconstructs a typed value from a stored manifest by walking the type's
//! binding table in its fixed `(role, field)` order. Fetches are sequential.

use crate::store::{BlobStore, StoreError, Tagger};
use crate::types::{Descriptor, Digest, Manifest, MANIFEST_SCHEMA_VERSION, MEDIA_TYPE_IMAGE_MANIFEST};

use super::binding::{BindingError, Cardinality, Decodable, Role, Slot};

/// Errors from decoding a manifest tree.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The descriptor points at a raw blob.
    #[error("not a manifest: {media_type}")]
    NotAManifest {
        /// Media type found on the descriptor.
        media_type: String,
    },
    /// A singular field matched more than one layer.
    #[error("ambiguous binding for field {field}: {matches} layers match")]
    AmbiguousBinding {
        /// Field name.
        field: &'static str,
        /// Number of matching layers.
        matches: usize,
    },
    /// The manifest describes a different artifact type.
    #[error("artifact type mismatch: expected {expected}, found {}", found.as_deref().unwrap_or("none"))]
    ArtifactTypeMismatch {
        /// Type required by the binding table.
        expected: String,
        /// Type on the manifest.
        found: Option<String>,
    },
    /// The manifest's schema version or media type is not supported.
    #[error("unsupported manifest: {0}")]
    UnsupportedManifest(String),
    /// Bytes did not parse as the expected JSON shape.
    #[error("malformed content {digest}: {source}")]
    Malformed {
        /// Digest of the content.
        digest: Digest,
        /// Parse failure.
        #[source]
        source: serde_json::Error,
    },
    /// A blob's bytes were rejected by its opaque decoder.
    #[error("invalid blob {digest}: {reason}")]
    InvalidBlob {
        /// Digest of the blob.
        digest: Digest,
        /// Why it was rejected.
        reason: String,
    },
    /// Store read failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    /// The target type's binding table is invalid.
    #[error("binding table: {0}")]
    Binding(#[from] BindingError),
}

/// Fetch and parse the manifest named by `descriptor`.
pub fn fetch_manifest(store: &dyn BlobStore, descriptor: &Descriptor) -> Result<Manifest, DecodeError> {
    if !descriptor.is_manifest() {
        return Err(DecodeError::NotAManifest {
            media_type: descriptor.media_type.clone(),
        });
    }

    let data = store.fetch(descriptor)?;
    let manifest: Manifest = serde_json::from_slice(&data).map_err(|source| DecodeError::Malformed {
        digest: descriptor.digest.clone(),
        source,
    })?;

    if manifest.schema_version != MANIFEST_SCHEMA_VERSION {
        return Err(DecodeError::UnsupportedManifest(format!(
            "schema version {}",
            manifest.schema_version
        )));
    }
    if manifest.media_type != MEDIA_TYPE_IMAGE_MANIFEST {
        return Err(DecodeError::UnsupportedManifest(format!(
            "media type {}",
            manifest.media_type
        )));
    }
    Ok(manifest)
}

/// Decode the manifest named by `descriptor` into a `T`.
///
/// Fails with [`DecodeError::NotAManifest`] for raw blobs and with
/// [`DecodeError::AmbiguousBinding`] when a singular field matches more than
/// one layer.
pub fn decode<T: Decodable>(store: &dyn BlobStore, descriptor: &Descriptor) -> Result<T, DecodeError> {
    let bindings = T::bindings()?;
    let manifest = fetch_manifest(store, descriptor)?;

    if let Some(expected) = bindings.artifact_type() {
        if manifest.artifact_type.as_deref() != Some(expected) {
            return Err(DecodeError::ArtifactTypeMismatch {
                expected: expected.to_string(),
                found: manifest.artifact_type.clone(),
            });
        }
    }

    let mut value = T::default();
    for binding in bindings.iter() {
        let matches: Vec<&Descriptor> = match binding.role() {
            Role::Annotation => Vec::new(),
            Role::Config => std::iter::once(&manifest.config)
                .filter(|d| binding.matcher().matches(d))
                .collect(),
            Role::Blob | Role::SubArtifact => manifest
                .layers
                .iter()
                .filter(|d| binding.matcher().matches(d))
                .collect(),
            Role::Subject => manifest
                .subject
                .iter()
                .filter(|d| binding.matcher().matches(d))
                .collect(),
        };

        if binding.cardinality() == Cardinality::One && matches.len() > 1 {
            return Err(DecodeError::AmbiguousBinding {
                field: binding.field(),
                matches: matches.len(),
            });
        }

        let slot = Slot {
            store,
            manifest: &manifest,
            matches,
        };
        binding.apply(&mut value, &slot)?;
    }

    tracing::trace!(digest = %descriptor.digest, artifact_type = manifest.artifact_type.as_deref().unwrap_or(""), "decoded manifest");
    Ok(value)
}

/// Resolve `reference` through the store's tags and decode the result.
pub fn decode_reference<T, S>(store: &S, reference: &str) -> Result<T, DecodeError>
where
    T: Decodable,
    S: BlobStore + Tagger,
{
    let descriptor = store.resolve(reference)?;
    decode(store, &descriptor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::{Annotated, Artifact, Blob, JsonBlob, RawBlob, SubArtifact};
    use crate::codec::binding::{Bindings, OpaqueBlob};
    use crate::codec::encode::push_artifact;
    use crate::store::InMemoryBlobStore;
    use crate::types::Annotations;
    use serde::{Deserialize, Serialize};
    use std::sync::OnceLock;

    const LEAF_TYPE: &str = "application/vnd.test.leaf";
    const ROOT_TYPE: &str = "application/vnd.test.root";

    #[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
    struct Leaf {
        name: String,
    }

    impl Artifact for Leaf {
        fn artifact_type(&self) -> String {
            LEAF_TYPE.to_string()
        }

        fn config(&self) -> Option<Box<dyn Blob + '_>> {
            Some(Box::new(JsonBlob::new("application/vnd.test.leaf.config+json", self)))
        }

        fn blobs(&self) -> Vec<Box<dyn Blob + '_>> {
            Vec::new()
        }

        fn sub_artifacts(&self) -> Vec<SubArtifact<'_>> {
            Vec::new()
        }
    }

    impl Decodable for Leaf {
        fn bindings() -> Result<&'static Bindings<Self>, BindingError> {
            static TABLE: OnceLock<Result<Bindings<Leaf>, BindingError>> = OnceLock::new();
            TABLE
                .get_or_init(|| Bindings::<Leaf>::builder().artifact_type(LEAF_TYPE).config("config", |l| l).build())
                .as_ref()
                .map_err(Clone::clone)
        }
    }

    #[derive(Debug, Default, Clone, PartialEq)]
    struct Raw {
        media_type: String,
        data: Vec<u8>,
    }

    impl OpaqueBlob for Raw {
        fn from_blob(descriptor: &Descriptor, data: Vec<u8>) -> Result<Self, DecodeError> {
            Ok(Self {
                media_type: descriptor.media_type.clone(),
                data,
            })
        }
    }

    #[derive(Debug, Default, PartialEq)]
    struct Root {
        title: String,
        notes: Vec<String>,
        raw: Option<Raw>,
        leaves: Vec<Leaf>,
    }

    impl Annotated for Root {
        fn annotations(&self) -> Annotations {
            if self.title.is_empty() {
                return Annotations::new();
            }
            Annotations::from([("title".to_string(), self.title.clone())])
        }
    }

    impl Artifact for Root {
        fn artifact_type(&self) -> String {
            ROOT_TYPE.to_string()
        }

        fn config(&self) -> Option<Box<dyn Blob + '_>> {
            None
        }

        fn blobs(&self) -> Vec<Box<dyn Blob + '_>> {
            let mut blobs: Vec<Box<dyn Blob + '_>> = self
                .notes
                .iter()
                .map(|n| Box::new(JsonBlob::new("application/vnd.test.note+json", n)) as Box<dyn Blob + '_>)
                .collect();
            if let Some(raw) = &self.raw {
                blobs.push(Box::new(RawBlob::new(raw.media_type.clone(), &raw.data)));
            }
            blobs
        }

        fn sub_artifacts(&self) -> Vec<SubArtifact<'_>> {
            self.leaves.iter().map(SubArtifact::deep).collect()
        }

        fn as_annotated(&self) -> Option<&dyn Annotated> {
            Some(self)
        }
    }

    impl Decodable for Root {
        fn bindings() -> Result<&'static Bindings<Self>, BindingError> {
            static TABLE: OnceLock<Result<Bindings<Root>, BindingError>> = OnceLock::new();
            TABLE
                .get_or_init(|| {
                    Bindings::<Root>::builder()
                        .artifact_type(ROOT_TYPE)
                        .annotation("title", "title", |r| &mut r.title)
                        .blobs("notes", "mediaType=application/vnd.test.note+json", |r| &mut r.notes)
                        .opaque_blob("raw", "mediaType=application/octet-stream", |r| &mut r.raw)
                        .sub_artifacts("leaves", "artifactType=application/vnd.test.leaf", |r| &mut r.leaves)
                        .build()
                })
                .as_ref()
                .map_err(Clone::clone)
        }
    }

    /// Binds a singular field to layers that may repeat.
    #[derive(Debug, Default)]
    struct Strict {
        leaf: Option<Leaf>,
    }

    impl Decodable for Strict {
        fn bindings() -> Result<&'static Bindings<Self>, BindingError> {
            static TABLE: OnceLock<Result<Bindings<Strict>, BindingError>> = OnceLock::new();
            TABLE
                .get_or_init(|| {
                    Bindings::<Strict>::builder()
                        .sub_artifact("leaf", "artifactType=application/vnd.test.leaf", |s| &mut s.leaf)
                        .build()
                })
                .as_ref()
                .map_err(Clone::clone)
        }
    }

    fn sample() -> Root {
        Root {
            title: "sample".to_string(),
            notes: vec!["first".to_string(), "second".to_string()],
            raw: Some(Raw {
                media_type: "application/octet-stream".to_string(),
                data: vec![0, 1, 2, 255],
            }),
            leaves: vec![
                Leaf { name: "a".to_string() },
                Leaf { name: "b".to_string() },
            ],
        }
    }

    #[test]
    fn test_round_trip() {
        let store = InMemoryBlobStore::new();
        let root = sample();
        let d = push_artifact(&store, &root).unwrap();
        let decoded: Root = decode(&store, &d).unwrap();
        assert_eq!(decoded, root);
    }

    #[test]
    fn test_raw_blob_is_not_a_manifest() {
        let store = InMemoryBlobStore::new();
        let d = Descriptor::for_bytes("text/plain", b"hello");
        store.push(&d, b"hello").unwrap();
        let err = decode::<Root>(&store, &d).unwrap_err();
        assert!(matches!(err, DecodeError::NotAManifest { media_type } if media_type == "text/plain"));
    }

    #[test]
    fn test_singular_binding_with_two_matches_is_ambiguous() {
        let store = InMemoryBlobStore::new();
        let d = push_artifact(&store, &sample()).unwrap();
        let err = decode::<Strict>(&store, &d).unwrap_err();
        assert!(matches!(err, DecodeError::AmbiguousBinding { field: "leaf", matches: 2 }));
    }

    #[test]
    fn test_singular_binding_with_no_match_stays_unset() {
        let store = InMemoryBlobStore::new();
        let mut root = sample();
        root.leaves.clear();
        let d = push_artifact(&store, &root).unwrap();
        let strict: Strict = decode(&store, &d).unwrap();
        assert!(strict.leaf.is_none());
    }

    #[test]
    fn test_artifact_type_checked() {
        let store = InMemoryBlobStore::new();
        let d = push_artifact(&store, &Leaf { name: "x".to_string() }).unwrap();
        let err = decode::<Root>(&store, &d).unwrap_err();
        assert!(matches!(err, DecodeError::ArtifactTypeMismatch { .. }));
    }

    #[test]
    fn test_missing_annotation_is_empty_string() {
        let store = InMemoryBlobStore::new();
        let mut root = sample();
        root.title = String::new();
        let d = push_artifact(&store, &root).unwrap();
        let decoded: Root = decode(&store, &d).unwrap();
        assert_eq!(decoded.title, "");
    }

    #[test]
    fn test_decode_reference() {
        let store = InMemoryBlobStore::new();
        let d = push_artifact(&store, &Leaf { name: "tagged".to_string() }).unwrap();
        store.tag(&d, "leaf:latest").unwrap();
        let leaf: Leaf = decode_reference(&store, "leaf:latest").unwrap();
        assert_eq!(leaf.name, "tagged");
    }
}
