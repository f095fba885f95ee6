//! OCI-shaped descriptors and manifests.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::digest::Digest;
use crate::canonical::{to_canonical_bytes, CanonicalError};

/// Media type of an image manifest.
pub const MEDIA_TYPE_IMAGE_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";

/// Media type of the empty JSON placeholder blob.
pub const MEDIA_TYPE_EMPTY_JSON: &str = "application/vnd.oci.empty.v1+json";

/// Bytes of the empty JSON placeholder blob.
pub const EMPTY_JSON: &[u8] = b"{}";

/// Manifest schema version written to every manifest.
pub const MANIFEST_SCHEMA_VERSION: u32 = 2;

/// Annotation map. Ordered so canonical encoding is trivial.
pub type Annotations = BTreeMap<String, String>;

/// A content-addressed pointer to bytes in a blob store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    /// Media type of the referenced content.
    pub media_type: String,
    /// Artifact type, set when the content is a manifest of a typed artifact.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_type: Option<String>,
    /// Digest of the referenced bytes.
    pub digest: Digest,
    /// Size of the referenced bytes.
    pub size: u64,
    /// Annotations carried on the pointer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<Annotations>,
}

impl Descriptor {
    /// Describe `bytes` with the given media type.
    pub fn for_bytes(media_type: impl Into<String>, bytes: &[u8]) -> Self {
        Self {
            media_type: media_type.into(),
            artifact_type: None,
            digest: Digest::of(bytes),
            size: bytes.len() as u64,
            annotations: None,
        }
    }

    /// Descriptor of the empty JSON placeholder config.
    pub fn empty_json() -> Self {
        Self::for_bytes(MEDIA_TYPE_EMPTY_JSON, EMPTY_JSON)
    }

    /// Set the artifact type.
    pub fn with_artifact_type(mut self, artifact_type: impl Into<String>) -> Self {
        self.artifact_type = Some(artifact_type.into());
        self
    }

    /// Replace annotations; an empty map is stored as `None`.
    pub fn with_annotations(mut self, annotations: Annotations) -> Self {
        self.annotations = if annotations.is_empty() {
            None
        } else {
            Some(annotations)
        };
        self
    }

    /// Whether this descriptor points at a manifest.
    pub fn is_manifest(&self) -> bool {
        self.media_type == MEDIA_TYPE_IMAGE_MANIFEST
    }

    /// Look up a single annotation.
    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations
            .as_ref()
            .and_then(|a| a.get(key))
            .map(String::as_str)
    }
}

/// The persisted form of one artifact level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    /// Always [`MANIFEST_SCHEMA_VERSION`].
    pub schema_version: u32,
    /// Always [`MEDIA_TYPE_IMAGE_MANIFEST`].
    pub media_type: String,
    /// Type tag of the artifact this manifest describes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_type: Option<String>,
    /// Config blob.
    pub config: Descriptor,
    /// Blobs, then sub-artifacts, in declared order.
    #[serde(default)]
    pub layers: Vec<Descriptor>,
    /// Back-link making this artifact a referrer of another.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<Descriptor>,
    /// The artifact's own annotations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<Annotations>,
}

impl Manifest {
    /// Create a manifest with no layers.
    pub fn new(artifact_type: impl Into<String>, config: Descriptor) -> Self {
        Self {
            schema_version: MANIFEST_SCHEMA_VERSION,
            media_type: MEDIA_TYPE_IMAGE_MANIFEST.to_string(),
            artifact_type: Some(artifact_type.into()),
            config,
            layers: Vec::new(),
            subject: None,
            annotations: None,
        }
    }

    /// Canonical JSON bytes of this manifest.
    pub fn to_canonical_bytes(&self) -> Result<Vec<u8>, CanonicalError> {
        to_canonical_bytes(self)
    }

    /// Canonical bytes together with the descriptor naming them.
    pub fn to_descriptor(&self) -> Result<(Descriptor, Vec<u8>), CanonicalError> {
        let bytes = self.to_canonical_bytes()?;
        let mut descriptor = Descriptor::for_bytes(MEDIA_TYPE_IMAGE_MANIFEST, &bytes);
        descriptor.artifact_type = self.artifact_type.clone();
        Ok((descriptor, bytes))
    }

    /// Look up a single manifest annotation.
    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations
            .as_ref()
            .and_then(|a| a.get(key))
            .map(String::as_str)
    }
}
