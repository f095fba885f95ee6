//! Artifact model: the capabilities an object exposes to be stored.
//!
//! A deep [`Artifact`] hands the encoder live objects (config blob, blobs,
//! sub-artifacts). A [`ShallowArtifact`] has the same shape but hands over
//! descriptors of content that is already stored.
//!
//! Optional capabilities ([`Annotated`], [`DescriptorAnnotated`],
//! [`Referrer`], [`ShallowReferrer`]) are separate traits. A concrete type
//! opts in by implementing the trait and overriding the matching `as_*`
//! accessor to return `Some(self)`.

use serde::Serialize;
use std::io;

use crate::canonical::{to_canonical_bytes, CanonicalError};
use crate::types::{Annotations, Descriptor};

/// Errors from producing blob bytes.
#[derive(Debug, thiserror::Error)]
pub enum BlobError {
    /// Reading the payload failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// Encoding a structured payload failed.
    #[error(transparent)]
    Encode(#[from] CanonicalError),
}

/// Annotations that land on the object's own manifest or descriptor.
pub trait Annotated {
    /// The annotations.
    fn annotations(&self) -> Annotations;
}

/// Annotations that land on the pointer to this object.
///
/// Preferred over [`Annotated`] for the descriptor returned by a push.
pub trait DescriptorAnnotated {
    /// The pointer annotations.
    fn descriptor_annotations(&self) -> Annotations;
}

/// An artifact that refers to another, live artifact.
pub trait Referrer {
    /// The artifact this one refers to.
    fn subject(&self) -> Box<dyn Artifact + '_>;
}

/// An artifact that refers to already stored content.
pub trait ShallowReferrer {
    /// Descriptor of the referred-to manifest.
    fn subject_descriptor(&self) -> Descriptor;
}

/// An opaque byte payload with a media type.
pub trait Blob: Send + Sync {
    /// Media type of the payload.
    fn media_type(&self) -> String;

    /// The payload bytes.
    fn data(&self) -> Result<Vec<u8>, BlobError>;

    /// Annotations for the blob's descriptor, if any.
    fn as_annotated(&self) -> Option<&dyn Annotated> {
        None
    }
}

/// A child of an artifact: either live or already stored.
pub enum SubArtifact<'a> {
    /// Live artifact, pushed recursively.
    Deep(Box<dyn Artifact + 'a>),
    /// Pre-computed descriptors; only its manifest is pushed.
    Shallow(Box<dyn ShallowArtifact + 'a>),
}

impl<'a> SubArtifact<'a> {
    /// Wrap a borrowed live artifact.
    pub fn deep<A: Artifact + 'a>(artifact: &'a A) -> Self {
        Self::Deep(Box::new(artifact))
    }
}

/// A typed object that can be projected into a manifest tree.
pub trait Artifact: Send + Sync {
    /// Type tag written to the manifest's `artifactType`.
    fn artifact_type(&self) -> String;

    /// Config blob; `None` stores the empty JSON placeholder.
    fn config(&self) -> Option<Box<dyn Blob + '_>>;

    /// Blobs, in declared order.
    fn blobs(&self) -> Vec<Box<dyn Blob + '_>>;

    /// Sub-artifacts, in declared order.
    fn sub_artifacts(&self) -> Vec<SubArtifact<'_>>;

    /// [`Annotated`] capability.
    fn as_annotated(&self) -> Option<&dyn Annotated> {
        None
    }

    /// [`DescriptorAnnotated`] capability.
    fn as_descriptor_annotated(&self) -> Option<&dyn DescriptorAnnotated> {
        None
    }

    /// [`Referrer`] capability.
    fn as_referrer(&self) -> Option<&dyn Referrer> {
        None
    }

    /// [`ShallowReferrer`] capability.
    fn as_shallow_referrer(&self) -> Option<&dyn ShallowReferrer> {
        None
    }
}

impl<A: Artifact + ?Sized> Artifact for &A {
    fn artifact_type(&self) -> String {
        (**self).artifact_type()
    }

    fn config(&self) -> Option<Box<dyn Blob + '_>> {
        (**self).config()
    }

    fn blobs(&self) -> Vec<Box<dyn Blob + '_>> {
        (**self).blobs()
    }

    fn sub_artifacts(&self) -> Vec<SubArtifact<'_>> {
        (**self).sub_artifacts()
    }

    fn as_annotated(&self) -> Option<&dyn Annotated> {
        (**self).as_annotated()
    }

    fn as_descriptor_annotated(&self) -> Option<&dyn DescriptorAnnotated> {
        (**self).as_descriptor_annotated()
    }

    fn as_referrer(&self) -> Option<&dyn Referrer> {
        (**self).as_referrer()
    }

    fn as_shallow_referrer(&self) -> Option<&dyn ShallowReferrer> {
        (**self).as_shallow_referrer()
    }
}

/// Same shape as [`Artifact`], with descriptors of stored content.
pub trait ShallowArtifact: Send + Sync {
    /// Type tag written to the manifest's `artifactType`.
    fn artifact_type(&self) -> String;

    /// Stored config; `None` uses the empty JSON placeholder.
    fn config(&self) -> Option<Descriptor>;

    /// Stored blobs, in declared order.
    fn blobs(&self) -> Vec<Descriptor>;

    /// Stored sub-artifact manifests, in declared order.
    fn sub_artifacts(&self) -> Vec<Descriptor>;

    /// [`Annotated`] capability.
    fn as_annotated(&self) -> Option<&dyn Annotated> {
        None
    }

    /// [`DescriptorAnnotated`] capability.
    fn as_descriptor_annotated(&self) -> Option<&dyn DescriptorAnnotated> {
        None
    }

    /// [`ShallowReferrer`] capability.
    fn as_shallow_referrer(&self) -> Option<&dyn ShallowReferrer> {
        None
    }
}

/// A shallow artifact assembled from plain descriptors.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoredArtifact {
    /// Type tag.
    pub artifact_type: String,
    /// Stored config.
    pub config: Option<Descriptor>,
    /// Stored blobs.
    pub blobs: Vec<Descriptor>,
    /// Stored sub-artifact manifests.
    pub sub_artifacts: Vec<Descriptor>,
    /// Manifest annotations.
    pub annotations: Annotations,
    /// Pointer annotations.
    pub descriptor_annotations: Annotations,
    /// Subject manifest.
    pub subject: Option<Descriptor>,
}

impl Annotated for StoredArtifact {
    fn annotations(&self) -> Annotations {
        self.annotations.clone()
    }
}

impl DescriptorAnnotated for StoredArtifact {
    fn descriptor_annotations(&self) -> Annotations {
        self.descriptor_annotations.clone()
    }
}

impl ShallowReferrer for StoredArtifact {
    fn subject_descriptor(&self) -> Descriptor {
        // Only reachable through `as_shallow_referrer`, which checks `subject`.
        self.subject.clone().unwrap_or_else(Descriptor::empty_json)
    }
}

impl ShallowArtifact for StoredArtifact {
    fn artifact_type(&self) -> String {
        self.artifact_type.clone()
    }

    fn config(&self) -> Option<Descriptor> {
        self.config.clone()
    }

    fn blobs(&self) -> Vec<Descriptor> {
        self.blobs.clone()
    }

    fn sub_artifacts(&self) -> Vec<Descriptor> {
        self.sub_artifacts.clone()
    }

    fn as_annotated(&self) -> Option<&dyn Annotated> {
        (!self.annotations.is_empty()).then_some(self as &dyn Annotated)
    }

    fn as_descriptor_annotated(&self) -> Option<&dyn DescriptorAnnotated> {
        (!self.descriptor_annotations.is_empty()).then_some(self as &dyn DescriptorAnnotated)
    }

    fn as_shallow_referrer(&self) -> Option<&dyn ShallowReferrer> {
        self.subject.as_ref().map(|_| self as &dyn ShallowReferrer)
    }
}

/// A structured value stored as canonical JSON.
pub struct JsonBlob<'a, T: Serialize + Sync + ?Sized> {
    media_type: String,
    value: &'a T,
    annotations: Annotations,
}

impl<'a, T: Serialize + Sync + ?Sized> JsonBlob<'a, T> {
    /// Encode `value` under `media_type`.
    pub fn new(media_type: impl Into<String>, value: &'a T) -> Self {
        Self {
            media_type: media_type.into(),
            value,
            annotations: Annotations::new(),
        }
    }

    /// Attach descriptor annotations.
    pub fn with_annotations(mut self, annotations: Annotations) -> Self {
        self.annotations = annotations;
        self
    }
}

impl<T: Serialize + Sync + ?Sized> Annotated for JsonBlob<'_, T> {
    fn annotations(&self) -> Annotations {
        self.annotations.clone()
    }
}

impl<T: Serialize + Sync + ?Sized> Blob for JsonBlob<'_, T> {
    fn media_type(&self) -> String {
        self.media_type.clone()
    }

    fn data(&self) -> Result<Vec<u8>, BlobError> {
        Ok(to_canonical_bytes(self.value)?)
    }

    fn as_annotated(&self) -> Option<&dyn Annotated> {
        (!self.annotations.is_empty()).then_some(self as &dyn Annotated)
    }
}

/// Raw bytes stored as-is.
pub struct RawBlob<'a> {
    media_type: String,
    data: &'a [u8],
    annotations: Annotations,
}

impl<'a> RawBlob<'a> {
    /// Store `data` under `media_type`.
    pub fn new(media_type: impl Into<String>, data: &'a [u8]) -> Self {
        Self {
            media_type: media_type.into(),
            data,
            annotations: Annotations::new(),
        }
    }

    /// Attach descriptor annotations.
    pub fn with_annotations(mut self, annotations: Annotations) -> Self {
        self.annotations = annotations;
        self
    }
}

impl Annotated for RawBlob<'_> {
    fn annotations(&self) -> Annotations {
        self.annotations.clone()
    }
}

impl Blob for RawBlob<'_> {
    fn media_type(&self) -> String {
        self.media_type.clone()
    }

    fn data(&self) -> Result<Vec<u8>, BlobError> {
        Ok(self.data.to_vec())
    }

    fn as_annotated(&self) -> Option<&dyn Annotated> {
        (!self.annotations.is_empty()).then_some(self as &dyn Annotated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_blob_is_canonical() {
        #[derive(Serialize)]
        struct Config {
            name: &'static str,
            display: &'static str,
        }
        let cfg = Config {
            name: "etcd",
            display: "<etcd>",
        };
        let blob = JsonBlob::new("application/json", &cfg);
        assert_eq!(blob.data().unwrap(), br#"{"display":"<etcd>","name":"etcd"}"#);
        assert!(blob.as_annotated().is_none());
    }

    #[test]
    fn test_raw_blob_annotations_capability() {
        let blob = RawBlob::new("image/png", b"\x89PNG")
            .with_annotations(Annotations::from([("role".to_string(), "icon".to_string())]));
        let annotations = blob.as_annotated().map(|a| a.annotations()).unwrap();
        assert_eq!(annotations.get("role").map(String::as_str), Some("icon"));
    }

    #[test]
    fn test_stored_artifact_capabilities() {
        let mut stored = StoredArtifact {
            artifact_type: "application/vnd.example".to_string(),
            ..Default::default()
        };
        assert!(stored.as_shallow_referrer().is_none());
        assert!(stored.as_annotated().is_none());

        let subject = Descriptor::for_bytes("application/vnd.oci.image.manifest.v1+json", b"{}");
        stored.subject = Some(subject.clone());
        let referrer = stored.as_shallow_referrer().unwrap();
        assert_eq!(referrer.subject_descriptor(), subject);
    }
}
