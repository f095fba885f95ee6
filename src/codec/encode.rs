//! Manifest encoder.
//!
//! Walks an artifact tree depth-first, pushes every config, blob and
//! sub-artifact to the store, then assembles and pushes the manifest that
//! describes each level. Sibling blobs and sibling sub-artifacts are pushed
//! in parallel; layer order in the manifest is always the declared order.
//!
//! Nothing is rolled back on failure: the store is content-addressed, so a
//! partial push leaves harmless unreferenced blobs.

use crate::artifact::{Artifact, Blob, BlobError, ShallowArtifact, SubArtifact};
use crate::canonical::CanonicalError;
use crate::store::{ignore_exists, BlobStore, StoreError, Tagger};
use crate::types::{Annotations, Descriptor, Manifest, EMPTY_JSON};

use super::parallel::par_map_ordered;

/// Errors from pushing artifacts.
#[derive(Debug, thiserror::Error)]
pub enum PushError {
    /// Store write failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    /// A blob could not produce its bytes.
    #[error("reading blob of type {media_type}: {source}")]
    Blob {
        /// Media type of the failing blob.
        media_type: String,
        /// Underlying failure.
        #[source]
        source: BlobError,
    },
    /// Manifest encoding failed.
    #[error(transparent)]
    Canonical(#[from] CanonicalError),
}

/// Push a single blob and return its descriptor.
///
/// Annotations from the blob's [`crate::artifact::Annotated`] capability land
/// on the returned descriptor.
pub fn push_blob(store: &dyn BlobStore, blob: &dyn Blob) -> Result<Descriptor, PushError> {
    let media_type = blob.media_type();
    let data = blob.data().map_err(|source| PushError::Blob {
        media_type: media_type.clone(),
        source,
    })?;

    let mut descriptor = Descriptor::for_bytes(media_type, &data);
    if let Some(annotated) = blob.as_annotated() {
        descriptor = descriptor.with_annotations(annotated.annotations());
    }

    ignore_exists(store.push(&descriptor, &data))?;
    tracing::trace!(digest = %descriptor.digest, media_type = %descriptor.media_type, "pushed blob");
    Ok(descriptor)
}

fn push_empty_config(store: &dyn BlobStore) -> Result<Descriptor, PushError> {
    let descriptor = Descriptor::empty_json();
    ignore_exists(store.push(&descriptor, EMPTY_JSON))?;
    Ok(descriptor)
}

fn push_manifest(
    store: &dyn BlobStore,
    manifest: &Manifest,
    pointer_annotations: Option<Annotations>,
) -> Result<Descriptor, PushError> {
    let (descriptor, bytes) = manifest.to_descriptor()?;
    ignore_exists(store.push(&descriptor, &bytes))?;
    tracing::debug!(
        digest = %descriptor.digest,
        artifact_type = manifest.artifact_type.as_deref().unwrap_or(""),
        layers = manifest.layers.len(),
        "pushed manifest"
    );
    Ok(match pointer_annotations {
        Some(annotations) => descriptor.with_annotations(annotations),
        None => descriptor,
    })
}

/// One layer of a manifest, pushed as part of a single parallel batch.
enum Unit<'a> {
    Blob(Box<dyn Blob + 'a>),
    Sub(SubArtifact<'a>),
}

fn non_empty(annotations: Annotations) -> Option<Annotations> {
    (!annotations.is_empty()).then_some(annotations)
}

/// Push an artifact tree and return the descriptor of its root manifest.
///
/// Order of work:
/// 1. the subject, if the artifact is a referrer
/// 2. the config (or the empty JSON placeholder)
/// 3. blobs and sub-artifacts, in parallel as one batch; the first failure
///    stops siblings that have not started
/// 4. the manifest: blob descriptors then sub-artifact descriptors
///
/// The returned descriptor carries the artifact's descriptor annotations,
/// falling back to its own annotations.
pub fn push_artifact(store: &dyn BlobStore, artifact: &dyn Artifact) -> Result<Descriptor, PushError> {
    let subject = if let Some(referrer) = artifact.as_referrer() {
        let subject = referrer.subject();
        Some(push_artifact(store, subject.as_ref())?)
    } else {
        artifact
            .as_shallow_referrer()
            .map(|referrer| referrer.subject_descriptor())
    };

    let config = match artifact.config() {
        Some(blob) => push_blob(store, blob.as_ref())?,
        None => push_empty_config(store)?,
    };

    let units: Vec<Unit<'_>> = artifact
        .blobs()
        .into_iter()
        .map(Unit::Blob)
        .chain(artifact.sub_artifacts().into_iter().map(Unit::Sub))
        .collect();
    let layers = par_map_ordered(&units, |unit| match unit {
        Unit::Blob(blob) => push_blob(store, blob.as_ref()),
        Unit::Sub(sub) => push_sub_artifact(store, sub),
    })?;

    let own_annotations = artifact
        .as_annotated()
        .and_then(|a| non_empty(a.annotations()));

    let mut manifest = Manifest::new(artifact.artifact_type(), config);
    manifest.layers = layers;
    manifest.subject = subject;
    manifest.annotations = own_annotations.clone();

    let pointer_annotations = artifact
        .as_descriptor_annotated()
        .and_then(|a| non_empty(a.descriptor_annotations()))
        .or(own_annotations);

    push_manifest(store, &manifest, pointer_annotations)
}

/// Push only the manifest of a shallow artifact.
///
/// Its config, blobs and sub-artifacts are expected to be stored already;
/// only the empty config placeholder is pushed on its behalf.
pub fn push_shallow_artifact(
    store: &dyn BlobStore,
    artifact: &dyn ShallowArtifact,
) -> Result<Descriptor, PushError> {
    let config = match artifact.config() {
        Some(descriptor) => descriptor,
        None => push_empty_config(store)?,
    };

    let own_annotations = artifact
        .as_annotated()
        .and_then(|a| non_empty(a.annotations()));

    let mut manifest = Manifest::new(artifact.artifact_type(), config);
    manifest.layers = artifact.blobs();
    manifest.layers.extend(artifact.sub_artifacts());
    manifest.subject = artifact
        .as_shallow_referrer()
        .map(|referrer| referrer.subject_descriptor());
    manifest.annotations = own_annotations.clone();

    let pointer_annotations = artifact
        .as_descriptor_annotated()
        .and_then(|a| non_empty(a.descriptor_annotations()))
        .or(own_annotations);

    push_manifest(store, &manifest, pointer_annotations)
}

fn push_sub_artifact(store: &dyn BlobStore, sub: &SubArtifact<'_>) -> Result<Descriptor, PushError> {
    match sub {
        SubArtifact::Deep(artifact) => push_artifact(store, artifact.as_ref()),
        SubArtifact::Shallow(artifact) => push_shallow_artifact(store, artifact.as_ref()),
    }
}

/// Push an artifact and name its root manifest with `reference`.
pub fn push_and_tag<S>(store: &S, artifact: &dyn Artifact, reference: &str) -> Result<Descriptor, PushError>
where
    S: BlobStore + Tagger,
{
    let descriptor = push_artifact(store, artifact)?;
    store.tag(&descriptor, reference)?;
    tracing::info!(reference, digest = %descriptor.digest, "tagged artifact");
    Ok(descriptor)
}
