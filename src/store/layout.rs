//! OCI image-layout directory store.
//!
//! Layout on disk:
//!
//! ```text
//! <root>/oci-layout
//! <root>/index.json
//! <root>/blobs/sha256/<hex>
//! ```
//!
//! Blob and index writes go through write-temp-then-rename. Concurrent
//! pushes of the same digest are safe: both writers produce identical bytes
//! and the last rename wins.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use super::{verify_content, BlobStore, StoreError, Tagger};
use crate::atomic::write_atomic;
use crate::canonical::to_canonical_bytes;
use crate::types::{Annotations, Descriptor, MANIFEST_SCHEMA_VERSION};

/// Media type of the layout's top-level index.
pub const MEDIA_TYPE_IMAGE_INDEX: &str = "application/vnd.oci.image.index.v1+json";

/// Annotation naming a manifest inside `index.json`.
pub const ANNOTATION_REF_NAME: &str = "org.opencontainers.image.ref.name";

const LAYOUT_FILE: &str = "oci-layout";
const INDEX_FILE: &str = "index.json";
const LAYOUT_VERSION: &str = "1.0.0";

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LayoutMarker {
    image_layout_version: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImageIndex {
    schema_version: u32,
    media_type: String,
    #[serde(default)]
    manifests: Vec<Descriptor>,
}

impl Default for ImageIndex {
    fn default() -> Self {
        Self {
            schema_version: MANIFEST_SCHEMA_VERSION,
            media_type: MEDIA_TYPE_IMAGE_INDEX.to_string(),
            manifests: Vec::new(),
        }
    }
}

/// Blob store backed by an OCI image-layout directory.
#[derive(Debug)]
pub struct LayoutStore {
    root: PathBuf,
    index_lock: Mutex<()>,
}

impl LayoutStore {
    /// Open a layout directory, creating it if needed.
    pub fn open(root: impl AsRef<Path>) -> Result<Self, StoreError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join("blobs").join("sha256"))?;

        let marker_path = root.join(LAYOUT_FILE);
        if marker_path.exists() {
            let marker: LayoutMarker = serde_json::from_slice(&fs::read(&marker_path)?)
                .map_err(|e| StoreError::Metadata(format!("{LAYOUT_FILE}: {e}")))?;
            if marker.image_layout_version != LAYOUT_VERSION {
                return Err(StoreError::Metadata(format!(
                    "unsupported image layout version {}",
                    marker.image_layout_version
                )));
            }
        } else {
            let marker = LayoutMarker {
                image_layout_version: LAYOUT_VERSION.to_string(),
            };
            write_atomic(&marker_path, &encode(&marker)?)?;
        }

        let index_path = root.join(INDEX_FILE);
        if !index_path.exists() {
            write_atomic(&index_path, &encode(&ImageIndex::default())?)?;
        }

        tracing::debug!(root = %root.display(), "opened layout store");
        Ok(Self {
            root,
            index_lock: Mutex::new(()),
        })
    }

    /// Root directory of the layout.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn blob_path(&self, descriptor: &Descriptor) -> PathBuf {
        self.root
            .join("blobs")
            .join("sha256")
            .join(descriptor.digest.encoded())
    }

    fn read_index(&self) -> Result<ImageIndex, StoreError> {
        let bytes = fs::read(self.root.join(INDEX_FILE))?;
        serde_json::from_slice(&bytes).map_err(|e| StoreError::Metadata(format!("{INDEX_FILE}: {e}")))
    }

    /// Descriptors currently named in `index.json`.
    pub fn tagged(&self) -> Result<Vec<Descriptor>, StoreError> {
        Ok(self.read_index()?.manifests)
    }
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
    to_canonical_bytes(value).map_err(|e| StoreError::Metadata(e.to_string()))
}

impl BlobStore for LayoutStore {
    fn push(&self, descriptor: &Descriptor, data: &[u8]) -> Result<(), StoreError> {
        verify_content(descriptor, data)?;
        let path = self.blob_path(descriptor);
        if path.exists() {
            return Err(StoreError::AlreadyExists(descriptor.digest.clone()));
        }
        write_atomic(&path, data)?;
        tracing::trace!(digest = %descriptor.digest, size = descriptor.size, "wrote blob");
        Ok(())
    }

    fn fetch(&self, descriptor: &Descriptor) -> Result<Vec<u8>, StoreError> {
        let data = match fs::read(self.blob_path(descriptor)) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(descriptor.digest.clone()));
            }
            Err(e) => return Err(e.into()),
        };
        verify_content(descriptor, &data)?;
        Ok(data)
    }

    fn exists(&self, descriptor: &Descriptor) -> Result<bool, StoreError> {
        Ok(self.blob_path(descriptor).is_file())
    }
}

impl Tagger for LayoutStore {
    fn tag(&self, descriptor: &Descriptor, reference: &str) -> Result<(), StoreError> {
        if !self.exists(descriptor)? {
            return Err(StoreError::NotFound(descriptor.digest.clone()));
        }

        let _guard = self.index_lock.lock();
        let mut index = self.read_index()?;
        index
            .manifests
            .retain(|d| d.annotation(ANNOTATION_REF_NAME) != Some(reference));

        let mut annotations = descriptor.annotations.clone().unwrap_or_else(Annotations::new);
        annotations.insert(ANNOTATION_REF_NAME.to_string(), reference.to_string());
        index
            .manifests
            .push(descriptor.clone().with_annotations(annotations));

        write_atomic(&self.root.join(INDEX_FILE), &encode(&index)?)?;
        tracing::debug!(reference, digest = %descriptor.digest, "tagged manifest");
        Ok(())
    }

    fn resolve(&self, reference: &str) -> Result<Descriptor, StoreError> {
        let index = self.read_index()?;
        let mut descriptor = index
            .manifests
            .into_iter()
            .find(|d| d.annotation(ANNOTATION_REF_NAME) == Some(reference))
            .ok_or_else(|| StoreError::ReferenceNotFound(reference.to_string()))?;

        if let Some(annotations) = descriptor.annotations.take() {
            let remaining: Annotations = annotations
                .into_iter()
                .filter(|(k, _)| k != ANNOTATION_REF_NAME)
                .collect();
            descriptor = descriptor.with_annotations(remaining);
        }
        Ok(descriptor)
    }
}
