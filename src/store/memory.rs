//! In-memory blob store for testing and short-lived builds.

use parking_lot::RwLock;
use std::collections::BTreeMap;

use super::{verify_content, BlobStore, StoreError, Tagger};
use crate::types::{Descriptor, Digest};

/// In-memory blob store.
///
/// Uses BTreeMap for deterministic iteration order.
#[derive(Debug, Default)]
pub struct InMemoryBlobStore {
    blobs: RwLock<BTreeMap<Digest, Vec<u8>>>,
    tags: RwLock<BTreeMap<String, Descriptor>>,
}

impl InMemoryBlobStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored blobs (manifests included).
    pub fn len(&self) -> usize {
        self.blobs.read().len()
    }

    /// Whether nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.blobs.read().is_empty()
    }

    /// All stored digests, sorted.
    pub fn digests(&self) -> Vec<Digest> {
        self.blobs.read().keys().cloned().collect()
    }
}

impl BlobStore for InMemoryBlobStore {
    fn push(&self, descriptor: &Descriptor, data: &[u8]) -> Result<(), StoreError> {
        verify_content(descriptor, data)?;
        let mut blobs = self.blobs.write();
        if blobs.contains_key(&descriptor.digest) {
            return Err(StoreError::AlreadyExists(descriptor.digest.clone()));
        }
        blobs.insert(descriptor.digest.clone(), data.to_vec());
        Ok(())
    }

    fn fetch(&self, descriptor: &Descriptor) -> Result<Vec<u8>, StoreError> {
        let data = self
            .blobs
            .read()
            .get(&descriptor.digest)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(descriptor.digest.clone()))?;
        verify_content(descriptor, &data)?;
        Ok(data)
    }

    fn exists(&self, descriptor: &Descriptor) -> Result<bool, StoreError> {
        Ok(self.blobs.read().contains_key(&descriptor.digest))
    }
}

impl Tagger for InMemoryBlobStore {
    fn tag(&self, descriptor: &Descriptor, reference: &str) -> Result<(), StoreError> {
        if !self.blobs.read().contains_key(&descriptor.digest) {
            return Err(StoreError::NotFound(descriptor.digest.clone()));
        }
        self.tags.write().insert(reference.to_string(), descriptor.clone());
        Ok(())
    }

    fn resolve(&self, reference: &str) -> Result<Descriptor, StoreError> {
        self.tags
            .read()
            .get(reference)
            .cloned()
            .ok_or_else(|| StoreError::ReferenceNotFound(reference.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_fetch_exists() {
        let store = InMemoryBlobStore::new();
        let desc = Descriptor::for_bytes("text/plain", b"hello");

        assert!(!store.exists(&desc).unwrap());
        store.push(&desc, b"hello").unwrap();
        assert!(store.exists(&desc).unwrap());
        assert_eq!(store.fetch(&desc).unwrap(), b"hello");
    }

    #[test]
    fn test_duplicate_push_reports_exists() {
        let store = InMemoryBlobStore::new();
        let desc = Descriptor::for_bytes("text/plain", b"hello");

        store.push(&desc, b"hello").unwrap();
        let err = store.push(&desc, b"hello").unwrap_err();
        assert!(err.is_already_exists());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_rejects_mismatched_content() {
        let store = InMemoryBlobStore::new();
        let desc = Descriptor::for_bytes("text/plain", b"hello");
        assert!(store.push(&desc, b"world").is_err());
        assert!(store.is_empty());
    }

    #[test]
    fn test_tag_and_resolve() {
        let store = InMemoryBlobStore::new();
        let desc = Descriptor::for_bytes("text/plain", b"hello");

        assert!(matches!(store.tag(&desc, "latest"), Err(StoreError::NotFound(_))));
        store.push(&desc, b"hello").unwrap();
        store.tag(&desc, "latest").unwrap();
        assert_eq!(store.resolve("latest").unwrap(), desc);
        assert!(matches!(
            store.resolve("missing"),
            Err(StoreError::ReferenceNotFound(_))
        ));
    }

    #[test]
    fn test_concurrent_identical_pushes() {
        let store = InMemoryBlobStore::new();
        let desc = Descriptor::for_bytes("text/plain", b"same");

        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| super::super::ignore_exists(store.push(&desc, b"same")).unwrap());
            }
        });
        assert_eq!(store.len(), 1);
    }
}
