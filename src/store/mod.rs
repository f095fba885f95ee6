//! Blob storage backends.
//!
//! The codec only talks to storage through [`BlobStore`]: push bytes under a
//! descriptor, fetch bytes for a descriptor, check existence. Stores are
//! content-addressed, so pushing identical bytes twice is reported as
//! [`StoreError::AlreadyExists`], which every push call site swallows via
//! [`ignore_exists`].

pub mod memory;
pub mod layout;
pub mod cached;

use std::io;

use crate::types::{Descriptor, Digest};

/// Error type for store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Content with this digest is already stored. Not a real failure.
    #[error("content already exists: {0}")]
    AlreadyExists(Digest),
    /// No content stored under this digest.
    #[error("content not found: {0}")]
    NotFound(Digest),
    /// Bytes do not hash to the descriptor's digest.
    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch {
        /// Digest named by the descriptor.
        expected: Digest,
        /// Digest of the bytes seen.
        actual: Digest,
    },
    /// Byte length does not match the descriptor's size.
    #[error("size mismatch for {digest}: expected {expected}, got {actual}")]
    SizeMismatch {
        /// Digest of the content.
        digest: Digest,
        /// Size named by the descriptor.
        expected: u64,
        /// Size seen.
        actual: u64,
    },
    /// No descriptor is tagged with this reference.
    #[error("reference not found: {0}")]
    ReferenceNotFound(String),
    /// I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// Store metadata could not be parsed or written.
    #[error("store metadata error: {0}")]
    Metadata(String),
}

impl StoreError {
    /// Whether this is the duplicate-content outcome.
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists(_))
    }
}

/// Treat "already exists" as success.
pub fn ignore_exists(result: Result<(), StoreError>) -> Result<(), StoreError> {
    match result {
        Err(StoreError::AlreadyExists(digest)) => {
            tracing::trace!(digest = %digest, "content already stored");
            Ok(())
        }
        other => other,
    }
}

/// Content-addressed blob storage.
///
/// Implementations must be safe to call concurrently, including concurrent
/// pushes of the same digest.
pub trait BlobStore: Send + Sync {
    /// Store `data` under `descriptor`.
    ///
    /// Fails with [`StoreError::AlreadyExists`] when the digest is already
    /// present and with a mismatch error when `data` does not match.
    fn push(&self, descriptor: &Descriptor, data: &[u8]) -> Result<(), StoreError>;

    /// Fetch the bytes named by `descriptor`.
    fn fetch(&self, descriptor: &Descriptor) -> Result<Vec<u8>, StoreError>;

    /// Whether content for `descriptor` is stored.
    fn exists(&self, descriptor: &Descriptor) -> Result<bool, StoreError>;
}

/// Stores that can name a descriptor with a human-readable reference.
pub trait Tagger {
    /// Point `reference` at `descriptor`, replacing any previous target.
    fn tag(&self, descriptor: &Descriptor, reference: &str) -> Result<(), StoreError>;

    /// Look up the descriptor a reference points at.
    fn resolve(&self, reference: &str) -> Result<Descriptor, StoreError>;
}

/// Check that `data` is exactly the content `descriptor` names.
pub fn verify_content(descriptor: &Descriptor, data: &[u8]) -> Result<(), StoreError> {
    let actual = Digest::of(data);
    if actual != descriptor.digest {
        return Err(StoreError::DigestMismatch {
            expected: descriptor.digest.clone(),
            actual,
        });
    }
    if data.len() as u64 != descriptor.size {
        return Err(StoreError::SizeMismatch {
            digest: descriptor.digest.clone(),
            expected: descriptor.size,
            actual: data.len() as u64,
        });
    }
    Ok(())
}

pub use memory::InMemoryBlobStore;
pub use layout::LayoutStore;
pub use cached::{CacheConfig, CacheStats, CachedBlobStore};
