//! Canonical serialization for deterministic digesting.
//!
//! Every structured value that becomes a digest input (node identities,
//! edge identities, manifests, configs, graph snapshots) goes through this
//! module so that re-serialization is byte-for-byte reproducible.
//!
//! ## Determinism Guarantees
//!
//! - Object keys are sorted (RFC 8785, JSON Canonicalization Scheme)
//! - No incidental whitespace
//! - No HTML escaping of `<`, `>` or `&`
//! - Stable Vec order: vectors serialize in index order

use serde::Serialize;
use sha2::{Digest as _, Sha256};

use crate::types::Digest;

/// Error produced when a value cannot be canonically encoded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("canonical encoding failed: {0}")]
pub struct CanonicalError(pub String);

/// Serialize a value to canonical JSON bytes.
pub fn to_canonical_bytes<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, CanonicalError> {
    serde_json_canonicalizer::to_vec(&value).map_err(|e| CanonicalError(e.to_string()))
}

/// Compute the SHA-256 digest of raw bytes.
pub fn sha256_digest(bytes: &[u8]) -> Digest {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    Digest::from_sha256_hex(hex::encode(hasher.finalize()))
}

/// Compute the digest of the canonical encoding of a serializable value.
pub fn canonical_digest<T: Serialize + ?Sized>(value: &T) -> Result<Digest, CanonicalError> {
    Ok(sha256_digest(&to_canonical_bytes(value)?))
}
