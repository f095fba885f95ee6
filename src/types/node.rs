//! Node types for the upgrade graph.

use semver::Version;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

use super::digest::Digest;
use crate::canonical::{canonical_digest, CanonicalError};

/// A versioned unit in the upgrade graph.
///
/// Identity covers `name`, `version` and `release`; `reference` only says
/// where the content lives and is excluded from the digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Package name.
    pub name: String,
    /// Semantic version without build metadata.
    pub version: Version,
    /// Disambiguates builds sharing `(name, version)`.
    pub release: u64,
    /// Locator of the content (image reference, path, ...).
    #[serde(default)]
    pub reference: String,
}

#[derive(Serialize)]
struct NodeIdentity<'a> {
    name: &'a str,
    version: &'a Version,
    release: u64,
}

impl Node {
    /// Create a new node.
    pub fn new(name: impl Into<String>, version: Version, release: u64, reference: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version,
            release,
            reference: reference.into(),
        }
    }

    /// Content digest of the node identity.
    pub fn digest(&self) -> Result<Digest, CanonicalError> {
        canonical_digest(&NodeIdentity {
            name: &self.name,
            version: &self.version,
            release: self.release,
        })
    }

    /// Ordering used for rendering: `(name, version, release)`.
    pub fn cmp_identity(&self, other: &Self) -> Ordering {
        self.name
            .cmp(&other.name)
            .then_with(|| self.version.cmp(&other.version))
            .then_with(|| self.release.cmp(&other.release))
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.v{}-{}", self.name, self.version, self.release)
    }
}
