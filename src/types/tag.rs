//! Key/value tags attached to nodes and edges.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::digest::Digest;

/// What kind of record a tag is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagScope {
    /// Tag on a node.
    Node,
    /// Tag on an edge.
    Edge,
}

impl fmt::Display for TagScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Node => write!(f, "node"),
            Self::Edge => write!(f, "edge"),
        }
    }
}

/// A single key/value annotation on a node or edge digest.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Tag {
    /// Node or edge.
    pub scope: TagScope,
    /// Digest of the tagged record.
    pub reference: Digest,
    /// Tag key.
    pub key: String,
    /// Tag value.
    pub value: String,
}

impl Tag {
    /// Create a new tag.
    pub fn new(scope: TagScope, reference: Digest, key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            scope,
            reference,
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Well-known tag keys written by the channel graph builder.
pub mod keys {
    /// Channel membership of a node or edge.
    pub const CHANNEL: &str = "channel";
    /// Bundle name a node was built from.
    pub const BUNDLE: &str = "bundle";
}
