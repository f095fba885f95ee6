//! Edge types for the upgrade graph.

use serde::{Deserialize, Serialize};

use super::digest::Digest;
use crate::canonical::{canonical_digest, CanonicalError};

/// Directed upgrade relationship between two nodes.
///
/// Implements `Ord` for deterministic ordering: (from, to).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Edge {
    /// Node the upgrade starts from.
    pub from: Digest,
    /// Node the upgrade lands on.
    pub to: Digest,
}

impl Edge {
    /// Create a new edge.
    pub fn new(from: Digest, to: Digest) -> Self {
        Self { from, to }
    }

    /// Content digest of `{from, to}`.
    pub fn digest(&self) -> Result<Digest, CanonicalError> {
        canonical_digest(self)
    }

    /// Whether the edge starts and ends at the same node.
    pub fn is_self_edge(&self) -> bool {
        self.from == self.to
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edge_ordering() {
        let d1 = Digest::of(b"1");
        let d2 = Digest::of(b"2");
        let (lo, hi) = if d1 < d2 { (d1, d2) } else { (d2, d1) };

        let e1 = Edge::new(lo.clone(), hi.clone());
        let e2 = Edge::new(hi.clone(), lo.clone());
        assert!(e1 < e2);
    }

    #[test]
    fn test_direction_matters() {
        let a = Digest::of(b"a");
        let b = Digest::of(b"b");
        let forward = Edge::new(a.clone(), b.clone()).digest().unwrap();
        let backward = Edge::new(b, a).digest().unwrap();
        assert_ne!(forward, backward);
    }
}
