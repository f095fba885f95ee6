//! Upgrade graph: content-addressed nodes, edges and tags.
//!
//! Nodes and edges are keyed by the digest of their identity, so inserting
//! the same content twice is a no-op apart from merging newly supplied tags.
//! Tags attach to a node or edge digest and accumulate into value sets.
//!
//! ```text
//! nodes:              digest -> Node
//! edges:              digest -> Edge        (endpoints resolve in nodes)
//! tags:               digest -> key -> {values}
//! referenceOnlyNodes: digest -> Node        (pruned, still named by an edge)
//! ```

pub mod builder;
pub mod index;
pub mod range;
pub mod render;
pub mod selector;

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::io;

use crate::canonical::CanonicalError;
use crate::types::{Digest, Edge, Node, Tag, TagScope};

pub use builder::{BuildError, BuildSummary, ChannelGraphBuilder};
pub use index::GraphIndex;
pub use range::{RangeError, VersionRange};
pub use render::{to_diagram, to_json};
pub use selector::{CompileError, EvalError, PruneSummary, Selector, Value};

/// Tag values of one node or edge, by key.
pub type TagSet = BTreeMap<String, BTreeSet<String>>;

/// Errors from graph operations.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    /// An edge endpoint is not a node in the graph.
    #[error("unknown endpoint {missing} in edge {from} -> {to}")]
    UnknownEndpoint {
        /// Edge source.
        from: Digest,
        /// Edge target.
        to: Digest,
        /// The endpoint that does not resolve.
        missing: Digest,
    },
    /// A tag names a digest that is neither a node nor an edge.
    #[error("unknown tag reference {0}")]
    UnknownReference(Digest),
    /// Identity encoding failed.
    #[error(transparent)]
    Canonical(#[from] CanonicalError),
    /// Snapshot file I/O failed.
    #[error("snapshot I/O error: {0}")]
    Io(#[from] io::Error),
    /// Snapshot bytes did not parse.
    #[error("snapshot parse error: {0}")]
    Parse(#[from] serde_json::Error),
    /// Snapshot parsed but violates a graph invariant.
    #[error("inconsistent snapshot: {0}")]
    Snapshot(String),
}

/// The upgrade graph aggregate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Graph {
    #[serde(default)]
    nodes: BTreeMap<Digest, Node>,
    #[serde(default)]
    edges: BTreeMap<Digest, Edge>,
    #[serde(default)]
    tags: BTreeMap<Digest, TagSet>,
    #[serde(default)]
    reference_only_nodes: BTreeMap<Digest, Node>,
    /// Node name -> digests of member nodes.
    #[serde(skip)]
    by_name: BTreeMap<String, BTreeSet<Digest>>,
}

impl Graph {
    /// Empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a node and merge `tags` into its tag set.
    ///
    /// A node previously pruned to reference-only is promoted back to a member.
    pub fn add_node<I, K, V>(&mut self, node: Node, tags: I) -> Result<Digest, GraphError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let digest = node.digest()?;
        let node = self.reference_only_nodes.remove(&digest).unwrap_or(node);
        self.by_name
            .entry(node.name.clone())
            .or_default()
            .insert(digest.clone());
        self.nodes.entry(digest.clone()).or_insert(node);
        self.merge_tags(&digest, tags);
        Ok(digest)
    }

    /// Insert an edge and merge `tags` into its tag set.
    ///
    /// Both endpoints must already be nodes (members or reference-only);
    /// otherwise the graph is left unchanged.
    pub fn add_edge<I, K, V>(&mut self, edge: Edge, tags: I) -> Result<Digest, GraphError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for endpoint in [&edge.from, &edge.to] {
            if !self.contains_node(endpoint) {
                return Err(GraphError::UnknownEndpoint {
                    from: edge.from.clone(),
                    to: edge.to.clone(),
                    missing: endpoint.clone(),
                });
            }
        }
        let digest = edge.digest()?;
        self.edges.entry(digest.clone()).or_insert(edge);
        self.merge_tags(&digest, tags);
        Ok(digest)
    }

    /// Add one tag value to a node or edge.
    pub fn add_tag(&mut self, reference: &Digest, key: impl Into<String>, value: impl Into<String>) -> Result<(), GraphError> {
        if !self.nodes.contains_key(reference) && !self.edges.contains_key(reference) {
            return Err(GraphError::UnknownReference(reference.clone()));
        }
        self.merge_tags(reference, [(key, value)]);
        Ok(())
    }

    fn merge_tags<I, K, V>(&mut self, reference: &Digest, tags: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut tags = tags.into_iter().peekable();
        if tags.peek().is_none() {
            return;
        }
        let set = self.tags.entry(reference.clone()).or_default();
        for (key, value) in tags {
            set.entry(key.into()).or_default().insert(value.into());
        }
    }

    /// Whether `digest` is a member or reference-only node.
    pub fn contains_node(&self, digest: &Digest) -> bool {
        self.nodes.contains_key(digest) || self.reference_only_nodes.contains_key(digest)
    }

    /// Member nodes by digest.
    pub fn nodes(&self) -> &BTreeMap<Digest, Node> {
        &self.nodes
    }

    /// Edges by digest.
    pub fn edges(&self) -> &BTreeMap<Digest, Edge> {
        &self.edges
    }

    /// Pruned nodes still named by an edge.
    pub fn reference_only_nodes(&self) -> &BTreeMap<Digest, Node> {
        &self.reference_only_nodes
    }

    /// Node by digest, member or reference-only.
    pub fn node(&self, digest: &Digest) -> Option<&Node> {
        self.nodes
            .get(digest)
            .or_else(|| self.reference_only_nodes.get(digest))
    }

    /// Tags of a node or edge.
    pub fn tags_of(&self, digest: &Digest) -> Option<&TagSet> {
        self.tags.get(digest)
    }

    /// Values of one tag key.
    pub fn tag_values<'a>(&'a self, digest: &Digest, key: &str) -> impl Iterator<Item = &'a str> + 'a {
        self.tags
            .get(digest)
            .and_then(|set| set.get(key))
            .into_iter()
            .flatten()
            .map(String::as_str)
    }

    /// Every tag as a flat record, in digest then key then value order.
    pub fn tag_records(&self) -> Vec<Tag> {
        let mut records = Vec::new();
        for (reference, set) in &self.tags {
            let scope = if self.edges.contains_key(reference) {
                TagScope::Edge
            } else {
                TagScope::Node
            };
            for (key, values) in set {
                for value in values {
                    records.push(Tag::new(scope, reference.clone(), key.clone(), value.clone()));
                }
            }
        }
        records
    }

    /// Member nodes with the given name.
    pub fn nodes_named<'a>(&'a self, name: &str) -> impl Iterator<Item = (&'a Digest, &'a Node)> + 'a {
        self.by_name
            .get(name)
            .into_iter()
            .flatten()
            .filter_map(move |digest| self.nodes.get_key_value(digest))
    }

    /// Targets of edges leaving `digest`.
    pub fn successors(&self, digest: &Digest) -> Vec<&Digest> {
        self.edges
            .values()
            .filter(|e| &e.from == digest)
            .map(|e| &e.to)
            .collect()
    }

    /// Sources of edges entering `digest`.
    pub fn predecessors(&self, digest: &Digest) -> Vec<&Digest> {
        self.edges
            .values()
            .filter(|e| &e.to == digest)
            .map(|e| &e.from)
            .collect()
    }

    /// Number of member nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of edges.
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub(crate) fn remove_edge(&mut self, digest: &Digest) {
        self.edges.remove(digest);
        self.tags.remove(digest);
    }

    /// Drop a member node. When `keep_reference` is set it moves to the
    /// reference-only set instead.
    pub(crate) fn remove_node(&mut self, digest: &Digest, keep_reference: bool) {
        let Some(node) = self.nodes.remove(digest) else {
            return;
        };
        self.tags.remove(digest);
        if let Some(members) = self.by_name.get_mut(&node.name) {
            members.remove(digest);
            if members.is_empty() {
                self.by_name.remove(&node.name);
            }
        }
        if keep_reference {
            self.reference_only_nodes.insert(digest.clone(), node);
        }
    }

    /// Drop reference-only nodes that no edge names.
    pub(crate) fn drop_unreferenced(&mut self) -> usize {
        let named: BTreeSet<&Digest> = self.edges.values().flat_map(|e| [&e.from, &e.to]).collect();
        let dangling: Vec<Digest> = self
            .reference_only_nodes
            .keys()
            .filter(|d| !named.contains(d))
            .cloned()
            .collect();
        for digest in &dangling {
            self.reference_only_nodes.remove(digest);
        }
        dangling.len()
    }

    /// Parse a snapshot, check its invariants and rebuild the name index.
    pub fn from_json(bytes: &[u8]) -> Result<Self, GraphError> {
        let mut graph: Graph = serde_json::from_slice(bytes)?;

        for (digest, node) in graph.nodes.iter().chain(graph.reference_only_nodes.iter()) {
            if node.digest()? != *digest {
                return Err(GraphError::Snapshot(format!("node {node} stored under {digest}")));
            }
        }
        if let Some(digest) = graph.nodes.keys().find(|d| graph.reference_only_nodes.contains_key(*d)) {
            return Err(GraphError::Snapshot(format!("node {digest} is both member and reference-only")));
        }
        for (digest, edge) in &graph.edges {
            if edge.digest()? != *digest {
                return Err(GraphError::Snapshot(format!("edge {} -> {} stored under {digest}", edge.from, edge.to)));
            }
            for endpoint in [&edge.from, &edge.to] {
                if !graph.contains_node(endpoint) {
                    return Err(GraphError::UnknownEndpoint {
                        from: edge.from.clone(),
                        to: edge.to.clone(),
                        missing: endpoint.clone(),
                    });
                }
            }
        }
        if let Some(digest) = graph
            .tags
            .keys()
            .find(|d| !graph.nodes.contains_key(*d) && !graph.edges.contains_key(*d))
        {
            return Err(GraphError::UnknownReference(digest.clone()));
        }

        graph.by_name = BTreeMap::new();
        for (digest, node) in &graph.nodes {
            graph
                .by_name
                .entry(node.name.clone())
                .or_default()
                .insert(digest.clone());
        }
        Ok(graph)
    }
}
