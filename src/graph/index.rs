//! Snapshot-backed graph index.
//!
//! Opens a graph from its snapshot file (or starts empty), accepts
//! insertions, and persists on [`GraphIndex::close`]. The snapshot is
//! written to a temp file and renamed into place, so readers never see a
//! partial file.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use super::{render, Graph, GraphError};
use crate::atomic::write_atomic;
use crate::types::{Digest, Edge, Node};

/// A graph bound to its snapshot path.
#[derive(Debug)]
pub struct GraphIndex {
    path: PathBuf,
    graph: Graph,
}

impl GraphIndex {
    /// Open the snapshot at `path`; a missing file yields an empty graph.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, GraphError> {
        let path = path.into();
        let graph = match fs::read(&path) {
            Ok(bytes) => Graph::from_json(&bytes)?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => Graph::new(),
            Err(e) => return Err(e.into()),
        };
        tracing::debug!(
            path = %path.display(),
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            "opened graph index"
        );
        Ok(Self { path, graph })
    }

    /// Wrap an existing graph.
    pub fn with_graph(path: impl Into<PathBuf>, graph: Graph) -> Self {
        Self {
            path: path.into(),
            graph,
        }
    }

    /// Snapshot path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The graph.
    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// The graph, mutably.
    pub fn graph_mut(&mut self) -> &mut Graph {
        &mut self.graph
    }

    /// See [`Graph::add_node`].
    pub fn add_node<I, K, V>(&mut self, node: Node, tags: I) -> Result<Digest, GraphError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.graph.add_node(node, tags)
    }

    /// See [`Graph::add_edge`].
    pub fn add_edge<I, K, V>(&mut self, edge: Edge, tags: I) -> Result<Digest, GraphError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.graph.add_edge(edge, tags)
    }

    /// See [`Graph::add_tag`].
    pub fn add_tag(&mut self, reference: &Digest, key: impl Into<String>, value: impl Into<String>) -> Result<(), GraphError> {
        self.graph.add_tag(reference, key, value)
    }

    /// Write the snapshot without closing.
    pub fn flush(&self) -> Result<(), GraphError> {
        let bytes = render::to_json(&self.graph)?;
        write_atomic(&self.path, &bytes)?;
        tracing::info!(
            path = %self.path.display(),
            nodes = self.graph.node_count(),
            edges = self.graph.edge_count(),
            reference_only = self.graph.reference_only_nodes().len(),
            "wrote graph snapshot"
        );
        Ok(())
    }

    /// Persist the snapshot and hand back the graph.
    pub fn close(self) -> Result<Graph, GraphError> {
        self.flush()?;
        Ok(self.graph)
    }
}
