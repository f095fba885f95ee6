//! One build pass: source to catalog to graph to snapshot.
//!
//! ```text
//! SourceRegistry::open → load → into_catalog
//!   → ChannelGraphBuilder (into the opened GraphIndex)
//!   → full snapshot (atomic)
//!   → Selector::apply on a copy → pruned snapshot (optional)
//!   → diagram of the last graph written (optional)
//!   → publish catalog to an image layout and read it back (optional)
//! ```

use std::path::{Path, PathBuf};

use crate::atomic::write_atomic;
use crate::catalog::{Bundle, Catalog, Channel};
use crate::codec::{decode_reference, push_and_tag, DecodeError, PushError};
use crate::config::BuildConfig;
use crate::graph::{to_diagram, BuildError, BuildSummary, ChannelGraphBuilder, CompileError, GraphError, GraphIndex, PruneSummary, Selector};
use crate::source::{SourceError, SourceRegistry};
use crate::store::{CachedBlobStore, LayoutStore, StoreError};
use crate::types::Descriptor;

/// Failure of a build pass.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Loading or assembling the catalog failed.
    #[error(transparent)]
    Source(#[from] SourceError),
    /// The selector expression was rejected.
    #[error("selector: {0}")]
    Compile(#[from] CompileError),
    /// Snapshot could not be read or written.
    #[error(transparent)]
    Graph(#[from] GraphError),
    /// Channel data was structurally inconsistent.
    #[error(transparent)]
    Build(#[from] BuildError),
    /// Diagram could not be written.
    #[error("writing {path}: {source}")]
    Io {
        /// Output path.
        path: PathBuf,
        /// Underlying failure.
        #[source]
        source: std::io::Error,
    },
    /// Layout store could not be opened.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Publishing the catalog failed.
    #[error(transparent)]
    Push(#[from] PushError),
    /// Reading the published catalog back failed.
    #[error(transparent)]
    Decode(#[from] DecodeError),
    /// The published catalog decodes to something else.
    #[error("published catalog {reference} does not decode to the source catalog")]
    Verify {
        /// Tag of the published catalog.
        reference: String,
    },
}

/// The derived snapshot written when a selector is configured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrunedSnapshot {
    /// Where it was written.
    pub path: PathBuf,
    /// Member nodes.
    pub nodes: usize,
    /// Edges.
    pub edges: usize,
    /// Reference-only nodes.
    pub reference_only: usize,
}

/// Outcome of [`run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// Packages in the catalog.
    pub packages: usize,
    /// Builder counts.
    pub build: BuildSummary,
    /// Selector counts, when a selector ran.
    pub prune: Option<PruneSummary>,
    /// Member nodes in the full snapshot.
    pub nodes: usize,
    /// Edges in the full snapshot.
    pub edges: usize,
    /// Reference-only nodes in the full snapshot.
    pub reference_only: usize,
    /// The pruned snapshot, when a selector ran.
    pub pruned: Option<PrunedSnapshot>,
    /// Root descriptor of the published catalog.
    pub published: Option<Descriptor>,
}

/// Run one build pass.
///
/// The full graph is always persisted at `config.snapshot`, so the next run
/// starts from everything ingested so far. A selector prunes a copy, which
/// is written to [`BuildConfig::pruned_snapshot_path`]. The selector is
/// compiled before the snapshot is opened, so a bad expression leaves every
/// output untouched.
pub fn run(config: &BuildConfig, sources: &SourceRegistry) -> Result<RunSummary, PipelineError> {
    let selector = config.selector.as_deref().map(Selector::compile).transpose()?;

    let catalog = sources
        .open(&config.source)?
        .load()?
        .into_catalog(config.catalog_name.clone())?;
    let bundles: Vec<Bundle> = catalog.bundles().cloned().collect();
    let channels: Vec<Channel> = catalog.channels().cloned().collect();

    let mut index = GraphIndex::open(&config.snapshot)?;
    let build = ChannelGraphBuilder::new(index.graph_mut()).add_channel_set(&bundles, &channels, &config.extra_tags)?;
    let graph = index.close()?;

    let (prune, pruned_graph) = match selector {
        Some(selector) => {
            let mut pruned = graph.clone();
            let prune = selector.apply(&mut pruned);
            let pruned = GraphIndex::with_graph(config.pruned_snapshot_path(), pruned).close()?;
            (Some(prune), Some(pruned))
        }
        None => (None, None),
    };

    if let Some(path) = &config.diagram {
        let shown = pruned_graph.as_ref().unwrap_or(&graph);
        write_atomic(path, to_diagram(shown).as_bytes()).map_err(|source| PipelineError::Io {
            path: path.clone(),
            source,
        })?;
        tracing::info!(path = %path.display(), "wrote graph diagram");
    }

    let published = match &config.layout {
        Some(root) => Some(publish(&catalog, root, config)?),
        None => None,
    };

    Ok(RunSummary {
        packages: catalog.packages.len(),
        build,
        prune,
        nodes: graph.node_count(),
        edges: graph.edge_count(),
        reference_only: graph.reference_only_nodes().len(),
        pruned: pruned_graph.map(|pruned| PrunedSnapshot {
            path: config.pruned_snapshot_path(),
            nodes: pruned.node_count(),
            edges: pruned.edge_count(),
            reference_only: pruned.reference_only_nodes().len(),
        }),
        published,
    })
}

/// Push `catalog` into the layout at `root`, tag it, and check that it
/// decodes back to the same value.
fn publish(catalog: &Catalog, root: &Path, config: &BuildConfig) -> Result<Descriptor, PipelineError> {
    let store = CachedBlobStore::new(LayoutStore::open(root)?, config.cache.clone());
    let descriptor = push_and_tag(&store, catalog, &config.catalog_ref)?;

    let decoded: Catalog = decode_reference(&store, &config.catalog_ref)?;
    if decoded != *catalog {
        return Err(PipelineError::Verify {
            reference: config.catalog_ref.clone(),
        });
    }

    let stats = store.stats();
    tracing::info!(
        reference = %config.catalog_ref,
        digest = %descriptor.digest,
        cache_hits = stats.hits,
        cache_misses = stats.misses,
        "published catalog"
    );
    Ok(descriptor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_source(dir: &Path) {
        fs::create_dir_all(dir).unwrap();
        fs::write(
            dir.join("etcd.json"),
            r#"
            {"schema": "bundlegraph.package", "name": "etcd", "defaultChannel": "stable"}
            {"schema": "bundlegraph.bundle", "package": "etcd", "name": "etcd.v1.0.0", "version": "1.0.0", "reference": "quay.io/etcd:1.0.0"}
            {"schema": "bundlegraph.bundle", "package": "etcd", "name": "etcd.v1.1.0", "version": "1.1.0", "reference": "quay.io/etcd:1.1.0"}
            {"schema": "bundlegraph.channel", "package": "etcd", "name": "stable",
             "entries": [{"name": "etcd.v1.0.0"}, {"name": "etcd.v1.1.0", "replaces": "etcd.v1.0.0"}]}
            "#,
        )
        .unwrap();
    }

    fn config(dir: &TempDir) -> BuildConfig {
        BuildConfig {
            source: format!("dir:{}", dir.path().join("catalog").display()),
            snapshot: dir.path().join("out/graph.json"),
            ..BuildConfig::default()
        }
    }

    #[test]
    fn test_run_writes_snapshot_and_diagram() {
        let dir = TempDir::new().unwrap();
        write_source(&dir.path().join("catalog"));
        let config = BuildConfig {
            diagram: Some(dir.path().join("out/graph.mmd")),
            ..config(&dir)
        };

        let summary = run(&config, &SourceRegistry::with_defaults()).unwrap();
        assert_eq!(summary.packages, 1);
        assert_eq!((summary.nodes, summary.edges), (2, 1));
        assert!(summary.prune.is_none());
        assert!(summary.pruned.is_none());
        assert!(!config.pruned_snapshot_path().exists());

        let reopened = GraphIndex::open(&config.snapshot).unwrap();
        assert_eq!(reopened.graph().node_count(), 2);
        let diagram = fs::read_to_string(dir.path().join("out/graph.mmd")).unwrap();
        assert!(diagram.starts_with("flowchart LR\n"));
        assert!(diagram.contains("etcd.v1.1.0-0"));
    }

    #[test]
    fn test_bad_selector_leaves_outputs_untouched() {
        let dir = TempDir::new().unwrap();
        write_source(&dir.path().join("catalog"));
        let config = BuildConfig {
            selector: Some("entry.kind".to_string()),
            ..config(&dir)
        };

        let err = run(&config, &SourceRegistry::with_defaults()).unwrap_err();
        assert!(matches!(err, PipelineError::Compile(CompileError::NotBoolean { .. })));
        assert!(!config.snapshot.exists());
    }

    #[test]
    fn test_selector_and_publish() {
        let dir = TempDir::new().unwrap();
        write_source(&dir.path().join("catalog"));
        let config = BuildConfig {
            selector: Some(r#"entry.kind == "edge" || entry.node.version == "1.1.0""#.to_string()),
            layout: Some(dir.path().join("layout")),
            ..config(&dir)
        };

        let summary = run(&config, &SourceRegistry::with_defaults()).unwrap();
        assert_eq!((summary.nodes, summary.edges, summary.reference_only), (2, 1, 0));
        assert_eq!(summary.prune.map(|p| p.nodes_demoted), Some(1));
        let pruned = summary.pruned.clone().unwrap();
        assert_eq!(pruned.path, dir.path().join("out/graph.pruned.json"));
        assert_eq!((pruned.nodes, pruned.edges, pruned.reference_only), (1, 1, 1));

        let published = summary.published.unwrap();
        let store = LayoutStore::open(dir.path().join("layout")).unwrap();
        let decoded: Catalog = decode_reference(&store, "catalog:latest").unwrap();
        assert_eq!(decoded.package("etcd").map(|p| p.bundles.len()), Some(2));
        assert!(published.is_manifest());
    }

    #[test]
    fn test_selector_keeps_full_snapshot_for_next_run() {
        let dir = TempDir::new().unwrap();
        write_source(&dir.path().join("catalog"));
        let config = BuildConfig {
            selector: Some(r#"entry.kind == "node" && entry.node.version == "1.1.0""#.to_string()),
            diagram: Some(dir.path().join("out/graph.mmd")),
            ..config(&dir)
        };

        let first = run(&config, &SourceRegistry::with_defaults()).unwrap();
        let full = GraphIndex::open(&config.snapshot).unwrap();
        assert_eq!((full.graph().node_count(), full.graph().edge_count()), (2, 1));
        let pruned = GraphIndex::open(config.pruned_snapshot_path()).unwrap();
        assert_eq!((pruned.graph().node_count(), pruned.graph().edge_count()), (1, 0));
        let diagram = fs::read_to_string(dir.path().join("out/graph.mmd")).unwrap();
        assert!(!diagram.contains("etcd.v1.0.0-0"));

        let second = run(&config, &SourceRegistry::with_defaults()).unwrap();
        assert_eq!((second.nodes, second.edges), (2, 1));
        assert_eq!(second.pruned, first.pruned);
    }
}
