//! Integration tests for the upgrade graph.
//!
//! These tests cover the builder, the selector and the snapshot together.

use std::collections::BTreeMap;
use std::fs;

use bundle_graph::graph::{GraphError, PruneSummary};
use bundle_graph::types::tag::keys;
use bundle_graph::{
    run, BuildConfig, Bundle, Channel, ChannelEntry, ChannelGraphBuilder, Digest, Edge, Graph, GraphIndex, Node,
    Selector, SourceRegistry,
};
use semver::Version;
use tempfile::TempDir;

const NO_TAGS: [(&str, &str); 0] = [];

// ─────────────────────────────────────────────────────────────────────────────
// Test Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn bundle(package: &str, version: &str) -> Bundle {
    Bundle::new(package, format!("{package}.v{version}"), Version::parse(version).unwrap(), "")
}

fn digest_of(graph: &Graph, bundle_name: &str) -> Digest {
    graph
        .nodes()
        .keys()
        .chain(graph.reference_only_nodes().keys())
        .find(|d| graph.tag_values(d, keys::BUNDLE).any(|b| b == bundle_name))
        .cloned()
        .unwrap_or_else(|| panic!("no node for {bundle_name}"))
}

fn build(bundles: &[Bundle], channels: &[Channel]) -> Graph {
    let mut graph = Graph::new();
    ChannelGraphBuilder::new(&mut graph)
        .add_channel_set(bundles, channels, &BTreeMap::new())
        .unwrap();
    graph
}

// ─────────────────────────────────────────────────────────────────────────────
// BUILDER TESTS
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_release_numbers_for_equal_versions() {
    let bundles = vec![
        Bundle::new("p", "p.a", Version::parse("1.0.0+1").unwrap(), ""),
        Bundle::new("p", "p.b", Version::parse("1.0.0+2").unwrap(), ""),
        Bundle::new("p", "p.c", Version::parse("1.0.1").unwrap(), ""),
    ];
    let graph = build(&bundles, &[]);

    let releases: Vec<u64> = ["p.a", "p.b", "p.c"]
        .iter()
        .map(|name| graph.node(&digest_of(&graph, name)).unwrap().release)
        .collect();
    assert_eq!(releases, vec![0, 1, 0]);
}

#[test]
fn test_release_numbers_for_identical_nominal_versions() {
    let bundles = vec![
        Bundle::new("p", "p.a", Version::new(1, 0, 0), "quay.io/p@sha256:aa"),
        Bundle::new("p", "p.b", Version::new(1, 0, 0), "quay.io/p@sha256:bb"),
        Bundle::new("p", "p.c", Version::new(1, 0, 1), "quay.io/p@sha256:cc"),
    ];
    let graph = build(&bundles, &[]);

    for (name, release) in [("p.a", 0), ("p.b", 1), ("p.c", 0)] {
        let node = graph.node(&digest_of(&graph, name)).unwrap();
        assert_eq!(node.release, release, "release of {name}");
    }
    assert_eq!(graph.node_count(), 3);
}

#[test]
fn test_skip_range_scenario() {
    let bundles = vec![bundle("p", "1.0.0"), bundle("p", "1.0.1"), bundle("p", "1.1.0")];
    let mut head = ChannelEntry::new("p.v1.1.0");
    head.skip_range = Some("<1.1.0".to_string());
    let channel = Channel {
        package: "p".to_string(),
        name: "stable".to_string(),
        entries: vec![ChannelEntry::new("p.v1.0.0"), ChannelEntry::new("p.v1.0.1"), head],
    };
    let graph = build(&bundles, &[channel]);

    let target = digest_of(&graph, "p.v1.1.0");
    let mut sources: Vec<Digest> = graph.predecessors(&target).into_iter().cloned().collect();
    sources.sort();
    let mut expected = vec![digest_of(&graph, "p.v1.0.0"), digest_of(&graph, "p.v1.0.1")];
    expected.sort();

    assert_eq!(graph.edge_count(), 2);
    assert_eq!(sources, expected);
}

#[test]
fn test_rebuild_is_idempotent() {
    let bundles = vec![bundle("p", "1.0.0"), bundle("p", "2.0.0")];
    let mut upgrade = ChannelEntry::new("p.v2.0.0");
    upgrade.replaces = Some("p.v1.0.0".to_string());
    let channels = vec![Channel {
        package: "p".to_string(),
        name: "stable".to_string(),
        entries: vec![ChannelEntry::new("p.v1.0.0"), upgrade],
    }];

    let mut graph = build(&bundles, &channels);
    let once = graph.clone();
    ChannelGraphBuilder::new(&mut graph)
        .add_channel_set(&bundles, &channels, &BTreeMap::new())
        .unwrap();
    assert_eq!(graph, once, "re-adding the same data must not change the graph");
}

// ─────────────────────────────────────────────────────────────────────────────
// INTEGRITY TESTS
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_edge_to_unknown_node_is_rejected_and_graph_unchanged() {
    let mut graph = Graph::new();
    let a = graph.add_node(Node::new("p", Version::new(1, 0, 0), 0, ""), NO_TAGS).unwrap();
    let ghost = Node::new("p", Version::new(9, 9, 9), 0, "").digest().unwrap();
    let before = graph.clone();

    let err = graph.add_edge(Edge::new(a, ghost.clone()), [("channel", "stable")]).unwrap_err();
    assert!(matches!(err, GraphError::UnknownEndpoint { missing, .. } if missing == ghost));
    assert_eq!(graph, before);
}

#[test]
fn test_node_digest_ignores_reference() {
    let mut graph = Graph::new();
    let a = graph
        .add_node(Node::new("p", Version::new(1, 0, 0), 0, "quay.io/p:1"), [("channel", "a")])
        .unwrap();
    let b = graph
        .add_node(Node::new("p", Version::new(1, 0, 0), 0, "quay.io/p@sha256:00"), [("channel", "b")])
        .unwrap();

    assert_eq!(a, b);
    assert_eq!(graph.node_count(), 1);
    assert_eq!(graph.tag_values(&a, "channel").collect::<Vec<_>>(), vec!["a", "b"]);
}

// ─────────────────────────────────────────────────────────────────────────────
// SELECTOR TESTS
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_pruning_keeps_referenced_endpoint() {
    let mut graph = Graph::new();
    let a = graph.add_node(Node::new("a", Version::new(1, 0, 0), 0, ""), NO_TAGS).unwrap();
    let b = graph.add_node(Node::new("b", Version::new(1, 0, 0), 0, ""), NO_TAGS).unwrap();
    graph.add_node(Node::new("c", Version::new(1, 0, 0), 0, ""), NO_TAGS).unwrap();
    let ab = graph.add_edge(Edge::new(a.clone(), b.clone()), NO_TAGS).unwrap();

    let selector = Selector::compile(r#"entry.kind == "edge" || entry.node.name == "b""#).unwrap();
    selector.apply(&mut graph);

    assert_eq!(graph.nodes().keys().cloned().collect::<Vec<_>>(), vec![b]);
    assert_eq!(graph.reference_only_nodes().keys().cloned().collect::<Vec<_>>(), vec![a]);
    assert_eq!(graph.edges().keys().cloned().collect::<Vec<_>>(), vec![ab]);
}

#[test]
fn test_channel_selector_over_built_graph() {
    let bundles = vec![bundle("p", "1.0.0"), bundle("p", "1.1.0"), bundle("p", "2.0.0")];
    let mut stable_head = ChannelEntry::new("p.v1.1.0");
    stable_head.replaces = Some("p.v1.0.0".to_string());
    let mut fast_head = ChannelEntry::new("p.v2.0.0");
    fast_head.skip_range = Some(">=1.0.0 <2.0.0".to_string());
    let channels = vec![
        Channel {
            package: "p".to_string(),
            name: "stable".to_string(),
            entries: vec![ChannelEntry::new("p.v1.0.0"), stable_head],
        },
        Channel {
            package: "p".to_string(),
            name: "fast".to_string(),
            entries: vec![fast_head],
        },
    ];
    let mut graph = build(&bundles, &channels);
    assert_eq!(graph.edge_count(), 3);

    let selector = Selector::compile(r#""stable" in entry.tags.channel"#).unwrap();
    let summary = selector.apply(&mut graph);

    assert_eq!(graph.edge_count(), 1);
    assert_eq!(graph.node_count(), 2);
    assert!(graph.reference_only_nodes().is_empty());
    let dropped = Node::new("p", Version::new(2, 0, 0), 0, "").digest().unwrap();
    assert!(!graph.contains_node(&dropped));
    assert_eq!(
        summary,
        PruneSummary {
            edges_removed: 2,
            nodes_removed: 1,
            ..PruneSummary::default()
        }
    );
}

// ─────────────────────────────────────────────────────────────────────────────
// PIPELINE TESTS
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_directory_source_to_snapshot() {
    let dir = TempDir::new().unwrap();
    let source = dir.path().join("catalog");
    fs::create_dir_all(source.join("etcd")).unwrap();
    fs::write(
        source.join("etcd/index.json"),
        r#"
        {"schema": "bundlegraph.package", "name": "etcd", "defaultChannel": "stable"}
        {"schema": "bundlegraph.bundle", "package": "etcd", "name": "etcd.v0.9.0", "version": "0.9.0"}
        {"schema": "bundlegraph.bundle", "package": "etcd", "name": "etcd.v0.9.2", "version": "0.9.2"}
        {"schema": "bundlegraph.bundle", "package": "etcd", "name": "etcd.v0.9.4", "version": "0.9.4"}
        {"schema": "bundlegraph.channel", "package": "etcd", "name": "stable", "entries": [
            {"name": "etcd.v0.9.0"},
            {"name": "etcd.v0.9.2", "replaces": "etcd.v0.9.0"},
            {"name": "etcd.v0.9.4", "replaces": "etcd.v0.9.2", "skips": ["etcd.v0.9.1"]}
        ]}
        "#,
    )
    .unwrap();

    let config = BuildConfig {
        source: format!("dir:{}", source.display()),
        snapshot: dir.path().join("graph.json"),
        extra_tags: BTreeMap::from([("origin".to_string(), "test".to_string())]),
        ..BuildConfig::default()
    };
    let summary = run(&config, &SourceRegistry::with_defaults()).unwrap();
    assert_eq!((summary.nodes, summary.edges), (3, 2));
    assert_eq!(summary.build.dangling_references, 1);

    let first = fs::read(&config.snapshot).unwrap();
    let graph = GraphIndex::open(&config.snapshot).unwrap().close().unwrap();
    assert_eq!(fs::read(&config.snapshot).unwrap(), first, "reopen and close must rewrite identical bytes");
    for edge in graph.edges().keys() {
        assert_eq!(graph.tag_values(edge, "origin").collect::<Vec<_>>(), vec!["test"]);
    }

    // A second run over the existing snapshot adds nothing new.
    let again = run(&config, &SourceRegistry::with_defaults()).unwrap();
    assert_eq!((again.nodes, again.edges), (3, 2));
    assert_eq!(fs::read(&config.snapshot).unwrap(), first);
}
