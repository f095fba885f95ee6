use std::collections::BTreeMap;

use bundle_graph::codec::par_map_ordered;
use bundle_graph::{Bundle, ChannelGraphBuilder, Digest, Edge, Graph, Node, Selector};
use proptest::prelude::*;
use semver::Version;

const MAX_NODES: usize = 8;

fn node(major: u64, release: u64, reference: &str) -> Node {
    Node::new("p", Version::new(major, 0, 0), release, reference)
}

/// Nodes `0..n` with a keep flag each, plus edges `(from, to, keep)`.
fn graph_strategy() -> impl Strategy<Value = (Vec<bool>, Vec<(usize, usize, bool)>)> {
    (1usize..=MAX_NODES).prop_flat_map(|n| {
        (
            prop::collection::vec(any::<bool>(), n),
            prop::collection::vec((0..n, 0..n, any::<bool>()), 0..=2 * n),
        )
    })
}

fn flag(keep: bool) -> (&'static str, &'static str) {
    ("keep", if keep { "yes" } else { "no" })
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 128,
        failure_persistence: None,
        ..ProptestConfig::default()
    })]

    #[test]
    fn digest_is_deterministic_and_parses(bytes in prop::collection::vec(any::<u8>(), 0..256)) {
        let digest = Digest::of(&bytes);
        prop_assert_eq!(&digest, &Digest::of(&bytes.clone()));
        prop_assert_eq!(digest.as_str().len(), "sha256:".len() + 64);
        prop_assert_eq!(Digest::parse(digest.as_str()).unwrap(), digest);
    }

    #[test]
    fn node_digest_ignores_reference(major in 0u64..100, release in 0u64..4, a in "[a-z:/.]{0,20}", b in "[a-z:/.]{0,20}") {
        prop_assert_eq!(node(major, release, &a).digest().unwrap(), node(major, release, &b).digest().unwrap());
    }

    #[test]
    fn node_insertion_is_idempotent(majors in prop::collection::vec(0u64..5, 1..10)) {
        let mut once = Graph::new();
        for m in &majors {
            once.add_node(node(*m, 0, ""), [("channel", "stable")]).unwrap();
        }
        let mut twice = once.clone();
        for m in &majors {
            twice.add_node(node(*m, 0, ""), [("channel", "stable")]).unwrap();
        }
        prop_assert_eq!(&once, &twice);
        let distinct: std::collections::BTreeSet<_> = majors.iter().collect();
        prop_assert_eq!(once.node_count(), distinct.len());
    }

    #[test]
    fn releases_are_consecutive_per_version(majors in prop::collection::vec(0u64..3, 1..12)) {
        let bundles: Vec<Bundle> = majors
            .iter()
            .enumerate()
            .map(|(i, m)| Bundle::new("p", format!("p.{i}"), Version::parse(&format!("{m}.0.0+b{i}")).unwrap(), ""))
            .collect();
        let mut graph = Graph::new();
        ChannelGraphBuilder::new(&mut graph)
            .add_channel_set(&bundles, &[], &BTreeMap::new())
            .unwrap();

        prop_assert_eq!(graph.node_count(), bundles.len());
        let mut by_version: BTreeMap<u64, Vec<u64>> = BTreeMap::new();
        for n in graph.nodes().values() {
            prop_assert!(n.version.build.is_empty());
            by_version.entry(n.version.major).or_default().push(n.release);
        }
        for (_, mut releases) in by_version {
            releases.sort_unstable();
            let expected: Vec<u64> = (0..releases.len() as u64).collect();
            prop_assert_eq!(releases, expected);
        }
    }

    #[test]
    fn par_map_ordered_matches_sequential_map(items in prop::collection::vec(any::<u32>(), 0..200)) {
        let parallel = par_map_ordered(&items, |x| Ok::<_, ()>(u64::from(*x) * 3)).unwrap();
        let sequential: Vec<u64> = items.iter().map(|x| u64::from(*x) * 3).collect();
        prop_assert_eq!(parallel, sequential);
    }

    #[test]
    fn pruning_preserves_referential_integrity((keep_nodes, edges) in graph_strategy()) {
        let mut graph = Graph::new();
        let digests: Vec<Digest> = keep_nodes
            .iter()
            .enumerate()
            .map(|(i, keep)| graph.add_node(node(i as u64, 0, ""), [flag(*keep)]).unwrap())
            .collect();
        for (from, to, keep) in &edges {
            graph
                .add_edge(Edge::new(digests[*from].clone(), digests[*to].clone()), [flag(*keep)])
                .unwrap();
        }

        let selector = Selector::compile(r#""yes" in entry.tags.keep"#).unwrap();
        let summary = selector.apply(&mut graph);
        prop_assert_eq!(summary.eval_errors, 0);

        for edge in graph.edges().values() {
            prop_assert!(graph.contains_node(&edge.from));
            prop_assert!(graph.contains_node(&edge.to));
        }
        for digest in graph.reference_only_nodes().keys() {
            prop_assert!(!graph.nodes().contains_key(digest));
            prop_assert!(graph.edges().values().any(|e| &e.from == digest || &e.to == digest));
        }
        for digest in graph.nodes().keys() {
            prop_assert!(graph.tag_values(digest, "keep").any(|v| v == "yes"));
        }
    }
}
