//! Graph output: canonical JSON snapshots and Mermaid diagrams.

use super::Graph;
use crate::canonical::{to_canonical_bytes, CanonicalError};
use crate::types::{Digest, Node};

/// Canonical JSON snapshot of `graph`.
pub fn to_json(graph: &Graph) -> Result<Vec<u8>, CanonicalError> {
    to_canonical_bytes(graph)
}

fn node_id(digest: &Digest) -> String {
    format!("n{}", digest.short(12))
}

/// Mermaid flowchart of `graph`.
///
/// Nodes are listed by `(name, version, release)` and labelled
/// `name.v<version>-<release>`. Reference-only nodes use the `reference`
/// style class, members use `member`.
pub fn to_diagram(graph: &Graph) -> String {
    let mut nodes: Vec<(&Digest, &Node, &str)> = graph
        .nodes()
        .iter()
        .map(|(d, n)| (d, n, "member"))
        .chain(graph.reference_only_nodes().iter().map(|(d, n)| (d, n, "reference")))
        .collect();
    nodes.sort_by(|a, b| a.1.cmp_identity(b.1).then_with(|| a.0.cmp(b.0)));

    let mut edges: Vec<(&Node, &Node, &Digest, &Digest)> = graph
        .edges()
        .values()
        .filter_map(|e| Some((graph.node(&e.from)?, graph.node(&e.to)?, &e.from, &e.to)))
        .collect();
    edges.sort_by(|a, b| a.0.cmp_identity(b.0).then_with(|| a.1.cmp_identity(b.1)));

    let mut out = String::from("flowchart LR\n");
    out.push_str("  classDef member fill:#e8f1ff,stroke:#2f6fdf\n");
    out.push_str("  classDef reference fill:#f4f4f4,stroke:#999,stroke-dasharray: 4 2\n");
    for (digest, node, class) in &nodes {
        out.push_str(&format!("  {}[\"{}\"]:::{}\n", node_id(digest), node, class));
    }
    for (_, _, from, to) in &edges {
        out.push_str(&format!("  {} --> {}\n", node_id(from), node_id(to)));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Edge;
    use semver::Version;

    const NO_TAGS: [(&str, &str); 0] = [];

    fn sample() -> (Graph, Digest, Digest) {
        let mut graph = Graph::new();
        let b = graph
            .add_node(Node::new("etcd", Version::new(0, 9, 2), 0, ""), [("channel", "alpha")])
            .unwrap();
        let a = graph
            .add_node(Node::new("etcd", Version::new(0, 9, 0), 0, ""), [("channel", "alpha")])
            .unwrap();
        graph.add_edge(Edge::new(a.clone(), b.clone()), NO_TAGS).unwrap();
        (graph, a, b)
    }

    #[test]
    fn test_json_is_canonical_and_deterministic() {
        let (graph, _, _) = sample();
        let first = to_json(&graph).unwrap();
        assert_eq!(first, to_json(&graph.clone()).unwrap());

        let text = String::from_utf8(first).unwrap();
        assert!(text.starts_with(r#"{"edges":"#));
        assert!(!text.contains('\n'));
        assert!(text.contains(r#""referenceOnlyNodes":{}"#));
    }

    #[test]
    fn test_diagram_sorted_and_styled() {
        let (mut graph, a, b) = sample();
        graph.remove_node(&a, true);

        let diagram = to_diagram(&graph);
        let lines: Vec<&str> = diagram.lines().collect();
        assert_eq!(lines[0], "flowchart LR");
        assert_eq!(lines[3], format!("  n{}[\"etcd.v0.9.0-0\"]:::reference", a.short(12)));
        assert_eq!(lines[4], format!("  n{}[\"etcd.v0.9.2-0\"]:::member", b.short(12)));
        assert_eq!(lines[5], format!("  n{} --> n{}", a.short(12), b.short(12)));
    }
}
