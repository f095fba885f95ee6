//! Selector expressions: compile a boolean predicate and prune a graph.
//!
//! The language is a small CEL subset evaluated against one input value,
//! `entry`:
//!
//! ```text
//! entry.kind                       "node" | "edge"
//! entry.tags                       map(string, list(string))
//! entry.node.{name,version,reference,digest}   string
//! entry.node.release               int
//! entry.edge.{from,to}             node fields of each endpoint
//! entry.edge.digest                string
//! ```
//!
//! Supported: literals (string, int, bool, null, list), `! && || == != < <=
//! > >= in`, `m["k"]`, `m.k`, `has(x.f)`, `size(x)`, string methods
//! `startsWith`, `endsWith`, `contains`, `matches`, and the `exists` / `all`
//! macros.
//!
//! ```ignore
//! let selector = Selector::compile(r#"entry.kind == "edge" || "stable" in entry.tags.channel"#)?;
//! let summary = selector.apply(&mut graph);
//! ```

mod check;
mod eval;
mod lexer;
mod parser;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

pub use eval::{EvalError, Value};

use self::check::{Checker, ENTRY};
use self::eval::Env;
use self::parser::{Expr, Parser};
use super::{Graph, TagSet};
use crate::types::{Digest, Edge, Node};

/// Rejected selector expression. Raised before any graph mutation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CompileError {
    /// Tokenizer or parser failure.
    #[error("syntax error at {position}: {message}")]
    Syntax {
        /// Byte offset into the expression.
        position: usize,
        /// What went wrong.
        message: String,
    },
    /// The expression does not produce a boolean.
    #[error("expression is not boolean (found {found})")]
    NotBoolean {
        /// Inferred type.
        found: String,
    },
    /// Unknown variable or field.
    #[error("undeclared reference to {0}")]
    UndeclaredReference(String),
    /// Unknown function or method.
    #[error("unknown function {0}")]
    UnknownFunction(String),
    /// Function called with the wrong number of arguments.
    #[error("{function} takes {expected} argument(s), got {found}")]
    WrongArity {
        /// Function name.
        function: String,
        /// Declared arity.
        expected: usize,
        /// Arguments given.
        found: usize,
    },
    /// Operands of the wrong type.
    #[error("type error: {0}")]
    Type(String),
    /// A literal `matches` pattern is not a valid regular expression.
    #[error("invalid regex {pattern:?}: {message}")]
    InvalidRegex {
        /// The pattern.
        pattern: String,
        /// Parser message.
        message: String,
    },
}

/// What one [`Selector::apply`] pass changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneSummary {
    /// Edges deleted.
    pub edges_removed: usize,
    /// Nodes deleted outright.
    pub nodes_removed: usize,
    /// Nodes moved to the reference-only set.
    pub nodes_demoted: usize,
    /// Reference-only nodes dropped because no edge names them.
    pub references_dropped: usize,
    /// Entries whose evaluation failed (counted as non-matching).
    pub eval_errors: usize,
}

/// A compiled selector.
#[derive(Debug, Clone)]
pub struct Selector {
    source: String,
    program: Expr,
}

fn tags_value(tags: Option<&TagSet>) -> Value {
    let map = tags
        .map(|tags| {
            tags.iter()
                .map(|(k, values)| (k.clone(), Value::List(values.iter().cloned().map(Value::String).collect())))
                .collect()
        })
        .unwrap_or_default();
    Value::Map(map)
}

fn node_value(digest: &Digest, node: Option<&Node>) -> Value {
    let mut map = BTreeMap::from([("digest".to_string(), Value::from(digest.as_str()))]);
    if let Some(node) = node {
        map.insert("name".to_string(), Value::from(node.name.as_str()));
        map.insert("version".to_string(), Value::String(node.version.to_string()));
        map.insert("release".to_string(), Value::Int(i64::try_from(node.release).unwrap_or(i64::MAX)));
        map.insert("reference".to_string(), Value::from(node.reference.as_str()));
    }
    Value::Map(map)
}

/// The `entry` value for a node.
pub fn node_entry(graph: &Graph, digest: &Digest, node: &Node) -> Value {
    Value::Map(BTreeMap::from([
        ("kind".to_string(), Value::from("node")),
        ("tags".to_string(), tags_value(graph.tags_of(digest))),
        ("node".to_string(), node_value(digest, Some(node))),
    ]))
}

/// The `entry` value for an edge.
pub fn edge_entry(graph: &Graph, digest: &Digest, edge: &Edge) -> Value {
    let edge_map = BTreeMap::from([
        ("digest".to_string(), Value::from(digest.as_str())),
        ("from".to_string(), node_value(&edge.from, graph.node(&edge.from))),
        ("to".to_string(), node_value(&edge.to, graph.node(&edge.to))),
    ]);
    Value::Map(BTreeMap::from([
        ("kind".to_string(), Value::from("edge")),
        ("tags".to_string(), tags_value(graph.tags_of(digest))),
        ("edge".to_string(), Value::Map(edge_map)),
    ]))
}

impl Selector {
    /// Parse and check `expression`.
    pub fn compile(expression: &str) -> Result<Self, CompileError> {
        let expr = Parser::new(expression)?.parse()?;
        let program = Checker::new().check_program(expr)?;
        Ok(Self {
            source: expression.to_string(),
            program,
        })
    }

    /// The expression text.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluate against one `entry` value.
    pub fn evaluate(&self, entry: &Value) -> Result<bool, EvalError> {
        let mut env = Env::new(ENTRY, entry.clone());
        match eval::eval(&self.program, &mut env)? {
            Value::Bool(b) => Ok(b),
            other => Err(EvalError::NoOverload {
                operation: "selector".to_string(),
                operands: other.type_name().to_string(),
            }),
        }
    }

    fn keeps(&self, entry: &Value, digest: &Digest, summary: &mut PruneSummary) -> bool {
        match self.evaluate(entry) {
            Ok(keep) => keep,
            Err(error) => {
                summary.eval_errors += 1;
                tracing::debug!(
                    selector = %self.source,
                    digest = %digest,
                    %error,
                    "selector evaluation failed, treating entry as unmatched"
                );
                false
            }
        }
    }

    /// Prune `graph` to the entries this selector matches.
    ///
    /// Edges are evaluated first; the endpoints of surviving edges count as
    /// referenced. Unmatched nodes are then removed, or moved to the
    /// reference-only set when referenced. Reference-only nodes no edge
    /// names any longer are dropped at the end.
    pub fn apply(&self, graph: &mut Graph) -> PruneSummary {
        let mut summary = PruneSummary::default();

        let mut referenced: BTreeSet<Digest> = BTreeSet::new();
        let mut doomed_edges = Vec::new();
        for (digest, edge) in graph.edges() {
            if self.keeps(&edge_entry(graph, digest, edge), digest, &mut summary) {
                referenced.insert(edge.from.clone());
                referenced.insert(edge.to.clone());
            } else {
                doomed_edges.push(digest.clone());
            }
        }
        for digest in &doomed_edges {
            graph.remove_edge(digest);
        }
        summary.edges_removed = doomed_edges.len();

        let doomed_nodes: Vec<Digest> = graph
            .nodes()
            .iter()
            .filter(|(digest, node)| !self.keeps(&node_entry(graph, digest, node), digest, &mut summary))
            .map(|(digest, _)| digest.clone())
            .collect();
        for digest in &doomed_nodes {
            let keep_reference = referenced.contains(digest);
            graph.remove_node(digest, keep_reference);
            if keep_reference {
                summary.nodes_demoted += 1;
            } else {
                summary.nodes_removed += 1;
            }
        }

        summary.references_dropped = graph.drop_unreferenced();

        tracing::info!(
            selector = %self.source,
            edges_removed = summary.edges_removed,
            nodes_removed = summary.nodes_removed,
            nodes_demoted = summary.nodes_demoted,
            references_dropped = summary.references_dropped,
            eval_errors = summary.eval_errors,
            "applied selector"
        );
        summary
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use semver::Version;

    const NO_TAGS: [(&str, &str); 0] = [];

    fn abc() -> (Graph, Digest, Digest, Digest, Digest) {
        let mut graph = Graph::new();
        let a = graph
            .add_node(Node::new("p", Version::new(1, 0, 0), 0, "img:a"), [("bundle", "a")])
            .unwrap();
        let b = graph
            .add_node(Node::new("p", Version::new(1, 1, 0), 0, "img:b"), [("bundle", "b")])
            .unwrap();
        let c = graph
            .add_node(Node::new("p", Version::new(1, 2, 0), 0, "img:c"), [("bundle", "c")])
            .unwrap();
        let ab = graph.add_edge(Edge::new(a.clone(), b.clone()), [("channel", "stable")]).unwrap();
        (graph, a, b, c, ab)
    }

    #[test]
    fn test_compile_rejects_before_mutation() {
        assert!(matches!(Selector::compile("entry.kind"), Err(CompileError::NotBoolean { .. })));
        assert!(matches!(Selector::compile("entry.kind =="), Err(CompileError::Syntax { .. })));
    }

    #[test]
    fn test_prune_keeps_referenced_endpoint() {
        let (mut graph, a, b, c, ab) = abc();
        let selector = Selector::compile(r#"entry.kind == "edge" || "b" in entry.tags.bundle"#).unwrap();
        let summary = selector.apply(&mut graph);

        assert_eq!(graph.nodes().keys().collect::<Vec<_>>(), vec![&b]);
        assert_eq!(graph.reference_only_nodes().keys().collect::<Vec<_>>(), vec![&a]);
        assert_eq!(graph.edges().keys().collect::<Vec<_>>(), vec![&ab]);
        assert!(graph.tags_of(&a).is_none());
        assert!(graph.tags_of(&c).is_none());
        assert_eq!(
            summary,
            PruneSummary {
                nodes_removed: 1,
                nodes_demoted: 1,
                ..PruneSummary::default()
            }
        );
    }

    #[test]
    fn test_prune_edge_fields_and_cleanup() {
        let (mut graph, a, b, _, _) = abc();
        graph.remove_node(&a, true);
        let selector = Selector::compile("entry.kind == 'node' || entry.edge.from.name != 'p'").unwrap();
        let summary = selector.apply(&mut graph);

        assert_eq!(graph.edge_count(), 0);
        assert!(graph.reference_only_nodes().is_empty());
        assert!(graph.contains_node(&b));
        assert_eq!(summary.edges_removed, 1);
        assert_eq!(summary.references_dropped, 1);
    }

    #[test]
    fn test_eval_errors_do_not_match() {
        let (mut graph, _, _, _, _) = abc();
        let selector = Selector::compile("entry.tags.channel[0] == 'stable'").unwrap();
        let summary = selector.apply(&mut graph);

        assert_eq!(summary.eval_errors, 3);
        assert_eq!(graph.node_count(), 0);
        assert_eq!(graph.edge_count(), 1);
        assert_eq!(graph.reference_only_nodes().len(), 2);
    }

    #[test]
    fn test_node_entry_shape() {
        let mut graph = Graph::new();
        let d = graph
            .add_node(Node::new("etcd", Version::new(0, 9, 2), 3, "quay.io/etcd:0.9.2"), NO_TAGS)
            .unwrap();
        let selector = Selector::compile(
            "entry.node.name == 'etcd' && entry.node.version == '0.9.2' && entry.node.release == 3 \
             && entry.node.reference.startsWith('quay.io/') && size(entry.tags) == 0 \
             && entry.node.digest.startsWith('sha256:')",
        )
        .unwrap();
        let entry = node_entry(&graph, &d, graph.node(&d).unwrap());
        assert_eq!(selector.evaluate(&entry), Ok(true));
        assert_eq!(selector.to_string(), selector.source());
    }
}
