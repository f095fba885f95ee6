//! Channel graph builder: bundles and channels to nodes, edges and tags.
//!
//! Bundles become nodes. Within a package they are ordered by version (then
//! build metadata); build metadata is dropped from the node version and
//! builds sharing a nominal version get increasing `release` numbers.
//!
//! Each channel entry is tagged with its channel and gets edges from the
//! bundles it `replaces`, `skips`, or covers with its `skipRange`. Targets
//! outside the batch and unparsable ranges are logged and skipped.

use semver::{BuildMetadata, Version};
use std::collections::BTreeMap;

use super::range::{cmp_precedence, VersionRange};
use super::{Graph, GraphError};
use crate::catalog::{Bundle, Channel};
use crate::types::tag::keys;
use crate::types::{Digest, Edge, Node};

/// Errors from building the graph.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    /// Two bundles of one package share a name.
    #[error("package {package}: bundle {name} declared twice")]
    DuplicateBundle {
        /// Package name.
        package: String,
        /// Bundle name.
        name: String,
    },
    /// A channel entry names a bundle that is not in the batch.
    #[error("package {package}: channel {channel} lists unknown bundle {entry}")]
    UnknownEntry {
        /// Package name.
        package: String,
        /// Channel name.
        channel: String,
        /// Entry name.
        entry: String,
    },
    /// Graph insertion failed.
    #[error(transparent)]
    Graph(#[from] GraphError),
}

/// Counts from one `add_channel_set` pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildSummary {
    /// Bundles inserted as nodes.
    pub nodes: usize,
    /// Edge insertions (repeats included).
    pub edges: usize,
    /// Replaces/skips targets not found in the batch.
    pub dangling_references: usize,
    /// skipRange values that did not parse.
    pub invalid_ranges: usize,
}

struct Member<'b> {
    digest: Digest,
    bundle: &'b Bundle,
}

fn strip_build(version: &Version) -> Version {
    Version {
        build: BuildMetadata::EMPTY,
        ..version.clone()
    }
}

/// Feeds channel data into a graph.
pub struct ChannelGraphBuilder<'g> {
    graph: &'g mut Graph,
}

impl<'g> ChannelGraphBuilder<'g> {
    /// Builder writing into `graph`.
    pub fn new(graph: &'g mut Graph) -> Self {
        Self { graph }
    }

    /// Insert `bundles` as nodes and derive edges from `channels`.
    ///
    /// `extra_tags` are added to every node and edge this call inserts.
    pub fn add_channel_set(
        &mut self,
        bundles: &[Bundle],
        channels: &[Channel],
        extra_tags: &BTreeMap<String, String>,
    ) -> Result<BuildSummary, BuildError> {
        let mut summary = BuildSummary::default();

        let mut by_package: BTreeMap<&str, Vec<&Bundle>> = BTreeMap::new();
        for bundle in bundles {
            by_package.entry(bundle.package.as_str()).or_default().push(bundle);
        }

        let mut members: BTreeMap<&str, Vec<Member<'_>>> = BTreeMap::new();
        for (package, mut list) in by_package {
            list.sort_by(|a, b| {
                cmp_precedence(&a.version, &b.version).then_with(|| a.version.build.cmp(&b.version.build))
            });

            let mut package_members: Vec<Member<'_>> = Vec::with_capacity(list.len());
            let mut previous: Option<(Version, u64)> = None;
            for bundle in list {
                if package_members.iter().any(|m| m.bundle.name == bundle.name) {
                    return Err(BuildError::DuplicateBundle {
                        package: package.to_string(),
                        name: bundle.name.clone(),
                    });
                }

                let version = strip_build(&bundle.version);
                let release = match &previous {
                    Some((prev, prev_release)) if *prev == version => prev_release + 1,
                    _ => 0,
                };
                previous = Some((version.clone(), release));

                let node = Node::new(package, version, release, bundle.reference.clone());
                let tags = extra_tags
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .chain([(keys::BUNDLE.to_string(), bundle.name.clone())]);
                let digest = self.graph.add_node(node, tags)?;
                summary.nodes += 1;
                package_members.push(Member { digest, bundle });
            }
            members.insert(package, package_members);
        }

        for channel in channels {
            let empty = Vec::new();
            let package_members = members.get(channel.package.as_str()).unwrap_or(&empty);
            let find = |name: &str| package_members.iter().find(|m| m.bundle.name == name);

            let edge_tags: Vec<(String, String)> = extra_tags
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .chain([(keys::CHANNEL.to_string(), channel.name.clone())])
                .collect();

            for entry in &channel.entries {
                let target = find(entry.name.as_str()).ok_or_else(|| BuildError::UnknownEntry {
                    package: channel.package.clone(),
                    channel: channel.name.clone(),
                    entry: entry.name.clone(),
                })?;
                self.graph.add_tag(&target.digest, keys::CHANNEL, channel.name.clone())?;

                for source in entry.replaces.iter().chain(entry.skips.iter()) {
                    match find(source.as_str()) {
                        Some(from) => {
                            self.graph
                                .add_edge(Edge::new(from.digest.clone(), target.digest.clone()), edge_tags.clone())?;
                            summary.edges += 1;
                        }
                        None => {
                            summary.dangling_references += 1;
                            tracing::warn!(
                                package = %channel.package,
                                channel = %channel.name,
                                entry = %entry.name,
                                missing = %source,
                                "upgrade source not in batch, skipping edge"
                            );
                        }
                    }
                }

                let Some(text) = &entry.skip_range else {
                    continue;
                };
                let range = match VersionRange::parse(text) {
                    Ok(range) => range,
                    Err(error) => {
                        summary.invalid_ranges += 1;
                        tracing::warn!(
                            package = %channel.package,
                            channel = %channel.name,
                            entry = %entry.name,
                            skip_range = %text,
                            %error,
                            "invalid skipRange, ignoring"
                        );
                        continue;
                    }
                };
                for from in package_members.iter().filter(|m| range.matches(&m.bundle.version)) {
                    self.graph
                        .add_edge(Edge::new(from.digest.clone(), target.digest.clone()), edge_tags.clone())?;
                    summary.edges += 1;
                }
            }
        }

        tracing::info!(
            nodes = summary.nodes,
            edges = summary.edges,
            dangling = summary.dangling_references,
            invalid_ranges = summary.invalid_ranges,
            "added channel set"
        );
        Ok(summary)
    }
}
