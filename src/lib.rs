//! # bundle-graph
//!
//! Content-addressed catalog artifacts and queryable upgrade graphs.
//!
//! Two subsystems share one primitive, a digest-keyed descriptor graph:
//!
//! 1. **Artifact codec**: typed objects are encoded into OCI-shaped
//!    manifests and blobs in a content-addressed store, and decoded back
//!    through declarative field-binding tables.
//! 2. **Upgrade graph**: bundles become versioned nodes, channel data
//!    becomes upgrade edges, and a compiled selector expression prunes the
//!    graph while keeping every surviving edge's endpoints resolvable.
//!
//! ## Architecture
//!
//! ```text
//! DeclarativeSource → Catalog ──push_artifact──→ BlobStore ──decode──→ Catalog
//!                        │
//!                        └→ ChannelGraphBuilder → GraphIndex → Selector → snapshot / diagram
//! ```
//!
//! ## Determinism Guarantees
//!
//! - Same object → same manifest bytes → same digest, on any store
//! - Same node identity `(name, version, release)` → same node digest
//! - Snapshots are canonical JSON (RFC 8785)

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod artifact;
pub mod canonical;
pub mod catalog;
pub mod codec;
pub mod config;
pub mod graph;
pub mod pipeline;
pub mod source;
pub mod store;
pub mod types;

pub(crate) mod atomic;

// Re-exports
pub use artifact::{Annotated, Artifact, Blob, DescriptorAnnotated, Referrer, ShallowArtifact, ShallowReferrer, SubArtifact};
pub use canonical::{canonical_digest, to_canonical_bytes, CanonicalError};
pub use catalog::{Bundle, BundleFile, Catalog, Channel, ChannelEntry, Deprecation, Icon, Package, PackageMetadata};
pub use codec::{decode, decode_reference, push_and_tag, push_artifact, Bindings, Decodable, DecodeError, PushError};
pub use config::{BuildConfig, ConfigError};
pub use graph::{
    to_diagram, to_json, BuildError, ChannelGraphBuilder, CompileError, Graph, GraphError, GraphIndex, PruneSummary,
    Selector, VersionRange,
};
pub use pipeline::{run, PipelineError, PrunedSnapshot, RunSummary};
pub use source::{DeclarativeConfig, DeclarativeSource, DirSource, SourceError, SourceRegistry};
pub use store::{BlobStore, CacheConfig, CachedBlobStore, InMemoryBlobStore, LayoutStore, StoreError, Tagger};
pub use types::{Descriptor, Digest, Edge, Manifest, Node, Tag, TagScope};
