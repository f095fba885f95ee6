//! Core types shared by the artifact codec and the upgrade graph.

pub mod digest;
pub mod descriptor;
pub mod node;
pub mod edge;
pub mod tag;

pub use digest::{Digest, DigestError};
pub use descriptor::{
    Annotations, Descriptor, Manifest, EMPTY_JSON, MANIFEST_SCHEMA_VERSION,
    MEDIA_TYPE_EMPTY_JSON, MEDIA_TYPE_IMAGE_MANIFEST,
};
pub use node::Node;
pub use edge::Edge;
pub use tag::{Tag, TagScope};
