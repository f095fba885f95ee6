//! Artifact codec: typed objects to manifest trees and back.
//!
//! - [`encode`] pushes an [`crate::artifact::Artifact`] tree to a blob store
//! - [`decode`] rebuilds a [`binding::Decodable`] value from a root descriptor
//! - [`binding`] holds the declarative field-binding tables and matchers
//! - [`parallel`] is the order-preserving fan-out used by the encoder

pub mod binding;
pub mod decode;
pub mod encode;
pub mod label;
pub mod parallel;

pub use binding::{
    is_valid_media_type, Binding, BindingError, Bindings, BindingsBuilder, Cardinality, Decodable, Matcher,
    MatcherError, OpaqueBlob, Role,
};
pub use decode::{decode, decode_reference, fetch_manifest, DecodeError};
pub use encode::{push_and_tag, push_artifact, push_blob, push_shallow_artifact, PushError};
pub use label::{LabelSelector, LabelSelectorError};
pub use parallel::par_map_ordered;
