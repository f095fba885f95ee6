//! Declarative field-binding tables for the decoder.
//!
//! A decodable type describes, once, how each of its fields is filled from a
//! stored manifest: which role the field plays (config, annotation, blob,
//! sub-artifact, subject), whether it holds one value or many, and a matcher
//! picking the descriptors that feed it. Tables are built with
//! [`Bindings::builder`]; every definition error (bad matcher, duplicate
//! field, second config binding) surfaces from [`BindingsBuilder::build`],
//! never at decode time.
//!
//! Matcher grammar: `;`-separated `key=value` pairs with keys `mediaType`,
//! `artifactType` and `selector`. An empty matcher matches every descriptor.
//!
//! ```text
//! mediaType=image/png;selector=io.bundlegraph.role in (icon)
//! ```

use regex_lite::Regex;
use serde::de::DeserializeOwned;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::OnceLock;

use crate::store::BlobStore;
use crate::types::{Descriptor, Manifest};

use super::decode::{decode, DecodeError};
use super::label::{LabelSelector, LabelSelectorError};

/// Error in a matcher string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MatcherError {
    /// Key outside `mediaType`, `artifactType`, `selector`.
    #[error("unknown matcher key {0:?}")]
    UnknownKey(String),
    /// Key given twice.
    #[error("duplicate matcher key {0:?}")]
    DuplicateKey(String),
    /// Value is not a bare `type/subtype`.
    #[error("invalid media type for {key}: {value:?}")]
    InvalidMediaType {
        /// `mediaType` or `artifactType`.
        key: String,
        /// The rejected value.
        value: String,
    },
    /// A clause without `=`.
    #[error("malformed matcher clause {0:?}")]
    Malformed(String),
    /// The `selector` value did not parse.
    #[error(transparent)]
    Selector(#[from] LabelSelectorError),
}

/// Error in a binding table definition.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BindingError {
    /// A field's matcher is invalid.
    #[error("field {field}: {source}")]
    Matcher {
        /// Field name.
        field: &'static str,
        /// What was wrong.
        #[source]
        source: MatcherError,
    },
    /// Two bindings share a field name.
    #[error("field {0} is bound twice")]
    DuplicateField(&'static str),
    /// More than one config binding.
    #[error("fields {first} and {second} both bind the config")]
    MultipleConfig {
        /// First config field.
        first: &'static str,
        /// Second config field.
        second: &'static str,
    },
    /// More than one subject binding.
    #[error("fields {first} and {second} both bind the subject")]
    MultipleSubject {
        /// First subject field.
        first: &'static str,
        /// Second subject field.
        second: &'static str,
    },
    /// The expected artifact type is not a valid media type.
    #[error("invalid expected artifact type {0:?}")]
    InvalidArtifactType(String),
}

fn media_type_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"^[A-Za-z0-9][A-Za-z0-9!#$&^_.+-]{0,126}/[A-Za-z0-9][A-Za-z0-9!#$&^_.+-]{0,126}$",
        )
        .expect("static pattern compiles")
    })
}

/// Whether `value` is a `type/subtype` media type without parameters.
pub fn is_valid_media_type(value: &str) -> bool {
    media_type_pattern().is_match(value)
}

/// Selects descriptors by media type, artifact type and annotations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Matcher {
    media_type: Option<String>,
    artifact_type: Option<String>,
    selector: Option<LabelSelector>,
    source: String,
}

impl Matcher {
    /// A matcher accepting every descriptor.
    pub fn any() -> Self {
        Self::default()
    }

    /// Parse a matcher string.
    pub fn parse(source: &str) -> Result<Self, MatcherError> {
        let mut matcher = Self {
            source: source.to_string(),
            ..Self::default()
        };
        let mut seen = BTreeSet::new();

        for clause in source.split(';').map(str::trim).filter(|c| !c.is_empty()) {
            let (key, value) = clause
                .split_once('=')
                .ok_or_else(|| MatcherError::Malformed(clause.to_string()))?;
            let (key, value) = (key.trim(), value.trim());
            if !seen.insert(key) {
                return Err(MatcherError::DuplicateKey(key.to_string()));
            }
            match key {
                "mediaType" | "artifactType" => {
                    if !is_valid_media_type(value) {
                        return Err(MatcherError::InvalidMediaType {
                            key: key.to_string(),
                            value: value.to_string(),
                        });
                    }
                    if key == "mediaType" {
                        matcher.media_type = Some(value.to_string());
                    } else {
                        matcher.artifact_type = Some(value.to_string());
                    }
                }
                "selector" => matcher.selector = Some(LabelSelector::parse(value)?),
                other => return Err(MatcherError::UnknownKey(other.to_string())),
            }
        }
        Ok(matcher)
    }

    /// Whether `descriptor` satisfies every clause.
    pub fn matches(&self, descriptor: &Descriptor) -> bool {
        if let Some(media_type) = &self.media_type {
            if descriptor.media_type != *media_type {
                return false;
            }
        }
        if let Some(artifact_type) = &self.artifact_type {
            if descriptor.artifact_type.as_deref() != Some(artifact_type.as_str()) {
                return false;
            }
        }
        match &self.selector {
            Some(selector) => selector.matches(descriptor.annotations.as_ref()),
            None => true,
        }
    }
}

impl fmt::Display for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Role a field plays. The declaration order is the processing order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Role {
    /// The manifest's config blob.
    Config,
    /// A manifest annotation.
    Annotation,
    /// Matching blob layers.
    Blob,
    /// Matching manifest layers, decoded recursively.
    SubArtifact,
    /// The manifest's subject, decoded recursively.
    Subject,
}

/// Whether a field holds one value or a sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    /// Zero or one match is legal.
    One,
    /// Every match is appended.
    Many,
}

/// What a binding's apply function sees.
pub struct Slot<'a> {
    /// Store to fetch content from.
    pub store: &'a dyn BlobStore,
    /// Manifest being decoded.
    pub manifest: &'a Manifest,
    /// Descriptors selected by the binding's matcher.
    pub matches: Vec<&'a Descriptor>,
}

type ApplyFn<T> = Box<dyn Fn(&mut T, &Slot<'_>) -> Result<(), DecodeError> + Send + Sync>;

/// One row of a binding table.
pub struct Binding<T> {
    field: &'static str,
    role: Role,
    cardinality: Cardinality,
    matcher: Matcher,
    apply: ApplyFn<T>,
}

impl<T> Binding<T> {
    /// Field name.
    pub fn field(&self) -> &'static str {
        self.field
    }

    /// Role.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Cardinality.
    pub fn cardinality(&self) -> Cardinality {
        self.cardinality
    }

    /// Matcher.
    pub fn matcher(&self) -> &Matcher {
        &self.matcher
    }

    pub(crate) fn apply(&self, target: &mut T, slot: &Slot<'_>) -> Result<(), DecodeError> {
        (self.apply)(target, slot)
    }
}

impl<T> fmt::Debug for Binding<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Binding")
            .field("field", &self.field)
            .field("role", &self.role)
            .field("cardinality", &self.cardinality)
            .field("matcher", &self.matcher)
            .finish()
    }
}

/// A validated binding table, sorted by `(role, field)`.
#[derive(Debug)]
pub struct Bindings<T> {
    artifact_type: Option<String>,
    bindings: Vec<Binding<T>>,
}

impl<T: 'static> Bindings<T> {
    /// Start a table.
    pub fn builder() -> BindingsBuilder<T> {
        BindingsBuilder {
            artifact_type: None,
            bindings: Vec::new(),
            error: None,
        }
    }

    /// Artifact type the manifest must carry, if any.
    pub fn artifact_type(&self) -> Option<&str> {
        self.artifact_type.as_deref()
    }

    /// Bindings in processing order.
    pub fn iter(&self) -> impl Iterator<Item = &Binding<T>> {
        self.bindings.iter()
    }
}

/// A type that can be reconstructed from a stored manifest.
///
/// Implementations build their table once, typically in a
/// `static OnceLock<Result<Bindings<Self>, BindingError>>`.
pub trait Decodable: Default + Sized + Send + 'static {
    /// The type's binding table.
    fn bindings() -> Result<&'static Bindings<Self>, BindingError>;
}

/// A blob type that keeps raw bytes instead of being parsed as JSON.
pub trait OpaqueBlob: Sized {
    /// Build a value from the blob's descriptor and bytes.
    fn from_blob(descriptor: &Descriptor, data: Vec<u8>) -> Result<Self, DecodeError>;
}

fn fetch_json<V: DeserializeOwned>(store: &dyn BlobStore, descriptor: &Descriptor) -> Result<V, DecodeError> {
    let data = store.fetch(descriptor)?;
    serde_json::from_slice(&data).map_err(|source| DecodeError::Malformed {
        digest: descriptor.digest.clone(),
        source,
    })
}

fn fetch_opaque<V: OpaqueBlob>(store: &dyn BlobStore, descriptor: &Descriptor) -> Result<V, DecodeError> {
    let data = store.fetch(descriptor)?;
    V::from_blob(descriptor, data)
}

/// Collects bindings; the first definition error is reported by `build`.
pub struct BindingsBuilder<T> {
    artifact_type: Option<String>,
    bindings: Vec<Binding<T>>,
    error: Option<BindingError>,
}

impl<T: 'static> BindingsBuilder<T> {
    /// Require the manifest's `artifactType` to equal `artifact_type`.
    pub fn artifact_type(mut self, artifact_type: &str) -> Self {
        if !is_valid_media_type(artifact_type) && self.error.is_none() {
            self.error = Some(BindingError::InvalidArtifactType(artifact_type.to_string()));
        }
        self.artifact_type = Some(artifact_type.to_string());
        self
    }

    fn push(
        mut self,
        field: &'static str,
        role: Role,
        cardinality: Cardinality,
        matcher: &str,
        apply: ApplyFn<T>,
    ) -> Self {
        match Matcher::parse(matcher) {
            Ok(matcher) => self.bindings.push(Binding {
                field,
                role,
                cardinality,
                matcher,
                apply,
            }),
            Err(source) => {
                if self.error.is_none() {
                    self.error = Some(BindingError::Matcher { field, source });
                }
            }
        }
        self
    }

    /// Unmarshal the config blob into a field.
    pub fn config<C>(self, field: &'static str, slot: fn(&mut T) -> &mut C) -> Self
    where
        C: DeserializeOwned + 'static,
    {
        self.push(
            field,
            Role::Config,
            Cardinality::One,
            "",
            Box::new(move |target, s| {
                if let Some(descriptor) = s.matches.first() {
                    *slot(target) = fetch_json(s.store, descriptor)?;
                }
                Ok(())
            }),
        )
    }

    /// Copy a manifest annotation into a field; absent keys yield `""`.
    pub fn annotation(self, field: &'static str, key: &'static str, slot: fn(&mut T) -> &mut String) -> Self {
        self.push(
            field,
            Role::Annotation,
            Cardinality::One,
            "",
            Box::new(move |target, s| {
                *slot(target) = s.manifest.annotation(key).unwrap_or_default().to_string();
                Ok(())
            }),
        )
    }

    /// Unmarshal at most one matching blob layer.
    pub fn blob<B>(self, field: &'static str, matcher: &str, slot: fn(&mut T) -> &mut Option<B>) -> Self
    where
        B: DeserializeOwned + 'static,
    {
        self.push(
            field,
            Role::Blob,
            Cardinality::One,
            matcher,
            Box::new(move |target, s| {
                if let Some(descriptor) = s.matches.first() {
                    *slot(target) = Some(fetch_json(s.store, descriptor)?);
                }
                Ok(())
            }),
        )
    }

    /// Unmarshal every matching blob layer, in layer order.
    pub fn blobs<B>(self, field: &'static str, matcher: &str, slot: fn(&mut T) -> &mut Vec<B>) -> Self
    where
        B: DeserializeOwned + 'static,
    {
        self.push(
            field,
            Role::Blob,
            Cardinality::Many,
            matcher,
            Box::new(move |target, s| {
                for descriptor in &s.matches {
                    let value = fetch_json(s.store, descriptor)?;
                    slot(target).push(value);
                }
                Ok(())
            }),
        )
    }

    /// Keep at most one matching blob layer as raw bytes.
    pub fn opaque_blob<B>(self, field: &'static str, matcher: &str, slot: fn(&mut T) -> &mut Option<B>) -> Self
    where
        B: OpaqueBlob + 'static,
    {
        self.push(
            field,
            Role::Blob,
            Cardinality::One,
            matcher,
            Box::new(move |target, s| {
                if let Some(descriptor) = s.matches.first() {
                    *slot(target) = Some(fetch_opaque(s.store, descriptor)?);
                }
                Ok(())
            }),
        )
    }

    /// Keep every matching blob layer as raw bytes.
    pub fn opaque_blobs<B>(self, field: &'static str, matcher: &str, slot: fn(&mut T) -> &mut Vec<B>) -> Self
    where
        B: OpaqueBlob + 'static,
    {
        self.push(
            field,
            Role::Blob,
            Cardinality::Many,
            matcher,
            Box::new(move |target, s| {
                for descriptor in &s.matches {
                    let value = fetch_opaque(s.store, descriptor)?;
                    slot(target).push(value);
                }
                Ok(())
            }),
        )
    }

    /// Decode at most one matching manifest layer.
    pub fn sub_artifact<A>(self, field: &'static str, matcher: &str, slot: fn(&mut T) -> &mut Option<A>) -> Self
    where
        A: Decodable,
    {
        self.push(
            field,
            Role::SubArtifact,
            Cardinality::One,
            matcher,
            Box::new(move |target, s| {
                if let Some(descriptor) = s.matches.first() {
                    *slot(target) = Some(decode::<A>(s.store, descriptor)?);
                }
                Ok(())
            }),
        )
    }

    /// Decode every matching manifest layer, in layer order.
    pub fn sub_artifacts<A>(self, field: &'static str, matcher: &str, slot: fn(&mut T) -> &mut Vec<A>) -> Self
    where
        A: Decodable,
    {
        self.push(
            field,
            Role::SubArtifact,
            Cardinality::Many,
            matcher,
            Box::new(move |target, s| {
                for descriptor in &s.matches {
                    let value = decode::<A>(s.store, descriptor)?;
                    slot(target).push(value);
                }
                Ok(())
            }),
        )
    }

    /// Decode the subject when it satisfies `matcher`.
    pub fn subject<A>(self, field: &'static str, matcher: &str, slot: fn(&mut T) -> &mut Option<Box<A>>) -> Self
    where
        A: Decodable,
    {
        self.push(
            field,
            Role::Subject,
            Cardinality::One,
            matcher,
            Box::new(move |target, s| {
                if let Some(descriptor) = s.matches.first() {
                    *slot(target) = Some(Box::new(decode::<A>(s.store, descriptor)?));
                }
                Ok(())
            }),
        )
    }

    /// Validate and sort the table.
    pub fn build(self) -> Result<Bindings<T>, BindingError> {
        if let Some(error) = self.error {
            return Err(error);
        }

        let mut bindings = self.bindings;
        bindings.sort_by(|a, b| (a.role, a.field).cmp(&(b.role, b.field)));

        let mut fields = BTreeSet::new();
        for binding in &bindings {
            if !fields.insert(binding.field) {
                return Err(BindingError::DuplicateField(binding.field));
            }
        }

        let single = |role: Role| {
            let mut it = bindings.iter().filter(move |b| b.role == role).map(|b| b.field);
            match (it.next(), it.next()) {
                (Some(first), Some(second)) => Some((first, second)),
                _ => None,
            }
        };
        if let Some((first, second)) = single(Role::Config) {
            return Err(BindingError::MultipleConfig { first, second });
        }
        if let Some((first, second)) = single(Role::Subject) {
            return Err(BindingError::MultipleSubject { first, second });
        }

        Ok(Bindings {
            artifact_type: self.artifact_type,
            bindings,
        })
    }
}
