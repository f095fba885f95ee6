//! Catalog domain objects and their artifact mappings.
//!
//! ```text
//! Catalog ─┬─ Package ─┬─ icon (opaque blob)
//!          │           ├─ Channel*
//!          │           └─ Bundle* ── files (opaque blobs)
//!          └─ Deprecation* ──subject──▶ Package
//! ```
//!
//! Every type here is both an [`Artifact`] (for pushing) and [`Decodable`]
//! (for pulling). Channels and bundles carry pointer annotations so a
//! package manifest can be scanned without fetching its children.

use base64::Engine as _;
use semver::Version;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

use crate::artifact::{Annotated, Artifact, Blob, DescriptorAnnotated, JsonBlob, RawBlob, Referrer, SubArtifact};
use crate::codec::{BindingError, Bindings, DecodeError, Decodable, OpaqueBlob};
use crate::types::{Annotations, Descriptor};

/// Artifact type of a catalog.
pub const ARTIFACT_TYPE_CATALOG: &str = "application/vnd.bundlegraph.catalog.v1";
/// Artifact type of a package.
pub const ARTIFACT_TYPE_PACKAGE: &str = "application/vnd.bundlegraph.package.v1";
/// Artifact type of a channel.
pub const ARTIFACT_TYPE_CHANNEL: &str = "application/vnd.bundlegraph.channel.v1";
/// Artifact type of a bundle.
pub const ARTIFACT_TYPE_BUNDLE: &str = "application/vnd.bundlegraph.bundle.v1";
/// Artifact type of a deprecation record.
pub const ARTIFACT_TYPE_DEPRECATION: &str = "application/vnd.bundlegraph.deprecation.v1";

/// Config media type of a package.
pub const MEDIA_TYPE_PACKAGE_CONFIG: &str = "application/vnd.bundlegraph.package.config.v1+json";
/// Config media type of a channel.
pub const MEDIA_TYPE_CHANNEL_CONFIG: &str = "application/vnd.bundlegraph.channel.config.v1+json";
/// Config media type of a bundle.
pub const MEDIA_TYPE_BUNDLE_CONFIG: &str = "application/vnd.bundlegraph.bundle.config.v1+json";
/// Config media type of a deprecation record.
pub const MEDIA_TYPE_DEPRECATION_CONFIG: &str = "application/vnd.bundlegraph.deprecation.config.v1+json";

/// Catalog name, on the catalog manifest.
pub const ANNOTATION_CATALOG_NAME: &str = "io.bundlegraph.catalog.name";
/// Package name, on the package manifest.
pub const ANNOTATION_PACKAGE_NAME: &str = "io.bundlegraph.package.name";
/// Channel name, on the pointer to a channel.
pub const ANNOTATION_CHANNEL_NAME: &str = "io.bundlegraph.channel.name";
/// Bundle name, on the pointer to a bundle.
pub const ANNOTATION_BUNDLE_NAME: &str = "io.bundlegraph.bundle.name";
/// Bundle version, on the pointer to a bundle.
pub const ANNOTATION_BUNDLE_VERSION: &str = "io.bundlegraph.bundle.version";
/// Role of a blob layer (`icon`, `file`).
pub const ANNOTATION_ROLE: &str = "io.bundlegraph.role";
/// File name of a bundle file layer.
pub const ANNOTATION_FILENAME: &str = "io.bundlegraph.filename";

fn annotation_map<const N: usize>(pairs: [(&str, String); N]) -> Annotations {
    pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
}

macro_rules! binding_table {
    ($ty:ty, $build:expr) => {{
        static TABLE: OnceLock<Result<Bindings<$ty>, BindingError>> = OnceLock::new();
        TABLE.get_or_init($build).as_ref().map_err(Clone::clone)
    }};
}

// ---------------------------------------------------------------------------
// Icon
// ---------------------------------------------------------------------------

/// A package icon. Stored as raw bytes; base64 in declarative files.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "IconRepr", into = "IconRepr")]
pub struct Icon {
    /// Image media type.
    pub media_type: String,
    /// Image bytes.
    pub data: Vec<u8>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IconRepr {
    media_type: String,
    base64data: String,
}

impl TryFrom<IconRepr> for Icon {
    type Error = base64::DecodeError;

    fn try_from(repr: IconRepr) -> Result<Self, Self::Error> {
        Ok(Self {
            media_type: repr.media_type,
            data: base64::engine::general_purpose::STANDARD.decode(repr.base64data)?,
        })
    }
}

impl From<Icon> for IconRepr {
    fn from(icon: Icon) -> Self {
        Self {
            base64data: base64::engine::general_purpose::STANDARD.encode(&icon.data),
            media_type: icon.media_type,
        }
    }
}

impl OpaqueBlob for Icon {
    fn from_blob(descriptor: &Descriptor, data: Vec<u8>) -> Result<Self, DecodeError> {
        Ok(Self {
            media_type: descriptor.media_type.clone(),
            data,
        })
    }
}

// ---------------------------------------------------------------------------
// Channel
// ---------------------------------------------------------------------------

/// One bundle's position in a channel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelEntry {
    /// Bundle name.
    pub name: String,
    /// Bundle this one upgrades from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replaces: Option<String>,
    /// Bundles this one may upgrade from directly.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skips: Vec<String>,
    /// Version range of bundles this one may upgrade from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_range: Option<String>,
}

impl ChannelEntry {
    /// Entry with no upgrade edges.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

/// A named upgrade sequence within a package.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    /// Owning package.
    pub package: String,
    /// Channel name.
    pub name: String,
    /// Entries, in declared order.
    #[serde(default)]
    pub entries: Vec<ChannelEntry>,
}

impl DescriptorAnnotated for Channel {
    fn descriptor_annotations(&self) -> Annotations {
        annotation_map([(ANNOTATION_CHANNEL_NAME, self.name.clone())])
    }
}

impl Artifact for Channel {
    fn artifact_type(&self) -> String {
        ARTIFACT_TYPE_CHANNEL.to_string()
    }

    fn config(&self) -> Option<Box<dyn Blob + '_>> {
        Some(Box::new(JsonBlob::new(MEDIA_TYPE_CHANNEL_CONFIG, self)))
    }

    fn blobs(&self) -> Vec<Box<dyn Blob + '_>> {
        Vec::new()
    }

    fn sub_artifacts(&self) -> Vec<SubArtifact<'_>> {
        Vec::new()
    }

    fn as_descriptor_annotated(&self) -> Option<&dyn DescriptorAnnotated> {
        Some(self)
    }
}

impl Decodable for Channel {
    fn bindings() -> Result<&'static Bindings<Self>, BindingError> {
        binding_table!(Channel, || {
            Bindings::<Channel>::builder()
                .artifact_type(ARTIFACT_TYPE_CHANNEL)
                .config("channel", |c| c)
                .build()
        })
    }
}

// ---------------------------------------------------------------------------
// Bundle
// ---------------------------------------------------------------------------

/// A file shipped inside a bundle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BundleFile {
    /// File name.
    pub name: String,
    /// Media type of the content.
    pub media_type: String,
    /// File content.
    pub data: Vec<u8>,
}

impl OpaqueBlob for BundleFile {
    fn from_blob(descriptor: &Descriptor, data: Vec<u8>) -> Result<Self, DecodeError> {
        let name = descriptor
            .annotation(ANNOTATION_FILENAME)
            .ok_or_else(|| DecodeError::InvalidBlob {
                digest: descriptor.digest.clone(),
                reason: format!("missing {ANNOTATION_FILENAME} annotation"),
            })?;
        Ok(Self {
            name: name.to_string(),
            media_type: descriptor.media_type.clone(),
            data,
        })
    }
}

/// One installable build of a package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bundle {
    /// Owning package.
    pub package: String,
    /// Bundle name, unique within the package.
    pub name: String,
    /// Version, possibly with build metadata.
    pub version: Version,
    /// Locator of the bundle content.
    #[serde(default)]
    pub reference: String,
    /// Files stored as blob layers.
    #[serde(skip)]
    pub files: Vec<BundleFile>,
}

impl Default for Bundle {
    fn default() -> Self {
        Self {
            package: String::new(),
            name: String::new(),
            version: Version::new(0, 0, 0),
            reference: String::new(),
            files: Vec::new(),
        }
    }
}

impl Bundle {
    /// Bundle without files.
    pub fn new(package: impl Into<String>, name: impl Into<String>, version: Version, reference: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            name: name.into(),
            version,
            reference: reference.into(),
            files: Vec::new(),
        }
    }
}

impl DescriptorAnnotated for Bundle {
    fn descriptor_annotations(&self) -> Annotations {
        annotation_map([
            (ANNOTATION_BUNDLE_NAME, self.name.clone()),
            (ANNOTATION_BUNDLE_VERSION, self.version.to_string()),
        ])
    }
}

impl Artifact for Bundle {
    fn artifact_type(&self) -> String {
        ARTIFACT_TYPE_BUNDLE.to_string()
    }

    fn config(&self) -> Option<Box<dyn Blob + '_>> {
        Some(Box::new(JsonBlob::new(MEDIA_TYPE_BUNDLE_CONFIG, self)))
    }

    fn blobs(&self) -> Vec<Box<dyn Blob + '_>> {
        self.files
            .iter()
            .map(|file| {
                let blob = RawBlob::new(file.media_type.clone(), &file.data).with_annotations(annotation_map([
                    (ANNOTATION_ROLE, "file".to_string()),
                    (ANNOTATION_FILENAME, file.name.clone()),
                ]));
                Box::new(blob) as Box<dyn Blob + '_>
            })
            .collect()
    }

    fn sub_artifacts(&self) -> Vec<SubArtifact<'_>> {
        Vec::new()
    }

    fn as_descriptor_annotated(&self) -> Option<&dyn DescriptorAnnotated> {
        Some(self)
    }
}

impl Decodable for Bundle {
    fn bindings() -> Result<&'static Bindings<Self>, BindingError> {
        binding_table!(Bundle, || {
            Bindings::<Bundle>::builder()
                .artifact_type(ARTIFACT_TYPE_BUNDLE)
                .config("bundle", |b| b)
                .opaque_blobs("files", "selector=io.bundlegraph.role=file", |b| &mut b.files)
                .build()
        })
    }
}

// ---------------------------------------------------------------------------
// Package
// ---------------------------------------------------------------------------

/// Package-level metadata, stored as the package config.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageMetadata {
    /// Package name.
    pub name: String,
    /// Human-readable name.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub display_name: String,
    /// Description.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// Channel used when none is requested.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub default_channel: String,
}

/// A package with its channels and bundles.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Package {
    /// Metadata.
    pub metadata: PackageMetadata,
    /// Optional icon.
    pub icon: Option<Icon>,
    /// Channels.
    pub channels: Vec<Channel>,
    /// Bundles.
    pub bundles: Vec<Bundle>,
}

impl Package {
    /// Package name.
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Look up a bundle by name.
    pub fn bundle(&self, name: &str) -> Option<&Bundle> {
        self.bundles.iter().find(|b| b.name == name)
    }

    /// Look up a channel by name.
    pub fn channel(&self, name: &str) -> Option<&Channel> {
        self.channels.iter().find(|c| c.name == name)
    }
}

impl Annotated for Package {
    fn annotations(&self) -> Annotations {
        annotation_map([(ANNOTATION_PACKAGE_NAME, self.metadata.name.clone())])
    }
}

impl Artifact for Package {
    fn artifact_type(&self) -> String {
        ARTIFACT_TYPE_PACKAGE.to_string()
    }

    fn config(&self) -> Option<Box<dyn Blob + '_>> {
        Some(Box::new(JsonBlob::new(MEDIA_TYPE_PACKAGE_CONFIG, &self.metadata)))
    }

    fn blobs(&self) -> Vec<Box<dyn Blob + '_>> {
        self.icon
            .iter()
            .map(|icon| {
                let blob = RawBlob::new(icon.media_type.clone(), &icon.data)
                    .with_annotations(annotation_map([(ANNOTATION_ROLE, "icon".to_string())]));
                Box::new(blob) as Box<dyn Blob + '_>
            })
            .collect()
    }

    fn sub_artifacts(&self) -> Vec<SubArtifact<'_>> {
        self.channels
            .iter()
            .map(SubArtifact::deep)
            .chain(self.bundles.iter().map(SubArtifact::deep))
            .collect()
    }

    fn as_annotated(&self) -> Option<&dyn Annotated> {
        Some(self)
    }
}

impl Decodable for Package {
    fn bindings() -> Result<&'static Bindings<Self>, BindingError> {
        binding_table!(Package, || {
            Bindings::<Package>::builder()
                .artifact_type(ARTIFACT_TYPE_PACKAGE)
                .config("metadata", |p| &mut p.metadata)
                .opaque_blob("icon", "selector=io.bundlegraph.role=icon", |p| &mut p.icon)
                .sub_artifacts("channels", "artifactType=application/vnd.bundlegraph.channel.v1", |p| {
                    &mut p.channels
                })
                .sub_artifacts("bundles", "artifactType=application/vnd.bundlegraph.bundle.v1", |p| {
                    &mut p.bundles
                })
                .build()
        })
    }
}

// ---------------------------------------------------------------------------
// Deprecation
// ---------------------------------------------------------------------------

/// What a deprecation entry applies to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeprecationScope {
    /// The whole package.
    #[default]
    Package,
    /// One channel.
    Channel,
    /// One bundle.
    Bundle,
}

/// One deprecation notice.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeprecationEntry {
    /// What is deprecated.
    pub scope: DeprecationScope,
    /// Channel or bundle name; empty for the package scope.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    /// Notice shown to users.
    pub message: String,
}

/// Deprecation notices for a package, stored as a referrer of it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deprecation {
    /// Package the notices apply to.
    pub package: String,
    /// Notices.
    #[serde(default)]
    pub entries: Vec<DeprecationEntry>,
    /// The deprecated package, linked as the manifest subject.
    #[serde(skip)]
    pub subject: Option<Box<Package>>,
}

impl Referrer for Deprecation {
    fn subject(&self) -> Box<dyn Artifact + '_> {
        match &self.subject {
            Some(package) => Box::new(package.as_ref()),
            None => Box::new(Package::default()),
        }
    }
}

impl Artifact for Deprecation {
    fn artifact_type(&self) -> String {
        ARTIFACT_TYPE_DEPRECATION.to_string()
    }

    fn config(&self) -> Option<Box<dyn Blob + '_>> {
        Some(Box::new(JsonBlob::new(MEDIA_TYPE_DEPRECATION_CONFIG, self)))
    }

    fn blobs(&self) -> Vec<Box<dyn Blob + '_>> {
        Vec::new()
    }

    fn sub_artifacts(&self) -> Vec<SubArtifact<'_>> {
        Vec::new()
    }

    fn as_referrer(&self) -> Option<&dyn Referrer> {
        self.subject.as_ref().map(|_| self as &dyn Referrer)
    }
}

impl Decodable for Deprecation {
    fn bindings() -> Result<&'static Bindings<Self>, BindingError> {
        binding_table!(Deprecation, || {
            Bindings::<Deprecation>::builder()
                .artifact_type(ARTIFACT_TYPE_DEPRECATION)
                .config("deprecation", |d| d)
                .subject("subject", "artifactType=application/vnd.bundlegraph.package.v1", |d| &mut d.subject)
                .build()
        })
    }
}

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

/// Root object: every package plus deprecation records.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Catalog {
    /// Catalog name.
    pub name: String,
    /// Packages.
    pub packages: Vec<Package>,
    /// Deprecation records.
    pub deprecations: Vec<Deprecation>,
}

impl Catalog {
    /// Look up a package by name.
    pub fn package(&self, name: &str) -> Option<&Package> {
        self.packages.iter().find(|p| p.name() == name)
    }

    /// Every bundle of every package.
    pub fn bundles(&self) -> impl Iterator<Item = &Bundle> {
        self.packages.iter().flat_map(|p| p.bundles.iter())
    }

    /// Every channel of every package.
    pub fn channels(&self) -> impl Iterator<Item = &Channel> {
        self.packages.iter().flat_map(|p| p.channels.iter())
    }
}

impl Annotated for Catalog {
    fn annotations(&self) -> Annotations {
        annotation_map([(ANNOTATION_CATALOG_NAME, self.name.clone())])
    }
}

impl Artifact for Catalog {
    fn artifact_type(&self) -> String {
        ARTIFACT_TYPE_CATALOG.to_string()
    }

    fn config(&self) -> Option<Box<dyn Blob + '_>> {
        None
    }

    fn blobs(&self) -> Vec<Box<dyn Blob + '_>> {
        Vec::new()
    }

    fn sub_artifacts(&self) -> Vec<SubArtifact<'_>> {
        self.packages
            .iter()
            .map(SubArtifact::deep)
            .chain(self.deprecations.iter().map(SubArtifact::deep))
            .collect()
    }

    fn as_annotated(&self) -> Option<&dyn Annotated> {
        Some(self)
    }
}

impl Decodable for Catalog {
    fn bindings() -> Result<&'static Bindings<Self>, BindingError> {
        binding_table!(Catalog, || {
            Bindings::<Catalog>::builder()
                .artifact_type(ARTIFACT_TYPE_CATALOG)
                .annotation("name", ANNOTATION_CATALOG_NAME, |c| &mut c.name)
                .sub_artifacts("packages", "artifactType=application/vnd.bundlegraph.package.v1", |c| {
                    &mut c.packages
                })
                .sub_artifacts(
                    "deprecations",
                    "artifactType=application/vnd.bundlegraph.deprecation.v1",
                    |c| &mut c.deprecations,
                )
                .build()
        })
    }
}
