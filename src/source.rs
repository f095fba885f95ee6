//! Declarative catalog sources.
//!
//! A source produces flat package, channel, bundle and deprecation records.
//! [`DeclarativeConfig::into_catalog`] assembles them into a typed
//! [`Catalog`]. Sources are opened by locator (`kind:location`) through a
//! [`SourceRegistry`] built at start-up.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::catalog::{Bundle, Catalog, Channel, Deprecation, Icon, Package, PackageMetadata};

/// Schema tag of a package record.
pub const SCHEMA_PACKAGE: &str = "bundlegraph.package";
/// Schema tag of a channel record.
pub const SCHEMA_CHANNEL: &str = "bundlegraph.channel";
/// Schema tag of a bundle record.
pub const SCHEMA_BUNDLE: &str = "bundlegraph.bundle";
/// Schema tag of a deprecation record.
pub const SCHEMA_DEPRECATION: &str = "bundlegraph.deprecation";

/// Errors from loading declarative records.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// A file could not be read.
    #[error("reading {path}: {source}")]
    Io {
        /// File path.
        path: PathBuf,
        /// Underlying failure.
        #[source]
        source: std::io::Error,
    },
    /// Directory traversal failed.
    #[error("walking source directory: {0}")]
    Walk(#[from] walkdir::Error),
    /// A record did not parse.
    #[error("parsing {path}: {source}")]
    Parse {
        /// File path.
        path: PathBuf,
        /// Parse failure.
        #[source]
        source: serde_json::Error,
    },
    /// A record names a package that was never declared.
    #[error("{kind} {name:?} names unknown package {package:?}")]
    UnknownPackage {
        /// Record kind.
        kind: &'static str,
        /// Record name.
        name: String,
        /// Package it names.
        package: String,
    },
    /// Two package records share a name.
    #[error("package {0:?} declared twice")]
    DuplicatePackage(String),
    /// No loader is registered for the locator's kind.
    #[error("unknown source kind {0:?}")]
    UnknownKind(String),
    /// A locator without `kind:`.
    #[error("invalid source locator {0:?}, expected kind:location")]
    InvalidLocator(String),
}

/// A package record: metadata plus an optional inline icon.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageRecord {
    /// Package metadata.
    #[serde(flatten)]
    pub metadata: PackageMetadata,
    /// Icon, base64 encoded in files.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<Icon>,
}

/// Flat declarative records, as read from a source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeclarativeConfig {
    /// Package records.
    pub packages: Vec<PackageRecord>,
    /// Channel records.
    pub channels: Vec<Channel>,
    /// Bundle records.
    pub bundles: Vec<Bundle>,
    /// Deprecation records.
    pub deprecations: Vec<Deprecation>,
}

impl DeclarativeConfig {
    /// Whether no records were loaded.
    pub fn is_empty(&self) -> bool {
        self.packages.is_empty() && self.channels.is_empty() && self.bundles.is_empty() && self.deprecations.is_empty()
    }

    /// Merge another set of records after this one.
    pub fn extend(&mut self, other: DeclarativeConfig) {
        self.packages.extend(other.packages);
        self.channels.extend(other.channels);
        self.bundles.extend(other.bundles);
        self.deprecations.extend(other.deprecations);
    }

    /// Assemble the records into a catalog.
    ///
    /// Channels and bundles are attached to their package in record order.
    /// Each deprecation's subject is set to its fully assembled package.
    pub fn into_catalog(self, name: impl Into<String>) -> Result<Catalog, SourceError> {
        let mut packages: Vec<Package> = Vec::with_capacity(self.packages.len());
        let mut index: BTreeMap<String, usize> = BTreeMap::new();

        for record in self.packages {
            let package_name = record.metadata.name.clone();
            if index.insert(package_name.clone(), packages.len()).is_some() {
                return Err(SourceError::DuplicatePackage(package_name));
            }
            packages.push(Package {
                metadata: record.metadata,
                icon: record.icon,
                ..Package::default()
            });
        }

        for channel in self.channels {
            let slot = index.get(&channel.package).copied().ok_or_else(|| SourceError::UnknownPackage {
                kind: "channel",
                name: channel.name.clone(),
                package: channel.package.clone(),
            })?;
            packages[slot].channels.push(channel);
        }

        for bundle in self.bundles {
            let slot = index.get(&bundle.package).copied().ok_or_else(|| SourceError::UnknownPackage {
                kind: "bundle",
                name: bundle.name.clone(),
                package: bundle.package.clone(),
            })?;
            packages[slot].bundles.push(bundle);
        }

        let deprecations = self
            .deprecations
            .into_iter()
            .map(|mut deprecation| {
                let slot = index
                    .get(&deprecation.package)
                    .copied()
                    .ok_or_else(|| SourceError::UnknownPackage {
                        kind: "deprecation",
                        name: deprecation.package.clone(),
                        package: deprecation.package.clone(),
                    })?;
                deprecation.subject = Some(Box::new(packages[slot].clone()));
                Ok(deprecation)
            })
            .collect::<Result<Vec<_>, SourceError>>()?;

        Ok(Catalog {
            name: name.into(),
            packages,
            deprecations,
        })
    }
}

/// Something that yields declarative records.
pub trait DeclarativeSource {
    /// Read every record.
    fn load(&self) -> Result<DeclarativeConfig, SourceError>;
}

impl DeclarativeSource for DeclarativeConfig {
    fn load(&self) -> Result<DeclarativeConfig, SourceError> {
        Ok(self.clone())
    }
}

/// Reads every `*.json` file under a directory.
///
/// Each file holds a stream of JSON objects, each discriminated by its
/// `schema` field. Objects with an unknown or missing schema are skipped.
#[derive(Debug, Clone)]
pub struct DirSource {
    root: PathBuf,
}

impl DirSource {
    /// Source rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn load_file(path: &Path, config: &mut DeclarativeConfig) -> Result<(), SourceError> {
        let bytes = fs::read(path).map_err(|source| SourceError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let parse_error = |source| SourceError::Parse {
            path: path.to_path_buf(),
            source,
        };

        for value in serde_json::Deserializer::from_slice(&bytes).into_iter::<serde_json::Value>() {
            let value = value.map_err(parse_error)?;
            let schema = value.get("schema").and_then(|s| s.as_str()).unwrap_or_default().to_string();
            match schema.as_str() {
                SCHEMA_PACKAGE => config.packages.push(serde_json::from_value(value).map_err(parse_error)?),
                SCHEMA_CHANNEL => config.channels.push(serde_json::from_value(value).map_err(parse_error)?),
                SCHEMA_BUNDLE => config.bundles.push(serde_json::from_value(value).map_err(parse_error)?),
                SCHEMA_DEPRECATION => config
                    .deprecations
                    .push(serde_json::from_value(value).map_err(parse_error)?),
                other => {
                    tracing::warn!(path = %path.display(), schema = other, "skipping record with unknown schema");
                }
            }
        }
        Ok(())
    }
}

impl DeclarativeSource for DirSource {
    fn load(&self) -> Result<DeclarativeConfig, SourceError> {
        let mut config = DeclarativeConfig::default();
        let mut files = 0usize;

        for entry in WalkDir::new(&self.root)
            .follow_links(false)
            .sort_by(|a, b| a.file_name().cmp(b.file_name()))
        {
            let entry = entry?;
            let path = entry.path();
            if !entry.file_type().is_file() || path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            Self::load_file(path, &mut config)?;
            files += 1;
        }

        tracing::info!(
            root = %self.root.display(),
            files,
            packages = config.packages.len(),
            channels = config.channels.len(),
            bundles = config.bundles.len(),
            deprecations = config.deprecations.len(),
            "loaded declarative source"
        );
        Ok(config)
    }
}

/// Opens a source from the location part of a locator.
pub type SourceLoader = fn(&str) -> Result<Box<dyn DeclarativeSource>, SourceError>;

fn open_dir(location: &str) -> Result<Box<dyn DeclarativeSource>, SourceError> {
    Ok(Box::new(DirSource::new(location)))
}

/// Maps a source kind to its loader.
#[derive(Clone, Default)]
pub struct SourceRegistry {
    loaders: BTreeMap<String, SourceLoader>,
}

impl SourceRegistry {
    /// Registry with no loaders.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in `dir` loader.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("dir", open_dir);
        registry
    }

    /// Register or replace the loader for `kind`.
    pub fn register(&mut self, kind: impl Into<String>, loader: SourceLoader) {
        self.loaders.insert(kind.into(), loader);
    }

    /// Registered kinds, sorted.
    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.loaders.keys().map(String::as_str)
    }

    /// Open `locator` (`kind:location`).
    pub fn open(&self, locator: &str) -> Result<Box<dyn DeclarativeSource>, SourceError> {
        let (kind, location) = locator
            .split_once(':')
            .ok_or_else(|| SourceError::InvalidLocator(locator.to_string()))?;
        let loader = self
            .loaders
            .get(kind)
            .ok_or_else(|| SourceError::UnknownKind(kind.to_string()))?;
        loader(location)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use semver::Version;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, body: &str) {
        let path = dir.path().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, body).unwrap();
    }

    fn fixture() -> TempDir {
        let dir = TempDir::new().unwrap();
        write(
            &dir,
            "etcd/package.json",
            r#"{"schema":"bundlegraph.package","name":"etcd","defaultChannel":"stable",
               "icon":{"mediaType":"image/svg+xml","base64data":"PHN2Zy8+"}}"#,
        );
        write(
            &dir,
            "etcd/channels.json",
            r#"{"schema":"bundlegraph.channel","package":"etcd","name":"stable",
                "entries":[{"name":"etcd.v0.9.0"},{"name":"etcd.v0.9.2","replaces":"etcd.v0.9.0"}]}
               {"schema":"olm.unknown","whatever":true}"#,
        );
        write(
            &dir,
            "etcd/bundles.json",
            r#"{"schema":"bundlegraph.bundle","package":"etcd","name":"etcd.v0.9.0","version":"0.9.0"}
               {"schema":"bundlegraph.bundle","package":"etcd","name":"etcd.v0.9.2","version":"0.9.2",
                "reference":"quay.io/etcd:0.9.2"}"#,
        );
        write(&dir, "etcd/README.md", "not json");
        dir
    }

    #[test]
    fn test_dir_source_reads_record_streams() {
        let dir = fixture();
        let config = DirSource::new(dir.path()).load().unwrap();
        assert_eq!(config.packages.len(), 1);
        assert_eq!(config.channels.len(), 1);
        assert_eq!(config.bundles.len(), 2);
        assert_eq!(config.bundles[1].version, Version::new(0, 9, 2));
        assert_eq!(config.packages[0].icon.as_ref().map(|i| i.data.as_slice()), Some(&b"<svg/>"[..]));
    }

    #[test]
    fn test_into_catalog_attaches_records() {
        let dir = fixture();
        let mut config = DirSource::new(dir.path()).load().unwrap();
        config.deprecations.push(Deprecation {
            package: "etcd".to_string(),
            ..Default::default()
        });
        let catalog = config.into_catalog("test").unwrap();
        let etcd = catalog.package("etcd").unwrap();
        assert_eq!(etcd.channels[0].entries[1].replaces.as_deref(), Some("etcd.v0.9.0"));
        assert_eq!(etcd.bundles.len(), 2);
        assert_eq!(catalog.deprecations[0].subject.as_deref(), Some(etcd));
    }

    #[test]
    fn test_unknown_package_is_rejected() {
        let config = DeclarativeConfig {
            bundles: vec![Bundle::new("ghost", "ghost.v1", Version::new(1, 0, 0), "")],
            ..Default::default()
        };
        let err = config.into_catalog("x").unwrap_err();
        assert!(matches!(err, SourceError::UnknownPackage { kind: "bundle", .. }));
    }

    #[test]
    fn test_parse_error_names_file() {
        let dir = TempDir::new().unwrap();
        write(&dir, "broken.json", r#"{"schema":"bundlegraph.bundle","package":"p"}"#);
        let err = DirSource::new(dir.path()).load().unwrap_err();
        assert!(matches!(err, SourceError::Parse { path, .. } if path.ends_with("broken.json")));
    }

    #[test]
    fn test_registry_opens_by_kind() {
        let dir = fixture();
        let registry = SourceRegistry::with_defaults();
        assert_eq!(registry.kinds().collect::<Vec<_>>(), vec!["dir"]);

        let source = registry.open(&format!("dir:{}", dir.path().display())).unwrap();
        assert_eq!(source.load().unwrap().bundles.len(), 2);

        assert!(matches!(registry.open("git:somewhere"), Err(SourceError::UnknownKind(k)) if k == "git"));
        assert!(matches!(registry.open("no-kind"), Err(SourceError::InvalidLocator(_))));
    }
}
