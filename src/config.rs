//! Build configuration.
//!
//! All settings come from environment variables:
//! - `CATALOG_SOURCE`: source locator `kind:location` (default: `dir:./catalog`)
//! - `CATALOG_NAME`: name given to the assembled catalog (default: `catalog`)
//! - `GRAPH_SNAPSHOT`: snapshot path (default: `graph.json`)
//! - `GRAPH_SELECTOR`: selector expression for the derived pruned snapshot (optional)
//! - `GRAPH_PRUNED_SNAPSHOT`: pruned snapshot path (default: the snapshot path
//!   with a `.pruned.json` extension)
//! - `GRAPH_DIAGRAM`: Mermaid diagram output path (optional)
//! - `GRAPH_EXTRA_TAGS`: `k=v,k=v` tags added to every inserted node and edge
//! - `CATALOG_LAYOUT`: image-layout directory to publish the catalog into (optional)
//! - `CATALOG_REF`: reference the published catalog is tagged with (default: `catalog:latest`)
//! - `BLOB_CACHE_ENTRIES`: fetch cache size, `0` disables it (default: 1024)

use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::store::CacheConfig;

/// Invalid configuration value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// A variable holds a value that does not parse.
    #[error("{variable}={value:?}: {reason}")]
    Invalid {
        /// Variable name.
        variable: &'static str,
        /// Offending value.
        value: String,
        /// What is wrong with it.
        reason: String,
    },
}

/// Settings for one build run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildConfig {
    /// Source locator.
    pub source: String,
    /// Catalog name.
    pub catalog_name: String,
    /// Snapshot path.
    pub snapshot: PathBuf,
    /// Selector expression.
    pub selector: Option<String>,
    /// Where the pruned graph is written; see [`BuildConfig::pruned_snapshot_path`].
    pub pruned_snapshot: Option<PathBuf>,
    /// Diagram output path.
    pub diagram: Option<PathBuf>,
    /// Tags added to every inserted node and edge.
    pub extra_tags: BTreeMap<String, String>,
    /// Layout directory to publish into.
    pub layout: Option<PathBuf>,
    /// Tag for the published catalog.
    pub catalog_ref: String,
    /// Fetch cache settings.
    pub cache: CacheConfig,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            source: "dir:./catalog".to_string(),
            catalog_name: "catalog".to_string(),
            snapshot: PathBuf::from("graph.json"),
            selector: None,
            pruned_snapshot: None,
            diagram: None,
            extra_tags: BTreeMap::new(),
            layout: None,
            catalog_ref: "catalog:latest".to_string(),
            cache: CacheConfig::default(),
        }
    }
}

/// Parse `k=v,k=v`. Empty input yields no tags.
pub fn parse_extra_tags(text: &str) -> Result<BTreeMap<String, String>, String> {
    let mut tags = BTreeMap::new();
    for pair in text.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| format!("expected key=value, found {pair:?}"))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(format!("empty key in {pair:?}"));
        }
        tags.insert(key.to_string(), value.trim().to_string());
    }
    Ok(tags)
}

impl BuildConfig {
    /// Path of the pruned snapshot: `pruned_snapshot`, or the snapshot path
    /// with its extension replaced by `pruned.json`.
    pub fn pruned_snapshot_path(&self) -> PathBuf {
        self.pruned_snapshot
            .clone()
            .unwrap_or_else(|| self.snapshot.with_extension("pruned.json"))
    }

    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through `lookup`; blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let extra_tags = match var("GRAPH_EXTRA_TAGS") {
            Some(text) => parse_extra_tags(&text).map_err(|reason| ConfigError::Invalid {
                variable: "GRAPH_EXTRA_TAGS",
                value: text.clone(),
                reason,
            })?,
            None => BTreeMap::new(),
        };

        let cache = match var("BLOB_CACHE_ENTRIES") {
            Some(text) => {
                let max_entries: usize = text.trim().parse().map_err(|e: std::num::ParseIntError| ConfigError::Invalid {
                    variable: "BLOB_CACHE_ENTRIES",
                    value: text.clone(),
                    reason: e.to_string(),
                })?;
                CacheConfig {
                    max_entries,
                    enabled: max_entries > 0,
                }
            }
            None => defaults.cache,
        };

        let source = var("CATALOG_SOURCE").unwrap_or(defaults.source);
        if !source.contains(':') {
            return Err(ConfigError::Invalid {
                variable: "CATALOG_SOURCE",
                value: source,
                reason: "expected kind:location".to_string(),
            });
        }

        Ok(Self {
            source,
            catalog_name: var("CATALOG_NAME").unwrap_or(defaults.catalog_name),
            snapshot: var("GRAPH_SNAPSHOT").map(PathBuf::from).unwrap_or(defaults.snapshot),
            selector: var("GRAPH_SELECTOR"),
            pruned_snapshot: var("GRAPH_PRUNED_SNAPSHOT").map(PathBuf::from),
            diagram: var("GRAPH_DIAGRAM").map(PathBuf::from),
            extra_tags,
            layout: var("CATALOG_LAYOUT").map(PathBuf::from),
            catalog_ref: var("CATALOG_REF").unwrap_or(defaults.catalog_ref),
            cache,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<BuildConfig, ConfigError> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        BuildConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        assert_eq!(load(&[]).unwrap(), BuildConfig::default());
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("CATALOG_SOURCE", "dir:/srv/catalog"),
            ("GRAPH_SNAPSHOT", "/tmp/g.json"),
            ("GRAPH_SELECTOR", "entry.kind == 'edge'"),
            ("GRAPH_EXTRA_TAGS", "source=ci, tier = gold"),
            ("BLOB_CACHE_ENTRIES", "0"),
            ("GRAPH_DIAGRAM", "  "),
        ])
        .unwrap();
        assert_eq!(config.source, "dir:/srv/catalog");
        assert_eq!(config.snapshot, PathBuf::from("/tmp/g.json"));
        assert_eq!(config.selector.as_deref(), Some("entry.kind == 'edge'"));
        assert_eq!(
            config.extra_tags,
            BTreeMap::from([("source".to_string(), "ci".to_string()), ("tier".to_string(), "gold".to_string())])
        );
        assert!(!config.cache.enabled);
        assert_eq!(config.diagram, None);
        assert_eq!(config.pruned_snapshot_path(), PathBuf::from("/tmp/g.pruned.json"));
    }

    #[test]
    fn test_pruned_snapshot_override() {
        let config = load(&[("GRAPH_PRUNED_SNAPSHOT", "/srv/stable.json")]).unwrap();
        assert_eq!(config.pruned_snapshot_path(), PathBuf::from("/srv/stable.json"));
        assert_eq!(BuildConfig::default().pruned_snapshot_path(), PathBuf::from("graph.pruned.json"));
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(
            load(&[("GRAPH_EXTRA_TAGS", "novalue")]),
            Err(ConfigError::Invalid { variable: "GRAPH_EXTRA_TAGS", .. })
        ));
        assert!(matches!(
            load(&[("BLOB_CACHE_ENTRIES", "lots")]),
            Err(ConfigError::Invalid { variable: "BLOB_CACHE_ENTRIES", .. })
        ));
        assert!(matches!(
            load(&[("CATALOG_SOURCE", "./catalog")]),
            Err(ConfigError::Invalid { variable: "CATALOG_SOURCE", .. })
        ));
        assert_eq!(parse_extra_tags("=x"), Err("empty key in \"=x\"".to_string()));
    }
}
