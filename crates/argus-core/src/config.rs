//! Configuration loading and merging for Argus.
//!
//! Configuration resolves with project > home > defaults precedence, read
//! from `.argus.yaml` files. Every section is optional; a section missing
//! from a layer keeps the value of the layer below it.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use argus_analysis::{DataFlowConfig, FilterConfig, ScoringConfig};

use crate::CoreError;

/// File name looked up in the home and project directories.
pub const CONFIG_FILE_NAME: &str = ".argus.yaml";

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

/// Top-level Argus configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArgusConfig {
    /// Fusion weights, multipliers and thresholds.
    pub scoring: ScoringConfig,
    /// Data-flow tracer settings.
    pub dataflow: DataFlowConfig,
    /// False-positive filter switches.
    pub filter: FilterConfig,
    /// Where to load the pattern catalog from.
    pub catalog: CatalogConfig,
    /// Result cache settings.
    pub cache: CacheConfig,
}

// ---------------------------------------------------------------------------
// CatalogConfig
// ---------------------------------------------------------------------------

/// Pattern catalog location.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// Directory of catalog YAML files. `None` uses the embedded catalog.
    pub path: Option<String>,
}

// ---------------------------------------------------------------------------
// CacheConfig
// ---------------------------------------------------------------------------

/// Result cache settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Whether analysis results are cached.
    pub enabled: bool,
    /// Maximum number of cached results.
    pub max_entries: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: 1024,
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// One config file as written: sections it does not mention stay `None`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct ConfigLayer {
    scoring: Option<ScoringConfig>,
    dataflow: Option<DataFlowConfig>,
    filter: Option<FilterConfig>,
    catalog: Option<CatalogConfig>,
    cache: Option<CacheConfig>,
}

/// Load and merge configuration.
///
/// Resolution order (highest priority first):
/// 1. `.argus.yaml` in the project directory
/// 2. `.argus.yaml` in the user home directory
/// 3. Built-in defaults
///
/// # Errors
///
/// Returns [`CoreError::Config`] if a config file exists but is malformed.
pub fn load_config(project_dir: Option<&Path>) -> Result<ArgusConfig, CoreError> {
    load_layers(home_dir().as_deref(), project_dir)
}

fn load_layers(home: Option<&Path>, project_dir: Option<&Path>) -> Result<ArgusConfig, CoreError> {
    let mut config = ArgusConfig::default();

    // Layer 1: Home directory config.
    if let Some(home) = home {
        let home_config = home.join(CONFIG_FILE_NAME);
        if home_config.is_file() {
            debug!(path = %home_config.display(), "loading home config");
            let layer = load_config_file(&home_config)?;
            config = merge_config(config, layer);
        }
    }

    // Layer 2: Project directory config.
    if let Some(dir) = project_dir {
        let project_config = dir.join(CONFIG_FILE_NAME);
        if project_config.is_file() {
            debug!(path = %project_config.display(), "loading project config");
            let layer = load_config_file(&project_config)?;
            config = merge_config(config, layer);
        }
    }

    info!(
        inclusion_threshold = config.scoring.inclusion_threshold,
        lookahead_window = config.dataflow.lookahead_window,
        "configuration loaded"
    );
    Ok(config)
}

fn load_config_file(path: &Path) -> Result<ConfigLayer, CoreError> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        CoreError::Config(format!(
            "failed to read config file '{}': {e}",
            path.display()
        ))
    })?;

    serde_yml::from_str::<Option<ConfigLayer>>(&content)
        .map(Option::unwrap_or_default)
        .map_err(|e| {
            CoreError::Config(format!(
                "failed to parse config file '{}': {e}",
                path.display()
            ))
        })
}

/// Merge `layer` on top of `base`, section by section.
fn merge_config(base: ArgusConfig, layer: ConfigLayer) -> ArgusConfig {
    ArgusConfig {
        scoring: layer.scoring.unwrap_or(base.scoring),
        dataflow: layer.dataflow.unwrap_or(base.dataflow),
        filter: layer.filter.unwrap_or(base.filter),
        catalog: merge_catalog(base.catalog, layer.catalog),
        cache: merge_cache(base.cache, layer.cache),
    }
}

fn merge_catalog(base: CatalogConfig, overlay: Option<CatalogConfig>) -> CatalogConfig {
    match overlay {
        Some(overlay) => CatalogConfig {
            path: overlay.path.or(base.path),
        },
        None => base,
    }
}

fn merge_cache(base: CacheConfig, overlay: Option<CacheConfig>) -> CacheConfig {
    overlay.unwrap_or(base)
}

/// Get the user home directory.
fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn default_config() {
        let config = ArgusConfig::default();
        assert_eq!(config.scoring.pattern_weight, 0.75);
        assert_eq!(config.scoring.semantic_weight, 0.25);
        assert_eq!(config.scoring.inclusion_threshold, 0.52);
        assert_eq!(config.scoring.vulnerable_threshold, 0.57);
        assert_eq!(config.dataflow.lookahead_window, 100);
        assert!(config.filter.downgrade_safe_context);
        assert!(config.catalog.path.is_none());
        assert!(config.cache.enabled);
        assert_eq!(config.cache.max_entries, 1024);
    }

    #[test]
    fn load_config_from_yaml() {
        let tmp = tempfile::tempdir().unwrap();
        let yaml = r#"
scoring:
  inclusion_threshold: 0.6
  taint_multiplier: 1.2
dataflow:
  lookahead_window: 40
filter:
  downgrade_safe_context: false
catalog:
  path: /etc/argus/catalog
cache:
  enabled: false
  max_entries: 16
"#;
        fs::write(tmp.path().join(CONFIG_FILE_NAME), yaml).unwrap();

        let config = load_layers(None, Some(tmp.path())).unwrap();

        assert_eq!(config.scoring.inclusion_threshold, 0.6);
        assert_eq!(config.scoring.taint_multiplier, 1.2);
        assert_eq!(config.scoring.pattern_weight, 0.75, "unset field keeps default");
        assert_eq!(config.dataflow.lookahead_window, 40);
        assert!(!config.filter.downgrade_safe_context);
        assert_eq!(config.catalog.path.as_deref(), Some("/etc/argus/catalog"));
        assert!(!config.cache.enabled);
        assert_eq!(config.cache.max_entries, 16);
    }

    #[test]
    fn missing_files_return_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let config = load_layers(Some(tmp.path()), Some(tmp.path())).unwrap();
        assert_eq!(config, ArgusConfig::default());
    }

    #[test]
    fn empty_file_returns_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join(CONFIG_FILE_NAME), "").unwrap();
        let config = load_layers(None, Some(tmp.path())).unwrap();
        assert_eq!(config, ArgusConfig::default());
    }

    #[test]
    fn malformed_yaml_returns_error() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join(CONFIG_FILE_NAME), "invalid: [yaml: {broken").unwrap();
        let result = load_layers(None, Some(tmp.path()));
        match result {
            Err(CoreError::Config(msg)) => assert!(msg.contains("failed to parse")),
            other => panic!("expected config error, got {other:?}"),
        }
    }

    #[test]
    fn project_overrides_home_per_section() {
        let home = tempfile::tempdir().unwrap();
        let project = tempfile::tempdir().unwrap();
        fs::write(
            home.path().join(CONFIG_FILE_NAME),
            "scoring:\n  inclusion_threshold: 0.4\ncatalog:\n  path: /home/rules\ncache:\n  max_entries: 8\n",
        )
        .unwrap();
        fs::write(
            project.path().join(CONFIG_FILE_NAME),
            "dataflow:\n  lookahead_window: 10\ncatalog: {}\n",
        )
        .unwrap();

        let config = load_layers(Some(home.path()), Some(project.path())).unwrap();

        assert_eq!(config.scoring.inclusion_threshold, 0.4, "home section kept");
        assert_eq!(config.dataflow.lookahead_window, 10, "project section applied");
        assert_eq!(config.catalog.path.as_deref(), Some("/home/rules"));
        assert_eq!(config.cache.max_entries, 8);
    }

    #[test]
    fn merge_catalog_path_overlay_wins() {
        let base = CatalogConfig {
            path: Some("/home/user/.argus/catalog".to_string()),
        };
        let overlay = CatalogConfig {
            path: Some("/project/catalog".to_string()),
        };
        let merged = merge_catalog(base, Some(overlay));
        assert_eq!(merged.path.as_deref(), Some("/project/catalog"));
    }
}
