use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Rows fetched per page on export.
pub const DEFAULT_RESULTS_PER_PAGE: u64 = 5000;

/// Records committed per page on import.
pub const DEFAULT_ITEMS_PER_PAGE: u64 = 10000;

/// Export-side configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Connection parameters, opaque to the core; handed to the query
    /// adapter as `key=value` pairs.
    #[serde(default)]
    pub db: BTreeMap<String, String>,
    /// Restrict introspection to one schema and use unqualified table
    /// names. When unset, all non-system schemas are exported with
    /// `schema.table` qualified names.
    #[serde(default)]
    pub schema: Option<String>,
    #[serde(default = "default_results_per_page")]
    pub results_per_page: u64,
    /// Snapshot directory; cleared and recreated at run start.
    #[serde(default)]
    pub output_path: PathBuf,
}

/// Import-side configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportConfig {
    /// Base location of the manifest and record files.
    #[serde(default)]
    pub data_path: PathBuf,
    #[serde(default = "default_items_per_page")]
    pub items_per_page: u64,
}

fn default_results_per_page() -> u64 {
    DEFAULT_RESULTS_PER_PAGE
}

fn default_items_per_page() -> u64 {
    DEFAULT_ITEMS_PER_PAGE
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            db: BTreeMap::new(),
            schema: None,
            results_per_page: DEFAULT_RESULTS_PER_PAGE,
            output_path: PathBuf::new(),
        }
    }
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            data_path: PathBuf::new(),
            items_per_page: DEFAULT_ITEMS_PER_PAGE,
        }
    }
}

impl ExportConfig {
    /// Connection parameters as a libpq-style `key=value` string.
    pub fn conn_params(&self) -> String {
        self.db
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Top-level TOML config file with `[export]` and `[import]` sections.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    pub export: Option<ExportConfig>,
    pub import: Option<ImportConfig>,
}

pub fn load_config(path: &Path) -> anyhow::Result<ConfigFile> {
    let contents = std::fs::read_to_string(path)?;
    let config: ConfigFile = toml::from_str(&contents)?;
    Ok(config)
}
