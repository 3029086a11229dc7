//! Application configuration.
//!
//! The installed `scanidx.toml` is layered with an optional user-local
//! `scanidx.toml` under the user configuration root. Layering is per
//! section: a key set in the user file replaces the same key of the same
//! section in the installed file, everything else is kept.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::debug;

use scan_indexer_core::bulk::DEFAULT_BULK_SIZE;

/// Name of the application config file, both installed and user-local.
pub const CONFIG_FILE_NAME: &str = "scanidx.toml";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub paths: PathsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    #[serde(default = "default_store_url")]
    pub url: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: default_store_url(),
        }
    }
}

fn default_store_url() -> String {
    "http://localhost:9200".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_bulk_size")]
    pub bulk_size: usize,
    #[serde(default)]
    pub log_data_inserts: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            bulk_size: DEFAULT_BULK_SIZE,
            log_data_inserts: false,
        }
    }
}

fn default_bulk_size() -> usize {
    DEFAULT_BULK_SIZE
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct PathsConfig {
    /// Installed mapping directory. Relative paths resolve against the
    /// directory holding the config file.
    #[serde(default)]
    pub mappings_dir: Option<PathBuf>,
}

/// Where configuration is read from.
#[derive(Debug, Clone)]
pub struct ConfigRoots {
    /// Directory of the installed config file.
    pub installed: PathBuf,
    /// User-local configuration root, if one could be determined.
    pub user: Option<PathBuf>,
}

/// User-local configuration root: `$XDG_CONFIG_HOME/scan-indexer`, falling
/// back to `$HOME/.config/scan-indexer`.
pub fn user_config_root() -> Option<PathBuf> {
    if let Some(xdg) = std::env::var_os("XDG_CONFIG_HOME").filter(|v| !v.is_empty()) {
        return Some(PathBuf::from(xdg).join("scan-indexer"));
    }
    std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config").join("scan-indexer"))
}

impl Config {
    /// Installed mapping directory for a config loaded from `roots`.
    pub fn mappings_dir(&self, roots: &ConfigRoots) -> PathBuf {
        match &self.paths.mappings_dir {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => roots.installed.join(dir),
            None => roots.installed.join("mappings"),
        }
    }
}

pub fn load_config(path: &Path) -> Result<(Config, ConfigRoots)> {
    load_config_with_user_root(path, user_config_root())
}

/// Load `path` layered with `<user_root>/scanidx.toml`.
///
/// A missing installed file yields defaults; a present but unparsable file
/// is an error.
pub fn load_config_with_user_root(
    path: &Path,
    user_root: Option<PathBuf>,
) -> Result<(Config, ConfigRoots)> {
    let installed_dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    let mut table = read_table(path)?;
    if let Some(user) = &user_root {
        let user_table = read_table(&user.join(CONFIG_FILE_NAME))?;
        merge_sections(&mut table, user_table);
    }

    let config: Config = toml::Value::Table(table)
        .try_into()
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

    if config.ingest.bulk_size == 0 {
        bail!("ingest.bulk_size must be > 0");
    }
    if config.store.url.trim().is_empty() {
        bail!("store.url must not be empty");
    }

    let roots = ConfigRoots {
        installed: installed_dir,
        user: user_root,
    };
    Ok((config, roots))
}

fn read_table(path: &Path) -> Result<toml::Table> {
    if !path.exists() {
        debug!(path = %path.display(), "Config file not present, using defaults");
        return Ok(toml::Table::new());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    content
        .parse::<toml::Table>()
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Right-biased merge of `over` into `base`, one level into each section.
fn merge_sections(base: &mut toml::Table, over: toml::Table) {
    for (key, value) in over {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(section)) => {
                for (k, v) in section {
                    existing.insert(k, v);
                }
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}
