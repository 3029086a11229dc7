//! Mapping configuration composer.
//!
//! Loads schema fragments from the installed mapping directory and the
//! user-local override root and composes them into one [`ToolSchema`] per
//! tool:
//!
//! ```text
//! <installed>/base.toml                 global base (required)
//! <installed>/<record type>.toml        record-type base (required, may be empty)
//! <installed>/<tool>/<record type>.toml tool override (optional)
//! <user>/mappings/<tool>/<record type>.toml user override (optional)
//! <installed>/settings.toml             index settings (optional)
//! <user>/mappings/settings.toml         settings override (optional)
//! ```

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use tracing::debug;

use scan_indexer_core::mapping::{merge_layers, Mapping, MappingLayers, ToolSchema};
use scan_indexer_core::models::{RecordType, Tool};

use crate::handlers;

/// Reads and layers mapping files for every (tool, record type) pair.
#[derive(Debug, Clone)]
pub struct MappingComposer {
    installed: PathBuf,
    user: Option<PathBuf>,
}

impl MappingComposer {
    /// `installed` is the installed mapping directory; `user_root` is the
    /// user configuration root (its `mappings/` subdirectory is used).
    pub fn new(installed: impl Into<PathBuf>, user_root: Option<PathBuf>) -> Self {
        Self {
            installed: installed.into(),
            user: user_root.map(|root| root.join("mappings")),
        }
    }

    /// Load the four layers for a (record type, tool) pair.
    pub fn layers(&self, record_type: RecordType, tool: Tool) -> Result<MappingLayers> {
        let file = format!("{}.toml", record_type);
        Ok(MappingLayers {
            global: read_mapping(&self.installed.join("base.toml"), true)?,
            record_type: read_mapping(&self.installed.join(&file), true)?,
            tool: read_mapping(&self.installed.join(tool.as_str()).join(&file), false)?,
            user: match &self.user {
                Some(user) => read_mapping(&user.join(tool.as_str()).join(&file), false)?,
                None => Mapping::new(),
            },
        })
    }

    pub fn compose(&self, record_type: RecordType, tool: Tool) -> Result<Mapping> {
        Ok(self.layers(record_type, tool)?.compose())
    }

    /// Index settings: installed default overlaid with the user override.
    pub fn settings(&self) -> Result<Mapping> {
        let installed = read_mapping(&self.installed.join("settings.toml"), false)?;
        let user = match &self.user {
            Some(user) => read_mapping(&user.join("settings.toml"), false)?,
            None => Mapping::new(),
        };
        Ok(merge_layers([&installed, &user]))
    }

    /// Settings plus the composed mapping of every record type for `tool`.
    pub fn tool_schema(&self, tool: Tool) -> Result<ToolSchema> {
        let mut schema = ToolSchema {
            settings: self.settings()?,
            ..ToolSchema::default()
        };
        for record_type in RecordType::ALL {
            schema
                .mappings
                .insert(record_type, self.compose(record_type, tool)?);
        }

        // Host fields are repeated on every finding of such tools, so the
        // finding index carries the host mapping underneath its own.
        if handlers::handler(tool).finding_includes_host {
            let host = schema
                .mappings
                .get(&RecordType::Host)
                .cloned()
                .unwrap_or_default();
            let finding = schema
                .mappings
                .get(&RecordType::Finding)
                .cloned()
                .unwrap_or_default();
            schema
                .mappings
                .insert(RecordType::Finding, merge_layers([&host, &finding]));
        }
        Ok(schema)
    }
}

/// Read one mapping layer. An empty file is an empty mapping; a missing
/// file is an error only when `required`.
fn read_mapping(path: &Path, required: bool) -> Result<Mapping> {
    if !path.is_file() {
        if required {
            bail!("Required mapping file not found: {}", path.display());
        }
        debug!(path = %path.display(), "Optional mapping file not present");
        return Ok(Mapping::new());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read mapping file: {}", path.display()))?;
    if content.trim().is_empty() {
        debug!(path = %path.display(), "Empty mapping file");
        return Ok(Mapping::new());
    }
    toml::from_str(&content)
        .with_context(|| format!("Failed to parse mapping file: {}", path.display()))
}
