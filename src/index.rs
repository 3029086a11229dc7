//! Index manager.
//!
//! Every (record type, tool) pair owns one index per project, named
//! `<record type>_<tool>_<project>`. Before a tool's files are ingested its
//! five indices are dropped and recreated from the composed schema, so a
//! run always replaces that tool's data for the project.

use tracing::info;

use scan_indexer_core::mapping::ToolSchema;
use scan_indexer_core::models::{index_name, RecordType, Tool};
use scan_indexer_core::store::{Store, StoreError};

/// Index names of one tool within one project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolIndices {
    pub tool: Tool,
    names: [String; 5],
}

impl ToolIndices {
    pub fn new(tool: Tool, project: &str) -> Self {
        Self {
            tool,
            names: RecordType::ALL.map(|rt| index_name(rt, tool, project)),
        }
    }

    pub fn name(&self, record_type: RecordType) -> &str {
        let pos = RecordType::ALL
            .iter()
            .position(|rt| *rt == record_type)
            .unwrap_or_default();
        &self.names[pos]
    }

    pub fn iter(&self) -> impl Iterator<Item = (RecordType, &str)> {
        RecordType::ALL
            .into_iter()
            .zip(self.names.iter().map(String::as_str))
    }
}

/// Drop `index` if present, then create it with the schema for
/// `record_type`.
pub async fn create_index<S: Store + ?Sized>(
    store: &S,
    record_type: RecordType,
    index: &str,
    schema: &ToolSchema,
) -> Result<(), StoreError> {
    if store.delete_index(index).await? {
        info!(index, "Deleted existing index");
    }
    store
        .create_index(index, &schema.index_body(record_type))
        .await?;
    info!(index, %record_type, "Created index");
    Ok(())
}

/// Recreate all five indices of a tool.
pub async fn init_tool_indices<S: Store + ?Sized>(
    store: &S,
    indices: &ToolIndices,
    schema: &ToolSchema,
) -> Result<(), StoreError> {
    for (record_type, name) in indices.iter() {
        create_index(store, record_type, name, schema).await?;
    }
    Ok(())
}
