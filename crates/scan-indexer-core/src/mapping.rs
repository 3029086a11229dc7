//! Index mapping composition.
//!
//! Field mappings are assembled from up to four layers, in order:
//!
//! 1. the global base mapping shared by every index,
//! 2. the base mapping for the record type,
//! 3. the tool-specific override for that record type,
//! 4. the user-local override for that record type.
//!
//! Layers merge shallowly and later layers win on key collision. Loading
//! the layers from disk is the application's job; this module only defines
//! the merge and the resulting per-tool schema.

use std::collections::BTreeMap;

use serde_json::{json, Map, Value};

use crate::models::RecordType;

/// Field name to field-type descriptor, in the store's schema language.
pub type Mapping = Map<String, Value>;

/// Right-biased shallow merge of `layers`, applied in iteration order.
///
/// For every key the result holds the value from the last layer that
/// defines it. Nested values are replaced wholesale, never merged.
pub fn merge_layers<'a, I>(layers: I) -> Mapping
where
    I: IntoIterator<Item = &'a Mapping>,
{
    let mut merged = Mapping::new();
    for layer in layers {
        for (key, value) in layer {
            merged.insert(key.clone(), value.clone());
        }
    }
    merged
}

/// The four mapping layers for one (tool, record type) pair.
#[derive(Debug, Clone, Default)]
pub struct MappingLayers {
    pub global: Mapping,
    pub record_type: Mapping,
    pub tool: Mapping,
    pub user: Mapping,
}

impl MappingLayers {
    pub fn compose(&self) -> Mapping {
        merge_layers([&self.global, &self.record_type, &self.tool, &self.user])
    }
}

/// Composed index settings and per-record-type mappings for one tool.
///
/// Computed once before any index is touched and passed by reference to
/// the index manager.
#[derive(Debug, Clone, Default)]
pub struct ToolSchema {
    pub settings: Mapping,
    pub mappings: BTreeMap<RecordType, Mapping>,
}

impl ToolSchema {
    pub fn mapping(&self, record_type: RecordType) -> Option<&Mapping> {
        self.mappings.get(&record_type)
    }

    /// Index creation body: `{"settings": ..., "mappings": {"properties": ...}}`.
    pub fn index_body(&self, record_type: RecordType) -> Value {
        let properties = self.mapping(record_type).cloned().unwrap_or_default();
        json!({
            "settings": Value::Object(self.settings.clone()),
            "mappings": { "properties": Value::Object(properties) },
        })
    }
}
