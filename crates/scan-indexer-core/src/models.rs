//! Core data models: the supported tools, the record types each tool
//! produces, and the [`Record`] document that flows into the store.

use std::fmt;
use std::str::FromStr;

use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// A scanner whose output can be classified, parsed, and indexed.
///
/// Declaration order matters: it is the order in which content probes are
/// tried during classification and the order tools are processed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Tool {
    Nmap,
    Nessus,
    Testssl,
    Sslyze,
    Sslscan,
    Pem,
}

impl Tool {
    pub const ALL: [Tool; 6] = [
        Tool::Nmap,
        Tool::Nessus,
        Tool::Testssl,
        Tool::Sslyze,
        Tool::Sslscan,
        Tool::Pem,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tool::Nmap => "nmap",
            Tool::Nessus => "nessus",
            Tool::Testssl => "testssl",
            Tool::Sslyze => "sslyze",
            Tool::Sslscan => "sslscan",
            Tool::Pem => "pem",
        }
    }

    /// Position of this tool in [`Tool::ALL`].
    pub fn index(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a tool or record type name is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind}: '{name}'")]
pub struct UnknownName {
    pub kind: &'static str,
    pub name: String,
}

impl FromStr for Tool {
    type Err = UnknownName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Tool::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| UnknownName {
                kind: "tool",
                name: s.to_string(),
            })
    }
}

/// The kind of document a record becomes. Each (record type, tool) pair
/// owns exactly one index per project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RecordType {
    Finding,
    Host,
    Certificate,
    Cipher,
    Service,
}

impl RecordType {
    pub const ALL: [RecordType; 5] = [
        RecordType::Finding,
        RecordType::Host,
        RecordType::Certificate,
        RecordType::Cipher,
        RecordType::Service,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordType::Finding => "finding",
            RecordType::Host => "host",
            RecordType::Certificate => "certificate",
            RecordType::Cipher => "cipher",
            RecordType::Service => "service",
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordType {
    type Err = UnknownName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RecordType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| UnknownName {
                kind: "record type",
                name: s.to_string(),
            })
    }
}

/// Builds the index name for a (record type, tool, project) triple:
/// `<record type>_<tool>_<project>`.
pub fn index_name(record_type: RecordType, tool: Tool, project: &str) -> String {
    format!("{}_{}_{}", record_type, tool, project)
}

/// Splits an index name produced by [`index_name`] back into its parts.
///
/// Returns `None` for indices that were not created by this tool.
pub fn parse_index_name(name: &str) -> Option<(RecordType, Tool, &str)> {
    let (record_type, rest) = name.split_once('_')?;
    let (tool, project) = rest.split_once('_')?;
    if project.is_empty() {
        return None;
    }
    Some((record_type.parse().ok()?, tool.parse().ok()?, project))
}

/// Derives a deterministic document id from a record's natural identity.
///
/// Parts are separated by a unit separator so `["ab", "c"]` and
/// `["a", "bc"]` never collide.
pub fn record_id<S: AsRef<str>>(parts: &[S]) -> String {
    let mut hasher = Sha256::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            hasher.update([0x1f]);
        }
        hasher.update(part.as_ref().as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

/// A normalized finding, host, service, certificate, or cipher.
///
/// The `id` doubles as the store's document id, so writing a record with
/// an id that already exists overwrites the earlier document.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    id: String,
    fields: Map<String, Value>,
}

impl Record {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            fields: Map::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(key, value);
        self
    }

    /// Sets a field. The `id` key is reserved and silently ignored.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        if key == "id" {
            return;
        }
        self.fields.insert(key, value.into());
    }

    /// Sets a string field only when `value` is non-empty.
    pub fn set_non_empty(&mut self, key: impl Into<String>, value: &str) {
        if !value.is_empty() {
            self.set(key, value.to_string());
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// The document body written to the store: every field plus `id`.
    pub fn to_document(&self) -> Value {
        let mut doc = self.fields.clone();
        doc.insert("id".to_string(), Value::String(self.id.clone()));
        Value::Object(doc)
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len() + 1))?;
        map.serialize_entry("id", &self.id)?;
        for (k, v) in &self.fields {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_order_is_declaration_order() {
        let names: Vec<_> = Tool::ALL.iter().map(|t| t.as_str()).collect();
        assert_eq!(
            names,
            vec!["nmap", "nessus", "testssl", "sslyze", "sslscan", "pem"]
        );
        for (i, t) in Tool::ALL.iter().enumerate() {
            assert_eq!(t.index(), i);
        }
    }

    #[test]
    fn tool_from_str() {
        assert_eq!("sslscan".parse::<Tool>().unwrap(), Tool::Sslscan);
        let err = "nikto".parse::<Tool>().unwrap_err();
        assert_eq!(err.to_string(), "unknown tool: 'nikto'");
    }

    #[test]
    fn index_name_roundtrip_with_underscored_project() {
        let name = index_name(RecordType::Finding, Tool::Nessus, "acme_q3-2024");
        assert_eq!(name, "finding_nessus_acme_q3-2024");
        let (rt, tool, project) = parse_index_name(&name).unwrap();
        assert_eq!(rt, RecordType::Finding);
        assert_eq!(tool, Tool::Nessus);
        assert_eq!(project, "acme_q3-2024");
    }

    #[test]
    fn foreign_index_names_are_rejected() {
        assert!(parse_index_name(".kibana_1").is_none());
        assert!(parse_index_name("finding_nikto_acme").is_none());
        assert!(parse_index_name("finding_nmap_").is_none());
        assert!(parse_index_name("logs").is_none());
    }

    #[test]
    fn record_id_is_deterministic_and_separated() {
        assert_eq!(record_id(&["a", "b"]), record_id(&["a", "b"]));
        assert_ne!(record_id(&["ab", "c"]), record_id(&["a", "bc"]));
        assert_eq!(record_id(&["x"]).len(), 64);
    }

    #[test]
    fn record_id_field_is_reserved() {
        let mut r = Record::new("abc").with_field("ip", "10.0.0.1");
        r.set("id", "overwritten");
        assert_eq!(r.id(), "abc");
        assert!(r.get("id").is_none());

        let doc = r.to_document();
        assert_eq!(doc["id"], "abc");
        assert_eq!(doc["ip"], "10.0.0.1");
    }

    #[test]
    fn record_serializes_with_id() {
        let r = Record::new("42").with_field("port", 443);
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json, serde_json::json!({"id": "42", "port": 443}));
    }

    #[test]
    fn set_non_empty_skips_blank_values() {
        let mut r = Record::new("1");
        r.set_non_empty("hostname", "");
        r.set_non_empty("os", "Linux");
        assert!(r.get("hostname").is_none());
        assert_eq!(r.get("os").unwrap(), "Linux");
    }
}
