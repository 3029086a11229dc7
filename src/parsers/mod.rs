//! Scanner output parsers.
//!
//! Every tool gets a parser implementing [`ScanParser`]. Parsers accumulate
//! records across calls to [`parse`](ScanParser::parse), keyed by record id,
//! until the driver flushes them to the store and calls
//! [`clear`](ScanParser::clear).
//!
//! Record ids are derived from each record's natural identity (see
//! [`ParserState::identity`]), so the same host or finding parsed twice
//! collapses into one entry.

pub mod nessus;
pub mod nmap;
pub mod pem;
pub mod sslscan;
pub mod sslyze;
pub mod testssl;
mod xml;

use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Path, PathBuf};

use scan_indexer_core::models::{record_id, Record, RecordType, Tool};

/// Bytes read when probing a file's content.
const PROBE_BYTES: u64 = 4096;

/// Error raised while parsing a file already classified for a tool.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed {tool} input in {}: {reason}", path.display())]
    Malformed {
        tool: Tool,
        path: PathBuf,
        reason: String,
    },
}

impl ParseError {
    pub(crate) fn malformed(tool: Tool, path: &Path, reason: impl ToString) -> Self {
        ParseError::Malformed {
            tool,
            path: path.to_path_buf(),
            reason: reason.to_string(),
        }
    }
}

/// The five accumulating record collections of a parser.
#[derive(Debug, Clone, Default)]
pub struct RecordSet {
    findings: BTreeMap<String, Record>,
    hosts: BTreeMap<String, Record>,
    services: BTreeMap<String, Record>,
    certificates: BTreeMap<String, Record>,
    ciphers: BTreeMap<String, Record>,
}

impl RecordSet {
    pub fn get(&self, record_type: RecordType) -> &BTreeMap<String, Record> {
        match record_type {
            RecordType::Finding => &self.findings,
            RecordType::Host => &self.hosts,
            RecordType::Service => &self.services,
            RecordType::Certificate => &self.certificates,
            RecordType::Cipher => &self.ciphers,
        }
    }

    fn get_mut(&mut self, record_type: RecordType) -> &mut BTreeMap<String, Record> {
        match record_type {
            RecordType::Finding => &mut self.findings,
            RecordType::Host => &mut self.hosts,
            RecordType::Service => &mut self.services,
            RecordType::Certificate => &mut self.certificates,
            RecordType::Cipher => &mut self.ciphers,
        }
    }

    /// Insert a record, replacing any earlier record with the same id.
    pub fn insert(&mut self, record_type: RecordType, record: Record) {
        self.get_mut(record_type)
            .insert(record.id().to_string(), record);
    }

    pub fn len(&self, record_type: RecordType) -> usize {
        self.get(record_type).len()
    }

    /// Size of the largest collection.
    pub fn largest(&self) -> usize {
        RecordType::ALL
            .iter()
            .map(|rt| self.len(*rt))
            .max()
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.largest() == 0
    }

    pub fn clear(&mut self) {
        *self = RecordSet::default();
    }
}

/// State shared by every parser implementation.
#[derive(Debug, Clone)]
pub struct ParserState {
    tool: Tool,
    pub records: RecordSet,
    pub allow_duplicates: bool,
}

impl ParserState {
    pub fn new(tool: Tool) -> Self {
        Self {
            tool,
            records: RecordSet::default(),
            allow_duplicates: true,
        }
    }

    /// Document id for a record of `record_type` identified by `parts`.
    ///
    /// With duplicates allowed the source file is part of the identity, so
    /// the same logical record seen in two files stays two documents.
    /// Without, repeated sightings collapse into one.
    pub fn identity(&self, record_type: RecordType, source: &Path, parts: &[&str]) -> String {
        let mut key: Vec<String> = Vec::with_capacity(parts.len() + 3);
        key.push(self.tool.as_str().to_string());
        key.push(record_type.as_str().to_string());
        key.extend(parts.iter().map(|p| p.to_string()));
        if self.allow_duplicates {
            key.push(source.to_string_lossy().into_owned());
        }
        record_id(&key)
    }

    /// Host and service ids never include the source file: a host is the
    /// same host whichever scan saw it.
    pub fn stable_identity(&self, record_type: RecordType, parts: &[&str]) -> String {
        let mut key: Vec<&str> = vec![self.tool.as_str(), record_type.as_str()];
        key.extend_from_slice(parts);
        record_id(&key)
    }
}

/// Uniform contract over tool-specific parsers.
pub trait ScanParser: Send {
    fn tool(&self) -> Tool;

    /// Cheap structural check of the file's content. Side-effect free.
    fn is_valid_file(&self, path: &Path) -> bool;

    /// Parse `path` and add its records to the accumulated collections.
    fn parse(&mut self, path: &Path) -> Result<(), ParseError>;

    fn state(&self) -> &ParserState;

    fn state_mut(&mut self) -> &mut ParserState;

    fn records(&self) -> &RecordSet {
        &self.state().records
    }

    /// Must be set before the first call to [`parse`](ScanParser::parse).
    fn set_duplicates(&mut self, allow: bool) {
        self.state_mut().allow_duplicates = allow;
    }

    /// Drop accumulated records.
    fn clear(&mut self) {
        self.state_mut().records.clear();
    }
}

/// First few KiB of a file, lossily decoded. `None` if unreadable.
pub(crate) fn read_head(path: &Path) -> Option<String> {
    let file = std::fs::File::open(path).ok()?;
    let mut buf = Vec::new();
    file.take(PROBE_BYTES).read_to_end(&mut buf).ok()?;
    Some(String::from_utf8_lossy(&buf).into_owned())
}

pub(crate) fn read_file(path: &Path) -> Result<String, ParseError> {
    let bytes = std::fs::read(path).map_err(|source| ParseError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}
