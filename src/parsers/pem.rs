//! PEM bundle parser.
//!
//! Each `-----BEGIN <label>-----` block becomes a certificate record
//! identified by the SHA-256 fingerprint of its decoded body. The body is
//! not interpreted further.

use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use sha2::{Digest, Sha256};

use scan_indexer_core::models::{Record, RecordType, Tool};

use super::{read_file, read_head, ParseError, ParserState, ScanParser};

const BEGIN: &str = "-----BEGIN ";
const END: &str = "-----END ";
const DASHES: &str = "-----";

#[derive(Debug, PartialEq)]
struct Block {
    label: String,
    der: Vec<u8>,
}

pub struct PemParser {
    state: ParserState,
}

impl PemParser {
    pub fn new() -> Self {
        Self {
            state: ParserState::new(Tool::Pem),
        }
    }
}

impl Default for PemParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ScanParser for PemParser {
    fn tool(&self) -> Tool {
        Tool::Pem
    }

    fn is_valid_file(&self, path: &Path) -> bool {
        read_head(path).is_some_and(|head| head.contains(BEGIN))
    }

    fn parse(&mut self, path: &Path) -> Result<(), ParseError> {
        let content = read_file(path)?;
        let blocks = blocks(&content).map_err(|e| ParseError::malformed(Tool::Pem, path, e))?;
        if blocks.is_empty() {
            return Err(ParseError::malformed(Tool::Pem, path, "no PEM blocks found"));
        }

        for (position, block) in blocks.iter().enumerate() {
            let fingerprint = format!("{:x}", Sha256::digest(&block.der));
            let mut record = Record::new(self.state.identity(
                RecordType::Certificate,
                path,
                &[fingerprint.as_str()],
            ))
            .with_field("kind", block.label.as_str())
            .with_field("fingerprint_sha256", fingerprint.as_str())
            .with_field("der_length", block.der.len())
            .with_field("position", position);
            record.set("file", path.display().to_string());
            self.state.records.insert(RecordType::Certificate, record);
        }
        Ok(())
    }

    fn state(&self) -> &ParserState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut ParserState {
        &mut self.state
    }
}

fn blocks(content: &str) -> Result<Vec<Block>, String> {
    let mut blocks = Vec::new();
    let mut current: Option<(String, String)> = None;

    for line in content.lines().map(str::trim) {
        if let Some(label) = line
            .strip_prefix(BEGIN)
            .and_then(|rest| rest.strip_suffix(DASHES))
        {
            current = Some((label.to_string(), String::new()));
        } else if let Some(label) = line.strip_prefix(END).and_then(|r| r.strip_suffix(DASHES)) {
            let Some((open, body)) = current.take() else {
                return Err(format!("END {label} without BEGIN"));
            };
            if open != label {
                return Err(format!("BEGIN {open} closed by END {label}"));
            }
            let der = STANDARD
                .decode(body.as_bytes())
                .map_err(|e| format!("invalid base64 in {label} block: {e}"))?;
            blocks.push(Block { label: open, der });
        } else if let Some((_, body)) = current.as_mut() {
            // Encapsulated headers such as "Proc-Type: 4,ENCRYPTED".
            if !line.contains(':') {
                body.push_str(line);
            }
        }
    }

    if let Some((label, _)) = current {
        return Err(format!("unterminated {label} block"));
    }
    Ok(blocks)
}
