//! sslscan XML (`--xml=`) parser.

use std::net::IpAddr;
use std::path::Path;

use scan_indexer_core::models::{Record, RecordType, Tool};

use super::nmap::set_port;
use super::xml::{self, Element};
use super::{read_file, read_head, ParseError, ParserState, ScanParser};

pub struct SslscanParser {
    state: ParserState,
}

impl SslscanParser {
    pub fn new() -> Self {
        Self {
            state: ParserState::new(Tool::Sslscan),
        }
    }

    fn parse_test(&mut self, path: &Path, test: &Element) {
        let target = test.attr_str("host");
        let port = test.attr_str("port");
        if target.is_empty() {
            return;
        }
        let base = |id: String| {
            let mut record = Record::new(id);
            // sslscan reports whatever was passed on the command line.
            if target.parse::<IpAddr>().is_ok() {
                record.set("ip", target);
            } else {
                record.set("hostname", target);
            }
            set_port(&mut record, port);
            record
        };

        let host = base(self.state.stable_identity(RecordType::Host, &[target]));
        self.state.records.insert(RecordType::Host, host);

        let mut service = base(
            self.state
                .stable_identity(RecordType::Service, &[target, port]),
        );
        service.set_non_empty("sni", test.attr_str("sniname"));
        self.state.records.insert(RecordType::Service, service);

        for element in &test.children {
            match element.name.as_str() {
                "protocol" => {
                    let name = protocol_name(element.attr_str("type"), element.attr_str("version"));
                    let mut finding = base(self.state.identity(
                        RecordType::Finding,
                        path,
                        &[target, port, name.as_str()],
                    ));
                    finding.set("name", name.as_str());
                    let offered = element.attr("enabled") == Some("1");
                    finding.set("finding", if offered { "offered" } else { "not offered" });
                    self.state.records.insert(RecordType::Finding, finding);
                }
                "cipher" => {
                    let version = element.attr_str("sslversion");
                    let name = element.attr_str("cipher");
                    let mut cipher = base(self.state.stable_identity(
                        RecordType::Cipher,
                        &[target, port, version, name],
                    ));
                    cipher.set_non_empty("protocol", version);
                    cipher.set_non_empty("cipher", name);
                    cipher.set_non_empty("status", element.attr_str("status"));
                    cipher.set_non_empty("hexcode", element.attr_str("id"));
                    cipher.set_non_empty("strength", element.attr_str("strength"));
                    cipher.set_non_empty("curve", element.attr_str("curve"));
                    if let Ok(bits) = element.attr_str("bits").parse::<u64>() {
                        cipher.set("bits", bits);
                    }
                    self.state.records.insert(RecordType::Cipher, cipher);
                }
                "heartbleed" | "renegotiation" | "compression" | "fallback" => {
                    let version = element.attr_str("sslversion");
                    let mut finding = base(self.state.identity(
                        RecordType::Finding,
                        path,
                        &[target, port, element.name.as_str(), version],
                    ));
                    finding.set("name", element.name.as_str());
                    finding.set_non_empty("protocol", version);
                    for (key, value) in &element.attrs {
                        match value.as_str() {
                            "0" => finding.set(key.as_str(), false),
                            "1" => finding.set(key.as_str(), true),
                            _ => {}
                        }
                    }
                    self.state.records.insert(RecordType::Finding, finding);
                }
                _ => {}
            }
        }

        // sslscan 2 nests certificates under <certificates>, 1.x does not.
        let certificates = test.descendants_named("certificate");
        for (position, cert) in certificates.into_iter().enumerate() {
            let subject = cert.child_text("subject");
            let not_before = cert.child_text("not-valid-before");
            let position = position.to_string();
            let mut record = base(self.state.stable_identity(
                RecordType::Certificate,
                &[target, port, position.as_str(), subject, not_before],
            ));
            record.set_non_empty("type", cert.attr_str("type"));
            record.set_non_empty("subject", subject);
            record.set_non_empty("altnames", cert.child_text("altnames"));
            record.set_non_empty("issuer", cert.child_text("issuer"));
            record.set_non_empty(
                "signature_algorithm",
                cert.child_text("signature-algorithm"),
            );
            record.set_non_empty("public_key_algorithm", cert.child_text("pk-algorithm"));
            if let Some(bits) = cert
                .child("pk")
                .and_then(|pk| pk.attr_str("bits").parse::<u64>().ok())
            {
                record.set("public_key_size", bits);
            }
            record.set_non_empty("not_before", not_before);
            record.set_non_empty("not_after", cert.child_text("not-valid-after"));
            for flag in ["self-signed", "expired"] {
                match cert.child_text(flag) {
                    "true" => record.set(flag.replace('-', "_"), true),
                    "false" => record.set(flag.replace('-', "_"), false),
                    _ => {}
                }
            }
            self.state.records.insert(RecordType::Certificate, record);
        }
    }
}

impl Default for SslscanParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ScanParser for SslscanParser {
    fn tool(&self) -> Tool {
        Tool::Sslscan
    }

    fn is_valid_file(&self, path: &Path) -> bool {
        read_head(path).is_some_and(|head| {
            head.contains("<document") && head.to_ascii_lowercase().contains("sslscan")
        })
    }

    fn parse(&mut self, path: &Path) -> Result<(), ParseError> {
        let content = read_file(path)?;
        let root =
            xml::parse(&content).map_err(|e| ParseError::malformed(Tool::Sslscan, path, e))?;
        if root.name != "document" {
            return Err(ParseError::malformed(
                Tool::Sslscan,
                path,
                format!("unexpected root element <{}>", root.name),
            ));
        }
        for test in root.children_named("ssltest") {
            self.parse_test(path, test);
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

/// `("tls", "1.2")` to `"TLSv1.2"`, `("ssl", "3")` to `"SSLv3"`.
fn protocol_name(kind: &str, version: &str) -> String {
    format!("{}v{}", kind.to_ascii_uppercase(), version)
}
