//! sslyze XML (`--xml_out`) parser.

use std::path::Path;

use scan_indexer_core::models::{Record, RecordType, Tool};

use super::nmap::set_port;
use super::xml::{self, Element};
use super::{read_file, read_head, ParseError, ParserState, ScanParser};

/// Per-protocol scan command elements.
const PROTOCOLS: &[&str] = &["sslv2", "sslv3", "tlsv1", "tlsv1_1", "tlsv1_2", "tlsv1_3"];

struct Target<'a> {
    /// Identity of the target: its IP, or the hostname when sslyze did not
    /// resolve one.
    key: &'a str,
    ip: &'a str,
    hostname: &'a str,
    port: &'a str,
}

impl Target<'_> {
    fn record(&self, id: String) -> Record {
        let mut record = Record::new(id);
        record.set_non_empty("ip", self.ip);
        record.set_non_empty("hostname", self.hostname);
        set_port(&mut record, self.port);
        record
    }
}

pub struct SslyzeParser {
    state: ParserState,
}

impl SslyzeParser {
    pub fn new() -> Self {
        Self {
            state: ParserState::new(Tool::Sslyze),
        }
    }

    fn parse_target(&mut self, path: &Path, element: &Element) {
        let hostname = element.attr_str("host");
        let ip = element.attr_str("ip");
        let target = Target {
            key: if ip.is_empty() { hostname } else { ip },
            ip,
            hostname,
            port: element.attr_str("port"),
        };
        if target.key.is_empty() {
            return;
        }

        let mut host = Record::new(
            self.state
                .stable_identity(RecordType::Host, &[target.key]),
        );
        host.set_non_empty("ip", ip);
        host.set_non_empty("hostname", hostname);
        self.state.records.insert(RecordType::Host, host);

        let mut service = target.record(
            self.state
                .stable_identity(RecordType::Service, &[target.key, target.port]),
        );
        service.set_non_empty("service", element.attr_str("tlsWrappedProtocol"));
        self.state.records.insert(RecordType::Service, service);

        for command in &element.children {
            if PROTOCOLS.contains(&command.name.as_str()) {
                self.parse_protocol(path, &target, command);
            } else if command.name == "certinfo" {
                self.parse_certificates(&target, command);
            } else {
                self.parse_vulnerability(path, &target, command);
            }
        }
    }

    fn parse_protocol(&mut self, path: &Path, target: &Target<'_>, command: &Element) {
        let name = command.name.to_ascii_uppercase();
        let supported = command.attr("isProtocolSupported") == Some("True");
        let mut finding = target.record(self.state.identity(
            RecordType::Finding,
            path,
            &[target.key, target.port, name.as_str()],
        ));
        finding.set("name", name.as_str());
        finding.set(
            "finding",
            if supported { "offered" } else { "not offered" },
        );
        self.state.records.insert(RecordType::Finding, finding);

        let Some(accepted) = command.child("acceptedCipherSuites") else {
            return;
        };
        for suite in accepted.children_named("cipherSuite") {
            let cipher_name = suite.attr_str("name");
            let mut cipher = target.record(self.state.stable_identity(
                RecordType::Cipher,
                &[target.key, target.port, name.as_str(), cipher_name],
            ));
            cipher.set("protocol", name.as_str());
            cipher.set_non_empty("cipher", cipher_name);
            if let Ok(bits) = suite.attr_str("keySize").parse::<u64>() {
                cipher.set("bits", bits);
            }
            self.state.records.insert(RecordType::Cipher, cipher);
        }
    }

    /// Plugins such as heartbleed or robot report an `isVulnerable` flag on
    /// a child element.
    fn parse_vulnerability(&mut self, path: &Path, target: &Target<'_>, command: &Element) {
        let flag = command
            .children
            .iter()
            .find_map(|c| c.attr("isVulnerable"))
            .or_else(|| command.attr("isVulnerable"));
        let Some(flag) = flag else {
            return;
        };
        let mut finding = target.record(self.state.identity(
            RecordType::Finding,
            path,
            &[target.key, target.port, command.name.as_str()],
        ));
        finding.set("name", command.name.as_str());
        finding.set("vulnerable", flag == "True");
        finding.set_non_empty("title", command.attr_str("title"));
        self.state.records.insert(RecordType::Finding, finding);
    }

    fn parse_certificates(&mut self, target: &Target<'_>, certinfo: &Element) {
        for (position, cert) in certinfo
            .descendants_named("certificate")
            .into_iter()
            .enumerate()
        {
            let fingerprint = cert.attr_str("sha1Fingerprint");
            let serial = cert.child_text("serialNumber");
            let position = position.to_string();
            let mut record = target.record(self.state.stable_identity(
                RecordType::Certificate,
                &[target.key, target.port, position.as_str(), fingerprint, serial],
            ));
            record.set_non_empty("position", cert.attr_str("position"));
            record.set_non_empty("sha1_fingerprint", fingerprint);
            record.set_non_empty("serial_number", serial);
            if let Some(subject) = cert.child("subject") {
                record.set_non_empty("subject", subject.child_text("commonName"));
            }
            if let Some(issuer) = cert.child("issuer") {
                record.set_non_empty("issuer", issuer.child_text("commonName"));
            }
            record.set_non_empty("not_before", cert.child_text("notBefore"));
            record.set_non_empty("not_after", cert.child_text("notAfter"));
            record.set_non_empty("signature_algorithm", cert.child_text("signatureAlgorithm"));
            if let Some(key) = cert.child("publicKey") {
                record.set_non_empty("public_key_algorithm", key.child_text("algorithm"));
                if let Ok(size) = key.child_text("size").parse::<u64>() {
                    record.set("public_key_size", size);
                }
            }
            self.state.records.insert(RecordType::Certificate, record);
        }
    }
}

impl Default for SslyzeParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ScanParser for SslyzeParser {
    fn tool(&self) -> Tool {
        Tool::Sslyze
    }

    fn is_valid_file(&self, path: &Path) -> bool {
        read_head(path).is_some_and(|head| {
            head.contains("<document") && head.to_ascii_lowercase().contains("sslyze")
        })
    }

    fn parse(&mut self, path: &Path) -> Result<(), ParseError> {
        let content = read_file(path)?;
        let root =
            xml::parse(&content).map_err(|e| ParseError::malformed(Tool::Sslyze, path, e))?;
        if root.name != "document" {
            return Err(ParseError::malformed(
                Tool::Sslyze,
                path,
                format!("unexpected root element <{}>", root.name),
            ));
        }
        for target in root.descendants_named("target") {
            self.parse_target(path, target);
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
