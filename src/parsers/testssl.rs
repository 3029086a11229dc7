//! testssl.sh JSON parser.
//!
//! Accepts both `--jsonfile` (a flat array of findings) and
//! `--jsonfile-pretty` (an object whose `scanResult` groups findings per
//! target and section). Both are normalized to flat [`Entry`] values first.
//!
//! `cipher-*` entries become cipher records. `cert_*` entries are findings
//! and also fill one certificate record per target and certificate number,
//! with field names shared with the other certificate sources.
//!
//! Services follow the duplicate mode of the findings: with duplicates
//! allowed, a service seen in two files is two documents, matching its two
//! protocol findings.

use std::collections::BTreeMap;
use std::path::Path;

use serde_json::Value;

use scan_indexer_core::models::{Record, RecordType, Tool};

use super::nmap::set_port;
use super::{read_file, read_head, ParseError, ParserState, ScanParser};

#[derive(Debug, Default)]
struct Entry {
    id: String,
    /// `hostname/ip` or a bare ip.
    target: String,
    port: String,
    severity: String,
    finding: String,
    cve: String,
    cwe: String,
}

pub struct TestsslParser {
    state: ParserState,
}

impl TestsslParser {
    pub fn new() -> Self {
        Self {
            state: ParserState::new(Tool::Testssl),
        }
    }

    fn add_entries(&mut self, path: &Path, entries: Vec<Entry>) {
        let mut certificates: BTreeMap<String, Record> = BTreeMap::new();

        for entry in entries {
            let (hostname, ip) = split_target(&entry.target);
            if ip.is_empty() {
                continue;
            }

            let mut host = Record::new(self.state.stable_identity(RecordType::Host, &[ip]))
                .with_field("ip", ip);
            host.set_non_empty("hostname", hostname);
            self.state.records.insert(RecordType::Host, host);

            if !entry.port.is_empty() {
                // Same identity rule as the findings, so every service has
                // exactly one protocol finding per file.
                let mut service = Record::new(self.state.identity(
                    RecordType::Service,
                    path,
                    &[ip, entry.port.as_str()],
                ))
                .with_field("ip", ip);
                service.set_non_empty("hostname", hostname);
                set_port(&mut service, &entry.port);
                self.state.records.insert(RecordType::Service, service);
            }

            if entry.id.starts_with("cipher-") {
                let cipher = self.cipher(ip, hostname, &entry);
                self.state.records.insert(RecordType::Cipher, cipher);
                continue;
            }

            if let Some(rest) = entry.id.strip_prefix("cert_") {
                // Multi-certificate hosts suffix ids with " <hostCert#N>".
                let (field, number) = match rest.split_once(' ') {
                    Some((field, number)) => (field, number.trim()),
                    None => (rest, ""),
                };
                let id = self.state.stable_identity(
                    RecordType::Certificate,
                    &[ip, entry.port.as_str(), number],
                );
                let cert = certificates.entry(id.clone()).or_insert_with(|| {
                    let mut cert = Record::new(id).with_field("ip", ip);
                    cert.set_non_empty("hostname", hostname);
                    set_port(&mut cert, &entry.port);
                    cert.set_non_empty("certificate_number", number);
                    cert
                });
                set_certificate_field(cert, field, &entry.finding);
            }

            let mut finding = Record::new(self.state.identity(
                RecordType::Finding,
                path,
                &[ip, entry.port.as_str(), entry.id.as_str()],
            ))
            .with_field("ip", ip)
            .with_field("name", entry.id.as_str());
            finding.set_non_empty("hostname", hostname);
            set_port(&mut finding, &entry.port);
            finding.set_non_empty("severity", &entry.severity);
            finding.set_non_empty("finding", &entry.finding);
            finding.set_non_empty("cve", &entry.cve);
            finding.set_non_empty("cwe", &entry.cwe);
            self.state.records.insert(RecordType::Finding, finding);
        }

        for cert in certificates.into_values() {
            self.state.records.insert(RecordType::Certificate, cert);
        }
    }

    fn cipher(&self, ip: &str, hostname: &str, entry: &Entry) -> Record {
        let mut cipher = Record::new(self.state.stable_identity(
            RecordType::Cipher,
            &[ip, entry.port.as_str(), entry.id.as_str()],
        ))
        .with_field("ip", ip)
        .with_field("name", entry.id.as_str());
        cipher.set_non_empty("hostname", hostname);
        set_port(&mut cipher, &entry.port);
        cipher.set_non_empty("severity", &entry.severity);
        cipher.set_non_empty("finding", &entry.finding);

        // "TLSv1.2   xc02f   ECDHE-RSA-AES128-GCM-SHA256   ECDH 256   AESGCM   128   TLS_ECDHE_..."
        let tokens: Vec<&str> = entry.finding.split_whitespace().collect();
        if tokens.len() >= 3 {
            cipher.set("protocol", tokens[0]);
            cipher.set("hexcode", tokens[1]);
            cipher.set("cipher", tokens[2]);
        }
        if let Some(iana) = tokens
            .last()
            .filter(|t| t.starts_with("TLS_") || t.starts_with("SSL_"))
        {
            cipher.set("iana_name", *iana);
        }
        cipher
    }
}

/// Store a `cert_<field>` value under the field name the other
/// certificate sources use.
fn set_certificate_field(cert: &mut Record, field: &str, value: &str) {
    if value.is_empty() {
        return;
    }
    let name = match field {
        "commonName" => "subject",
        "caIssuers" => "issuer",
        "notBefore" => "not_before",
        "notAfter" => "not_after",
        "signatureAlgorithm" => "signature_algorithm",
        "subjectAltName" => "altnames",
        "serialNumber" => "serial_number",
        "fingerprintSHA1" => "sha1_fingerprint",
        "fingerprintSHA256" => "fingerprint_sha256",
        "keySize" => {
            // "RSA 2048 bits", "EC 256 bits"
            let mut tokens = value.split_whitespace();
            if let Some(algorithm) = tokens.next() {
                cert.set("public_key_algorithm", algorithm);
            }
            if let Some(size) = tokens.find_map(|t| t.parse::<u64>().ok()) {
                cert.set("public_key_size", size);
            }
            return;
        }
        other => {
            cert.set(snake_case(other), value);
            return;
        }
    };
    cert.set(name, value);
}

fn snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    let mut prev: Option<char> = None;
    for c in name.chars() {
        if c.is_ascii_uppercase() {
            if prev.is_some_and(|p| p.is_ascii_lowercase() || p.is_ascii_digit()) {
                out.push('_');
            }
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
        prev = Some(c);
    }
    out
}

impl Default for TestsslParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ScanParser for TestsslParser {
    fn tool(&self) -> Tool {
        Tool::Testssl
    }

    fn is_valid_file(&self, path: &Path) -> bool {
        read_head(path).is_some_and(|head| {
            let head = head.trim_start();
            (head.starts_with('[') || head.starts_with('{'))
                && (head.contains("\"finding\"") || head.contains("\"scanResult\""))
        })
    }

    fn parse(&mut self, path: &Path) -> Result<(), ParseError> {
        let content = read_file(path)?;
        let json: Value = serde_json::from_str(&content)
            .map_err(|e| ParseError::malformed(Tool::Testssl, path, e))?;
        let entries: Vec<Entry> = match &json {
            Value::Array(items) => items.iter().filter_map(flat_entry).collect(),
            Value::Object(obj) => match obj.get("scanResult") {
                Some(Value::Array(results)) => results.iter().flat_map(pretty_entries).collect(),
                _ => {
                    return Err(ParseError::malformed(
                        Tool::Testssl,
                        path,
                        "object without a scanResult array",
                    ))
                }
            },
            _ => {
                return Err(ParseError::malformed(
                    Tool::Testssl,
                    path,
                    "expected a JSON array or object",
                ))
            }
        };
        self.add_entries(path, entries);
        Ok(())
    }

    fn state(&self) -> &ParserState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut ParserState {
        &mut self.state
    }
}

/// Text of a string or number field.
fn text(value: &Value, key: &str) -> String {
    match value.get(key) {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

fn flat_entry(value: &Value) -> Option<Entry> {
    let id = text(value, "id");
    if id.is_empty() {
        return None;
    }
    Some(Entry {
        id,
        target: text(value, "ip"),
        port: text(value, "port"),
        severity: text(value, "severity"),
        finding: text(value, "finding"),
        cve: text(value, "cve"),
        cwe: text(value, "cwe"),
    })
}

fn pretty_entries(result: &Value) -> Vec<Entry> {
    let Some(sections) = result.as_object() else {
        return Vec::new();
    };
    let host = text(result, "targetHost");
    let ip = text(result, "ip");
    let target = if host.is_empty() || host == ip {
        ip
    } else {
        format!("{host}/{ip}")
    };
    let port = text(result, "port");

    sections
        .values()
        .filter_map(Value::as_array)
        .flatten()
        .filter_map(|item| {
            let mut entry = flat_entry(item)?;
            entry.target = target.clone();
            entry.port = port.clone();
            Some(entry)
        })
        .collect()
}

/// `"example.com/93.184.216.34"` to `("example.com", "93.184.216.34")`.
fn split_target(target: &str) -> (&str, &str) {
    match target.split_once('/') {
        Some((host, ip)) => (host, ip),
        None => ("", target),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const FLAT: &str = r#"[
  {"id":"service","ip":"example.com/93.184.216.34","port":"443","severity":"INFO","finding":"HTTP"},
  {"id":"SSLv3","ip":"example.com/93.184.216.34","port":"443","severity":"OK","cve":"","cwe":"","finding":"not offered"},
  {"id":"TLS1_2","ip":"example.com/93.184.216.34","port":"443","severity":"OK","finding":"offered"},
  {"id":"cipher-tls1_2_xc02f","ip":"example.com/93.184.216.34","port":"443","severity":"OK","finding":"TLSv1.2   xc02f   ECDHE-RSA-AES128-GCM-SHA256       ECDH 256   AESGCM      128      TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256"},
  {"id":"cert_commonName","ip":"example.com/93.184.216.34","port":"443","severity":"OK","finding":"www.example.org"},
  {"id":"cert_notAfter","ip":"example.com/93.184.216.34","port":"443","severity":"OK","finding":"2025-03-01 23:59"},
  {"id":"TLS1_2","ip":"10.0.0.5","port":"8443","severity":"OK","finding":"offered"}
]"#;

    const PRETTY: &str = r#"{
  "Invocation": "testssl.sh --jsonfile-pretty out.json example.com",
  "version": "3.2",
  "scanResult": [
    {
      "targetHost": "example.com",
      "ip": "93.184.216.34",
      "port": "443",
      "service": "HTTP",
      "protocols": [
        {"id":"TLS1_2","severity":"OK","finding":"offered"},
        {"id":"TLS1_3","severity":"OK","finding":"offered with final"}
      ],
      "ciphers": [
        {"id":"cipher-tls1_3_x1302","severity":"OK","finding":"TLSv1.3  x1302  TLS_AES_256_GCM_SHA384  ECDH 253  AESGCM  256  TLS_AES_256_GCM_SHA384"}
      ],
      "vulnerabilities": [
        {"id":"heartbleed","severity":"OK","cve":"CVE-2014-0160","cwe":"CWE-119","finding":"not vulnerable"}
      ]
    }
  ]
}"#;

    fn parse(content: &str) -> TestsslParser {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("out.json");
        fs::write(&path, content).unwrap();
        let mut parser = TestsslParser::new();
        assert!(parser.is_valid_file(&path));
        parser.parse(&path).unwrap();
        parser
    }

    #[test]
    fn flat_format() {
        let parser = parse(FLAT);
        let records = parser.records();

        assert_eq!(records.len(RecordType::Host), 2);
        assert_eq!(records.len(RecordType::Service), 2);
        assert_eq!(records.len(RecordType::Cipher), 1);
        assert_eq!(records.len(RecordType::Certificate), 1);
        // Everything except the cipher line is a finding.
        assert_eq!(records.len(RecordType::Finding), 6);

        let host = records
            .get(RecordType::Host)
            .values()
            .find(|h| h.get("ip").unwrap() == "93.184.216.34")
            .unwrap();
        assert_eq!(host.get("hostname").unwrap(), "example.com");

        let cipher = records.get(RecordType::Cipher).values().next().unwrap();
        assert_eq!(cipher.get("protocol").unwrap(), "TLSv1.2");
        assert_eq!(cipher.get("cipher").unwrap(), "ECDHE-RSA-AES128-GCM-SHA256");
        assert_eq!(
            cipher.get("iana_name").unwrap(),
            "TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256"
        );

        let cert = records.get(RecordType::Certificate).values().next().unwrap();
        assert_eq!(cert.get("subject").unwrap(), "www.example.org");
        assert_eq!(cert.get("not_after").unwrap(), "2025-03-01 23:59");

        let tls12 = records
            .get(RecordType::Finding)
            .values()
            .filter(|f| f.get("name").unwrap() == "TLS1_2")
            .count();
        assert_eq!(tls12, records.len(RecordType::Service));
    }

    #[test]
    fn pretty_format() {
        let parser = parse(PRETTY);
        let records = parser.records();
        assert_eq!(records.len(RecordType::Host), 1);
        assert_eq!(records.len(RecordType::Service), 1);
        assert_eq!(records.len(RecordType::Cipher), 1);
        assert_eq!(records.len(RecordType::Finding), 3);

        let heartbleed = records
            .get(RecordType::Finding)
            .values()
            .find(|f| f.get("name").unwrap() == "heartbleed")
            .unwrap();
        assert_eq!(heartbleed.get("cve").unwrap(), "CVE-2014-0160");
        assert_eq!(heartbleed.get("port").unwrap(), 443);
        assert_eq!(heartbleed.get("hostname").unwrap(), "example.com");
    }

    #[test]
    fn unrelated_json_is_not_testssl() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("package.json");
        fs::write(&path, r#"{"name": "web", "version": "1.0.0"}"#).unwrap();
        let mut parser = TestsslParser::new();
        assert!(!parser.is_valid_file(&path));
        assert!(parser.parse(&path).is_err());
    }

    #[test]
    fn certificate_fields_use_shared_names() {
        let parser = parse(
            r#"[
  {"id":"cert_commonName","ip":"web/10.0.0.7","port":"443","severity":"OK","finding":"web.example"},
  {"id":"cert_caIssuers","ip":"web/10.0.0.7","port":"443","severity":"OK","finding":"Example CA"},
  {"id":"cert_keySize","ip":"web/10.0.0.7","port":"443","severity":"INFO","finding":"RSA 4096 bits"},
  {"id":"cert_expirationStatus","ip":"web/10.0.0.7","port":"443","severity":"OK","finding":"expires >= 60 days"},
  {"id":"cert_ocspURL","ip":"web/10.0.0.7","port":"443","severity":"INFO","finding":"http://ocsp.example"}
]"#,
        );
        let cert = parser
            .records()
            .get(RecordType::Certificate)
            .values()
            .next()
            .unwrap();
        assert_eq!(cert.get("subject").unwrap(), "web.example");
        assert_eq!(cert.get("issuer").unwrap(), "Example CA");
        assert_eq!(cert.get("public_key_algorithm").unwrap(), "RSA");
        assert_eq!(cert.get("public_key_size").unwrap(), 4096);
        assert_eq!(cert.get("expiration_status").unwrap(), "expires >= 60 days");
        assert_eq!(cert.get("ocsp_url").unwrap(), "http://ocsp.example");
        assert!(cert.get("commonName").is_none());
    }

    #[test]
    fn services_follow_duplicate_mode() {
        let tmp = TempDir::new().unwrap();
        let run = r#"[
  {"id":"service","ip":"10.0.0.5","port":"443","severity":"INFO","finding":"HTTP"},
  {"id":"TLS1_2","ip":"10.0.0.5","port":"443","severity":"OK","finding":"offered"}
]"#;
        let a = tmp.path().join("run1.json");
        let b = tmp.path().join("run2.json");
        fs::write(&a, run).unwrap();
        fs::write(&b, run).unwrap();

        for (allow, expected) in [(true, 2), (false, 1)] {
            let mut parser = TestsslParser::new();
            parser.set_duplicates(allow);
            parser.parse(&a).unwrap();
            parser.parse(&b).unwrap();
            let records = parser.records();
            let tls12 = records
                .get(RecordType::Finding)
                .values()
                .filter(|f| f.get("name").unwrap() == "TLS1_2")
                .count();
            assert_eq!(records.len(RecordType::Service), expected, "{allow}");
            assert_eq!(tls12, expected, "{allow}");
            assert_eq!(records.len(RecordType::Host), 1);
        }
    }

    #[test]
    fn target_split() {
        assert_eq!(split_target("a.example/10.0.0.1"), ("a.example", "10.0.0.1"));
        assert_eq!(split_target("10.0.0.1"), ("", "10.0.0.1"));
    }
}
