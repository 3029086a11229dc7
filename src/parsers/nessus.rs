//! Nessus v2 export (`.nessus`) parser.
//!
//! Every finding repeats the fields of the host it was found on, which is
//! why the nessus finding index also carries the host mapping.

use std::path::Path;

use serde_json::Value;

use scan_indexer_core::models::{Record, RecordType, Tool};

use super::nmap::set_port;
use super::xml::{self, Element};
use super::{read_file, read_head, ParseError, ParserState, ScanParser};

/// `HostProperties` tag name to host field.
const HOST_TAGS: &[(&str, &str)] = &[
    ("host-fqdn", "hostname"),
    ("hostname", "hostname"),
    ("operating-system", "os"),
    ("netbios-name", "netbios_name"),
    ("mac-address", "mac_address"),
    ("HOST_START", "scan_start"),
    ("HOST_END", "scan_end"),
];

/// `ReportItem` child element to finding field.
const ITEM_TEXT: &[(&str, &str)] = &[
    ("synopsis", "synopsis"),
    ("description", "description"),
    ("solution", "solution"),
    ("risk_factor", "risk_factor"),
    ("plugin_output", "plugin_output"),
    ("see_also", "see_also"),
    ("exploit_available", "exploit_available"),
];

const ITEM_SCORES: &[&str] = &["cvss_base_score", "cvss3_base_score"];

pub struct NessusParser {
    state: ParserState,
}

impl NessusParser {
    pub fn new() -> Self {
        Self {
            state: ParserState::new(Tool::Nessus),
        }
    }

    fn parse_host(&mut self, path: &Path, report_host: &Element) {
        let tags: Vec<(&str, &str)> = report_host
            .child("HostProperties")
            .map(|props| {
                props
                    .children_named("tag")
                    .map(|t| (t.attr_str("name"), t.text.trim()))
                    .collect()
            })
            .unwrap_or_default();
        let tag = |name: &str| {
            tags.iter()
                .find(|(k, _)| *k == name)
                .map(|(_, v)| *v)
                .unwrap_or("")
        };

        let ip = match tag("host-ip") {
            "" => report_host.attr_str("name"),
            ip => ip,
        };
        if ip.is_empty() {
            return;
        }

        let mut host = Record::new(self.state.stable_identity(RecordType::Host, &[ip]))
            .with_field("ip", ip);
        for &(tag_name, field) in HOST_TAGS {
            if host.get(field).is_none() {
                host.set_non_empty(field, tag(tag_name));
            }
        }

        for item in report_host.children_named("ReportItem") {
            self.parse_item(path, ip, &host, item);
        }
        self.state.records.insert(RecordType::Host, host);
    }

    fn parse_item(&mut self, path: &Path, ip: &str, host: &Record, item: &Element) {
        let port = item.attr_str("port");
        let protocol = item.attr_str("protocol");
        let service_name = item.attr_str("svc_name");
        let plugin_id = item.attr_str("pluginID");

        let mut finding = Record::new(self.state.identity(
            RecordType::Finding,
            path,
            &[ip, protocol, port, plugin_id],
        ));
        for (key, value) in host.fields() {
            finding.set(key.clone(), value.clone());
        }
        set_port(&mut finding, port);
        finding.set_non_empty("protocol", protocol);
        finding.set_non_empty("service", service_name);
        finding.set_non_empty("plugin_id", plugin_id);
        finding.set_non_empty("name", item.attr_str("pluginName"));
        finding.set_non_empty("plugin_family", item.attr_str("pluginFamily"));
        if let Ok(severity) = item.attr_str("severity").parse::<u64>() {
            finding.set("severity", severity);
        }
        for &(element, field) in ITEM_TEXT {
            finding.set_non_empty(field, item.child_text(element));
        }
        for &score in ITEM_SCORES {
            if let Ok(value) = item.child_text(score).parse::<f64>() {
                finding.set(score, value);
            }
        }
        let cves: Vec<Value> = item
            .children_named("cve")
            .map(|c| Value::String(c.text.trim().to_string()))
            .collect();
        if !cves.is_empty() {
            finding.set("cve", cves);
        }
        self.state.records.insert(RecordType::Finding, finding);

        // Port 0 carries host-level plugins, not a service.
        if !port.is_empty() && port != "0" {
            let mut service = Record::new(
                self.state
                    .stable_identity(RecordType::Service, &[ip, protocol, port]),
            )
            .with_field("ip", ip);
            if let Some(hostname) = host.get("hostname") {
                service.set("hostname", hostname.clone());
            }
            set_port(&mut service, port);
            service.set_non_empty("protocol", protocol);
            service.set_non_empty("service", service_name);
            self.state.records.insert(RecordType::Service, service);
        }
    }
}

impl Default for NessusParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ScanParser for NessusParser {
    fn tool(&self) -> Tool {
        Tool::Nessus
    }

    fn is_valid_file(&self, path: &Path) -> bool {
        read_head(path).is_some_and(|head| head.contains("<NessusClientData_v2"))
    }

    fn parse(&mut self, path: &Path) -> Result<(), ParseError> {
        let content = read_file(path)?;
        let root =
            xml::parse(&content).map_err(|e| ParseError::malformed(Tool::Nessus, path, e))?;
        if root.name != "NessusClientData_v2" {
            return Err(ParseError::malformed(
                Tool::Nessus,
                path,
                format!("unexpected root element <{}>", root.name),
            ));
        }
        for report_host in root.descendants_named("ReportHost") {
            self.parse_host(path, report_host);
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
