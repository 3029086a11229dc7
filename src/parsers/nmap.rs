//! nmap XML (`-oX`) parser.

use std::path::Path;

use scan_indexer_core::models::{Record, RecordType, Tool};

use super::xml::{self, Element};
use super::{read_file, read_head, ParseError, ParserState, ScanParser};

pub struct NmapParser {
    state: ParserState,
}

impl NmapParser {
    pub fn new() -> Self {
        Self {
            state: ParserState::new(Tool::Nmap),
        }
    }

    fn parse_host(&mut self, path: &Path, host: &Element) {
        let Some(ip) = host_ip(host) else {
            return;
        };
        let hostnames: Vec<String> = host
            .descendants_named("hostname")
            .iter()
            .map(|h| h.attr_str("name").to_string())
            .filter(|n| !n.is_empty())
            .collect();
        let first_hostname = hostnames.first().cloned().unwrap_or_default();

        let mut record = Record::new(self.state.stable_identity(RecordType::Host, &[ip]))
            .with_field("ip", ip);
        if !hostnames.is_empty() {
            record.set("hostnames", hostnames);
        }
        if let Some(status) = host.child("status") {
            record.set_non_empty("status", status.attr_str("state"));
        }
        // nmap lists OS guesses best match first.
        if let Some(os) = host.descendants_named("osmatch").first() {
            record.set_non_empty("os", os.attr_str("name"));
        }
        self.state.records.insert(RecordType::Host, record);

        for port in host.descendants_named("port") {
            self.parse_port(path, ip, &first_hostname, port);
        }
        for script in host
            .child("hostscript")
            .map(|s| s.children_named("script").collect::<Vec<_>>())
            .unwrap_or_default()
        {
            let finding = self.script_finding(path, ip, &first_hostname, None, script);
            self.state.records.insert(RecordType::Finding, finding);
        }
    }

    fn parse_port(&mut self, path: &Path, ip: &str, hostname: &str, port: &Element) {
        let number = port.attr_str("portid");
        let protocol = port.attr_str("protocol");
        let mut service = Record::new(
            self.state
                .stable_identity(RecordType::Service, &[ip, protocol, number]),
        )
        .with_field("ip", ip)
        .with_field("protocol", protocol);
        service.set_non_empty("hostname", hostname);
        set_port(&mut service, number);
        if let Some(state) = port.child("state") {
            service.set_non_empty("state", state.attr_str("state"));
        }
        if let Some(svc) = port.child("service") {
            service.set_non_empty("service", svc.attr_str("name"));
            service.set_non_empty("product", svc.attr_str("product"));
            service.set_non_empty("version", svc.attr_str("version"));
            if svc.attr("tunnel") == Some("ssl") {
                service.set("tls", true);
            }
        }
        self.state.records.insert(RecordType::Service, service);

        for script in port.children_named("script") {
            let finding =
                self.script_finding(path, ip, hostname, Some((protocol, number)), script);
            self.state.records.insert(RecordType::Finding, finding);
        }
    }

    fn script_finding(
        &self,
        path: &Path,
        ip: &str,
        hostname: &str,
        port: Option<(&str, &str)>,
        script: &Element,
    ) -> Record {
        let name = script.attr_str("id");
        let (protocol, number) = port.unwrap_or(("", ""));
        let mut finding = Record::new(self.state.identity(
            RecordType::Finding,
            path,
            &[ip, protocol, number, name],
        ))
        .with_field("ip", ip)
        .with_field("name", name);
        finding.set_non_empty("hostname", hostname);
        finding.set_non_empty("protocol", protocol);
        set_port(&mut finding, number);
        finding.set_non_empty("finding", script.attr_str("output").trim());
        finding
    }
}

impl Default for NmapParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ScanParser for NmapParser {
    fn tool(&self) -> Tool {
        Tool::Nmap
    }

    fn is_valid_file(&self, path: &Path) -> bool {
        read_head(path).is_some_and(|head| head.contains("<nmaprun"))
    }

    fn parse(&mut self, path: &Path) -> Result<(), ParseError> {
        let content = read_file(path)?;
        let root = xml::parse(&content).map_err(|e| ParseError::malformed(Tool::Nmap, path, e))?;
        if root.name != "nmaprun" {
            return Err(ParseError::malformed(
                Tool::Nmap,
                path,
                format!("unexpected root element <{}>", root.name),
            ));
        }
        for host in root.children_named("host") {
            self.parse_host(path, host);
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

fn host_ip(host: &Element) -> Option<&str> {
    host.children_named("address")
        .find(|a| matches!(a.attr("addrtype"), Some("ipv4") | Some("ipv6")))
        .map(|a| a.attr_str("addr"))
        .filter(|ip| !ip.is_empty())
}

/// Store ports as numbers where they parse, as text otherwise.
pub(crate) fn set_port(record: &mut Record, port: &str) {
    match port.parse::<u64>() {
        Ok(n) => record.set("port", n),
        Err(_) => record.set_non_empty("port", port),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const SCAN: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE nmaprun>
<nmaprun scanner="nmap" args="nmap -sV -oX scan.xml 10.0.0.0/30" version="7.94">
  <host>
    <status state="up" reason="echo-reply"/>
    <address addr="10.0.0.1" addrtype="ipv4"/>
    <address addr="00:11:22:33:44:55" addrtype="mac"/>
    <hostnames><hostname name="gw.example" type="PTR"/></hostnames>
    <ports>
      <port protocol="tcp" portid="22">
        <state state="open" reason="syn-ack"/>
        <service name="ssh" product="OpenSSH" version="8.9p1"/>
        <script id="ssh-hostkey" output="2048 aa:bb (RSA)"/>
      </port>
      <port protocol="tcp" portid="443">
        <state state="open" reason="syn-ack"/>
        <service name="http" tunnel="ssl" product="nginx"/>
      </port>
    </ports>
    <os><osmatch name="Linux 5.0 - 5.14" accuracy="98"/><osmatch name="Linux 4.15" accuracy="90"/></os>
  </host>
  <host>
    <status state="down"/>
    <address addr="10.0.0.2" addrtype="ipv4"/>
  </host>
</nmaprun>
"#;

    fn write(dir: &TempDir, name: &str, content: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn parses_hosts_services_and_script_findings() {
        let tmp = TempDir::new().unwrap();
        let path = write(&tmp, "scan.xml", SCAN);
        let mut parser = NmapParser::new();
        assert!(parser.is_valid_file(&path));
        parser.parse(&path).unwrap();

        let records = parser.records();
        assert_eq!(records.len(RecordType::Host), 2);
        assert_eq!(records.len(RecordType::Service), 2);
        assert_eq!(records.len(RecordType::Finding), 1);

        let host = records
            .get(RecordType::Host)
            .values()
            .find(|h| h.get("ip").unwrap() == "10.0.0.1")
            .unwrap();
        assert_eq!(host.get("os").unwrap(), "Linux 5.0 - 5.14");
        assert_eq!(host.get("status").unwrap(), "up");
        assert_eq!(host.get("hostnames").unwrap()[0], "gw.example");

        let ssh = records
            .get(RecordType::Service)
            .values()
            .find(|s| s.get("port").unwrap() == 22)
            .unwrap();
        assert_eq!(ssh.get("product").unwrap(), "OpenSSH");
        assert_eq!(ssh.get("version").unwrap(), "8.9p1");
        assert_eq!(ssh.get("state").unwrap(), "open");

        let finding = records.get(RecordType::Finding).values().next().unwrap();
        assert_eq!(finding.get("name").unwrap(), "ssh-hostkey");
        assert_eq!(finding.get("port").unwrap(), 22);
    }

    #[test]
    fn hosts_collapse_across_files() {
        let tmp = TempDir::new().unwrap();
        let a = write(&tmp, "a.xml", SCAN);
        let b = write(&tmp, "b.xml", SCAN);
        let mut parser = NmapParser::new();
        parser.parse(&a).unwrap();
        parser.parse(&b).unwrap();
        assert_eq!(parser.records().len(RecordType::Host), 2);
        assert_eq!(parser.records().len(RecordType::Service), 2);
        // Findings keep one document per source file unless duplicates are off.
        assert_eq!(parser.records().len(RecordType::Finding), 2);
    }

    #[test]
    fn rejects_other_xml() {
        let tmp = TempDir::new().unwrap();
        let path = write(&tmp, "other.xml", "<document title=\"x\"/>");
        let mut parser = NmapParser::new();
        assert!(!parser.is_valid_file(&path));
        assert!(matches!(
            parser.parse(&path),
            Err(ParseError::Malformed { tool: Tool::Nmap, .. })
        ));
    }
}
