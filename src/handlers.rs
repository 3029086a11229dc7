//! Tool registry.
//!
//! One [`ToolHandler`] per [`Tool`], in [`Tool::ALL`] order. A handler
//! bundles what differs between tools: how to build its parser, which
//! sanity check (if any) runs after ingestion, and mapping quirks.

use scan_indexer_core::models::Tool;

use crate::parsers::nessus::NessusParser;
use crate::parsers::nmap::NmapParser;
use crate::parsers::pem::PemParser;
use crate::parsers::sslscan::SslscanParser;
use crate::parsers::sslyze::SslyzeParser;
use crate::parsers::testssl::TestsslParser;
use crate::parsers::ScanParser;
use crate::sanity::SanityCheck;

pub struct ToolHandler {
    pub tool: Tool,
    pub new_parser: fn() -> Box<dyn ScanParser>,
    pub sanity: Option<SanityCheck>,
    /// Layer the tool's host mapping underneath its finding mapping.
    pub finding_includes_host: bool,
}

static HANDLERS: [ToolHandler; 6] = [
    ToolHandler {
        tool: Tool::Nmap,
        new_parser: || Box::new(NmapParser::new()),
        sanity: None,
        finding_includes_host: false,
    },
    ToolHandler {
        tool: Tool::Nessus,
        new_parser: || Box::new(NessusParser::new()),
        sanity: None,
        finding_includes_host: true,
    },
    ToolHandler {
        tool: Tool::Testssl,
        new_parser: || Box::new(TestsslParser::new()),
        sanity: Some(SanityCheck::ProtocolPerService {
            finding_query: "name:TLS1_2",
        }),
        finding_includes_host: false,
    },
    ToolHandler {
        tool: Tool::Sslyze,
        new_parser: || Box::new(SslyzeParser::new()),
        sanity: None,
        finding_includes_host: false,
    },
    ToolHandler {
        tool: Tool::Sslscan,
        new_parser: || Box::new(SslscanParser::new()),
        sanity: None,
        finding_includes_host: false,
    },
    ToolHandler {
        tool: Tool::Pem,
        new_parser: || Box::new(PemParser::new()),
        sanity: None,
        finding_includes_host: false,
    },
];

pub fn handler(tool: Tool) -> &'static ToolHandler {
    &HANDLERS[tool.index()]
}

/// Fresh parsers for every tool, in probing order.
pub fn all_parsers() -> Vec<Box<dyn ScanParser>> {
    HANDLERS.iter().map(|h| (h.new_parser)()).collect()
}
