//! Ingest progress reporting.
//!
//! Progress goes to **stderr** so stdout stays parseable for scripts. The
//! structured log remains the authoritative record; this is a convenience
//! for interactive runs over large scan directories.

use std::io::Write;

use scan_indexer_core::models::Tool;

/// A single progress event of an ingest run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IngestProgressEvent {
    /// Input directories are being walked and files classified.
    Classifying,
    /// `n` of `total` files of `tool` have been handled.
    Parsing { tool: Tool, n: u64, total: u64 },
    /// A flush wrote `documents` documents for `tool`.
    Flushed { tool: Tool, documents: u64 },
}

pub trait IngestProgressReporter: Send + Sync {
    fn report(&self, event: IngestProgressEvent);
}

/// Human-friendly progress: "ingest nessus  parsing  3 / 12 files".
pub struct StderrProgress;

impl IngestProgressReporter for StderrProgress {
    fn report(&self, event: IngestProgressEvent) {
        let line = match &event {
            IngestProgressEvent::Classifying => "ingest  classifying...\n".to_string(),
            IngestProgressEvent::Parsing { tool, n, total } => format!(
                "ingest {}  parsing  {} / {} files\n",
                tool,
                format_number(*n),
                format_number(*total)
            ),
            IngestProgressEvent::Flushed { tool, documents } => format!(
                "ingest {}  wrote {} documents\n",
                tool,
                format_number(*documents)
            ),
        };
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// One JSON object per line on stderr.
pub struct JsonProgress;

impl IngestProgressReporter for JsonProgress {
    fn report(&self, event: IngestProgressEvent) {
        let obj = match &event {
            IngestProgressEvent::Classifying => serde_json::json!({
                "event": "progress",
                "phase": "classifying"
            }),
            IngestProgressEvent::Parsing { tool, n, total } => serde_json::json!({
                "event": "progress",
                "phase": "parsing",
                "tool": tool.as_str(),
                "n": n,
                "total": total
            }),
            IngestProgressEvent::Flushed { tool, documents } => serde_json::json!({
                "event": "progress",
                "phase": "flushed",
                "tool": tool.as_str(),
                "documents": documents
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

pub struct NoProgress;

impl IngestProgressReporter for NoProgress {
    fn report(&self, _event: IngestProgressEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI.
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn IngestProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
