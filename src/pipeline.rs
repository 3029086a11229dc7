//! Ingestion pipeline orchestration.
//!
//! ```text
//! Idle → Classifying → { per tool: IndexInit → Parsing ⇄ Flushing } → SanityChecking → Done
//! ```
//!
//! Mapping composition and classification both finish before the store is
//! touched, so configuration problems and empty inputs fail without side
//! effects. Tools are processed strictly one after another; each tool's
//! indices are recreated before its first file is parsed. Parsed records
//! accumulate in the parser until any one collection exceeds the bulk size,
//! at which point all five collections are flushed and the parser cleared.
//!
//! A store error at any point ends the run. Nothing is retried.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::{debug, error, info, warn};

use scan_indexer_core::bulk::{BulkIngester, IngestError};
use scan_indexer_core::mapping::ToolSchema;
use scan_indexer_core::models::{RecordType, Tool};
use scan_indexer_core::store::{Store, StoreError};

use crate::classify::{classify, ExtensionFilter};
use crate::handlers;
use crate::index::{init_tool_indices, ToolIndices};
use crate::mappings::MappingComposer;
use crate::parsers::RecordSet;
use crate::progress::{IngestProgressEvent, IngestProgressReporter};
use crate::sanity::{self, SanityOutcome};

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("configuration error: {0:#}")]
    Config(anyhow::Error),

    #[error("invalid project name '{0}': use only letters, digits, '_' and '-'")]
    InvalidProject(String),

    #[error("no relevant files detected")]
    NoRelevantFiles,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Ingest(#[from] IngestError),
}

impl PipelineError {
    /// Whether the run ended because the store could not be reached.
    pub fn is_connection(&self) -> bool {
        match self {
            PipelineError::Store(e) => e.is_connection(),
            PipelineError::Ingest(e) => e.is_connection(),
            _ => false,
        }
    }
}

/// Project names become part of index names.
pub fn validate_project_name(project: &str) -> Result<(), PipelineError> {
    let valid = !project.is_empty()
        && project
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(PipelineError::InvalidProject(project.to_string()))
    }
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub project: String,
    pub dirs: Vec<PathBuf>,
    /// Keep one document per source file for the same logical finding.
    pub allow_duplicates: bool,
    pub filter: ExtensionFilter,
    pub bulk_size: usize,
    pub log_data_inserts: bool,
}

impl RunOptions {
    pub fn new(project: impl Into<String>, dirs: Vec<PathBuf>) -> Self {
        Self {
            project: project.into(),
            dirs,
            allow_duplicates: true,
            filter: ExtensionFilter::default(),
            bulk_size: scan_indexer_core::bulk::DEFAULT_BULK_SIZE,
            log_data_inserts: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ToolSummary {
    pub tool: Tool,
    pub files: usize,
    pub parsed: usize,
    pub skipped: usize,
    /// Documents written per record type, across all flushes.
    pub written: BTreeMap<RecordType, usize>,
    pub flushes: usize,
    pub sanity: SanityOutcome,
}

#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub classified: usize,
    pub unrecognized: usize,
    pub missing_dirs: usize,
    pub tools: Vec<ToolSummary>,
}

/// Run one ingestion over `options.dirs` into `store`.
pub async fn run_ingest<S: Store + ?Sized>(
    store: &S,
    composer: &MappingComposer,
    options: &RunOptions,
    progress: &dyn IngestProgressReporter,
) -> Result<RunSummary, PipelineError> {
    validate_project_name(&options.project)?;

    let mut schemas: BTreeMap<Tool, ToolSchema> = BTreeMap::new();
    for tool in Tool::ALL {
        let schema = composer.tool_schema(tool).map_err(PipelineError::Config)?;
        schemas.insert(tool, schema);
    }

    progress.report(IngestProgressEvent::Classifying);
    let probes = handlers::all_parsers();
    let classification = classify(&options.dirs, &options.filter, |path| {
        probes
            .iter()
            .find(|parser| parser.is_valid_file(path))
            .map(|parser| parser.tool())
    });
    let mut summary = RunSummary {
        classified: classification.total(),
        unrecognized: classification.unrecognized.len(),
        missing_dirs: classification.missing_dirs.len(),
        tools: Vec::new(),
    };
    if summary.classified == 0 {
        error!(dirs = ?options.dirs, "No relevant files detected");
        return Err(PipelineError::NoRelevantFiles);
    }
    info!(
        files = summary.classified,
        unrecognized = summary.unrecognized,
        "Classified input files"
    );

    let ingester =
        BulkIngester::new(store, options.bulk_size).log_data_inserts(options.log_data_inserts);

    for tool in Tool::ALL {
        let files: Vec<&PathBuf> = classification.files_for(tool).collect();
        if files.is_empty() {
            debug!(%tool, "No files for tool");
            continue;
        }
        let Some(schema) = schemas.get(&tool) else {
            continue;
        };
        let tool_summary =
            ingest_tool(store, &ingester, tool, schema, &files, options, progress).await?;
        summary.tools.push(tool_summary);
    }

    Ok(summary)
}

async fn ingest_tool<S: Store + ?Sized>(
    store: &S,
    ingester: &BulkIngester<'_, S>,
    tool: Tool,
    schema: &ToolSchema,
    files: &[&PathBuf],
    options: &RunOptions,
    progress: &dyn IngestProgressReporter,
) -> Result<ToolSummary, PipelineError> {
    info!(%tool, files = files.len(), "Processing files");

    let mut parser = (handlers::handler(tool).new_parser)();
    parser.set_duplicates(options.allow_duplicates);

    let indices = ToolIndices::new(tool, &options.project);
    init_tool_indices(store, &indices, schema).await?;

    let mut summary = ToolSummary {
        tool,
        files: files.len(),
        parsed: 0,
        skipped: 0,
        written: BTreeMap::new(),
        flushes: 0,
        sanity: SanityOutcome::Skipped,
    };

    let total = files.len() as u64;
    for (n, path) in files.iter().enumerate() {
        let handled = parse_file(parser.as_mut(), tool, path);
        progress.report(IngestProgressEvent::Parsing {
            tool,
            n: n as u64 + 1,
            total,
        });
        if !handled {
            summary.skipped += 1;
            continue;
        }
        summary.parsed += 1;

        if parser.records().largest() > ingester.bulk_size() {
            debug!(%tool, path = %path.display(), "Collection above bulk size, flushing");
            flush(ingester, &indices, parser.records(), &mut summary, progress).await?;
            parser.clear();
        }
    }

    flush(ingester, &indices, parser.records(), &mut summary, progress).await?;
    parser.clear();

    summary.sanity = sanity::check(store, &indices).await?;
    Ok(summary)
}

/// Parse one file into `parser`. Parse failures are logged and the file is
/// skipped; they never end the run.
fn parse_file(parser: &mut dyn crate::parsers::ScanParser, tool: Tool, path: &Path) -> bool {
    if !parser.is_valid_file(path) {
        warn!(%tool, path = %path.display(), "File does not look like {tool} output, skipping");
        return false;
    }
    match parser.parse(path) {
        Ok(()) => {
            info!(%tool, path = %path.display(), "Parsed file");
            true
        }
        Err(e) => {
            error!(%tool, path = %path.display(), error = %e, "Error while parsing file");
            false
        }
    }
}

/// Write every non-empty collection to its index. An empty record set is
/// not a flush.
async fn flush<S: Store + ?Sized>(
    ingester: &BulkIngester<'_, S>,
    indices: &ToolIndices,
    records: &RecordSet,
    summary: &mut ToolSummary,
    progress: &dyn IngestProgressReporter,
) -> Result<(), IngestError> {
    if records.is_empty() {
        return Ok(());
    }
    let mut documents = 0;
    for (record_type, index) in indices.iter() {
        let collection = records.get(record_type);
        if collection.is_empty() {
            continue;
        }
        let report = ingester.ingest(index, collection.values()).await?;
        *summary.written.entry(record_type).or_default() += report.records;
        documents += report.records as u64;
    }
    summary.flushes += 1;
    progress.report(IngestProgressEvent::Flushed {
        tool: indices.tool,
        documents,
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn project_names() {
        for ok in ["acme", "acme_2024", "q3-pentest", "A1"] {
            assert!(validate_project_name(ok).is_ok(), "{ok}");
        }
        for bad in ["", "acme corp", "../etc", "a.b", "proj*", "ünï"] {
            assert!(
                matches!(
                    validate_project_name(bad),
                    Err(PipelineError::InvalidProject(_))
                ),
                "{bad}"
            );
        }
    }

    #[test]
    fn connection_errors_are_recognised_through_wrappers() {
        let err = PipelineError::from(StoreError::Connection("refused".into()));
        assert!(err.is_connection());
        let err = PipelineError::from(IngestError::Store(StoreError::Connection("x".into())));
        assert!(err.is_connection());
        let err = PipelineError::from(IngestError::BulkWrite {
            index: "i".into(),
            detail: "d".into(),
        });
        assert!(!err.is_connection());
        assert!(!PipelineError::NoRelevantFiles.is_connection());
    }
}
