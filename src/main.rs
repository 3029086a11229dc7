//! # scan-indexer CLI (`scanidx`)
//!
//! Classifies security scanner output, parses it, and writes it into
//! per-project Elasticsearch indices.
//!
//! ## Usage
//!
//! ```bash
//! scanidx --config ./config/scanidx.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `scanidx ingest -p <project> -d <dir>...` | Classify, parse, and index scan results |
//! | `scanidx delete -p <project>` | Delete every index of a project |
//! | `scanidx delete --all` | Delete every index created by scan-indexer |
//! | `scanidx indices [-p <project>]` | List scan-indexer indices |
//!
//! ## Examples
//!
//! ```bash
//! # Ingest two result directories for project "acme"
//! scanidx ingest -p acme -d ./results/external -d ./results/internal
//!
//! # Only index .xml and .nessus files, collapse repeated findings
//! scanidx ingest -p acme -d ./results --include-ext "xml,nessus" --no-duplicates
//!
//! # Drop the project again
//! scanidx delete -p acme
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use scan_indexer::classify::{parse_extension_list, ExtensionFilter};
use scan_indexer::config::{self, Config, ConfigRoots};
use scan_indexer::elasticsearch::ElasticsearchStore;
use scan_indexer::maintenance::{self, DeleteScope};
use scan_indexer::mappings::MappingComposer;
use scan_indexer::pipeline::{self, PipelineError, RunOptions, RunSummary};
use scan_indexer::progress::ProgressMode;

/// scan-indexer: index security scanner output into Elasticsearch.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. A missing file means built-in defaults.
#[derive(Parser)]
#[command(
    name = "scanidx",
    about = "Index nmap, nessus, testssl, sslyze, sslscan and PEM output into Elasticsearch",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/scanidx.toml")]
    config: PathBuf,

    /// Debug logging for scan-indexer itself.
    #[arg(long, global = true)]
    debug: bool,

    /// Debug logging for the HTTP client talking to the store.
    #[arg(long, global = true)]
    debug_store: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Classify, parse, and index all scan results under the given
    /// directories.
    ///
    /// Every tool with at least one recognised file has its indices for the
    /// project dropped and recreated before its files are written.
    Ingest {
        /// Project name. Letters, digits, '_' and '-' only.
        #[arg(short, long)]
        project: String,

        /// Directory to scan recursively. Repeatable.
        #[arg(short, long = "dir", required = true, num_args = 1..)]
        dirs: Vec<PathBuf>,

        /// Collapse the same finding seen in several files into one document.
        #[arg(long)]
        no_duplicates: bool,

        /// Additional extensions to ignore, space- or comma-separated.
        #[arg(long = "ignore-ext", num_args = 1..)]
        ignore_ext: Vec<String>,

        /// Only consider these extensions, space- or comma-separated.
        /// Overrides the ignore list.
        #[arg(long = "include-ext", num_args = 1..)]
        include_ext: Vec<String>,

        /// Progress on stderr. Defaults to human output on a terminal.
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },

    /// Delete indices of one project, or of all projects.
    ///
    /// Asks for confirmation unless `--yes` is given.
    Delete {
        #[arg(short, long, conflicts_with = "all", required_unless_present = "all")]
        project: Option<String>,

        /// Delete every index created by scan-indexer.
        #[arg(long)]
        all: bool,

        /// Do not ask for confirmation.
        #[arg(short, long)]
        yes: bool,
    },

    /// List scan-indexer indices.
    Indices {
        #[arg(short, long)]
        project: Option<String>,
    },
}

fn init_tracing(debug: bool, debug_store: bool) {
    let level = if debug { "debug" } else { "info" };
    let mut default = format!("scan_indexer={level},scan_indexer_core={level}");
    if debug_store {
        default.push_str(",reqwest=debug,hyper_util=debug");
    }
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.debug, cli.debug_store);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            match e.downcast_ref::<PipelineError>() {
                Some(p) if p.is_connection() => error!(error = %p, "Unable to connect to store"),
                Some(p) => error!(error = %p, "Ingestion failed"),
                None => error!(error = %format!("{e:#}"), "Command failed"),
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let (cfg, roots) = config::load_config(&cli.config)?;
    let store = ElasticsearchStore::new(&cfg.store.url)?;

    match cli.command {
        Commands::Ingest {
            project,
            dirs,
            no_duplicates,
            ignore_ext,
            include_ext,
            progress,
        } => {
            let options = RunOptions {
                project,
                dirs,
                allow_duplicates: !no_duplicates,
                filter: ExtensionFilter::new(
                    parse_extension_list(&ignore_ext),
                    parse_extension_list(&include_ext),
                ),
                bulk_size: cfg.ingest.bulk_size,
                log_data_inserts: cfg.ingest.log_data_inserts,
            };
            let composer = composer(&cfg, &roots);
            let reporter = progress
                .unwrap_or_else(ProgressMode::default_for_tty)
                .reporter();
            let summary =
                pipeline::run_ingest(&store, &composer, &options, reporter.as_ref()).await?;
            print_summary(&options.project, &summary);
        }
        Commands::Delete { project, all, yes } => {
            let scope = match (project, all) {
                (_, true) => DeleteScope::All,
                (Some(project), false) => {
                    pipeline::validate_project_name(&project)?;
                    DeleteScope::Project(project)
                }
                (None, false) => anyhow::bail!("either --project or --all is required"),
            };
            let deleted = maintenance::delete_indices(&store, &scope, yes).await?;
            println!("deleted {} indices", deleted.len());
        }
        Commands::Indices { project } => {
            for name in maintenance::list_indices(&store, project.as_deref()).await? {
                println!("{name}");
            }
        }
    }
    Ok(())
}

fn composer(cfg: &Config, roots: &ConfigRoots) -> MappingComposer {
    MappingComposer::new(cfg.mappings_dir(roots), roots.user.clone())
}

fn print_summary(project: &str, summary: &RunSummary) {
    println!("ingest {}", project);
    println!("  files classified: {}", summary.classified);
    if summary.unrecognized > 0 {
        println!("  files unrecognized: {}", summary.unrecognized);
    }
    for tool in &summary.tools {
        let written: usize = tool.written.values().sum();
        println!(
            "  {}: {} files, {} parsed, {} skipped, {} documents",
            tool.tool, tool.files, tool.parsed, tool.skipped, written
        );
    }
    println!("ok");
}
