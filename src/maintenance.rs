//! Index maintenance: listing and deleting this tool's indices.
//!
//! Only names of the form `<record type>_<tool>_<project>` are ever
//! selected, so unrelated indices on a shared cluster are left alone.

use std::io::{BufRead, Write};

use anyhow::{bail, Context, Result};
use tracing::info;

use scan_indexer_core::models::parse_index_name;
use scan_indexer_core::store::Store;

/// Which indices a delete applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteScope {
    Project(String),
    All,
}

impl DeleteScope {
    fn describe(&self) -> String {
        match self {
            DeleteScope::Project(project) => format!("all indices of project '{project}'"),
            DeleteScope::All => "ALL scan-indexer indices".to_string(),
        }
    }
}

/// Indices created by this tool, optionally restricted to one project.
pub fn select_indices(names: &[String], project: Option<&str>) -> Vec<String> {
    let mut selected: Vec<String> = names
        .iter()
        .filter(|name| match parse_index_name(name) {
            Some((_, _, p)) => project.map_or(true, |want| p == want),
            None => false,
        })
        .cloned()
        .collect();
    selected.sort();
    selected
}

/// Ask `prompt` on `output` and read a y/yes answer from `input`.
pub fn confirm<R: BufRead, W: Write>(prompt: &str, input: &mut R, output: &mut W) -> Result<bool> {
    write!(output, "{prompt} [y/N] ")?;
    output.flush()?;
    let mut answer = String::new();
    input
        .read_line(&mut answer)
        .context("Failed to read confirmation")?;
    let answer = answer.trim().to_lowercase();
    Ok(answer == "y" || answer == "yes")
}

pub async fn list_indices<S: Store + ?Sized>(store: &S, project: Option<&str>) -> Result<Vec<String>> {
    let names = store.list_indices().await?;
    Ok(select_indices(&names, project))
}

/// Delete the indices in `scope`. Without `assume_yes` the user must
/// confirm interactively; a non-interactive stdin is refused.
pub async fn delete_indices<S: Store + ?Sized>(
    store: &S,
    scope: &DeleteScope,
    assume_yes: bool,
) -> Result<Vec<String>> {
    let project = match scope {
        DeleteScope::Project(p) => Some(p.as_str()),
        DeleteScope::All => None,
    };
    let targets = list_indices(store, project).await?;
    if targets.is_empty() {
        info!(scope = %scope.describe(), "No matching indices");
        return Ok(targets);
    }

    if !assume_yes {
        if !atty::is(atty::Stream::Stdin) {
            bail!("Refusing to delete without confirmation: stdin is not a terminal (use --yes)");
        }
        let stdin = std::io::stdin();
        let mut stderr = std::io::stderr();
        for name in &targets {
            writeln!(stderr, "  {name}")?;
        }
        let prompt = format!("Delete {} ({} indices)?", scope.describe(), targets.len());
        if !confirm(&prompt, &mut stdin.lock(), &mut stderr)? {
            info!("Delete aborted");
            return Ok(Vec::new());
        }
    }

    delete_all(store, &targets).await?;
    Ok(targets)
}

async fn delete_all<S: Store + ?Sized>(store: &S, targets: &[String]) -> Result<()> {
    for index in targets {
        store
            .delete_index(index)
            .await
            .with_context(|| format!("Failed to delete index {index}"))?;
        info!(index = %index, "Deleted index");
    }
    Ok(())
}
