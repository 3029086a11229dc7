//! Post-ingestion cross-checks.
//!
//! A check compares counts in a tool's freshly written indices to catch a
//! known class of malformed or mis-versioned scanner output. Mismatches
//! and store errors other than connectivity are logged as warnings and
//! never fail the run; only a store that cannot be reached is reported back
//! to the caller.

use tracing::{debug, warn};

use scan_indexer_core::models::RecordType;
use scan_indexer_core::store::{Store, StoreError};

use crate::handlers;
use crate::index::ToolIndices;

/// A tool-specific invariant over indexed counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SanityCheck {
    /// Every service must carry exactly one finding matching
    /// `finding_query`. testssl run in the wrong mode (e.g. several
    /// targets appended to one file without `--append`) breaks this.
    ProtocolPerService { finding_query: &'static str },
}

/// Outcome of a check that ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SanityOutcome {
    /// The tool has no check.
    Skipped,
    Passed,
    Mismatch { expected: u64, actual: u64 },
    /// The store could not answer the check's queries.
    Failed { reason: String },
}

/// Run the check registered for `indices.tool`, if any.
pub async fn check<S: Store + ?Sized>(
    store: &S,
    indices: &ToolIndices,
) -> Result<SanityOutcome, StoreError> {
    let tool = indices.tool;
    let Some(check) = handlers::handler(tool).sanity else {
        debug!(%tool, "No sanity check defined");
        return Ok(SanityOutcome::Skipped);
    };

    match check {
        SanityCheck::ProtocolPerService { finding_query } => {
            let counts = async {
                let findings = store
                    .count(indices.name(RecordType::Finding), finding_query)
                    .await?;
                let services = store
                    .count(indices.name(RecordType::Service), "*")
                    .await?;
                Ok::<_, StoreError>((findings, services))
            };
            let (findings, services) = match counts.await {
                Ok(counts) => counts,
                Err(e) if e.is_connection() => return Err(e),
                Err(e) => {
                    warn!(
                        %tool,
                        index = indices.name(RecordType::Finding),
                        error = %e,
                        "Sanity check failed"
                    );
                    return Ok(SanityOutcome::Failed {
                        reason: e.to_string(),
                    });
                }
            };

            if findings == services {
                debug!(%tool, services, "Sanity check passed");
                return Ok(SanityOutcome::Passed);
            }
            warn!(
                %tool,
                index = indices.name(RecordType::Finding),
                services,
                findings,
                query = finding_query,
                "Wrong {tool} format detected: found {services} services and {findings} \
                 findings matching \"{finding_query}\". Check the manual on how to run {tool}"
            );
            Ok(SanityOutcome::Mismatch {
                expected: services,
                actual: findings,
            })
        }
    }
}
