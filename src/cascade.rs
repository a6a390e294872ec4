//! Cascading delete: remove a root record together with the records that
//! link to it.
//!
//! Dependents are discovered up front, confirmed once, then deleted one by
//! one strictly before the root. A dependent that cannot be deleted becomes
//! a warning on the report; failing to delete the root is an error.

use std::io::Write;

use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::client::Repository;
use crate::error::{HcError, Result};
use crate::index::{scan_referencing_uris, FieldPath};
use crate::model::{label_for_collection, RecordKind, COLLECTION_ACTIVITY};
use crate::parser::{extract_rkey, RecordUri};
use crate::prompt::Confirm;

/// A collection whose records are removed along with the root.
#[derive(Debug, Clone)]
pub struct Dependent {
    pub kind: RecordKind,
    pub path: FieldPath,
}

/// Dependent collections of a root collection, in deletion order.
pub fn dependents_of(collection: &str) -> Vec<Dependent> {
    if collection != COLLECTION_ACTIVITY {
        return Vec::new();
    }
    vec![
        Dependent {
            kind: RecordKind::Attachment,
            path: FieldPath::array("subjects"),
        },
        Dependent {
            kind: RecordKind::Measurement,
            path: FieldPath::single("subject"),
        },
        Dependent {
            kind: RecordKind::Evaluation,
            path: FieldPath::single("subject"),
        },
    ]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CascadeOutcome {
    Deleted,
    Aborted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependentTally {
    pub label: &'static str,
    pub collection: &'static str,
    pub found: usize,
    pub deleted: usize,
    /// Discovered URIs that did not parse and were never attempted
    pub skipped: usize,
}

#[derive(Debug, Clone)]
pub struct CascadeReport {
    pub root: String,
    pub outcome: CascadeOutcome,
    pub dependents: Vec<DependentTally>,
    pub warnings: Vec<String>,
}

impl CascadeReport {
    pub fn total_found(&self) -> usize {
        self.dependents.iter().map(|d| d.found).sum()
    }

    pub fn total_deleted(&self) -> usize {
        self.dependents.iter().map(|d| d.deleted).sum()
    }

    pub fn tally(&self, kind: RecordKind) -> Option<&DependentTally> {
        self.dependents.iter().find(|d| d.collection == kind.nsid())
    }
}

/// Delete `root_uri` from `owner`'s repository along with its dependents.
///
/// Fails with not-found when the root is missing and with `HcError::Scan`
/// when a dependent collection cannot be listed; in both cases nothing is
/// deleted. Unless `force` is set, a root with dependents needs `prompt`
/// to confirm.
pub async fn delete_with_cascade(
    repo: &dyn Repository,
    prompt: &dyn Confirm,
    out: &mut (dyn Write + Send),
    owner: &str,
    root_uri: &str,
    force: bool,
) -> Result<CascadeReport> {
    let root = RecordUri::parse(root_uri)?;
    let label = label_for_collection(&root.collection);

    repo.get_record(owner, &root.collection, &root.rkey)
        .await
        .map_err(|e| {
            if e.is_not_found() {
                HcError::not_found(label, &root.rkey)
            } else {
                e
            }
        })?;

    let dependents = dependents_of(&root.collection);
    let scans = dependents
        .iter()
        .map(|d| scan_referencing_uris(repo, owner, d.kind.nsid(), &d.path, root_uri));
    let found: Vec<Vec<String>> = join_all(scans).await.into_iter().collect::<Result<_>>()?;

    let mut report = CascadeReport {
        root: root_uri.to_string(),
        outcome: CascadeOutcome::Aborted,
        dependents: dependents
            .iter()
            .zip(&found)
            .map(|(d, uris)| DependentTally {
                label: d.kind.label(),
                collection: d.kind.nsid(),
                found: uris.len(),
                deleted: 0,
                skipped: 0,
            })
            .collect(),
        warnings: Vec::new(),
    };

    let total = report.total_found();
    debug!(root = root_uri, total, "discovered linked records");

    if !force && total > 0 {
        writeln!(out, "Will delete {label} {} and {total} linked record(s):", root.rkey)?;
        for tally in report.dependents.iter().filter(|t| t.found > 0) {
            writeln!(out, "  {} {}(s)", tally.found, tally.label)?;
        }
        if !prompt.confirm("Proceed?") {
            writeln!(out, "Aborted.")?;
            return Ok(report);
        }
    }

    for (tally, uris) in report.dependents.iter_mut().zip(&found) {
        for uri in uris {
            let Ok(target) = RecordUri::parse(uri) else {
                debug!(uri = %uri, "skipping malformed linked URI");
                tally.skipped += 1;
                continue;
            };
            match repo.delete_record(owner, &target.collection, &target.rkey).await {
                Ok(()) => tally.deleted += 1,
                Err(e) => {
                    let warning = format!("failed to delete {} {}: {e}", tally.label, extract_rkey(uri));
                    progress(out, &format!("  Warning: {warning}"));
                    report.warnings.push(warning);
                }
            }
        }
    }

    repo.delete_record(owner, &root.collection, &root.rkey)
        .await
        .map_err(|e| HcError::DeleteFailed {
            what: label.to_string(),
            source: Box::new(e),
        })?;
    report.outcome = CascadeOutcome::Deleted;

    progress(out, &format!("Deleted {label}: {}", root.rkey));
    for tally in report.dependents.iter().filter(|t| t.deleted > 0) {
        progress(out, &format!("  Deleted {} linked {}(s)", tally.deleted, tally.label));
    }

    info!(
        root = root_uri,
        dependents = report.total_deleted(),
        warnings = report.warnings.len(),
        "cascade delete finished"
    );
    Ok(report)
}

/// Output once deletion has started. A broken sink must not stop the
/// cascade half way, so write errors are only logged.
fn progress(out: &mut (dyn Write + Send), line: &str) {
    if let Err(e) = writeln!(out, "{line}") {
        warn!(error = %e, "failed to write cascade progress");
    }
}

#[derive(Debug, Default)]
pub struct BulkDeleteReport {
    pub aborted: bool,
    pub deleted: Vec<CascadeReport>,
    pub failures: Vec<(String, HcError)>,
}

/// Delete several roots behind one aggregate confirmation. Each root then
/// cascades without asking again; a failing root does not stop the rest.
pub async fn delete_many(
    repo: &dyn Repository,
    prompt: &dyn Confirm,
    out: &mut (dyn Write + Send),
    owner: &str,
    root_uris: &[String],
    item: &str,
    force: bool,
) -> Result<BulkDeleteReport> {
    let mut report = BulkDeleteReport::default();

    if !force && !prompt.confirm_bulk(root_uris.len(), item) {
        writeln!(out, "Aborted.")?;
        report.aborted = true;
        return Ok(report);
    }

    for uri in root_uris {
        match delete_with_cascade(repo, prompt, out, owner, uri, true).await {
            Ok(r) => report.deleted.push(r),
            Err(e) => {
                progress(out, &format!("  Warning: {e}"));
                report.failures.push((uri.clone(), e));
            }
        }
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn activity_dependents_delete_attachments_first() {
        let order: Vec<_> = dependents_of(COLLECTION_ACTIVITY).into_iter().map(|d| d.kind).collect();
        assert_eq!(
            order,
            vec![RecordKind::Attachment, RecordKind::Measurement, RecordKind::Evaluation]
        );
        assert_eq!(dependents_of(COLLECTION_ACTIVITY)[0].path, FieldPath::array("subjects"));
    }

    #[test]
    fn other_collections_have_no_dependents() {
        assert!(dependents_of(RecordKind::Measurement.nsid()).is_empty());
        assert!(dependents_of("com.example.thing").is_empty());
    }
}
