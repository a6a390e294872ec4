//! Command handlers behind the `hc` binary.
//!
//! Handlers take their collaborators as trait objects and write everything
//! meant for the user to `out`, so they run the same against the network
//! clients and the in-memory fakes used by tests.

use std::io::Write;

use tracing::warn;

use crate::cascade::{delete_many, delete_with_cascade};
use crate::client::{Repository, XrpcClient};
use crate::config::Config;
use crate::constellation::LinkIndex;
use crate::context::{assemble_context, ContextOptions};
use crate::error::{HcError, Result};
use crate::index::{backlink_counts, fetch_backlink_records, tally_references, FieldPath};
use crate::model::{RecordKind, COLLECTION_ACTIVITY, COLLECTION_MEASUREMENT};
use crate::parser::{extract_rkey, resolve_record_uri, RecordUri};
use crate::prompt::Confirm;
use crate::render;
use crate::session::{self, SessionStore};

pub type Output<'a> = &'a mut (dyn Write + Send);

// ==================== Account ====================

pub async fn perform_login(
    config: &Config,
    store: &SessionStore,
    out: Output<'_>,
    identifier: &str,
    password: &str,
) -> Result<()> {
    let (_, session) = session::login(config, store, identifier, password)
        .await
        .map_err(|e| HcError::Auth(format!("login failed: {e}")))?;
    let handle = if session.handle.is_empty() {
        identifier
    } else {
        session.handle.as_str()
    };
    writeln!(out, "Logged in as {handle} ({})", session.did)?;
    Ok(())
}

pub fn perform_logout(store: &SessionStore, out: Output<'_>) -> Result<()> {
    store.wipe()?;
    writeln!(out, "Logged out")?;
    Ok(())
}

pub async fn perform_status(client: &XrpcClient, out: Output<'_>) -> Result<()> {
    let info = client.get_session().await?;
    writeln!(out, "DID:    {}", info.did)?;
    writeln!(out, "Handle: {}", info.handle)?;
    writeln!(out, "PDS:    {}", client.host())?;
    Ok(())
}

// ==================== Activities ====================

pub async fn perform_activity_list(repo: &dyn Repository, owner: &str, out: Output<'_>, json: bool) -> Result<()> {
    // counts are decoration; a failed listing only blanks the column
    let measurements = match repo.list_records(owner, COLLECTION_MEASUREMENT).await {
        Ok(entries) => entries,
        Err(e) => {
            warn!(error = %e, "could not list measurements");
            Vec::new()
        }
    };
    let counts = tally_references(&measurements, &FieldPath::single("subject"));

    let activities = repo.list_records(owner, COLLECTION_ACTIVITY).await?;

    if json {
        writeln!(out, "{}", render::pretty_json(&render::activity_list_json(&activities, &counts))?)?;
    } else {
        render::write_activity_table(out, &activities, &counts)?;
    }
    Ok(())
}

pub async fn perform_activity_get(
    repo: &dyn Repository,
    index: &dyn LinkIndex,
    owner: &str,
    id: &str,
    options: &ContextOptions,
    json: bool,
    out: Output<'_>,
) -> Result<()> {
    let uri = resolve_record_uri(owner, COLLECTION_ACTIVITY, id);
    let view = assemble_context(repo, index, owner, &uri, options).await?;

    if view.categories.is_empty() {
        writeln!(out, "{}", render::pretty_json(&render::context_summary_json(&view))?)?;
    } else if json {
        writeln!(out, "{}", render::pretty_json(&render::context_json(&view))?)?;
    } else {
        render::write_context(out, &view)?;
    }
    Ok(())
}

pub async fn perform_activity_delete(
    repo: &dyn Repository,
    prompt: &dyn Confirm,
    out: Output<'_>,
    owner: &str,
    ids: &[String],
    force: bool,
) -> Result<()> {
    let uris: Vec<String> = ids
        .iter()
        .map(|id| resolve_record_uri(owner, COLLECTION_ACTIVITY, id))
        .collect();

    match uris.as_slice() {
        [] => Err(HcError::Usage("usage: hc activity delete <id|at-uri>...".into())),
        [uri] => delete_with_cascade(repo, prompt, out, owner, uri, force).await.map(|_| ()),
        many => delete_many(repo, prompt, out, owner, many, RecordKind::Activity.label(), force)
            .await
            .map(|_| ()),
    }
}

// ==================== Records ====================

pub async fn perform_record_get(repo: &dyn Repository, uri: &str, out: Output<'_>) -> Result<()> {
    let target = RecordUri::parse(uri)?;
    let (record, _) = repo.get_record(&target.authority, &target.collection, &target.rkey).await?;
    writeln!(out, "{}", render::pretty_json(&record)?)?;
    Ok(())
}

pub async fn perform_record_list(
    repo: &dyn Repository,
    owner: &str,
    kind: RecordKind,
    json: bool,
    out: Output<'_>,
) -> Result<()> {
    let entries = repo.list_records(owner, kind.nsid()).await?;
    if json {
        writeln!(out, "{}", render::pretty_json(&entries)?)?;
    } else {
        render::write_record_table(out, &entries, kind.label())?;
    }
    Ok(())
}

/// Activities cascade; every other kind is deleted on its own.
pub async fn perform_record_delete(
    repo: &dyn Repository,
    prompt: &dyn Confirm,
    out: Output<'_>,
    owner: &str,
    kind: RecordKind,
    ids: &[String],
    force: bool,
) -> Result<()> {
    if kind == RecordKind::Activity {
        return perform_activity_delete(repo, prompt, out, owner, ids, force).await;
    }

    let label = kind.label();
    let uris: Vec<String> = ids
        .iter()
        .map(|id| resolve_record_uri(owner, kind.nsid(), id))
        .collect();

    match uris.as_slice() {
        [] => Err(HcError::Usage(format!("usage: hc record delete {label} <id|at-uri>..."))),
        [uri] => {
            if !force && !prompt.confirm(&format!("Delete {label} {}?", extract_rkey(uri))) {
                writeln!(out, "Aborted.")?;
                return Ok(());
            }
            delete_one(repo, owner, uri)
                .await
                .map_err(|e| HcError::DeleteFailed {
                    what: label.to_string(),
                    source: Box::new(e),
                })?;
            writeln!(out, "Deleted {label}: {}", extract_rkey(uri))?;
            Ok(())
        }
        many => {
            if !force && !prompt.confirm_bulk(many.len(), label) {
                writeln!(out, "Aborted.")?;
                return Ok(());
            }
            for uri in many {
                match delete_one(repo, owner, uri).await {
                    Ok(()) => writeln!(out, "Deleted {label}: {}", extract_rkey(uri))?,
                    Err(e) => writeln!(out, "  Warning: {e}")?,
                }
            }
            Ok(())
        }
    }
}

async fn delete_one(repo: &dyn Repository, owner: &str, uri: &str) -> Result<()> {
    let target = RecordUri::parse(uri)?;
    repo.delete_record(owner, &target.collection, &target.rkey).await
}

// ==================== Backlinks ====================

/// Per-collection counts, or with `collection` the linking records
/// themselves. `path` defaults to `subject`.
pub async fn perform_backlinks(
    index: &dyn LinkIndex,
    target: &str,
    collection: Option<&str>,
    path: Option<&str>,
    out: Output<'_>,
) -> Result<()> {
    RecordUri::parse(target)?;

    let Some(collection) = collection else {
        if path.is_some() {
            return Err(HcError::Usage("--path needs --collection".into()));
        }
        let counts = backlink_counts(index, target).await?;
        for (collection, count) in &counts {
            writeln!(out, "{collection:<45} {count}")?;
        }
        if counts.is_empty() {
            writeln!(out, "(none)")?;
        }
        return Ok(());
    };

    let path = match path {
        Some(p) => FieldPath::parse(p).ok_or_else(|| HcError::Usage(format!("invalid field path: {p}")))?,
        None => FieldPath::single("subject"),
    };
    let records = fetch_backlink_records(index, target, collection, &path).await?;
    for record in &records {
        writeln!(out, "{}", record.uri())?;
    }
    if records.is_empty() {
        writeln!(out, "(none)")?;
    }
    Ok(())
}
