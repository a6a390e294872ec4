use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde_json::Value;
use tracing::{debug, warn};

use crate::client::Repository;
use crate::constellation::{LinkIndex, LinkingRecord};
use crate::error::{HcError, Result};
use crate::model::{field_array, ref_uri, Record, RecordEntry};

/// Page size for remote index queries.
pub const INDEX_PAGE_LIMIT: usize = 100;

/// Where a strong reference lives on a referencing record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldPath {
    /// `record.<field>.uri`
    SingleRef { field: String },

    /// `record.<field>[].uri`, or `record.<field>[].<nested>.uri` when the
    /// array elements wrap the reference in another object.
    ArrayRef { field: String, nested: Option<String> },
}

impl FieldPath {
    pub fn single(field: impl Into<String>) -> Self {
        FieldPath::SingleRef { field: field.into() }
    }

    pub fn array(field: impl Into<String>) -> Self {
        FieldPath::ArrayRef {
            field: field.into(),
            nested: None,
        }
    }

    pub fn nested_array(field: impl Into<String>, nested: impl Into<String>) -> Self {
        FieldPath::ArrayRef {
            field: field.into(),
            nested: Some(nested.into()),
        }
    }

    /// URIs referenced through this path, in field order.
    pub fn referenced_uris<'a>(&self, record: &'a Record) -> Vec<&'a str> {
        match self {
            FieldPath::SingleRef { field } => record.get(field).and_then(ref_uri).into_iter().collect(),
            FieldPath::ArrayRef { field, nested } => field_array(record, field)
                .map(|items| {
                    items
                        .iter()
                        .filter_map(|item| element_ref(item, nested.as_deref()))
                        .collect()
                })
                .unwrap_or_default(),
        }
    }

    /// Exact string comparison against `target`; no URI normalization.
    pub fn matches(&self, record: &Record, target: &str) -> bool {
        match self {
            FieldPath::SingleRef { field } => record.get(field).and_then(ref_uri) == Some(target),
            FieldPath::ArrayRef { field, nested } => field_array(record, field).is_some_and(|items| {
                items
                    .iter()
                    .any(|item| element_ref(item, nested.as_deref()) == Some(target))
            }),
        }
    }

    /// Path string understood by the remote index, e.g. `.subjects[].uri`.
    pub fn index_path(&self) -> String {
        match self {
            FieldPath::SingleRef { field } => format!(".{field}.uri"),
            FieldPath::ArrayRef { field, nested: None } => format!(".{field}[].uri"),
            FieldPath::ArrayRef {
                field,
                nested: Some(nested),
            } => format!(".{field}[].{nested}.uri"),
        }
    }

    /// Accepts both the short form (`subject`, `subjects[]`,
    /// `items[].itemIdentifier`) and the index form (`.subjects[].uri`).
    pub fn parse(input: &str) -> Option<Self> {
        let s = input.trim();
        let s = s.strip_prefix('.').unwrap_or(s);
        let s = s.strip_suffix(".uri").unwrap_or(s);
        if s.is_empty() {
            return None;
        }

        match s.split_once("[]") {
            None if is_field_name(s) => Some(FieldPath::single(s)),
            None => None,
            Some((field, "")) if is_field_name(field) => Some(FieldPath::array(field)),
            Some((field, rest)) => {
                let nested = rest.strip_prefix('.')?;
                (is_field_name(field) && is_field_name(nested)).then(|| FieldPath::nested_array(field, nested))
            }
        }
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldPath::SingleRef { field } => write!(f, "{field}"),
            FieldPath::ArrayRef { field, nested: None } => write!(f, "{field}[]"),
            FieldPath::ArrayRef {
                field,
                nested: Some(nested),
            } => write!(f, "{field}[].{nested}"),
        }
    }
}

fn is_field_name(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

fn element_ref<'a>(item: &'a Value, nested: Option<&str>) -> Option<&'a str> {
    match nested {
        Some(key) => item.get(key).and_then(ref_uri),
        None => ref_uri(item),
    }
}

// --- LOCAL (EXHAUSTIVE) VARIANT ---

/// Entries of a listing that reference `target` through `path`, in listing order.
pub fn matching_entries<'a>(
    entries: &'a [RecordEntry],
    path: &'a FieldPath,
    target: &'a str,
) -> impl Iterator<Item = &'a RecordEntry> + 'a {
    entries.iter().filter(move |e| path.matches(&e.value, target))
}

/// List `collection` for `owner` and return every record that references
/// `target`. A failed listing is an error here, never an empty result.
pub async fn scan_referencing_entries(
    repo: &dyn Repository,
    owner: &str,
    collection: &str,
    path: &FieldPath,
    target: &str,
) -> Result<Vec<RecordEntry>> {
    let entries = repo
        .list_records(owner, collection)
        .await
        .map_err(|e| HcError::Scan {
            collection: collection.to_string(),
            source: Box::new(e),
        })?;

    let found: Vec<RecordEntry> = matching_entries(&entries, path, target).cloned().collect();
    debug!(collection, path = %path, scanned = entries.len(), matched = found.len(), "backlink scan");
    Ok(found)
}

/// Strict form of [`find_referencing_uris`].
pub async fn scan_referencing_uris(
    repo: &dyn Repository,
    owner: &str,
    collection: &str,
    path: &FieldPath,
    target: &str,
) -> Result<Vec<String>> {
    let entries = scan_referencing_entries(repo, owner, collection, path, target).await?;
    Ok(entries.into_iter().map(|e| e.uri).collect())
}

/// URIs of records in `collection` that reference `target`.
///
/// Fail-soft: when the listing cannot be fetched the result is empty. Callers
/// that must tell "nothing links here" apart from "could not look" use
/// [`scan_referencing_uris`].
pub async fn find_referencing_uris(
    repo: &dyn Repository,
    owner: &str,
    collection: &str,
    path: &FieldPath,
    target: &str,
) -> Vec<String> {
    match scan_referencing_uris(repo, owner, collection, path, target).await {
        Ok(uris) => uris,
        Err(e) => {
            warn!(collection, target, error = %e, "backlink scan failed, treating as no links");
            Vec::new()
        }
    }
}

/// Number of references to each target across a listing.
pub fn tally_references(entries: &[RecordEntry], path: &FieldPath) -> HashMap<String, usize> {
    let mut counts = HashMap::new();
    for entry in entries {
        for uri in path.referenced_uris(&entry.value) {
            *counts.entry(uri.to_string()).or_insert(0) += 1;
        }
    }
    counts
}

// --- REMOTE INDEX VARIANT ---

/// Every record the remote index reports for (target, collection, path),
/// following cursors until the last page.
pub async fn fetch_backlink_records(
    index: &dyn LinkIndex,
    target: &str,
    collection: &str,
    path: &FieldPath,
) -> Result<Vec<LinkingRecord>> {
    let index_path = path.index_path();
    let mut all = Vec::new();
    let mut cursor: Option<String> = None;

    loop {
        let page = index
            .page(target, collection, &index_path, cursor.as_deref(), INDEX_PAGE_LIMIT)
            .await?;
        all.extend(page.linking_records);

        match page.cursor {
            Some(next) if !next.is_empty() => cursor = Some(next),
            _ => break,
        }
    }
    Ok(all)
}

/// Remote form of [`find_referencing_uris`].
pub async fn find_referencing_uris_remote(
    index: &dyn LinkIndex,
    target: &str,
    collection: &str,
    path: &FieldPath,
) -> Result<Vec<String>> {
    let records = fetch_backlink_records(index, target, collection, path).await?;
    Ok(records.iter().map(LinkingRecord::uri).collect())
}

/// Linked-record counts per collection, without resolving any record.
pub async fn backlink_counts(index: &dyn LinkIndex, target: &str) -> Result<BTreeMap<String, u64>> {
    Ok(index.summary(target).await?.counts_by_collection())
}
