//! Read-only view of a record together with what links to it.

use std::collections::BTreeMap;

use futures::future::join_all;
use tracing::{debug, warn};

use crate::client::Repository;
use crate::constellation::{LinkIndex, LinkingRecord};
use crate::error::{HcError, Result};
use crate::index::{backlink_counts, fetch_backlink_records, scan_referencing_entries, FieldPath};
use crate::model::{label_for_collection, Record, RecordKind};
use crate::parser::{extract_rkey, RecordUri};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Measurements,
    Attachments,
    Evaluations,
    /// Collections listing the root among their items
    Collections,
}

impl Category {
    pub fn kind(self) -> RecordKind {
        match self {
            Category::Measurements => RecordKind::Measurement,
            Category::Attachments => RecordKind::Attachment,
            Category::Evaluations => RecordKind::Evaluation,
            Category::Collections => RecordKind::Collection,
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            Category::Measurements => "Measurements",
            Category::Attachments => "Attachments",
            Category::Evaluations => "Evaluations",
            Category::Collections => "Collections",
        }
    }

    /// Index paths to try, in order. Older attachments carry a single
    /// `subject`, newer ones a `subjects` array.
    fn index_paths(self) -> Vec<FieldPath> {
        match self {
            Category::Attachments => vec![FieldPath::array("subjects"), FieldPath::single("subject")],
            _ => vec![FieldPath::single("subject")],
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContextOptions {
    pub measurements: bool,
    pub attachments: bool,
    pub evaluations: bool,
    pub collections: bool,

    /// Fetch the body of every linked record, not just its identity
    pub include_records: bool,
}

impl ContextOptions {
    pub fn all() -> Self {
        Self {
            measurements: true,
            attachments: true,
            evaluations: true,
            collections: true,
            include_records: true,
        }
    }

    pub fn categories(&self) -> Vec<Category> {
        [
            (self.measurements, Category::Measurements),
            (self.attachments, Category::Attachments),
            (self.evaluations, Category::Evaluations),
            (self.collections, Category::Collections),
        ]
        .into_iter()
        .filter_map(|(on, c)| on.then_some(c))
        .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RowBody {
    Loaded(Record),
    FetchFailed(String),
    NotRequested,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LinkedRow {
    pub uri: String,
    pub did: String,
    pub rkey: String,
    pub body: RowBody,
}

impl LinkedRow {
    pub fn record(&self) -> Option<&Record> {
        match &self.body {
            RowBody::Loaded(r) => Some(r),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CategoryView {
    pub category: Category,
    pub rows: Vec<LinkedRow>,

    /// Set when the category could not be resolved; `rows` is then empty
    pub warning: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CompositeView {
    pub uri: String,
    pub root: Record,

    /// Only filled when no category was requested
    pub backlink_counts: Option<BTreeMap<String, u64>>,
    pub categories: Vec<CategoryView>,
}

impl CompositeView {
    pub fn category(&self, category: Category) -> Option<&CategoryView> {
        self.categories.iter().find(|c| c.category == category)
    }
}

/// Fetch `root_uri` and the records linking to it.
///
/// Only a missing or unreadable root is an error. Categories that cannot be
/// resolved carry a warning instead, and linked records that cannot be
/// fetched become [`RowBody::FetchFailed`] rows.
pub async fn assemble_context(
    repo: &dyn Repository,
    index: &dyn LinkIndex,
    owner: &str,
    root_uri: &str,
    options: &ContextOptions,
) -> Result<CompositeView> {
    let root = RecordUri::parse(root_uri)?;
    let (record, _) = repo
        .get_record(&root.authority, &root.collection, &root.rkey)
        .await
        .map_err(|e| {
            if e.is_not_found() {
                HcError::not_found(label_for_collection(&root.collection), &root.rkey)
            } else {
                e
            }
        })?;

    let categories = options.categories();
    if categories.is_empty() {
        let counts = match backlink_counts(index, root_uri).await {
            Ok(counts) => Some(counts),
            Err(e) => {
                warn!(uri = root_uri, error = %e, "backlink summary unavailable");
                None
            }
        };
        return Ok(CompositeView {
            uri: root_uri.to_string(),
            root: record,
            backlink_counts: counts,
            categories: Vec::new(),
        });
    }

    let views = categories
        .iter()
        .map(|c| category_view(repo, index, owner, root_uri, *c, options.include_records));
    let categories = join_all(views).await;

    Ok(CompositeView {
        uri: root_uri.to_string(),
        root: record,
        backlink_counts: None,
        categories,
    })
}

async fn category_view(
    repo: &dyn Repository,
    index: &dyn LinkIndex,
    owner: &str,
    target: &str,
    category: Category,
    include_records: bool,
) -> CategoryView {
    let resolved = match category {
        Category::Collections => collection_rows(repo, owner, target, include_records).await,
        _ => match linked_records(index, target, category).await {
            Ok(linked) => Ok(fetch_rows(repo, linked, include_records).await),
            Err(e) => Err(e),
        },
    };

    match resolved {
        Ok(rows) => {
            debug!(category = category.title(), rows = rows.len(), "resolved category");
            CategoryView {
                category,
                rows,
                warning: None,
            }
        }
        Err(e) => CategoryView {
            category,
            rows: Vec::new(),
            warning: Some(format!("failed to fetch {} backlinks: {e}", category.kind().label())),
        },
    }
}

/// Query the remote index, moving on to the next path when one fails or
/// comes back empty.
async fn linked_records(index: &dyn LinkIndex, target: &str, category: Category) -> Result<Vec<LinkingRecord>> {
    let collection = category.kind().nsid();
    let mut outcome: Result<Vec<LinkingRecord>> = Ok(Vec::new());
    let mut answered = false;

    // an empty answer from any path outranks an error from another
    for path in category.index_paths() {
        match fetch_backlink_records(index, target, collection, &path).await {
            Ok(found) if !found.is_empty() => return Ok(found),
            Ok(_) => {
                answered = true;
                outcome = Ok(Vec::new());
            }
            Err(e) => {
                debug!(collection, path = %path, error = %e, "backlink path failed");
                if !answered {
                    outcome = Err(e);
                }
            }
        }
    }
    outcome
}

async fn fetch_rows(repo: &dyn Repository, linked: Vec<LinkingRecord>, include_records: bool) -> Vec<LinkedRow> {
    let bodies = if include_records {
        let fetches = linked
            .iter()
            .map(|lr| repo.get_record(&lr.did, &lr.collection, &lr.rkey));
        join_all(fetches)
            .await
            .into_iter()
            .map(|res| match res {
                Ok((record, _)) => RowBody::Loaded(record),
                Err(e) => RowBody::FetchFailed(e.to_string()),
            })
            .collect()
    } else {
        vec![RowBody::NotRequested; linked.len()]
    };

    linked
        .into_iter()
        .zip(bodies)
        .map(|(lr, body)| LinkedRow {
            uri: lr.uri(),
            did: lr.did,
            rkey: lr.rkey,
            body,
        })
        .collect()
}

/// Collection membership is not indexed remotely, so scan the owner's
/// collections directly.
async fn collection_rows(
    repo: &dyn Repository,
    owner: &str,
    target: &str,
    include_records: bool,
) -> Result<Vec<LinkedRow>> {
    let path = FieldPath::nested_array("items", "itemIdentifier");
    let entries = scan_referencing_entries(repo, owner, RecordKind::Collection.nsid(), &path, target).await?;

    Ok(entries
        .into_iter()
        .map(|entry| {
            let did = RecordUri::parse(&entry.uri)
                .map(|u| u.authority)
                .unwrap_or_else(|_| owner.to_string());
            LinkedRow {
                rkey: extract_rkey(&entry.uri),
                did,
                body: if include_records {
                    RowBody::Loaded(entry.value)
                } else {
                    RowBody::NotRequested
                },
                uri: entry.uri,
            }
        })
        .collect())
}
