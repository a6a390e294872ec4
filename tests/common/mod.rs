//! In-memory stand-ins for the PDS and the backlink index.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;

use hc::client::Repository;
use hc::constellation::{BacklinkCounts, BacklinksPage, BacklinksSummary, LinkIndex, LinkingRecord};
use hc::error::{HcError, Result};
use hc::index::FieldPath;
use hc::model::{Record, RecordEntry, StrongRef};
use hc::parser::RecordUri;

pub const OWNER: &str = "did:plc:owner";

#[derive(Debug, Clone)]
struct Stored {
    authority: String,
    collection: String,
    rkey: String,
    cid: String,
    value: Record,
}

impl Stored {
    fn uri(&self) -> String {
        RecordUri::new(&self.authority, &self.collection, &self.rkey).to_string()
    }
}

#[derive(Default)]
struct State {
    records: Vec<Stored>,
    next_id: u64,
    delete_attempts: Vec<String>,
    failing_lists: HashSet<String>,
    failing_gets: HashSet<String>,
    failing_deletes: HashSet<String>,
    vanishing: HashSet<String>,
    raw_entries: Vec<(String, RecordEntry)>,
}

impl State {
    fn position(&self, authority: &str, collection: &str, rkey: &str) -> Option<usize> {
        self.records
            .iter()
            .position(|r| r.authority == authority && r.collection == collection && r.rkey == rkey)
    }

    fn next_cid(&mut self) -> String {
        self.next_id += 1;
        format!("bafyrei{:06}", self.next_id)
    }
}

fn server_error(message: &str) -> HcError {
    HcError::Xrpc {
        status: 500,
        error: "InternalServerError".into(),
        message: message.into(),
    }
}

/// Record store keeping records in creation order, with a log of delete
/// attempts and per-operation failure injection.
pub struct MemoryRepository {
    owner: String,
    state: Mutex<State>,
}

impl MemoryRepository {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            owner: OWNER.to_string(),
            state: Mutex::new(State::default()),
        })
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn insert(&self, collection: &str, value: Value) -> StrongRef {
        self.insert_as(&self.owner, collection, value)
    }

    pub fn insert_as(&self, authority: &str, collection: &str, value: Value) -> StrongRef {
        let mut state = self.state.lock().unwrap();
        let cid = state.next_cid();
        let stored = Stored {
            authority: authority.to_string(),
            collection: collection.to_string(),
            rkey: format!("3k{:06}", state.next_id),
            cid: cid.clone(),
            value: value.as_object().cloned().unwrap_or_default(),
        };
        let uri = stored.uri();
        state.records.push(stored);
        StrongRef::new(uri, cid)
    }

    /// Delete behind the client's back; not logged.
    pub fn remove(&self, uri: &str) {
        let target = RecordUri::parse(uri).unwrap();
        let mut state = self.state.lock().unwrap();
        if let Some(i) = state.position(&target.authority, &target.collection, &target.rkey) {
            state.records.remove(i);
        }
    }

    pub fn fail_list(&self, collection: &str) {
        self.state.lock().unwrap().failing_lists.insert(collection.to_string());
    }

    pub fn fail_get(&self, uri: &str) {
        self.state.lock().unwrap().failing_gets.insert(uri.to_string());
    }

    pub fn fail_delete(&self, uri: &str) {
        self.state.lock().unwrap().failing_deletes.insert(uri.to_string());
    }

    /// Drop `uri` right after the next listing that includes it, as if
    /// another client deleted it between discovery and deletion.
    pub fn vanish_after_list(&self, uri: &str) {
        self.state.lock().unwrap().vanishing.insert(uri.to_string());
    }

    /// Serve `uri` verbatim in listings of `collection`, whether or not it
    /// parses. Never reachable through get or delete.
    pub fn insert_raw(&self, collection: &str, uri: &str, value: Value) {
        self.state.lock().unwrap().raw_entries.push((
            collection.to_string(),
            RecordEntry {
                uri: uri.to_string(),
                cid: "bafyreiraw".to_string(),
                value: value.as_object().cloned().unwrap_or_default(),
            },
        ));
    }

    pub fn contains(&self, uri: &str) -> bool {
        self.state.lock().unwrap().records.iter().any(|r| r.uri() == uri)
    }

    pub fn count(&self, collection: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .records
            .iter()
            .filter(|r| r.collection == collection)
            .count()
    }

    pub fn total(&self) -> usize {
        self.state.lock().unwrap().records.len()
    }

    pub fn delete_attempts(&self) -> Vec<String> {
        self.state.lock().unwrap().delete_attempts.clone()
    }

    fn entries(&self) -> Vec<(Stored, String)> {
        self.state
            .lock()
            .unwrap()
            .records
            .iter()
            .map(|r| (r.clone(), r.uri()))
            .collect()
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn create_record(&self, collection: &str, record: Record) -> Result<(String, String)> {
        let r = self.insert(collection, Value::Object(record));
        Ok((r.uri, r.cid))
    }

    async fn get_record(&self, owner: &str, collection: &str, rkey: &str) -> Result<(Record, String)> {
        let state = self.state.lock().unwrap();
        let uri = RecordUri::new(owner, collection, rkey).to_string();
        if state.failing_gets.contains(&uri) {
            return Err(server_error("get failed"));
        }
        match state.position(owner, collection, rkey) {
            Some(i) => Ok((state.records[i].value.clone(), state.records[i].cid.clone())),
            None => Err(HcError::not_found("record", rkey)),
        }
    }

    async fn put_record(
        &self,
        owner: &str,
        collection: &str,
        rkey: &str,
        record: Record,
        swap_cid: Option<&str>,
    ) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        let i = state
            .position(owner, collection, rkey)
            .ok_or_else(|| HcError::not_found("record", rkey))?;
        if let Some(expected) = swap_cid {
            if state.records[i].cid != expected {
                return Err(HcError::Conflict(format!("expected {expected}")));
            }
        }
        let cid = state.next_cid();
        state.records[i].value = record;
        state.records[i].cid = cid;
        Ok(state.records[i].uri())
    }

    async fn delete_record(&self, owner: &str, collection: &str, rkey: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let uri = RecordUri::new(owner, collection, rkey).to_string();
        state.delete_attempts.push(uri.clone());
        if state.failing_deletes.contains(&uri) {
            return Err(server_error("delete failed"));
        }
        match state.position(owner, collection, rkey) {
            Some(i) => {
                state.records.remove(i);
                Ok(())
            }
            None => Err(HcError::not_found("record", rkey)),
        }
    }

    async fn list_records(&self, owner: &str, collection: &str) -> Result<Vec<RecordEntry>> {
        let mut state = self.state.lock().unwrap();
        if state.failing_lists.contains(collection) {
            return Err(HcError::Xrpc {
                status: 502,
                error: "UpstreamFailure".into(),
                message: "listing unavailable".into(),
            });
        }
        let mut listed: Vec<RecordEntry> = state
            .records
            .iter()
            .filter(|r| r.authority == owner && r.collection == collection)
            .map(|r| RecordEntry {
                uri: r.uri(),
                cid: r.cid.clone(),
                value: r.value.clone(),
            })
            .collect();
        listed.extend(
            state
                .raw_entries
                .iter()
                .filter(|(c, _)| c == collection)
                .map(|(_, e)| e.clone()),
        );

        let vanishing = std::mem::take(&mut state.vanishing);
        let (gone, kept): (HashSet<String>, HashSet<String>) = vanishing
            .into_iter()
            .partition(|uri| listed.iter().any(|e| &e.uri == uri));
        state.vanishing = kept;
        state.records.retain(|r| !gone.contains(&r.uri()));
        Ok(listed)
    }
}

/// Backlink index answering from the live contents of a [`MemoryRepository`].
/// Cursors are decimal offsets.
pub struct MemoryLinkIndex {
    repo: Arc<MemoryRepository>,
    unreachable: AtomicBool,
    failing_paths: Mutex<HashSet<String>>,
    queries: Mutex<Vec<(String, String)>>,
}

impl MemoryLinkIndex {
    pub fn new(repo: Arc<MemoryRepository>) -> Self {
        Self {
            repo,
            unreachable: AtomicBool::new(false),
            failing_paths: Mutex::new(HashSet::new()),
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn set_unreachable(&self, down: bool) {
        self.unreachable.store(down, Ordering::SeqCst);
    }

    /// Page requests for `path` (index form, e.g. `.subjects[].uri`) fail.
    pub fn fail_path(&self, path: &str) {
        self.failing_paths.lock().unwrap().insert(path.to_string());
    }

    /// (collection, path) of every page request so far.
    pub fn queries(&self) -> Vec<(String, String)> {
        self.queries.lock().unwrap().clone()
    }

    fn check(&self) -> Result<()> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(HcError::Backlinks("constellation request failed: connection refused".into()));
        }
        Ok(())
    }
}

const KNOWN_PATHS: [&str; 3] = [".subject.uri", ".subjects[].uri", ".items[].itemIdentifier.uri"];

#[async_trait]
impl LinkIndex for MemoryLinkIndex {
    async fn summary(&self, target: &str) -> Result<BacklinksSummary> {
        self.check()?;
        let mut links: BTreeMap<String, BTreeMap<String, BacklinkCounts>> = BTreeMap::new();
        for (stored, _) in self.repo.entries() {
            for raw in KNOWN_PATHS {
                let path = FieldPath::parse(raw).unwrap();
                if path.matches(&stored.value, target) {
                    let counts = links
                        .entry(stored.collection.clone())
                        .or_default()
                        .entry(raw.to_string())
                        .or_default();
                    counts.records += 1;
                    counts.distinct_dids = 1;
                }
            }
        }
        Ok(BacklinksSummary { links })
    }

    async fn page(
        &self,
        target: &str,
        collection: &str,
        path: &str,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<BacklinksPage> {
        self.check()?;
        self.queries
            .lock()
            .unwrap()
            .push((collection.to_string(), path.to_string()));

        if self.failing_paths.lock().unwrap().contains(path) {
            return Err(HcError::Backlinks("constellation returned 500".into()));
        }

        let field = FieldPath::parse(path).ok_or_else(|| HcError::Backlinks(format!("bad path {path}")))?;
        let matched: Vec<LinkingRecord> = self
            .repo
            .entries()
            .into_iter()
            .filter(|(s, _)| s.collection == collection && field.matches(&s.value, target))
            .map(|(s, _)| LinkingRecord {
                did: s.authority,
                collection: s.collection,
                rkey: s.rkey,
            })
            .collect();

        let offset: usize = cursor.and_then(|c| c.parse().ok()).unwrap_or(0);
        let limit = limit.max(1);
        let end = (offset + limit).min(matched.len());
        let linking_records = matched.get(offset..end).map(<[_]>::to_vec).unwrap_or_default();
        let cursor = (end < matched.len()).then(|| end.to_string());

        Ok(BacklinksPage {
            total: matched.len() as u64,
            cursor,
            linking_records,
        })
    }
}
