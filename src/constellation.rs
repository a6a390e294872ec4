//! Client for the remote backlink index (Constellation).

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{HcError, Result};
use crate::parser::RecordUri;

/// Summary response from `/links/all`: collection -> field path -> counts.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BacklinksSummary {
    #[serde(default)]
    pub links: BTreeMap<String, BTreeMap<String, BacklinkCounts>>,
}

/// Count of records and distinct DIDs for one collection + path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct BacklinkCounts {
    #[serde(default)]
    pub records: u64,
    #[serde(default)]
    pub distinct_dids: u64,
}

impl BacklinksSummary {
    /// Records per collection, summed over every path.
    pub fn counts_by_collection(&self) -> BTreeMap<String, u64> {
        self.links
            .iter()
            .map(|(collection, paths)| (collection.clone(), paths.values().map(|c| c.records).sum()))
            .filter(|(_, n)| *n > 0)
            .collect()
    }
}

/// One page from `/links`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BacklinksPage {
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub cursor: Option<String>,
    #[serde(default)]
    pub linking_records: Vec<LinkingRecord>,
}

/// A record that links to the target.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LinkingRecord {
    pub did: String,
    pub collection: String,
    pub rkey: String,
}

impl LinkingRecord {
    pub fn uri(&self) -> String {
        RecordUri::new(&self.did, &self.collection, &self.rkey).to_string()
    }
}

/// The remote backlink index service.
#[async_trait]
pub trait LinkIndex: Send + Sync {
    /// Per-collection counts of everything linking to `target`.
    async fn summary(&self, target: &str) -> Result<BacklinksSummary>;

    /// One page of records in `collection` whose `path` points at `target`.
    async fn page(
        &self,
        target: &str,
        collection: &str,
        path: &str,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<BacklinksPage>;
}

pub struct ConstellationClient {
    base_url: String,
    http: Client,
}

impl ConstellationClient {
    pub fn new(base_url: &str, user_agent: &str, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    async fn fetch<T: DeserializeOwned>(&self, route: &str, query: &[(&str, String)]) -> Result<T> {
        let url = format!("{}/{}", self.base_url, route);
        let response = self
            .http
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(|e| HcError::Backlinks(format!("constellation request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(HcError::Backlinks(format!(
                "constellation returned {}",
                response.status().as_u16()
            )));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| HcError::Backlinks(format!("failed to decode backlinks: {e}")))
    }
}

#[async_trait]
impl LinkIndex for ConstellationClient {
    async fn summary(&self, target: &str) -> Result<BacklinksSummary> {
        self.fetch("links/all", &[("target", target.to_string())]).await
    }

    async fn page(
        &self,
        target: &str,
        collection: &str,
        path: &str,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<BacklinksPage> {
        let mut query = vec![
            ("target", target.to_string()),
            ("collection", collection.to_string()),
            ("path", path.to_string()),
        ];
        if let Some(c) = cursor.filter(|c| !c.is_empty()) {
            query.push(("cursor", c.to_string()));
        }
        if limit > 0 {
            query.push(("limit", limit.to_string()));
        }
        self.fetch("links", &query).await
    }
}
