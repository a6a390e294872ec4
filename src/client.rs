//! Repository client: the remote per-account record store.

use async_trait::async_trait;
use reqwest::{header, Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::error::{HcError, Result};
use crate::model::{label_for_collection, Record, RecordEntry};

/// Page size used when walking a collection listing.
pub const LIST_PAGE_LIMIT: usize = 100;

/// Operations the core needs from a record repository.
///
/// Records are keyed by owner identity + collection + record key and each
/// stored revision carries an opaque content hash.
#[async_trait]
pub trait Repository: Send + Sync {
    /// Create a record in the caller's own repository. Returns (uri, hash).
    ///
    /// Kept for interface completeness; no command creates records yet.
    async fn create_record(&self, collection: &str, record: Record) -> Result<(String, String)>;

    /// Returns (record, hash).
    async fn get_record(&self, owner: &str, collection: &str, rkey: &str) -> Result<(Record, String)>;

    /// Replace a record. With `swap_cid` set the write only lands if the
    /// stored hash still equals it; otherwise `HcError::Conflict`.
    async fn put_record(
        &self,
        owner: &str,
        collection: &str,
        rkey: &str,
        record: Record,
        swap_cid: Option<&str>,
    ) -> Result<String>;

    async fn delete_record(&self, owner: &str, collection: &str, rkey: &str) -> Result<()>;

    /// Every record in a collection, in listing order.
    async fn list_records(&self, owner: &str, collection: &str) -> Result<Vec<RecordEntry>>;
}

/// Tokens returned by `createSession` / `refreshSession`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionTokens {
    pub did: String,
    #[serde(default)]
    pub handle: String,
    pub access_jwt: String,
    pub refresh_jwt: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionInfo {
    pub did: String,
    #[serde(default)]
    pub handle: String,
}

#[derive(Deserialize)]
struct XrpcErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Deserialize)]
struct RefOutput {
    uri: String,
    #[serde(default)]
    cid: String,
}

#[derive(Deserialize)]
struct GetRecordOutput {
    #[serde(default)]
    cid: Option<String>,
    #[serde(default)]
    value: Option<Value>,
}

#[derive(Deserialize)]
struct ListRecordsOutput {
    #[serde(default)]
    cursor: Option<String>,
    #[serde(default)]
    records: Vec<ListedRecord>,
}

#[derive(Deserialize)]
struct ListedRecord {
    uri: String,
    #[serde(default)]
    cid: String,
    #[serde(default)]
    value: Value,
}

/// XRPC-over-HTTP client for an ATProto PDS.
#[derive(Debug, Clone)]
pub struct XrpcClient {
    host: String,
    http: Client,
    access_jwt: Option<String>,
    did: Option<String>,
}

impl XrpcClient {
    pub fn new(host: &str, user_agent: &str) -> Result<Self> {
        let http = Client::builder().user_agent(user_agent).build()?;
        Ok(Self {
            host: host.trim_end_matches('/').to_string(),
            http,
            access_jwt: None,
            did: None,
        })
    }

    /// Attach an authenticated session.
    pub fn with_session(mut self, did: impl Into<String>, access_jwt: impl Into<String>) -> Self {
        self.did = Some(did.into());
        self.access_jwt = Some(access_jwt.into());
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// DID of the logged-in account.
    pub fn account_did(&self) -> Result<&str> {
        self.did.as_deref().ok_or(HcError::NotLoggedIn)
    }

    fn url(&self, nsid: &str) -> String {
        format!("{}/xrpc/{}", self.host, nsid)
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.access_jwt {
            Some(token) => req.header(header::AUTHORIZATION, format!("Bearer {token}")),
            None => req,
        }
    }

    async fn send_get<Resp>(&self, nsid: &str, query: &[(&str, &str)]) -> Result<Resp>
    where
        Resp: DeserializeOwned,
    {
        debug!(nsid, "xrpc query");
        let req = self.authorize(self.http.get(self.url(nsid)).query(query));
        let response = req.send().await?;
        decode(response).await
    }

    async fn send_post<Req, Resp>(&self, nsid: &str, body: &Req) -> Result<Resp>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        debug!(nsid, "xrpc procedure");
        let req = self.authorize(self.http.post(self.url(nsid)).json(body));
        let response = req.send().await?;
        decode(response).await
    }

    // ==================== Server API ====================

    pub async fn create_session(&self, identifier: &str, password: &str) -> Result<SessionTokens> {
        let body = json!({ "identifier": identifier, "password": password });
        self.send_post("com.atproto.server.createSession", &body).await
    }

    pub async fn get_session(&self) -> Result<SessionInfo> {
        self.send_get("com.atproto.server.getSession", &[]).await
    }

    /// Exchange a refresh token for a fresh token pair.
    pub async fn refresh_session(&self, refresh_jwt: &str) -> Result<SessionTokens> {
        let response = self
            .http
            .post(self.url("com.atproto.server.refreshSession"))
            .header(header::AUTHORIZATION, format!("Bearer {refresh_jwt}"))
            .send()
            .await?;
        decode(response).await
    }
}

#[async_trait]
impl Repository for XrpcClient {
    async fn create_record(&self, collection: &str, record: Record) -> Result<(String, String)> {
        let body = json!({
            "repo": self.account_did()?,
            "collection": collection,
            "record": record,
            // custom lexicons are unpublished, so the PDS cannot validate them
            "validate": false,
        });
        let out: RefOutput = self.send_post("com.atproto.repo.createRecord", &body).await?;
        Ok((out.uri, out.cid))
    }

    async fn get_record(&self, owner: &str, collection: &str, rkey: &str) -> Result<(Record, String)> {
        let out: GetRecordOutput = self
            .send_get(
                "com.atproto.repo.getRecord",
                &[("repo", owner), ("collection", collection), ("rkey", rkey)],
            )
            .await
            .map_err(|e| {
                if e.is_not_found() {
                    HcError::not_found(label_for_collection(collection), rkey)
                } else {
                    e
                }
            })?;

        match out.value {
            Some(Value::Object(record)) => Ok((record, out.cid.unwrap_or_default())),
            _ => Err(HcError::Xrpc {
                status: StatusCode::OK.as_u16(),
                error: "InvalidResponse".into(),
                message: "empty record value".into(),
            }),
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
        let body = json!({
            "repo": owner,
            "collection": collection,
            "rkey": rkey,
            "record": record,
            "validate": false,
            "swapRecord": swap_cid,
        });
        let out: RefOutput = self.send_post("com.atproto.repo.putRecord", &body).await?;
        Ok(out.uri)
    }

    async fn delete_record(&self, owner: &str, collection: &str, rkey: &str) -> Result<()> {
        let body = json!({ "repo": owner, "collection": collection, "rkey": rkey });
        let _: Value = self.send_post("com.atproto.repo.deleteRecord", &body).await?;
        Ok(())
    }

    async fn list_records(&self, owner: &str, collection: &str) -> Result<Vec<RecordEntry>> {
        let limit = LIST_PAGE_LIMIT.to_string();
        let mut entries = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let mut query = vec![("repo", owner), ("collection", collection), ("limit", limit.as_str())];
            if let Some(c) = cursor.as_deref() {
                query.push(("cursor", c));
            }
            let page: ListRecordsOutput = self.send_get("com.atproto.repo.listRecords", &query).await?;

            for rec in page.records {
                match rec.value {
                    Value::Object(value) => entries.push(RecordEntry {
                        uri: rec.uri,
                        cid: rec.cid,
                        value,
                    }),
                    _ => debug!(uri = %rec.uri, "skipping listed record without an object value"),
                }
            }

            match page.cursor {
                Some(c) if !c.is_empty() => cursor = Some(c),
                _ => break,
            }
        }
        Ok(entries)
    }
}

/// Turn an XRPC response into `T`, mapping error bodies onto `HcError`.
async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
    let status = response.status();
    let bytes = response.bytes().await?;

    if !status.is_success() {
        let body: Option<XrpcErrorBody> = serde_json::from_slice(&bytes).ok();
        let (error, message) = match body {
            Some(b) => (b.error.unwrap_or_default(), b.message.unwrap_or_default()),
            None => (String::new(), String::from_utf8_lossy(&bytes).into_owned()),
        };
        return Err(map_xrpc_error(status, error, message));
    }

    if bytes.is_empty() {
        return Ok(serde_json::from_value(Value::Null)?);
    }
    Ok(serde_json::from_slice(&bytes)?)
}

fn map_xrpc_error(status: StatusCode, error: String, message: String) -> HcError {
    match error.as_str() {
        "RecordNotFound" | "RepoNotFound" => HcError::not_found("record", message),
        "InvalidSwap" => HcError::Conflict(message),
        "ExpiredToken" | "InvalidToken" | "AuthenticationRequired" | "AuthMissing" => {
            HcError::Auth(format!("{error}: {message}"))
        }
        _ if status == StatusCode::NOT_FOUND => HcError::not_found("record", message),
        _ if status == StatusCode::UNAUTHORIZED => HcError::Auth(message),
        _ => HcError::Xrpc {
            status: status.as_u16(),
            error,
            message,
        },
    }
}
