use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// Collection NSIDs for the Hypercerts record types
pub const COLLECTION_ACTIVITY: &str = "org.hypercerts.claim.activity";
pub const COLLECTION_CONTRIBUTOR_INFO: &str = "org.hypercerts.claim.contributorInformation";
pub const COLLECTION_MEASUREMENT: &str = "org.hypercerts.claim.measurement";
pub const COLLECTION_ATTACHMENT: &str = "org.hypercerts.claim.attachment";
pub const COLLECTION_COLLECTION: &str = "org.hypercerts.claim.collection";
pub const COLLECTION_EVALUATION: &str = "org.hypercerts.claim.evaluation";
pub const COLLECTION_RIGHTS: &str = "org.hypercerts.claim.rights";
pub const COLLECTION_FUNDING_RECEIPT: &str = "org.hypercerts.funding.receipt";
pub const COLLECTION_WORK_SCOPE_TAG: &str = "org.hypercerts.helper.workScopeTag";
pub const COLLECTION_LOCATION: &str = "app.certified.location";

/// A record body: field name to JSON value. Always carries `$type` and `createdAt`
/// when written by this client.
pub type Record = Map<String, Value>;

/// The fixed set of record types this client manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    Activity,
    Contributor,
    Measurement,
    Attachment,
    Collection,
    Evaluation,
    Rights,
    Funding,
    WorkScope,
    Location,
}

impl RecordKind {
    pub const ALL: [RecordKind; 10] = [
        RecordKind::Activity,
        RecordKind::Contributor,
        RecordKind::Measurement,
        RecordKind::Attachment,
        RecordKind::Collection,
        RecordKind::Evaluation,
        RecordKind::Rights,
        RecordKind::Funding,
        RecordKind::WorkScope,
        RecordKind::Location,
    ];

    pub fn nsid(self) -> &'static str {
        match self {
            RecordKind::Activity => COLLECTION_ACTIVITY,
            RecordKind::Contributor => COLLECTION_CONTRIBUTOR_INFO,
            RecordKind::Measurement => COLLECTION_MEASUREMENT,
            RecordKind::Attachment => COLLECTION_ATTACHMENT,
            RecordKind::Collection => COLLECTION_COLLECTION,
            RecordKind::Evaluation => COLLECTION_EVALUATION,
            RecordKind::Rights => COLLECTION_RIGHTS,
            RecordKind::Funding => COLLECTION_FUNDING_RECEIPT,
            RecordKind::WorkScope => COLLECTION_WORK_SCOPE_TAG,
            RecordKind::Location => COLLECTION_LOCATION,
        }
    }

    /// Singular human label, also the CLI name of the kind.
    pub fn label(self) -> &'static str {
        match self {
            RecordKind::Activity => "activity",
            RecordKind::Contributor => "contributor",
            RecordKind::Measurement => "measurement",
            RecordKind::Attachment => "attachment",
            RecordKind::Collection => "collection",
            RecordKind::Evaluation => "evaluation",
            RecordKind::Rights => "rights",
            RecordKind::Funding => "funding",
            RecordKind::WorkScope => "workscope",
            RecordKind::Location => "location",
        }
    }

    pub fn from_nsid(nsid: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.nsid() == nsid)
    }

    pub fn from_label(label: &str) -> Option<Self> {
        let label = label.to_ascii_lowercase();
        Self::ALL.into_iter().find(|k| k.label() == label)
    }
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Label for whatever lives in `collection`, falling back to "record".
pub fn label_for_collection(collection: &str) -> &'static str {
    RecordKind::from_nsid(collection)
        .map(RecordKind::label)
        .unwrap_or("record")
}

/// One record from a collection listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordEntry {
    pub uri: String,

    /// Content hash of the listed revision
    pub cid: String,

    pub value: Record,
}

/// Pointer from one record to a specific revision of another.
///
/// The hash is a snapshot taken when the link was written; the target may
/// have moved on or been deleted since.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrongRef {
    pub uri: String,
    pub cid: String,
}

impl StrongRef {
    pub fn new(uri: impl Into<String>, cid: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            cid: cid.into(),
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::json!({ "uri": self.uri, "cid": self.cid })
    }
}

/// String field of a record, or "" when absent or not a string.
pub fn field_str<'a>(record: &'a Record, key: &str) -> &'a str {
    record.get(key).and_then(Value::as_str).unwrap_or("")
}

pub fn field_map<'a>(record: &'a Record, key: &str) -> Option<&'a Record> {
    record.get(key).and_then(Value::as_object)
}

pub fn field_array<'a>(record: &'a Record, key: &str) -> Option<&'a Vec<Value>> {
    record.get(key).and_then(Value::as_array)
}

/// The `uri` of a strong reference stored as an object value.
pub fn ref_uri(value: &Value) -> Option<&str> {
    value.as_object()?.get("uri")?.as_str()
}
