//! Error types for the hc client

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HcError {
    /// HTTP request failed before a response arrived
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The record (or repository) does not exist
    #[error("{what} not found: {key}")]
    NotFound { what: String, key: String },

    /// A string that should be an AT-URI failed to parse
    #[error("invalid URI: {0}")]
    InvalidUri(String),

    /// Optimistic-concurrency write rejected because the stored hash moved
    #[error("record changed since it was read: {0}")]
    Conflict(String),

    /// PDS answered with an XRPC error body
    #[error("XRPC error {status} ({error}): {message}")]
    Xrpc {
        status: u16,
        error: String,
        message: String,
    },

    #[error("auth failed: {0}")]
    Auth(String),

    #[error("not logged in (run: hc account login)")]
    NotLoggedIn,

    /// Remote backlink index failure
    #[error("backlink index error: {0}")]
    Backlinks(String),

    /// Backlink discovery over a candidate collection could not complete
    #[error("failed to scan {collection} for linked records: {source}")]
    Scan {
        collection: String,
        #[source]
        source: Box<HcError>,
    },

    #[error("failed to delete {what}: {source}")]
    DeleteFailed {
        what: String,
        #[source]
        source: Box<HcError>,
    },

    #[error("{0}")]
    Usage(String),
}

impl HcError {
    pub fn not_found(what: impl Into<String>, key: impl Into<String>) -> Self {
        HcError::NotFound {
            what: what.into(),
            key: key.into(),
        }
    }

    /// True when the failure means "the record is not there", as opposed to
    /// a transport, auth or server failure.
    pub fn is_not_found(&self) -> bool {
        match self {
            HcError::NotFound { .. } => true,
            HcError::DeleteFailed { source, .. } | HcError::Scan { source, .. } => {
                source.is_not_found()
            }
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, HcError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_message_names_the_record() {
        let err = HcError::not_found("activity", "3abc");
        assert_eq!(err.to_string(), "activity not found: 3abc");
        assert!(err.is_not_found());
    }

    #[test]
    fn wrapped_not_found_is_still_not_found() {
        let err = HcError::DeleteFailed {
            what: "activity".into(),
            source: Box::new(HcError::not_found("record", "x")),
        };
        assert!(err.is_not_found());
        assert!(!HcError::Conflict("x".into()).is_not_found());
    }
}
