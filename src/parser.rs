use nom::{
    bytes::complete::{tag, take_while1},
    character::complete::char,
    combinator::{all_consuming, recognize, verify},
    multi::separated_list1,
    sequence::{preceded, tuple},
    IResult,
};
use std::fmt;
use std::str::FromStr;

use crate::error::{HcError, Result};

pub const AT_URI_SCHEME: &str = "at://";

/// Record address: owner identity + collection + record key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordUri {
    pub authority: String,
    pub collection: String,
    pub rkey: String,
}

impl RecordUri {
    pub fn new(authority: impl Into<String>, collection: impl Into<String>, rkey: impl Into<String>) -> Self {
        Self {
            authority: authority.into(),
            collection: collection.into(),
            rkey: rkey.into(),
        }
    }

    pub fn parse(input: &str) -> Result<Self> {
        parse_record_uri(input)
    }
}

impl fmt::Display for RecordUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}/{}/{}", AT_URI_SCHEME, self.authority, self.collection, self.rkey)
    }
}

impl FromStr for RecordUri {
    type Err = HcError;

    fn from_str(s: &str) -> Result<Self> {
        parse_record_uri(s)
    }
}

// --- CHARACTER CLASSES ---

fn is_authority_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | ':' | '%')
}

fn is_nsid_segment_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-'
}

fn is_rkey_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | '~' | ':')
}

fn is_did(s: &str) -> bool {
    let mut parts = s.splitn(3, ':');
    parts.next() == Some("did")
        && parts
            .next()
            .is_some_and(|m| !m.is_empty() && m.chars().all(|c| c.is_ascii_lowercase()))
        && parts.next().is_some_and(|id| !id.is_empty())
}

fn is_handle(s: &str) -> bool {
    !s.contains(':') && s.contains('.') && s.split('.').all(|seg| !seg.is_empty())
}

// --- PARSERS ---

fn parse_authority(input: &str) -> IResult<&str, &str> {
    verify(take_while1(is_authority_char), |s: &str| is_did(s) || is_handle(s))(input)
}

fn parse_nsid(input: &str) -> IResult<&str, &str> {
    verify(
        recognize(separated_list1(char('.'), take_while1(is_nsid_segment_char))),
        |s: &str| s.contains('.'),
    )(input)
}

fn parse_rkey(input: &str) -> IResult<&str, &str> {
    verify(take_while1(is_rkey_char), |s: &str| {
        s != "." && s != ".." && s.len() <= 512
    })(input)
}

fn parse_at_uri(input: &str) -> IResult<&str, (&str, &str, &str)> {
    tuple((
        preceded(tag(AT_URI_SCHEME), parse_authority),
        preceded(char('/'), parse_nsid),
        preceded(char('/'), parse_rkey),
    ))(input)
}

/// Parse `at://<authority>/<collection>/<rkey>`. Anything else, including a
/// URI with extra path segments, is an `InvalidUri`.
pub fn parse_record_uri(input: &str) -> Result<RecordUri> {
    match all_consuming(parse_at_uri)(input.trim()) {
        Ok((_, (authority, collection, rkey))) => Ok(RecordUri::new(authority, collection, rkey)),
        Err(_) => Err(HcError::InvalidUri(input.to_string())),
    }
}

/// Full AT-URI for a short record key, or the input unchanged when it is
/// already an AT-URI.
pub fn resolve_record_uri(did: &str, collection: &str, id_or_uri: &str) -> String {
    if id_or_uri.starts_with(AT_URI_SCHEME) {
        return id_or_uri.to_string();
    }
    RecordUri::new(did, collection, id_or_uri).to_string()
}

/// Record key (last segment) of an AT-URI.
///
/// Upstream data may hold half-formed URIs, so a failed parse falls back to
/// splitting on "/" and taking the third segment, then to the input itself.
pub fn extract_rkey(uri: &str) -> String {
    match parse_record_uri(uri) {
        Ok(parsed) => parsed.rkey,
        Err(_) => {
            let rest = uri.strip_prefix(AT_URI_SCHEME).unwrap_or(uri);
            let parts: Vec<&str> = rest.split('/').collect();
            if parts.len() >= 3 {
                parts[2].to_string()
            } else {
                uri.to_string()
            }
        }
    }
}
