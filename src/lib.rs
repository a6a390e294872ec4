//! Hypercerts client: records on an ATProto PDS, the references between
//! them, and the cascading delete that keeps those references from dangling.

pub mod error;
pub mod model;
pub mod parser;
pub mod config;
pub mod client;
pub mod constellation;
pub mod index;
pub mod cascade;
pub mod context;
pub mod prompt;
pub mod session;
pub mod render;
pub mod cli;

pub use cascade::{delete_many, delete_with_cascade, CascadeOutcome, CascadeReport, DependentTally};
pub use client::{Repository, XrpcClient};
pub use constellation::{ConstellationClient, LinkIndex};
pub use context::{assemble_context, CompositeView, ContextOptions};
pub use error::{HcError, Result};
pub use index::{find_referencing_uris, scan_referencing_uris, FieldPath};
pub use model::{Record, RecordEntry, RecordKind, StrongRef};
pub use parser::RecordUri;
pub use prompt::{AutoConfirm, Confirm, TextPrompt};
