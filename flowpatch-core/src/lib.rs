//! Targeted field patches for workflow documents.
//!
//! A workflow document is a JSON tree whose top-level mapping holds a sequence
//! of named nodes. This crate loads such a document, writes a sanitized
//! expression template into one field of the matching node(s), and saves the
//! document again without disturbing anything else.
//!
//! The pipeline is:
//!
//! 1. [`Document::load`] (or [`Document::from_str`])
//! 2. [`patch`], which locates the node, [`sanitize`]s the template and
//!    writes it
//! 3. [`Document::save`]

pub mod document;
pub mod error;
pub mod patch;
pub mod sanitize;

pub use document::Document;
pub use error::{ErrorKind, PatchError, SanitizeFault};
pub use patch::{patch, FieldPath, MatchPolicy, NodeSelector, PatchOptions, PatchResult};
pub use sanitize::{sanitize, SanitizePolicy, Sanitized};

pub type Result<T, E = PatchError> = std::result::Result<T, E>;
