use std::{fmt, path::PathBuf};

use thiserror::Error;

/// Everything that can go wrong in a load, patch or save.
///
/// None of these are transient: retrying with the same input reproduces the
/// same failure, so callers should report them rather than retry.
#[derive(Debug, Error)]
pub enum PatchError {
    /// The input is not well-formed JSON.
    #[error("failed to parse {origin} at line {line}, column {column}: {reason}")]
    Parse {
        origin: String,
        line: usize,
        column: usize,
        reason: String,
    },

    /// The selector did not match any node.
    #[error("no node named {name:?} in `{nodes_key}` ({searched} nodes searched)")]
    NodeNotFound {
        name: String,
        nodes_key: String,
        searched: usize,
    },

    /// The template contains something that would not survive flattening.
    #[error("template cannot be embedded on a single line: {fault} (at byte {offset})")]
    Sanitization { fault: SanitizeFault, offset: usize },

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The document is valid JSON but does not have the expected layout.
    #[error("document does not look like a workflow: {reason}")]
    Shape { reason: String },

    #[error("invalid field path {path:?}: {reason}")]
    FieldPath { path: String, reason: String },

    #[error("failed to serialize document: {0}")]
    Serialize(#[source] serde_json::Error),
}

/// Stable classification of [`PatchError`], used for exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Parse,
    NodeNotFound,
    Sanitization,
    Io,
    Shape,
    FieldPath,
    Serialize,
}

impl PatchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PatchError::Parse { .. } => ErrorKind::Parse,
            PatchError::NodeNotFound { .. } => ErrorKind::NodeNotFound,
            PatchError::Sanitization { .. } => ErrorKind::Sanitization,
            PatchError::Io { .. } => ErrorKind::Io,
            PatchError::Shape { .. } => ErrorKind::Shape,
            PatchError::FieldPath { .. } => ErrorKind::FieldPath,
            PatchError::Serialize(_) => ErrorKind::Serialize,
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PatchError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn parse(origin: &str, e: serde_json::Error) -> Self {
        PatchError::Parse {
            origin: origin.to_owned(),
            line: e.line(),
            column: e.column(),
            reason: e.to_string(),
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Parse => "parse error",
            ErrorKind::NodeNotFound => "node not found",
            ErrorKind::Sanitization => "sanitization error",
            ErrorKind::Io => "I/O error",
            ErrorKind::Shape => "unexpected document shape",
            ErrorKind::FieldPath => "invalid field path",
            ErrorKind::Serialize => "serialization error",
        };
        f.write_str(s)
    }
}

/// Constructs in a template that cannot be put on one line safely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SanitizeFault {
    /// A string literal inside an expression is never closed.
    UnterminatedLiteral { quote: char },
    /// A `{{` is never matched by `}}`.
    UnclosedExpression,
    /// A literal ends with a lone backslash.
    DanglingEscape,
    /// A `//` comment would swallow the code after it once lines are joined.
    LineComment,
}

impl fmt::Display for SanitizeFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SanitizeFault::UnterminatedLiteral { quote } => {
                write!(f, "unterminated string literal opened with {}", quote)
            }
            SanitizeFault::UnclosedExpression => write!(f, "expression `{{{{` is never closed"),
            SanitizeFault::DanglingEscape => write!(f, "dangling backslash in string literal"),
            SanitizeFault::LineComment => {
                write!(f, "line comment followed by a line break")
            }
        }
    }
}
