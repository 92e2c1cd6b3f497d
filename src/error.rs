// ABOUTME: Error types for the source provider boundary and diagnostic classification

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Failure to obtain a document from a [`SourceProvider`](crate::source::SourceProvider).
///
/// This is the only error surface in the pipeline that propagates as `Err`;
/// everything downstream of a fetched document turns problems into
/// [`Diagnostic`](crate::model::Diagnostic) entries and keeps going.
#[derive(Error, Debug, Clone)]
pub enum SourceError {
    #[error("document not found: {0}")]
    NotFound(Url),

    #[error("{uri}: {message}")]
    Io { uri: Url, message: String },

    #[error("not a loadable uri: {0}")]
    UnsupportedScheme(Url),
}

/// Broad classification of a diagnostic, mirroring where in the pipeline it
/// was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DiagnosticKind {
    /// Bad escape, unterminated string or comment, unknown character.
    Lexical,
    /// Unexpected token, missing separator, unbalanced delimiter.
    Syntactic,
    /// Undefined variable, parent-scope read without a parent.
    Name,
    /// Value-kind mismatch, unknown or missing property.
    Kind,
    /// Duplicate target, include cycle, ForEach length mismatch.
    Structural,
    /// Include path not resolvable.
    Io,
    /// Evaluation interrupted through the cancellation token.
    Canceled,
}

/// Diagnostic severity, ordered so that `Error` sorts before `Warning`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum Severity {
    Error,
    Warning,
}
