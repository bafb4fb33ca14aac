//! Error types for schema loading, request resolution and option loading.

use std::path::PathBuf;
use thiserror::Error;

/// Defects in a schema, detected once when the registry is built.
///
/// None of these can be fixed by the caller of a single resolution; an
/// engine instance with a schema error cannot serve any request.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("schema has no `resource` property")]
    MissingResources,

    #[error("schema declares no operations")]
    MissingOperations,

    #[error("operation {resource}/{operation} is declared more than once")]
    DuplicateOperation { resource: String, operation: String },

    #[error("invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("field '{field}' in {operation} references unknown field '{reference}'")]
    UnknownReference {
        operation: String,
        field: String,
        reference: String,
    },

    #[error("field '{field}' in {operation} references '{reference}', which is declared more than once")]
    AmbiguousReference {
        operation: String,
        field: String,
        reference: String,
    },

    #[error("field '{field}' is declared more than once in {operation} without mutually exclusive visibility")]
    DuplicateField { operation: String, field: String },

    #[error("field '{field}' is shown for {selector} = {tag}, which '{selector}' can never take")]
    UnreachableVariant {
        field: String,
        selector: String,
        tag: String,
    },

    #[error("variant group '{group}' declares tag '{tag}' more than once")]
    DuplicateVariant { group: String, tag: String },

    #[error("dependency cycle in {operation}: {}", fields.join(" -> "))]
    Cycle {
        operation: String,
        fields: Vec<String>,
    },

    #[error("invalid body path on field '{field}': {message}")]
    InvalidPath { field: String, message: String },

    #[error("invalid URL template for {operation}: {message}")]
    InvalidTemplate { operation: String, message: String },

    #[error("URL template of {operation} uses '{placeholder}', which is not a path field")]
    UnknownPlaceholder {
        operation: String,
        placeholder: String,
    },
}

/// Errors while reading a schema source.
#[derive(Debug, Error)]
pub enum LoadError {
    // IO errors (exit code 3)
    #[error("file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("cannot read {path}: {source}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[cfg(feature = "remote")]
    #[error("failed to fetch {url}: {source}")]
    NetworkError {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    // Parse errors (exit code 2)
    #[error("invalid JSON: {source}")]
    InvalidJson {
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid schema source: {source}")]
    InvalidSource {
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Schema(#[from] SchemaError),
}

impl LoadError {
    /// Returns the exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            LoadError::FileNotFound { .. } | LoadError::ReadError { .. } => 3,
            #[cfg(feature = "remote")]
            LoadError::NetworkError { .. } => 3,
            _ => 2,
        }
    }
}

/// Errors of a single resolution.
///
/// Everything except [`ResolveError::UnknownOperation`] aborts only the
/// resolution in progress and names the offending field.
#[derive(Debug, Error)]
pub enum ResolveError {
    // Configuration errors (exit code 2)
    #[error("unknown operation {resource}/{operation}")]
    UnknownOperation { resource: String, operation: String },

    // Validation errors (exit code 1)
    #[error("validation failed with {} error(s)", issues.len())]
    Invalid { issues: Vec<FieldIssue> },

    #[error("URL placeholder '{placeholder}' has no resolved value")]
    UnresolvedPlaceholder { placeholder: String },

    #[error("field '{field}' is not active for this operation")]
    InactiveField { field: String },

    // Resolution errors (exit code 1)
    #[error("field '{field}' holds malformed JSON at line {line}, column {column}: {message}")]
    MalformedJson {
        field: String,
        line: usize,
        column: usize,
        message: String,
    },

    #[error("variant group '{group}' has fields active outside branch '{selected}': {}", fields.join(", "))]
    AmbiguousVariant {
        group: String,
        selected: String,
        fields: Vec<String>,
    },

    #[error("field '{field}' conflicts with another value at '{path}'")]
    PathConflict { field: String, path: String },

    #[error("cannot encode query field '{field}': {message}")]
    QueryEncoding { field: String, message: String },
}

impl ResolveError {
    /// Whether the caller can fix its input and retry.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, ResolveError::UnknownOperation { .. })
    }

    /// Returns the exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        if self.is_recoverable() {
            1
        } else {
            2
        }
    }
}

/// Single validation problem tied to a field.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct FieldIssue {
    /// Id of the offending field.
    pub field: String,
    /// Human-readable error message.
    pub message: String,
}

impl std::fmt::Display for FieldIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Failures of a dynamic option lookup.
#[derive(Debug, Error)]
pub enum TransportError {
    #[cfg(feature = "remote")]
    #[error("request to {url} failed: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("unexpected option payload from {url}: {message}")]
    InvalidPayload { url: String, message: String },
}
