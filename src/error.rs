use thiserror::Error;

use crate::store::{ResultCode, StoreError};

/// Errors surfaced by document path operations
///
/// Parse-time variants (`PathFormat`, `PathPrefix`) are raised before any
/// store call. Everything coming back from the store goes through
/// [`classify`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DocumentError {
    /// Malformed bracket, segment, or filter predicate
    #[error("Path format error in '{path}': {message}")]
    PathFormat { path: String, message: String },

    /// Path does not start with the root marker
    #[error("Path '{path}' must start with '$'")]
    PathPrefix { path: String },

    /// A map step or map action was applied to a value that is not a map
    #[error("Key not found: {message}")]
    KeyNotFound { message: String },

    /// A list step or list action was applied to a map or scalar
    #[error("Not a list: {message}")]
    NotAList { message: String },

    /// The addressed record, container, or element does not exist
    #[error("Object not found: {message}")]
    ObjectNotFound { message: String },

    /// Append was requested with an empty path
    #[error("Cannot append to the document root")]
    AppendToRoot,

    /// A mutation was requested through a read-only construct
    #[error("Path '{path}' cannot be resolved to a write location")]
    QueryToNonReadOperation { path: String },

    /// The record changed between the fetch and the conditional write
    #[error("Concurrent modification of {key}: expected generation {expected}")]
    ConcurrencyConflict { key: String, expected: u32 },

    /// The supplied value has a shape documents cannot hold
    #[error("Unsupported value type: {message}")]
    UnsupportedValueType { message: String },

    /// The generic engine rejected the expression or its input
    #[error("Query evaluation failed for '{expression}': {message}")]
    QueryEvaluation { expression: String, message: String },

    /// The item's write was withheld because a sibling field failed
    #[error("Batch item aborted (result code {code})")]
    BatchItemAborted { code: i32 },

    /// Any other store-level failure
    #[error("Store error {code}: {message}")]
    Store { code: i32, message: String },
}

impl DocumentError {
    pub fn path_format(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::PathFormat {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn path_prefix(path: impl Into<String>) -> Self {
        Self::PathPrefix { path: path.into() }
    }

    pub fn key_not_found(message: impl Into<String>) -> Self {
        Self::KeyNotFound {
            message: message.into(),
        }
    }

    pub fn not_a_list(message: impl Into<String>) -> Self {
        Self::NotAList {
            message: message.into(),
        }
    }

    pub fn object_not_found(message: impl Into<String>) -> Self {
        Self::ObjectNotFound {
            message: message.into(),
        }
    }

    pub fn query_to_non_read(path: impl Into<String>) -> Self {
        Self::QueryToNonReadOperation { path: path.into() }
    }

    pub fn unsupported_value(message: impl Into<String>) -> Self {
        Self::UnsupportedValueType {
            message: message.into(),
        }
    }

    pub fn query_evaluation(expression: impl Into<String>, message: impl Into<String>) -> Self {
        Self::QueryEvaluation {
            expression: expression.into(),
            message: message.into(),
        }
    }

    /// True for errors detected before anything was sent to the store
    pub fn is_parse_error(&self) -> bool {
        matches!(self, Self::PathFormat { .. } | Self::PathPrefix { .. })
    }
}

/// Map a store failure onto the document error taxonomy
pub fn classify(err: StoreError) -> DocumentError {
    let StoreError { code, message } = err;
    match code {
        ResultCode::RecordNotFound | ResultCode::ElementNotFound => {
            DocumentError::ObjectNotFound { message }
        }
        ResultCode::ParameterError => DocumentError::KeyNotFound { message },
        ResultCode::OpNotApplicable => DocumentError::NotAList { message },
        ResultCode::GenerationMismatch { key, expected } => {
            DocumentError::ConcurrencyConflict { key, expected }
        }
        ResultCode::Timeout | ResultCode::Rejected(_) => DocumentError::Store {
            code: code.code(),
            message,
        },
    }
}

impl From<StoreError> for DocumentError {
    fn from(err: StoreError) -> Self {
        classify(err)
    }
}
