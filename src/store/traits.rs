use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Address of a record: namespace, set, and user key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Key {
    pub namespace: String,
    pub set_name: String,
    pub user_key: String,
}

impl Key {
    pub fn new(
        namespace: impl Into<String>,
        set_name: impl Into<String>,
        user_key: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            set_name: set_name.into(),
            user_key: user_key.into(),
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.namespace, self.set_name, self.user_key)
    }
}

/// One addressing step into a nested collection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContextStep {
    MapKey(String),
    ListIndex(usize),
}

impl fmt::Display for ContextStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContextStep::MapKey(key) => write!(f, ".{}", key),
            ContextStep::ListIndex(index) => write!(f, "[{}]", index),
        }
    }
}

/// Terminal action applied to the value located by a context chain
#[derive(Debug, Clone, PartialEq)]
pub enum FieldAction {
    /// Return the located value as-is
    ReadWhole,
    /// Replace the whole field
    WriteWhole(Value),
    /// Reset the field to an empty container of its current shape
    ClearWhole,
    MapGet(String),
    /// Insert or replace a map entry
    MapPut(String, Value),
    /// Remove a map entry; an absent entry is not an error
    MapRemove(String),
    ListGet(usize),
    /// Like `MapGet`, but an absent key reads as null
    MapLookup(String),
    /// Like `ListGet`, but an index past the end reads as null
    ListLookup(usize),
    /// Overwrite an existing element; `pad` fills the gap with nulls instead
    /// of failing when `index` is past the end
    ListSet { index: usize, value: Value, pad: bool },
    ListAppend(Value),
    ListRemove(usize),
}

impl FieldAction {
    pub fn is_write(&self) -> bool {
        !matches!(
            self,
            FieldAction::ReadWhole
                | FieldAction::MapGet(_)
                | FieldAction::ListGet(_)
                | FieldAction::MapLookup(_)
                | FieldAction::ListLookup(_)
        )
    }
}

/// A context-qualified action against one field of a record
#[derive(Debug, Clone, PartialEq)]
pub struct FieldOperation {
    pub field: String,
    pub contexts: Vec<ContextStep>,
    pub action: FieldAction,
}

impl FieldOperation {
    pub fn new(field: impl Into<String>, contexts: Vec<ContextStep>, action: FieldAction) -> Self {
        Self {
            field: field.into(),
            contexts,
            action,
        }
    }
}

/// Record metadata returned alongside every store response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RecordMeta {
    /// Incremented by every successful write
    pub generation: u32,
    /// Milliseconds since the Unix epoch of the last successful write
    pub last_update_ms: u64,
}

/// Opaque record version captured at read time
///
/// Moved into the conditional write that consumes it, so a token can never
/// be reused for a second attempt.
#[derive(Debug, PartialEq, Eq)]
pub struct VersionToken(u32);

impl VersionToken {
    pub fn capture(meta: &RecordMeta) -> Self {
        Self(meta.generation)
    }

    pub fn generation(&self) -> u32 {
        self.0
    }
}

/// Response to a read or write: one value per requested operation
#[derive(Debug, Clone, PartialEq)]
pub struct RecordView {
    pub values: Vec<Value>,
    pub meta: RecordMeta,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReadRequest {
    pub key: Key,
    pub ops: Vec<FieldOperation>,
}

#[derive(Debug, PartialEq)]
pub enum WriteRequest {
    /// Apply `ops` atomically, optionally only if the generation still matches
    Operate {
        key: Key,
        ops: Vec<FieldOperation>,
        expected: Option<VersionToken>,
    },
    /// A write the store must refuse with the given (negative) result code
    Reject { key: Key, code: i32 },
}

impl WriteRequest {
    pub fn key(&self) -> &Key {
        match self {
            WriteRequest::Operate { key, .. } | WriteRequest::Reject { key, .. } => key,
        }
    }
}

/// Store-level result codes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResultCode {
    RecordNotFound,
    GenerationMismatch { key: String, expected: u32 },
    ParameterError,
    Timeout,
    ElementNotFound,
    OpNotApplicable,
    /// Client-assigned rejection, always negative
    Rejected(i32),
}

impl ResultCode {
    pub fn code(&self) -> i32 {
        match self {
            ResultCode::RecordNotFound => 2,
            ResultCode::GenerationMismatch { .. } => 3,
            ResultCode::ParameterError => 4,
            ResultCode::Timeout => 9,
            ResultCode::ElementNotFound => 23,
            ResultCode::OpNotApplicable => 26,
            ResultCode::Rejected(code) => *code,
        }
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("store result code {code}: {message}")]
pub struct StoreError {
    pub code: ResultCode,
    pub message: String,
}

impl StoreError {
    pub fn new(code: ResultCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Trait for record store operations
///
/// This keeps the document layer decoupled from any concrete store. Every
/// call is a blocking request/response; batch calls report one result per
/// request, in request order.
pub trait RecordStore: Send + Sync {
    /// Run read-only operations against one record
    fn read(&self, key: &Key, ops: &[FieldOperation]) -> Result<RecordView, StoreError>;

    /// Apply operations atomically, rejecting with `GenerationMismatch` when
    /// `expected` no longer matches the record
    fn write(
        &self,
        key: &Key,
        ops: &[FieldOperation],
        expected: Option<VersionToken>,
    ) -> Result<RecordView, StoreError>;

    fn batch_read(&self, requests: &[ReadRequest]) -> Vec<Result<RecordView, StoreError>> {
        requests
            .iter()
            .map(|request| self.read(&request.key, &request.ops))
            .collect()
    }

    fn batch_write(&self, requests: Vec<WriteRequest>) -> Vec<Result<RecordView, StoreError>> {
        requests
            .into_iter()
            .map(|request| match request {
                WriteRequest::Operate { key, ops, expected } => self.write(&key, &ops, expected),
                WriteRequest::Reject { key, code } => Err(StoreError::new(
                    ResultCode::Rejected(code),
                    format!("write to {} rejected", key),
                )),
            })
            .collect()
    }
}

/// Trait for getting the current time
///
/// Record metadata timestamps and time-relative filter helpers go through
/// this so tests can pin the clock.
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> u64;
}
