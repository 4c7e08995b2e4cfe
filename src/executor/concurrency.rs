/// Optimistic concurrency for fetch-modify-write
///
/// A guard is created from the phase-1 read and consumed by the phase-2
/// write, so each captured version backs exactly one conditional write.

use tracing::warn;

use crate::error::{classify, DocumentError};
use crate::store::{
    FieldOperation, Key, RecordMeta, RecordStore, RecordView, StoreError, VersionToken,
    WriteRequest,
};

/// Version captured by a phase-1 read, waiting for its conditional write
#[derive(Debug)]
pub struct OptimisticGuard {
    key: Key,
    token: VersionToken,
}

impl OptimisticGuard {
    pub fn capture(key: &Key, meta: &RecordMeta) -> Self {
        Self {
            key: key.clone(),
            token: VersionToken::capture(meta),
        }
    }

    pub fn key(&self) -> &Key {
        &self.key
    }

    pub fn expected_generation(&self) -> u32 {
        self.token.generation()
    }

    /// Turn the guard into a conditional batch write request
    pub fn into_request(self, ops: Vec<FieldOperation>) -> WriteRequest {
        WriteRequest::Operate {
            key: self.key,
            ops,
            expected: Some(self.token),
        }
    }

    /// Write `ops` only if the record is still at the captured generation
    pub fn apply(
        self,
        store: &dyn RecordStore,
        ops: &[FieldOperation],
    ) -> Result<RecordView, DocumentError> {
        let Self { key, token } = self;
        store
            .write(&key, ops, Some(token))
            .map_err(surface_write_error)
    }
}

/// Classify a conditional write failure, reporting lost races
pub fn surface_write_error(err: StoreError) -> DocumentError {
    let err = classify(err);
    if let DocumentError::ConcurrencyConflict { key, expected } = &err {
        warn!(%key, expected, "record changed between fetch and write");
    }
    err
}
