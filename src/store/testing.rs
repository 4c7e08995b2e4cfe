/// Store doubles for protocol tests

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use super::{
    FieldOperation, Key, MemoryStore, ReadRequest, RecordStore, RecordView, StoreError,
    VersionToken, WriteRequest,
};

/// Wraps a [`MemoryStore`], counting batch calls and optionally slipping a
/// competing write in right after the next read
pub struct InterleavingStore {
    pub inner: MemoryStore,
    pending: Mutex<Option<(Key, Vec<FieldOperation>)>>,
    pub batch_reads: AtomicUsize,
    pub batch_writes: AtomicUsize,
}

impl InterleavingStore {
    pub fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            pending: Mutex::new(None),
            batch_reads: AtomicUsize::new(0),
            batch_writes: AtomicUsize::new(0),
        }
    }

    /// Apply `ops` to `key` as another writer, after the next read completes
    pub fn interleave(&self, key: Key, ops: Vec<FieldOperation>) {
        *self.pending.lock().unwrap() = Some((key, ops));
    }

    fn run_interloper(&self) {
        if let Some((key, ops)) = self.pending.lock().unwrap().take() {
            self.inner.write(&key, &ops, None).unwrap();
        }
    }
}

impl RecordStore for InterleavingStore {
    fn read(&self, key: &Key, ops: &[FieldOperation]) -> Result<RecordView, StoreError> {
        let view = self.inner.read(key, ops);
        self.run_interloper();
        view
    }

    fn write(
        &self,
        key: &Key,
        ops: &[FieldOperation],
        expected: Option<VersionToken>,
    ) -> Result<RecordView, StoreError> {
        self.inner.write(key, ops, expected)
    }

    fn batch_read(&self, requests: &[ReadRequest]) -> Vec<Result<RecordView, StoreError>> {
        self.batch_reads.fetch_add(1, Ordering::SeqCst);
        let views = self.inner.batch_read(requests);
        self.run_interloper();
        views
    }

    fn batch_write(&self, requests: Vec<WriteRequest>) -> Vec<Result<RecordView, StoreError>> {
        self.batch_writes.fetch_add(1, Ordering::SeqCst);
        self.inner.batch_write(requests)
    }
}
