/// Record store boundary
///
/// The document layer talks to its backing store only through the
/// [`RecordStore`] trait. [`MemoryStore`] is an in-process implementation
/// used by tests and the CLI.

mod memory;
#[cfg(test)]
pub(crate) mod testing;
mod traits;

pub use memory::{FixedClock, MemoryStore, Record, SystemClock};
pub use traits::{
    Clock, ContextStep, FieldAction, FieldOperation, Key, ReadRequest, RecordMeta, RecordStore,
    RecordView, ResultCode, StoreError, VersionToken, WriteRequest,
};
