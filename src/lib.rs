/// docpath - JSONPath-addressed documents inside record fields
///
/// This library compiles JSONPath-like expressions into native nested
/// collection operations where it can, and falls back to a fetch, evaluate,
/// conditional-write protocol where it cannot. Batches run the same
/// protocol over many keys with per-item failure isolation.

pub mod config;
pub mod error;
pub mod executor;
pub mod path;
pub mod store;
pub mod value;

// Re-export commonly used types
pub use config::ClientConfig;
pub use error::DocumentError;
pub use executor::{BatchItem, DocumentClient, ItemResult, ItemState, Operation};
pub use path::{compile, CompiledPath, PathToken};
pub use store::{Key, MemoryStore, RecordStore};
