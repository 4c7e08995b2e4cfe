/// Document operation executor
///
/// This module contains the client that runs get / put / append / delete
/// against a path inside a record field, choosing between a single native
/// store call and the two-phase fetch-evaluate-write protocol.

pub mod batch;
pub mod concurrency;
pub mod native;
pub mod query;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;

use crate::config::ClientConfig;
use crate::error::DocumentError;
use crate::path::{compile, RecordContext, Residual};
use crate::store::{Clock, ContextStep, Key, RecordMeta, RecordStore};
use crate::value::to_document_value;

pub use batch::{BatchItem, ItemResult, ItemState, BATCH_ITEM_POISONED};
pub use concurrency::OptimisticGuard;

/// What to do at the addressed location
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", content = "value", rename_all = "camelCase")]
pub enum Operation {
    Get,
    Put(Value),
    Append(Value),
    Delete,
}

impl Operation {
    pub fn is_write(&self) -> bool {
        !matches!(self, Operation::Get)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Operation::Get => "get",
            Operation::Put(_) => "put",
            Operation::Append(_) => "append",
            Operation::Delete => "delete",
        }
    }
}

/// The document client
///
/// The client is stateless between calls and works against the provided
/// dependencies (record store, clock). Every call compiles its path, then
/// either issues one native store call or runs the two-phase protocol.
pub struct DocumentClient<'a> {
    /// Record store all operations go through
    pub store: &'a dyn RecordStore,
    /// Time source for `since_update()` in filters
    pub clock: &'a dyn Clock,
    pub config: ClientConfig,
}

impl<'a> DocumentClient<'a> {
    pub fn new(store: &'a dyn RecordStore, clock: &'a dyn Clock, config: ClientConfig) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    /// Key in the configured namespace and set
    pub fn key(&self, user_key: impl Into<String>) -> Key {
        Key::new(&self.config.namespace, &self.config.set_name, user_key)
    }

    /// Read the value at `path` in each of `fields`
    ///
    /// Native paths return the addressed value. Two-phase paths return the
    /// list of matches, or a scalar when the path ends in a function.
    ///
    /// # Example
    /// ```
    /// use docpath::config::ClientConfig;
    /// use docpath::executor::DocumentClient;
    /// use docpath::store::{Key, MemoryStore, SystemClock};
    /// use serde_json::json;
    ///
    /// let key = Key::new("test", "documents", "1");
    /// let store = MemoryStore::new().with_record(key.clone(), [("doc", json!({"a": {"b": [1, 2, 3]}}))]);
    /// let client = DocumentClient::new(&store, &SystemClock, ClientConfig::default());
    ///
    /// assert_eq!(client.get_one(&key, "doc", "$.a.b[1]").unwrap(), json!(2));
    /// assert_eq!(client.get_one(&key, "doc", "$.a.b[*]").unwrap(), json!([1, 2, 3]));
    /// ```
    pub fn get(
        &self,
        key: &Key,
        fields: &[&str],
        path: &str,
    ) -> Result<BTreeMap<String, Value>, DocumentError> {
        self.execute(key, fields, path, &Operation::Get)
    }

    pub fn get_one(&self, key: &Key, field: &str, path: &str) -> Result<Value, DocumentError> {
        let mut values = self.get(key, &[field], path)?;
        Ok(values.remove(field).unwrap_or(Value::Null))
    }

    /// Upsert a map key, or set an existing list element
    pub fn put<T>(&self, key: &Key, fields: &[&str], path: &str, value: &T) -> Result<(), DocumentError>
    where
        T: Serialize + ?Sized,
    {
        let value = to_document_value(value)?;
        self.execute(key, fields, path, &Operation::Put(value))
            .map(|_| ())
    }

    /// Append to the list at `path`
    pub fn append<T>(
        &self,
        key: &Key,
        fields: &[&str],
        path: &str,
        value: &T,
    ) -> Result<(), DocumentError>
    where
        T: Serialize + ?Sized,
    {
        let value = to_document_value(value)?;
        self.execute(key, fields, path, &Operation::Append(value))
            .map(|_| ())
    }

    /// Remove the value at `path`; removing an absent map key succeeds
    pub fn delete(&self, key: &Key, fields: &[&str], path: &str) -> Result<(), DocumentError> {
        self.execute(key, fields, path, &Operation::Delete)
            .map(|_| ())
    }

    /// Run many items, each isolated from the others' failures
    pub fn batch_perform(&self, items: Vec<BatchItem>) -> Vec<ItemResult> {
        batch::perform(self, items)
    }

    pub(crate) fn record_context(&self, meta: &RecordMeta) -> RecordContext {
        RecordContext {
            generation: meta.generation,
            last_update_ms: meta.last_update_ms,
            now_ms: self.clock.now_millis(),
        }
    }

    fn execute(
        &self,
        key: &Key,
        fields: &[&str],
        path: &str,
        operation: &Operation,
    ) -> Result<BTreeMap<String, Value>, DocumentError> {
        let compiled = compile(path)?;
        query::check_writable(&compiled, operation)?;
        let steps = native::native_steps(&compiled)?;

        if fields.is_empty() {
            return Ok(BTreeMap::new());
        }

        match compiled.residual() {
            None => self.single_phase(key, fields, &steps, operation),
            Some(residual) => self.two_phase(key, fields, &steps, residual, operation),
        }
    }

    fn single_phase(
        &self,
        key: &Key,
        fields: &[&str],
        steps: &[ContextStep],
        operation: &Operation,
    ) -> Result<BTreeMap<String, Value>, DocumentError> {
        let ops = fields
            .iter()
            .map(|field| native::build(field, steps, operation, self.config.list_put))
            .collect::<Result<Vec<_>, _>>()?;

        debug!(%key, op = operation.name(), fields = ops.len(), "native operation");
        if operation.is_write() {
            self.store.write(key, &ops, None)?;
            return Ok(fields.iter().map(|f| (f.to_string(), Value::Null)).collect());
        }

        let view = self.store.read(key, &ops)?;
        Ok(fields
            .iter()
            .map(|f| f.to_string())
            .zip(view.values)
            .collect())
    }

    fn two_phase(
        &self,
        key: &Key,
        fields: &[&str],
        prefix: &[ContextStep],
        residual: &Residual,
        operation: &Operation,
    ) -> Result<BTreeMap<String, Value>, DocumentError> {
        let fetch = fields
            .iter()
            .map(|field| native::fetch(field, prefix, operation))
            .collect::<Result<Vec<_>, _>>()?;
        let view = self.store.read(key, &fetch)?;
        debug!(
            %key,
            op = operation.name(),
            generation = view.meta.generation,
            "fetched subtree for second phase"
        );

        let record = self.record_context(&view.meta);
        let guard = OptimisticGuard::capture(key, &view.meta);

        let mut results = BTreeMap::new();
        let mut writes = Vec::with_capacity(fields.len());
        for (field, subtree) in fields.iter().zip(view.values) {
            let output = query::run(subtree, residual, &record, operation)?;
            if operation.is_write() {
                writes.push(native::store_subtree(field, prefix, output)?);
                results.insert(field.to_string(), Value::Null);
            } else {
                results.insert(field.to_string(), output);
            }
        }

        if !writes.is_empty() {
            let expected = guard.expected_generation();
            guard.apply(self.store, &writes)?;
            debug!(%key, expected, "conditional write applied");
        }
        Ok(results)
    }
}
