/// Batch coordinator
///
/// Runs many (key, fields, path, operation) items in at most two store round
/// trips. Every item gets its own result slot; a failing item never affects
/// the others, and a failing field withholds its whole item's write.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::error::{classify, DocumentError};
use crate::path::{compile, Residual};
use crate::store::{
    ContextStep, FieldOperation, Key, ReadRequest, RecordStore, RecordView, ResultCode,
    StoreError, WriteRequest,
};

use super::concurrency::{surface_write_error, OptimisticGuard};
use super::{native, query, DocumentClient, Operation};

/// Result code of a write withheld because one of its fields failed
pub const BATCH_ITEM_POISONED: i32 = -20;

/// One unit of work in a batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchItem {
    pub key: Key,
    pub fields: Vec<String>,
    pub path: String,
    pub operation: Operation,
}

impl BatchItem {
    pub fn new<I, S>(key: Key, fields: I, path: impl Into<String>, operation: Operation) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            key,
            fields: fields.into_iter().map(Into::into).collect(),
            path: path.into(),
            operation,
        }
    }
}

/// Progress of an item through the protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ItemState {
    Pending,
    /// Native operation done, or two-phase subtree fetched
    FirstStepDone,
    /// Two-phase evaluation (and write, if any) done
    SecondStepDone,
    Failed,
}

/// Per-item outcome, one entry per field name
#[derive(Debug, Clone, PartialEq)]
pub struct ItemResult {
    pub key: Key,
    pub state: ItemState,
    pub fields: BTreeMap<String, Result<Value, DocumentError>>,
}

impl ItemResult {
    pub fn is_ok(&self) -> bool {
        self.fields.values().all(Result::is_ok)
    }

    pub fn field(&self, name: &str) -> Option<&Result<Value, DocumentError>> {
        self.fields.get(name)
    }
}

enum Plan {
    Read(Vec<FieldOperation>),
    Write(Vec<FieldOperation>),
    TwoPhase {
        fetch: Vec<FieldOperation>,
        prefix: Vec<ContextStep>,
        residual: Residual,
    },
}

struct Slot {
    item: BatchItem,
    plan: Option<Plan>,
    state: ItemState,
    fields: BTreeMap<String, Result<Value, DocumentError>>,
}

impl Slot {
    fn new(item: BatchItem, plan: Result<Plan, DocumentError>) -> Self {
        let mut slot = Self {
            item,
            plan: None,
            state: ItemState::Pending,
            fields: BTreeMap::new(),
        };
        match plan {
            Ok(plan) => slot.plan = Some(plan),
            Err(err) => slot.fail(err),
        }
        slot
    }

    fn fail(&mut self, err: DocumentError) {
        self.fields = self
            .item
            .fields
            .iter()
            .map(|field| (field.clone(), Err(err.clone())))
            .collect();
        self.state = ItemState::Failed;
    }

    fn succeed(&mut self, values: Vec<Value>, state: ItemState) {
        self.fields = self.item.fields.iter().cloned().zip(values.into_iter().map(Ok)).collect();
        self.state = state;
    }

    fn written(&mut self, state: ItemState) {
        let nulls = vec![Value::Null; self.item.fields.len()];
        self.succeed(nulls, state);
    }
}

/// Compile an item into the store operations it needs
fn prepare(item: &BatchItem, client: &DocumentClient<'_>) -> Result<Plan, DocumentError> {
    let compiled = compile(&item.path)?;
    query::check_writable(&compiled, &item.operation)?;
    let steps = native::native_steps(&compiled)?;

    let Some(residual) = compiled.residual() else {
        let ops = item
            .fields
            .iter()
            .map(|field| native::build(field, &steps, &item.operation, client.config.list_put))
            .collect::<Result<Vec<_>, _>>()?;
        return Ok(if item.operation.is_write() {
            Plan::Write(ops)
        } else {
            Plan::Read(ops)
        });
    };

    let fetch = item
        .fields
        .iter()
        .map(|field| native::fetch(field, &steps, &item.operation))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Plan::TwoPhase {
        fetch,
        prefix: steps,
        residual: residual.clone(),
    })
}

pub(crate) fn perform(client: &DocumentClient<'_>, items: Vec<BatchItem>) -> Vec<ItemResult> {
    let max = client.config.batch.max_requests_per_call;
    let mut slots: Vec<Slot> = items
        .into_iter()
        .map(|item| {
            let plan = prepare(&item, client);
            Slot::new(item, plan)
        })
        .collect();

    // Round 1: native reads, two-phase fetches, native writes
    let mut read_slots = Vec::new();
    let mut reads = Vec::new();
    let mut write_slots = Vec::new();
    let mut writes = Vec::new();
    for (index, slot) in slots.iter().enumerate() {
        match &slot.plan {
            Some(Plan::Read(ops)) | Some(Plan::TwoPhase { fetch: ops, .. }) => {
                read_slots.push(index);
                reads.push(ReadRequest {
                    key: slot.item.key.clone(),
                    ops: ops.clone(),
                });
            }
            Some(Plan::Write(ops)) => {
                write_slots.push(index);
                writes.push(WriteRequest::Operate {
                    key: slot.item.key.clone(),
                    ops: ops.clone(),
                    expected: None,
                });
            }
            None => {}
        }
    }

    debug!(reads = reads.len(), writes = writes.len(), "batch round 1");
    let read_results = chunked_read(client.store, &reads, max);
    let write_results = chunked_write(client.store, writes, max);

    let mut fetched = Vec::new();
    for (index, result) in read_slots.into_iter().zip(read_results) {
        let slot = &mut slots[index];
        let two_phase = matches!(slot.plan, Some(Plan::TwoPhase { .. }));
        match result {
            Ok(view) if two_phase => {
                slot.state = ItemState::FirstStepDone;
                fetched.push((index, view));
            }
            Ok(view) => slot.succeed(view.values, ItemState::FirstStepDone),
            Err(err) => slot.fail(classify(err)),
        }
    }
    for (index, result) in write_slots.into_iter().zip(write_results) {
        match result {
            Ok(_) => slots[index].written(ItemState::FirstStepDone),
            Err(err) => slots[index].fail(classify(err)),
        }
    }

    // Round 2: evaluate residuals, then conditional or poisoned writes
    let mut second_slots = Vec::new();
    let mut second_writes = Vec::new();
    for (index, view) in fetched {
        if let Some(request) = evaluate(client, &mut slots[index], view) {
            second_slots.push(index);
            second_writes.push(request);
        }
    }

    debug!(writes = second_writes.len(), "batch round 2");
    let second_results = chunked_write(client.store, second_writes, max);
    for (index, result) in second_slots.into_iter().zip(second_results) {
        let slot = &mut slots[index];
        if slot.state == ItemState::Failed {
            // Poisoned write; field errors are already recorded
            continue;
        }
        match result {
            Ok(_) => slot.written(ItemState::SecondStepDone),
            Err(err) => slot.fail(surface_write_error(err)),
        }
    }

    slots
        .into_iter()
        .map(|slot| ItemResult {
            key: slot.item.key,
            state: slot.state,
            fields: slot.fields,
        })
        .collect()
}

/// Run the residual for every field of a fetched item
///
/// Returns the write request to send, if the operation writes.
fn evaluate(
    client: &DocumentClient<'_>,
    slot: &mut Slot,
    view: RecordView,
) -> Option<WriteRequest> {
    let Slot {
        item,
        plan,
        state,
        fields,
    } = slot;
    let Some(Plan::TwoPhase {
        prefix, residual, ..
    }) = plan
    else {
        return None;
    };

    let record = client.record_context(&view.meta);
    let outcomes: Vec<(String, Result<Value, DocumentError>)> = item
        .fields
        .iter()
        .zip(view.values)
        .map(|(field, subtree)| {
            let output = query::run(subtree, residual, &record, &item.operation);
            (field.clone(), output)
        })
        .collect();
    let failed = outcomes.iter().any(|(_, outcome)| outcome.is_err());

    if !item.operation.is_write() {
        *fields = outcomes.into_iter().collect();
        *state = if failed {
            ItemState::Failed
        } else {
            ItemState::SecondStepDone
        };
        return None;
    }

    let mut ops = Vec::with_capacity(outcomes.len());
    let mut errors = BTreeMap::new();
    for (field, outcome) in outcomes {
        match outcome.and_then(|subtree| native::store_subtree(&field, prefix, subtree)) {
            Ok(op) => ops.push(op),
            Err(err) => {
                errors.insert(field, err);
            }
        }
    }

    if errors.is_empty() {
        return Some(OptimisticGuard::capture(&item.key, &view.meta).into_request(ops));
    }

    warn!(
        key = %item.key,
        code = BATCH_ITEM_POISONED,
        "field failed in second phase; item write poisoned"
    );
    *fields = item
        .fields
        .iter()
        .map(|field| {
            let err = errors
                .remove(field)
                .unwrap_or(DocumentError::BatchItemAborted {
                    code: BATCH_ITEM_POISONED,
                });
            (field.clone(), Err(err))
        })
        .collect();
    *state = ItemState::Failed;
    Some(WriteRequest::Reject {
        key: item.key.clone(),
        code: BATCH_ITEM_POISONED,
    })
}

fn chunked_read(
    store: &dyn RecordStore,
    requests: &[ReadRequest],
    max: usize,
) -> Vec<Result<RecordView, StoreError>> {
    requests
        .chunks(max.max(1))
        .flat_map(|chunk| aligned(store.batch_read(chunk), chunk.len()))
        .collect()
}

fn chunked_write(
    store: &dyn RecordStore,
    requests: Vec<WriteRequest>,
    max: usize,
) -> Vec<Result<RecordView, StoreError>> {
    let mut results = Vec::with_capacity(requests.len());
    let mut pending = requests.into_iter().peekable();
    while pending.peek().is_some() {
        let chunk: Vec<WriteRequest> = pending.by_ref().take(max.max(1)).collect();
        let expected = chunk.len();
        results.extend(aligned(store.batch_write(chunk), expected));
    }
    results
}

/// Exactly one result per request, whatever the store returned
fn aligned(
    mut results: Vec<Result<RecordView, StoreError>>,
    expected: usize,
) -> Vec<Result<RecordView, StoreError>> {
    results.truncate(expected);
    while results.len() < expected {
        results.push(Err(StoreError::new(
            ResultCode::Timeout,
            "store returned no result for batch request",
        )));
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use crate::store::testing::InterleavingStore;
    use crate::store::{FixedClock, MemoryStore};
    use serde_json::json;
    use std::sync::atomic::Ordering;

    fn key(id: &str) -> Key {
        Key::new("test", "documents", id)
    }

    fn seeded() -> MemoryStore {
        MemoryStore::new()
            .with_record(key("1"), [("doc", json!({"a": {"b": [1, 2, 3]}}))])
            .with_record(key("2"), [("doc", json!({"tags": ["x"], "n": 1}))])
            .with_record(
                key("3"),
                [
                    ("home", json!({"lists": {"a": []}})),
                    ("work", json!({"lists": {"a": 5}})),
                ],
            )
    }

    fn ok(result: &ItemResult, field: &str) -> Value {
        result.field(field).cloned().unwrap().unwrap()
    }

    #[test]
    fn test_mixed_batch() {
        let store = InterleavingStore::new(seeded());
        let clock = FixedClock::new(0);
        let client = DocumentClient::new(&store, &clock, ClientConfig::default());

        let results = client.batch_perform(vec![
            BatchItem::new(key("1"), ["doc"], "$.a.b[1]", Operation::Get),
            BatchItem::new(key("1"), ["doc"], "$.a.b[*]", Operation::Get),
            BatchItem::new(key("2"), ["doc"], "$.tags", Operation::Append(json!("y"))),
            BatchItem::new(key("2"), ["doc"], "$.*", Operation::Delete),
        ]);

        assert_eq!(results.len(), 4);
        assert_eq!(ok(&results[0], "doc"), json!(2));
        assert_eq!(results[0].state, ItemState::FirstStepDone);
        assert_eq!(ok(&results[1], "doc"), json!([1, 2, 3]));
        assert_eq!(results[1].state, ItemState::SecondStepDone);
        assert_eq!(ok(&results[2], "doc"), Value::Null);
        assert_eq!(results[2].state, ItemState::FirstStepDone);

        // Round 1 wrote to key 2 after round 1 fetched it, so the two-phase
        // delete sees a stale generation
        assert_eq!(results[3].state, ItemState::Failed);
        assert!(matches!(
            results[3].field("doc"),
            Some(Err(DocumentError::ConcurrencyConflict { .. }))
        ));
        assert_eq!(
            store.inner.bin(&key("2"), "doc"),
            Some(json!({"tags": ["x", "y"], "n": 1}))
        );
        assert_eq!(store.batch_reads.load(Ordering::SeqCst), 1);
        assert_eq!(store.batch_writes.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_two_phase_write_succeeds() {
        let store = seeded();
        let clock = FixedClock::new(0);
        let client = DocumentClient::new(&store, &clock, ClientConfig::default());

        let results = client.batch_perform(vec![BatchItem::new(
            key("1"),
            ["doc"],
            "$.a.b[?(@ >= 2)]",
            Operation::Delete,
        )]);

        assert!(results[0].is_ok());
        assert_eq!(results[0].state, ItemState::SecondStepDone);
        assert_eq!(store.bin(&key("1"), "doc"), Some(json!({"a": {"b": [1]}})));
    }

    #[test]
    fn test_malformed_item_is_isolated() {
        let store = seeded();
        let clock = FixedClock::new(0);
        let client = DocumentClient::new(&store, &clock, ClientConfig::default());

        let results = client.batch_perform(vec![
            BatchItem::new(key("1"), ["doc"], "$.a.b[0]", Operation::Put(json!(10))),
            BatchItem::new(key("1"), ["doc"], "$.a[oops", Operation::Get),
            BatchItem::new(key("2"), ["doc"], "$.n", Operation::Get),
            BatchItem::new(key("missing"), ["doc"], "$.n", Operation::Get),
        ]);

        assert!(results[0].is_ok());
        assert!(matches!(
            results[1].field("doc"),
            Some(Err(DocumentError::PathFormat { .. }))
        ));
        assert_eq!(results[1].state, ItemState::Failed);
        assert_eq!(ok(&results[2], "doc"), json!(1));
        assert!(matches!(
            results[3].field("doc"),
            Some(Err(DocumentError::ObjectNotFound { .. }))
        ));
        assert_eq!(store.bin(&key("1"), "doc"), Some(json!({"a": {"b": [10, 2, 3]}})));
    }

    #[test]
    fn test_missing_ancestor_item_is_isolated() {
        let store = seeded();
        let clock = FixedClock::new(0);
        let client = DocumentClient::new(&store, &clock, ClientConfig::default());

        let results = client.batch_perform(vec![
            BatchItem::new(key("2"), ["doc"], "$.n", Operation::Put(json!(2))),
            BatchItem::new(key("2"), ["doc"], "$.x.y", Operation::Put(json!(5))),
            BatchItem::new(key("2"), ["doc"], "$.tags", Operation::Append(json!("y"))),
            BatchItem::new(key("1"), ["doc"], "$.a.b[2]", Operation::Get),
        ]);

        assert!(results[0].is_ok());
        assert_eq!(results[1].state, ItemState::Failed);
        assert!(matches!(
            results[1].field("doc"),
            Some(Err(DocumentError::ObjectNotFound { .. }))
        ));
        assert!(results[2].is_ok());
        assert_eq!(ok(&results[3], "doc"), json!(3));
        assert_eq!(
            store.bin(&key("2"), "doc"),
            Some(json!({"tags": ["x", "y"], "n": 2}))
        );
    }

    #[test]
    fn test_two_phase_get_of_absent_key_is_per_field() {
        let store = MemoryStore::new().with_record(
            key("4"),
            [("home", json!({"opt": [1, 2]})), ("work", json!({}))],
        );
        let clock = FixedClock::new(0);
        let client = DocumentClient::new(&store, &clock, ClientConfig::default());

        let results = client.batch_perform(vec![BatchItem::new(
            key("4"),
            ["home", "work"],
            "$.opt[*]",
            Operation::Get,
        )]);

        assert!(results[0].is_ok());
        assert_eq!(ok(&results[0], "home"), json!([1, 2]));
        assert_eq!(ok(&results[0], "work"), json!([]));
    }

    #[test]
    fn test_failing_field_poisons_item_write() {
        let store = seeded();
        let clock = FixedClock::new(0);
        let client = DocumentClient::new(&store, &clock, ClientConfig::default());

        let results = client.batch_perform(vec![BatchItem::new(
            key("3"),
            ["home", "work"],
            "$.lists.*",
            Operation::Append(json!(1)),
        )]);

        let result = &results[0];
        assert_eq!(result.state, ItemState::Failed);
        assert_eq!(
            result.field("home"),
            Some(&Err(DocumentError::BatchItemAborted {
                code: BATCH_ITEM_POISONED
            }))
        );
        assert!(matches!(
            result.field("work"),
            Some(Err(DocumentError::NotAList { .. }))
        ));

        let record = store.record(&key("3")).unwrap();
        assert_eq!(record.meta.generation, 1);
        assert_eq!(record.bins["home"], json!({"lists": {"a": []}}));
    }

    #[test]
    fn test_two_phase_get_field_errors_are_per_field() {
        let store = seeded();
        let clock = FixedClock::new(0);
        let client = DocumentClient::new(&store, &clock, ClientConfig::default());

        let results = client.batch_perform(vec![BatchItem::new(
            key("3"),
            ["home", "work"],
            "$.lists.a.min()",
            Operation::Get,
        )]);

        assert!(matches!(
            results[0].field("home"),
            Some(Err(DocumentError::QueryEvaluation { .. }))
        ));
        assert_eq!(ok(&results[0], "work"), json!(5));
        assert_eq!(results[0].state, ItemState::Failed);
    }

    #[test]
    fn test_requests_are_chunked() {
        let store = InterleavingStore::new(seeded());
        let clock = FixedClock::new(0);
        let mut config = ClientConfig::default();
        config.batch.max_requests_per_call = 2;
        let client = DocumentClient::new(&store, &clock, config);

        let items: Vec<BatchItem> = (0..5)
            .map(|_| BatchItem::new(key("1"), ["doc"], "$.a.b[0]", Operation::Get))
            .collect();
        let results = client.batch_perform(items);

        assert!(results.iter().all(ItemResult::is_ok));
        assert_eq!(store.batch_reads.load(Ordering::SeqCst), 3);
        assert_eq!(store.batch_writes.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_missing_results_are_reported() {
        struct ShortStore;

        impl RecordStore for ShortStore {
            fn read(&self, _: &Key, _: &[FieldOperation]) -> Result<RecordView, StoreError> {
                unreachable!()
            }

            fn write(
                &self,
                _: &Key,
                _: &[FieldOperation],
                _: Option<crate::store::VersionToken>,
            ) -> Result<RecordView, StoreError> {
                unreachable!()
            }

            fn batch_read(&self, _: &[ReadRequest]) -> Vec<Result<RecordView, StoreError>> {
                Vec::new()
            }
        }

        let store = ShortStore;
        let clock = FixedClock::new(0);
        let client = DocumentClient::new(&store, &clock, ClientConfig::default());
        let results =
            client.batch_perform(vec![BatchItem::new(key("1"), ["doc"], "$.a", Operation::Get)]);
        assert!(matches!(
            results[0].field("doc"),
            Some(Err(DocumentError::Store { code: 9, .. }))
        ));
    }

    #[test]
    fn test_items_deserialize_from_json() {
        let items: Vec<BatchItem> = serde_json::from_value(json!([
            {
                "key": {"namespace": "test", "setName": "documents", "userKey": "1"},
                "fields": ["doc"],
                "path": "$.a",
                "operation": {"op": "put", "value": {"x": 1}}
            },
            {
                "key": {"namespace": "test", "setName": "documents", "userKey": "1"},
                "fields": ["doc"],
                "path": "$.a",
                "operation": {"op": "get"}
            }
        ]))
        .unwrap();
        assert_eq!(items[0].operation, Operation::Put(json!({"x": 1})));
        assert_eq!(items[1].operation, Operation::Get);
    }

    #[test]
    fn test_poisoned_write_is_rejected_by_store() {
        let store = seeded();
        let results = store.batch_write(vec![WriteRequest::Reject {
            key: key("1"),
            code: BATCH_ITEM_POISONED,
        }]);
        assert!(matches!(
            &results[0],
            Err(StoreError {
                code: ResultCode::Rejected(BATCH_ITEM_POISONED),
                ..
            })
        ));
    }
}
