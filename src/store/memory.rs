use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use super::traits::{
    Clock, ContextStep, FieldAction, FieldOperation, Key, RecordMeta, RecordStore, RecordView,
    ResultCode, StoreError, VersionToken,
};

/// A stored record: named fields plus metadata
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Record {
    pub bins: BTreeMap<String, Value>,
    pub meta: RecordMeta,
}

/// In-memory record store
///
/// Supports:
/// - Context-qualified map and list actions on JSON-valued fields
/// - Atomic multi-operation writes (all or nothing)
/// - Generation checks for conditional writes
/// - Last-update timestamps from a pluggable [`Clock`]
#[derive(Clone)]
pub struct MemoryStore {
    records: Arc<Mutex<HashMap<Key, Record>>>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("records", &self.records)
            .field("clock", &"<clock>")
            .finish()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            records: Arc::new(Mutex::new(HashMap::new())),
            clock,
        }
    }

    /// Seed a record with initial fields (generation 1)
    pub fn with_record<I, S>(self, key: Key, bins: I) -> Self
    where
        I: IntoIterator<Item = (S, Value)>,
        S: Into<String>,
    {
        let record = Record {
            bins: bins.into_iter().map(|(name, v)| (name.into(), v)).collect(),
            meta: RecordMeta {
                generation: 1,
                last_update_ms: self.clock.now_millis(),
            },
        };
        self.lock().insert(key, record);
        self
    }

    /// Snapshot of a record, if present
    pub fn record(&self, key: &Key) -> Option<Record> {
        self.lock().get(key).cloned()
    }

    /// Snapshot of one field of a record, if present
    pub fn bin(&self, key: &Key, field: &str) -> Option<Value> {
        self.lock()
            .get(key)
            .and_then(|record| record.bins.get(field).cloned())
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Key, Record>> {
        // A panic while holding the lock leaves no half-applied write behind:
        // writes are staged on a copy and swapped in at the end.
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl RecordStore for MemoryStore {
    fn read(&self, key: &Key, ops: &[FieldOperation]) -> Result<RecordView, StoreError> {
        if let Some(op) = ops.iter().find(|op| op.action.is_write()) {
            return Err(StoreError::new(
                ResultCode::ParameterError,
                format!("write action on field '{}' sent as a read", op.field),
            ));
        }

        let records = self.lock();
        let record = records.get(key).ok_or_else(|| {
            StoreError::new(ResultCode::RecordNotFound, format!("record {} not found", key))
        })?;

        let values = ops
            .iter()
            .map(|op| read_operation(&record.bins, op))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(RecordView {
            values,
            meta: record.meta,
        })
    }

    fn write(
        &self,
        key: &Key,
        ops: &[FieldOperation],
        expected: Option<VersionToken>,
    ) -> Result<RecordView, StoreError> {
        let mut records = self.lock();
        let existing = records.get(key);

        if let Some(token) = expected {
            let current = existing.map(|record| record.meta.generation).unwrap_or(0);
            if current != token.generation() {
                return Err(StoreError::new(
                    ResultCode::GenerationMismatch {
                        key: key.to_string(),
                        expected: token.generation(),
                    },
                    format!(
                        "generation is {} but write expected {}",
                        current,
                        token.generation()
                    ),
                ));
            }
        }

        // Stage on a copy so a failing op leaves the record untouched
        let mut staged = existing.cloned().unwrap_or_default();
        let mut values = Vec::with_capacity(ops.len());
        for op in ops {
            values.push(write_operation(&mut staged.bins, op)?);
        }

        staged.meta.generation = staged.meta.generation.wrapping_add(1);
        staged.meta.last_update_ms = self.clock.now_millis();
        let meta = staged.meta;
        records.insert(key.clone(), staged);

        Ok(RecordView { values, meta })
    }
}

fn read_operation(bins: &BTreeMap<String, Value>, op: &FieldOperation) -> Result<Value, StoreError> {
    let Some(root) = bins.get(&op.field) else {
        let lenient = matches!(
            op.action,
            FieldAction::ReadWhole | FieldAction::MapLookup(_) | FieldAction::ListLookup(_)
        );
        if op.contexts.is_empty() && lenient {
            return Ok(Value::Null);
        }
        return Err(missing_field(op));
    };

    read_action(locate(root, &op.contexts)?, &op.action)
}

fn read_action(target: &Value, action: &FieldAction) -> Result<Value, StoreError> {
    match action {
        FieldAction::ReadWhole => Ok(target.clone()),
        FieldAction::MapGet(name) => {
            let map = expect_map(target)?;
            map.get(name).cloned().ok_or_else(|| {
                StoreError::new(
                    ResultCode::ElementNotFound,
                    format!("map key '{}' not found", name),
                )
            })
        }
        FieldAction::ListGet(index) => {
            let list = expect_list(target)?;
            list.get(*index).cloned().ok_or_else(|| out_of_range(*index, list.len()))
        }
        FieldAction::MapLookup(name) => {
            Ok(expect_map(target)?.get(name).cloned().unwrap_or(Value::Null))
        }
        FieldAction::ListLookup(index) => {
            Ok(expect_list(target)?.get(*index).cloned().unwrap_or(Value::Null))
        }
        other => Err(StoreError::new(
            ResultCode::ParameterError,
            format!("{:?} is not a read action", other),
        )),
    }
}

fn write_operation(
    bins: &mut BTreeMap<String, Value>,
    op: &FieldOperation,
) -> Result<Value, StoreError> {
    if op.contexts.is_empty() {
        match &op.action {
            FieldAction::WriteWhole(value) => {
                bins.insert(op.field.clone(), value.clone());
                return Ok(Value::Null);
            }
            FieldAction::ClearWhole => {
                match bins.get(&op.field).map(empty_like) {
                    Some(Some(empty)) => {
                        bins.insert(op.field.clone(), empty);
                    }
                    Some(None) => {
                        bins.remove(&op.field);
                    }
                    None => {}
                }
                return Ok(Value::Null);
            }
            _ => {}
        }

        // Map and list actions on an absent field create the container
        if !bins.contains_key(&op.field) {
            match &op.action {
                FieldAction::ReadWhole | FieldAction::MapRemove(_) => return Ok(Value::Null),
                FieldAction::MapPut(..) => {
                    bins.insert(op.field.clone(), Value::Object(Map::new()));
                }
                FieldAction::ListAppend(_) | FieldAction::ListSet { pad: true, .. } => {
                    bins.insert(op.field.clone(), Value::Array(Vec::new()));
                }
                _ => return Err(missing_field(op)),
            }
        }
    }

    let root = bins.get_mut(&op.field).ok_or_else(|| missing_field(op))?;
    let target = locate_mut(root, &op.contexts)?;

    match &op.action {
        FieldAction::ReadWhole
        | FieldAction::MapGet(_)
        | FieldAction::ListGet(_)
        | FieldAction::MapLookup(_)
        | FieldAction::ListLookup(_) => read_action(target, &op.action),
        FieldAction::WriteWhole(value) => {
            *target = value.clone();
            Ok(Value::Null)
        }
        FieldAction::ClearWhole => {
            *target = empty_like(target).unwrap_or(Value::Null);
            Ok(Value::Null)
        }
        FieldAction::MapPut(name, value) => {
            expect_map_mut(target)?.insert(name.clone(), value.clone());
            Ok(Value::Null)
        }
        FieldAction::MapRemove(name) => {
            expect_map_mut(target)?.remove(name);
            Ok(Value::Null)
        }
        FieldAction::ListSet { index, value, pad } => {
            let list = expect_list_mut(target)?;
            if *index < list.len() {
                list[*index] = value.clone();
            } else if *pad {
                list.resize(*index, Value::Null);
                list.push(value.clone());
            } else {
                return Err(out_of_range(*index, list.len()));
            }
            Ok(Value::Null)
        }
        FieldAction::ListAppend(value) => {
            let list = expect_list_mut(target)?;
            list.push(value.clone());
            Ok(Value::from(list.len()))
        }
        FieldAction::ListRemove(index) => {
            let list = expect_list_mut(target)?;
            if *index >= list.len() {
                return Err(out_of_range(*index, list.len()));
            }
            Ok(list.remove(*index))
        }
    }
}

/// Empty container with the same shape, or `None` for scalars
fn empty_like(value: &Value) -> Option<Value> {
    match value {
        Value::Object(_) => Some(Value::Object(Map::new())),
        Value::Array(_) => Some(Value::Array(Vec::new())),
        _ => None,
    }
}

fn locate<'a>(root: &'a Value, contexts: &[ContextStep]) -> Result<&'a Value, StoreError> {
    let mut current = root;
    for step in contexts {
        current = match step {
            ContextStep::MapKey(name) => expect_map(current)?.get(name).ok_or_else(|| {
                StoreError::new(
                    ResultCode::ElementNotFound,
                    format!("context map key '{}' not found", name),
                )
            })?,
            ContextStep::ListIndex(index) => {
                let list = expect_list(current)?;
                list.get(*index).ok_or_else(|| out_of_range(*index, list.len()))?
            }
        };
    }
    Ok(current)
}

fn locate_mut<'a>(root: &'a mut Value, contexts: &[ContextStep]) -> Result<&'a mut Value, StoreError> {
    let mut current = root;
    for step in contexts {
        current = match step {
            ContextStep::MapKey(name) => {
                expect_map_mut(current)?.get_mut(name).ok_or_else(|| {
                    StoreError::new(
                        ResultCode::ElementNotFound,
                        format!("context map key '{}' not found", name),
                    )
                })?
            }
            ContextStep::ListIndex(index) => {
                let list = expect_list_mut(current)?;
                let len = list.len();
                list.get_mut(*index).ok_or_else(|| out_of_range(*index, len))?
            }
        };
    }
    Ok(current)
}

fn expect_map(value: &Value) -> Result<&Map<String, Value>, StoreError> {
    value.as_object().ok_or_else(|| {
        StoreError::new(
            ResultCode::ParameterError,
            format!("map operation on {}", type_name(value)),
        )
    })
}

fn expect_map_mut(value: &mut Value) -> Result<&mut Map<String, Value>, StoreError> {
    let found = type_name(value);
    value.as_object_mut().ok_or_else(|| {
        StoreError::new(
            ResultCode::ParameterError,
            format!("map operation on {}", found),
        )
    })
}

fn expect_list(value: &Value) -> Result<&Vec<Value>, StoreError> {
    value.as_array().ok_or_else(|| {
        StoreError::new(
            ResultCode::OpNotApplicable,
            format!("list operation on {}", type_name(value)),
        )
    })
}

fn expect_list_mut(value: &mut Value) -> Result<&mut Vec<Value>, StoreError> {
    let found = type_name(value);
    value.as_array_mut().ok_or_else(|| {
        StoreError::new(
            ResultCode::OpNotApplicable,
            format!("list operation on {}", found),
        )
    })
}

fn missing_field(op: &FieldOperation) -> StoreError {
    StoreError::new(
        ResultCode::ElementNotFound,
        format!("field '{}' not found", op.field),
    )
}

fn out_of_range(index: usize, len: usize) -> StoreError {
    StoreError::new(
        ResultCode::ElementNotFound,
        format!("list index {} out of range (length {})", index, len),
    )
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "map",
    }
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// Fixed clock for testing
#[derive(Debug, Default)]
pub struct FixedClock {
    millis: AtomicU64,
}

impl FixedClock {
    pub fn new(millis: u64) -> Self {
        Self {
            millis: AtomicU64::new(millis),
        }
    }

    pub fn advance(&self, millis: u64) {
        self.millis.fetch_add(millis, Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now_millis(&self) -> u64 {
        self.millis.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn key() -> Key {
        Key::new("test", "docs", "1")
    }

    fn store_with(doc: Value) -> MemoryStore {
        MemoryStore::with_clock(Arc::new(FixedClock::new(1_000))).with_record(key(), [("doc", doc)])
    }

    fn op(contexts: Vec<ContextStep>, action: FieldAction) -> FieldOperation {
        FieldOperation::new("doc", contexts, action)
    }

    #[test]
    fn test_read_nested_list_element() {
        let store = store_with(json!({"a": {"b": [1, 2, 3]}}));
        let view = store
            .read(
                &key(),
                &[op(
                    vec![ContextStep::MapKey("a".into()), ContextStep::MapKey("b".into())],
                    FieldAction::ListGet(1),
                )],
            )
            .unwrap();
        assert_eq!(view.values, vec![json!(2)]);
        assert_eq!(view.meta.generation, 1);
    }

    #[test]
    fn test_read_rejects_write_actions() {
        let store = store_with(json!({}));
        let err = store
            .read(&key(), &[op(vec![], FieldAction::MapRemove("a".into()))])
            .unwrap_err();
        assert_eq!(err.code, ResultCode::ParameterError);
    }

    #[test]
    fn test_read_missing_record() {
        let store = MemoryStore::new();
        let err = store
            .read(&key(), &[op(vec![], FieldAction::ReadWhole)])
            .unwrap_err();
        assert_eq!(err.code, ResultCode::RecordNotFound);
    }

    #[test]
    fn test_list_action_on_scalar_is_not_applicable() {
        let store = store_with(json!({"a": 1}));
        let err = store
            .read(
                &key(),
                &[op(vec![ContextStep::MapKey("a".into())], FieldAction::ListGet(0))],
            )
            .unwrap_err();
        assert_eq!(err.code, ResultCode::OpNotApplicable);
    }

    #[test]
    fn test_lookup_of_absent_entry_reads_null() {
        let store = store_with(json!({"a": {"b": [1]}}));
        let a = || vec![ContextStep::MapKey("a".into())];
        let view = store
            .read(
                &key(),
                &[
                    op(a(), FieldAction::MapLookup("opt".into())),
                    op(a(), FieldAction::MapLookup("b".into())),
                    op(vec![ContextStep::MapKey("a".into()), ContextStep::MapKey("b".into())], FieldAction::ListLookup(4)),
                    FieldOperation::new("absent", vec![], FieldAction::MapLookup("x".into())),
                ],
            )
            .unwrap();
        assert_eq!(view.values, vec![Value::Null, json!([1]), Value::Null, Value::Null]);

        let err = store
            .read(&key(), &[op(a(), FieldAction::ListLookup(0))])
            .unwrap_err();
        assert_eq!(err.code, ResultCode::OpNotApplicable);
    }

    #[test]
    fn test_map_context_on_list_is_parameter_error() {
        let store = store_with(json!([1, 2]));
        let err = store
            .read(
                &key(),
                &[op(vec![ContextStep::MapKey("a".into())], FieldAction::ReadWhole)],
            )
            .unwrap_err();
        assert_eq!(err.code, ResultCode::ParameterError);
    }

    #[test]
    fn test_write_bumps_generation_and_timestamp() {
        let clock = Arc::new(FixedClock::new(5_000));
        let store = MemoryStore::with_clock(clock.clone()).with_record(key(), [("doc", json!({}))]);
        clock.advance(250);

        let view = store
            .write(&key(), &[op(vec![], FieldAction::MapPut("x".into(), json!(1)))], None)
            .unwrap();

        assert_eq!(view.meta.generation, 2);
        assert_eq!(view.meta.last_update_ms, 5_250);
        assert_eq!(store.bin(&key(), "doc"), Some(json!({"x": 1})));
    }

    #[test]
    fn test_write_is_atomic_across_operations() {
        let store = store_with(json!({"a": [1]}));
        let err = store
            .write(
                &key(),
                &[
                    op(vec![], FieldAction::MapPut("b".into(), json!(2))),
                    op(vec![ContextStep::MapKey("a".into())], FieldAction::ListRemove(5)),
                ],
                None,
            )
            .unwrap_err();

        assert_eq!(err.code, ResultCode::ElementNotFound);
        let record = store.record(&key()).unwrap();
        assert_eq!(record.bins["doc"], json!({"a": [1]}));
        assert_eq!(record.meta.generation, 1);
    }

    #[test]
    fn test_conditional_write_rejects_stale_generation() {
        let store = store_with(json!({}));
        let stale = VersionToken::capture(&RecordMeta {
            generation: 7,
            last_update_ms: 0,
        });
        let err = store
            .write(&key(), &[op(vec![], FieldAction::WriteWhole(json!(1)))], Some(stale))
            .unwrap_err();
        assert_eq!(
            err.code,
            ResultCode::GenerationMismatch {
                key: "test/docs/1".to_string(),
                expected: 7
            }
        );
        assert_eq!(store.bin(&key(), "doc"), Some(json!({})));
    }

    #[test]
    fn test_clear_whole_keeps_shape() {
        let store = store_with(json!([1, 2, 3]));
        store
            .write(&key(), &[op(vec![], FieldAction::ClearWhole)], None)
            .unwrap();
        assert_eq!(store.bin(&key(), "doc"), Some(json!([])));
    }

    #[test]
    fn test_list_set_strict_and_padded() {
        let store = store_with(json!({"l": [1]}));
        let ctx = vec![ContextStep::MapKey("l".into())];

        let err = store
            .write(
                &key(),
                &[op(
                    ctx.clone(),
                    FieldAction::ListSet {
                        index: 3,
                        value: json!(9),
                        pad: false,
                    },
                )],
                None,
            )
            .unwrap_err();
        assert_eq!(err.code, ResultCode::ElementNotFound);

        store
            .write(
                &key(),
                &[op(
                    ctx,
                    FieldAction::ListSet {
                        index: 3,
                        value: json!(9),
                        pad: true,
                    },
                )],
                None,
            )
            .unwrap();
        assert_eq!(store.bin(&key(), "doc"), Some(json!({"l": [1, null, null, 9]})));
    }

    #[test]
    fn test_append_creates_absent_field() {
        let store = MemoryStore::new();
        let view = store
            .write(&key(), &[op(vec![], FieldAction::ListAppend(json!("x")))], None)
            .unwrap();
        assert_eq!(view.values, vec![json!(1)]);
        assert_eq!(store.bin(&key(), "doc"), Some(json!(["x"])));
    }
}
