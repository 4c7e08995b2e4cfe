/// Native operation builder
///
/// Translates map-key / list-index steps into a context chain plus a
/// terminal store action, so the store touches only the addressed value.

use crate::config::ListPutMode;
use crate::error::DocumentError;
use crate::path::{CompiledPath, PathToken};
use crate::store::{ContextStep, FieldAction, FieldOperation};

use super::Operation;

/// Context steps for the native prefix of a compiled path
pub fn native_steps(path: &CompiledPath) -> Result<Vec<ContextStep>, DocumentError> {
    path.native_tokens()
        .iter()
        .map(|token| match token {
            PathToken::MapKey(name) => Ok(ContextStep::MapKey(name.clone())),
            PathToken::ListIndex(index) => Ok(ContextStep::ListIndex(*index)),
            other => Err(DocumentError::path_format(
                path.source(),
                format!("'{}' is not a native step", other),
            )),
        })
        .collect()
}

/// Build the store operation for `operation` at `steps` within `field`
///
/// An empty step list addresses the whole field.
pub fn build(
    field: &str,
    steps: &[ContextStep],
    operation: &Operation,
    list_put: ListPutMode,
) -> Result<FieldOperation, DocumentError> {
    let Some((last, parents)) = steps.split_last() else {
        let action = match operation {
            Operation::Get => FieldAction::ReadWhole,
            Operation::Put(value) => FieldAction::WriteWhole(value.clone()),
            Operation::Delete => FieldAction::ClearWhole,
            Operation::Append(_) => return Err(DocumentError::AppendToRoot),
        };
        return Ok(FieldOperation::new(field, Vec::new(), action));
    };

    let action = match operation {
        // The whole path addresses the list itself
        Operation::Append(value) => {
            return Ok(FieldOperation::new(
                field,
                steps.to_vec(),
                FieldAction::ListAppend(value.clone()),
            ));
        }
        Operation::Get => match last {
            ContextStep::MapKey(name) => FieldAction::MapGet(name.clone()),
            ContextStep::ListIndex(index) => FieldAction::ListGet(*index),
        },
        Operation::Put(value) => match last {
            ContextStep::MapKey(name) => FieldAction::MapPut(name.clone(), value.clone()),
            ContextStep::ListIndex(index) => FieldAction::ListSet {
                index: *index,
                value: value.clone(),
                pad: list_put == ListPutMode::AutoExtend,
            },
        },
        Operation::Delete => match last {
            ContextStep::MapKey(name) => FieldAction::MapRemove(name.clone()),
            ContextStep::ListIndex(index) => FieldAction::ListRemove(*index),
        },
    };

    Ok(FieldOperation::new(field, parents.to_vec(), action))
}

/// Phase-1 fetch of the subtree at `prefix`
///
/// For a read, an absent terminal key or index fetches null so the query
/// has no match. Writes keep the strict lookup.
pub fn fetch(
    field: &str,
    prefix: &[ContextStep],
    operation: &Operation,
) -> Result<FieldOperation, DocumentError> {
    let mut op = build(field, prefix, &Operation::Get, ListPutMode::Strict)?;
    if !operation.is_write() {
        op.action = match op.action {
            FieldAction::MapGet(name) => FieldAction::MapLookup(name),
            FieldAction::ListGet(index) => FieldAction::ListLookup(index),
            other => other,
        };
    }
    Ok(op)
}

/// Phase-2 write of a recomputed subtree back at `prefix`
pub fn store_subtree(
    field: &str,
    prefix: &[ContextStep],
    subtree: serde_json::Value,
) -> Result<FieldOperation, DocumentError> {
    build(field, prefix, &Operation::Put(subtree), ListPutMode::Strict)
}
