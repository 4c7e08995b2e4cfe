/// Generic query engine adapter
///
/// Runs the residual part of a path over a fetched subtree. Path evaluation
/// is delegated to `jsonpath-rust`; this module renders the residual tokens
/// as an RFC 9535 expression, applies trailing aggregate functions, and
/// performs the mutations the engine itself does not offer.

use jsonpath_rust::JsonPath;
use serde_json::{Number, Value};
use std::cmp::Ordering;
use tracing::trace;

use crate::error::DocumentError;
use crate::path::predicate::parse_index;
use crate::path::{
    bracketed_name, is_shorthand_name, AggregateFunction, CompiledPath, PathToken, RecordContext,
    Residual,
};

use super::Operation;

/// One step of a location reported by the engine
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum Step {
    Key(String),
    Index(usize),
}

/// Reject mutations the residual cannot express as write locations
///
/// Functions produce values rather than locations, and a bare trailing
/// filter selects existing elements without naming where a new value goes.
pub fn check_writable(path: &CompiledPath, operation: &Operation) -> Result<(), DocumentError> {
    let Some(residual) = path.residual() else {
        return Ok(());
    };
    match (residual.tokens().last(), operation) {
        (_, Operation::Get) => Ok(()),
        (Some(PathToken::Function(_)), _) => Err(DocumentError::query_to_non_read(path.source())),
        (Some(PathToken::Filter(_)), Operation::Put(_) | Operation::Append(_)) => {
            Err(DocumentError::query_to_non_read(path.source()))
        }
        _ => Ok(()),
    }
}

/// Evaluate `operation` over a fetched subtree
///
/// `Get` returns the query result; mutations return the rewritten subtree.
pub fn run(
    subtree: Value,
    residual: &Residual,
    record: &RecordContext,
    operation: &Operation,
) -> Result<Value, DocumentError> {
    match operation {
        Operation::Get => read(&subtree, residual, record),
        Operation::Put(value) => set_or_add(subtree, residual, record, value),
        Operation::Append(value) => append(subtree, residual, record, value),
        Operation::Delete => delete(subtree, residual, record),
    }
}

/// Render residual tokens as an RFC 9535 query
///
/// A trailing function is left out; it is applied to the matches afterwards.
pub fn render(tokens: &[PathToken], record: &RecordContext) -> String {
    let mut out = String::new();
    let mut after_scan = false;

    for token in tokens {
        match token {
            PathToken::Root => out.push('$'),
            PathToken::MapKey(name) if is_shorthand_name(name) => {
                if !after_scan {
                    out.push('.');
                }
                out.push_str(name);
            }
            PathToken::MapKey(name) => out.push_str(&bracketed_name(name)),
            PathToken::ListIndex(index) => out.push_str(&format!("[{}]", index)),
            PathToken::Wildcard => {
                if !after_scan {
                    out.push('.');
                }
                out.push('*');
            }
            PathToken::ListWildcard => out.push_str("[*]"),
            PathToken::DeepScan => out.push_str(".."),
            PathToken::Filter(step) => {
                out.push_str("[?(");
                out.push_str(&step.predicate.render(record));
                out.push_str(")]");
            }
            PathToken::Function(_) => {}
        }
        after_scan = matches!(token, PathToken::DeepScan);
    }
    out
}

/// All matches as a list, or the aggregate when the path ends in a function
pub fn read(
    subtree: &Value,
    residual: &Residual,
    record: &RecordContext,
) -> Result<Value, DocumentError> {
    let expression = render(residual.tokens(), record);
    trace!(%expression, "reading residual query");

    let matches: Vec<Value> = if subtree.is_null() {
        Vec::new()
    } else {
        subtree
            .query(&expression)
            .map_err(|err| DocumentError::query_evaluation(&expression, err.to_string()))?
            .into_iter()
            .cloned()
            .collect()
    };

    match residual.tokens().last() {
        Some(PathToken::Function(function)) => aggregate(*function, matches, &expression),
        _ => Ok(Value::Array(matches)),
    }
}

/// Replace every match with `value`, or create it when nothing matches
///
/// Creation needs a concrete last step: a map key is inserted into every
/// matching parent map, a list index past the end is pushed onto every
/// matching parent list.
pub fn set_or_add(
    mut subtree: Value,
    residual: &Residual,
    record: &RecordContext,
    value: &Value,
) -> Result<Value, DocumentError> {
    let expression = render(residual.tokens(), record);
    trace!(%expression, "set-or-add over residual query");

    let found = locations(&subtree, &expression)?;
    if !found.is_empty() {
        for location in &found {
            if let Some(slot) = locate_mut(&mut subtree, location) {
                *slot = value.clone();
            }
        }
        return Ok(subtree);
    }

    let mut created = 0;
    if let Some((last, parents)) = residual.tokens().split_last() {
        if !matches!(parents.last(), Some(PathToken::DeepScan) | None) {
            let parent_expression = render(parents, record);
            for location in locations(&subtree, &parent_expression)? {
                match (locate_mut(&mut subtree, &location), last) {
                    (Some(Value::Object(map)), PathToken::MapKey(name)) => {
                        map.insert(name.clone(), value.clone());
                        created += 1;
                    }
                    (Some(Value::Array(list)), PathToken::ListIndex(index))
                        if *index >= list.len() =>
                    {
                        list.push(value.clone());
                        created += 1;
                    }
                    _ => {}
                }
            }
        }
    }

    if created == 0 {
        return Err(DocumentError::object_not_found(format!(
            "nothing matches '{}'",
            expression
        )));
    }
    Ok(subtree)
}

/// Push `value` onto every matched list
pub fn append(
    mut subtree: Value,
    residual: &Residual,
    record: &RecordContext,
    value: &Value,
) -> Result<Value, DocumentError> {
    let expression = render(residual.tokens(), record);
    trace!(%expression, "append over residual query");

    let found = locations(&subtree, &expression)?;
    if found.is_empty() {
        return Err(DocumentError::object_not_found(format!(
            "nothing matches '{}'",
            expression
        )));
    }

    for location in &found {
        match locate_mut(&mut subtree, location) {
            Some(Value::Array(list)) => list.push(value.clone()),
            Some(other) => {
                return Err(DocumentError::not_a_list(format!(
                    "match of '{}' is a {}",
                    expression,
                    kind(other)
                )));
            }
            None => {
                return Err(DocumentError::object_not_found(format!(
                    "match of '{}' disappeared",
                    expression
                )));
            }
        }
    }
    Ok(subtree)
}

/// Remove every match; removing the root leaves an empty container
pub fn delete(
    mut subtree: Value,
    residual: &Residual,
    record: &RecordContext,
) -> Result<Value, DocumentError> {
    let expression = render(residual.tokens(), record);
    trace!(%expression, "delete over residual query");

    let mut found = locations(&subtree, &expression)?;
    found.sort();
    found.dedup();

    // Deepest and highest index first so the remaining locations stay valid
    for location in found.iter().rev() {
        let Some((last, parent)) = location.split_last() else {
            subtree = empty_like(&subtree);
            continue;
        };
        match (locate_mut(&mut subtree, parent), last) {
            (Some(Value::Object(map)), Step::Key(name)) => {
                map.remove(name);
            }
            (Some(Value::Array(list)), Step::Index(index)) if *index < list.len() => {
                list.remove(*index);
            }
            _ => {}
        }
    }
    Ok(subtree)
}

fn aggregate(
    function: AggregateFunction,
    matches: Vec<Value>,
    expression: &str,
) -> Result<Value, DocumentError> {
    if function == AggregateFunction::Length {
        let length = match matches.as_slice() {
            [Value::Array(items)] => items.len(),
            [Value::Object(map)] => map.len(),
            [Value::String(text)] => text.chars().count(),
            _ => matches.len(),
        };
        return Ok(Value::from(length));
    }

    // A single list match is aggregated over its elements
    let values = match <[Value; 1]>::try_from(matches) {
        Ok([Value::Array(items)]) => items,
        Ok([single]) => vec![single],
        Err(matches) => matches,
    };

    let numbers = values
        .iter()
        .map(|value| {
            value.as_f64().ok_or_else(|| {
                DocumentError::query_evaluation(
                    expression,
                    format!("{}() needs numbers, found {}", function.name(), value),
                )
            })
        })
        .collect::<Result<Vec<f64>, _>>()?;
    if numbers.is_empty() {
        return Err(DocumentError::query_evaluation(
            expression,
            format!("{}() of an empty selection", function.name()),
        ));
    }

    let count = numbers.len() as f64;
    let mean = numbers.iter().sum::<f64>() / count;
    match function {
        AggregateFunction::Min => Ok(extreme(values, &numbers, Ordering::Less)),
        AggregateFunction::Max => Ok(extreme(values, &numbers, Ordering::Greater)),
        AggregateFunction::Avg => float(mean, expression),
        AggregateFunction::Stddev => {
            let variance = numbers.iter().map(|n| (n - mean).powi(2)).sum::<f64>() / count;
            float(variance.sqrt(), expression)
        }
        AggregateFunction::Length => Ok(Value::from(values.len())),
    }
}

/// The input element holding the smallest or largest number
fn extreme(mut values: Vec<Value>, numbers: &[f64], wanted: Ordering) -> Value {
    let mut best = 0;
    for (index, number) in numbers.iter().enumerate().skip(1) {
        if number.partial_cmp(&numbers[best]) == Some(wanted) {
            best = index;
        }
    }
    values.swap_remove(best)
}

fn float(number: f64, expression: &str) -> Result<Value, DocumentError> {
    Number::from_f64(number)
        .map(Value::Number)
        .ok_or_else(|| DocumentError::query_evaluation(expression, "result is not a finite number"))
}

/// Locations of all matches of `expression`
fn locations(subtree: &Value, expression: &str) -> Result<Vec<Vec<Step>>, DocumentError> {
    if subtree.is_null() {
        return Ok(Vec::new());
    }
    let paths = subtree
        .query_only_path(expression)
        .map_err(|err| DocumentError::query_evaluation(expression, err.to_string()))?;

    paths
        .iter()
        .map(|path| {
            parse_location(path).ok_or_else(|| {
                DocumentError::query_evaluation(
                    expression,
                    format!("unrecognised match location '{}'", path),
                )
            })
        })
        .collect()
}

/// Parse a normalized location such as `$['store']['book'][0]`
fn parse_location(path: &str) -> Option<Vec<Step>> {
    let chars: Vec<char> = path.chars().collect();
    if chars.first() != Some(&'$') {
        return None;
    }

    let mut steps = Vec::new();
    let mut i = 1;
    while i < chars.len() {
        match chars[i] {
            '.' if chars.get(i + 1) == Some(&'[') => i += 1,
            '.' => {
                let start = i + 1;
                i = start;
                while chars.get(i).is_some_and(|c| *c != '.' && *c != '[') {
                    i += 1;
                }
                if i == start {
                    return None;
                }
                steps.push(Step::Key(chars[start..i].iter().collect()));
            }
            '[' => {
                i += 1;
                let quote = *chars.get(i)?;
                if quote == '\'' || quote == '"' {
                    let (name, end) = read_quoted(&chars, i + 1, quote)?;
                    steps.push(Step::Key(name));
                    i = end;
                } else {
                    let start = i;
                    while chars.get(i).is_some_and(|c| c.is_ascii_digit()) {
                        i += 1;
                    }
                    let digits: String = chars[start..i].iter().collect();
                    steps.push(Step::Index(parse_index(&digits)?));
                }
                if chars.get(i) != Some(&']') {
                    return None;
                }
                i += 1;
            }
            _ => return None,
        }
    }
    Some(steps)
}

/// Quoted member name starting after the opening quote; returns the name
/// and the offset just past the closing quote
fn read_quoted(chars: &[char], start: usize, quote: char) -> Option<(String, usize)> {
    let mut name = String::new();
    let mut i = start;
    loop {
        let c = *chars.get(i)?;
        i += 1;
        if c == quote {
            return Some((name, i));
        }
        if c != '\\' {
            name.push(c);
            continue;
        }
        let escaped = *chars.get(i)?;
        i += 1;
        name.push(match escaped {
            'b' => '\u{8}',
            'f' => '\u{c}',
            'n' => '\n',
            'r' => '\r',
            't' => '\t',
            'u' => {
                let hex: String = chars.get(i..i + 4)?.iter().collect();
                i += 4;
                char::from_u32(u32::from_str_radix(&hex, 16).ok()?)?
            }
            other => other,
        });
    }
}

fn locate_mut<'a>(root: &'a mut Value, steps: &[Step]) -> Option<&'a mut Value> {
    steps.iter().try_fold(root, |current, step| match step {
        Step::Key(name) => current.as_object_mut()?.get_mut(name),
        Step::Index(index) => current.as_array_mut()?.get_mut(*index),
    })
}

fn empty_like(value: &Value) -> Value {
    match value {
        Value::Object(_) => Value::Object(serde_json::Map::new()),
        Value::Array(_) => Value::Array(Vec::new()),
        _ => Value::Null,
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "map",
    }
}
