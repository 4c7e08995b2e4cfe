use std::fmt;

use super::predicate::Predicate;

/// Trailing aggregate functions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFunction {
    Length,
    Min,
    Max,
    Avg,
    Stddev,
}

impl AggregateFunction {
    pub const ALL: [AggregateFunction; 5] = [
        AggregateFunction::Length,
        AggregateFunction::Min,
        AggregateFunction::Max,
        AggregateFunction::Avg,
        AggregateFunction::Stddev,
    ];

    pub fn name(self) -> &'static str {
        match self {
            AggregateFunction::Length => "length",
            AggregateFunction::Min => "min",
            AggregateFunction::Max => "max",
            AggregateFunction::Avg => "avg",
            AggregateFunction::Stddev => "stddev",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|function| function.name() == name)
    }
}

/// A filter step: the predicate text as written plus its parsed tree
#[derive(Debug, Clone, PartialEq)]
pub struct FilterStep {
    pub source: String,
    pub predicate: Predicate,
}

/// One step of a path expression
#[derive(Debug, Clone, PartialEq)]
pub enum PathToken {
    /// `$`
    Root,
    /// `.name`
    MapKey(String),
    /// `[3]`
    ListIndex(usize),
    /// `.*`
    Wildcard,
    /// `[*]`
    ListWildcard,
    /// `..`
    DeepScan,
    /// `[?( ... )]`
    Filter(FilterStep),
    /// `.min()` and friends
    Function(AggregateFunction),
}

impl PathToken {
    /// Whether the step needs the generic engine rather than a native
    /// context operation
    pub fn requires_generic_eval(&self) -> bool {
        match self {
            PathToken::Root | PathToken::MapKey(_) | PathToken::ListIndex(_) => false,
            PathToken::Wildcard
            | PathToken::ListWildcard
            | PathToken::DeepScan
            | PathToken::Filter(_)
            | PathToken::Function(_) => true,
        }
    }
}

impl fmt::Display for PathToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathToken::Root => write!(f, "$"),
            PathToken::MapKey(name) => write!(f, ".{}", name),
            PathToken::ListIndex(index) => write!(f, "[{}]", index),
            PathToken::Wildcard => write!(f, ".*"),
            PathToken::ListWildcard => write!(f, "[*]"),
            PathToken::DeepScan => write!(f, ".."),
            PathToken::Filter(step) => write!(f, "[?({})]", step.source),
            PathToken::Function(function) => write!(f, ".{}()", function.name()),
        }
    }
}

/// Whether `name` can be written as `.name` in RFC 9535 syntax
pub(crate) fn is_shorthand_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_alphabetic() || first == '_' || !first.is_ascii() => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || c == '_' || !c.is_ascii())
}

/// `['name']` with quotes and backslashes escaped
pub(crate) fn bracketed_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    out.push_str("['");
    for c in name.chars() {
        match c {
            '\'' => out.push_str("\\'"),
            '\\' => out.push_str("\\\\"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push_str("']");
    out
}
