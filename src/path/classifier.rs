use tracing::debug;

use crate::error::DocumentError;

use super::token::{AggregateFunction, PathToken};
use super::tokenizer::tokenize;

/// Substrings that start a step only the generic engine can evaluate
const STRUCTURAL_MARKERS: [&str; 4] = ["[*]", "..", "[?", ".*"];

/// The part of a path handed to the generic engine, re-rooted at `$`
#[derive(Debug, Clone, PartialEq)]
pub struct Residual {
    expression: String,
    tokens: Vec<PathToken>,
}

impl Residual {
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Tokens of the expression, starting with `Root`
    pub fn tokens(&self) -> &[PathToken] {
        &self.tokens
    }
}

/// A path split into a native prefix and an optional residual query
///
/// Every native token is a map key or list index. Once a token needing the
/// generic engine appears, it and everything after it belong to the
/// residual, even steps that would be native on their own.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledPath {
    source: String,
    native: Vec<PathToken>,
    residual: Option<Residual>,
}

impl CompiledPath {
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Map-key / list-index steps, without the root
    pub fn native_tokens(&self) -> &[PathToken] {
        &self.native
    }

    pub fn residual(&self) -> Option<&Residual> {
        self.residual.as_ref()
    }

    pub fn requires_second_phase(&self) -> bool {
        self.residual.is_some()
    }

    /// `$` with nothing after it
    pub fn is_root(&self) -> bool {
        self.native.is_empty() && self.residual.is_none()
    }
}

/// Offset of the first generic-eval marker in `path`, if any
fn first_marker(path: &str) -> Option<usize> {
    let mut markers: Vec<String> = STRUCTURAL_MARKERS.iter().map(|m| m.to_string()).collect();
    markers.extend(
        AggregateFunction::ALL
            .iter()
            .map(|function| format!(".{}()", function.name())),
    );
    markers
        .iter()
        .filter_map(|marker| path.find(marker.as_str()))
        .min()
}

/// Tokenize and classify a path
///
/// # Example
/// ```
/// use docpath::path::compile;
///
/// let compiled = compile("$.a.b[*]").unwrap();
/// assert!(compiled.requires_second_phase());
/// assert_eq!(compiled.native_tokens().len(), 2);
/// assert_eq!(compiled.residual().unwrap().expression(), "$[*]");
/// ```
pub fn compile(path: &str) -> Result<CompiledPath, DocumentError> {
    // Validate the whole path first so errors point at what the caller wrote
    let full = tokenize(path)?;

    let Some(split) = first_marker(path) else {
        let native: Vec<PathToken> = full.into_iter().skip(1).collect();
        if native.iter().any(PathToken::requires_generic_eval) {
            return Err(DocumentError::path_format(
                path,
                "query step without a recognised marker",
            ));
        }
        debug!(path, native_steps = native.len(), "compiled native path");
        return Ok(CompiledPath {
            source: path.to_string(),
            native,
            residual: None,
        });
    };

    let prefix = &path[..split];
    let native: Vec<PathToken> = tokenize(prefix)?.into_iter().skip(1).collect();
    if native.iter().any(PathToken::requires_generic_eval) {
        return Err(DocumentError::path_format(
            path,
            format!("prefix '{}' must contain only map and list steps", prefix),
        ));
    }

    let expression = format!("${}", &path[split..]);
    let tokens = tokenize(&expression)
        .map_err(|err| DocumentError::path_format(path, err.to_string()))?;

    debug!(
        path,
        native_steps = native.len(),
        residual = %expression,
        "compiled two-phase path"
    );

    Ok(CompiledPath {
        source: path.to_string(),
        native,
        residual: Some(Residual { expression, tokens }),
    })
}
