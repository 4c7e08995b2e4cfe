/// Path compiler
///
/// Turns a JSONPath-like string into typed tokens and splits it into the
/// prefix the record store can address natively and the residual query
/// the generic engine has to evaluate.

mod classifier;
pub mod predicate;
mod token;
mod tokenizer;

pub use classifier::{compile, CompiledPath, Residual};
pub use predicate::{Predicate, RecordContext};
pub use token::{AggregateFunction, FilterStep, PathToken};
pub use tokenizer::tokenize;

pub(crate) use token::{bracketed_name, is_shorthand_name};
