use crate::error::DocumentError;

use super::predicate::{parse_index, parse_predicate};
use super::token::{AggregateFunction, FilterStep, PathToken};

/// Split a path string into typed tokens
///
/// The result always starts with [`PathToken::Root`]; `"$"` alone yields
/// just the root (the identity path). Filter predicates are parsed here but
/// not evaluated.
///
/// # Example
/// ```
/// use docpath::path::{tokenize, PathToken};
///
/// let tokens = tokenize("$.a.b[1]").unwrap();
/// assert_eq!(
///     tokens,
///     vec![
///         PathToken::Root,
///         PathToken::MapKey("a".into()),
///         PathToken::MapKey("b".into()),
///         PathToken::ListIndex(1),
///     ]
/// );
/// ```
pub fn tokenize(path: &str) -> Result<Vec<PathToken>, DocumentError> {
    if !path.starts_with('$') {
        return Err(DocumentError::path_prefix(path));
    }

    let fail = |message: String| DocumentError::path_format(path, message);
    let chars: Vec<char> = path.chars().collect();
    let mut tokens = vec![PathToken::Root];
    let mut i = 1;

    while i < chars.len() {
        match chars[i] {
            '.' if chars.get(i + 1) == Some(&'.') => {
                tokens.push(PathToken::DeepScan);
                i += 2;
                match chars.get(i) {
                    Some('[') => {}
                    Some(c) if is_name_char(*c) => {
                        let (token, end) = read_member(&chars, i).map_err(&fail)?;
                        if matches!(token, PathToken::Function(_)) {
                            return Err(fail("a function cannot follow '..'".to_string()));
                        }
                        tokens.push(token);
                        i = end;
                    }
                    _ => return Err(fail("'..' must be followed by a name, '*' or '['".into())),
                }
            }
            '.' => {
                let (token, end) = read_member(&chars, i + 1).map_err(&fail)?;
                tokens.push(token);
                i = end;
            }
            '[' => {
                let (token, end) = read_bracket(&chars, i).map_err(&fail)?;
                tokens.push(token);
                i = end;
            }
            other => {
                return Err(fail(format!("unexpected '{}' at offset {}", other, i)));
            }
        }
    }

    if let Some(position) = tokens
        .iter()
        .position(|token| matches!(token, PathToken::Function(_)))
    {
        if position != tokens.len() - 1 {
            return Err(fail("a function must be the last step".to_string()));
        }
    }

    Ok(tokens)
}

fn is_name_char(c: char) -> bool {
    !matches!(c, '.' | '[' | ']' | '(' | ')')
}

/// A name after `.` or `..`: map key, `*`, or `name()` function call
fn read_member(chars: &[char], start: usize) -> Result<(PathToken, usize), String> {
    let mut i = start;
    while chars.get(i).is_some_and(|c| is_name_char(*c)) {
        i += 1;
    }
    if i == start {
        return Err(format!("empty segment at offset {}", start));
    }
    let name: String = chars[start..i].iter().collect();

    if chars.get(i) == Some(&'(') {
        if chars.get(i + 1) != Some(&')') {
            return Err(format!("function '{}' takes no arguments", name));
        }
        let function = AggregateFunction::from_name(&name)
            .ok_or_else(|| format!("unknown function '{}()'", name))?;
        return Ok((PathToken::Function(function), i + 2));
    }

    if name == "*" {
        return Ok((PathToken::Wildcard, i));
    }
    Ok((PathToken::MapKey(name), i))
}

/// `[digits]`, `[*]`, or `[?( predicate )]` starting at the `[`
fn read_bracket(chars: &[char], open: usize) -> Result<(PathToken, usize), String> {
    let start = open + 1;

    if chars.get(start) == Some(&'?') {
        if chars.get(start + 1) != Some(&'(') {
            return Err("filter must be written as [?( ... )]".to_string());
        }
        let close = matching_paren(chars, start + 1)?;
        if chars.get(close + 1) != Some(&']') {
            return Err("filter must end with ')]'".to_string());
        }
        let source: String = chars[start + 2..close].iter().collect();
        let predicate =
            parse_predicate(&source).map_err(|message| format!("bad filter: {}", message))?;
        let source = source.trim().to_string();
        return Ok((PathToken::Filter(FilterStep { source, predicate }), close + 2));
    }

    let close = chars[start..]
        .iter()
        .position(|c| *c == ']')
        .map(|offset| start + offset)
        .ok_or_else(|| format!("unterminated '[' at offset {}", open))?;
    let content: String = chars[start..close].iter().collect();

    if content == "*" {
        return Ok((PathToken::ListWildcard, close + 1));
    }
    let index =
        parse_index(&content).ok_or_else(|| format!("invalid list index '[{}]'", content))?;
    Ok((PathToken::ListIndex(index), close + 1))
}

/// Index of the `)` closing the `(` at `open`, skipping quoted text
fn matching_paren(chars: &[char], open: usize) -> Result<usize, String> {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut i = open;

    while let Some(&c) = chars.get(i) {
        match quote {
            Some(q) => {
                if c == '\\' {
                    i += 1;
                } else if c == q {
                    quote = None;
                }
            }
            None => match c {
                '\'' | '"' => quote = Some(c),
                '(' => depth += 1,
                ')' => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(i);
                    }
                }
                _ => {}
            },
        }
        i += 1;
    }
    Err("unterminated filter".to_string())
}
