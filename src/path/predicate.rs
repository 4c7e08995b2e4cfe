/// Filter predicates: the text inside `[?( ... )]`.
///
/// Predicates are lexed into a flat stream and folded into an immutable
/// [`Predicate`] tree by a shift-reduce loop that keeps one frame per open
/// block (parenthesised group or quantifier body). The tree is only ever
/// handed to the generic query engine; it never becomes a native operation.

use serde_json::Value;
use std::fmt;

use super::token::{bracketed_name, is_shorthand_name};

/// Comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    fn symbol(self) -> &'static str {
        match self {
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
        }
    }
}

/// Record metadata a predicate may compare against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetaField {
    /// `last_update()`: last write time in epoch milliseconds
    LastUpdate,
    /// `since_update()`: milliseconds elapsed since the last write
    SinceUpdate,
    /// `version()`: record generation
    Version,
}

impl MetaField {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "last_update" => Some(MetaField::LastUpdate),
            "since_update" => Some(MetaField::SinceUpdate),
            "version" => Some(MetaField::Version),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quantifier {
    All,
    Any,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelativeStep {
    Key(String),
    Index(usize),
}

/// `@`-rooted path inside a predicate
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RelativePath {
    pub steps: Vec<RelativeStep>,
}

impl fmt::Display for RelativePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@")?;
        for step in &self.steps {
            match step {
                RelativeStep::Key(name) if is_shorthand_name(name) => write!(f, ".{}", name)?,
                RelativeStep::Key(name) => write!(f, "{}", bracketed_name(name))?,
                RelativeStep::Index(index) => write!(f, "[{}]", index)?,
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Path(RelativePath),
    Literal(Value),
    Meta(MetaField),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Compare {
        left: Operand,
        op: CompareOp,
        right: Operand,
    },
    /// Bare `@.field`: true when the field exists
    Exists(RelativePath),
    Not(Box<Predicate>),
    And(Box<Predicate>, Box<Predicate>),
    Or(Box<Predicate>, Box<Predicate>),
    /// `all(@.list, cond)` / `any(@.list, cond)` over list items or map values
    Quantified {
        quantifier: Quantifier,
        over: RelativePath,
        condition: Box<Predicate>,
    },
}

/// Record state that metadata helpers resolve against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RecordContext {
    pub generation: u32,
    pub last_update_ms: u64,
    pub now_ms: u64,
}

impl Predicate {
    /// Render as an RFC 9535 logical expression, with metadata helpers
    /// replaced by their values for `record`
    pub fn render(&self, record: &RecordContext) -> String {
        let mut out = String::new();
        self.render_into(record, &mut out);
        out
    }

    fn render_into(&self, record: &RecordContext, out: &mut String) {
        match self {
            Predicate::Compare { left, op, right } => {
                render_operand(left, record, out);
                out.push(' ');
                out.push_str(op.symbol());
                out.push(' ');
                render_operand(right, record, out);
            }
            Predicate::Exists(path) => out.push_str(&path.to_string()),
            Predicate::Not(inner) => {
                out.push_str("!(");
                inner.render_into(record, out);
                out.push(')');
            }
            Predicate::And(left, right) | Predicate::Or(left, right) => {
                let connective = if matches!(self, Predicate::And(..)) {
                    " && "
                } else {
                    " || "
                };
                out.push('(');
                left.render_into(record, out);
                out.push_str(connective);
                right.render_into(record, out);
                out.push(')');
            }
            Predicate::Quantified {
                quantifier,
                over,
                condition,
            } => match quantifier {
                Quantifier::Any => {
                    out.push_str(&over.to_string());
                    out.push_str("[?");
                    condition.render_into(record, out);
                    out.push(']');
                }
                // all(x, c) == !any(x, !c)
                Quantifier::All => {
                    out.push('!');
                    out.push_str(&over.to_string());
                    out.push_str("[?!(");
                    condition.render_into(record, out);
                    out.push_str(")]");
                }
            },
        }
    }
}

fn render_operand(operand: &Operand, record: &RecordContext, out: &mut String) {
    match operand {
        Operand::Path(path) => out.push_str(&path.to_string()),
        Operand::Literal(value) => out.push_str(&value.to_string()),
        Operand::Meta(field) => {
            let resolved = match field {
                MetaField::LastUpdate => record.last_update_ms,
                MetaField::SinceUpdate => record.now_ms.saturating_sub(record.last_update_ms),
                MetaField::Version => u64::from(record.generation),
            };
            out.push_str(&resolved.to_string());
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Lexeme {
    Operand(Operand),
    Compare(CompareOp),
    /// `all(` / `any(`
    Quantifier(Quantifier),
    And,
    Or,
    Not,
    Open,
    Close,
    Comma,
}

fn lex(text: &str) -> Result<Vec<Lexeme>, String> {
    let chars: Vec<char> = text.chars().collect();
    let mut lexemes = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => {
                lexemes.push(Lexeme::Open);
                i += 1;
            }
            ')' => {
                lexemes.push(Lexeme::Close);
                i += 1;
            }
            ',' => {
                lexemes.push(Lexeme::Comma);
                i += 1;
            }
            '&' if next == Some('&') => {
                lexemes.push(Lexeme::And);
                i += 2;
            }
            '|' if next == Some('|') => {
                lexemes.push(Lexeme::Or);
                i += 2;
            }
            '=' if next == Some('=') => {
                lexemes.push(Lexeme::Compare(CompareOp::Eq));
                i += 2;
            }
            '!' if next == Some('=') => {
                lexemes.push(Lexeme::Compare(CompareOp::Ne));
                i += 2;
            }
            '!' => {
                lexemes.push(Lexeme::Not);
                i += 1;
            }
            '<' | '>' => {
                let inclusive = next == Some('=');
                let op = match (c, inclusive) {
                    ('<', false) => CompareOp::Lt,
                    ('<', true) => CompareOp::Le,
                    ('>', false) => CompareOp::Gt,
                    _ => CompareOp::Ge,
                };
                lexemes.push(Lexeme::Compare(op));
                i += if inclusive { 2 } else { 1 };
            }
            '@' => {
                let (path, end) = lex_relative_path(&chars, i + 1)?;
                lexemes.push(Lexeme::Operand(Operand::Path(path)));
                i = end;
            }
            '\'' | '"' => {
                let (literal, end) = lex_string(&chars, i)?;
                lexemes.push(Lexeme::Operand(Operand::Literal(Value::String(literal))));
                i = end;
            }
            c if c.is_ascii_digit() || (c == '-' && next.is_some_and(|n| n.is_ascii_digit())) => {
                let (number, end) = lex_number(&chars, i)?;
                lexemes.push(Lexeme::Operand(Operand::Literal(number)));
                i = end;
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                i = lex_word(&word, &chars, i, &mut lexemes)?;
            }
            other => return Err(format!("unexpected character '{}' in filter", other)),
        }
    }

    Ok(lexemes)
}

/// Keywords, literals, quantifiers, and metadata helpers; returns the
/// position after whatever the word consumed
fn lex_word(
    word: &str,
    chars: &[char],
    mut i: usize,
    lexemes: &mut Vec<Lexeme>,
) -> Result<usize, String> {
    let literal = match word {
        "true" => Some(Value::Bool(true)),
        "false" => Some(Value::Bool(false)),
        "null" => Some(Value::Null),
        _ => None,
    };
    if let Some(value) = literal {
        lexemes.push(Lexeme::Operand(Operand::Literal(value)));
        return Ok(i);
    }

    while chars.get(i).is_some_and(|c| c.is_whitespace()) {
        i += 1;
    }
    if chars.get(i) != Some(&'(') {
        return Err(format!("unknown word '{}' in filter", word));
    }
    i += 1;

    match word {
        "all" => lexemes.push(Lexeme::Quantifier(Quantifier::All)),
        "any" => lexemes.push(Lexeme::Quantifier(Quantifier::Any)),
        _ => {
            let field = MetaField::from_name(word)
                .ok_or_else(|| format!("unknown filter function '{}'", word))?;
            while chars.get(i).is_some_and(|c| c.is_whitespace()) {
                i += 1;
            }
            if chars.get(i) != Some(&')') {
                return Err(format!("'{}()' takes no arguments", word));
            }
            i += 1;
            lexemes.push(Lexeme::Operand(Operand::Meta(field)));
        }
    }
    Ok(i)
}

fn lex_relative_path(chars: &[char], mut i: usize) -> Result<(RelativePath, usize), String> {
    let mut steps = Vec::new();
    loop {
        match chars.get(i) {
            Some('.') => {
                let start = i + 1;
                i = start;
                while chars
                    .get(i)
                    .is_some_and(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
                {
                    i += 1;
                }
                if i == start {
                    return Err("empty field name after '@.'".to_string());
                }
                steps.push(RelativeStep::Key(chars[start..i].iter().collect()));
            }
            Some('[') if matches!(chars.get(i + 1), Some('\'') | Some('"')) => {
                let (name, end) = lex_string(chars, i + 1)?;
                if chars.get(end) != Some(&']') {
                    return Err("expected ']' after quoted field name".to_string());
                }
                steps.push(RelativeStep::Key(name));
                i = end + 1;
            }
            Some('[') => {
                let start = i + 1;
                let close = chars[start..]
                    .iter()
                    .position(|c| *c == ']')
                    .map(|offset| start + offset)
                    .ok_or_else(|| "unterminated '[' in filter path".to_string())?;
                let digits: String = chars[start..close].iter().collect();
                let index = parse_index(&digits)
                    .ok_or_else(|| format!("invalid index '[{}]' in filter path", digits))?;
                steps.push(RelativeStep::Index(index));
                i = close + 1;
            }
            _ => return Ok((RelativePath { steps }, i)),
        }
    }
}

fn lex_string(chars: &[char], start: usize) -> Result<(String, usize), String> {
    let quote = chars[start];
    let mut out = String::new();
    let mut i = start + 1;
    while let Some(&c) = chars.get(i) {
        match c {
            '\\' => {
                let escaped = chars
                    .get(i + 1)
                    .ok_or_else(|| "dangling escape in string literal".to_string())?;
                out.push(match escaped {
                    'n' => '\n',
                    't' => '\t',
                    'r' => '\r',
                    other => *other,
                });
                i += 2;
            }
            c if c == quote => return Ok((out, i + 1)),
            c => {
                out.push(c);
                i += 1;
            }
        }
    }
    Err("unterminated string literal".to_string())
}

fn lex_number(chars: &[char], start: usize) -> Result<(Value, usize), String> {
    let mut i = start + 1;
    while chars
        .get(i)
        .is_some_and(|c| c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E' | '+' | '-'))
    {
        i += 1;
    }
    let text: String = chars[start..i].iter().collect();
    let number: serde_json::Number =
        serde_json::from_str(&text).map_err(|_| format!("invalid number '{}'", text))?;
    Ok((Value::Number(number), i))
}

/// Non-negative decimal index, or `None`
pub(crate) fn parse_index(text: &str) -> Option<usize> {
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    text.parse().ok()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Connective {
    And,
    Or,
}

impl Connective {
    fn precedence(self) -> u8 {
        match self {
            Connective::And => 2,
            Connective::Or => 1,
        }
    }
}

#[derive(Debug)]
enum BlockKind {
    Top,
    Group,
    Quantifier {
        quantifier: Quantifier,
        over: RelativePath,
    },
}

/// One open block awaiting its closing token
#[derive(Debug)]
struct Frame {
    kind: BlockKind,
    operands: Vec<Predicate>,
    connectives: Vec<Connective>,
    pending_not: usize,
    expect_operand: bool,
}

impl Frame {
    fn new(kind: BlockKind) -> Self {
        Self {
            kind,
            operands: Vec::new(),
            connectives: Vec::new(),
            pending_not: 0,
            expect_operand: true,
        }
    }

    fn shift_operand(&mut self, mut predicate: Predicate) -> Result<(), String> {
        if !self.expect_operand {
            return Err("missing '&&' or '||' between conditions".to_string());
        }
        for _ in 0..self.pending_not {
            predicate = Predicate::Not(Box::new(predicate));
        }
        self.pending_not = 0;
        self.expect_operand = false;
        self.operands.push(predicate);
        Ok(())
    }

    fn shift_connective(&mut self, connective: Connective) -> Result<(), String> {
        if self.expect_operand {
            return Err("'&&' or '||' without a left-hand condition".to_string());
        }
        while self
            .connectives
            .last()
            .is_some_and(|top| top.precedence() >= connective.precedence())
        {
            self.reduce_once()?;
        }
        self.connectives.push(connective);
        self.expect_operand = true;
        Ok(())
    }

    fn reduce_once(&mut self) -> Result<(), String> {
        let connective = self.connectives.pop().ok_or("nothing to reduce")?;
        let right = self.operands.pop().ok_or("missing right-hand condition")?;
        let left = self.operands.pop().ok_or("missing left-hand condition")?;
        self.operands.push(match connective {
            Connective::And => Predicate::And(Box::new(left), Box::new(right)),
            Connective::Or => Predicate::Or(Box::new(left), Box::new(right)),
        });
        Ok(())
    }

    fn finish(mut self) -> Result<(BlockKind, Predicate), String> {
        if self.expect_operand {
            return Err(if self.operands.is_empty() && self.connectives.is_empty() {
                "empty condition".to_string()
            } else {
                "condition ends with a dangling operator".to_string()
            });
        }
        while !self.connectives.is_empty() {
            self.reduce_once()?;
        }
        let predicate = self.operands.pop().ok_or("empty condition")?;
        Ok((self.kind, predicate))
    }
}

/// Parse predicate text (without the surrounding `[?(` `)]`)
pub fn parse_predicate(text: &str) -> Result<Predicate, String> {
    let lexemes = lex(text)?;
    let mut stack = vec![Frame::new(BlockKind::Top)];
    let mut i = 0;

    while i < lexemes.len() {
        let top = stack.last_mut().ok_or("unbalanced ')'")?;
        match &lexemes[i] {
            Lexeme::Open => {
                if !top.expect_operand {
                    return Err("unexpected '('".to_string());
                }
                stack.push(Frame::new(BlockKind::Group));
            }
            Lexeme::Quantifier(quantifier) => {
                if !top.expect_operand {
                    return Err("unexpected quantifier".to_string());
                }
                let over = match (lexemes.get(i + 1), lexemes.get(i + 2)) {
                    (Some(Lexeme::Operand(Operand::Path(path))), Some(Lexeme::Comma)) => {
                        path.clone()
                    }
                    _ => return Err("quantifier expects '@.path,' before its condition".into()),
                };
                stack.push(Frame::new(BlockKind::Quantifier {
                    quantifier: *quantifier,
                    over,
                }));
                i += 2;
            }
            Lexeme::Close => {
                let frame = stack.pop().ok_or("unbalanced ')'")?;
                let (kind, inner) = frame.finish()?;
                let block = match kind {
                    BlockKind::Top => return Err("unbalanced ')'".to_string()),
                    BlockKind::Group => inner,
                    BlockKind::Quantifier { quantifier, over } => Predicate::Quantified {
                        quantifier,
                        over,
                        condition: Box::new(inner),
                    },
                };
                stack
                    .last_mut()
                    .ok_or("unbalanced ')'")?
                    .shift_operand(block)?;
            }
            Lexeme::Not => {
                if !top.expect_operand {
                    return Err("unexpected '!'".to_string());
                }
                top.pending_not += 1;
            }
            Lexeme::And => top.shift_connective(Connective::And)?,
            Lexeme::Or => top.shift_connective(Connective::Or)?,
            Lexeme::Operand(left) => {
                let predicate = match (lexemes.get(i + 1), lexemes.get(i + 2)) {
                    (Some(Lexeme::Compare(op)), Some(Lexeme::Operand(right))) => {
                        i += 2;
                        Predicate::Compare {
                            left: left.clone(),
                            op: *op,
                            right: right.clone(),
                        }
                    }
                    (Some(Lexeme::Compare(op)), _) => {
                        return Err(format!("'{}' needs a right-hand operand", op.symbol()));
                    }
                    _ => match left {
                        Operand::Path(path) => Predicate::Exists(path.clone()),
                        _ => return Err("a literal needs a comparison".to_string()),
                    },
                };
                top.shift_operand(predicate)?;
            }
            Lexeme::Compare(op) => {
                return Err(format!("'{}' needs a left-hand operand", op.symbol()));
            }
            Lexeme::Comma => return Err("unexpected ','".to_string()),
        }
        i += 1;
    }

    let top = stack.pop().ok_or("unbalanced ')'")?;
    if !stack.is_empty() {
        return Err("unclosed '('".to_string());
    }
    let (_, predicate) = top.finish()?;
    Ok(predicate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn path(steps: &[&str]) -> RelativePath {
        RelativePath {
            steps: steps
                .iter()
                .map(|step| RelativeStep::Key(step.to_string()))
                .collect(),
        }
    }

    fn cmp(field: &str, op: CompareOp, value: Value) -> Predicate {
        Predicate::Compare {
            left: Operand::Path(path(&[field])),
            op,
            right: Operand::Literal(value),
        }
    }

    #[test]
    fn test_parse_simple_comparison() {
        let predicate = parse_predicate("@.price < 20").unwrap();
        assert_eq!(predicate, cmp("price", CompareOp::Lt, json!(20)));
    }

    #[test]
    fn test_and_binds_tighter_than_or() {
        let predicate = parse_predicate("@.a == 1 || @.b == 2 && @.c == 3").unwrap();
        assert_eq!(
            predicate,
            Predicate::Or(
                Box::new(cmp("a", CompareOp::Eq, json!(1))),
                Box::new(Predicate::And(
                    Box::new(cmp("b", CompareOp::Eq, json!(2))),
                    Box::new(cmp("c", CompareOp::Eq, json!(3))),
                )),
            )
        );
    }

    #[test]
    fn test_groups_and_not() {
        let predicate = parse_predicate("!(@.a == 1 || @.b) && @.c != 'x'").unwrap();
        assert_eq!(
            predicate,
            Predicate::And(
                Box::new(Predicate::Not(Box::new(Predicate::Or(
                    Box::new(cmp("a", CompareOp::Eq, json!(1))),
                    Box::new(Predicate::Exists(path(&["b"]))),
                )))),
                Box::new(cmp("c", CompareOp::Ne, json!("x"))),
            )
        );
    }

    #[test]
    fn test_quantifier_and_meta() {
        let predicate = parse_predicate("any(@.tags, @ == \"red\") && since_update() < 500").unwrap();
        let Predicate::And(left, right) = predicate else {
            panic!("expected a conjunction");
        };
        assert_eq!(
            *left,
            Predicate::Quantified {
                quantifier: Quantifier::Any,
                over: path(&["tags"]),
                condition: Box::new(Predicate::Compare {
                    left: Operand::Path(RelativePath::default()),
                    op: CompareOp::Eq,
                    right: Operand::Literal(json!("red")),
                }),
            }
        );
        assert_eq!(
            *right,
            Predicate::Compare {
                left: Operand::Meta(MetaField::SinceUpdate),
                op: CompareOp::Lt,
                right: Operand::Literal(json!(500)),
            }
        );
    }

    #[test]
    fn test_parse_errors() {
        for bad in [
            "",
            "@.a ==",
            "@.a == 1 &&",
            "(@.a == 1",
            "@.a == 1)",
            "5",
            "@.a == 1 @.b == 2",
            "all(@.a @ > 1)",
            "bogus() > 1",
            "@.a[x] == 1",
            "'open",
        ] {
            assert!(parse_predicate(bad).is_err(), "expected error for {:?}", bad);
        }
    }

    #[test]
    fn test_render_for_engine() {
        let record = RecordContext {
            generation: 3,
            last_update_ms: 1_000,
            now_ms: 1_600,
        };
        let predicate =
            parse_predicate("@.price <= 10.5 && (@['odd-key'] || since_update() > 100)").unwrap();
        assert_eq!(
            predicate.render(&record),
            "(@.price <= 10.5 && (@['odd-key'] || 600 > 100))"
        );
    }

    #[test]
    fn test_render_all_quantifier() {
        let predicate = parse_predicate("all(@.scores, @ >= 50)").unwrap();
        assert_eq!(
            predicate.render(&RecordContext::default()),
            "!@.scores[?!(@ >= 50)]"
        );
    }

    #[test]
    fn test_parse_index() {
        assert_eq!(parse_index("12"), Some(12));
        assert_eq!(parse_index("+1"), None);
        assert_eq!(parse_index("-1"), None);
        assert_eq!(parse_index(""), None);
    }
}
