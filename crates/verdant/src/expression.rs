//! Expression evaluation.
//!
//! Processors hand attribute values to an [`ExpressionEvaluator`]. The engine
//! only depends on the trait; [`StandardExpressions`] implements a small
//! grammar, loosest binding first:
//!
//! ```text
//! expr       := or ("?" expr (":" expr)? | "?:" expr)?
//! or         := and ("or" and)*
//! and        := equality ("and" equality)*
//! equality   := relational (("==" | "!=" | "eq" | "ne") relational)?
//! relational := additive ((">=" | "<=" | ">" | "<" | "ge" | "le" | "gt" | "lt") additive)?
//! additive   := unary ("+" unary)*
//! unary      := ("not " | "!") unary | atom
//! atom       := "${" path "}" | "*{" path "}" | "|" text "|" | "(" expr ")"
//!             | "'" chars "'" | number | "true" | "false" | "null"
//! path       := name ("." name)*
//! ```
//!
//! `*{...}` resolves against the `th:object` selection and falls back to the
//! variables when nothing is selected. Inside `|...|` only `${...}` and
//! `*{...}` are evaluated; everything else is literal text.

use std::cmp::Ordering;

use crate::context::Context;
use crate::error::{EngineError, Result};
use crate::value::Value;
use thiserror::Error;

/// Evaluates expression strings against a context.
///
/// Implementations are shared across threads by a built engine.
pub trait ExpressionEvaluator: Send + Sync {
    fn evaluate(&self, expression: &str, context: &Context) -> Result<Value>;
}

#[derive(Debug, Error, PartialEq)]
pub enum ExpressionError {
    #[error("syntax error: {0}")]
    Syntax(String),

    #[error("cannot read property '{property}' of {type_name}")]
    Property {
        property: String,
        type_name: &'static str,
    },

    #[error("operator '{operator}' cannot be applied to {left} and {right}")]
    Operands {
        operator: &'static str,
        left: &'static str,
        right: &'static str,
    },
}

type EvalResult = std::result::Result<Value, ExpressionError>;

/// The built-in expression grammar.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardExpressions;

impl ExpressionEvaluator for StandardExpressions {
    fn evaluate(&self, expression: &str, context: &Context) -> Result<Value> {
        eval(expression, context).map_err(|e| EngineError::ExpressionEvaluation {
            expression: expression.to_string(),
            source: Box::new(e),
        })
    }
}

const EQUALITY: &[&str] = &["==", "!=", "eq", "ne"];
const RELATIONAL: &[&str] = &[">=", "<=", ">", "<", "ge", "le", "gt", "lt"];

fn eval(expression: &str, context: &Context) -> EvalResult {
    let expression = expression.trim();
    if expression.is_empty() {
        return Err(ExpressionError::Syntax("empty expression".to_string()));
    }

    if let Some((at, _)) = find_operator(expression, &["?"], false) {
        return conditional(&expression[..at], &expression[at + 1..], context);
    }

    if let Some((at, op)) = find_operator(expression, &["or"], false) {
        let (left, right) = (&expression[..at], &expression[at + op.len()..]);
        let result = eval(left, context)?.is_truthy() || eval(right, context)?.is_truthy();
        return Ok(Value::Bool(result));
    }
    if let Some((at, op)) = find_operator(expression, &["and"], false) {
        let (left, right) = (&expression[..at], &expression[at + op.len()..]);
        let result = eval(left, context)?.is_truthy() && eval(right, context)?.is_truthy();
        return Ok(Value::Bool(result));
    }

    if let Some((at, op)) = find_operator(expression, EQUALITY, false) {
        let left = eval(&expression[..at], context)?;
        let right = eval(&expression[at + op.len()..], context)?;
        let negated = matches!(op, "!=" | "ne");
        return Ok(Value::Bool(left.loosely_equals(&right) != negated));
    }

    if let Some((at, op)) = find_operator(expression, RELATIONAL, false) {
        let left = eval(&expression[..at], context)?;
        let right = eval(&expression[at + op.len()..], context)?;
        return compare(op, &left, &right);
    }

    // Rightmost split keeps `+` left-associative: 1 + 2 + 'a' is '3a'.
    if let Some((at, _)) = find_operator(expression, &["+"], true) {
        let left = eval(&expression[..at], context)?;
        let right = eval(&expression[at + 1..], context)?;
        return add(left, right);
    }

    if let Some(rest) = expression
        .strip_prefix("not ")
        .or_else(|| expression.strip_prefix('!'))
    {
        return Ok(Value::Bool(!eval(rest, context)?.is_truthy()));
    }

    atom(expression, context)
}

/// `cond ? then : else`, `cond ? then`, and the elvis form `value ?: default`.
fn conditional(condition: &str, rest: &str, context: &Context) -> EvalResult {
    if let Some(default) = rest.strip_prefix(':') {
        let value = eval(condition, context)?;
        return if value.is_null() {
            eval(default, context)
        } else {
            Ok(value)
        };
    }

    let truthy = eval(condition, context)?.is_truthy();
    match split_once_top_level(rest, b':') {
        Some((then, _)) if truthy => eval(then, context),
        Some((_, otherwise)) => eval(otherwise, context),
        None if truthy => eval(rest, context),
        None => Ok(Value::Null),
    }
}

fn compare(operator: &'static str, left: &Value, right: &Value) -> EvalResult {
    let ordering = match (left, right) {
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => match (left.as_number(), right.as_number()) {
            (Some(a), Some(b)) => a.partial_cmp(&b),
            _ => None,
        },
    };
    let ordering = ordering.ok_or(ExpressionError::Operands {
        operator,
        left: left.type_name(),
        right: right.type_name(),
    })?;
    let result = match operator {
        ">" | "gt" => ordering == Ordering::Greater,
        "<" | "lt" => ordering == Ordering::Less,
        ">=" | "ge" => ordering != Ordering::Less,
        _ => ordering != Ordering::Greater,
    };
    Ok(Value::Bool(result))
}

/// Numbers add; anything else concatenates text forms.
fn add(left: Value, right: Value) -> EvalResult {
    match (&left, &right) {
        (Value::Integer(a), Value::Integer(b)) => Ok(a
            .checked_add(*b)
            .map(Value::Integer)
            .unwrap_or(Value::Float(*a as f64 + *b as f64))),
        (Value::Integer(_) | Value::Float(_), Value::Integer(_) | Value::Float(_)) => {
            match (left.as_number(), right.as_number()) {
                (Some(a), Some(b)) => Ok(Value::Float(a + b)),
                _ => Err(operands("+", &left, &right)),
            }
        }
        _ => match (left.to_text(), right.to_text()) {
            (Ok(a), Ok(b)) => Ok(Value::String(a + &b)),
            _ => Err(operands("+", &left, &right)),
        },
    }
}

fn operands(operator: &'static str, left: &Value, right: &Value) -> ExpressionError {
    ExpressionError::Operands {
        operator,
        left: left.type_name(),
        right: right.type_name(),
    }
}

fn atom(expression: &str, context: &Context) -> EvalResult {
    if let Some(path) = expression
        .strip_prefix("${")
        .and_then(|rest| rest.strip_suffix('}'))
    {
        return resolve_path(path, context);
    }

    if let Some(path) = expression
        .strip_prefix("*{")
        .and_then(|rest| rest.strip_suffix('}'))
    {
        return match context.selection() {
            Some(target) => resolve_segments(target.clone(), path.split('.').map(str::trim)),
            None => resolve_path(path, context),
        };
    }

    if let Some(inner) = parenthesized(expression) {
        return eval(inner, context);
    }

    if expression.len() >= 2 && expression.starts_with('|') && expression.ends_with('|') {
        return substitute(&expression[1..expression.len() - 1], context);
    }

    if expression.len() >= 2 && expression.starts_with('\'') && expression.ends_with('\'') {
        return parse_string_literal(&expression[1..expression.len() - 1]);
    }

    match expression {
        "true" => return Ok(Value::Bool(true)),
        "false" => return Ok(Value::Bool(false)),
        "null" => return Ok(Value::Null),
        _ => {}
    }

    if let Ok(n) = expression.parse::<i64>() {
        return Ok(Value::Integer(n));
    }
    if expression.starts_with(|c: char| c.is_ascii_digit() || c == '-') {
        if let Ok(f) = expression.parse::<f64>() {
            return Ok(Value::Float(f));
        }
    }

    Err(ExpressionError::Syntax(format!(
        "unrecognized expression '{expression}'"
    )))
}

/// The inside of `( ... )` when the parentheses wrap the whole expression.
fn parenthesized(expression: &str) -> Option<&str> {
    let inner = expression.strip_prefix('(')?.strip_suffix(')')?;
    let mut scanner = Scanner::default();
    for &b in inner.as_bytes() {
        scanner.step(b);
        if scanner.depth_closed_below_zero() {
            return None;
        }
    }
    Some(inner)
}

/// Body of `|...|`: literal text with `${...}` and `*{...}` replaced by
/// their text forms.
fn substitute(body: &str, context: &Context) -> EvalResult {
    let mut out = String::with_capacity(body.len());
    let mut rest = body;
    while let Some(start) = rest.find(|c| c == '$' || c == '*') {
        let tail = &rest[start..];
        if !tail[1..].starts_with('{') {
            out.push_str(&rest[..=start]);
            rest = &rest[start + 1..];
            continue;
        }
        let end = tail.find('}').ok_or_else(|| {
            ExpressionError::Syntax("unterminated expression in literal substitution".to_string())
        })?;
        out.push_str(&rest[..start]);
        let value = atom(&tail[..=end], context)?;
        let text = value.to_text().map_err(|_| ExpressionError::Operands {
            operator: "|",
            left: "string",
            right: value.type_name(),
        })?;
        out.push_str(&text);
        rest = &tail[end + 1..];
    }
    out.push_str(rest);
    Ok(Value::String(out))
}

/// A missing root variable is null; reading a property of anything but an
/// object is an error.
fn resolve_path(path: &str, context: &Context) -> EvalResult {
    let mut segments = path.split('.').map(str::trim);
    let root = segments.next().unwrap_or_default();
    validate_name(root)?;

    let value = context.lookup(root).cloned().unwrap_or(Value::Null);
    resolve_segments(value, segments)
}

fn resolve_segments<'a>(mut value: Value, segments: impl Iterator<Item = &'a str>) -> EvalResult {
    for segment in segments {
        validate_name(segment)?;
        value = match value {
            Value::Object(mut obj) => obj.remove(segment).unwrap_or(Value::Null),
            other => {
                return Err(ExpressionError::Property {
                    property: segment.to_string(),
                    type_name: other.type_name(),
                })
            }
        };
    }
    Ok(value)
}

fn validate_name(name: &str) -> std::result::Result<(), ExpressionError> {
    if is_identifier(name) {
        Ok(())
    } else {
        Err(ExpressionError::Syntax(format!(
            "invalid variable name '{name}'"
        )))
    }
}

/// Whether `name` can be used as a variable name.
pub(crate) fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_alphabetic() || c == '_')
        && chars.all(|c| c.is_alphanumeric() || c == '_')
}

fn parse_string_literal(body: &str) -> EvalResult {
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some(escaped) => out.push(escaped),
                None => {
                    return Err(ExpressionError::Syntax(
                        "dangling escape in string literal".to_string(),
                    ))
                }
            },
            '\'' => {
                return Err(ExpressionError::Syntax(
                    "unescaped quote in string literal".to_string(),
                ))
            }
            _ => out.push(c),
        }
    }
    Ok(Value::String(out))
}

/// Find a top-level binary operator, the leftmost or the rightmost one.
/// Operators spelled as words need whitespace on both sides. An operator
/// at the very start is not binary and is skipped.
fn find_operator(
    expression: &str,
    operators: &[&'static str],
    rightmost: bool,
) -> Option<(usize, &'static str)> {
    let bytes = expression.as_bytes();
    let mut scanner = Scanner::default();
    let mut found = None;
    let mut i = 0;
    while i < bytes.len() {
        if i > 0 && scanner.at_top_level() {
            if let Some(op) = operators.iter().copied().find(|op| operator_at(bytes, i, op)) {
                if !rightmost {
                    return Some((i, op));
                }
                found = Some((i, op));
                i += op.len();
                continue;
            }
        }
        scanner.step(bytes[i]);
        i += 1;
    }
    found
}

fn operator_at(bytes: &[u8], at: usize, operator: &str) -> bool {
    if !bytes[at..].starts_with(operator.as_bytes()) {
        return false;
    }
    if operator.as_bytes()[0].is_ascii_alphabetic() {
        return bytes[at - 1].is_ascii_whitespace()
            && bytes
                .get(at + operator.len())
                .is_some_and(u8::is_ascii_whitespace);
    }
    true
}

/// Split `input` at every top-level occurrence of `separator`, outside
/// string literals and `${...}`.
pub(crate) fn split_top_level(input: &str, separator: u8) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut scanner = Scanner::default();
    for (i, &b) in input.as_bytes().iter().enumerate() {
        if b == separator && scanner.at_top_level() {
            parts.push(&input[start..i]);
            start = i + 1;
        }
        scanner.step(b);
    }
    parts.push(&input[start..]);
    parts
}

/// Split at the first top-level `separator`.
pub(crate) fn split_once_top_level(input: &str, separator: u8) -> Option<(&str, &str)> {
    let mut scanner = Scanner::default();
    for (i, &b) in input.as_bytes().iter().enumerate() {
        if b == separator && scanner.at_top_level() {
            return Some((&input[..i], &input[i + 1..]));
        }
        scanner.step(b);
    }
    None
}

/// Tracks quoting, literal substitution, and bracket depth while walking an
/// expression byte by byte.
#[derive(Default)]
struct Scanner {
    in_string: bool,
    in_substitution: bool,
    escaped: bool,
    depth: isize,
}

impl Scanner {
    fn at_top_level(&self) -> bool {
        !self.in_string && !self.in_substitution && self.depth == 0
    }

    fn depth_closed_below_zero(&self) -> bool {
        self.depth < 0
    }

    fn step(&mut self, b: u8) {
        if self.in_string {
            match b {
                _ if self.escaped => self.escaped = false,
                b'\\' => self.escaped = true,
                b'\'' => self.in_string = false,
                _ => {}
            }
            return;
        }
        match b {
            b'\'' if !self.in_substitution => self.in_string = true,
            b'|' if self.depth == 0 => self.in_substitution = !self.in_substitution,
            b'{' | b'(' => self.depth += 1,
            b'}' | b')' => self.depth -= 1,
            _ => {}
        }
    }
}
