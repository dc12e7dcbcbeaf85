//! Applies a `ParsedPath` to a `Message`.
//!
//! Evaluation is lazy and depth-first: results come out in document order and
//! only the parts of the value tree a step actually selects are visited. It
//! never fails; a step that does not fit the value (missing field, slice on a
//! non-array) just contributes nothing.

use std::borrow::Cow;
use std::cmp::Ordering;

use super::ast::{ComparisonOp, FilterLiteral, FilterStep, ParsedPath, PathStep};
use super::error::MultipleResultsError;
use crate::model::value::parse_finite;
use crate::model::{Message, StructuredValue};

/// Iterator over the values selected by a path.
///
/// Values are borrowed from the message, except elements of a `Bytes` blob,
/// which are materialized as `Int`.
pub struct PathValues<'a> {
    steps: &'a [PathStep],
    stack: Vec<(Cow<'a, StructuredValue>, usize)>,
}

impl<'a> PathValues<'a> {
    fn new(root: &'a StructuredValue, steps: &'a [PathStep]) -> Self {
        Self {
            steps,
            stack: vec![(Cow::Borrowed(root), 0)],
        }
    }

    fn empty(steps: &'a [PathStep]) -> Self {
        Self {
            steps,
            stack: Vec::new(),
        }
    }
}

impl<'a> Iterator for PathValues<'a> {
    type Item = Cow<'a, StructuredValue>;

    fn next(&mut self) -> Option<Self::Item> {
        let steps = self.steps;
        while let Some((value, idx)) = self.stack.pop() {
            if idx == steps.len() {
                return Some(value);
            }
            let value: &'a StructuredValue = match value {
                Cow::Borrowed(v) => v,
                // Materialized byte elements are scalars, nothing below them.
                Cow::Owned(_) => continue,
            };
            match &steps[idx] {
                PathStep::Name(name) => {
                    if let Some(child) = value.field(name) {
                        self.stack.push((Cow::Borrowed(child), idx + 1));
                    }
                }
                PathStep::Slice { start, end } => match value {
                    StructuredValue::Sequence(items) => {
                        let (s, e) = resolve_range(*start, *end, items.len());
                        for item in items[s..e].iter().rev() {
                            self.stack.push((Cow::Borrowed(item), idx + 1));
                        }
                    }
                    StructuredValue::Bytes(bytes) => {
                        let (s, e) = resolve_range(*start, *end, bytes.len());
                        for byte in bytes[s..e].iter().rev() {
                            let element = StructuredValue::Int(i64::from(*byte));
                            self.stack.push((Cow::Owned(element), idx + 1));
                        }
                    }
                    _ => {}
                },
                PathStep::Filter(filter) => match value {
                    StructuredValue::Sequence(items) => {
                        for item in items.iter().rev().filter(|item| filter.matches(item)) {
                            self.stack.push((Cow::Borrowed(item), idx + 1));
                        }
                    }
                    other => {
                        if filter.matches(other) {
                            self.stack.push((Cow::Borrowed(other), idx + 1));
                        }
                    }
                },
            }
        }
        None
    }
}

/// Clamps a half-open `[start, end)` slice with negative-from-end semantics
/// to `0..=len`. An inverted range becomes empty.
pub(crate) fn resolve_range(start: Option<i64>, end: Option<i64>, len: usize) -> (usize, usize) {
    let clamp = |bound: i64| -> usize {
        let len = len as i64;
        let absolute = if bound < 0 { len.saturating_add(bound) } else { bound };
        absolute.clamp(0, len) as usize
    };
    let s = start.map(clamp).unwrap_or(0);
    let e = end.map(clamp).unwrap_or(len);
    if s >= e {
        (s, s)
    } else {
        (s, e)
    }
}

fn bool_text(b: bool) -> &'static str {
    if b {
        "true"
    } else {
        "false"
    }
}

/// Either side of a filter comparison.
enum Operand<'v> {
    Number(f64),
    Text(Cow<'v, str>),
}

impl<'v> Operand<'v> {
    fn from_value(value: &'v StructuredValue) -> Option<Self> {
        match value {
            StructuredValue::Int(i) => Some(Operand::Number(*i as f64)),
            StructuredValue::Float(x) => Some(Operand::Number(*x)),
            StructuredValue::String(s) => Some(match parse_finite(s) {
                Some(x) => Operand::Number(x),
                None => Operand::Text(Cow::Borrowed(s)),
            }),
            StructuredValue::Bool(b) => Some(Operand::Text(Cow::Borrowed(bool_text(*b)))),
            _ => None,
        }
    }

    fn from_literal(literal: &'v FilterLiteral) -> Self {
        match literal {
            FilterLiteral::Int(i) => Operand::Number(*i as f64),
            FilterLiteral::Float(x) => Operand::Number(*x),
            FilterLiteral::String(s) => match parse_finite(s) {
                Some(x) => Operand::Number(x),
                None => Operand::Text(Cow::Borrowed(s)),
            },
            FilterLiteral::Bool(b) => Operand::Text(Cow::Borrowed(bool_text(*b))),
        }
    }

    fn text(&self) -> Cow<'_, str> {
        match self {
            Operand::Number(x) => Cow::Owned(x.to_string()),
            Operand::Text(s) => Cow::Borrowed(s),
        }
    }

    /// Numeric when both sides are numeric, lexical otherwise.
    fn compare(&self, other: &Operand<'_>) -> Option<Ordering> {
        match (self, other) {
            (Operand::Number(a), Operand::Number(b)) => a.partial_cmp(b),
            _ => Some(self.text().cmp(&other.text())),
        }
    }
}

impl FilterStep {
    /// Whether `candidate` satisfies this filter. A missing field or a
    /// non-scalar field never matches.
    pub fn matches(&self, candidate: &StructuredValue) -> bool {
        let Some(lhs) = candidate
            .field_path(self.field.iter().map(String::as_str))
            .and_then(Operand::from_value)
        else {
            return false;
        };
        let rhs = Operand::from_literal(&self.value);
        let Some(ordering) = lhs.compare(&rhs) else {
            return false;
        };
        match self.operator {
            ComparisonOp::Equal => ordering == Ordering::Equal,
            ComparisonOp::NotEqual => ordering != Ordering::Equal,
            ComparisonOp::Less => ordering == Ordering::Less,
            ComparisonOp::LessEq => ordering != Ordering::Greater,
            ComparisonOp::Greater => ordering == Ordering::Greater,
            ComparisonOp::GreaterEq => ordering != Ordering::Less,
        }
    }
}

/// Lazily evaluates `path` against `message`. A topic mismatch yields nothing.
pub fn evaluate<'a>(message: &'a Message, path: &'a ParsedPath) -> PathValues<'a> {
    if message.topic != path.topic_name {
        return PathValues::empty(&path.steps);
    }
    PathValues::new(&message.data, &path.steps)
}

/// Evaluates `path` expecting at most one value.
pub fn evaluate_single<'a>(
    message: &'a Message,
    path: &'a ParsedPath,
) -> Result<Option<Cow<'a, StructuredValue>>, MultipleResultsError> {
    let mut values = evaluate(message, path);
    let first = values.next();
    match values.next() {
        Some(_) => Err(MultipleResultsError { count: 2 }),
        None => Ok(first),
    }
}
