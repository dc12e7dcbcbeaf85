//! Message path abstract syntax tree.
//!
//! A `ParsedPath` is a topic name followed by an ordered list of steps. It is
//! immutable once built and its `Display` form parses back to an equal value.

use std::fmt;

/// A compiled message path such as `/odom.pose.covariance[0:3]`.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedPath {
    pub topic_name: String,
    pub steps: Vec<PathStep>,
}

/// One step of a path, applied left to right.
#[derive(Debug, Clone, PartialEq)]
pub enum PathStep {
    /// `.name` field access.
    Name(String),
    /// `[start:end]` half-open array range. `None` means "from the start" /
    /// "to the end"; negative values count from the end. A single index `[i]`
    /// is stored as `[i:i+1]`.
    Slice { start: Option<i64>, end: Option<i64> },
    /// `{field op literal}` predicate.
    Filter(FilterStep),
}

/// Comparison operators allowed inside a filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComparisonOp {
    Equal,
    NotEqual,
    Less,
    LessEq,
    Greater,
    GreaterEq,
}

impl ComparisonOp {
    pub fn as_str(self) -> &'static str {
        match self {
            ComparisonOp::Equal => "==",
            ComparisonOp::NotEqual => "!=",
            ComparisonOp::Less => "<",
            ComparisonOp::LessEq => "<=",
            ComparisonOp::Greater => ">",
            ComparisonOp::GreaterEq => ">=",
        }
    }
}

/// A literal on the right-hand side of a filter.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterLiteral {
    Int(i64),
    Float(f64),
    String(String),
    Bool(bool),
}

/// `{field.sub op value}`.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterStep {
    /// Dotted sub-path evaluated on each candidate element.
    pub field: Vec<String>,
    pub operator: ComparisonOp,
    pub value: FilterLiteral,
}

impl ParsedPath {
    pub fn new(topic_name: impl Into<String>, steps: Vec<PathStep>) -> Self {
        Self {
            topic_name: topic_name.into(),
            steps,
        }
    }

    /// True when some step can produce more than one value.
    pub fn may_fan_out(&self) -> bool {
        self.steps.iter().any(|step| match step {
            PathStep::Name(_) => false,
            PathStep::Filter(_) => true,
            PathStep::Slice { start, end } => !is_single_index(*start, *end),
        })
    }

    /// The field names of the leading run of `Name` steps.
    pub fn leading_fields(&self) -> impl Iterator<Item = &str> {
        self.steps.iter().map_while(|step| match step {
            PathStep::Name(name) => Some(name.as_str()),
            _ => None,
        })
    }
}

/// `[i]` is stored as `[i:i+1]`, `[-1]` as `[-1:]`.
pub(crate) fn index_end(index: i64) -> Option<i64> {
    index.checked_add(1).filter(|end| *end != 0)
}

fn is_single_index(start: Option<i64>, end: Option<i64>) -> bool {
    match start {
        Some(s) => end == index_end(s),
        None => false,
    }
}

fn is_plain_topic(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '_' | '-' | '~' | ':'))
}

fn write_quoted(f: &mut fmt::Formatter<'_>, text: &str) -> fmt::Result {
    f.write_str("\"")?;
    for c in text.chars() {
        match c {
            '"' => f.write_str("\\\"")?,
            '\\' => f.write_str("\\\\")?,
            other => write!(f, "{}", other)?,
        }
    }
    f.write_str("\"")
}

impl fmt::Display for FilterLiteral {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterLiteral::Int(i) => write!(f, "{}", i),
            // Debug keeps the fractional part ("5.0"), so it reparses as a float.
            FilterLiteral::Float(x) => write!(f, "{:?}", x),
            FilterLiteral::String(s) => write_quoted(f, s),
            FilterLiteral::Bool(b) => write!(f, "{}", b),
        }
    }
}

impl fmt::Display for PathStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathStep::Name(name) => write!(f, ".{}", name),
            PathStep::Slice { start, end } => {
                if let (Some(s), true) = (start, is_single_index(*start, *end)) {
                    return write!(f, "[{}]", s);
                }
                f.write_str("[")?;
                if let Some(s) = start {
                    write!(f, "{}", s)?;
                }
                f.write_str(":")?;
                if let Some(e) = end {
                    write!(f, "{}", e)?;
                }
                f.write_str("]")
            }
            PathStep::Filter(filter) => write!(
                f,
                "{{{}{}{}}}",
                filter.field.join("."),
                filter.operator.as_str(),
                filter.value
            ),
        }
    }
}

impl fmt::Display for ParsedPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if is_plain_topic(&self.topic_name) {
            f.write_str(&self.topic_name)?;
        } else {
            write_quoted(f, &self.topic_name)?;
        }
        for step in &self.steps {
            write!(f, "{}", step)?;
        }
        Ok(())
    }
}
