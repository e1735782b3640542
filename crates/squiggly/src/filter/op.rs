//! Filter operators and compiled predicates.

use std::fmt;
use std::str::FromStr;

use regex::Regex;

use crate::error::{Result, SquigglyError};
use crate::flatten::join_escaped;
use crate::packet::NULL;

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterOp {
    /// `==`: value equals the literal.
    Equals,
    /// `!=`: value differs from the literal.
    NotEquals,
    /// `~`: value matches the regex.
    Matches,
    /// `!~`: value is present and does not match the regex.
    NotMatches,
}

impl FilterOp {
    /// Returns the operator's label.
    pub fn label(self) -> &'static str {
        match self {
            FilterOp::Equals => "==",
            FilterOp::NotEquals => "!=",
            FilterOp::Matches => "~",
            FilterOp::NotMatches => "!~",
        }
    }

    /// Returns true for operators whose value is a regex.
    pub fn is_regex(self) -> bool {
        matches!(self, FilterOp::Matches | FilterOp::NotMatches)
    }
}

impl fmt::Display for FilterOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Any operator accepted in filter state: a comparison or a group toggle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    /// A comparison.
    Filter(FilterOp),
    /// `*`: group by the search parameter.
    Group,
    /// `!*`: stop grouping by the search parameter.
    Ungroup,
}

impl Operator {
    /// Returns the operator's label.
    pub fn label(self) -> &'static str {
        match self {
            Operator::Filter(op) => op.label(),
            Operator::Group => "*",
            Operator::Ungroup => "!*",
        }
    }
}

impl From<FilterOp> for Operator {
    fn from(op: FilterOp) -> Self {
        Operator::Filter(op)
    }
}

impl FromStr for Operator {
    type Err = SquigglyError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "==" => Ok(FilterOp::Equals.into()),
            "!=" => Ok(FilterOp::NotEquals.into()),
            "~" => Ok(FilterOp::Matches.into()),
            "!~" => Ok(FilterOp::NotMatches.into()),
            "*" => Ok(Operator::Group),
            "!*" => Ok(Operator::Ungroup),
            other => Err(SquigglyError::UnknownOperator(other.to_string())),
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A filter value as supplied by a caller: one literal or pattern, or a list
/// of literals to match any of (regex operators only).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterValue {
    /// A single literal or pattern.
    One(String),
    /// Literals joined into one escaped alternation.
    Any(Vec<String>),
}

impl FilterValue {
    /// Resolves the value into the single string stored on a filter.
    pub fn resolve(&self, param: &str, op: Operator) -> Result<String> {
        match self {
            FilterValue::One(value) => Ok(value.clone()),
            FilterValue::Any(values) => match op {
                Operator::Filter(f) if f.is_regex() => Ok(join_escaped(values)),
                _ => Err(SquigglyError::MultipleValues {
                    param: param.to_string(),
                    op: op.label().to_string(),
                }),
            },
        }
    }
}

impl From<&str> for FilterValue {
    fn from(value: &str) -> Self {
        FilterValue::One(value.to_string())
    }
}

impl From<String> for FilterValue {
    fn from(value: String) -> Self {
        FilterValue::One(value)
    }
}

impl From<Vec<String>> for FilterValue {
    fn from(values: Vec<String>) -> Self {
        FilterValue::Any(values)
    }
}

impl From<&[&str]> for FilterValue {
    fn from(values: &[&str]) -> Self {
        FilterValue::Any(values.iter().map(|v| v.to_string()).collect())
    }
}

/// Operator and test value, compiled once.
#[derive(Debug, Clone)]
enum Predicate {
    Equals(String),
    NotEquals(String),
    Matches(Regex),
    NotMatches(Regex),
}

/// A single predicate on a field value.
#[derive(Debug, Clone)]
pub struct Filter {
    predicate: Predicate,
    raw: String,
}

impl Filter {
    /// Compiles a filter.
    ///
    /// # Errors
    ///
    /// Returns `SquigglyError::InvalidPattern` if a regex operator's value
    /// does not compile.
    pub fn new(op: FilterOp, value: impl Into<String>) -> Result<Self> {
        let raw = value.into();
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|source| SquigglyError::InvalidPattern {
                pattern: pattern.to_string(),
                source,
            })
        };
        let predicate = match op {
            FilterOp::Equals => Predicate::Equals(raw.clone()),
            FilterOp::NotEquals => Predicate::NotEquals(raw.clone()),
            FilterOp::Matches => Predicate::Matches(compile(&raw)?),
            FilterOp::NotMatches => Predicate::NotMatches(compile(&raw)?),
        };
        Ok(Self { predicate, raw })
    }

    /// Returns the operator.
    pub fn op(&self) -> FilterOp {
        match self.predicate {
            Predicate::Equals(_) => FilterOp::Equals,
            Predicate::NotEquals(_) => FilterOp::NotEquals,
            Predicate::Matches(_) => FilterOp::Matches,
            Predicate::NotMatches(_) => FilterOp::NotMatches,
        }
    }

    /// Returns the value the filter was created with.
    pub fn value(&self) -> &str {
        &self.raw
    }

    /// Tests a field value; `None` means the field is absent.
    ///
    /// An absent field equals the NULL sentinel and nothing else, and never
    /// satisfies a regex operator.
    pub fn is_satisfied(&self, value: Option<&str>) -> bool {
        match (&self.predicate, value) {
            (Predicate::Equals(t), Some(v)) => v == t,
            (Predicate::Equals(t), None) => t == NULL,
            (Predicate::NotEquals(t), Some(v)) => v != t,
            (Predicate::NotEquals(t), None) => t != NULL,
            (Predicate::Matches(re), Some(v)) => re.is_match(v),
            (Predicate::NotMatches(re), Some(v)) => !re.is_match(v),
            (Predicate::Matches(_) | Predicate::NotMatches(_), None) => false,
        }
    }
}
