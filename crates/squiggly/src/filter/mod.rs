//! Filter language over indexed fields.
//!
//! A [`FilterSet`] maps search parameters (literal field paths or globs) to
//! [`FilterItem`]s. Each item holds comparison [`Filter`]s and an optional
//! group-by flag. Items combine by AND; within an item each filter is
//! satisfied if it holds on any field the parameter covers.
//!
//! Filter state can also be reconciled against an external list of
//! `(param, operator, value)` triples with [`FilterSet::merge_from_state`].

pub mod item;
pub mod op;
pub mod set;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::packet::{NULL, ROOT};

pub use item::FilterItem;
pub use op::{Filter, FilterOp, FilterValue, Operator};
pub use set::{FilterSet, MergeOutcome};

/// Search parameter to `{field: value}` for every grouped parameter.
pub type Grouping = BTreeMap<String, BTreeMap<String, String>>;

/// Encodes a grouping as a dataset label. An empty grouping is [`ROOT`].
pub fn grouping_key(grouping: &Grouping) -> String {
    if grouping.is_empty() {
        return ROOT.to_string();
    }
    // String-keyed maps of strings always serialize.
    serde_json::to_string(grouping).unwrap_or_else(|_| ROOT.to_string())
}

/// Decodes a dataset label. [`ROOT`] decodes to an empty grouping.
pub fn parse_grouping_key(key: &str) -> Result<Grouping> {
    if key == ROOT {
        return Ok(Grouping::new());
    }
    Ok(serde_json::from_str(key)?)
}

/// Renders a grouping as `field=value&field=value` for display.
pub fn breadcrumb(grouping: &Grouping) -> String {
    if grouping.is_empty() {
        return ROOT.to_string();
    }
    let mut parts = Vec::new();
    for (param, fields) in grouping {
        if fields.is_empty() {
            parts.push(format!("{param}={NULL}"));
        }
        for (field, value) in fields {
            parts.push(format!("{field}={value}"));
        }
    }
    parts.join("&")
}

/// One entry of declarative filter state.
///
/// Serialized as a three-element array; that encoding is the canonical form
/// compared by [`FilterSet::merge_from_state`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "(String, String, String)", into = "(String, String, String)")]
pub struct StateTriple {
    /// Search parameter.
    pub param: String,
    /// Operator label.
    pub op: String,
    /// Value; empty for group toggles.
    pub value: String,
}

impl StateTriple {
    /// Creates a triple.
    pub fn new(param: impl Into<String>, op: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            param: param.into(),
            op: op.into(),
            value: value.into(),
        }
    }

    /// Creates a triple whose value matches any of `values`.
    ///
    /// # Errors
    ///
    /// Fails for unknown operators and for more than one value on a
    /// non-regex operator.
    pub fn with_values<S: AsRef<str>>(param: &str, op: &str, values: &[S]) -> Result<Self> {
        let operator: Operator = op.parse()?;
        let is_regex = matches!(operator, Operator::Filter(f) if f.is_regex());
        let value = match values {
            [single] if !is_regex => single.as_ref().to_string(),
            _ => FilterValue::Any(values.iter().map(|v| v.as_ref().to_string()).collect())
                .resolve(param, operator)?,
        };
        Ok(Self::new(param, op, value))
    }

    /// Returns the canonical string encoding.
    ///
    /// Group and ungroup entries carry no value, so any value they hold is
    /// dropped.
    pub fn canonical(&self) -> String {
        let value = match self.op.as_str() {
            "*" | "!*" => "",
            _ => self.value.as_str(),
        };
        serde_json::Value::from(vec![self.param.as_str(), self.op.as_str(), value]).to_string()
    }
}

impl From<(String, String, String)> for StateTriple {
    fn from((param, op, value): (String, String, String)) -> Self {
        Self { param, op, value }
    }
}

impl From<StateTriple> for (String, String, String) {
    fn from(state: StateTriple) -> Self {
        (state.param, state.op, state.value)
    }
}
