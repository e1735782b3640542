//! Conversion between nested JSON documents and flat packet payloads.
//!
//! `flatten` walks a document depth-first and emits one `(path, raw token)`
//! pair per scalar. Arrays whose first element is a number are kept whole as
//! a single JSON-encoded token; grouping and filtering treat such a tuple as
//! one opaque value. `inflate` reverses the walk.

use std::collections::BTreeMap;

use regex::Regex;
use serde_json::Value;
use tracing::warn;

use crate::error::{Result, SquigglyError};
use crate::packet::{Payload, NULL};

/// Flattens a JSON document into `(path, raw token)` pairs.
pub fn flatten(value: &Value) -> Vec<(String, String)> {
    flatten_masked::<&str>(value, &[])
}

/// Flattens a JSON document, replacing masked paths with the NULL sentinel.
///
/// Masks are dotted paths where `*` matches one segment and `**` one or more.
/// A masked subtree is emitted once, at the masked path, and not descended.
pub fn flatten_masked<S: AsRef<str>>(value: &Value, masks: &[S]) -> Vec<(String, String)> {
    let masks: Vec<Vec<&str>> = masks
        .iter()
        .map(|m| m.as_ref().split('.').rev().collect())
        .collect();
    let mut out = Vec::new();
    let mut path = Vec::new();
    flatten_into(&mut path, value, &masks, &mut out);
    out
}

fn flatten_into<'m>(
    path: &mut Vec<String>,
    value: &Value,
    masks: &[Vec<&'m str>],
    out: &mut Vec<(String, String)>,
) {
    match value {
        Value::Array(items) => match items.first() {
            None => out.push((path.join("."), "[]".to_string())),
            Some(Value::Number(_)) => out.push((path.join("."), value.to_string())),
            Some(_) => {
                for (i, item) in items.iter().enumerate() {
                    descend(path, i.to_string(), item, masks, out);
                }
            }
        },
        Value::Object(map) => {
            if map.is_empty() {
                out.push((path.join("."), "{}".to_string()));
            }
            for (key, item) in map {
                descend(path, key.clone(), item, masks, out);
            }
        }
        Value::String(s) => out.push((path.join("."), format!("\"{s}\""))),
        scalar => out.push((path.join("."), scalar.to_string())),
    }
}

fn descend<'m>(
    path: &mut Vec<String>,
    key: String,
    value: &Value,
    masks: &[Vec<&'m str>],
    out: &mut Vec<(String, String)>,
) {
    let next = pop_masks(masks, &key);
    path.push(key);
    match next {
        None => out.push((path.join("."), NULL.to_string())),
        Some(next) => flatten_into(path, value, &next, out),
    }
    path.pop();
}

/// Advances reversed masks past `key`. Returns `None` when a mask ends here.
fn pop_masks<'a>(masks: &[Vec<&'a str>], key: &str) -> Option<Vec<Vec<&'a str>>> {
    let mut next = Vec::new();
    for mask in masks {
        let Some((&last, rest)) = mask.split_last() else {
            continue;
        };
        if rest.is_empty() && (last == key || last == "*" || last == "**") {
            return None;
        }
        if last == key || last == "*" {
            next.push(rest.to_vec());
        }
        if last == "**" {
            next.push(rest.to_vec());
            let mut recursive = rest.to_vec();
            recursive.push("**");
            next.push(recursive);
        }
    }
    Some(next)
}

/// Intermediate tree used while inflating.
enum Tree {
    Leaf(Value),
    Branch(BTreeMap<String, Tree>),
}

/// Rebuilds a nested JSON document from a flat payload.
pub fn inflate(payload: &Payload) -> Value {
    inflate_pairs(payload.iter().map(|(k, v)| (k.as_str(), v.to_json())))
}

/// Rebuilds a nested JSON document from `(path, value)` pairs.
///
/// Objects whose smallest key is numeric become arrays.
pub fn inflate_pairs<'a, I>(pairs: I) -> Value
where
    I: IntoIterator<Item = (&'a str, Value)>,
{
    let mut root = BTreeMap::new();
    'fields: for (key, value) in pairs {
        let tokens: Vec<&str> = key
            .split(['.', '[', ']'])
            .filter(|t| !t.is_empty())
            .collect();
        let Some((last, parents)) = tokens.split_last() else {
            warn!("Skipping field with empty path during inflate");
            continue;
        };
        let mut target = &mut root;
        for token in parents {
            let entry = target
                .entry((*token).to_string())
                .or_insert_with(|| Tree::Branch(BTreeMap::new()));
            if let Tree::Leaf(_) = entry {
                warn!("Field {key:?} nests below a scalar at {token:?}, replacing it");
                *entry = Tree::Branch(BTreeMap::new());
            }
            let Tree::Branch(children) = entry else {
                continue 'fields;
            };
            target = children;
        }
        target.insert((*last).to_string(), Tree::Leaf(value));
    }
    build(root)
}

fn build(children: BTreeMap<String, Tree>) -> Value {
    let is_array = children
        .keys()
        .next()
        .is_some_and(|k| k.bytes().all(|b| b.is_ascii_digit()));
    if !is_array {
        return Value::Object(
            children
                .into_iter()
                .map(|(k, v)| (k, build_tree(v)))
                .collect(),
        );
    }
    let mut indexed: Vec<(usize, Value)> = children
        .into_iter()
        .filter_map(|(k, v)| k.parse::<usize>().ok().map(|i| (i, build_tree(v))))
        .collect();
    indexed.sort_by_key(|(i, _)| *i);
    let len = indexed.last().map_or(0, |(i, _)| i + 1);
    let mut items = vec![Value::Null; len];
    for (i, value) in indexed {
        items[i] = value;
    }
    Value::Array(items)
}

fn build_tree(tree: Tree) -> Value {
    match tree {
        Tree::Leaf(value) => value,
        Tree::Branch(children) => build(children),
    }
}

/// Escapes regex metacharacters.
pub fn regex_escape(text: &str) -> String {
    regex::escape(text)
}

/// Escapes each value and joins them into one alternation.
pub fn join_escaped<S: AsRef<str>>(values: &[S]) -> String {
    values
        .iter()
        .map(|v| regex_escape(v.as_ref()))
        .collect::<Vec<_>>()
        .join("|")
}

/// Converts a glob (`*` one segment, `**` anything) into an anchored regex.
pub fn glob_to_regex(glob: &str, sep: char) -> Result<Regex> {
    let one_segment = format!("[^{}]+", regex_escape(&sep.to_string()));
    let body = glob
        .split("**")
        .map(|part| {
            part.split('*')
                .map(regex_escape)
                .collect::<Vec<_>>()
                .join(&one_segment)
        })
        .collect::<Vec<_>>()
        .join(".*");
    let pattern = format!("^{body}$");
    Regex::new(&pattern).map_err(|source| SquigglyError::InvalidPattern { pattern, source })
}
