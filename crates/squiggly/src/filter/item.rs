//! Predicates and grouping state for one search parameter.

use std::collections::BTreeMap;

use regex::Regex;

use crate::error::Result;
use crate::filter::op::{Filter, FilterOp, Operator};
use crate::filter::StateTriple;
use crate::flatten::glob_to_regex;
use crate::packet::{Packet, NULL};
use crate::store::FieldTrie;
use crate::trie::NodeId;

/// The filters and group flag attached to one search parameter, plus the
/// trie nodes whose fields the parameter currently matches.
///
/// Node handles are validated lazily: handles to pruned nodes are skipped
/// on read and dropped by [`FilterItem::retain_live`].
#[derive(Debug, Clone)]
pub struct FilterItem {
    search_param: String,
    glob: Option<Regex>,
    filters: Vec<Filter>,
    grouped: bool,
    bound: Vec<NodeId>,
}

impl FilterItem {
    /// Creates an empty item. Parameters containing `*` are matched as globs.
    pub fn new(search_param: impl Into<String>) -> Result<Self> {
        let search_param = search_param.into();
        let glob = if search_param.contains('*') {
            Some(glob_to_regex(&search_param, '.')?)
        } else {
            None
        };
        Ok(Self {
            search_param,
            glob,
            filters: Vec::new(),
            grouped: false,
            bound: Vec::new(),
        })
    }

    /// Returns the search parameter.
    pub fn search_param(&self) -> &str {
        &self.search_param
    }

    /// Returns the filters in insertion order.
    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    /// Returns true if this parameter is grouped on.
    pub fn is_grouped(&self) -> bool {
        self.grouped
    }

    /// Returns true once the item holds neither filters nor the group flag.
    pub fn is_removable(&self) -> bool {
        self.filters.is_empty() && !self.grouped
    }

    pub(crate) fn add_filter(&mut self, filter: Filter) {
        self.filters.push(filter);
    }

    /// Removes every filter with this operator and value. Returns true if the
    /// item is now removable.
    pub(crate) fn remove_filter(&mut self, op: FilterOp, value: &str) -> bool {
        self.filters
            .retain(|f| !(f.op() == op && f.value() == value));
        self.is_removable()
    }

    pub(crate) fn set_group(&mut self) {
        self.grouped = true;
    }

    /// Clears the group flag. Returns true if the item is now removable.
    pub(crate) fn unset_group(&mut self) -> bool {
        self.grouped = false;
        self.is_removable()
    }

    /// Tracks a trie node. Binding the same node twice is a no-op.
    pub(crate) fn bind(&mut self, id: NodeId) {
        if !self.bound.contains(&id) {
            self.bound.push(id);
        }
    }

    /// Drops handles to nodes that have been pruned.
    pub fn retain_live(&mut self, trie: &FieldTrie) {
        self.bound.retain(|&id| trie.is_live(id));
    }

    /// Returns the currently tracked nodes, including stale handles.
    pub fn bound(&self) -> &[NodeId] {
        &self.bound
    }

    /// Returns true if a raw field path belongs to this parameter.
    pub fn matches_field(&self, field: &str) -> bool {
        match &self.glob {
            Some(glob) => glob.is_match(field),
            None => self.search_param == field,
        }
    }

    /// Returns the raw field paths this parameter currently covers.
    pub fn fields<'a>(&'a self, trie: &'a FieldTrie) -> impl Iterator<Item = &'a str> + 'a {
        self.bound
            .iter()
            .flat_map(move |&id| trie.fields(id))
            .filter(move |field| self.matches_field(field))
    }

    /// Returns true if the packet fails any filter on every covered field.
    ///
    /// Each filter passes if it holds on at least one covered field. With no
    /// covered fields, filters are tested against an absent value.
    pub fn is_filtered(&self, packet: &Packet, trie: &FieldTrie) -> bool {
        if self.filters.is_empty() {
            return false;
        }
        let fields: Vec<&str> = self.fields(trie).collect();
        self.filters.iter().any(|filter| {
            let satisfied = if fields.is_empty() {
                filter.is_satisfied(None)
            } else {
                fields.iter().any(|f| filter.is_satisfied(packet.value(f)))
            };
            !satisfied
        })
    }

    /// Returns each covered field's value on the packet, NULL when absent.
    pub fn grouping(&self, packet: &Packet, trie: &FieldTrie) -> BTreeMap<String, String> {
        self.fields(trie)
            .map(|f| (f.to_string(), packet.value(f).unwrap_or(NULL).to_string()))
            .collect()
    }

    /// Returns the item's state: its filters, then `*` if grouped.
    pub fn to_states(&self) -> Vec<StateTriple> {
        let mut states: Vec<StateTriple> = self
            .filters
            .iter()
            .map(|f| StateTriple::new(&self.search_param, f.op().label(), f.value()))
            .collect();
        if self.grouped {
            states.push(StateTriple::new(&self.search_param, Operator::Group.label(), ""));
        }
        states
    }
}
