//! The set of active filter items.

use std::collections::{BTreeMap, HashSet};

use serde::Serialize;
use tracing::debug;

use crate::error::{Result, SquigglyError};
use crate::filter::item::FilterItem;
use crate::filter::op::{Filter, FilterValue, Operator};
use crate::filter::{grouping_key, Grouping, StateTriple};
use crate::packet::Packet;
use crate::store::FieldTrie;
use crate::trie::NodeId;

/// Number of state entries applied by [`FilterSet::merge_from_state`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MergeOutcome {
    /// Entries present in the incoming state but not the current one.
    pub added: usize,
    /// Entries present in the current state but not the incoming one.
    pub removed: usize,
}

/// A validated state change, ready to apply.
enum Change {
    Filter(String, Filter),
    Group(String),
    Ungroup(String),
}

/// Filter items keyed by search parameter.
///
/// Methods that create items take the field trie so that a new item can
/// start tracking the fields already indexed.
#[derive(Debug, Clone, Default)]
pub struct FilterSet {
    items: BTreeMap<String, FilterItem>,
}

impl FilterSet {
    /// Creates an empty filter set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if no items exist.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Returns the item for a search parameter.
    pub fn item(&self, param: &str) -> Option<&FilterItem> {
        self.items.get(param)
    }

    /// Iterates over all items, ordered by search parameter.
    pub fn items(&self) -> impl Iterator<Item = &FilterItem> {
        self.items.values()
    }

    /// Returns the grouped items.
    pub fn groups(&self) -> Vec<&FilterItem> {
        self.items.values().filter(|i| i.is_grouped()).collect()
    }

    fn get_or_create_item(&mut self, trie: &FieldTrie, param: &str) -> Result<&mut FilterItem> {
        if !self.items.contains_key(param) {
            let mut item = FilterItem::new(param)?;
            for id in trie.find(param) {
                item.bind(id);
            }
            self.items.insert(param.to_string(), item);
        }
        self.items
            .get_mut(param)
            .ok_or_else(|| SquigglyError::UnknownFilter(param.to_string()))
    }

    /// Adds a filter or toggles grouping.
    ///
    /// # Errors
    ///
    /// Fails for invalid regex values and for value lists on non-regex
    /// operators. Nothing is changed on failure.
    pub fn add_filter(
        &mut self,
        trie: &FieldTrie,
        param: &str,
        op: Operator,
        value: impl Into<FilterValue>,
    ) -> Result<()> {
        let change = prepare(param, op, &value.into())?;
        self.apply(trie, change)
    }

    fn apply(&mut self, trie: &FieldTrie, change: Change) -> Result<()> {
        match change {
            Change::Filter(param, filter) => {
                self.get_or_create_item(trie, &param)?.add_filter(filter);
            }
            Change::Group(param) => {
                self.get_or_create_item(trie, &param)?.set_group();
            }
            Change::Ungroup(param) => {
                self.remove_group(&param);
            }
        }
        Ok(())
    }

    /// Removes a filter or group flag. Returns true if the item was deleted.
    ///
    /// # Errors
    ///
    /// Returns `SquigglyError::UnknownFilter` if no item exists for `param`.
    pub fn remove_filter(
        &mut self,
        param: &str,
        op: Operator,
        value: impl Into<FilterValue>,
    ) -> Result<bool> {
        let value = value.into().resolve(param, op)?;
        let item = self
            .items
            .get_mut(param)
            .ok_or_else(|| SquigglyError::UnknownFilter(param.to_string()))?;
        let removable = match op {
            Operator::Filter(f) => item.remove_filter(f, &value),
            Operator::Group => item.unset_group(),
            Operator::Ungroup => false,
        };
        if removable {
            self.items.remove(param);
        }
        Ok(removable)
    }

    /// Groups by a search parameter.
    pub fn add_group(&mut self, trie: &FieldTrie, param: &str) -> Result<()> {
        self.apply(trie, Change::Group(param.to_string()))
    }

    /// Stops grouping by a search parameter. Returns true if the item was
    /// deleted.
    pub fn remove_group(&mut self, param: &str) -> bool {
        let Some(item) = self.items.get_mut(param) else {
            return false;
        };
        if item.unset_group() {
            self.items.remove(param);
            return true;
        }
        false
    }

    /// Returns true if any item rejects the packet.
    pub fn is_filtered(&self, packet: &Packet, trie: &FieldTrie) -> bool {
        self.items.values().any(|item| item.is_filtered(packet, trie))
    }

    /// Returns the packet's values for every grouped parameter.
    pub fn grouping(&self, packet: &Packet, trie: &FieldTrie) -> Grouping {
        self.items
            .values()
            .filter(|item| item.is_grouped())
            .map(|item| (item.search_param().to_string(), item.grouping(packet, trie)))
            .collect()
    }

    /// Returns the packet's dataset label: its encoded grouping, or ROOT.
    pub fn grouping_key(&self, packet: &Packet, trie: &FieldTrie) -> String {
        grouping_key(&self.grouping(packet, trie))
    }

    /// Searches a freshly built branch for fields each item should track.
    ///
    /// Passed as the new-branch callback of [`FieldTrie::add_node`]; the
    /// returned links are applied with [`FilterSet::bind`].
    pub fn link_new_branch(&self, branch: &FieldTrie) -> Vec<(String, NodeId)> {
        let mut links = Vec::new();
        for item in self.items.values() {
            for id in branch.find(item.search_param()) {
                links.push((item.search_param().to_string(), id));
            }
        }
        links
    }

    /// Starts tracking nodes reported by [`FilterSet::link_new_branch`].
    pub fn bind(&mut self, links: Vec<(String, NodeId)>) {
        for (param, id) in links {
            if let Some(item) = self.items.get_mut(&param) {
                item.bind(id);
            }
        }
    }

    /// Drops node handles that no longer resolve.
    pub fn retain_live(&mut self, trie: &FieldTrie) {
        for item in self.items.values_mut() {
            item.retain_live(trie);
        }
    }

    /// Returns the raw field paths covered by every item, item by item.
    pub fn fields(&self, trie: &FieldTrie) -> Vec<String> {
        self.items
            .values()
            .flat_map(|item| item.fields(trie).map(str::to_string))
            .collect()
    }

    /// Returns `(search param, covered fields)` for every item.
    pub fn params(&self, trie: &FieldTrie) -> Vec<(String, Vec<String>)> {
        self.items
            .values()
            .map(|item| {
                (
                    item.search_param().to_string(),
                    item.fields(trie).map(str::to_string).collect(),
                )
            })
            .collect()
    }

    /// Returns the current state as triples.
    pub fn to_states(&self) -> Vec<StateTriple> {
        self.items.values().flat_map(FilterItem::to_states).collect()
    }

    /// Returns `param -> [(op, value)]`, group marker first.
    pub fn summary(&self) -> BTreeMap<String, Vec<(String, String)>> {
        self.items
            .values()
            .map(|item| {
                let mut entries = Vec::new();
                if item.is_grouped() {
                    entries.push((Operator::Group.label().to_string(), String::new()));
                }
                entries.extend(
                    item.filters()
                        .iter()
                        .map(|f| (f.op().label().to_string(), f.value().to_string())),
                );
                (item.search_param().to_string(), entries)
            })
            .collect()
    }

    /// Reconciles this set with an authoritative state list.
    ///
    /// Entries are compared by their canonical encoding. Entries only in
    /// `states` are added, entries only in the current state are removed.
    /// Every incoming entry is validated before anything changes, and
    /// merging the set's own [`to_states`](Self::to_states) is a no-op.
    pub fn merge_from_state(
        &mut self,
        trie: &FieldTrie,
        states: &[StateTriple],
    ) -> Result<MergeOutcome> {
        let current: Vec<StateTriple> = self.to_states();
        let current_keys: HashSet<String> = current.iter().map(StateTriple::canonical).collect();
        let incoming_keys: HashSet<String> = states.iter().map(StateTriple::canonical).collect();

        let mut seen = HashSet::new();
        let mut additions = Vec::new();
        for state in states {
            let key = state.canonical();
            if current_keys.contains(&key) || !seen.insert(key) {
                continue;
            }
            let op: Operator = state.op.parse()?;
            additions.push(prepare(&state.param, op, &FilterValue::One(state.value.clone()))?);
        }

        let mut seen = HashSet::new();
        let removals: Vec<&StateTriple> = current
            .iter()
            .filter(|s| {
                let key = s.canonical();
                !incoming_keys.contains(&key) && seen.insert(key)
            })
            .collect();

        let outcome = MergeOutcome {
            added: additions.len(),
            removed: removals.len(),
        };
        for change in additions {
            self.apply(trie, change)?;
        }
        for state in removals {
            // An incoming `!*` may already have deleted the item.
            if !self.items.contains_key(&state.param) {
                continue;
            }
            let op: Operator = state.op.parse()?;
            self.remove_filter(&state.param, op, state.value.as_str())?;
        }
        debug!(
            "Merged filter state: {} added, {} removed",
            outcome.added, outcome.removed
        );
        Ok(outcome)
    }
}

/// Validates and compiles a state change without touching the set.
fn prepare(param: &str, op: Operator, value: &FilterValue) -> Result<Change> {
    let param = param.to_string();
    Ok(match op {
        Operator::Filter(f) => {
            let value = value.resolve(&param, op)?;
            Change::Filter(param, Filter::new(f, value)?)
        }
        Operator::Group => Change::Group(param),
        Operator::Ungroup => Change::Ungroup(param),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::FilterOp;
    use crate::trie::TrieOptions;

    fn trie() -> FieldTrie {
        FieldTrie::new(TrieOptions::default())
    }

    fn states(list: &[(&str, &str, &str)]) -> Vec<StateTriple> {
        list.iter()
            .map(|(p, o, v)| StateTriple::new(*p, *o, *v))
            .collect()
    }

    #[test]
    fn test_add_filter_from_state() {
        let trie = trie();
        let mut filters = FilterSet::new();
        let outcome = filters
            .merge_from_state(&trie, &states(&[("foo", "==", "bar")]))
            .unwrap();
        assert_eq!(outcome, MergeOutcome { added: 1, removed: 0 });
        assert_eq!(
            filters.summary()["foo"],
            vec![("==".to_string(), "bar".to_string())]
        );
    }

    #[test]
    fn test_remove_filter_from_state() {
        let trie = trie();
        let mut filters = FilterSet::new();
        filters
            .add_filter(&trie, "foo", FilterOp::Equals.into(), "bar")
            .unwrap();
        filters
            .add_filter(&trie, "foo", FilterOp::Equals.into(), "baz")
            .unwrap();
        filters
            .merge_from_state(&trie, &states(&[("foo", "==", "bar")]))
            .unwrap();
        assert_eq!(filters.to_states(), states(&[("foo", "==", "bar")]));
    }

    #[test]
    fn test_clear_from_state() {
        let trie = trie();
        let mut filters = FilterSet::new();
        filters
            .add_filter(&trie, "foo", FilterOp::Equals.into(), "bar")
            .unwrap();
        filters.add_group(&trie, "baz").unwrap();
        filters.merge_from_state(&trie, &[]).unwrap();
        assert!(filters.is_empty());
    }

    #[test]
    fn test_group_from_state_keeps_existing_filter() {
        let trie = trie();
        let mut filters = FilterSet::new();
        filters
            .add_filter(&trie, "foo", FilterOp::Equals.into(), "bar")
            .unwrap();
        filters
            .merge_from_state(&trie, &states(&[("foo", "==", "bar"), ("foo", "*", "")]))
            .unwrap();
        assert_eq!(
            filters.summary()["foo"],
            vec![
                ("*".to_string(), String::new()),
                ("==".to_string(), "bar".to_string()),
            ]
        );

        filters
            .merge_from_state(&trie, &states(&[("foo", "==", "bar")]))
            .unwrap();
        let item = filters.item("foo").unwrap();
        assert!(!item.is_grouped());
        assert_eq!(item.filters().len(), 1);
    }

    #[test]
    fn test_merge_own_state_is_noop() {
        let trie = trie();
        let mut filters = FilterSet::new();
        filters
            .add_filter(&trie, "a.*", FilterOp::Matches.into(), vec!["x".to_string(), "y".to_string()])
            .unwrap();
        filters.add_group(&trie, "b").unwrap();
        let own = filters.to_states();
        let outcome = filters.merge_from_state(&trie, &own).unwrap();
        assert_eq!(outcome, MergeOutcome::default());
        assert_eq!(filters.to_states(), own);
    }

    #[test]
    fn test_merge_group_with_value_is_idempotent() {
        let trie = trie();
        let mut filters = FilterSet::new();
        let incoming = states(&[("foo", "*", "x")]);

        let outcome = filters.merge_from_state(&trie, &incoming).unwrap();
        assert_eq!(outcome, MergeOutcome { added: 1, removed: 0 });
        for _ in 0..2 {
            let outcome = filters.merge_from_state(&trie, &incoming).unwrap();
            assert_eq!(outcome, MergeOutcome::default());
            let groups: Vec<&str> = filters.groups().iter().map(|i| i.search_param()).collect();
            assert_eq!(groups, vec!["foo"]);
        }
    }

    #[test]
    fn test_merge_rejects_bad_state_without_changes() {
        let trie = trie();
        let mut filters = FilterSet::new();
        filters.add_group(&trie, "keep").unwrap();
        let err = filters
            .merge_from_state(&trie, &states(&[("foo", "==", "bar"), ("foo", "<>", "x")]))
            .unwrap_err();
        assert!(matches!(err, SquigglyError::UnknownOperator(_)));
        assert_eq!(filters.to_states(), states(&[("keep", "*", "")]));

        let err = filters
            .merge_from_state(&trie, &states(&[("foo", "~", "(")]))
            .unwrap_err();
        assert!(matches!(err, SquigglyError::InvalidPattern { .. }));
        assert!(filters.item("foo").is_none());
    }

    #[test]
    fn test_remove_unknown_key_is_error() {
        let mut filters = FilterSet::new();
        let err = filters
            .remove_filter("nope", FilterOp::Equals.into(), "x")
            .unwrap_err();
        assert!(matches!(err, SquigglyError::UnknownFilter(_)));
    }

    #[test]
    fn test_ungroup_deletes_only_when_empty() {
        let trie = trie();
        let mut filters = FilterSet::new();
        filters
            .add_filter(&trie, "foo", Operator::Group, "")
            .unwrap();
        filters
            .add_filter(&trie, "foo", FilterOp::NotEquals.into(), "x")
            .unwrap();
        filters
            .add_filter(&trie, "foo", Operator::Ungroup, "")
            .unwrap();
        assert!(filters.item("foo").is_some());
        assert!(filters
            .remove_filter("foo", FilterOp::NotEquals.into(), "x")
            .unwrap());
        assert!(filters.item("foo").is_none());
    }
}
