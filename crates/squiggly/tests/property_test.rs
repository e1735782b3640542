//! Property tests for the field index, filter state and windowing.
//!
//! Uses proptest to check invariants over arbitrary insertion orders, filter
//! states, documents and packet timelines.

use std::collections::BTreeSet;

use proptest::prelude::*;
use serde_json::{Map, Value};
use squiggly::flatten::inflate_pairs;
use squiggly::{
    flatten, ChartData, FieldTrie, FilterSet, NodeId, Packet, PacketField, StateTriple,
    TrieOptions, View, ViewConfig,
};

fn index(trie: &mut FieldTrie, field: &str, id: u64) -> NodeId {
    let (node, _) = trie.add_node(field, |_| Vec::<((), NodeId)>::new());
    trie.insert_value(node, id);
    node
}

fn node_set(ids: Vec<NodeId>) -> BTreeSet<NodeId> {
    ids.into_iter().collect()
}

/// Field paths like `a.b[3].c`.
fn field_strategy() -> impl Strategy<Value = String> {
    prop::collection::vec(
        prop_oneof![
            "[a-c]".prop_map(|s| format!(".{s}")),
            (0u8..5).prop_map(|i| format!("[{i}]")),
        ],
        0..4,
    )
    .prop_map(|rest| format!("a{}", rest.concat()))
}

/// Filter state triples over a small vocabulary.
fn state_strategy() -> impl Strategy<Value = Vec<StateTriple>> {
    prop::collection::vec(
        (
            prop_oneof![Just("foo"), Just("bar"), Just("a.*")],
            prop_oneof![Just("=="), Just("!="), Just("~"), Just("!~"), Just("*")],
            "[a-z]{0,3}",
        )
            .prop_map(|(param, op, value)| {
                let value = if op == "*" { String::new() } else { value };
                StateTriple::new(param, op, value)
            }),
        0..8,
    )
}

/// JSON documents with object keys that are never numeric.
fn document_strategy() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i32>().prop_map(Value::from),
        "[ -~]{0,8}".prop_map(Value::String),
    ];
    let tree = leaf.prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::btree_map("[a-z][a-z0-9_]{0,4}", inner, 0..4)
                .prop_map(|m| Value::Object(m.into_iter().collect::<Map<_, _>>())),
        ]
    });
    prop::collection::btree_map("[a-z][a-z0-9_]{0,4}", tree, 0..5)
        .prop_map(|m| Value::Object(m.into_iter().collect()))
}

proptest! {
    /// `a.*` finds the same nodes however many indices were inserted.
    #[test]
    fn test_collapsed_wildcard_is_stable(indices in prop::collection::vec(0u32..50, 1..20)) {
        let mut trie = FieldTrie::new(TrieOptions::default());
        index(&mut trie, "a[0]", 0);
        let baseline = node_set(trie.find("a.*"));

        for (i, n) in indices.iter().enumerate() {
            index(&mut trie, &format!("a[{n}]"), i as u64 + 1);
            prop_assert_eq!(&node_set(trie.find("a.*")), &baseline);
        }
    }

    /// `**` reaches everything `*` reaches from the same anchor.
    #[test]
    fn test_double_star_superset(fields in prop::collection::vec(field_strategy(), 1..20)) {
        let mut trie = FieldTrie::new(TrieOptions { collapse_arrays: false, search_prefixes: vec![] });
        for (i, field) in fields.iter().enumerate() {
            index(&mut trie, field, i as u64);
        }
        let one = node_set(trie.find("a.*"));
        let many = node_set(trie.find("a.**"));
        prop_assert!(one.is_subset(&many));
    }

    /// Re-merging a filter set's own state changes nothing.
    #[test]
    fn test_merge_own_state_idempotent(states in state_strategy()) {
        let trie = FieldTrie::new(TrieOptions::default());
        let mut filters = FilterSet::new();
        filters.merge_from_state(&trie, &states).unwrap();

        let own = filters.to_states();
        let outcome = filters.merge_from_state(&trie, &own).unwrap();
        prop_assert_eq!((outcome.added, outcome.removed), (0, 0));
        prop_assert_eq!(filters.to_states(), own);
    }

    /// Inflating a flattened document gives the document back.
    #[test]
    fn test_flatten_inflate_roundtrip(doc in document_strategy()) {
        let flat: Vec<(String, Value)> = flatten(&doc)
            .into_iter()
            .map(|(k, v)| (k, PacketField::parse(&v).to_json()))
            .collect();
        let back = inflate_pairs(flat.iter().map(|(k, v)| (k.as_str(), v.clone())));
        prop_assert_eq!(back, doc);
    }

    /// No retained packet is older than the window plus two buckets.
    #[test]
    fn test_window_bound(gaps in prop::collection::vec(1i64..5_000, 1..60)) {
        let config = ViewConfig::default().with_duration(10_000).with_buckets(10);
        let bucket = config.ms_per_bucket() as i64;
        let mut view = View::new(config, Vec::<ChartData>::new()).unwrap();

        let mut ms = 0;
        for (id, gap) in gaps.into_iter().enumerate() {
            ms += gap;
            view.add_packet(Packet::new(id as u64, ms, 1, [("f", "1")]), ms);
            let cutoff = ms - 10_000 - 2 * bucket;
            prop_assert!(view.store().packets().all(|p| p.header.ms >= cutoff));
        }
    }
}
