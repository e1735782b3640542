//! Packet log, field index and table rendering.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use crate::config::ViewConfig;
use crate::filter::{grouping_key, FilterSet, Grouping};
use crate::packet::{Millis, Packet, PacketId, NULL};
use crate::trie::{TrieOptions, TrieRoot};

/// Field index keyed by packet id.
pub type FieldTrie = TrieRoot<PacketId>;

/// Column name of the packet id in raw tables.
pub const ID_COLUMN: &str = "id";
/// Column name of the packet count in aggregate tables.
pub const COUNT_COLUMN: &str = "_cnt";
/// Column name of the byte size in both tables.
pub const SIZE_COLUMN: &str = "_sz";

/// One chart series: a grouping key and `(bucket, count)` points.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Dataset {
    /// Grouping key, or [`ROOT`](crate::packet::ROOT).
    pub label: String,
    /// Points in ascending bucket order.
    pub data: Vec<(Millis, u64)>,
}

/// A rendered table.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Table {
    /// Column names.
    pub headers: Vec<String>,
    /// Cell values, one row per grouping or per packet.
    pub rows: Vec<Vec<String>>,
    /// Packets contributing to the rows.
    #[serde(skip)]
    pub packets: BTreeMap<PacketId, Arc<Packet>>,
    /// Search parameter to the fields it covers.
    pub params: Vec<(String, Vec<String>)>,
}

fn trie_options(config: &ViewConfig) -> TrieOptions {
    TrieOptions {
        collapse_arrays: config.collapse_arrays,
        search_prefixes: config.search_prefixes.clone(),
    }
}

/// Retained packets in arrival order, indexed by field.
///
/// Packets must arrive with non-decreasing timestamps; [`PacketStore::trim`]
/// relies on it to retire packets from the front.
#[derive(Debug)]
pub struct PacketStore {
    ms_per_bucket: f64,
    packets: VecDeque<Arc<Packet>>,
    by_id: HashMap<PacketId, Arc<Packet>>,
    /// Retained packets shadowed in `by_id` by a newer packet with the same id.
    shadowed: HashMap<PacketId, usize>,
    trie: FieldTrie,
}

impl PacketStore {
    /// Creates an empty store.
    pub fn new(config: &ViewConfig) -> Self {
        Self {
            ms_per_bucket: config.ms_per_bucket(),
            packets: VecDeque::new(),
            by_id: HashMap::new(),
            shadowed: HashMap::new(),
            trie: FieldTrie::new(trie_options(config)),
        }
    }

    /// Applies new options. Fields indexed earlier keep their shape.
    pub fn update_config(&mut self, config: &ViewConfig) {
        self.ms_per_bucket = config.ms_per_bucket();
        self.trie.update_options(trie_options(config));
    }

    /// Returns the field index.
    pub fn trie(&self) -> &FieldTrie {
        &self.trie
    }

    /// Returns the number of retained packets.
    pub fn len(&self) -> usize {
        self.packets.len()
    }

    /// Returns true if no packets are retained.
    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    /// Iterates over retained packets, oldest first.
    pub fn packets(&self) -> impl DoubleEndedIterator<Item = &Arc<Packet>> {
        self.packets.iter()
    }

    /// Returns a retained packet by id.
    pub fn get(&self, id: PacketId) -> Option<&Arc<Packet>> {
        self.by_id.get(&id)
    }

    /// Returns the timestamp of the oldest retained packet.
    pub fn oldest_ms(&self) -> Option<Millis> {
        self.packets.front().map(|p| p.header.ms)
    }

    /// Rounds a timestamp down to the start of its bucket.
    pub fn bucket(&self, ms: Millis) -> Millis {
        ((ms as f64 / self.ms_per_bucket).floor() * self.ms_per_bucket).floor() as Millis
    }

    /// Appends a packet and indexes its fields.
    ///
    /// Fields seen for the first time are offered to `filters` so that
    /// matching items start tracking them.
    pub fn add_packet(&mut self, packet: Packet, filters: &mut FilterSet) -> Arc<Packet> {
        let header = packet.header;
        if let Some(last) = self.packets.back() {
            if header.ms < last.header.ms {
                warn!(
                    "Packet {} arrived out of order: {} < {}",
                    header.id, header.ms, last.header.ms
                );
            }
        }
        let packet = Arc::new(packet);
        if self.by_id.insert(header.id, Arc::clone(&packet)).is_some() {
            warn!("Duplicate packet id {}", header.id);
            *self.shadowed.entry(header.id).or_default() += 1;
        }

        for field in packet.payload.keys() {
            let (node, links) = self
                .trie
                .add_node(field, |branch| filters.link_new_branch(branch));
            filters.bind(links);
            self.trie.insert_value(node, header.id);
        }
        self.packets.push_back(Arc::clone(&packet));
        packet
    }

    /// Retires packets older than `threshold`. Returns how many were removed.
    ///
    /// Trie inconsistencies hit while unindexing are logged by the trie and
    /// skipped.
    pub fn trim(&mut self, threshold: Millis) -> usize {
        let mut removed = 0;
        while self
            .packets
            .front()
            .is_some_and(|p| p.header.ms < threshold)
        {
            let Some(packet) = self.packets.pop_front() else {
                break;
            };
            let id = packet.header.id;
            let is_shadowed = self
                .by_id
                .get(&id)
                .is_some_and(|held| !Arc::ptr_eq(held, &packet));
            let siblings = if is_shadowed {
                self.release_shadowed(id)
            } else {
                self.by_id.remove(&id);
                Vec::new()
            };
            for field in packet.payload.keys() {
                if siblings.iter().any(|p| p.payload.contains_key(field)) {
                    continue;
                }
                let Some(node) = self.trie.lookup(field) else {
                    continue;
                };
                // The trie has already logged the violation.
                let _ = self.trie.remove_value(node, &id);
            }
            removed += 1;
        }
        if removed > 0 {
            debug!(
                "Trimmed {} packets below {}, {} retained",
                removed,
                threshold,
                self.packets.len()
            );
        }
        removed
    }

    /// Drops one shadowed copy of `id` and returns the retained packets that
    /// still carry it.
    fn release_shadowed(&mut self, id: PacketId) -> Vec<Arc<Packet>> {
        let remaining = match self.shadowed.get_mut(&id) {
            Some(count) if *count > 1 => {
                *count -= 1;
                *count
            }
            _ => {
                self.shadowed.remove(&id);
                0
            }
        };
        if remaining == 0 {
            return self.by_id.get(&id).cloned().into_iter().collect();
        }
        self.packets
            .iter()
            .filter(|p| p.header.id == id)
            .cloned()
            .collect()
    }

    /// Recomputes every dataset from the retained packets.
    pub fn render(&self, filters: &FilterSet) -> Vec<Dataset> {
        let mut series: BTreeMap<String, BTreeMap<Millis, u64>> = BTreeMap::new();
        for packet in &self.packets {
            if filters.is_filtered(packet, &self.trie) {
                continue;
            }
            let label = filters.grouping_key(packet, &self.trie);
            *series
                .entry(label)
                .or_default()
                .entry(self.bucket(packet.header.ms))
                .or_default() += 1;
        }
        series
            .into_iter()
            .map(|(label, points)| Dataset {
                label,
                data: points.into_iter().collect(),
            })
            .collect()
    }

    /// Builds a pivot table with one row per grouping.
    ///
    /// Columns are count, total size, then every field covered by a filter
    /// item. Cells for fields outside the row's grouping hold NULL.
    pub fn tabulate_aggregate(&self, filters: &FilterSet) -> Table {
        let fields = filters.fields(&self.trie);
        let mut headers = vec![COUNT_COLUMN.to_string(), SIZE_COLUMN.to_string()];
        headers.extend(fields.iter().cloned());

        struct Row {
            grouping: Grouping,
            count: u64,
            size: u64,
        }
        let mut rows: BTreeMap<String, Row> = BTreeMap::new();
        let mut packets = BTreeMap::new();
        for packet in &self.packets {
            if filters.is_filtered(packet, &self.trie) {
                continue;
            }
            packets.insert(packet.header.id, Arc::clone(packet));
            let grouping = filters.grouping(packet, &self.trie);
            let row = rows.entry(grouping_key(&grouping)).or_insert(Row {
                grouping,
                count: 0,
                size: 0,
            });
            row.count += 1;
            row.size += packet.header.size;
        }

        let rows = rows
            .into_values()
            .map(|row| {
                let mut cells = vec![row.count.to_string(), row.size.to_string()];
                cells.extend(fields.iter().map(|f| cell(&row.grouping, f).to_string()));
                cells
            })
            .collect();
        Table {
            headers,
            rows,
            packets,
            params: filters.params(&self.trie),
        }
    }

    /// Lists unfiltered packets newest first. A `limit` of 0 lists all.
    pub fn tabulate_unaggregated(&self, filters: &FilterSet, limit: usize) -> Table {
        let fields = filters.fields(&self.trie);
        let mut headers = vec![ID_COLUMN.to_string(), SIZE_COLUMN.to_string()];
        headers.extend(fields.iter().cloned());

        let limit = if limit == 0 { usize::MAX } else { limit };
        let mut rows = Vec::new();
        let mut packets = BTreeMap::new();
        for packet in self
            .packets
            .iter()
            .rev()
            .filter(|p| !filters.is_filtered(p, &self.trie))
            .take(limit)
        {
            packets.insert(packet.header.id, Arc::clone(packet));
            let mut cells = vec![packet.header.id.to_string(), packet.header.size.to_string()];
            cells.extend(
                fields
                    .iter()
                    .map(|f| packet.value(f).unwrap_or(NULL).to_string()),
            );
            rows.push(cells);
        }
        Table {
            headers,
            rows,
            packets,
            params: filters.params(&self.trie),
        }
    }

    /// Returns normalized field paths, search prefixes first.
    pub fn fields(&self) -> Vec<String> {
        self.trie.paths()
    }
}

/// Looks up a field's value in a row's grouping.
fn cell<'a>(grouping: &'a Grouping, field: &str) -> &'a str {
    if let Some(values) = grouping.get(field) {
        return values.get(field).map(String::as_str).unwrap_or(NULL);
    }
    grouping
        .values()
        .find_map(|values| values.get(field))
        .map(String::as_str)
        .unwrap_or(NULL)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::FilterOp;
    use crate::packet::ROOT;

    fn config() -> ViewConfig {
        ViewConfig::default().with_duration(10_000).with_buckets(10)
    }

    fn store_with(packets: &[(u64, i64, &str)]) -> (PacketStore, FilterSet) {
        let mut store = PacketStore::new(&config());
        let mut filters = FilterSet::new();
        for &(id, ms, foo) in packets {
            let packet = Packet::new(id, ms, 10, [("foo", format!("\"{foo}\""))]);
            store.add_packet(packet, &mut filters);
        }
        (store, filters)
    }

    #[test]
    fn test_bucket() {
        let store = PacketStore::new(&config());
        assert_eq!(store.bucket(0), 0);
        assert_eq!(store.bucket(999), 0);
        assert_eq!(store.bucket(1000), 1000);
        assert_eq!(store.bucket(2500), 2000);
    }

    #[test]
    fn test_render_root_and_grouped() {
        let (store, mut filters) = store_with(&[(0, 0, "bar"), (1, 0, "baz"), (2, 0, "bar")]);
        let datasets = store.render(&filters);
        assert_eq!(
            datasets,
            vec![Dataset {
                label: ROOT.to_string(),
                data: vec![(0, 3)],
            }]
        );

        filters.add_group(store.trie(), "foo").unwrap();
        let datasets = store.render(&filters);
        assert_eq!(datasets.len(), 2);
        assert_eq!(datasets[0].label, r#"{"foo":{"foo":"bar"}}"#);
        assert_eq!(datasets[0].data, vec![(0, 2)]);
        assert_eq!(datasets[1].label, r#"{"foo":{"foo":"baz"}}"#);
        assert_eq!(datasets[1].data, vec![(0, 1)]);
    }

    #[test]
    fn test_trim_unindexes_and_evicts() {
        let mut store = PacketStore::new(&config());
        let mut filters = FilterSet::new();
        store.add_packet(Packet::new(0, 0, 1, [("old", "1")]), &mut filters);
        store.add_packet(Packet::new(1, 500, 1, [("shared", "1")]), &mut filters);
        store.add_packet(Packet::new(2, 2000, 1, [("shared", "2")]), &mut filters);

        assert_eq!(store.trim(1000), 2);
        assert_eq!(store.len(), 1);
        assert!(store.get(0).is_none());
        assert!(store.get(2).is_some());
        assert_eq!(store.fields(), vec!["shared".to_string()]);
        assert_eq!(store.oldest_ms(), Some(2000));
        assert_eq!(store.trim(1000), 0);
    }

    #[test]
    fn test_new_fields_bind_to_existing_items() {
        let mut store = PacketStore::new(&config());
        let mut filters = FilterSet::new();
        filters
            .add_filter(store.trie(), "a.*", FilterOp::Equals.into(), "x")
            .unwrap();
        store.add_packet(Packet::new(0, 0, 1, [("a.b", "\"y\"")]), &mut filters);
        store.add_packet(Packet::new(1, 0, 1, [("a.c", "\"x\"")]), &mut filters);

        let item = filters.item("a.*").unwrap();
        let mut fields: Vec<&str> = item.fields(store.trie()).collect();
        fields.sort();
        assert_eq!(fields, vec!["a.b", "a.c"]);
        assert_eq!(store.render(&filters)[0].data, vec![(0, 1)]);
    }

    #[test]
    fn test_tabulate_aggregate() {
        let (store, mut filters) = store_with(&[(0, 0, "bar"), (1, 0, "baz"), (2, 0, "bar")]);
        let table = store.tabulate_aggregate(&filters);
        assert_eq!(table.headers, vec!["_cnt", "_sz"]);
        assert_eq!(table.rows, vec![vec!["3", "30"]]);
        assert_eq!(table.packets.len(), 3);

        filters.add_group(store.trie(), "foo").unwrap();
        let table = store.tabulate_aggregate(&filters);
        assert_eq!(table.headers, vec!["_cnt", "_sz", "foo"]);
        assert_eq!(
            table.rows,
            vec![vec!["2", "20", "bar"], vec!["1", "10", "baz"]]
        );
        assert_eq!(table.params, vec![("foo".to_string(), vec!["foo".to_string()])]);
    }

    #[test]
    fn test_tabulate_aggregate_pads_ungrouped_columns() {
        let (store, mut filters) = store_with(&[(0, 0, "bar")]);
        filters
            .add_filter(store.trie(), "foo", FilterOp::NotEquals.into(), "zzz")
            .unwrap();
        let table = store.tabulate_aggregate(&filters);
        assert_eq!(table.rows, vec![vec!["1".to_string(), "10".to_string(), NULL.to_string()]]);
    }

    #[test]
    fn test_tabulate_unaggregated_newest_first() {
        let (store, mut filters) = store_with(&[(0, 0, "bar"), (1, 100, "baz"), (2, 200, "bar")]);
        filters
            .add_filter(store.trie(), "foo", FilterOp::Equals.into(), "bar")
            .unwrap();

        let table = store.tabulate_unaggregated(&filters, 0);
        assert_eq!(table.headers, vec!["id", "_sz", "foo"]);
        assert_eq!(
            table.rows,
            vec![vec!["2", "10", "bar"], vec!["0", "10", "bar"]]
        );

        let table = store.tabulate_unaggregated(&filters, 1);
        assert_eq!(table.rows.len(), 1);
        assert!(table.packets.contains_key(&2));
    }

    #[test]
    fn test_duplicate_id_keeps_newest_lookup() {
        let mut store = PacketStore::new(&config());
        let mut filters = FilterSet::new();
        store.add_packet(Packet::new(5, 0, 1, [("a", "1")]), &mut filters);
        store.add_packet(Packet::new(5, 3000, 1, [("a", "2")]), &mut filters);
        assert_eq!(store.get(5).unwrap().value("a"), Some("2"));

        store.trim(1000);
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(5).unwrap().value("a"), Some("2"));
        assert_eq!(store.fields(), vec!["a".to_string()]);

        filters
            .add_filter(store.trie(), "a", FilterOp::Equals.into(), "2")
            .unwrap();
        assert_eq!(store.render(&filters)[0].data, vec![(3000, 1)]);

        store.trim(5000);
        assert!(store.is_empty());
        assert!(store.get(5).is_none());
        assert!(store.fields().is_empty());
    }

    #[test]
    fn test_out_of_order_packet_is_indexed() {
        let mut store = PacketStore::new(&config());
        let mut filters = FilterSet::new();
        store.add_packet(Packet::new(0, 3000, 1, [("early", "1")]), &mut filters);
        store.add_packet(Packet::new(1, 1000, 1, [("late", "\"x\"")]), &mut filters);

        assert_eq!(store.len(), 2);
        assert_eq!(store.fields(), vec!["early".to_string(), "late".to_string()]);
        assert_eq!(store.render(&filters)[0].data, vec![(1000, 1), (3000, 1)]);

        filters.add_group(store.trie(), "late").unwrap();
        let labels: Vec<String> = store.render(&filters).into_iter().map(|d| d.label).collect();
        assert!(labels.contains(&r#"{"late":{"late":"x"}}"#.to_string()));

        // Retirement follows arrival order, so the late packet waits behind the front.
        assert_eq!(store.trim(2000), 0);
        assert_eq!(store.trim(3500), 2);
        assert!(store.fields().is_empty());
    }

    #[test]
    fn test_duplicate_ids_unindex_only_unshared_fields() {
        let mut store = PacketStore::new(&config());
        let mut filters = FilterSet::new();
        store.add_packet(Packet::new(5, 0, 1, [("a", "1"), ("b", "1")]), &mut filters);
        store.add_packet(Packet::new(5, 1000, 1, [("a", "2")]), &mut filters);
        store.add_packet(Packet::new(5, 2000, 1, [("c", "3")]), &mut filters);

        assert_eq!(store.trim(500), 1);
        assert_eq!(store.fields(), vec!["a".to_string(), "c".to_string()]);

        assert_eq!(store.trim(1500), 1);
        assert_eq!(store.fields(), vec!["c".to_string()]);
        assert_eq!(store.get(5).unwrap().value("c"), Some("3"));
    }
}
