//! Session view: live datasets, refresh throttling and the query surface.
//!
//! A [`View`] owns a [`PacketStore`] and a [`FilterSet`]. Packets are added
//! one at a time; each unfiltered packet bumps the trailing bucket of its
//! dataset without touching older packets. Chart updates go to a
//! [`ChartSink`]: partial updates at most once per refresh interval, full
//! updates after every filter or group change.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::config::ViewConfig;
use crate::error::Result;
use crate::filter::{FilterItem, FilterSet, FilterValue, MergeOutcome, Operator, StateTriple};
use crate::flatten::inflate;
use crate::packet::{now_ms, Millis, Packet, PacketId, Payload};
use crate::store::{Dataset, PacketStore, Table};

/// Chart update sent to a [`ChartSink`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartData {
    /// Left edge of the visible window.
    pub start_time: Millis,
    /// Right edge of the visible window.
    pub end_time: Millis,
    /// True if `datasets` carries only the last two points of each series.
    pub is_partial: bool,
    /// `(label, points)` per dataset.
    pub datasets: Vec<(String, Vec<(Millis, u64)>)>,
}

/// Receiver of chart updates.
pub trait ChartSink {
    /// Delivers one update. Delivery is fire-and-forget.
    fn send(&mut self, data: ChartData);
}

impl<F: FnMut(ChartData)> ChartSink for F {
    fn send(&mut self, data: ChartData) {
        self(data)
    }
}

impl ChartSink for Vec<ChartData> {
    fn send(&mut self, data: ChartData) {
        self.push(data);
    }
}

/// A single packet's payload, for detail display.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PacketDetail {
    /// Requested id.
    pub packet_id: PacketId,
    /// Payload, or `None` if the packet is gone.
    pub payload: Option<Payload>,
    /// Search parameter to the fields it covers.
    pub params: Vec<(String, Vec<String>)>,
}

/// Filters, groups and live chart state over one packet stream.
pub struct View<S: ChartSink> {
    config: ViewConfig,
    store: PacketStore,
    filters: FilterSet,
    datasets: Vec<Dataset>,
    current_time: Option<Millis>,
    last_refresh: Millis,
    /// Last raw table, so its rows stay inspectable after a trim.
    table: Option<Table>,
    sink: S,
}

impl<S: ChartSink> View<S> {
    /// Creates an empty view.
    ///
    /// # Errors
    ///
    /// Returns `SquigglyError::InvalidConfig` if the config does not validate.
    pub fn new(config: ViewConfig, sink: S) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            store: PacketStore::new(&config),
            config,
            filters: FilterSet::new(),
            datasets: Vec::new(),
            current_time: None,
            last_refresh: 0,
            table: None,
            sink,
        })
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ViewConfig {
        &self.config
    }

    /// Returns the packet store.
    pub fn store(&self) -> &PacketStore {
        &self.store
    }

    /// Returns the active filters.
    pub fn filters(&self) -> &FilterSet {
        &self.filters
    }

    /// Returns the live datasets.
    pub fn datasets(&self) -> &[Dataset] {
        &self.datasets
    }

    /// Returns the chart sink.
    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Returns the chart sink mutably.
    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    /// Bucket of the newest packet, once one has arrived.
    pub fn current_time(&self) -> Option<Millis> {
        self.current_time
    }

    /// Oldest timestamp kept after a trim at `now`.
    fn cutoff(&self, now: Millis) -> Millis {
        now - self.config.duration - (2.0 * self.config.ms_per_bucket()) as Millis
    }

    /// Adds a packet with wall-clock time as `now`.
    pub fn ingest(&mut self, packet: Packet) {
        self.add_packet(packet, now_ms());
    }

    /// Adds a packet and updates its dataset in place.
    ///
    /// Crossing into a new bucket trims everything older than the retention
    /// window plus two buckets, as does finding the oldest retained packet
    /// past that point.
    pub fn add_packet(&mut self, packet: Packet, now: Millis) {
        let packet = self.store.add_packet(packet, &mut self.filters);
        let bucket = self.store.bucket(packet.header.ms);

        let crossed = match self.current_time.replace(bucket) {
            Some(previous) => previous != bucket,
            None => false,
        };
        let cutoff = self.cutoff(now);
        if crossed || self.store.oldest_ms().is_some_and(|ms| ms < cutoff) {
            self.trim(now);
        }

        let trie = self.store.trie();
        if self.filters.is_filtered(&packet, trie) {
            self.maybe_refresh(now);
            return;
        }

        let label = self.filters.grouping_key(&packet, trie);
        match self.datasets.iter_mut().find(|d| d.label == label) {
            Some(dataset) => match dataset.data.last_mut() {
                Some((x, count)) if *x == bucket => *count += 1,
                _ => dataset.data.push((bucket, 1)),
            },
            None => self.datasets.push(Dataset {
                label,
                data: vec![(bucket, 1)],
            }),
        }
        self.maybe_refresh(now);
    }

    /// Drops dataset points and packets older than the cutoff for `now`.
    pub fn trim(&mut self, now: Millis) {
        let cutoff = self.cutoff(now);
        for dataset in &mut self.datasets {
            let stale = dataset.data.partition_point(|&(x, _)| x < cutoff);
            dataset.data.drain(..stale);
        }
        self.datasets.retain(|d| !d.data.is_empty());
        if self.store.trim(cutoff) > 0 {
            self.filters.retain_live(self.store.trie());
        }
    }

    /// Sends a partial update if the refresh interval has passed.
    pub fn maybe_refresh(&mut self, now: Millis) {
        if now - self.last_refresh > self.config.refresh_interval {
            self.last_refresh = now;
            self.send_chart_data(true);
        }
    }

    /// Sends the datasets to the sink; partial updates carry the last two
    /// points of each series.
    pub fn send_chart_data(&mut self, is_partial: bool) {
        let current = self.current_time.unwrap_or(0);
        let ms_per_bucket = self.config.ms_per_bucket() as Millis;
        let datasets = self
            .datasets
            .iter()
            .map(|d| {
                let start = if is_partial {
                    d.data.len().saturating_sub(2)
                } else {
                    0
                };
                (d.label.clone(), d.data[start..].to_vec())
            })
            .collect();
        self.sink.send(ChartData {
            start_time: current - self.config.duration - ms_per_bucket,
            end_time: current - ms_per_bucket,
            is_partial,
            datasets,
        });
    }

    /// Rebuilds every dataset from the store and sends a full update.
    pub fn reindex(&mut self) {
        self.datasets = self.store.render(&self.filters);
        debug!(
            "Reindexed {} packets into {} datasets",
            self.store.len(),
            self.datasets.len()
        );
        self.send_chart_data(false);
    }

    /// Adds a filter or group toggle and reindexes.
    pub fn add_filter(
        &mut self,
        param: &str,
        op: Operator,
        value: impl Into<FilterValue>,
    ) -> Result<()> {
        self.filters
            .add_filter(self.store.trie(), param, op, value)?;
        self.reindex();
        Ok(())
    }

    /// Removes a filter and reindexes. Returns true if the item was deleted.
    pub fn remove_filter(
        &mut self,
        param: &str,
        op: Operator,
        value: impl Into<FilterValue>,
    ) -> Result<bool> {
        let removed = self.filters.remove_filter(param, op, value)?;
        self.reindex();
        Ok(removed)
    }

    /// Groups by a search parameter and reindexes.
    pub fn add_group(&mut self, param: &str) -> Result<()> {
        self.filters.add_group(self.store.trie(), param)?;
        self.reindex();
        Ok(())
    }

    /// Stops grouping by a search parameter and reindexes.
    pub fn remove_group(&mut self, param: &str) -> bool {
        let removed = self.filters.remove_group(param);
        self.reindex();
        removed
    }

    /// Reconciles filters with an external state list and reindexes.
    pub fn merge_filter_state(&mut self, states: &[StateTriple]) -> Result<MergeOutcome> {
        let outcome = self.filters.merge_from_state(self.store.trie(), states)?;
        self.reindex();
        Ok(outcome)
    }

    /// Applies a new configuration and reindexes.
    ///
    /// # Errors
    ///
    /// Returns `SquigglyError::InvalidConfig` and keeps the old configuration
    /// if `config` does not validate.
    pub fn set_config(&mut self, config: ViewConfig) -> Result<()> {
        config.validate()?;
        self.store.update_config(&config);
        self.config = config;
        self.reindex();
        Ok(())
    }

    /// Returns indexed field paths, search prefixes first.
    pub fn fields(&self) -> Vec<String> {
        self.store.fields()
    }

    /// Returns fields containing every space-separated term, capped at the
    /// configured result count.
    pub fn find_fields(&self, search: &str) -> Vec<String> {
        let terms: Vec<&str> = search.split(' ').collect();
        self.fields()
            .into_iter()
            .filter(|field| terms.iter().all(|t| field.contains(t)))
            .take(self.config.search_results)
            .collect()
    }

    /// Returns the grouped search parameters.
    pub fn groups(&self) -> Vec<String> {
        self.filters
            .groups()
            .into_iter()
            .map(|item| item.search_param().to_string())
            .collect()
    }

    /// Returns each grouped search parameter with the fields it covers.
    pub fn group_mapping(&self) -> BTreeMap<String, Vec<String>> {
        let trie = self.store.trie();
        self.filters
            .groups()
            .into_iter()
            .map(|item| {
                (
                    item.search_param().to_string(),
                    item.fields(trie).map(str::to_string).collect(),
                )
            })
            .collect()
    }

    /// Returns every filter item.
    pub fn filter_items(&self) -> impl Iterator<Item = &FilterItem> {
        self.filters.items()
    }

    /// Returns each search parameter with the fields it covers.
    pub fn params(&self) -> Vec<(String, Vec<String>)> {
        self.filters.params(self.store.trie())
    }

    /// Iterates over the payloads of unfiltered packets, oldest first.
    pub fn filtered_payloads(&self) -> impl Iterator<Item = &Payload> {
        let trie = self.store.trie();
        self.store
            .packets()
            .filter(move |p| !self.filters.is_filtered(p, trie))
            .map(|p| &p.payload)
    }

    /// Returns unfiltered payloads as a JSON array of nested documents.
    pub fn payloads_json(&self) -> Result<String> {
        let documents: Vec<Value> = self.filtered_payloads().map(inflate).collect();
        Ok(serde_json::to_string(&documents)?)
    }

    /// Looks up a packet, falling back to the packets of the last raw table.
    pub fn payload(&self, id: PacketId) -> PacketDetail {
        let packet: Option<&Arc<Packet>> = self.store.get(id).or_else(|| {
            self.table
                .as_ref()
                .and_then(|table| table.packets.get(&id))
        });
        PacketDetail {
            packet_id: id,
            payload: packet.map(|p| p.payload.clone()),
            params: self.params(),
        }
    }

    /// Returns the pivot table of unfiltered packets.
    pub fn aggregate_table(&self) -> Table {
        self.store.tabulate_aggregate(&self.filters)
    }

    /// Returns the newest unfiltered packets, `limit` 0 meaning all.
    ///
    /// The table's packets are kept until the next call so that
    /// [`View::payload`] can still resolve its rows.
    pub fn packet_table(&mut self, limit: usize) -> Table {
        let table = self.store.tabulate_unaggregated(&self.filters, limit);
        self.table = Some(table.clone());
        table
    }
}
