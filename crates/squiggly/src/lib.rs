//! Squiggly - field indexing and incremental aggregation for packet streams
//!
//! This crate indexes a stream of flattened JSON "packets" by field path and
//! keeps time-bucketed counts up to date as packets arrive and filters change.
//!
//! # Components
//!
//! - [`TrieRoot`]: arena-backed field path index with `*` / `**` lookup
//! - [`FilterSet`]: filters and group-bys over indexed fields
//! - [`PacketStore`]: retained packets, bucketing and table rendering
//! - [`View`]: live datasets, refresh throttling and the query surface
//! - [`PacketBuilder`]: JSON documents to packets
//!
//! # Example
//!
//! ```rust
//! use serde_json::json;
//! use squiggly::{ChartData, FilterOp, IngestConfig, PacketBuilder, View, ViewConfig};
//!
//! let mut view = View::new(ViewConfig::default(), Vec::<ChartData>::new())?;
//! let mut builder = PacketBuilder::new(IngestConfig::default());
//!
//! for proto in ["tcp", "udp", "tcp"] {
//!     let packet = builder.build(&json!({"net": {"proto": proto}}), 0)?;
//!     view.add_packet(packet, 0);
//! }
//!
//! view.add_group("net.proto")?;
//! assert_eq!(view.datasets().len(), 2);
//!
//! view.add_filter("net.proto", FilterOp::Equals.into(), "udp")?;
//! let table = view.aggregate_table();
//! assert_eq!(table.headers, vec!["_cnt", "_sz", "net.proto"]);
//! assert_eq!(table.rows.len(), 1);
//! assert_eq!(table.rows[0][2], "udp");
//! # Ok::<(), squiggly::SquigglyError>(())
//! ```

#![deny(missing_docs)]

pub mod config;
pub mod error;
pub mod filter;
pub mod flatten;
pub mod ingest;
pub mod packet;
pub mod rate;
pub mod store;
pub mod trie;
pub mod view;

pub use config::{IngestConfig, ViewConfig};
pub use error::{Result, SquigglyError};
pub use filter::{
    Filter, FilterItem, FilterOp, FilterSet, FilterValue, Grouping, MergeOutcome, Operator,
    StateTriple,
};
pub use flatten::{flatten, inflate};
pub use ingest::PacketBuilder;
pub use packet::{Millis, Packet, PacketField, PacketHeader, PacketId, Payload, NULL, ROOT};
pub use rate::{format_bytes, Rate, RateSampler};
pub use store::{Dataset, FieldTrie, PacketStore, Table};
pub use trie::{NodeId, TrieOptions, TrieRoot};
pub use view::{ChartData, ChartSink, PacketDetail, View};
