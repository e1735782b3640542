//! Turning JSON documents into packets.

use serde_json::Value;
use tracing::warn;

use crate::config::IngestConfig;
use crate::error::Result;
use crate::flatten::flatten_masked;
use crate::packet::{now_ms, Millis, Packet, PacketId};

/// Assigns ids, flattens documents and measures their encoded size.
#[derive(Debug, Clone)]
pub struct PacketBuilder {
    config: IngestConfig,
    next_id: PacketId,
}

impl PacketBuilder {
    /// Creates a builder whose first packet gets id 0.
    pub fn new(config: IngestConfig) -> Self {
        Self { config, next_id: 0 }
    }

    /// Returns the id the next packet will get.
    pub fn next_id(&self) -> PacketId {
        self.next_id
    }

    /// Returns the configuration.
    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    /// Builds a packet stamped with the current wall-clock time.
    pub fn build_now(&mut self, document: &Value) -> Result<Packet> {
        self.build(document, now_ms())
    }

    /// Builds a packet from a document.
    ///
    /// Masked paths are replaced with NULL. The header size is the byte
    /// length of the packet's JSON wire form.
    ///
    /// # Errors
    ///
    /// Returns `SquigglyError::Json` if the packet cannot be encoded.
    pub fn build(&mut self, document: &Value, ms: Millis) -> Result<Packet> {
        let fields = flatten_masked(document, &self.config.json_filters);
        let id = self.next_id;
        self.next_id += 1;

        if fields.len() > self.config.high_field_count_warn {
            warn!(
                "Packet {} has {} fields, more than {}",
                id,
                fields.len(),
                self.config.high_field_count_warn
            );
        }
        for (field, raw) in &fields {
            if raw.len() > self.config.high_field_size_warn {
                warn!(
                    "Packet {} field {:?} is {} bytes, more than {}",
                    id,
                    field,
                    raw.len(),
                    self.config.high_field_size_warn
                );
            }
        }

        let mut packet = Packet::new(id, ms, 0, fields);
        packet.header.size = serde_json::to_vec(&packet)?.len() as u64;
        Ok(packet)
    }
}
