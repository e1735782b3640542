//! Packet data model.
//!
//! A packet is a flattened JSON document: a header carrying id, timestamp and
//! encoded size, and a payload mapping field paths to raw scalar tokens.

use std::collections::BTreeMap;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Identifier assigned to each packet at ingestion.
pub type PacketId = u64;

/// Millisecond timestamp.
pub type Millis = i64;

/// Grouping key used when no group-by is active.
pub const ROOT: &str = "Total";

/// Reserved value meaning "field absent on this packet".
pub const NULL: &str = "\u{2400}";

/// Returns the current wall-clock time in milliseconds.
pub fn now_ms() -> Millis {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as Millis)
        .unwrap_or(0)
}

/// Field path to field value.
pub type Payload = BTreeMap<String, PacketField>;

/// Packet metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacketHeader {
    /// Ingestion id, increasing.
    pub id: PacketId,
    /// Arrival time in milliseconds, non-decreasing.
    pub ms: Millis,
    /// Encoded size in bytes.
    pub size: u64,
}

/// One ingested record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Packet {
    /// Metadata.
    pub header: PacketHeader,
    /// Flattened fields.
    pub payload: Payload,
}

impl Packet {
    /// Creates a packet from a header and a list of `(field, raw token)` pairs.
    pub fn new<I, K, V>(id: PacketId, ms: Millis, size: u64, fields: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: AsRef<str>,
    {
        Self {
            header: PacketHeader { id, ms, size },
            payload: fields
                .into_iter()
                .map(|(k, v)| (k.into(), PacketField::parse(v.as_ref())))
                .collect(),
        }
    }

    /// Returns the decoded value of a field, if present.
    pub fn value(&self, field: &str) -> Option<&str> {
        self.payload.get(field).map(PacketField::value)
    }
}

/// A single payload value.
///
/// The raw token distinguishes JSON string literals (`"bar"`) from other
/// scalars (`3`, `true`, `[1,2]`). The quotes are stripped from `value` and
/// remembered in `is_string`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct PacketField {
    value: String,
    is_string: bool,
}

impl PacketField {
    /// Parses a raw token as produced by [`flatten`](crate::flatten::flatten).
    pub fn parse(raw: &str) -> Self {
        match raw.strip_prefix('"') {
            Some(rest) => Self {
                value: rest.strip_suffix('"').unwrap_or(rest).to_string(),
                is_string: true,
            },
            None => Self {
                value: raw.to_string(),
                is_string: false,
            },
        }
    }

    /// Creates a string-literal field.
    pub fn string(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            is_string: true,
        }
    }

    /// Returns the decoded value used for comparisons and display.
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Returns true if the original token was a JSON string literal.
    pub fn is_string(&self) -> bool {
        self.is_string
    }

    /// Converts the field back to a JSON value.
    ///
    /// Non-string tokens that fail to parse as JSON are returned as strings.
    pub fn to_json(&self) -> Value {
        if self.is_string {
            return Value::String(self.value.clone());
        }
        if self.value == NULL || self.value == "undefined" {
            return Value::Null;
        }
        serde_json::from_str(&self.value).unwrap_or_else(|_| Value::String(self.value.clone()))
    }
}

impl fmt::Display for PacketField {
    /// Writes the canonical raw token.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_string {
            write!(f, "\"{}\"", self.value)
        } else {
            f.write_str(&self.value)
        }
    }
}

impl From<String> for PacketField {
    fn from(raw: String) -> Self {
        Self::parse(&raw)
    }
}

impl From<PacketField> for String {
    fn from(field: PacketField) -> Self {
        field.to_string()
    }
}
