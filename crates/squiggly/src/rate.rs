//! Packet and byte rates over a sliding sample window.

use std::collections::VecDeque;
use std::fmt;

use serde::Serialize;

use crate::packet::Millis;

/// Default sample window: 3 seconds.
pub const DEFAULT_SAMPLE_WINDOW_MS: Millis = 3_000;

const BYTE_UNITS: [&str; 9] = ["B", "KiB", "MiB", "GiB", "TiB", "PiB", "EiB", "ZiB", "YiB"];

/// Formats a byte count with binary units, trimming trailing zeros.
///
/// `format_bytes(1536.0, 2)` is `"1.5 KiB"`; zero is `"0B"`.
pub fn format_bytes(bytes: f64, decimals: usize) -> String {
    if bytes == 0.0 || !bytes.is_finite() {
        return "0B".to_string();
    }
    let mut value = bytes;
    let mut exponent = 0;
    while value.abs() >= 1024.0 && exponent < BYTE_UNITS.len() - 1 {
        value /= 1024.0;
        exponent += 1;
    }
    let scaled = format!("{:.*}", decimals, value);
    let scaled = if scaled.contains('.') {
        scaled.trim_end_matches('0').trim_end_matches('.')
    } else {
        scaled.as_str()
    };
    format!("{} {}", scaled, BYTE_UNITS[exponent])
}

/// Throughput measured by a [`RateSampler`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Rate {
    /// Packets per second.
    pub packets_per_sec: f64,
    /// Bytes per second.
    pub bytes_per_sec: f64,
}

impl Rate {
    /// Renders the rate as `"12.5 Pps, 1.2 KiBps"`.
    pub fn describe(&self) -> String {
        let bytes = if self.bytes_per_sec == 0.0 {
            "0.0 B".to_string()
        } else {
            format_bytes(self.bytes_per_sec, 2)
        };
        format!("{:.1} Pps, {}ps", self.packets_per_sec, bytes)
    }
}

impl fmt::Display for Rate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

/// Recent `(ms, size)` samples.
#[derive(Debug, Clone)]
pub struct RateSampler {
    window: Millis,
    samples: VecDeque<(Millis, u64)>,
}

impl Default for RateSampler {
    fn default() -> Self {
        Self::new(DEFAULT_SAMPLE_WINDOW_MS)
    }
}

impl RateSampler {
    /// Creates a sampler over the given window.
    pub fn new(window_ms: Millis) -> Self {
        Self {
            window: window_ms,
            samples: VecDeque::new(),
        }
    }

    /// Records one packet.
    pub fn record(&mut self, ms: Millis, size: u64) {
        self.samples.push_back((ms, size));
    }

    /// Number of samples held.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Returns true if no samples are held.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Drops samples older than the window and measures the rest.
    ///
    /// Rates are taken over the span between the first and last sample; a
    /// single sample, or samples sharing one timestamp, are spread over the
    /// whole window.
    pub fn rate(&mut self, now: Millis) -> Rate {
        let oldest = now - self.window;
        while self.samples.front().is_some_and(|&(ms, _)| ms < oldest) {
            self.samples.pop_front();
        }
        let (Some(&(start, _)), Some(&(end, _))) = (self.samples.front(), self.samples.back())
        else {
            return Rate::default();
        };
        let span = if end > start { end - start } else { self.window.max(1) };
        let seconds = span as f64 / 1000.0;
        let bytes: u64 = self.samples.iter().map(|&(_, size)| size).sum();
        Rate {
            packets_per_sec: self.samples.len() as f64 / seconds,
            bytes_per_sec: bytes as f64 / seconds,
        }
    }
}
