use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Initial value of the RMS/TTFB low-water fields; any observation replaces it.
pub const LOW_SENTINEL: i64 = i64::MAX;

/// Join host and port, bracketing bare IPv6 addresses.
#[must_use]
pub fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

const DEFAULT_DIAL_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TestKind {
    Latency,
    Stream,
    Request,
}

impl TestKind {
    /// Data-plane endpoint probed by this kind of test.
    #[must_use]
    pub const fn route(self) -> &'static str {
        match self {
            TestKind::Stream => "/bandwidth",
            TestKind::Latency | TestKind::Request => "/latency",
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            TestKind::Latency => "Latency",
            TestKind::Stream => "Stream",
            TestKind::Request => "Request",
        }
    }
}

impl std::fmt::Display for TestKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignalCode {
    Ok,
    Fail,
    Retry,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortKey {
    #[default]
    Rmsh,
    Ttfbh,
}

impl std::str::FromStr for SortKey {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "RMSH" => Ok(SortKey::Rmsh),
            "TTFBH" => Ok(SortKey::Ttfbh),
            _ => Err(ConfigError::InvalidSortKey {
                value: s.to_owned(),
            }),
        }
    }
}

/// One-byte tag preceding every line in a result file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilePrefix {
    DataPoint,
    Error,
}

impl FilePrefix {
    #[must_use]
    pub const fn byte(self) -> u8 {
        match self {
            FilePrefix::DataPoint => b'0',
            FilePrefix::Error => b'1',
        }
    }

    #[must_use]
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            b'0' => Some(FilePrefix::DataPoint),
            b'1' => Some(FilePrefix::Error),
            _ => None,
        }
    }
}

/// Immutable description of one fleet-wide test.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "TestID")]
    pub test_id: String,
    #[serde(rename = "TestKind")]
    pub kind: TestKind,
    #[serde(rename = "Duration")]
    pub duration_secs: u64,
    #[serde(rename = "Concurrency")]
    pub concurrency: usize,
    #[serde(rename = "PayloadBytes")]
    pub payload_bytes: usize,
    #[serde(rename = "BufferBytes")]
    pub buffer_bytes: usize,
    #[serde(rename = "RequestDelay")]
    pub request_delay_ms: u64,
    #[serde(rename = "Port")]
    pub port: u16,
    #[serde(rename = "Hosts")]
    pub hosts: Vec<String>,
    #[serde(rename = "Insecure")]
    pub insecure: bool,
    #[serde(rename = "Save")]
    pub save: bool,
    #[serde(rename = "RestartOnError")]
    pub restart_on_error: bool,
    #[serde(rename = "DialTimeout")]
    pub dial_timeout_secs: u64,

    // Controller only, never sent to agents.
    #[serde(skip)]
    pub file: Option<String>,
    #[serde(skip)]
    pub print_full: bool,
    #[serde(skip)]
    pub print_errors: bool,
    #[serde(skip)]
    pub sort: SortKey,
    #[serde(skip)]
    pub host_filter: Option<String>,
}

impl Config {
    #[must_use]
    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration_secs)
    }

    #[must_use]
    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }

    #[must_use]
    pub fn dial_timeout(&self) -> Duration {
        if self.dial_timeout_secs == 0 {
            Duration::from_secs(DEFAULT_DIAL_TIMEOUT_SECS)
        } else {
            Duration::from_secs(self.dial_timeout_secs)
        }
    }

    /// URL scheme pair for this config: (http-like, ws-like).
    #[must_use]
    pub const fn schemes(&self) -> (&'static str, &'static str) {
        if self.insecure {
            ("http", "ws")
        } else {
            ("https", "wss")
        }
    }
}

/// One immutable measurement record, emitted per peer per sample tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    #[serde(rename = "Created")]
    pub created: DateTime<Utc>,
    #[serde(rename = "Local")]
    pub local: String,
    #[serde(rename = "Remote")]
    pub remote: String,
    #[serde(rename = "TestID")]
    pub test_id: String,
    #[serde(rename = "TestKind")]
    pub kind: TestKind,
    #[serde(rename = "RMSH")]
    pub rms_high: i64,
    #[serde(rename = "RMSL")]
    pub rms_low: i64,
    #[serde(rename = "TTFBH")]
    pub ttfb_high: i64,
    #[serde(rename = "TTFBL")]
    pub ttfb_low: i64,
    #[serde(rename = "TX")]
    pub tx_rate: u64,
    #[serde(rename = "TXTotal")]
    pub tx_total: u64,
    #[serde(rename = "TXCount")]
    pub tx_count: u64,
    #[serde(rename = "ErrCount")]
    pub err_count: u64,
    #[serde(rename = "DroppedPackets")]
    pub dropped_packets: u64,
    #[serde(rename = "MemoryUsedPercent")]
    pub memory_used_percent: u64,
    #[serde(rename = "CPUUsedPercent")]
    pub cpu_used_percent: u64,

    // Controller only.
    #[serde(skip)]
    pub received: Option<DateTime<Utc>>,
}

impl DataPoint {
    /// Hand-written CSV schema; part of the external interface.
    pub const CSV_COLUMNS: [&'static str; 16] = [
        "Created",
        "Local",
        "Remote",
        "TestID",
        "TestKind",
        "RMSH",
        "RMSL",
        "TTFBH",
        "TTFBL",
        "TX",
        "TXTotal",
        "TXCount",
        "ErrCount",
        "DroppedPackets",
        "MemoryUsedPercent",
        "CPUUsedPercent",
    ];

    #[must_use]
    pub fn csv_row(&self) -> [String; 16] {
        [
            self.created.to_rfc3339(),
            self.local.clone(),
            self.remote.clone(),
            self.test_id.clone(),
            self.kind.to_string(),
            self.rms_high.to_string(),
            self.rms_low.to_string(),
            self.ttfb_high.to_string(),
            self.ttfb_low.to_string(),
            self.tx_rate.to_string(),
            self.tx_total.to_string(),
            self.tx_count.to_string(),
            self.err_count.to_string(),
            self.dropped_packets.to_string(),
            self.memory_used_percent.to_string(),
            self.cpu_used_percent.to_string(),
        ]
    }

    /// False when no probe completed during the interval and both RMS fields
    /// still hold their reset values.
    #[must_use]
    pub fn round_trip_observed(&self) -> bool {
        !(self.rms_high == 0 && self.rms_low == LOW_SENTINEL)
    }
}

/// A recorded test error, deduplicated per sample interval by a caller key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TError {
    #[serde(rename = "Created")]
    pub created: DateTime<Utc>,
    #[serde(rename = "Error")]
    pub error: String,
}

/// A persisted test discovered on an agent's disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestInfo {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "Time")]
    pub time: DateTime<Utc>,
}
