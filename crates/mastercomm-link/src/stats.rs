//! Communication statistics and the rolling debug buffer.

use std::collections::{BTreeMap, VecDeque};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use mastercomm_protocol::Printable;
use serde::Serialize;

/// Number of success and timeout timestamps kept.
pub const STATS_HISTORY: usize = 50;

/// Snapshot of link health counters.
///
/// Timestamps are seconds since the Unix epoch.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CommunicationStats {
    pub calls_succeeded: Vec<f64>,
    pub calls_timedout: Vec<f64>,
    pub bytes_written: u64,
    pub bytes_read: u64,
}

#[derive(Debug, Default)]
pub(crate) struct StatsState {
    calls_succeeded: VecDeque<SystemTime>,
    calls_timedout: VecDeque<SystemTime>,
    bytes_written: u64,
    bytes_read: u64,
    last_success: Option<Instant>,
}

impl StatsState {
    pub(crate) fn record_success(&mut self) {
        push_capped(&mut self.calls_succeeded, SystemTime::now());
        self.last_success = Some(Instant::now());
    }

    pub(crate) fn record_timeout(&mut self) {
        push_capped(&mut self.calls_timedout, SystemTime::now());
    }

    pub(crate) fn add_written(&mut self, n: usize) {
        self.bytes_written += n as u64;
    }

    pub(crate) fn add_read(&mut self, n: usize) {
        self.bytes_read += n as u64;
    }

    /// Clears the counters; the last success time is kept.
    pub(crate) fn reset(&mut self) {
        self.calls_succeeded.clear();
        self.calls_timedout.clear();
        self.bytes_written = 0;
        self.bytes_read = 0;
    }

    pub(crate) fn last_success(&self) -> Option<Instant> {
        self.last_success
    }

    pub(crate) fn snapshot(&self) -> CommunicationStats {
        CommunicationStats {
            calls_succeeded: self.calls_succeeded.iter().map(|t| unix_seconds(*t)).collect(),
            calls_timedout: self.calls_timedout.iter().map(|t| unix_seconds(*t)).collect(),
            bytes_written: self.bytes_written,
            bytes_read: self.bytes_read,
        }
    }
}

fn push_capped(log: &mut VecDeque<SystemTime>, at: SystemTime) {
    log.push_back(at);
    while log.len() > STATS_HISTORY {
        log.pop_front();
    }
}

fn unix_seconds(at: SystemTime) -> f64 {
    at.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}

/// Per-action command counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CommandHistograms {
    pub total: BTreeMap<String, u64>,
    pub success: BTreeMap<String, u64>,
    pub timeout: BTreeMap<String, u64>,
}

impl CommandHistograms {
    pub(crate) fn count_total(&mut self, action: &str) {
        *self.total.entry(action.to_string()).or_default() += 1;
    }

    pub(crate) fn count_success(&mut self, action: &str) {
        *self.success.entry(action.to_string()).or_default() += 1;
    }

    pub(crate) fn count_timeout(&mut self, action: &str) {
        *self.timeout.entry(action.to_string()).or_default() += 1;
    }
}

/// One logged read or write.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DebugEntry {
    /// Seconds since the Unix epoch.
    pub timestamp: f64,
    /// Bytes rendered by [`Printable`].
    pub data: String,
}

/// Newest debug entries for both directions.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DebugBuffer {
    pub read: Vec<DebugEntry>,
    pub write: Vec<DebugEntry>,
}

#[derive(Debug)]
struct DebugRecord {
    at: Instant,
    wall: SystemTime,
    data: Bytes,
}

/// Raw traffic log bounded by age, not by entry count.
#[derive(Debug)]
pub(crate) struct DebugLog {
    max_age: Duration,
    read: VecDeque<DebugRecord>,
    write: VecDeque<DebugRecord>,
}

impl DebugLog {
    pub(crate) fn new(max_age: Duration) -> Self {
        Self {
            max_age,
            read: VecDeque::new(),
            write: VecDeque::new(),
        }
    }

    pub(crate) fn record_read(&mut self, data: &[u8]) {
        Self::record(&mut self.read, self.max_age, data);
    }

    pub(crate) fn record_write(&mut self, data: &[u8]) {
        Self::record(&mut self.write, self.max_age, data);
    }

    fn record(log: &mut VecDeque<DebugRecord>, max_age: Duration, data: &[u8]) {
        log.push_back(DebugRecord {
            at: Instant::now(),
            wall: SystemTime::now(),
            data: Bytes::copy_from_slice(data),
        });
        prune(log, max_age);
    }

    /// The newest `amount` entries per direction, oldest first.
    pub(crate) fn snapshot(&mut self, amount: usize) -> DebugBuffer {
        prune(&mut self.read, self.max_age);
        prune(&mut self.write, self.max_age);
        DebugBuffer {
            read: newest(&self.read, amount),
            write: newest(&self.write, amount),
        }
    }
}

fn prune(log: &mut VecDeque<DebugRecord>, max_age: Duration) {
    while log.front().is_some_and(|record| record.at.elapsed() > max_age) {
        log.pop_front();
    }
}

fn newest(log: &VecDeque<DebugRecord>, amount: usize) -> Vec<DebugEntry> {
    log.iter()
        .skip(log.len().saturating_sub(amount))
        .map(|record| DebugEntry {
            timestamp: unix_seconds(record.wall),
            data: Printable(&record.data).to_string(),
        })
        .collect()
}
