use std::slice;
use std::time::{Duration, Instant};

/// Timestamps observed for one connection used by a request.
///
/// Phases that never happened (DNS for an IP literal, connect for a reused
/// connection) stay `None` and report a zero duration.
#[derive(Debug, Clone)]
pub struct TraceRecord {
    address: String,
    start: Instant,
    pub(crate) dns_start: Option<Instant>,
    pub(crate) dns_end: Option<Instant>,
    pub(crate) connect_start: Option<Instant>,
    pub(crate) connect_end: Option<Instant>,
    pub(crate) request_written: Option<Instant>,
    pub(crate) first_byte_received: Option<Instant>,
}

/// Frozen durations derived from a [`TraceRecord`] at one instant.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    pub dns: Duration,
    pub connect: Duration,
    pub wait: Duration,
    pub response: Duration,
    pub download: Duration,
    pub total: Duration,
}

fn span(from: Option<Instant>, to: Option<Instant>) -> Duration {
    match (from, to) {
        (Some(from), Some(to)) => to.saturating_duration_since(from),
        _ => Duration::ZERO,
    }
}

impl TraceRecord {
    pub(crate) fn new(address: impl Into<String>, start: Instant) -> Self {
        Self {
            address: address.into(),
            start,
            dns_start: None,
            dns_end: None,
            connect_start: None,
            connect_end: None,
            request_written: None,
            first_byte_received: None,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn start(&self) -> Instant {
        self.start
    }

    pub fn request_written(&self) -> Option<Instant> {
        self.request_written
    }

    pub fn first_byte_received(&self) -> Option<Instant> {
        self.first_byte_received
    }

    pub fn dns_time(&self) -> Duration {
        span(self.dns_start, self.dns_end)
    }

    pub fn connect_time(&self) -> Duration {
        span(self.connect_start, self.connect_end)
    }

    /// Time between the request being fully written and the first response byte.
    pub fn wait_time(&self) -> Duration {
        span(self.request_written, self.first_byte_received)
    }

    pub fn response_time(&self, now: Instant) -> Duration {
        span(self.request_written, Some(now))
    }

    pub fn download_time(&self, now: Instant) -> Duration {
        span(self.first_byte_received, Some(now))
    }

    pub fn total_time(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.start)
    }

    pub fn snapshot_at(&self, now: Instant) -> Stats {
        Stats {
            dns: self.dns_time(),
            connect: self.connect_time(),
            wait: self.wait_time(),
            response: self.response_time(now),
            download: self.download_time(now),
            total: self.total_time(now),
        }
    }

    pub fn snapshot(&self) -> Stats {
        self.snapshot_at(Instant::now())
    }
}

/// Records collected for one logical request, one per connection, in the
/// order the connections were acquired.
#[derive(Debug, Default, Clone)]
pub struct TraceSet {
    records: Vec<TraceRecord>,
}

impl TraceSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&TraceRecord> {
        self.records.get(index)
    }

    pub fn last(&self) -> Option<&TraceRecord> {
        self.records.last()
    }

    pub fn iter(&self) -> slice::Iter<'_, TraceRecord> {
        self.records.iter()
    }

    pub(crate) fn push(&mut self, record: TraceRecord) -> usize {
        self.records.push(record);
        self.records.len() - 1
    }

    pub(crate) fn get_mut(&mut self, index: usize) -> Option<&mut TraceRecord> {
        self.records.get_mut(index)
    }
}

impl<'a> IntoIterator for &'a TraceSet {
    type Item = &'a TraceRecord;
    type IntoIter = slice::Iter<'a, TraceRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl IntoIterator for TraceSet {
    type Item = TraceRecord;
    type IntoIter = std::vec::IntoIter<TraceRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.into_iter()
    }
}
