use crate::trace::{Stats, TraceSet};
use serde::Serialize;
use std::fmt;
use std::time::{Duration, Instant};

/// Rounds a duration to whole milliseconds, e.g. `34ms`.
pub fn ms(d: Duration) -> String {
    format!("{:.0}ms", d.as_secs_f64() * 1000.0)
}

fn millis(d: Duration) -> f64 {
    d.as_nanos() as f64 / 1_000_000.0
}

/// Timing of one connection in milliseconds, as emitted by `--json`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionTimings {
    pub address: String,
    pub dns_ms: f64,
    pub connect_ms: f64,
    pub wait_ms: f64,
    pub response_ms: f64,
    pub download_ms: f64,
    pub total_ms: f64,
}

impl ConnectionTimings {
    pub fn new(address: &str, stats: &Stats) -> Self {
        Self {
            address: address.to_string(),
            dns_ms: millis(stats.dns),
            connect_ms: millis(stats.connect),
            wait_ms: millis(stats.wait),
            response_ms: millis(stats.response),
            download_ms: millis(stats.download),
            total_ms: millis(stats.total),
        }
    }
}

/// Snapshot of every record in a trace set, all taken at the same instant.
#[derive(Debug, Clone)]
pub struct TimingReport {
    entries: Vec<(String, Stats)>,
}

impl TimingReport {
    pub fn new(traces: &TraceSet, now: Instant) -> Self {
        let entries = traces
            .iter()
            .map(|record| (record.address().to_string(), record.snapshot_at(now)))
            .collect();
        Self { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        let timings: Vec<ConnectionTimings> = self
            .entries
            .iter()
            .map(|(address, stats)| ConnectionTimings::new(address, stats))
            .collect();
        serde_json::to_string_pretty(&timings)
    }
}

impl fmt::Display for TimingReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.entries.is_empty() {
            return writeln!(f, "\nNo connection was acquired.");
        }
        for (i, (address, stats)) in self.entries.iter().enumerate() {
            writeln!(f, "\nConnection #{} to {}:", i + 1, address)?;
            writeln!(f, "  DNS lookup:      {:>8}", ms(stats.dns))?;
            writeln!(f, "  TCP connect:     {:>8}", ms(stats.connect))?;
            writeln!(f, "  Server wait:     {:>8}", ms(stats.wait))?;
            writeln!(f, "  Response:        {:>8}", ms(stats.response))?;
            writeln!(f, "  Download:        {:>8}", ms(stats.download))?;
            writeln!(f, "  Total time:      {:>8}", ms(stats.total))?;
        }
        Ok(())
    }
}
