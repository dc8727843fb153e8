//! Progress tracking and display sinks.
//!
//! The tracker only observes: it is advanced by the job driver and pushes a
//! [`ProgressReport`] to each registered [`ProgressSink`]. A sink that fails
//! is logged at debug level and otherwise ignored.

use std::io::Write;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::Result;

/// Cumulative progress at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressReport {
    /// Records that reached a final state (written, rejected or skipped).
    pub processed: u64,
    /// Advisory total taken before pagination started.
    pub total: Option<u64>,
}

impl ProgressReport {
    /// Completion percentage, when the total is known and non-zero.
    pub fn percent(&self) -> Option<f64> {
        match self.total {
            Some(total) if total > 0 => Some(self.processed as f64 * 100.0 / total as f64),
            _ => None,
        }
    }
}

/// Receives progress updates.
pub trait ProgressSink: Send {
    /// Display an update.
    fn update(&mut self, report: &ProgressReport) -> Result<()>;
}

/// Logs progress through `tracing`.
#[derive(Debug, Default)]
pub struct LogSink;

impl ProgressSink for LogSink {
    fn update(&mut self, report: &ProgressReport) -> Result<()> {
        match (report.total, report.percent()) {
            (Some(total), Some(pct)) => {
                info!("Progress: {}/{} ({:.1}%)", report.processed, total, pct)
            }
            _ => info!("Progress: {} processed", report.processed),
        }
        Ok(())
    }
}

/// Writes one JSON object per update, one per line.
pub struct JsonLinesSink<W: Write + Send> {
    out: W,
}

impl<W: Write + Send> JsonLinesSink<W> {
    /// Write updates to `out`.
    pub fn new(out: W) -> Self {
        Self { out }
    }

    /// Give back the writer.
    pub fn into_inner(self) -> W {
        self.out
    }
}

impl JsonLinesSink<std::io::Stderr> {
    /// Write updates to stderr.
    pub fn stderr() -> Self {
        Self::new(std::io::stderr())
    }
}

impl<W: Write + Send> ProgressSink for JsonLinesSink<W> {
    fn update(&mut self, report: &ProgressReport) -> Result<()> {
        serde_json::to_writer(&mut self.out, report)?;
        self.out.write_all(b"\n")?;
        self.out.flush()?;
        Ok(())
    }
}

/// Running count of processed records.
pub struct ProgressTracker {
    processed: u64,
    total: Option<u64>,
    sinks: Vec<Box<dyn ProgressSink>>,
    started: Instant,
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressTracker {
    /// Create a tracker with no sinks.
    pub fn new() -> Self {
        Self {
            processed: 0,
            total: None,
            sinks: Vec::new(),
            started: Instant::now(),
        }
    }

    /// Start from a previously reached count (resume).
    pub fn starting_at(mut self, processed: u64) -> Self {
        self.processed = processed;
        self
    }

    /// Register a display sink.
    pub fn with_sink(mut self, sink: Box<dyn ProgressSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Record the advisory total.
    pub fn set_total(&mut self, total: Option<u64>) {
        self.total = total;
    }

    /// Count `n` more processed records and notify the sinks.
    pub fn advance(&mut self, n: u64) {
        if n == 0 {
            return;
        }
        self.processed += n;
        let report = self.report();
        for sink in &mut self.sinks {
            if let Err(e) = sink.update(&report) {
                debug!("Progress sink failed: {}", e);
            }
        }
    }

    /// Current progress.
    pub fn report(&self) -> ProgressReport {
        ProgressReport {
            processed: self.processed,
            total: self.total,
        }
    }

    /// Records processed so far.
    pub fn processed(&self) -> u64 {
        self.processed
    }

    /// Time since the tracker was created.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Throughput since the tracker was created.
    pub fn records_per_second(&self) -> f64 {
        let secs = self.elapsed().as_secs_f64();
        if secs > 0.0 {
            self.processed as f64 / secs
        } else {
            0.0
        }
    }
}
