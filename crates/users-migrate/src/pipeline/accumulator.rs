//! Batch accumulation and flush control.

use tracing::warn;

use super::job::{JobContext, JobPhase};
use super::writer::BulkUpsertWriter;
use crate::core::{Batch, UpsertOutcome};
use crate::normalize::Normalized;

/// Collects normalized records into batches and flushes them.
///
/// A flush is the unit of failure isolation: whatever the outcome, the
/// batch is cleared afterwards and never retried.
pub struct BatchAccumulator {
    batch_size: usize,
    batch: Batch,
    writer: BulkUpsertWriter,
}

impl BatchAccumulator {
    /// Create an accumulator that flushes every `batch_size` records.
    pub fn new(batch_size: usize, writer: BulkUpsertWriter) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            batch_size,
            batch: Vec::with_capacity(batch_size),
            writer,
        }
    }

    /// Records waiting for the next flush.
    pub fn pending(&self) -> usize {
        self.batch.len()
    }

    /// Add one normalization result.
    ///
    /// Validation failures are counted and dropped. Returns the outcome when
    /// the push filled the batch and triggered a flush.
    pub async fn push(&mut self, item: Normalized, ctx: &mut JobContext) -> Option<UpsertOutcome> {
        match item {
            Ok(record) => {
                self.batch.push(record);
                if self.batch.len() >= self.batch_size {
                    return self.flush(ctx).await;
                }
            }
            Err(failure) => {
                warn!("Skipping record: {}", failure);
                ctx.counters.validation_failed += 1;
                ctx.progress.advance(1);
            }
        }
        None
    }

    /// Write out whatever is pending. Returns `None` when nothing was.
    pub async fn flush(&mut self, ctx: &mut JobContext) -> Option<UpsertOutcome> {
        if self.batch.is_empty() {
            return None;
        }

        let previous = ctx.phase;
        ctx.phase = JobPhase::Flushing;
        let batch = std::mem::replace(&mut self.batch, Vec::with_capacity(self.batch_size));
        let outcome = self.writer.write_batch(&batch).await;

        ctx.counters.record_outcome(&outcome);
        ctx.progress.advance(batch.len() as u64);
        ctx.phase = previous;
        Some(outcome)
    }
}
