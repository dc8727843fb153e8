//! The migration job: context, counters and the page loop.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::accumulator::BatchAccumulator;
use super::paginator::CursorPaginator;
use super::progress::ProgressTracker;
use super::writer::BulkUpsertWriter;
use crate::config::{FlushPolicy, MigrationConfig};
use crate::core::{Cursor, DestinationStore, SourceStore, UpsertOutcome};
use crate::error::{MigrateError, Result};
use crate::normalize::Normalizer;

/// Where the job currently is.
///
/// ```text
/// Init -> FetchingPage -> Normalizing -> Accumulating -> Flushing
///           ^                                               |
///           +------------------ (not last page) ------------+
/// ```
///
/// The loop ends in `Done`, `Aborted` (source failure) or `Cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobPhase {
    Init,
    FetchingPage,
    Normalizing,
    Accumulating,
    Flushing,
    Done,
    Aborted,
    Cancelled,
}

impl JobPhase {
    /// Whether the job has stopped.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobPhase::Done | JobPhase::Aborted | JobPhase::Cancelled)
    }
}

/// Per-run counters.
///
/// Every record that reaches a final state lands in exactly one of
/// `inserted`, `updated`, `write_failed` or `validation_failed`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationCounters {
    pub pages_fetched: u64,
    pub records_read: u64,
    pub inserted: u64,
    pub updated: u64,
    pub validation_failed: u64,
    pub write_failed: u64,
    pub batches_written: u64,
    pub batches_failed: u64,
}

impl MigrationCounters {
    /// Fold a flush outcome into the counters.
    pub fn record_outcome(&mut self, outcome: &UpsertOutcome) {
        self.inserted += outcome.inserted;
        self.updated += outcome.updated;
        self.write_failed += outcome.failed;
        self.batches_written += 1;
        if outcome.is_batch_failure() {
            self.batches_failed += 1;
        }
    }

    /// Records that reached a final state.
    pub fn processed(&self) -> u64 {
        self.inserted + self.updated + self.write_failed + self.validation_failed
    }

    /// Records that did not make it into the destination.
    pub fn failed(&self) -> u64 {
        self.write_failed + self.validation_failed
    }
}

/// Mutable state of one run, handed explicitly to each stage.
pub struct JobContext {
    pub run_id: String,
    pub phase: JobPhase,
    pub counters: MigrationCounters,
    pub progress: ProgressTracker,
    /// Cursor of the last page whose records were all flushed.
    pub last_committed_cursor: Option<Cursor>,
}

impl JobContext {
    /// Context for a fresh run.
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            phase: JobPhase::Init,
            counters: MigrationCounters::default(),
            progress: ProgressTracker::new(),
            last_committed_cursor: None,
        }
    }

    /// Context continuing an earlier run from its last checkpoint.
    pub fn resumed(
        run_id: impl Into<String>,
        counters: MigrationCounters,
        cursor: Option<Cursor>,
    ) -> Self {
        let processed = counters.processed();
        Self {
            run_id: run_id.into(),
            phase: JobPhase::Init,
            counters,
            progress: ProgressTracker::new().starting_at(processed),
            last_committed_cursor: cursor,
        }
    }

    /// Replace the progress tracker, keeping the processed count.
    pub fn with_progress(mut self, progress: ProgressTracker) -> Self {
        self.progress = progress.starting_at(self.progress.processed());
        self
    }
}

/// Persists the committed cursor and counters between pages.
pub trait Checkpointer: Send {
    /// Record the context's committed position.
    fn checkpoint(&mut self, ctx: &JobContext) -> Result<()>;
}

/// Checkpointer that keeps nothing.
#[derive(Debug, Default)]
pub struct NoCheckpoint;

impl Checkpointer for NoCheckpoint {
    fn checkpoint(&mut self, _ctx: &JobContext) -> Result<()> {
        Ok(())
    }
}

/// Drives the pipeline from the first page to the last.
pub struct MigrationJob {
    paginator: CursorPaginator,
    normalizer: Normalizer,
    accumulator: BatchAccumulator,
    page_size: usize,
    flush_policy: FlushPolicy,
    cancel: CancellationToken,
}

impl MigrationJob {
    /// Assemble a job from its stores and settings.
    pub fn new(
        source: Arc<dyn SourceStore>,
        destination: Arc<dyn DestinationStore>,
        normalizer: Normalizer,
        config: &MigrationConfig,
    ) -> Self {
        Self {
            paginator: CursorPaginator::new(source),
            normalizer,
            accumulator: BatchAccumulator::new(
                config.batch_size,
                BulkUpsertWriter::new(destination),
            ),
            page_size: config.page_size,
            flush_policy: config.flush_policy,
            cancel: CancellationToken::new(),
        }
    }

    /// Observe `cancel` between pages.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Run until the source is exhausted, the source fails, or the job is
    /// cancelled.
    ///
    /// Starts after `ctx.last_committed_cursor`. Per-record and per-batch
    /// failures are counted in `ctx` and never end the run. A source
    /// failure returns the error with `ctx.phase == Aborted`; cancellation
    /// returns [`MigrateError::Cancelled`] after flushing what is pending.
    pub async fn run(
        &mut self,
        ctx: &mut JobContext,
        checkpointer: &mut dyn Checkpointer,
    ) -> Result<()> {
        ctx.phase = JobPhase::Init;
        ctx.progress.set_total(self.paginator.total().await);
        let mut cursor = ctx.last_committed_cursor.clone();

        if let Some(c) = &cursor {
            info!("Resuming after cursor {}", c);
        }

        loop {
            if self.cancel.is_cancelled() {
                return self.stop_cancelled(ctx, checkpointer, cursor).await;
            }

            ctx.phase = JobPhase::FetchingPage;
            let page = match self.paginator.fetch_page(cursor.as_ref(), self.page_size).await {
                Ok(page) => page,
                Err(e) => {
                    ctx.phase = JobPhase::Aborted;
                    error!("Aborting migration: {}", e);
                    return Err(e);
                }
            };
            ctx.counters.pages_fetched += 1;
            ctx.counters.records_read += page.records.len() as u64;
            debug!(
                "Page {}: {} records",
                ctx.counters.pages_fetched,
                page.records.len()
            );

            ctx.phase = JobPhase::Normalizing;
            let normalized = self.normalizer.normalize_all(page.records).await;

            ctx.phase = JobPhase::Accumulating;
            for item in normalized {
                self.accumulator.push(item, ctx).await;
            }
            if page.is_last || self.flush_policy == FlushPolicy::PageBoundary {
                self.accumulator.flush(ctx).await;
            }

            cursor = page.next_cursor;
            if self.accumulator.pending() == 0 {
                ctx.last_committed_cursor = cursor.clone();
                save_checkpoint(checkpointer, ctx);
            }

            if page.is_last {
                break;
            }
        }

        ctx.phase = JobPhase::Done;
        info!(
            "Migration done: {} processed, {} inserted, {} updated, {} failed",
            ctx.progress.processed(),
            ctx.counters.inserted,
            ctx.counters.updated,
            ctx.counters.failed()
        );
        Ok(())
    }

    async fn stop_cancelled(
        &mut self,
        ctx: &mut JobContext,
        checkpointer: &mut dyn Checkpointer,
        cursor: Option<Cursor>,
    ) -> Result<()> {
        warn!("Cancellation requested, stopping at page boundary");
        if self.accumulator.flush(ctx).await.is_some() {
            ctx.last_committed_cursor = cursor;
        }
        save_checkpoint(checkpointer, ctx);
        ctx.phase = JobPhase::Cancelled;
        Err(MigrateError::Cancelled)
    }
}

fn save_checkpoint(checkpointer: &mut dyn Checkpointer, ctx: &JobContext) {
    if let Err(e) = checkpointer.checkpoint(ctx) {
        warn!("Failed to save checkpoint: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::{MemoryDestination, MemorySource};
    use crate::normalize::BcryptHasher;
    use serde_json::json;

    fn source(n: usize) -> Arc<MemorySource> {
        Arc::new(MemorySource::from_documents((0..n).map(|i| {
            (
                format!("doc-{:04}", i),
                json!({"email": format!("user{}@example.com", i), "password": "pw", "name": "U"}),
            )
        })))
    }

    fn normalizer() -> Normalizer {
        Normalizer::new(Arc::new(BcryptHasher::derived(4, "k")), "UNKNOWN").with_concurrency(4)
    }

    fn config(policy: FlushPolicy) -> MigrationConfig {
        MigrationConfig {
            page_size: 50,
            batch_size: 20,
            flush_policy: policy,
            ..Default::default()
        }
    }

    #[derive(Default)]
    struct Recorded(Vec<Option<Cursor>>);

    impl Checkpointer for Recorded {
        fn checkpoint(&mut self, ctx: &JobContext) -> Result<()> {
            self.0.push(ctx.last_committed_cursor.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_page_boundary_policy_flushes_each_page() {
        let dest = Arc::new(MemoryDestination::new());
        let mut job = MigrationJob::new(
            source(120),
            dest.clone(),
            normalizer(),
            &config(FlushPolicy::PageBoundary),
        );
        let mut ctx = JobContext::new("run");
        let mut checkpoints = Recorded::default();

        job.run(&mut ctx, &mut checkpoints).await.unwrap();

        assert_eq!(ctx.phase, JobPhase::Done);
        assert_eq!(dest.batch_sizes().await, vec![20, 20, 10, 20, 20, 10, 20]);
        assert_eq!(ctx.progress.processed(), 120);
        assert_eq!(ctx.counters.pages_fetched, 3);
        assert_eq!(checkpoints.0.len(), 3);
        assert_eq!(checkpoints.0[2], Some(Cursor::new("doc-0119")));
    }

    #[tokio::test]
    async fn test_carry_policy_only_last_batch_short() {
        let dest = Arc::new(MemoryDestination::new());
        let mut job = MigrationJob::new(
            source(125),
            dest.clone(),
            normalizer(),
            &config(FlushPolicy::Carry),
        );
        let mut ctx = JobContext::new("run");
        let mut checkpoints = Recorded::default();

        job.run(&mut ctx, &mut checkpoints).await.unwrap();

        assert_eq!(dest.batch_sizes().await, vec![20, 20, 20, 20, 20, 20, 5]);
        // Page 1 leaves 10 pending, page 2 ends on a full batch, page 3 flushes.
        assert_eq!(
            checkpoints.0,
            vec![Some(Cursor::new("doc-0099")), Some(Cursor::new("doc-0124"))]
        );
    }

    #[tokio::test]
    async fn test_source_failure_aborts() {
        let source = Arc::new(
            MemorySource::from_documents((0..60).map(|i| {
                (format!("doc-{:04}", i), json!({"email": format!("u{}@x.com", i), "password": "p", "name": "n"}))
            }))
            .fail_on_fetch(1),
        );
        let dest = Arc::new(MemoryDestination::new());
        let mut job = MigrationJob::new(source, dest.clone(), normalizer(), &config(FlushPolicy::PageBoundary));
        let mut ctx = JobContext::new("run");

        let err = job.run(&mut ctx, &mut NoCheckpoint).await.unwrap_err();
        assert!(matches!(err, MigrateError::SourceUnavailable(_)));
        assert_eq!(ctx.phase, JobPhase::Aborted);
        assert_eq!(ctx.progress.processed(), 50);
        assert_eq!(ctx.last_committed_cursor, Some(Cursor::new("doc-0049")));
    }

    #[tokio::test]
    async fn test_cancel_before_first_page() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let dest = Arc::new(MemoryDestination::new());
        let mut job = MigrationJob::new(source(10), dest.clone(), normalizer(), &config(FlushPolicy::Carry))
            .with_cancellation(cancel);
        let mut ctx = JobContext::new("run");

        assert!(matches!(
            job.run(&mut ctx, &mut NoCheckpoint).await,
            Err(MigrateError::Cancelled)
        ));
        assert_eq!(ctx.phase, JobPhase::Cancelled);
        assert!(dest.batch_sizes().await.is_empty());
    }

    #[tokio::test]
    async fn test_resume_starts_after_committed_cursor() {
        let src = source(120);
        let dest = Arc::new(MemoryDestination::new());
        let mut job = MigrationJob::new(src.clone(), dest.clone(), normalizer(), &config(FlushPolicy::PageBoundary));
        let counters = MigrationCounters {
            inserted: 100,
            ..Default::default()
        };
        let mut ctx = JobContext::resumed("run", counters, Some(Cursor::new("doc-0099")));

        job.run(&mut ctx, &mut NoCheckpoint).await.unwrap();

        assert_eq!(src.requested_cursors().await, vec![Some(Cursor::new("doc-0099"))]);
        assert_eq!(dest.count().await.unwrap(), 20);
        assert_eq!(ctx.progress.processed(), 120);
    }

    #[test]
    fn test_counters_processed() {
        let mut counters = MigrationCounters::default();
        counters.record_outcome(&UpsertOutcome::from_counts(5, 3, 1, Vec::new()));
        counters.record_outcome(&UpsertOutcome::batch_failed(4, "down"));
        counters.validation_failed = 2;
        assert_eq!(counters.processed(), 11);
        assert_eq!(counters.failed(), 7);
        assert_eq!(counters.batches_failed, 1);
        assert!(JobPhase::Cancelled.is_terminal());
        assert!(!JobPhase::Flushing.is_terminal());
    }
}
