//! The batched migration pipeline.
//!
//! - [`CursorPaginator`]: fetches pages from the source with an opaque cursor
//! - [`BatchAccumulator`]: groups normalized records into batches and flushes
//! - [`BulkUpsertWriter`]: writes one batch as one bulk upsert
//! - [`ProgressTracker`]: counts processed records for display sinks
//! - [`MigrationJob`]: drives the loop over a [`JobContext`]
//!
//! Data moves one way: paginator, normalizer, accumulator, writer. The
//! tracker observes counts where the accumulator hands batches to the
//! writer. Pages are fetched strictly one after another.

mod accumulator;
mod job;
mod paginator;
mod progress;
mod writer;

pub use accumulator::BatchAccumulator;
pub use job::{Checkpointer, JobContext, JobPhase, MigrationCounters, MigrationJob, NoCheckpoint};
pub use paginator::{CursorPaginator, Page};
pub use progress::{JsonLinesSink, LogSink, ProgressReport, ProgressSink, ProgressTracker};
pub use writer::BulkUpsertWriter;
