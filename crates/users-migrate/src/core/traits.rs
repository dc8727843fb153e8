//! Store traits the pipeline is written against.
//!
//! - [`SourceStore`]: paginated, read-only access keyed by an opaque cursor
//! - [`DestinationStore`]: bulk upsert keyed by a unique identity field
//!
//! Drivers in [`crate::drivers`] implement these for PostgreSQL, NDJSON
//! files, JSON snapshot files and in-memory stores. The pipeline only ever
//! sees `Arc<dyn SourceStore>` / `Arc<dyn DestinationStore>`.

use async_trait::async_trait;

use crate::error::Result;

use super::outcome::UpsertOutcome;
use super::record::{Cursor, NormalizedRecord, RawRecord};

/// Read documents from a source store.
#[async_trait]
pub trait SourceStore: Send + Sync {
    /// Fetch up to `limit` records positioned strictly after `after`.
    ///
    /// `None` starts from the beginning of the collection. Records come back
    /// in position order; an empty vector means nothing is left.
    async fn fetch_after(&self, after: Option<&Cursor>, limit: usize) -> Result<Vec<RawRecord>>;

    /// Advisory total number of documents, if the store can tell cheaply.
    ///
    /// Taken once before pagination starts; the collection may change
    /// afterwards.
    async fn count(&self) -> Result<Option<u64>>;

    /// Verify the store is reachable.
    async fn test_connection(&self) -> Result<()>;

    /// Store type identifier (e.g., "postgres", "ndjson").
    fn store_type(&self) -> &str;
}

/// Write normalized records to a destination store.
#[async_trait]
pub trait DestinationStore: Send + Sync {
    /// Upsert a batch as a single unordered bulk operation.
    ///
    /// Each record is matched by its identity key and fully replaced, or
    /// inserted when absent. A rejected record must not stop the others;
    /// rejections are reported in the returned outcome. `Err` means the bulk
    /// call as a whole failed and nothing can be said about individual
    /// records.
    async fn upsert_batch(&self, batch: &[NormalizedRecord]) -> Result<UpsertOutcome>;

    /// Number of records currently stored.
    async fn count(&self) -> Result<u64>;

    /// Verify the store is reachable.
    async fn test_connection(&self) -> Result<()>;

    /// Store type identifier (e.g., "postgres", "json").
    fn store_type(&self) -> &str;
}
