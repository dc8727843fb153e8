//! Core abstractions for store-agnostic migration.
//!
//! - [`record`]: raw and normalized record types, cursors and batches
//! - [`outcome`]: the explicit result contract of a bulk upsert
//! - [`traits`]: source and destination store traits
//!
//! Driver modules implement the traits; the pipeline depends only on this
//! module, so it can be exercised end to end against in-memory stores.

pub mod outcome;
pub mod record;
pub mod traits;

pub use outcome::{RecordWriteError, UpsertOutcome};
pub use record::{Batch, Cursor, NormalizedRecord, RawBody, RawField, RawRecord};
pub use traits::{DestinationStore, SourceStore};
