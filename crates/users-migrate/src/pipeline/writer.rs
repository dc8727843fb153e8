//! Bulk upsert of one batch.

use std::sync::Arc;

use tracing::{info, warn};

use crate::core::{DestinationStore, NormalizedRecord, UpsertOutcome};

/// Writes batches to a destination store.
///
/// Never fails: a rejected bulk call becomes an outcome in which every
/// record is counted as failed. There is no retry.
#[derive(Clone)]
pub struct BulkUpsertWriter {
    destination: Arc<dyn DestinationStore>,
}

impl BulkUpsertWriter {
    /// Create a writer for `destination`.
    pub fn new(destination: Arc<dyn DestinationStore>) -> Self {
        Self { destination }
    }

    /// Upsert `batch` as one unordered bulk operation keyed by email.
    pub async fn write_batch(&self, batch: &[NormalizedRecord]) -> UpsertOutcome {
        if batch.is_empty() {
            return UpsertOutcome::default();
        }

        let outcome = match self.destination.upsert_batch(batch).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("Write failed for batch of {}: {}", batch.len(), e);
                return UpsertOutcome::batch_failed(batch.len() as u64, e.to_string());
            }
        };

        for rejected in &outcome.errors {
            warn!("Record {} rejected: {}", rejected.identity_key, rejected.message);
        }
        info!(
            "Batch: {} records, {} inserted, {} updated, {} failed",
            outcome.attempted, outcome.inserted, outcome.updated, outcome.failed
        );
        outcome
    }
}
