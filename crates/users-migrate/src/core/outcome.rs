//! Result of a single bulk upsert.

use serde::{Deserialize, Serialize};

/// A record the destination rejected inside an otherwise applied batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordWriteError {
    /// Identity key of the rejected record.
    pub identity_key: String,
    /// Reason reported by the destination.
    pub message: String,
}

/// Per-batch result of a bulk upsert.
///
/// `failed` always equals `attempted - (inserted + updated)`; use the
/// constructors rather than filling the fields by hand.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpsertOutcome {
    /// Records sent to the destination.
    pub attempted: u64,
    /// Records that did not exist and were inserted.
    pub inserted: u64,
    /// Records matched by identity key and replaced.
    pub updated: u64,
    /// Records that were not applied.
    pub failed: u64,
    /// Individual rejections reported by the destination.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<RecordWriteError>,
    /// Set when the whole bulk call failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_error: Option<String>,
}

impl UpsertOutcome {
    /// Build an outcome from destination-reported counts.
    pub fn from_counts(
        attempted: u64,
        inserted: u64,
        updated: u64,
        errors: Vec<RecordWriteError>,
    ) -> Self {
        Self {
            attempted,
            inserted,
            updated,
            failed: attempted.saturating_sub(inserted + updated),
            errors,
            batch_error: None,
        }
    }

    /// Every record of the batch failed because the bulk call itself failed.
    pub fn batch_failed(attempted: u64, error: impl Into<String>) -> Self {
        Self {
            attempted,
            failed: attempted,
            batch_error: Some(error.into()),
            ..Default::default()
        }
    }

    /// Number of records applied (inserted or updated).
    pub fn applied(&self) -> u64 {
        self.inserted + self.updated
    }

    /// Whether the whole bulk call failed.
    pub fn is_batch_failure(&self) -> bool {
        self.batch_error.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_is_derived_from_counts() {
        let outcome = UpsertOutcome::from_counts(
            20,
            12,
            7,
            vec![RecordWriteError {
                identity_key: "dup@example.com".into(),
                message: "duplicate uid".into(),
            }],
        );
        assert_eq!(outcome.failed, 1);
        assert_eq!(outcome.applied(), 19);
        assert!(!outcome.is_batch_failure());
    }

    #[test]
    fn test_batch_failed() {
        let outcome = UpsertOutcome::batch_failed(50, "connection reset");
        assert_eq!(outcome.failed, 50);
        assert_eq!(outcome.applied(), 0);
        assert!(outcome.is_batch_failure());
    }
}
