//! Record normalization: validation, identity folding, credential hashing.
//!
//! The normalizer turns each [`RawRecord`] into either a [`NormalizedRecord`]
//! or a [`ValidationFailure`]. A failure only ever concerns the one record;
//! the caller counts it and moves on.
//!
//! Validation is cheap and runs inline. Hashing dominates per-record latency,
//! so [`Normalizer::normalize_all`] runs it on the blocking pool with bounded
//! concurrency while keeping a 1:1, order-preserving mapping from input to
//! output.

mod hasher;

pub use hasher::{BcryptHasher, CredentialHasher};

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use thiserror::Error;
use tracing::debug;

use crate::config::{MigrationConfig, SaltMode};
use crate::core::{NormalizedRecord, RawBody, RawField, RawRecord};

const EMAIL: &str = "email";
const PASSWORD: &str = "password";
const NAME: &str = "name";

/// Why a record could not be migrated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationReason {
    #[error("required field '{0}' is missing")]
    Missing(&'static str),

    #[error("required field '{0}' is empty")]
    Empty(&'static str),

    #[error("required field '{0}' is not a string")]
    NotAString(&'static str),

    #[error("document could not be decoded: {0}")]
    MalformedDocument(String),

    #[error("credential hashing failed: {0}")]
    HashFailed(String),
}

/// A per-record defect that prevents migrating that record alone.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("record {record_id}: {reason}")]
pub struct ValidationFailure {
    /// Source document id.
    pub record_id: String,
    /// What was wrong.
    pub reason: ValidationReason,
}

impl ValidationFailure {
    fn new(record_id: &str, reason: ValidationReason) -> Self {
        Self {
            record_id: record_id.to_string(),
            reason,
        }
    }
}

/// Result of normalizing one record.
pub type Normalized = std::result::Result<NormalizedRecord, ValidationFailure>;

/// A validated record still waiting for its credential hash.
struct PendingRecord {
    record_id: String,
    plaintext: String,
    record: NormalizedRecord,
}

/// Validates and transforms raw user documents.
#[derive(Clone)]
pub struct Normalizer {
    hasher: Arc<dyn CredentialHasher>,
    unknown_device_id: Arc<str>,
    concurrency: usize,
}

impl Normalizer {
    /// Create a normalizer hashing with `hasher`, one record at a time.
    pub fn new(hasher: Arc<dyn CredentialHasher>, unknown_device_id: impl Into<String>) -> Self {
        Self {
            hasher,
            unknown_device_id: Arc::from(unknown_device_id.into()),
            concurrency: 1,
        }
    }

    /// Build a bcrypt-backed normalizer from the migration settings.
    pub fn from_config(config: &MigrationConfig) -> Self {
        let hasher = match config.salt_mode {
            SaltMode::Derived => BcryptHasher::derived(config.hash_cost, config.salt_secret.clone()),
            SaltMode::Random => BcryptHasher::new(config.hash_cost),
        };
        Self::new(Arc::new(hasher), config.unknown_device_id.clone())
            .with_concurrency(config.get_hash_concurrency())
    }

    /// Set how many records are hashed in parallel.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Configured hashing parallelism.
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Normalize a single record, hashing on the current thread.
    pub fn normalize(&self, raw: &RawRecord) -> Normalized {
        let pending = self.prepare(raw)?;
        self.finish(pending)
    }

    /// Normalize a group of records, hashing up to `concurrency` at once.
    ///
    /// Output slot `i` always corresponds to input record `i`.
    pub async fn normalize_all(&self, raws: Vec<RawRecord>) -> Vec<Normalized> {
        let limit = self.concurrency.min(raws.len()).max(1);

        stream::iter(raws.into_iter().map(|raw| {
            let this = self.clone();
            async move {
                let pending = this.prepare(&raw)?;
                let record_id = pending.record_id.clone();
                match tokio::task::spawn_blocking(move || this.finish(pending)).await {
                    Ok(result) => result,
                    Err(e) => Err(ValidationFailure::new(
                        &record_id,
                        ValidationReason::HashFailed(format!("hashing task failed: {}", e)),
                    )),
                }
            }
        }))
        .buffered(limit)
        .collect()
        .await
    }

    fn prepare(&self, raw: &RawRecord) -> Result<PendingRecord, ValidationFailure> {
        if let RawBody::Malformed(reason) = &raw.body {
            return Err(ValidationFailure::new(
                &raw.id,
                ValidationReason::MalformedDocument(reason.clone()),
            ));
        }

        let email = required_text(raw, EMAIL)?.to_lowercase();
        let plaintext = required_text(raw, PASSWORD)?.to_string();
        let name = required_text(raw, NAME)?.to_string();

        let device_id = optional_text(raw, "deviceId")
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| self.unknown_device_id.to_string());

        let record = NormalizedRecord {
            email,
            password: String::new(),
            name,
            device_id,
            fcm_token: optional_text(raw, "fcmToken"),
            age: optional_int(raw, "age"),
            device_type: optional_text(raw, "deviceType"),
            gender: optional_text(raw, "gender"),
            mobile_no: optional_int(raw, "mobileNo"),
            profile_url: optional_text(raw, "profileUrl"),
            uid: optional_text(raw, "uid")
                .or_else(|| (!raw.id_generated).then(|| raw.id.clone())),
        };

        Ok(PendingRecord {
            record_id: raw.id.clone(),
            plaintext,
            record,
        })
    }

    fn finish(&self, pending: PendingRecord) -> Normalized {
        let PendingRecord {
            record_id,
            plaintext,
            mut record,
        } = pending;

        record.password = self
            .hasher
            .hash(record.identity_key(), &plaintext)
            .map_err(|e| ValidationFailure::new(&record_id, ValidationReason::HashFailed(e)))?;
        Ok(record)
    }
}

fn required_text<'a>(raw: &'a RawRecord, field: &'static str) -> Result<&'a str, ValidationFailure> {
    match raw.field(field) {
        RawField::Text(s) if !s.is_empty() => Ok(s),
        RawField::Text(_) => Err(ValidationFailure::new(&raw.id, ValidationReason::Empty(field))),
        RawField::Missing | RawField::Null => {
            Err(ValidationFailure::new(&raw.id, ValidationReason::Missing(field)))
        }
        RawField::Number(_) | RawField::Other(_) => {
            Err(ValidationFailure::new(&raw.id, ValidationReason::NotAString(field)))
        }
    }
}

fn optional_text(raw: &RawRecord, field: &str) -> Option<String> {
    match raw.field(field) {
        RawField::Text(s) => Some(s.to_string()),
        RawField::Number(n) => Some(n.to_string()),
        RawField::Other(serde_json::Value::Bool(b)) => Some(b.to_string()),
        RawField::Missing | RawField::Null => None,
        RawField::Other(_) => {
            debug!("record {}: ignoring non-scalar '{}'", raw.id, field);
            None
        }
    }
}

fn optional_int(raw: &RawRecord, field: &str) -> Option<i64> {
    let value = raw.field(field);
    if value.is_absent() {
        return None;
    }
    let parsed = value.as_i64();
    if parsed.is_none() {
        debug!("record {}: ignoring non-integer '{}'", raw.id, field);
    }
    parsed
}
