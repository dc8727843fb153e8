//! In-process stores.
//!
//! Used by the test suites and by embedders that already hold the
//! documents in memory. Both stores can be told to fail on a given call so
//! the pipeline's failure handling can be exercised without a database.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::Bound;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::Mutex;

use crate::core::{
    Cursor, DestinationStore, NormalizedRecord, RawRecord, RecordWriteError, SourceStore,
    UpsertOutcome,
};
use crate::error::{MigrateError, Result};

#[derive(Default)]
struct SourceInner {
    documents: BTreeMap<String, Map<String, Value>>,
    fetches: usize,
    requested: Vec<Option<Cursor>>,
}

/// Keyset-paginated documents ordered by id.
#[derive(Default)]
pub struct MemorySource {
    inner: Mutex<SourceInner>,
    fail_fetches: BTreeSet<usize>,
}

impl MemorySource {
    /// Create an empty source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a source from `(id, document)` pairs. Non-object documents are
    /// stored as empty objects.
    pub fn from_documents<I, S>(documents: I) -> Self
    where
        I: IntoIterator<Item = (S, Value)>,
        S: Into<String>,
    {
        let documents = documents
            .into_iter()
            .map(|(id, doc)| {
                let fields = match doc {
                    Value::Object(fields) => fields,
                    _ => Map::new(),
                };
                (id.into(), fields)
            })
            .collect();
        Self {
            inner: Mutex::new(SourceInner {
                documents,
                ..Default::default()
            }),
            fail_fetches: BTreeSet::new(),
        }
    }

    /// Make the `n`-th fetch (0-based) fail as if the store were down.
    pub fn fail_on_fetch(mut self, n: usize) -> Self {
        self.fail_fetches.insert(n);
        self
    }

    /// Add or replace a document.
    pub async fn insert(&self, id: impl Into<String>, document: Map<String, Value>) {
        self.inner.lock().await.documents.insert(id.into(), document);
    }

    /// Remove a document.
    pub async fn remove(&self, id: &str) {
        self.inner.lock().await.documents.remove(id);
    }

    /// Cursors passed to `fetch_after`, in call order.
    pub async fn requested_cursors(&self) -> Vec<Option<Cursor>> {
        self.inner.lock().await.requested.clone()
    }
}

#[async_trait]
impl SourceStore for MemorySource {
    async fn fetch_after(&self, after: Option<&Cursor>, limit: usize) -> Result<Vec<RawRecord>> {
        let mut inner = self.inner.lock().await;
        let call = inner.fetches;
        inner.fetches += 1;
        inner.requested.push(after.cloned());

        if self.fail_fetches.contains(&call) {
            return Err(MigrateError::SourceUnavailable(format!(
                "injected failure on fetch {}",
                call
            )));
        }

        let lower = match after {
            Some(cursor) => Bound::Excluded(cursor.as_str().to_string()),
            None => Bound::Unbounded,
        };
        Ok(inner
            .documents
            .range((lower, Bound::Unbounded))
            .take(limit)
            .map(|(id, fields)| RawRecord::document(id.clone(), Cursor::new(id.clone()), fields.clone()))
            .collect())
    }

    async fn count(&self) -> Result<Option<u64>> {
        Ok(Some(self.inner.lock().await.documents.len() as u64))
    }

    async fn test_connection(&self) -> Result<()> {
        Ok(())
    }

    fn store_type(&self) -> &str {
        "memory"
    }
}

#[derive(Default)]
struct DestinationInner {
    records: BTreeMap<String, NormalizedRecord>,
    calls: usize,
    batch_sizes: Vec<usize>,
}

/// Users keyed by email, with an optional unique `uid` constraint.
#[derive(Default)]
pub struct MemoryDestination {
    inner: Mutex<DestinationInner>,
    unique_uid: bool,
    fail_batches: BTreeSet<usize>,
}

impl MemoryDestination {
    /// Create an empty destination.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject records whose `uid` is already held by another email.
    pub fn with_unique_uid(mut self) -> Self {
        self.unique_uid = true;
        self
    }

    /// Make the `n`-th bulk call (0-based) fail as a whole.
    pub fn fail_on_batch(mut self, n: usize) -> Self {
        self.fail_batches.insert(n);
        self
    }

    /// Stored record for an identity key.
    pub async fn get(&self, email: &str) -> Option<NormalizedRecord> {
        self.inner.lock().await.records.get(email).cloned()
    }

    /// All stored records ordered by identity key.
    pub async fn records(&self) -> Vec<NormalizedRecord> {
        self.inner.lock().await.records.values().cloned().collect()
    }

    /// Size of every bulk call received, in order.
    pub async fn batch_sizes(&self) -> Vec<usize> {
        self.inner.lock().await.batch_sizes.clone()
    }
}

fn uid_taken(
    records: &BTreeMap<String, NormalizedRecord>,
    claimed: &HashMap<String, String>,
    record: &NormalizedRecord,
) -> bool {
    let Some(uid) = &record.uid else {
        return false;
    };
    if let Some(owner) = claimed.get(uid) {
        return *owner != record.email;
    }
    records
        .values()
        .any(|r| r.email != record.email && r.uid.as_ref() == Some(uid))
}

#[async_trait]
impl DestinationStore for MemoryDestination {
    async fn upsert_batch(&self, batch: &[NormalizedRecord]) -> Result<UpsertOutcome> {
        let mut inner = self.inner.lock().await;
        let call = inner.calls;
        inner.calls += 1;
        inner.batch_sizes.push(batch.len());

        if self.fail_batches.contains(&call) {
            return Err(MigrateError::DestinationUnavailable(format!(
                "injected failure on batch {}",
                call
            )));
        }

        let (mut inserted, mut updated) = (0u64, 0u64);
        let mut errors = Vec::new();
        // uid -> email for records written earlier in this batch
        let mut claimed: HashMap<String, String> = HashMap::new();

        for record in batch {
            if self.unique_uid && uid_taken(&inner.records, &claimed, record) {
                errors.push(RecordWriteError {
                    identity_key: record.identity_key().to_string(),
                    message: format!("duplicate uid {:?}", record.uid),
                });
                continue;
            }
            if let Some(uid) = &record.uid {
                claimed.insert(uid.clone(), record.email.clone());
            }
            match inner.records.insert(record.email.clone(), record.clone()) {
                Some(_) => updated += 1,
                None => inserted += 1,
            }
        }

        Ok(UpsertOutcome::from_counts(
            batch.len() as u64,
            inserted,
            updated,
            errors,
        ))
    }

    async fn count(&self) -> Result<u64> {
        Ok(self.inner.lock().await.records.len() as u64)
    }

    async fn test_connection(&self) -> Result<()> {
        Ok(())
    }

    fn store_type(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn user(email: &str, uid: &str) -> NormalizedRecord {
        NormalizedRecord {
            email: email.into(),
            password: "hash".into(),
            name: "N".into(),
            device_id: "UNKNOWN".into(),
            fcm_token: None,
            age: None,
            device_type: None,
            gender: None,
            mobile_no: None,
            profile_url: None,
            uid: Some(uid.into()),
        }
    }

    #[tokio::test]
    async fn test_source_keyset_pages() {
        let source = MemorySource::from_documents(
            ["c", "a", "b"].map(|id| (id, json!({"email": format!("{}@x.com", id)}))),
        );

        let first = source.fetch_after(None, 2).await.unwrap();
        assert_eq!(first.iter().map(|r| r.id.as_str()).collect::<Vec<_>>(), ["a", "b"]);

        let rest = source
            .fetch_after(Some(&first[1].position), 2)
            .await
            .unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].id, "c");
        assert_eq!(
            source.requested_cursors().await,
            vec![None, Some(Cursor::new("b"))]
        );
    }

    #[tokio::test]
    async fn test_source_injected_failure() {
        let source = MemorySource::new().fail_on_fetch(0);
        assert!(matches!(
            source.fetch_after(None, 10).await,
            Err(MigrateError::SourceUnavailable(_))
        ));
        assert!(source.fetch_after(None, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unique_uid_rejects_only_conflicting_record() {
        let dest = MemoryDestination::new().with_unique_uid();
        let outcome = dest
            .upsert_batch(&[user("a@x.com", "u1"), user("b@x.com", "u1"), user("c@x.com", "u3")])
            .await
            .unwrap();

        assert_eq!(outcome.inserted, 2);
        assert_eq!(outcome.failed, 1);
        assert_eq!(outcome.errors[0].identity_key, "b@x.com");
        assert!(dest.get("b@x.com").await.is_none());

        // Re-writing the owner of a uid is an update, not a conflict.
        let again = dest.upsert_batch(&[user("a@x.com", "u1")]).await.unwrap();
        assert_eq!((again.updated, again.failed), (1, 0));
    }

    #[tokio::test]
    async fn test_unique_uid_same_email_twice_in_batch_updates() {
        let dest = MemoryDestination::new().with_unique_uid();
        let mut second = user("a@x.com", "u1");
        second.name = "Second".into();

        let outcome = dest
            .upsert_batch(&[user("a@x.com", "u1"), second])
            .await
            .unwrap();

        assert_eq!((outcome.inserted, outcome.updated, outcome.failed), (1, 1, 0));
        assert_eq!(dest.get("a@x.com").await.unwrap().name, "Second");
    }

    #[tokio::test]
    async fn test_destination_injected_failure() {
        let dest = MemoryDestination::new().fail_on_batch(1);
        dest.upsert_batch(&[user("a@x.com", "u1")]).await.unwrap();
        assert!(dest.upsert_batch(&[user("b@x.com", "u2")]).await.is_err());
        assert_eq!(dest.batch_sizes().await, vec![1, 1]);
        assert_eq!(dest.count().await.unwrap(), 1);
    }
}
