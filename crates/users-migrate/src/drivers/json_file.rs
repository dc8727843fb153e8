//! JSON snapshot file destination.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::common::snapshot::write_atomic;
use crate::core::{DestinationStore, NormalizedRecord, UpsertOutcome};
use crate::error::{MigrateError, Result};

/// A user as stored in the snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredUser {
    #[serde(flatten)]
    pub record: NormalizedRecord,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Keeps users in a JSON object keyed by email.
///
/// Meant for small exports and local runs: the whole file is rewritten
/// after every batch, so total I/O grows with the square of the user count.
/// If the rewrite fails, the users the batch touched are rolled back in
/// memory and the batch is reported as failed.
pub struct JsonFileDestination {
    path: PathBuf,
    users: Mutex<BTreeMap<String, StoredUser>>,
}

impl JsonFileDestination {
    /// Open a snapshot, loading existing users if the file exists.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let users = match tokio::fs::read_to_string(&path).await {
            Ok(content) if content.trim().is_empty() => BTreeMap::new(),
            Ok(content) => serde_json::from_str(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                return Err(MigrateError::DestinationUnavailable(format!(
                    "{}: {}",
                    path.display(),
                    e
                )))
            }
        };
        info!(
            "Opened JSON destination {} ({} existing users)",
            path.display(),
            users.len()
        );
        Ok(Self {
            path,
            users: Mutex::new(users),
        })
    }

    /// Read a snapshot file without opening it as a destination.
    pub fn read_snapshot(path: impl AsRef<Path>) -> Result<BTreeMap<String, StoredUser>> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

#[async_trait]
impl DestinationStore for JsonFileDestination {
    async fn upsert_batch(&self, batch: &[NormalizedRecord]) -> Result<UpsertOutcome> {
        let mut users = self.users.lock().await;
        // Prior value of every key the batch touches, for rollback.
        let mut before: HashMap<String, Option<StoredUser>> = HashMap::new();
        let now = Utc::now();

        let (mut inserted, mut updated) = (0u64, 0u64);
        for record in batch {
            before
                .entry(record.email.clone())
                .or_insert_with(|| users.get(&record.email).cloned());
            match users.get_mut(&record.email) {
                Some(existing) => {
                    existing.record = record.clone();
                    existing.updated_at = now;
                    updated += 1;
                }
                None => {
                    users.insert(
                        record.email.clone(),
                        StoredUser {
                            record: record.clone(),
                            created_at: now,
                            updated_at: now,
                        },
                    );
                    inserted += 1;
                }
            }
        }

        let persisted = serde_json::to_vec_pretty(&*users)
            .map_err(MigrateError::from)
            .and_then(|content| write_atomic(&self.path, &content));
        if let Err(e) = persisted {
            for (email, previous) in before {
                match previous {
                    Some(user) => users.insert(email, user),
                    None => users.remove(&email),
                };
            }
            return Err(MigrateError::write(format!(
                "rewriting {}: {}",
                self.path.display(),
                e
            )));
        }
        debug!("Snapshot {} now holds {} users", self.path.display(), users.len());

        Ok(UpsertOutcome::from_counts(
            batch.len() as u64,
            inserted,
            updated,
            Vec::new(),
        ))
    }

    async fn count(&self) -> Result<u64> {
        Ok(self.users.lock().await.len() as u64)
    }

    async fn test_connection(&self) -> Result<()> {
        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        if !tokio::fs::metadata(dir).await?.is_dir() {
            return Err(MigrateError::DestinationUnavailable(format!(
                "{} is not a directory",
                dir.display()
            )));
        }
        Ok(())
    }

    fn store_type(&self) -> &str {
        "json"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn user(email: &str, name: &str) -> NormalizedRecord {
        NormalizedRecord {
            email: email.into(),
            password: "$2b$04$hash".into(),
            name: name.into(),
            device_id: "UNKNOWN".into(),
            fcm_token: None,
            age: Some(30),
            device_type: None,
            gender: None,
            mobile_no: None,
            profile_url: None,
            uid: Some("u".into()),
        }
    }

    #[tokio::test]
    async fn test_insert_then_update() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("users.json");
        let dest = JsonFileDestination::open(&path).await.unwrap();

        let first = dest
            .upsert_batch(&[user("a@x.com", "A"), user("b@x.com", "B")])
            .await
            .unwrap();
        assert_eq!((first.inserted, first.updated, first.failed), (2, 0, 0));

        let second = dest.upsert_batch(&[user("a@x.com", "A2")]).await.unwrap();
        assert_eq!((second.inserted, second.updated), (0, 1));

        let snapshot = JsonFileDestination::read_snapshot(&path).unwrap();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot["a@x.com"].record.name, "A2");
    }

    #[tokio::test]
    async fn test_reopen_keeps_existing_users() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("users.json");
        {
            let dest = JsonFileDestination::open(&path).await.unwrap();
            dest.upsert_batch(&[user("a@x.com", "A")]).await.unwrap();
        }

        let dest = JsonFileDestination::open(&path).await.unwrap();
        assert_eq!(dest.count().await.unwrap(), 1);
        let outcome = dest.upsert_batch(&[user("a@x.com", "A")]).await.unwrap();
        assert_eq!(outcome.updated, 1);
    }

    #[tokio::test]
    async fn test_failed_rewrite_restores_touched_users() {
        let dir = TempDir::new().unwrap();
        let sub = dir.path().join("out");
        std::fs::create_dir(&sub).unwrap();
        let path = sub.join("users.json");
        let dest = JsonFileDestination::open(&path).await.unwrap();
        dest.upsert_batch(&[user("a@x.com", "A")]).await.unwrap();

        std::fs::remove_dir_all(&sub).unwrap();
        assert!(dest
            .upsert_batch(&[user("a@x.com", "A2"), user("b@x.com", "B")])
            .await
            .is_err());

        std::fs::create_dir(&sub).unwrap();
        dest.upsert_batch(&[user("c@x.com", "C")]).await.unwrap();
        let snapshot = JsonFileDestination::read_snapshot(&path).unwrap();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot["a@x.com"].record.name, "A");
        assert!(!snapshot.contains_key("b@x.com"));
    }

    #[tokio::test]
    async fn test_unwritable_path_is_batch_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing-dir").join("users.json");
        let dest = JsonFileDestination::open(&path).await.unwrap();

        assert!(dest.upsert_batch(&[user("a@x.com", "A")]).await.is_err());
        assert_eq!(dest.count().await.unwrap(), 0);
    }
}
