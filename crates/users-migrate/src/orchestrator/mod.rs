//! Migration orchestrator - main workflow coordinator.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::core::{DestinationStore, SourceStore};
use crate::drivers::{open_destination, open_source};
use crate::error::{MigrateError, Result};
use crate::normalize::Normalizer;
use crate::pipeline::{
    JobContext, JsonLinesSink, LogSink, MigrationJob, NoCheckpoint, ProgressTracker,
};
use crate::state::{MigrationState, RunStatus, StateFile};

/// Migration orchestrator.
pub struct Orchestrator {
    config: Config,
    state_file: Option<PathBuf>,
    state: Option<MigrationState>,
    source: Arc<dyn SourceStore>,
    destination: Arc<dyn DestinationStore>,
    progress: bool,
}

/// Result of a migration run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationResult {
    /// Unique run identifier.
    pub run_id: String,

    /// Final status: completed or cancelled.
    pub status: RunStatus,

    /// Total duration in seconds.
    pub duration_seconds: f64,

    /// When the migration started.
    pub started_at: DateTime<Utc>,

    /// When the migration completed.
    pub completed_at: DateTime<Utc>,

    /// Source driver.
    pub source_type: String,

    /// Destination driver.
    pub destination_type: String,

    /// Advisory source total taken before pagination.
    pub total_documents: Option<u64>,

    /// Records that reached a final state.
    pub processed: u64,

    /// Source pages fetched.
    pub pages_fetched: u64,

    /// Records inserted.
    pub inserted: u64,

    /// Records matched by email and replaced.
    pub updated: u64,

    /// Records skipped by validation.
    pub validation_failed: u64,

    /// Records rejected or lost to failed batches.
    pub write_failed: u64,

    /// Bulk writes issued.
    pub batches_written: u64,

    /// Bulk writes that failed as a whole.
    pub batches_failed: u64,

    /// Average throughput (records/second) for this invocation.
    pub records_per_second: f64,
}

/// Result of a connection check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub source_type: String,
    pub source_connected: bool,
    pub source_latency_ms: u64,
    pub source_error: Option<String>,
    pub destination_type: String,
    pub destination_connected: bool,
    pub destination_latency_ms: u64,
    pub destination_error: Option<String>,
    pub healthy: bool,
}

/// Source and destination record counts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CountComparison {
    /// Documents in the source, if the source can count them.
    pub source_count: Option<u64>,
    /// Records in the destination.
    pub destination_count: u64,
    /// Counts are known and equal.
    pub matches: bool,
}

impl Orchestrator {
    /// Create an orchestrator, connecting to the configured stores.
    pub async fn new(config: Config) -> Result<Self> {
        let source = open_source(&config.source).await?;
        let destination = open_destination(&config.destination).await?;
        Ok(Self::with_stores(config, source, destination))
    }

    /// Create an orchestrator over already opened stores.
    pub fn with_stores(
        config: Config,
        source: Arc<dyn SourceStore>,
        destination: Arc<dyn DestinationStore>,
    ) -> Self {
        Self {
            config,
            state_file: None,
            state: None,
            source,
            destination,
            progress: false,
        }
    }

    /// Set the state file path for resume capability.
    pub fn with_state_file(mut self, path: PathBuf) -> Self {
        self.state_file = Some(path);
        self
    }

    /// Print progress updates as JSON lines to stderr.
    pub fn with_progress(mut self, enabled: bool) -> Self {
        self.progress = enabled;
        self
    }

    /// Load existing state for resume.
    pub fn resume(mut self) -> Result<Self> {
        if let Some(ref path) = self.state_file {
            if path.exists() {
                let state = MigrationState::load(path)?;
                state.validate_config(&self.config.hash())?;
                if state.is_completed() {
                    info!("Run {} already completed; re-checking for new documents", state.run_id);
                }
                info!(
                    "Resuming run {} from state file {:?} (cursor: {:?})",
                    state.run_id, path, state.cursor
                );
                self.state = Some(state);
            }
        }
        Ok(self)
    }

    /// Run the migration.
    ///
    /// Returns a summary when the source was exhausted or the run was
    /// cancelled. Source failures and state-file errors are returned as
    /// errors; per-record and per-batch failures only show up in the counts.
    pub async fn run(self, cancel: CancellationToken) -> Result<MigrationResult> {
        let started_at = Utc::now();
        let clock = Instant::now();

        let state = self.state.clone().unwrap_or_else(|| {
            MigrationState::new(uuid::Uuid::new_v4().to_string(), self.config.hash())
        });
        let run_id = state.run_id.clone();

        info!("Starting migration run: {}", run_id);
        info!(
            "Source: {}, destination: {}, page size {}, batch size {}, hash cost {}",
            self.source.store_type(),
            self.destination.store_type(),
            self.config.migration.page_size,
            self.config.migration.batch_size,
            self.config.migration.hash_cost
        );

        let mut ctx = match &self.state {
            Some(previous) => {
                JobContext::resumed(&run_id, previous.counters.clone(), previous.cursor.clone())
            }
            None => JobContext::new(&run_id),
        }
        .with_progress(self.progress_tracker());
        let processed_before = ctx.progress.processed();

        let mut state_file = self.state_file.clone().map(|path| StateFile::new(path, state));
        if let Some(sf) = state_file.as_mut() {
            sf.state_mut().mark_running();
            sf.save()?;
        }

        let normalizer = Normalizer::from_config(&self.config.migration);
        info!("Hashing with concurrency {}", normalizer.concurrency());
        let mut job = MigrationJob::new(
            self.source.clone(),
            self.destination.clone(),
            normalizer,
            &self.config.migration,
        )
        .with_cancellation(cancel);

        let outcome = match state_file.as_mut() {
            Some(sf) => job.run(&mut ctx, sf).await,
            None => job.run(&mut ctx, &mut NoCheckpoint).await,
        };

        let status = match outcome {
            Ok(()) => RunStatus::Completed,
            Err(MigrateError::Cancelled) => RunStatus::Cancelled,
            Err(e) => {
                if e.is_abort() {
                    error!("Migration run {} aborted: {}", run_id, e);
                } else {
                    error!("Migration run {} failed: {}", run_id, e);
                }
                if let Some(sf) = state_file.as_mut() {
                    sf.state_mut().mark_failed(&e.to_string());
                    if let Err(save_err) = sf.save() {
                        warn!("Failed to save state: {}", save_err);
                    }
                }
                return Err(e);
            }
        };

        if let Some(sf) = state_file.as_mut() {
            match status {
                RunStatus::Completed => sf.state_mut().mark_completed(),
                _ => sf.state_mut().mark_cancelled(),
            }
            sf.save()?;
        }

        let completed_at = Utc::now();
        let elapsed = clock.elapsed().as_secs_f64();
        let processed = ctx.progress.processed();
        let records_per_second = if elapsed > 0.0 {
            (processed - processed_before) as f64 / elapsed
        } else {
            0.0
        };

        let counters = &ctx.counters;
        let result = MigrationResult {
            run_id,
            status,
            duration_seconds: elapsed,
            started_at,
            completed_at,
            source_type: self.source.store_type().to_string(),
            destination_type: self.destination.store_type().to_string(),
            total_documents: ctx.progress.report().total,
            processed,
            pages_fetched: counters.pages_fetched,
            inserted: counters.inserted,
            updated: counters.updated,
            validation_failed: counters.validation_failed,
            write_failed: counters.write_failed,
            batches_written: counters.batches_written,
            batches_failed: counters.batches_failed,
            records_per_second,
        };

        info!(
            "Migration {:?}: {} processed ({} inserted, {} updated, {} invalid, {} write failures) in {:.1}s",
            result.status,
            result.processed,
            result.inserted,
            result.updated,
            result.validation_failed,
            result.write_failed,
            result.duration_seconds
        );
        if result.batches_written > 0 && result.batches_failed == result.batches_written {
            warn!("Every batch failed; check the destination");
        }

        Ok(result)
    }

    fn progress_tracker(&self) -> ProgressTracker {
        let tracker = ProgressTracker::new().with_sink(Box::new(LogSink));
        if self.progress {
            tracker.with_sink(Box::new(JsonLinesSink::stderr()))
        } else {
            tracker
        }
    }

    /// Test both store connections.
    pub async fn health_check(&self) -> Result<HealthCheckResult> {
        let start = Instant::now();
        let source_result = self.source.test_connection().await;
        let source_latency_ms = start.elapsed().as_millis() as u64;

        let start = Instant::now();
        let destination_result = self.destination.test_connection().await;
        let destination_latency_ms = start.elapsed().as_millis() as u64;

        let result = HealthCheckResult {
            source_type: self.source.store_type().to_string(),
            source_connected: source_result.is_ok(),
            source_latency_ms,
            source_error: source_result.err().map(|e| e.to_string()),
            destination_type: self.destination.store_type().to_string(),
            destination_connected: destination_result.is_ok(),
            destination_latency_ms,
            destination_error: destination_result.err().map(|e| e.to_string()),
            healthy: false,
        };
        Ok(HealthCheckResult {
            healthy: result.source_connected && result.destination_connected,
            ..result
        })
    }

    /// Compare the source document count with the destination record count.
    ///
    /// A mismatch is expected when documents failed validation or share an
    /// email; it is reported, not treated as an error.
    pub async fn validate(&self) -> Result<CountComparison> {
        let source_count = self.source.count().await?;
        let destination_count = self.destination.count().await?;
        let matches = source_count == Some(destination_count);

        match source_count {
            Some(count) if matches => info!("users: {} records (match)", count),
            Some(count) => warn!(
                "users: source={} destination={} (MISMATCH)",
                count, destination_count
            ),
            None => warn!(
                "users: source count unknown, destination={}",
                destination_count
            ),
        }

        Ok(CountComparison {
            source_count,
            destination_count,
            matches,
        })
    }
}

impl MigrationResult {
    /// Convert to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DestinationConfig, MigrationConfig, SourceConfig};
    use crate::drivers::{MemoryDestination, MemorySource};
    use serde_json::json;
    use tempfile::TempDir;

    fn config() -> Config {
        Config {
            source: SourceConfig::Ndjson {
                path: "users.ndjson".into(),
            },
            destination: DestinationConfig::Json {
                path: "users.json".into(),
            },
            migration: MigrationConfig {
                page_size: 10,
                batch_size: 4,
                hash_cost: 4,
                ..Default::default()
            },
        }
    }

    fn source(n: usize) -> Arc<MemorySource> {
        Arc::new(MemorySource::from_documents((0..n).map(|i| {
            (
                format!("doc-{:03}", i),
                json!({"email": format!("u{}@x.com", i), "password": "pw", "name": "U"}),
            )
        })))
    }

    #[tokio::test]
    async fn test_run_produces_summary() {
        let dest = Arc::new(MemoryDestination::new());
        let result = Orchestrator::with_stores(config(), source(25), dest.clone())
            .run(CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.status, RunStatus::Completed);
        assert_eq!(result.processed, 25);
        assert_eq!(result.inserted, 25);
        assert_eq!(result.total_documents, Some(25));
        assert_eq!(result.pages_fetched, 3);
        assert!(result.to_json().unwrap().contains("\"status\": \"completed\""));
    }

    #[tokio::test]
    async fn test_state_file_written_and_resumable() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        let dest = Arc::new(MemoryDestination::new());

        Orchestrator::with_stores(config(), source(25), dest.clone())
            .with_state_file(path.clone())
            .run(CancellationToken::new())
            .await
            .unwrap();

        let state = MigrationState::load(&path).unwrap();
        assert_eq!(state.status, RunStatus::Completed);
        assert_eq!(state.counters.inserted, 25);

        let src = source(25);
        let result = Orchestrator::with_stores(config(), src.clone(), dest)
            .with_state_file(path)
            .resume()
            .unwrap()
            .run(CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.run_id, state.run_id);
        assert_eq!(result.processed, 25);
        assert_eq!(
            src.requested_cursors().await,
            vec![Some(crate::core::Cursor::new("doc-024"))]
        );
    }

    #[tokio::test]
    async fn test_resume_rejects_changed_config() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        let mut state = MigrationState::new("run".into(), "other-hash".into());
        state.save(&path).unwrap();

        let dest = Arc::new(MemoryDestination::new());
        let result = Orchestrator::with_stores(config(), source(1), dest)
            .with_state_file(path)
            .resume();
        assert!(matches!(result, Err(MigrateError::ConfigChanged)));
    }

    #[tokio::test]
    async fn test_source_failure_marks_state_failed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        let src = Arc::new(MemorySource::new().fail_on_fetch(0));

        let dest = Arc::new(MemoryDestination::new());
        let err = Orchestrator::with_stores(config(), src, dest)
            .with_state_file(path.clone())
            .run(CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err.exit_code(), 3);
        let state = MigrationState::load(&path).unwrap();
        assert_eq!(state.status, RunStatus::Failed);
        assert!(state.error.is_some());
    }

    #[tokio::test]
    async fn test_cancelled_run_reports_status() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let dest = Arc::new(MemoryDestination::new());
        let result = Orchestrator::with_stores(config(), source(5), dest)
            .run(cancel)
            .await
            .unwrap();
        assert_eq!(result.status, RunStatus::Cancelled);
        assert_eq!(result.processed, 0);
    }

    #[tokio::test]
    async fn test_health_check_and_validate() {
        let dest = Arc::new(MemoryDestination::new());
        let orchestrator = Orchestrator::with_stores(config(), source(3), dest.clone());

        let health = orchestrator.health_check().await.unwrap();
        assert!(health.healthy);
        assert_eq!(health.source_type, "memory");

        let before = orchestrator.validate().await.unwrap();
        assert!(!before.matches);
        assert_eq!(before.source_count, Some(3));
        assert_eq!(before.destination_count, 0);

        Orchestrator::with_stores(config(), source(3), dest)
            .run(CancellationToken::new())
            .await
            .unwrap();
        assert!(orchestrator.validate().await.unwrap().matches);
    }
}
