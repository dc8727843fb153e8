//! File-based checkpoint state for resume capability.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::debug;

use crate::core::Cursor;
use crate::drivers::common::snapshot::write_atomic;
use crate::error::{MigrateError, Result};
use crate::pipeline::{Checkpointer, JobContext, MigrationCounters};

type HmacSha256 = Hmac<Sha256>;

/// Migration state for resume capability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationState {
    /// Unique run identifier.
    pub run_id: String,

    /// SHA256 hash of the configuration.
    pub config_hash: String,

    /// When the migration started.
    pub started_at: DateTime<Utc>,

    /// When the state was last written.
    pub updated_at: DateTime<Utc>,

    /// Current run status.
    pub status: RunStatus,

    /// Cursor of the last page whose records were all flushed.
    pub cursor: Option<Cursor>,

    /// Counters at the committed cursor.
    pub counters: MigrationCounters,

    /// When the migration finished (if it did).
    pub completed_at: Option<DateTime<Utc>>,

    /// Abort reason, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// HMAC-SHA256 over the rest of the state, keyed by `config_hash`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hmac: Option<String>,
}

/// Overall run status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl MigrationState {
    /// Create a new migration state.
    pub fn new(run_id: String, config_hash: String) -> Self {
        let now = Utc::now();
        Self {
            run_id,
            config_hash,
            started_at: now,
            updated_at: now,
            status: RunStatus::Running,
            cursor: None,
            counters: MigrationCounters::default(),
            completed_at: None,
            error: None,
            hmac: None,
        }
    }

    fn compute_hmac(&self) -> Result<String> {
        let mut unsigned = self.clone();
        unsigned.hmac = None;
        let content = serde_json::to_string(&unsigned)?;

        let mut mac = HmacSha256::new_from_slice(self.config_hash.as_bytes())
            .map_err(|e| MigrateError::State(format!("Failed to create HMAC: {}", e)))?;
        mac.update(content.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Load state from a file and verify its signature.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let state: Self = serde_json::from_str(&content)?;

        match &state.hmac {
            Some(stored) if *stored == state.compute_hmac()? => Ok(state),
            Some(_) => Err(MigrateError::State(
                "State file integrity check failed: HMAC mismatch".to_string(),
            )),
            None => Err(MigrateError::State(
                "State file has no HMAC signature".to_string(),
            )),
        }
    }

    /// Sign and save state to a file atomically.
    pub fn save<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        self.updated_at = Utc::now();
        self.hmac = Some(self.compute_hmac()?);
        let content = serde_json::to_string_pretty(self)?;
        write_atomic(path.as_ref(), content.as_bytes())
    }

    /// Validate that the config hash matches for resume.
    pub fn validate_config(&self, config_hash: &str) -> Result<()> {
        if self.config_hash != config_hash {
            return Err(MigrateError::ConfigChanged);
        }
        Ok(())
    }

    /// Copy the committed position out of a job context.
    pub fn record_checkpoint(&mut self, ctx: &JobContext) {
        self.cursor = ctx.last_committed_cursor.clone();
        self.counters = ctx.counters.clone();
    }

    /// Whether a previous run already finished.
    pub fn is_completed(&self) -> bool {
        self.status == RunStatus::Completed
    }

    /// Mark the migration as completed.
    pub fn mark_completed(&mut self) {
        self.status = RunStatus::Completed;
        self.completed_at = Some(Utc::now());
        self.error = None;
    }

    /// Mark the migration as failed.
    pub fn mark_failed(&mut self, error: &str) {
        self.status = RunStatus::Failed;
        self.completed_at = Some(Utc::now());
        self.error = Some(error.to_string());
    }

    /// Mark the migration as cancelled.
    pub fn mark_cancelled(&mut self) {
        self.status = RunStatus::Cancelled;
        self.completed_at = Some(Utc::now());
    }

    /// Put an interrupted run back in the running state.
    pub fn mark_running(&mut self) {
        self.status = RunStatus::Running;
        self.completed_at = None;
        self.error = None;
    }
}

/// A state file kept current by the job after every committed page.
pub struct StateFile {
    path: PathBuf,
    state: MigrationState,
}

impl StateFile {
    /// Wrap `state`, persisted at `path`.
    pub fn new(path: PathBuf, state: MigrationState) -> Self {
        Self { path, state }
    }

    /// Mutable access for status changes; call [`StateFile::save`] after.
    pub fn state_mut(&mut self) -> &mut MigrationState {
        &mut self.state
    }

    /// Write the state to disk.
    pub fn save(&mut self) -> Result<()> {
        self.state.save(&self.path)
    }
}

impl Checkpointer for StateFile {
    fn checkpoint(&mut self, ctx: &JobContext) -> Result<()> {
        self.state.record_checkpoint(ctx);
        self.save()?;
        debug!(
            "Checkpoint saved at {:?}",
            self.state.cursor.as_ref().map(Cursor::as_str)
        );
        Ok(())
    }
}
