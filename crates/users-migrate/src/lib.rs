//! # users-migrate
//!
//! Batched user-account migration from a paginated document store into a
//! relational users table.
//!
//! Documents are read page by page with an opaque cursor, normalized into
//! user records (passwords hashed with bcrypt on a blocking pool), grouped
//! into batches and written with one bulk upsert keyed by email. A failed
//! record or batch is counted and skipped; only a source failure ends the
//! run early.
//!
//! - **Keyset pagination** over PostgreSQL or NDJSON sources
//! - **Idempotent upserts** with deterministic salts, so re-runs converge
//! - **Resume capability** via signed JSON state files
//! - **Progress reporting** to logs or JSON lines
//!
//! ## Example
//!
//! ```rust,no_run
//! use tokio_util::sync::CancellationToken;
//! use users_migrate::{Config, Orchestrator};
//!
//! #[tokio::main]
//! async fn main() -> users_migrate::Result<()> {
//!     let config = Config::load("config.yaml")?.with_auto_tuning();
//!     let orchestrator = Orchestrator::new(config).await?;
//!     let result = orchestrator.run(CancellationToken::new()).await?;
//!     println!("Migrated {} users", result.inserted + result.updated);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod core;
pub mod drivers;
pub mod error;
pub mod normalize;
pub mod orchestrator;
pub mod pipeline;
pub mod state;

// Re-exports for convenient access
pub use config::{
    Config, DestinationConfig, FlushPolicy, MigrationConfig, SaltMode, SourceConfig,
};
pub use crate::core::{
    Batch, Cursor, DestinationStore, NormalizedRecord, RawRecord, SourceStore, UpsertOutcome,
};
pub use error::{MigrateError, Result};
pub use normalize::{BcryptHasher, CredentialHasher, Normalizer};
pub use orchestrator::{CountComparison, HealthCheckResult, MigrationResult, Orchestrator};
pub use pipeline::{MigrationJob, ProgressTracker};
pub use state::{MigrationState, RunStatus};
