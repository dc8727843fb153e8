//! Configuration type definitions with auto-tuning based on system resources.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use sysinfo::System;
use tracing::info;

/// System resource information for auto-tuning.
#[derive(Debug, Clone)]
pub struct SystemResources {
    /// Total RAM in GB.
    pub total_memory_gb: f64,
    /// Number of CPU cores.
    pub cpu_cores: usize,
}

impl SystemResources {
    /// Detect system resources.
    pub fn detect() -> Self {
        let mut sys = System::new_all();
        sys.refresh_all();

        let total_memory_gb = sys.total_memory() as f64 / (1024.0 * 1024.0 * 1024.0);
        let cpu_cores = sys.cpus().len().max(1);

        Self {
            total_memory_gb,
            cpu_cores,
        }
    }

    /// Log detected system resources.
    pub fn log(&self) {
        info!(
            "System resources: {:.1} GB RAM, {} CPU cores",
            self.total_memory_gb, self.cpu_cores
        );
    }
}

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Where user documents are read from.
    pub source: SourceConfig,

    /// Where normalized users are upserted.
    pub destination: DestinationConfig,

    /// Pipeline behavior.
    #[serde(default)]
    pub migration: MigrationConfig,
}

impl Config {
    /// Fill in `hash_concurrency` from the CPU count when it was not set.
    pub fn with_auto_tuning(mut self) -> Self {
        let resources = SystemResources::detect();
        resources.log();
        self.migration = self.migration.with_auto_tuning(&resources);
        self
    }
}

/// PostgreSQL connection settings shared by the source and destination drivers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PgConnectionConfig {
    /// Database host.
    pub host: String,

    /// Database port (default: 5432).
    #[serde(default = "default_pg_port")]
    pub port: u16,

    /// Database name.
    pub database: String,

    /// Username.
    pub user: String,

    /// Password.
    #[serde(default)]
    pub password: String,

    /// Schema holding the table (default: "public").
    #[serde(default = "default_public_schema")]
    pub schema: String,

    /// SSL mode: disable, require, verify-ca, verify-full (default: "require").
    #[serde(default = "default_require")]
    pub ssl_mode: String,

    /// Maximum pooled connections (default: 2).
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

/// Source store configuration, selected by `type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceConfig {
    /// A PostgreSQL table of `(id, document)` rows read with keyset pagination.
    Postgres {
        #[serde(flatten)]
        connection: PgConnectionConfig,

        /// Table holding the documents (default: "users").
        #[serde(default = "default_users_table")]
        table: String,

        /// Text column with the document id, used as cursor (default: "id").
        #[serde(default = "default_id_column")]
        id_column: String,

        /// JSONB column with the document body (default: "data").
        #[serde(default = "default_data_column")]
        data_column: String,
    },

    /// A newline-delimited JSON export, one document per line.
    Ndjson {
        /// Path to the export file.
        path: PathBuf,
    },
}

impl SourceConfig {
    /// Driver name used in logs.
    pub fn type_name(&self) -> &'static str {
        match self {
            SourceConfig::Postgres { .. } => "postgres",
            SourceConfig::Ndjson { .. } => "ndjson",
        }
    }
}

/// Destination store configuration, selected by `type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DestinationConfig {
    /// A PostgreSQL users table keyed by email.
    Postgres {
        #[serde(flatten)]
        connection: PgConnectionConfig,

        /// Users table name (default: "users").
        #[serde(default = "default_users_table")]
        table: String,

        /// Create the table when it does not exist (default: true).
        #[serde(default = "default_true")]
        create_table: bool,
    },

    /// A JSON snapshot file keyed by email.
    Json {
        /// Path to the snapshot file; created on first write.
        path: PathBuf,
    },
}

impl DestinationConfig {
    /// Driver name used in logs.
    pub fn type_name(&self) -> &'static str {
        match self {
            DestinationConfig::Postgres { .. } => "postgres",
            DestinationConfig::Json { .. } => "json",
        }
    }
}

/// How the bcrypt salt is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SaltMode {
    /// Salt derived from HMAC-SHA256(salt_secret, identity key); re-runs
    /// produce identical hashes.
    #[default]
    Derived,
    /// Fresh random salt for every hash.
    Random,
}

/// When partially filled batches are flushed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushPolicy {
    /// Flush the remainder at the end of every source page.
    #[default]
    PageBoundary,
    /// Carry the remainder into the next page; only the final batch may be short.
    Carry,
}

/// Migration behavior configuration.
///
/// `hash_concurrency` is optional to distinguish "not set" (auto-tuned from
/// CPU cores) from an explicit value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// Documents requested per source page (default: 500).
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Records per bulk upsert (default: 50).
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// bcrypt work factor (default: 10).
    #[serde(default = "default_hash_cost")]
    pub hash_cost: u32,

    /// Records hashed in parallel. Auto-tuned from CPU cores if not set;
    /// never more than `batch_size`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash_concurrency: Option<usize>,

    /// Salt strategy (default: derived).
    #[serde(default)]
    pub salt_mode: SaltMode,

    /// Secret keying derived salts. Required when `salt_mode` is derived.
    #[serde(default)]
    pub salt_secret: String,

    /// Flush policy (default: page_boundary).
    #[serde(default)]
    pub flush_policy: FlushPolicy,

    /// Sentinel stored when a document has no device id (default: "UNKNOWN").
    #[serde(default = "default_unknown_device_id")]
    pub unknown_device_id: String,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            batch_size: default_batch_size(),
            hash_cost: default_hash_cost(),
            hash_concurrency: None,
            salt_mode: SaltMode::default(),
            salt_secret: String::new(),
            flush_policy: FlushPolicy::default(),
            unknown_device_id: default_unknown_device_id(),
        }
    }
}

impl MigrationConfig {
    /// Apply auto-tuned defaults for unset fields.
    pub fn with_auto_tuning(mut self, resources: &SystemResources) -> Self {
        if self.hash_concurrency.is_none() {
            let tuned = resources.cpu_cores.clamp(1, self.batch_size.max(1));
            info!("Auto-tuned hash_concurrency: {}", tuned);
            self.hash_concurrency = Some(tuned);
        }
        self
    }

    /// Effective hash concurrency, capped at the batch size.
    pub fn get_hash_concurrency(&self) -> usize {
        self.hash_concurrency
            .unwrap_or(1)
            .clamp(1, self.batch_size.max(1))
    }
}

fn default_pg_port() -> u16 {
    5432
}

fn default_public_schema() -> String {
    "public".to_string()
}

fn default_require() -> String {
    "require".to_string()
}

fn default_max_connections() -> usize {
    2
}

fn default_users_table() -> String {
    "users".to_string()
}

fn default_id_column() -> String {
    "id".to_string()
}

fn default_data_column() -> String {
    "data".to_string()
}

fn default_true() -> bool {
    true
}

fn default_page_size() -> usize {
    500
}

fn default_batch_size() -> usize {
    50
}

fn default_hash_cost() -> u32 {
    10
}

fn default_unknown_device_id() -> String {
    "UNKNOWN".to_string()
}
