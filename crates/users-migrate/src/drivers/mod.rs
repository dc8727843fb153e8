//! Store driver implementations.
//!
//! - [`postgres`]: PostgreSQL source and destination
//! - [`ndjson`]: newline-delimited JSON export source
//! - [`json_file`]: JSON snapshot destination
//! - [`memory`]: in-process stores
//! - [`common`]: shared utilities (TLS, atomic file writes)
//!
//! [`open_source`] and [`open_destination`] build the configured driver and
//! hand it to the pipeline as a trait object.

pub mod common;
pub mod json_file;
pub mod memory;
pub mod ndjson;
pub mod postgres;

pub use common::{SslMode, TlsBuilder};
pub use json_file::JsonFileDestination;
pub use memory::{MemoryDestination, MemorySource};
pub use ndjson::NdjsonSource;
pub use postgres::{PostgresDestination, PostgresSource};

use std::sync::Arc;

use crate::config::{DestinationConfig, SourceConfig};
use crate::core::{DestinationStore, SourceStore};
use crate::error::Result;

/// Open the configured source store.
pub async fn open_source(config: &SourceConfig) -> Result<Arc<dyn SourceStore>> {
    let source: Arc<dyn SourceStore> = match config {
        SourceConfig::Postgres {
            connection,
            table,
            id_column,
            data_column,
        } => Arc::new(PostgresSource::connect(connection, table, id_column, data_column).await?),
        SourceConfig::Ndjson { path } => Arc::new(NdjsonSource::open(path).await?),
    };
    Ok(source)
}

/// Open the configured destination store.
pub async fn open_destination(config: &DestinationConfig) -> Result<Arc<dyn DestinationStore>> {
    let destination: Arc<dyn DestinationStore> = match config {
        DestinationConfig::Postgres {
            connection,
            table,
            create_table,
        } => Arc::new(PostgresDestination::connect(connection, table, *create_table).await?),
        DestinationConfig::Json { path } => Arc::new(JsonFileDestination::open(path).await?),
    };
    Ok(destination)
}
