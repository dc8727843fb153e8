//! Configuration validation.

use super::{Config, DestinationConfig, PgConnectionConfig, SaltMode, SourceConfig};
use crate::error::{MigrateError, Result};

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    match &config.source {
        SourceConfig::Postgres {
            connection,
            table,
            id_column,
            data_column,
        } => {
            validate_connection("source", connection)?;
            require("source.table", table)?;
            require("source.id_column", id_column)?;
            require("source.data_column", data_column)?;
        }
        SourceConfig::Ndjson { path } => {
            if path.as_os_str().is_empty() {
                return Err(MigrateError::Config("source.path is required".into()));
            }
        }
    }

    match &config.destination {
        DestinationConfig::Postgres {
            connection, table, ..
        } => {
            validate_connection("destination", connection)?;
            require("destination.table", table)?;
        }
        DestinationConfig::Json { path } => {
            if path.as_os_str().is_empty() {
                return Err(MigrateError::Config("destination.path is required".into()));
            }
        }
    }

    // Cannot migrate into the table we read from
    if let (
        SourceConfig::Postgres {
            connection: src,
            table: src_table,
            ..
        },
        DestinationConfig::Postgres {
            connection: dst,
            table: dst_table,
            ..
        },
    ) = (&config.source, &config.destination)
    {
        if src.host == dst.host
            && src.port == dst.port
            && src.database == dst.database
            && src.schema == dst.schema
            && src_table == dst_table
        {
            return Err(MigrateError::Config(
                "source and destination cannot be the same table".into(),
            ));
        }
    }

    let migration = &config.migration;
    if migration.page_size == 0 {
        return Err(MigrateError::Config(
            "migration.page_size must be at least 1".into(),
        ));
    }
    if migration.batch_size == 0 {
        return Err(MigrateError::Config(
            "migration.batch_size must be at least 1".into(),
        ));
    }
    if !(4..=31).contains(&migration.hash_cost) {
        return Err(MigrateError::Config(format!(
            "migration.hash_cost must be between 4 and 31, got {}",
            migration.hash_cost
        )));
    }
    if let Some(0) = migration.hash_concurrency {
        return Err(MigrateError::Config(
            "migration.hash_concurrency must be at least 1".into(),
        ));
    }
    require("migration.unknown_device_id", &migration.unknown_device_id)?;
    // An empty key makes the derived salt a public function of the email.
    if migration.salt_mode == SaltMode::Derived && migration.salt_secret.is_empty() {
        return Err(MigrateError::Config(
            "migration.salt_secret is required when salt_mode is derived".into(),
        ));
    }

    Ok(())
}

fn validate_connection(section: &str, conn: &PgConnectionConfig) -> Result<()> {
    require(&format!("{}.host", section), &conn.host)?;
    require(&format!("{}.database", section), &conn.database)?;
    require(&format!("{}.user", section), &conn.user)?;
    if conn.max_connections == 0 {
        return Err(MigrateError::Config(format!(
            "{}.max_connections must be at least 1",
            section
        )));
    }
    crate::drivers::SslMode::parse(&conn.ssl_mode)?;
    Ok(())
}

fn require(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(MigrateError::Config(format!("{} is required", field)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MigrationConfig;
    use std::path::PathBuf;

    fn pg(database: &str) -> PgConnectionConfig {
        PgConnectionConfig {
            host: "localhost".to_string(),
            port: 5432,
            database: database.to_string(),
            user: "postgres".to_string(),
            password: "password".to_string(),
            schema: "public".to_string(),
            ssl_mode: "disable".to_string(),
            max_connections: 2,
        }
    }

    fn valid_config() -> Config {
        Config {
            source: SourceConfig::Postgres {
                connection: pg("legacy"),
                table: "users".to_string(),
                id_column: "id".to_string(),
                data_column: "data".to_string(),
            },
            destination: DestinationConfig::Postgres {
                connection: pg("app"),
                table: "users".to_string(),
                create_table: true,
            },
            migration: MigrationConfig {
                salt_secret: "pepper".to_string(),
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_valid_config() {
        assert!(validate(&valid_config()).is_ok());
    }

    #[test]
    fn test_missing_source_host() {
        let mut config = valid_config();
        if let SourceConfig::Postgres { connection, .. } = &mut config.source {
            connection.host = "".to_string();
        }
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_same_table_rejected() {
        let mut config = valid_config();
        config.destination = DestinationConfig::Postgres {
            connection: pg("legacy"),
            table: "users".to_string(),
            create_table: false,
        };
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_zero_batch_size() {
        let mut config = valid_config();
        config.migration.batch_size = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_hash_cost_bounds() {
        let mut config = valid_config();
        config.migration.hash_cost = 3;
        assert!(validate(&config).is_err());
        config.migration.hash_cost = 4;
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_derived_salt_requires_secret() {
        let mut config = valid_config();
        config.migration.salt_secret = String::new();
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("migration.salt_secret"));

        config.migration.salt_mode = SaltMode::Random;
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_invalid_ssl_mode() {
        let mut config = valid_config();
        if let DestinationConfig::Postgres { connection, .. } = &mut config.destination {
            connection.ssl_mode = "sometimes".to_string();
        }
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_empty_ndjson_path() {
        let mut config = valid_config();
        config.source = SourceConfig::Ndjson {
            path: PathBuf::new(),
        };
        assert!(validate(&config).is_err());
    }
}
