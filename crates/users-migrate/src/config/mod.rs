//! Configuration loading and validation.

mod types;
mod validation;

pub use types::*;

use crate::error::Result;
use sha2::{Digest, Sha256};
use std::path::Path;

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }

    /// Compute a SHA256 hash of the configuration for resume validation.
    ///
    /// Only the fields that decide which records land where take part, so
    /// tuning knobs (page size, concurrency) can change between runs.
    pub fn hash(&self) -> String {
        let identity = serde_json::json!({
            "source": self.source,
            "destination": self.destination,
            "hash_cost": self.migration.hash_cost,
            "salt_mode": self.migration.salt_mode,
            "salt_secret": self.migration.salt_secret,
            "unknown_device_id": self.migration.unknown_device_id,
        });
        let mut hasher = Sha256::new();
        hasher.update(identity.to_string().as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

impl PgConnectionConfig {
    /// Build a tokio-postgres configuration.
    pub fn pg_config(&self) -> tokio_postgres::Config {
        let mut pg_config = tokio_postgres::Config::new();
        pg_config.host(&self.host);
        pg_config.port(self.port);
        pg_config.dbname(&self.database);
        pg_config.user(&self.user);
        pg_config.password(&self.password);
        pg_config
    }

    /// `host:port/database`, for logs.
    pub fn display_target(&self) -> String {
        format!("{}:{}/{}", self.host, self.port, self.database)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const YAML: &str = r#"
source:
  type: ndjson
  path: users.ndjson
destination:
  type: postgres
  host: localhost
  database: app
  user: app
  password: secret
  ssl_mode: disable
migration:
  page_size: 200
  batch_size: 20
  salt_secret: pepper
"#;

    #[test]
    fn test_from_yaml_with_defaults() {
        let config = Config::from_yaml(YAML).unwrap();
        assert_eq!(config.migration.page_size, 200);
        assert_eq!(config.migration.batch_size, 20);
        assert_eq!(config.migration.hash_cost, 10);
        assert_eq!(config.migration.unknown_device_id, "UNKNOWN");
        assert_eq!(config.migration.flush_policy, FlushPolicy::PageBoundary);
        assert_eq!(config.migration.salt_mode, SaltMode::Derived);

        match &config.destination {
            DestinationConfig::Postgres {
                connection,
                table,
                create_table,
            } => {
                assert_eq!(connection.port, 5432);
                assert_eq!(connection.schema, "public");
                assert_eq!(table, "users");
                assert!(*create_table);
            }
            other => panic!("unexpected destination: {:?}", other),
        }
    }

    #[test]
    fn test_hash_ignores_tuning_knobs() {
        let a = Config::from_yaml(YAML).unwrap();
        let mut b = a.clone();
        b.migration.page_size = 999;
        b.migration.hash_concurrency = Some(3);
        assert_eq!(a.hash(), b.hash());

        b.migration.salt_secret = "other".into();
        assert_ne!(a.hash(), b.hash());
    }

    #[test]
    fn test_missing_salt_secret_rejected() {
        let yaml = YAML.replace("  salt_secret: pepper\n", "");
        assert!(matches!(
            Config::from_yaml(&yaml),
            Err(crate::error::MigrateError::Config(_))
        ));

        let random = format!("{}  salt_mode: random\n", yaml);
        assert_eq!(
            Config::from_yaml(&random).unwrap().migration.salt_mode,
            SaltMode::Random
        );
    }

    #[test]
    fn test_unknown_source_type_rejected() {
        let yaml = YAML.replace("type: ndjson", "type: firestore");
        assert!(Config::from_yaml(&yaml).is_err());
    }

    #[test]
    fn test_auto_tuning_caps_at_batch_size() {
        let resources = SystemResources {
            total_memory_gb: 16.0,
            cpu_cores: 64,
        };
        let migration = MigrationConfig {
            batch_size: 8,
            ..Default::default()
        }
        .with_auto_tuning(&resources);
        assert_eq!(migration.hash_concurrency, Some(8));
        assert_eq!(migration.get_hash_concurrency(), 8);
    }
}
