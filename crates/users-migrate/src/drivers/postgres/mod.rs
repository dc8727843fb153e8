//! PostgreSQL driver.
//!
//! - [`PostgresSource`]: keyset-paginated reads of `(id, document)` rows
//! - [`PostgresDestination`]: per-record upserts into a users table keyed by email
//!
//! Both share pool construction through [`connect_pool`].

mod destination;
mod source;

pub use destination::PostgresDestination;
pub use source::PostgresSource;

use std::time::Duration;

use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use tracing::{info, warn};

use crate::config::PgConnectionConfig;
use crate::drivers::common::TlsBuilder;
use crate::error::{MigrateError, Result};

/// Connection pool timeout.
const POOL_CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Build a pool for `conn` and verify it with a round trip.
///
/// `role` ("source" or "destination") only appears in logs and error context.
pub(crate) async fn connect_pool(conn: &PgConnectionConfig, role: &str) -> Result<Pool> {
    let mut pg_config = conn.pg_config();
    pg_config.keepalives(true);
    pg_config.keepalives_idle(Duration::from_secs(30));
    pg_config.connect_timeout(POOL_CONNECTION_TIMEOUT);

    let mgr_config = ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    };

    let tls = TlsBuilder::parse(&conn.ssl_mode)?;
    let mgr = match tls.build()? {
        Some(connector) => Manager::from_config(pg_config, connector, mgr_config),
        None => {
            warn!(
                "PostgreSQL {} TLS is disabled. Credentials will be transmitted in plaintext.",
                role
            );
            Manager::from_config(pg_config, tokio_postgres::NoTls, mgr_config)
        }
    };

    let pool = Pool::builder(mgr)
        .max_size(conn.max_connections)
        .build()
        .map_err(|e| MigrateError::pool(e, format!("creating PostgreSQL {} pool", role)))?;

    ping(&pool, role).await?;
    info!(
        "Connected to PostgreSQL {}: {} (ssl_mode: {:?})",
        role,
        conn.display_target(),
        tls.ssl_mode()
    );
    Ok(pool)
}

/// Check out a connection and run `SELECT 1`.
pub(crate) async fn ping(pool: &Pool, role: &str) -> Result<()> {
    let client = pool
        .get()
        .await
        .map_err(|e| MigrateError::pool(e, format!("testing PostgreSQL {} connection", role)))?;
    client.simple_query("SELECT 1").await?;
    Ok(())
}

/// Quote a PostgreSQL identifier.
pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Qualify a table name with its schema.
pub(crate) fn qualify_table(schema: &str, table: &str) -> String {
    format!("{}.{}", quote_ident(schema), quote_ident(table))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_ident_escapes_quotes() {
        assert_eq!(quote_ident("users"), "\"users\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_qualify_table() {
        assert_eq!(qualify_table("public", "users"), "\"public\".\"users\"");
    }
}
