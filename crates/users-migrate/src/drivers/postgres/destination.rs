//! PostgreSQL destination store.

use async_trait::async_trait;
use deadpool_postgres::Pool;
use futures::future::join_all;
use tracing::{debug, info};

use super::{connect_pool, ping, qualify_table};
use crate::config::PgConnectionConfig;
use crate::core::{DestinationStore, NormalizedRecord, RecordWriteError, UpsertOutcome};
use crate::error::{MigrateError, Result};

/// Columns written for every record, in bind order.
const COLUMNS: [&str; 11] = [
    "email",
    "password",
    "name",
    "device_id",
    "fcm_token",
    "age",
    "device_type",
    "gender",
    "mobile_no",
    "profile_url",
    "uid",
];

/// Upserts users into a table keyed by `email`.
///
/// A batch is sent as one pipelined burst of single-row upserts on one
/// connection, outside any transaction: every row commits on its own, so
/// a constraint violation rejects only that row.
pub struct PostgresDestination {
    pool: Pool,
    table: String,
    upsert_sql: String,
}

impl PostgresDestination {
    /// Connect and, if asked, create the users table.
    pub async fn connect(
        conn: &PgConnectionConfig,
        table: &str,
        create_table: bool,
    ) -> Result<Self> {
        let pool = connect_pool(conn, "destination")
            .await
            .map_err(|e| MigrateError::DestinationUnavailable(e.to_string()))?;
        let table = qualify_table(&conn.schema, table);

        let dest = Self {
            upsert_sql: build_upsert_sql(&table),
            pool,
            table,
        };

        if create_table {
            dest.create_table().await?;
        }
        Ok(dest)
    }

    async fn create_table(&self) -> Result<()> {
        let client = self
            .pool
            .get()
            .await
            .map_err(|e| MigrateError::pool(e, "creating users table"))?;
        client.batch_execute(&build_table_ddl(&self.table)).await?;
        info!("Ensured destination table {}", self.table);
        Ok(())
    }
}

fn build_table_ddl(table: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {table} (
    email TEXT PRIMARY KEY,
    password TEXT NOT NULL,
    name TEXT NOT NULL,
    device_id TEXT NOT NULL,
    fcm_token TEXT,
    age BIGINT,
    device_type TEXT,
    gender TEXT,
    mobile_no BIGINT,
    profile_url TEXT,
    uid TEXT,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
)"
    )
}

fn build_upsert_sql(table: &str) -> String {
    let placeholders: Vec<String> = (1..=COLUMNS.len()).map(|i| format!("${}", i)).collect();
    let updates: Vec<String> = COLUMNS[1..]
        .iter()
        .map(|c| format!("{c} = EXCLUDED.{c}"))
        .collect();

    format!(
        "INSERT INTO {} ({}) VALUES ({}) \
         ON CONFLICT (email) DO UPDATE SET {}, updated_at = now() \
         RETURNING (xmax = 0) AS inserted",
        table,
        COLUMNS.join(", "),
        placeholders.join(", "),
        updates.join(", ")
    )
}

#[async_trait]
impl DestinationStore for PostgresDestination {
    async fn upsert_batch(&self, batch: &[NormalizedRecord]) -> Result<UpsertOutcome> {
        let client = self
            .pool
            .get()
            .await
            .map_err(|e| MigrateError::DestinationUnavailable(e.to_string()))?;
        let stmt = client.prepare_cached(&self.upsert_sql).await?;

        let (client, stmt) = (&client, &stmt);
        let results = join_all(batch.iter().map(|r| async move {
            client
                .query_one(
                    stmt,
                    &[
                        &r.email,
                        &r.password,
                        &r.name,
                        &r.device_id,
                        &r.fcm_token,
                        &r.age,
                        &r.device_type,
                        &r.gender,
                        &r.mobile_no,
                        &r.profile_url,
                        &r.uid,
                    ],
                )
                .await
        }))
        .await;

        // Every row failing on a dead connection is a transport failure,
        // not a batch of individual rejections.
        if client.is_closed() && results.iter().all(|r| r.is_err()) {
            return Err(MigrateError::write(
                "connection closed while writing the batch",
            ));
        }

        let (mut inserted, mut updated) = (0u64, 0u64);
        let mut errors = Vec::new();
        for (record, result) in batch.iter().zip(results) {
            match result.and_then(|row| row.try_get::<_, bool>(0)) {
                Ok(true) => inserted += 1,
                Ok(false) => updated += 1,
                Err(e) => {
                    debug!("Upsert rejected {}: {}", record.email, e);
                    errors.push(RecordWriteError {
                        identity_key: record.identity_key().to_string(),
                        message: e.to_string(),
                    });
                }
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
        let client = self
            .pool
            .get()
            .await
            .map_err(|e| MigrateError::pool(e, "counting destination records"))?;
        let row = client
            .query_one(&format!("SELECT COUNT(*) FROM {}", self.table), &[])
            .await?;
        let count: i64 = row.try_get(0)?;
        Ok(count.max(0) as u64)
    }

    async fn test_connection(&self) -> Result<()> {
        ping(&self.pool, "destination").await
    }

    fn store_type(&self) -> &str {
        "postgres"
    }
}
