//! PostgreSQL source store.

use async_trait::async_trait;
use deadpool_postgres::Pool;
use serde_json::Value;
use tracing::debug;

use super::{connect_pool, ping, qualify_table, quote_ident};
use crate::config::PgConnectionConfig;
use crate::core::{Cursor, RawRecord, SourceStore};
use crate::error::{MigrateError, Result};

/// Reads user documents from a `(id TEXT, data JSONB)` table.
///
/// Pages are keyset-paginated on the id column, so the cursor is the last
/// id of the previous page and no offsets are ever scanned.
pub struct PostgresSource {
    pool: Pool,
    first_page_sql: String,
    next_page_sql: String,
    count_sql: String,
}

impl PostgresSource {
    /// Connect to the source table.
    pub async fn connect(
        conn: &PgConnectionConfig,
        table: &str,
        id_column: &str,
        data_column: &str,
    ) -> Result<Self> {
        let pool = connect_pool(conn, "source")
            .await
            .map_err(|e| MigrateError::SourceUnavailable(e.to_string()))?;

        let table = qualify_table(&conn.schema, table);
        let key = format!("{}::text", quote_ident(id_column));
        let data = quote_ident(data_column);
        let select = format!("SELECT {key}, {data}::jsonb FROM {table}");

        Ok(Self {
            pool,
            first_page_sql: format!("{select} ORDER BY {key} LIMIT $1"),
            next_page_sql: format!("{select} WHERE {key} > $1 ORDER BY {key} LIMIT $2"),
            count_sql: format!("SELECT COUNT(*) FROM {table}"),
        })
    }
}

fn to_raw_record(id: String, data: Option<Value>) -> RawRecord {
    let position = Cursor::new(id.clone());
    match data {
        Some(Value::Object(fields)) => RawRecord::document(id, position, fields),
        Some(other) => RawRecord::malformed(
            id,
            position,
            format!("expected a JSON object, found {}", json_kind(&other)),
        ),
        None => RawRecord::malformed(id, position, "document is NULL"),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[async_trait]
impl SourceStore for PostgresSource {
    async fn fetch_after(&self, after: Option<&Cursor>, limit: usize) -> Result<Vec<RawRecord>> {
        let client = self
            .pool
            .get()
            .await
            .map_err(|e| MigrateError::pool(e, "reading source page"))?;

        let limit = limit as i64;
        let rows = match after {
            None => client.query(&self.first_page_sql, &[&limit]).await?,
            Some(cursor) => {
                client
                    .query(&self.next_page_sql, &[&cursor.as_str(), &limit])
                    .await?
            }
        };
        debug!("Fetched {} source rows after {:?}", rows.len(), after);

        rows.into_iter()
            .map(|row| -> Result<RawRecord> {
                let id: String = row.try_get(0)?;
                let data: Option<Value> = row.try_get(1)?;
                Ok(to_raw_record(id, data))
            })
            .collect()
    }

    async fn count(&self) -> Result<Option<u64>> {
        let client = self
            .pool
            .get()
            .await
            .map_err(|e| MigrateError::pool(e, "counting source documents"))?;
        let row = client.query_one(&self.count_sql, &[]).await?;
        let count: i64 = row.try_get(0)?;
        Ok(Some(count.max(0) as u64))
    }

    async fn test_connection(&self) -> Result<()> {
        ping(&self.pool, "source").await
    }

    fn store_type(&self) -> &str {
        "postgres"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_object_becomes_document() {
        let raw = to_raw_record("u1".into(), Some(json!({"email": "a@b.com"})));
        assert_eq!(raw.position, Cursor::new("u1"));
        assert!(matches!(raw.body, crate::core::RawBody::Document(_)));
    }

    #[test]
    fn test_non_object_is_malformed() {
        let raw = to_raw_record("u2".into(), Some(json!([1, 2])));
        assert_eq!(
            raw.body,
            crate::core::RawBody::Malformed("expected a JSON object, found an array".into())
        );

        let raw = to_raw_record("u3".into(), None);
        assert!(matches!(raw.body, crate::core::RawBody::Malformed(_)));
    }
}
