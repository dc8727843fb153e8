//! Newline-delimited JSON export source.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader, SeekFrom};
use tracing::debug;

use crate::core::{Cursor, RawRecord, SourceStore};
use crate::error::{MigrateError, Result};

/// Reads one user document per line from an export file.
///
/// The cursor is the byte offset just past the last consumed line, so a
/// resumed read seeks straight to where the previous page ended. Blank
/// lines are skipped. A line that is not a JSON object still produces a
/// record, with a malformed body, so it is counted rather than lost.
pub struct NdjsonSource {
    path: PathBuf,
}

impl NdjsonSource {
    /// Open an export file; it must exist.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        tokio::fs::metadata(&path).await.map_err(|e| {
            MigrateError::SourceUnavailable(format!("{}: {}", path.display(), e))
        })?;
        Ok(Self { path })
    }
}

fn parse_offset(cursor: &Cursor) -> Result<u64> {
    cursor.as_str().parse().map_err(|_| {
        MigrateError::SourceUnavailable(format!("invalid NDJSON cursor '{}'", cursor))
    })
}

/// Document id from the `id` or `__id` field.
fn document_id(fields: &Map<String, Value>) -> Option<String> {
    ["id", "__id"].iter().find_map(|key| match fields.get(*key) {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

fn parse_line(line: &[u8], line_start: u64, line_end: u64) -> RawRecord {
    let position = Cursor::new(line_end.to_string());
    match serde_json::from_slice::<Value>(line) {
        Ok(Value::Object(fields)) => match document_id(&fields) {
            Some(id) => RawRecord::document(id, position, fields),
            None => RawRecord::document(format!("line@{}", line_start), position, fields)
                .with_generated_id(),
        },
        Ok(_) => RawRecord::malformed(
            format!("line@{}", line_start),
            position,
            "line is not a JSON object",
        )
        .with_generated_id(),
        Err(e) => RawRecord::malformed(format!("line@{}", line_start), position, e.to_string())
            .with_generated_id(),
    }
}

fn trim_line_end(mut line: &[u8]) -> &[u8] {
    while let [rest @ .., b'\n' | b'\r'] = line {
        line = rest;
    }
    line
}

#[async_trait]
impl SourceStore for NdjsonSource {
    async fn fetch_after(&self, after: Option<&Cursor>, limit: usize) -> Result<Vec<RawRecord>> {
        let mut offset = match after {
            Some(cursor) => parse_offset(cursor)?,
            None => 0,
        };

        let mut file = File::open(&self.path).await?;
        file.seek(SeekFrom::Start(offset)).await?;
        let mut reader = BufReader::new(file);

        let mut records = Vec::with_capacity(limit);
        let mut buf = Vec::new();
        while records.len() < limit {
            buf.clear();
            let read = reader.read_until(b'\n', &mut buf).await?;
            if read == 0 {
                break;
            }
            let line_start = offset;
            offset += read as u64;

            let line = trim_line_end(&buf);
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            records.push(parse_line(line, line_start, offset));
        }

        debug!(
            "Read {} documents from {} up to byte {}",
            records.len(),
            self.path.display(),
            offset
        );
        Ok(records)
    }

    async fn count(&self) -> Result<Option<u64>> {
        let file = File::open(&self.path).await?;
        let mut lines = BufReader::new(file).lines();
        let mut count = 0u64;
        while let Some(line) = lines.next_line().await? {
            if !line.trim().is_empty() {
                count += 1;
            }
        }
        Ok(Some(count))
    }

    async fn test_connection(&self) -> Result<()> {
        File::open(&self.path).await?;
        Ok(())
    }

    fn store_type(&self) -> &str {
        "ndjson"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::RawBody;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn export(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[tokio::test]
    async fn test_pages_resume_from_byte_offset() {
        let file = export(
            "{\"id\":\"a\",\"email\":\"a@x.com\"}\n\
             \n\
             {\"id\":\"b\",\"email\":\"b@x.com\"}\r\n\
             {\"id\":\"c\",\"email\":\"c@x.com\"}",
        );
        let source = NdjsonSource::open(file.path()).await.unwrap();

        let first = source.fetch_after(None, 2).await.unwrap();
        let ids: Vec<_> = first.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["a", "b"]);
        assert!(first.iter().all(|r| !r.id_generated));

        let cursor = first.last().unwrap().position.clone();
        let second = source.fetch_after(Some(&cursor), 2).await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].id, "c");

        let cursor = second[0].position.clone();
        assert!(source.fetch_after(Some(&cursor), 2).await.unwrap().is_empty());
        assert_eq!(source.count().await.unwrap(), Some(3));
    }

    #[tokio::test]
    async fn test_bad_line_is_malformed_record() {
        let file = export("{\"email\":\"a@x.com\"}\nnot json\n[1]\n");
        let source = NdjsonSource::open(file.path()).await.unwrap();

        let records = source.fetch_after(None, 10).await.unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].id, "line@0");
        assert!(records[0].id_generated);
        assert!(matches!(records[0].body, RawBody::Document(_)));
        assert!(matches!(records[1].body, RawBody::Malformed(_)));
        assert_eq!(
            records[2].body,
            RawBody::Malformed("line is not a JSON object".into())
        );
    }

    #[tokio::test]
    async fn test_missing_file_is_source_unavailable() {
        let err = NdjsonSource::open("/nonexistent/users.ndjson")
            .await
            .err()
            .unwrap();
        assert!(matches!(err, MigrateError::SourceUnavailable(_)));
    }
}
