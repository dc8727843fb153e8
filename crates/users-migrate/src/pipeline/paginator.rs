//! Cursor-based page fetching.

use std::sync::Arc;

use tracing::debug;

use crate::core::{Cursor, RawRecord, SourceStore};
use crate::error::{MigrateError, Result};

/// One page of source documents.
#[derive(Debug, Clone)]
pub struct Page {
    /// Documents in source order.
    pub records: Vec<RawRecord>,
    /// Position of the last record, or the requested cursor when the page
    /// is empty.
    pub next_cursor: Option<Cursor>,
    /// No further page exists.
    pub is_last: bool,
}

/// Walks a [`SourceStore`] page by page.
///
/// Pagination is cursor-based, not snapshot-based: documents added or
/// removed between two fetches may be missed or, rarely, seen twice.
pub struct CursorPaginator {
    source: Arc<dyn SourceStore>,
    last_requested: Option<Option<Cursor>>,
}

impl CursorPaginator {
    /// Create a paginator over `source`.
    pub fn new(source: Arc<dyn SourceStore>) -> Self {
        Self {
            source,
            last_requested: None,
        }
    }

    /// Advisory document count; `None` when the source cannot tell.
    pub async fn total(&self) -> Option<u64> {
        match self.source.count().await {
            Ok(total) => total,
            Err(e) => {
                debug!("Source count unavailable: {}", e);
                None
            }
        }
    }

    /// Fetch the page after `cursor` (`None` for the first page).
    ///
    /// A page strictly shorter than `page_size` is the last one. Any source
    /// error is reported as [`MigrateError::SourceUnavailable`]; a cursor
    /// that fails to advance is reported as [`MigrateError::CursorStalled`].
    pub async fn fetch_page(&mut self, cursor: Option<&Cursor>, page_size: usize) -> Result<Page> {
        if page_size == 0 {
            return Err(MigrateError::Config("page size must be at least 1".into()));
        }
        if let (Some(prev), Some(cursor)) = (&self.last_requested, cursor) {
            if prev.as_ref() == Some(cursor) {
                return Err(MigrateError::CursorStalled(cursor.to_string()));
            }
        }
        self.last_requested = Some(cursor.cloned());

        let records = self
            .source
            .fetch_after(cursor, page_size)
            .await
            .map_err(|e| match e {
                MigrateError::SourceUnavailable(_) => e,
                other => MigrateError::SourceUnavailable(other.to_string()),
            })?;

        let next_cursor = match records.last() {
            Some(last) => {
                if cursor == Some(&last.position) {
                    return Err(MigrateError::CursorStalled(last.position.to_string()));
                }
                Some(last.position.clone())
            }
            None => cursor.cloned(),
        };
        let is_last = records.len() < page_size;

        debug!(
            "Fetched page of {} after {:?} (last: {})",
            records.len(),
            cursor.map(Cursor::as_str),
            is_last
        );

        Ok(Page {
            records,
            next_cursor,
            is_last,
        })
    }
}
