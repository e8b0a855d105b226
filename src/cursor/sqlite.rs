//! SQLite cursor on tokio-rusqlite.
//!
//! `query` runs the statement to completion on the connection's worker
//! thread and keeps the rows; `read_row` / `read_column` then serve them one
//! at a time, splitting long text and blob values into fragments of at most
//! `fragment_size` bytes.

use std::collections::VecDeque;

use async_trait::async_trait;
use rusqlite::types::ValueRef;
use tokio_rusqlite::Connection;
use tracing::debug;

use super::{ColumnChunk, ColumnMeta, Cursor, CursorError};
use crate::completion::Completion;
use crate::config::{DriverConfig, DEFAULT_FRAGMENT_SIZE};
use crate::value::Value;

impl From<rusqlite::Error> for CursorError {
    fn from(e: rusqlite::Error) -> Self {
        match &e {
            rusqlite::Error::SqliteFailure(failure, _) => {
                CursorError::new(e.to_string()).with_code(failure.extended_code)
            }
            rusqlite::Error::SqlInputError { error, .. } => {
                CursorError::new(e.to_string()).with_code(error.extended_code)
            }
            _ => CursorError::new(e.to_string()),
        }
    }
}

impl From<tokio_rusqlite::Error> for CursorError {
    fn from(e: tokio_rusqlite::Error) -> Self {
        match e {
            tokio_rusqlite::Error::Rusqlite(e) => CursorError::from(e),
            other => CursorError::new(other.to_string()),
        }
    }
}

impl Value {
    /// Convert from rusqlite ValueRef.
    pub fn from_value_ref(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(i) => Value::Int(i),
            ValueRef::Real(f) => Value::Float(f),
            ValueRef::Text(s) => Value::Text(String::from_utf8_lossy(s).into_owned()),
            ValueRef::Blob(b) => Value::Binary(bytes::Bytes::copy_from_slice(b)),
        }
    }
}

/// Strip the URL scheme the connection string may carry.
///
/// Accepts `sqlite://path`, `sqlite:path`, `:memory:` or a bare path.
fn database_path(connection_string: &str) -> &str {
    let path = connection_string
        .strip_prefix("sqlite://")
        .or_else(|| connection_string.strip_prefix("sqlite:"))
        .unwrap_or(connection_string);
    if path.is_empty() {
        ":memory:"
    } else {
        path
    }
}

/// Largest char boundary in `(start, start + size]`, or the next one after it
/// when a single character is wider than `size`.
fn split_point(s: &str, start: usize, size: usize) -> usize {
    let mut cut = start + size;
    while cut > start && !s.is_char_boundary(cut) {
        cut -= 1;
    }
    if cut == start {
        cut = start + size;
        while !s.is_char_boundary(cut) {
            cut += 1;
        }
    }
    cut
}

/// A SQLite-backed cursor.
pub struct SqliteCursor {
    conn: Option<Connection>,
    fragment_size: usize,
    pending_rows: VecDeque<Vec<Value>>,
    current: Option<Vec<Value>>,
    /// (column, byte offset) of a partially served value
    fragment: Option<(usize, usize)>,
}

impl Default for SqliteCursor {
    fn default() -> Self {
        Self::new()
    }
}

impl SqliteCursor {
    pub fn new() -> Self {
        Self {
            conn: None,
            fragment_size: DEFAULT_FRAGMENT_SIZE,
            pending_rows: VecDeque::new(),
            current: None,
            fragment: None,
        }
    }

    pub fn from_config(config: &DriverConfig) -> Self {
        Self::new().fragment_size(config.fragment_size)
    }

    pub fn fragment_size(mut self, size: usize) -> Self {
        self.fragment_size = size.max(1);
        self
    }

    /// Check if the cursor has an open connection.
    pub fn is_open(&self) -> bool {
        self.conn.is_some()
    }

    fn connection(&self) -> Result<&Connection, CursorError> {
        self.conn
            .as_ref()
            .ok_or_else(|| CursorError::new("connection is not open"))
    }

    async fn open_database(&mut self, connection_string: &str) -> Result<(), CursorError> {
        let path = database_path(connection_string).to_string();
        let is_memory = path == ":memory:";
        let conn = if is_memory {
            Connection::open_in_memory().await?
        } else {
            Connection::open(&path).await?
        };

        if !is_memory {
            conn.call(|c| {
                c.execute_batch(
                    "PRAGMA journal_mode=WAL;
                     PRAGMA synchronous=NORMAL;
                     PRAGMA busy_timeout=5000;",
                )?;
                Ok(())
            })
            .await?;
        }

        debug!(path = %path, "sqlite cursor opened");
        self.conn = Some(conn);
        Ok(())
    }

    async fn close_database(&mut self) -> Result<(), CursorError> {
        self.pending_rows.clear();
        self.current = None;
        self.fragment = None;
        match self.conn.take() {
            Some(conn) => conn.close().await.map_err(CursorError::from),
            None => Ok(()),
        }
    }

    async fn run_query(&mut self, sql: &str) -> Result<Vec<ColumnMeta>, CursorError> {
        let sql = sql.to_string();
        let (columns, rows) = self
            .connection()?
            .call(move |conn| {
                let mut stmt = conn.prepare_cached(&sql)?;
                let columns: Vec<String> =
                    stmt.column_names().iter().map(|s| s.to_string()).collect();

                // Stepping also executes statements that return no rows.
                let mut rows_data = VecDeque::new();
                let mut rows = stmt.query([])?;
                while let Some(row) = rows.next()? {
                    let mut values = Vec::with_capacity(columns.len());
                    for i in 0..columns.len() {
                        values.push(Value::from_value_ref(row.get_ref(i)?));
                    }
                    rows_data.push_back(values);
                }

                Ok((columns, rows_data))
            })
            .await?;

        self.pending_rows = rows;
        self.current = None;
        self.fragment = None;

        Ok(columns
            .into_iter()
            .enumerate()
            .map(|(index, name)| ColumnMeta { name, index })
            .collect())
    }

    fn next_row(&mut self) -> Result<bool, CursorError> {
        self.connection()?;
        self.fragment = None;
        self.current = self.pending_rows.pop_front();
        Ok(self.current.is_some())
    }

    fn next_fragment(&mut self, index: usize) -> Result<ColumnChunk, CursorError> {
        let row = self
            .current
            .as_ref()
            .ok_or_else(|| CursorError::new("no current row"))?;
        let value = row.get(index).ok_or_else(|| {
            CursorError::new(format!(
                "column index {index} out of range ({} columns)",
                row.len()
            ))
        })?;

        let offset = match self.fragment {
            Some((column, offset)) if column == index => offset,
            _ => 0,
        };
        let size = self.fragment_size;

        let (chunk, next) = match value {
            Value::Text(s) if s.len() - offset > size => {
                let cut = split_point(s, offset, size);
                (ColumnChunk::partial(&s[offset..cut]), Some(cut))
            }
            Value::Text(s) => (ColumnChunk::whole(&s[offset..]), None),
            Value::Binary(b) if b.len() - offset > size => {
                let cut = offset + size;
                (ColumnChunk::partial(Value::Binary(b.slice(offset..cut))), Some(cut))
            }
            Value::Binary(b) => (ColumnChunk::whole(Value::Binary(b.slice(offset..))), None),
            other => (ColumnChunk::whole(other.clone()), None),
        };

        self.fragment = next.map(|cut| (index, cut));
        Ok(chunk)
    }
}

#[async_trait]
impl Cursor for SqliteCursor {
    fn configure(&mut self, config: &DriverConfig) {
        self.fragment_size = config.fragment_size.max(1);
    }

    async fn open(&mut self, connection_string: &str) -> Completion<()> {
        self.open_database(connection_string).await.into()
    }

    async fn close(&mut self) -> Completion<()> {
        self.close_database().await.into()
    }

    async fn query(&mut self, sql: &str) -> Completion<Vec<ColumnMeta>> {
        self.run_query(sql).await.into()
    }

    async fn read_row(&mut self) -> Completion<bool> {
        self.next_row().into()
    }

    async fn read_column(&mut self, index: usize) -> Completion<ColumnChunk> {
        self.next_fragment(index).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::{CancelToken, Completer, PollPolicy};

    async fn open_memory() -> SqliteCursor {
        let mut cursor = SqliteCursor::new().fragment_size(4);
        Completer::new(&mut cursor, PollPolicy::default(), CancelToken::new())
            .open("sqlite://:memory:")
            .await
            .unwrap();
        cursor
    }

    #[test]
    fn test_database_path() {
        assert_eq!(database_path("sqlite://:memory:"), ":memory:");
        assert_eq!(database_path("sqlite:data/app.db"), "data/app.db");
        assert_eq!(database_path("/tmp/app.db"), "/tmp/app.db");
        assert_eq!(database_path("sqlite://"), ":memory:");
    }

    #[test]
    fn test_split_point_respects_char_boundaries() {
        let s = "aé€b";
        // 'a' = 1 byte, 'é' = 2, '€' = 3
        assert_eq!(split_point(s, 0, 2), 1);
        assert_eq!(split_point(s, 1, 2), 3);
        assert_eq!(split_point(s, 3, 1), 6);
    }

    #[tokio::test]
    async fn test_query_reports_metadata() {
        let mut cursor = open_memory().await;
        let meta = cursor.run_query("SELECT 1 AS one, 'x' AS two").await.unwrap();
        assert_eq!(meta, vec![ColumnMeta::new("one", 0), ColumnMeta::new("two", 1)]);
        assert!(cursor.next_row().unwrap());
        assert_eq!(cursor.next_fragment(0).unwrap(), ColumnChunk::whole(Value::Int(1)));
        assert!(!cursor.next_row().unwrap());
    }

    #[tokio::test]
    async fn test_statement_without_rows_has_no_columns() {
        let mut cursor = open_memory().await;
        let meta = cursor.run_query("CREATE TABLE t (id INTEGER)").await.unwrap();
        assert!(meta.is_empty());
        assert!(!cursor.next_row().unwrap());
    }

    #[tokio::test]
    async fn test_long_text_is_fragmented() {
        let mut cursor = open_memory().await;
        cursor.run_query("SELECT 'abcdefghij'").await.unwrap();
        assert!(cursor.next_row().unwrap());

        assert_eq!(cursor.next_fragment(0).unwrap(), ColumnChunk::partial("abcd"));
        assert_eq!(cursor.next_fragment(0).unwrap(), ColumnChunk::partial("efgh"));
        assert_eq!(cursor.next_fragment(0).unwrap(), ColumnChunk::whole("ij"));
    }

    #[tokio::test]
    async fn test_blob_is_fragmented() {
        let mut cursor = open_memory().await;
        cursor.run_query("SELECT x'DEADBEEF01'").await.unwrap();
        assert!(cursor.next_row().unwrap());

        let first = cursor.next_fragment(0).unwrap();
        assert!(first.more);
        assert_eq!(first.data.as_bytes(), Some(&[0xDEu8, 0xAD, 0xBE, 0xEF][..]));
        let last = cursor.next_fragment(0).unwrap();
        assert!(!last.more);
        assert_eq!(last.data.as_bytes(), Some(&[0x01u8][..]));
    }

    #[tokio::test]
    async fn test_syntax_error_carries_code() {
        let mut cursor = open_memory().await;
        let err = cursor.run_query("SELEC 1").await.unwrap_err();
        // SQLITE_ERROR
        assert_eq!(err.code, Some(1));
        assert!(err.message.contains("syntax error"));
    }

    #[tokio::test]
    async fn test_read_before_open_fails() {
        let mut cursor = SqliteCursor::new();
        assert!(cursor.run_query("SELECT 1").await.is_err());
        assert!(cursor.next_row().is_err());
    }

    #[tokio::test]
    async fn test_column_out_of_range() {
        let mut cursor = open_memory().await;
        cursor.run_query("SELECT 1").await.unwrap();
        assert!(cursor.next_row().unwrap());
        assert!(cursor.next_fragment(3).is_err());
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let mut cursor = open_memory().await;
        cursor.close_database().await.unwrap();
        assert!(!cursor.is_open());
        cursor.close_database().await.unwrap();
    }
}
