//! The cursor boundary.
//!
//! A cursor is the native, stateful handle the engine drives. Every operation
//! reports a [`Completion`]: either still pending (call again with the same
//! arguments) or a final result.
//!
//! Implementations:
//! - `sqlite`: SQLite-backed cursor on tokio-rusqlite

pub mod sqlite;

#[cfg(test)]
pub(crate) mod mock;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::completion::Completion;
use crate::config::DriverConfig;
use crate::value::Value;

pub use sqlite::SqliteCursor;

/// Metadata for one result column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnMeta {
    pub name: String,
    pub index: usize,
}

impl ColumnMeta {
    pub fn new(name: impl Into<String>, index: usize) -> Self {
        Self {
            name: name.into(),
            index,
        }
    }
}

/// One fragment of a column value.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnChunk {
    pub data: Value,
    /// More fragments of the same column follow.
    pub more: bool,
}

impl ColumnChunk {
    /// A complete, single-fragment value.
    pub fn whole(data: impl Into<Value>) -> Self {
        Self {
            data: data.into(),
            more: false,
        }
    }

    /// A fragment with more to follow.
    pub fn partial(data: impl Into<Value>) -> Self {
        Self {
            data: data.into(),
            more: true,
        }
    }
}

/// An error reported by the cursor, passed through verbatim.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{message}")]
pub struct CursorError {
    pub message: String,
    /// Five-character SQLSTATE, when the backend reports one.
    pub sqlstate: Option<String>,
    /// Native error code.
    pub code: Option<i32>,
}

impl CursorError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            sqlstate: None,
            code: None,
        }
    }

    pub fn with_code(mut self, code: i32) -> Self {
        self.code = Some(code);
        self
    }

    pub fn with_sqlstate(mut self, sqlstate: impl Into<String>) -> Self {
        self.sqlstate = Some(sqlstate.into());
        self
    }
}

/// Completion-driven cursor primitive.
///
/// Operations on one cursor are never issued concurrently; the connection
/// serializes queries and the engine waits for each completion before the
/// next call.
#[async_trait]
pub trait Cursor: Send {
    /// Apply the driver configuration before the cursor is opened.
    fn configure(&mut self, _config: &DriverConfig) {}

    /// Open a connection.
    async fn open(&mut self, connection_string: &str) -> Completion<()>;

    /// Close the connection.
    async fn close(&mut self) -> Completion<()>;

    /// Submit a query; the result is the column metadata (empty for
    /// statements that return no rows).
    async fn query(&mut self, sql: &str) -> Completion<Vec<ColumnMeta>>;

    /// Advance to the next row. `false` when the rows are exhausted.
    async fn read_row(&mut self) -> Completion<bool>;

    /// Read the next fragment of column `index` of the current row.
    async fn read_column(&mut self, index: usize) -> Completion<ColumnChunk>;
}
