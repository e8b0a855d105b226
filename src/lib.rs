//! rowstream - streaming and buffered query results over completion-driven
//! database cursors.
//!
//! Architecture:
//! - `cursor`: the cursor boundary and a SQLite-backed implementation
//! - `completion`: re-polls pending cursor operations to a final result
//! - `binder`: `?` placeholder substitution with SQL literal escaping
//! - `engine`: metadata/row/column/fragment state machine and events
//! - `objectify`: positional rows to name-keyed records
//! - `connection`: connection facade and one-shot helpers

pub mod binder;
pub mod completion;
pub mod config;
pub mod connection;
pub mod cursor;
pub mod engine;
pub mod error;
pub mod objectify;
pub mod value;


pub use binder::{bind, QuoteEscaping};
pub use completion::{CancelToken, Completion, PollPolicy};
pub use config::{CloseErrorPolicy, DriverConfig};
pub use connection::{
    query, query_raw, query_stream, query_stream_buffered, Connection, QueryStream,
};
pub use cursor::{ColumnChunk, ColumnMeta, Cursor, CursorError, SqliteCursor};
pub use engine::{Discard, EventSink, QueryEvent, QueryOptions, ResultSet, Row};
pub use error::{DriverError, DriverResult};
pub use objectify::{objectify, resolve_column_names, NamedRecord};
pub use value::{Param, Value};

/// Open a connection over `cursor`.
pub async fn open<C: Cursor + 'static>(
    cursor: C,
    connection_string: &str,
    config: DriverConfig,
) -> DriverResult<Connection<C>> {
    Connection::open(cursor, connection_string, config).await
}
