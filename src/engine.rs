//! Row/column streaming engine.
//!
//! Drives a cursor through metadata -> rows -> columns -> fragments and
//! reports progress as [`QueryEvent`]s. In buffered mode the rows are also
//! materialized into a [`ResultSet`].
//!
//! The traversal is an explicit state machine:
//!
//! ```text
//! AwaitingMetadata -> AwaitingRow -> AwaitingColumn(i) -> AwaitingColumnMore(i)*
//!                         ^                 |                    |
//!                         +-----------------+--------------------+
//!                                           v
//!                                     Done | Failed
//! ```

use serde::Serialize;
use smallvec::SmallVec;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, trace, Instrument};
use uuid::Uuid;

use crate::binder::{bind, QuoteEscaping};
use crate::completion::{CancelToken, Completer, PollPolicy};
use crate::cursor::{ColumnMeta, Cursor};
use crate::error::{DriverError, DriverResult};
use crate::value::{Param, Value};

/// Notification emitted while a query runs.
///
/// `Error` or `Done` is always the last event, and exactly one of them fires.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryEvent {
    Meta(Vec<ColumnMeta>),
    /// A new row started; zero-based.
    Row(usize),
    /// One fragment of column `index` of the current row.
    Column { index: usize, data: Value, more: bool },
    Error(DriverError),
    Done,
}

impl QueryEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, QueryEvent::Error(_) | QueryEvent::Done)
    }
}

/// Receiver of query events.
pub trait EventSink: Send {
    fn emit(&mut self, event: QueryEvent);

    /// Whether anyone still consumes column payloads. Lets the engine skip
    /// cloning values nobody will read.
    fn is_listening(&self) -> bool {
        true
    }
}

impl EventSink for UnboundedSender<QueryEvent> {
    fn emit(&mut self, event: QueryEvent) {
        // receiver dropped: the caller stopped listening
        let _ = self.send(event);
    }

    fn is_listening(&self) -> bool {
        !self.is_closed()
    }
}

impl EventSink for Vec<QueryEvent> {
    fn emit(&mut self, event: QueryEvent) {
        self.push(event);
    }
}

/// Sink that drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct Discard;

impl EventSink for Discard {
    fn emit(&mut self, _event: QueryEvent) {}

    fn is_listening(&self) -> bool {
        false
    }
}

/// A row stored positionally.
/// Uses SmallVec to inline storage for rows with <= 16 columns.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Row {
    pub values: SmallVec<[Value; 16]>,
}

impl Row {
    fn with_width(width: usize) -> Self {
        let mut values = SmallVec::with_capacity(width);
        values.resize(width, Value::Null);
        Self { values }
    }

    #[inline]
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Value> {
        self.values.iter()
    }
}

impl<V: Into<Value>> FromIterator<V> for Row {
    fn from_iter<I: IntoIterator<Item = V>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().map(Into::into).collect(),
        }
    }
}

/// Buffered query result.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResultSet {
    pub meta: Vec<ColumnMeta>,
    pub rows: Vec<Row>,
}

impl ResultSet {
    #[inline]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Per-query settings.
#[derive(Debug, Clone)]
pub struct QueryOptions {
    pub query_id: Uuid,
    pub escaping: QuoteEscaping,
    pub poll: PollPolicy,
    pub cancel: CancelToken,
    /// Materialize rows into the returned [`ResultSet`].
    pub buffered: bool,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            query_id: Uuid::new_v4(),
            escaping: QuoteEscaping::default(),
            poll: PollPolicy::default(),
            cancel: CancelToken::new(),
            buffered: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    AwaitingMetadata,
    AwaitingRow,
    AwaitingColumn(usize),
    AwaitingColumnMore(usize),
    Done,
    Failed,
}

struct RowReader<'a, C: ?Sized, S: ?Sized> {
    completer: Completer<'a, C>,
    sink: &'a mut S,
    cancel: CancelToken,
    escaping: QuoteEscaping,
    state: State,
    meta: Vec<ColumnMeta>,
    rows: Option<Vec<Row>>,
    next_row: usize,
}

impl<C, S> RowReader<'_, C, S>
where
    C: Cursor + ?Sized,
    S: EventSink + ?Sized,
{
    async fn run(mut self, sql: &str, params: &[Param]) -> DriverResult<ResultSet> {
        loop {
            if let Err(e) = self.step(sql, params).await {
                self.state = State::Failed;
                debug!(error = %e, rows = self.next_row, "query failed");
                self.sink.emit(QueryEvent::Error(e.clone()));
                return Err(e);
            }
            if self.state == State::Done {
                debug!(rows = self.next_row, "query done");
                self.sink.emit(QueryEvent::Done);
                return Ok(ResultSet {
                    meta: self.meta,
                    rows: self.rows.unwrap_or_default(),
                });
            }
        }
    }

    async fn step(&mut self, sql: &str, params: &[Param]) -> DriverResult<()> {
        self.cancel.check()?;

        match self.state {
            State::AwaitingMetadata => {
                debug!(template = %sql, params = params.len(), "submitting query");
                let sql = bind(sql, params, self.escaping)?;
                let meta = self.completer.query(&sql).await?;
                self.sink.emit(QueryEvent::Meta(meta.clone()));
                self.state = if meta.is_empty() {
                    State::Done
                } else {
                    State::AwaitingRow
                };
                self.meta = meta;
            }
            State::AwaitingRow => {
                if self.completer.read_row().await? {
                    let index = self.next_row;
                    self.next_row += 1;
                    trace!(row = index, "row");
                    self.sink.emit(QueryEvent::Row(index));
                    if let Some(rows) = self.rows.as_mut() {
                        rows.push(Row::with_width(self.meta.len()));
                    }
                    self.state = State::AwaitingColumn(0);
                } else {
                    self.state = State::Done;
                }
            }
            State::AwaitingColumn(index) | State::AwaitingColumnMore(index) => {
                let first = matches!(self.state, State::AwaitingColumn(_));
                let chunk = self.completer.read_column(index).await?;
                let more = chunk.more;

                if self.sink.is_listening() {
                    self.sink.emit(QueryEvent::Column {
                        index,
                        data: chunk.data.clone(),
                        more,
                    });
                }
                if let Some(slot) = self
                    .rows
                    .as_mut()
                    .and_then(|rows| rows.last_mut())
                    .and_then(|row| row.values.get_mut(index))
                {
                    if first {
                        *slot = chunk.data;
                    } else {
                        slot.append(chunk.data);
                    }
                }

                self.state = if more {
                    State::AwaitingColumnMore(index)
                } else if index + 1 < self.meta.len() {
                    State::AwaitingColumn(index + 1)
                } else {
                    State::AwaitingRow
                };
            }
            State::Done | State::Failed => {}
        }
        Ok(())
    }
}

/// Run `sql` to completion on `cursor`, reporting to `sink`.
///
/// The first error at any stage is emitted as [`QueryEvent::Error`] and
/// returned; no cursor call is issued after it. When `options.buffered` is
/// false the returned set carries the metadata only.
pub async fn execute<C, S>(
    cursor: &mut C,
    sql: &str,
    params: &[Param],
    sink: &mut S,
    options: &QueryOptions,
) -> DriverResult<ResultSet>
where
    C: Cursor + ?Sized,
    S: EventSink + ?Sized,
{
    let span = tracing::debug_span!("query", query_id = %options.query_id);
    let reader = RowReader {
        completer: Completer::new(cursor, options.poll, options.cancel.clone()),
        sink,
        cancel: options.cancel.clone(),
        escaping: options.escaping,
        state: State::AwaitingMetadata,
        meta: Vec::new(),
        rows: options.buffered.then(Vec::new),
        next_row: 0,
    };
    reader.run(sql, params).instrument(span).await
}

/// Bind and submit `sql` without reading any rows. Used for statements whose
/// result is irrelevant, such as transaction control.
pub async fn submit<C>(
    cursor: &mut C,
    sql: &str,
    params: &[Param],
    options: &QueryOptions,
) -> DriverResult<Vec<ColumnMeta>>
where
    C: Cursor + ?Sized,
{
    debug!(
        query_id = %options.query_id,
        template = %sql,
        params = params.len(),
        "submitting statement"
    );
    let sql = bind(sql, params, options.escaping)?;
    Completer::new(cursor, options.poll, options.cancel.clone())
        .query(&sql)
        .await
}
