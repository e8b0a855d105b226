//! Scripted in-memory cursor for tests.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{ColumnChunk, ColumnMeta, Cursor, CursorError};
use crate::completion::Completion;
use crate::value::Value;

/// A cursor call as observed by the mock.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Open(String),
    Close,
    Query(String),
    ReadRow,
    ReadColumn(usize),
}

/// What the mock answers.
#[derive(Debug, Clone, Default)]
pub struct Script {
    pub meta: Vec<ColumnMeta>,
    /// rows -> columns -> fragments
    pub rows: Vec<Vec<Vec<ColumnChunk>>>,
    pub open_error: Option<CursorError>,
    pub query_error: Option<CursorError>,
    /// Fail the n-th `read_row` call (zero-based).
    pub row_error: Option<(usize, CursorError)>,
    /// Fail reading (row, column).
    pub column_error: Option<(usize, usize, CursorError)>,
    pub close_error: Option<CursorError>,
}

impl Script {
    /// A statement with no result columns.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Named columns with single-fragment values.
    pub fn rows(names: &[&str], rows: Vec<Vec<Value>>) -> Self {
        let rows = rows
            .into_iter()
            .map(|row| row.into_iter().map(|v| vec![ColumnChunk::whole(v)]).collect())
            .collect();
        Self::chunked(names, rows)
    }

    /// Named columns whose values arrive as explicit fragments.
    pub fn chunked(names: &[&str], rows: Vec<Vec<Vec<ColumnChunk>>>) -> Self {
        Self {
            meta: names
                .iter()
                .enumerate()
                .map(|(i, name)| ColumnMeta::new(*name, i))
                .collect(),
            rows,
            ..Self::default()
        }
    }

    pub fn failing_query(error: CursorError) -> Self {
        Self {
            query_error: Some(error),
            ..Self::default()
        }
    }

    pub fn fail_open(mut self, error: CursorError) -> Self {
        self.open_error = Some(error);
        self
    }

    pub fn fail_row(mut self, nth: usize, error: CursorError) -> Self {
        self.row_error = Some((nth, error));
        self
    }

    pub fn fail_column(mut self, row: usize, column: usize, error: CursorError) -> Self {
        self.column_error = Some((row, column, error));
        self
    }

    /// Fail the first `close` call.
    pub fn fail_close(mut self, error: CursorError) -> Self {
        self.close_error = Some(error);
        self
    }
}

pub type CallLog = Arc<Mutex<Vec<Call>>>;

pub struct MockCursor {
    script: Script,
    log: CallLog,
    pending_before_each: u32,
    pending_left: u32,
    stall_on_query: bool,
    remaining: VecDeque<Vec<Vec<ColumnChunk>>>,
    current: Vec<VecDeque<ColumnChunk>>,
    rows_read: usize,
    row_calls: usize,
}

impl MockCursor {
    pub fn new(script: Script) -> Self {
        Self {
            script,
            log: Arc::new(Mutex::new(Vec::new())),
            pending_before_each: 0,
            pending_left: 0,
            stall_on_query: false,
            remaining: VecDeque::new(),
            current: Vec::new(),
            rows_read: 0,
            row_calls: 0,
        }
    }

    /// Answer `Pending` this many times before every final answer.
    pub fn pending_before_each(mut self, n: u32) -> Self {
        self.pending_before_each = n;
        self.pending_left = n;
        self
    }

    /// Never complete `query`.
    pub fn stall_on_query(mut self) -> Self {
        self.stall_on_query = true;
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.log.lock().clone()
    }

    /// Shared handle to the call log, usable after the cursor is moved.
    pub fn call_log(&self) -> CallLog {
        Arc::clone(&self.log)
    }

    /// Record the call and decide whether this attempt is a pending one.
    fn observe(&mut self, call: Call) -> bool {
        self.log.lock().push(call);
        if self.pending_left > 0 {
            self.pending_left -= 1;
            return true;
        }
        self.pending_left = self.pending_before_each;
        false
    }
}

#[async_trait]
impl Cursor for MockCursor {
    async fn open(&mut self, connection_string: &str) -> Completion<()> {
        if self.observe(Call::Open(connection_string.to_string())) {
            return Completion::Pending;
        }
        match &self.script.open_error {
            Some(e) => Completion::err(e.clone()),
            None => Completion::ok(()),
        }
    }

    async fn close(&mut self) -> Completion<()> {
        if self.observe(Call::Close) {
            return Completion::Pending;
        }
        match self.script.close_error.take() {
            Some(e) => Completion::err(e),
            None => Completion::ok(()),
        }
    }

    async fn query(&mut self, sql: &str) -> Completion<Vec<ColumnMeta>> {
        if self.stall_on_query {
            self.log.lock().push(Call::Query(sql.to_string()));
            return std::future::pending().await;
        }
        if self.observe(Call::Query(sql.to_string())) {
            return Completion::Pending;
        }
        if let Some(e) = &self.script.query_error {
            return Completion::err(e.clone());
        }
        self.remaining = self.script.rows.iter().cloned().collect();
        self.rows_read = 0;
        self.row_calls = 0;
        Completion::ok(self.script.meta.clone())
    }

    async fn read_row(&mut self) -> Completion<bool> {
        if self.observe(Call::ReadRow) {
            return Completion::Pending;
        }
        let nth = self.row_calls;
        self.row_calls += 1;
        if let Some((at, e)) = &self.script.row_error {
            if *at == nth {
                return Completion::err(e.clone());
            }
        }
        match self.remaining.pop_front() {
            Some(row) => {
                self.current = row.into_iter().map(VecDeque::from).collect();
                self.rows_read += 1;
                Completion::ok(true)
            }
            None => {
                self.current.clear();
                Completion::ok(false)
            }
        }
    }

    async fn read_column(&mut self, index: usize) -> Completion<ColumnChunk> {
        if self.observe(Call::ReadColumn(index)) {
            return Completion::Pending;
        }
        if let Some((row, column, e)) = &self.script.column_error {
            if *row + 1 == self.rows_read && *column == index {
                return Completion::err(e.clone());
            }
        }
        match self.current.get_mut(index).and_then(VecDeque::pop_front) {
            Some(chunk) => Completion::ok(chunk),
            None => Completion::err(CursorError::new(format!("no data for column {index}"))),
        }
    }
}
