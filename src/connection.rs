//! Connection facade and one-shot helpers.
//!
//! A [`Connection`] owns one cursor. Queries on it run strictly one after the
//! other: each query holds the cursor for its whole lifetime, and callers
//! queue on an async mutex in FIFO order.

use std::sync::Arc;

use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::sync::{Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::completion::{CancelToken, Completer};
use crate::config::{CloseErrorPolicy, DriverConfig};
use crate::cursor::Cursor;
use crate::engine::{self, Discard, EventSink, QueryEvent, QueryOptions, ResultSet};
use crate::error::{DriverError, DriverResult};
use crate::objectify::{objectify, NamedRecord};
use crate::value::Param;

pub const BEGIN_TRANSACTION: &str = "BEGIN TRANSACTION DefaultTransaction";
pub const COMMIT: &str = "COMMIT";
pub const ROLLBACK: &str = "ROLLBACK";

struct CursorSlot<C> {
    cursor: C,
    closed: bool,
}

/// An open connection over cursor `C`.
pub struct Connection<C> {
    inner: Arc<Mutex<CursorSlot<C>>>,
    config: Arc<DriverConfig>,
}

impl<C> Clone for Connection<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            config: Arc::clone(&self.config),
        }
    }
}

impl<C: Cursor + 'static> Connection<C> {
    /// Open `cursor` against `connection_string`.
    pub async fn open(
        mut cursor: C,
        connection_string: &str,
        config: DriverConfig,
    ) -> DriverResult<Self> {
        config.validate()?;
        cursor.configure(&config);
        Completer::new(&mut cursor, config.poll, CancelToken::new())
            .open(connection_string)
            .await?;
        debug!("connection opened");

        Ok(Self {
            inner: Arc::new(Mutex::new(CursorSlot {
                cursor,
                closed: false,
            })),
            config: Arc::new(config),
        })
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    async fn acquire(&self) -> DriverResult<MutexGuard<'_, CursorSlot<C>>> {
        let slot = self.inner.lock().await;
        if slot.closed {
            return Err(DriverError::ConnectionClosed);
        }
        Ok(slot)
    }

    /// Run a query, reporting every event to `sink`.
    pub async fn query_with_sink<S: EventSink + ?Sized>(
        &self,
        sql: &str,
        params: &[Param],
        sink: &mut S,
        options: &QueryOptions,
    ) -> DriverResult<ResultSet> {
        let mut slot = match self.acquire().await {
            Ok(slot) => slot,
            Err(e) => {
                sink.emit(QueryEvent::Error(e.clone()));
                return Err(e);
            }
        };
        engine::execute(&mut slot.cursor, sql, params, sink, options).await
    }

    /// Buffered query with positional rows.
    pub async fn query_raw(&self, sql: &str, params: &[Param]) -> DriverResult<ResultSet> {
        self.query_raw_cancellable(sql, params, &CancelToken::new())
            .await
    }

    /// Buffered query that stops with [`DriverError::Cancelled`] once `cancel`
    /// fires.
    pub async fn query_raw_cancellable(
        &self,
        sql: &str,
        params: &[Param],
        cancel: &CancelToken,
    ) -> DriverResult<ResultSet> {
        let options = self.config.query_options(true, cancel.clone());
        self.query_with_sink(sql, params, &mut Discard, &options)
            .await
    }

    /// Buffered query with name-keyed rows.
    pub async fn query(&self, sql: &str, params: &[Param]) -> DriverResult<Vec<NamedRecord>> {
        let results = self.query_raw(sql, params).await?;
        Ok(objectify(&results))
    }

    /// Streaming query. Must be called within a tokio runtime.
    pub fn query_stream(&self, sql: &str, params: &[Param]) -> QueryStream {
        self.spawn_stream(sql, params, false)
    }

    /// Streaming query that also buffers the rows for [`QueryStream::finish`].
    pub fn query_stream_buffered(&self, sql: &str, params: &[Param]) -> QueryStream {
        self.spawn_stream(sql, params, true)
    }

    fn spawn_stream(&self, sql: &str, params: &[Param], buffered: bool) -> QueryStream {
        let options = self.config.query_options(buffered, CancelToken::new());
        let conn = self.clone();
        let sql = sql.to_string();
        let params = params.to_vec();
        QueryStream::spawn(options, move |mut sink, options| async move {
            conn.query_with_sink(&sql, &params, &mut sink, &options)
                .await
        })
    }

    async fn submit(&self, sql: &str) -> DriverResult<()> {
        let mut slot = self.acquire().await?;
        let options = self.config.query_options(false, CancelToken::new());
        engine::submit(&mut slot.cursor, sql, &[], &options).await?;
        Ok(())
    }

    pub async fn begin_transaction(&self) -> DriverResult<()> {
        self.submit(BEGIN_TRANSACTION).await
    }

    pub async fn commit(&self) -> DriverResult<()> {
        self.submit(COMMIT).await
    }

    pub async fn rollback(&self) -> DriverResult<()> {
        self.submit(ROLLBACK).await
    }

    /// Close the cursor. Waits for the in-flight query, if any; once the
    /// cursor has closed, later queries on any clone of this connection fail
    /// with `ConnectionClosed`. A failed close leaves the connection usable.
    pub async fn close(&self) -> DriverResult<()> {
        let mut slot = self.acquire().await?;
        Completer::new(&mut slot.cursor, self.config.poll, CancelToken::new())
            .close()
            .await?;
        slot.closed = true;
        debug!("connection closed");
        Ok(())
    }

    /// Check if the connection is closed.
    pub async fn is_closed(&self) -> bool {
        self.inner.lock().await.closed
    }
}

/// Events of a query running on a background task.
///
/// Dropping the stream does not stop the query; use [`QueryStream::cancel`].
pub struct QueryStream {
    id: Uuid,
    events: UnboundedReceiver<QueryEvent>,
    task: JoinHandle<DriverResult<ResultSet>>,
    cancel: CancelToken,
    buffered: bool,
}

impl QueryStream {
    fn spawn<F, Fut>(options: QueryOptions, run: F) -> Self
    where
        F: FnOnce(mpsc::UnboundedSender<QueryEvent>, QueryOptions) -> Fut,
        Fut: std::future::Future<Output = DriverResult<ResultSet>> + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = options.query_id;
        let cancel = options.cancel.clone();
        let buffered = options.buffered;
        let task = tokio::spawn(run(tx, options));
        Self {
            id,
            events: rx,
            task,
            cancel,
            buffered,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Next event; `None` once the terminal event has been consumed.
    pub async fn next_event(&mut self) -> Option<QueryEvent> {
        self.events.recv().await
    }

    /// Abandon the query at its next state transition.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Wait for the query to end. Yields the rows when the stream was
    /// created buffered, `None` otherwise.
    pub async fn finish(self) -> DriverResult<Option<ResultSet>> {
        let results = match self.task.await {
            Ok(result) => result?,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(_) => return Err(DriverError::Cancelled),
        };
        Ok(self.buffered.then_some(results))
    }

    /// Drain every event, then wait for the outcome.
    pub async fn collect(mut self) -> (Vec<QueryEvent>, DriverResult<Option<ResultSet>>) {
        let mut events = Vec::new();
        while let Some(event) = self.events.recv().await {
            events.push(event);
        }
        (events, self.finish().await)
    }

    /// The events as a `Stream`. The query keeps running in the background.
    pub fn into_stream(self) -> UnboundedReceiverStream<QueryEvent> {
        UnboundedReceiverStream::new(self.events)
    }
}

/// Open `cursor`, run one query, and close it again regardless of outcome.
async fn run_once<C, S>(
    mut cursor: C,
    connection_string: &str,
    sql: &str,
    params: &[Param],
    sink: &mut S,
    config: &DriverConfig,
    options: &QueryOptions,
) -> DriverResult<ResultSet>
where
    C: Cursor,
    S: EventSink + ?Sized,
{
    let opened = match config.validate() {
        Ok(()) => {
            cursor.configure(config);
            Completer::new(&mut cursor, config.poll, options.cancel.clone())
                .open(connection_string)
                .await
        }
        Err(e) => Err(e),
    };
    if let Err(e) = opened {
        sink.emit(QueryEvent::Error(e.clone()));
        return Err(e);
    }

    let result = engine::execute(&mut cursor, sql, params, sink, options).await;
    let closed = Completer::new(&mut cursor, config.poll, CancelToken::new())
        .close()
        .await;

    match (result, closed) {
        (Err(e), _) => Err(e),
        (Ok(results), Ok(())) => Ok(results),
        (Ok(results), Err(e)) => match config.close_errors {
            CloseErrorPolicy::Suppress => {
                warn!(query_id = %options.query_id, error = %e, "closing cursor failed after query");
                Ok(results)
            }
            CloseErrorPolicy::Surface => Err(e),
        },
    }
}

/// One-shot buffered query with name-keyed rows on a short-lived cursor.
pub async fn query<C: Cursor>(
    cursor: C,
    connection_string: &str,
    sql: &str,
    params: &[Param],
    config: &DriverConfig,
) -> DriverResult<Vec<NamedRecord>> {
    let results = query_raw(cursor, connection_string, sql, params, config).await?;
    Ok(objectify(&results))
}

/// One-shot buffered query with positional rows on a short-lived cursor.
pub async fn query_raw<C: Cursor>(
    cursor: C,
    connection_string: &str,
    sql: &str,
    params: &[Param],
    config: &DriverConfig,
) -> DriverResult<ResultSet> {
    let options = config.query_options(true, CancelToken::new());
    run_once(
        cursor,
        connection_string,
        sql,
        params,
        &mut Discard,
        config,
        &options,
    )
    .await
}

/// One-shot streaming query. Must be called within a tokio runtime.
pub fn query_stream<C: Cursor + 'static>(
    cursor: C,
    connection_string: &str,
    sql: &str,
    params: &[Param],
    config: &DriverConfig,
) -> QueryStream {
    spawn_once(cursor, connection_string, sql, params, config, false)
}

/// One-shot streaming query that also buffers the rows.
pub fn query_stream_buffered<C: Cursor + 'static>(
    cursor: C,
    connection_string: &str,
    sql: &str,
    params: &[Param],
    config: &DriverConfig,
) -> QueryStream {
    spawn_once(cursor, connection_string, sql, params, config, true)
}

fn spawn_once<C: Cursor + 'static>(
    cursor: C,
    connection_string: &str,
    sql: &str,
    params: &[Param],
    config: &DriverConfig,
    buffered: bool,
) -> QueryStream {
    let options = config.query_options(buffered, CancelToken::new());
    let connection_string = connection_string.to_string();
    let sql = sql.to_string();
    let params = params.to_vec();
    let config = config.clone();
    QueryStream::spawn(options, move |mut sink, options| async move {
        run_once(
            cursor,
            &connection_string,
            &sql,
            &params,
            &mut sink,
            &config,
            &options,
        )
        .await
    })
}
