//! Completion adapter.
//!
//! Cursor operations may answer "not finished yet". [`Completer`] hides that
//! from every higher layer: it re-issues the same operation with the same
//! arguments until the cursor reports a final result, yielding to the
//! scheduler between attempts.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::trace;

use crate::cursor::{ColumnChunk, ColumnMeta, Cursor, CursorError};
use crate::error::{DriverError, DriverResult};

/// Outcome of a single cursor call.
#[derive(Debug, Clone, PartialEq)]
pub enum Completion<T> {
    /// Not finished; call again with the same arguments.
    Pending,
    /// Final result.
    Ready(Result<T, CursorError>),
}

impl<T> Completion<T> {
    pub fn ok(value: T) -> Self {
        Completion::Ready(Ok(value))
    }

    pub fn err(error: CursorError) -> Self {
        Completion::Ready(Err(error))
    }

    #[inline]
    pub fn is_pending(&self) -> bool {
        matches!(self, Completion::Pending)
    }
}

impl<T> From<Result<T, CursorError>> for Completion<T> {
    fn from(result: Result<T, CursorError>) -> Self {
        Completion::Ready(result)
    }
}

/// Cancellation flag shared between a query and whoever may abandon it.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub(crate) fn check(&self) -> DriverResult<()> {
        if self.is_cancelled() {
            Err(DriverError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Bounds on how long one logical cursor operation may stay pending.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PollPolicy {
    /// Deadline for one logical operation, re-polls included.
    pub op_timeout_ms: Option<u64>,
    /// Maximum number of re-polls after a pending answer.
    pub max_polls: Option<u64>,
}

impl PollPolicy {
    pub fn op_timeout(mut self, timeout: Duration) -> Self {
        self.op_timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    pub fn max_polls(mut self, max: u64) -> Self {
        self.max_polls = Some(max);
        self
    }

    fn timeout(&self) -> Option<Duration> {
        self.op_timeout_ms.map(Duration::from_millis)
    }
}

/// Poll bookkeeping for one logical operation.
struct Attempt {
    operation: &'static str,
    policy: PollPolicy,
    /// `None` for operations that run to completion even when cancelled
    cancel: Option<CancelToken>,
    polls: u64,
}

impl Attempt {
    /// Issue one call and settle its completion: the final value, or `None`
    /// to poll again.
    async fn poll<T>(
        &mut self,
        call: impl Future<Output = Completion<T>>,
    ) -> DriverResult<Option<T>> {
        if let Some(cancel) = &self.cancel {
            cancel.check()?;
        }
        match call.await {
            Completion::Ready(result) => result.map(Some).map_err(DriverError::from),
            Completion::Pending => {
                self.polls += 1;
                if let Some(max) = self.policy.max_polls {
                    if self.polls > max {
                        return Err(DriverError::PollLimitExceeded {
                            operation: self.operation,
                            polls: self.polls,
                        });
                    }
                }
                trace!(operation = self.operation, polls = self.polls, "cursor pending, re-polling");
                tokio::task::yield_now().await;
                Ok(None)
            }
        }
    }
}

async fn within<T>(
    policy: PollPolicy,
    operation: &'static str,
    fut: impl Future<Output = DriverResult<T>>,
) -> DriverResult<T> {
    match policy.timeout() {
        Some(deadline) => tokio::time::timeout(deadline, fut)
            .await
            .map_err(|_| DriverError::Timeout { operation })?,
        None => fut.await,
    }
}

/// Re-issue `$call` until it completes, under the adapter's poll policy.
macro_rules! drive {
    ($self:ident, $operation:literal, $cancellable:expr, |$cursor:ident| $call:expr) => {{
        let mut attempt = $self.attempt($operation, $cancellable);
        let $cursor = &mut *$self.cursor;
        within($self.policy, $operation, async move {
            loop {
                match attempt.poll($call).await {
                    Ok(Some(value)) => return Ok(value),
                    Ok(None) => {}
                    Err(e) => return Err(e),
                }
            }
        })
        .await
    }};
}

/// Drives cursor operations to their final completion.
pub struct Completer<'a, C: ?Sized> {
    cursor: &'a mut C,
    policy: PollPolicy,
    cancel: CancelToken,
}

impl<'a, C: Cursor + ?Sized> Completer<'a, C> {
    pub fn new(cursor: &'a mut C, policy: PollPolicy, cancel: CancelToken) -> Self {
        Self {
            cursor,
            policy,
            cancel,
        }
    }

    fn attempt(&self, operation: &'static str, cancellable: bool) -> Attempt {
        Attempt {
            operation,
            policy: self.policy,
            cancel: cancellable.then(|| self.cancel.clone()),
            polls: 0,
        }
    }

    pub async fn open(&mut self, connection_string: &str) -> DriverResult<()> {
        drive!(self, "open", true, |cursor| cursor.open(connection_string))
    }

    /// Closing is never abandoned on cancellation.
    pub async fn close(&mut self) -> DriverResult<()> {
        drive!(self, "close", false, |cursor| cursor.close())
    }

    pub async fn query(&mut self, sql: &str) -> DriverResult<Vec<ColumnMeta>> {
        drive!(self, "query", true, |cursor| cursor.query(sql))
    }

    pub async fn read_row(&mut self) -> DriverResult<bool> {
        drive!(self, "read_row", true, |cursor| cursor.read_row())
    }

    pub async fn read_column(&mut self, index: usize) -> DriverResult<ColumnChunk> {
        drive!(self, "read_column", true, |cursor| cursor.read_column(index))
    }
}
