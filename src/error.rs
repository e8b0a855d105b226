//! Error types for rowstream.
//!
//! Cursor failures are carried verbatim; everything else is raised by the
//! adapter layer itself.

use thiserror::Error;

pub use crate::cursor::CursorError;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DriverError {
    #[error(
        "Invalid parameter type at position {position}: {found}. Supported types: string, number, binary"
    )]
    InvalidParameterType { position: usize, found: &'static str },

    #[error("Cursor error: {0}")]
    Cursor(#[from] CursorError),

    #[error("Cursor operation '{operation}' timed out")]
    Timeout { operation: &'static str },

    #[error("Cursor operation '{operation}' still pending after {polls} polls")]
    PollLimitExceeded { operation: &'static str, polls: u64 },

    #[error("Query cancelled")]
    Cancelled,

    #[error("Connection is closed")]
    ConnectionClosed,

    #[error("Configuration error: {0}")]
    Config(String),
}

impl DriverError {
    /// The underlying cursor error, if this failure came from the cursor.
    pub fn cursor_error(&self) -> Option<&CursorError> {
        match self {
            DriverError::Cursor(e) => Some(e),
            _ => None,
        }
    }
}

pub type DriverResult<T> = std::result::Result<T, DriverError>;
