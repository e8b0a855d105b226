//! Driver configuration.

use std::time::Duration;

use serde::Deserialize;

use crate::binder::QuoteEscaping;
use crate::completion::{CancelToken, PollPolicy};
use crate::engine::QueryOptions;
use crate::error::{DriverError, DriverResult};

/// Default size of one column fragment served by the SQLite cursor.
pub const DEFAULT_FRAGMENT_SIZE: usize = 8192;

/// What one-shot helpers do when closing the cursor fails after the query
/// itself succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseErrorPolicy {
    /// Log the failure and return the query result.
    #[default]
    Suppress,
    /// Return the close failure instead of the result.
    Surface,
}

/// Driver configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    pub quote_escaping: QuoteEscaping,
    pub close_errors: CloseErrorPolicy,
    pub poll: PollPolicy,
    /// Maximum bytes per column fragment (SQLite cursor)
    pub fragment_size: usize,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            quote_escaping: QuoteEscaping::default(),
            close_errors: CloseErrorPolicy::default(),
            poll: PollPolicy::default(),
            fragment_size: DEFAULT_FRAGMENT_SIZE,
        }
    }
}

impl DriverConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a JSON document; missing fields take their defaults.
    pub fn from_json(json: &str) -> DriverResult<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| DriverError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> DriverResult<()> {
        if self.fragment_size == 0 {
            return Err(DriverError::Config(
                "fragment_size must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn quote_escaping(mut self, escaping: QuoteEscaping) -> Self {
        self.quote_escaping = escaping;
        self
    }

    pub fn close_errors(mut self, policy: CloseErrorPolicy) -> Self {
        self.close_errors = policy;
        self
    }

    pub fn op_timeout(mut self, timeout: Duration) -> Self {
        self.poll = self.poll.op_timeout(timeout);
        self
    }

    pub fn max_polls(mut self, max: u64) -> Self {
        self.poll = self.poll.max_polls(max);
        self
    }

    pub fn fragment_size(mut self, size: usize) -> Self {
        self.fragment_size = size;
        self
    }

    /// Options for one query under this configuration.
    pub fn query_options(&self, buffered: bool, cancel: CancelToken) -> QueryOptions {
        QueryOptions {
            escaping: self.quote_escaping,
            poll: self.poll,
            cancel,
            buffered,
            ..QueryOptions::default()
        }
    }
}
