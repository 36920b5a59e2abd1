//! Graph configuration.

use std::time::Duration;

use crate::error::{GraphError, ValidationError};

/// Tunables for one graph instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphConfig {
    /// How long a commit may wait for the writer lock before failing with
    /// `Timeout`.
    pub commit_timeout: Duration,
    /// Default deadline for terminal evaluation of a query. `None` means no
    /// deadline unless the caller sets one.
    pub query_timeout: Option<Duration>,
    /// Largest number of statements a single delta may carry.
    pub max_delta_statements: usize,
    /// Per-subscriber buffer of the commit feed.
    pub feed_capacity: usize,
    /// Whether the file-backed log fsyncs after every record.
    pub sync_on_write: bool,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            commit_timeout: Duration::from_secs(5),
            query_timeout: None,
            max_delta_statements: 100_000,
            feed_capacity: 1024,
            sync_on_write: true,
        }
    }
}

impl GraphConfig {
    /// Check the configuration, returning it unchanged when valid.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` for zero timeouts or zero limits.
    pub fn validate(self) -> Result<Self, GraphError> {
        if self.commit_timeout.is_zero() {
            return Err(invalid("commit_timeout must be greater than zero"));
        }
        if self.query_timeout.is_some_and(|t| t.is_zero()) {
            return Err(invalid("query_timeout must be greater than zero when set"));
        }
        if self.max_delta_statements == 0 {
            return Err(invalid("max_delta_statements must be at least 1"));
        }
        if self.feed_capacity == 0 {
            return Err(invalid("feed_capacity must be at least 1"));
        }
        Ok(self)
    }

    /// Config for tests and scratch graphs: no fsync.
    #[must_use]
    pub fn volatile() -> Self {
        Self {
            sync_on_write: false,
            ..Self::default()
        }
    }
}

fn invalid(reason: &str) -> GraphError {
    ValidationError::InvalidConfig {
        reason: reason.to_string(),
    }
    .into()
}
