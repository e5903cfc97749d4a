//! Transport trait and structured fetch error types.
//!
//! The Transport trait abstracts over the upstream data source so the
//! orchestrator can be driven by the real HTTP client or by a scripted
//! transport in tests. A transport makes exactly one attempt per call; retry,
//! caching and throttling all live above it.

use super::download::FetchState;
use crate::domain::{RawRecord, RequestKey};
use std::time::Duration;
use thiserror::Error;

/// Structured error types for fetch operations.
///
/// `Transport` and `RateLimitOrServer` are retryable; everything else is
/// final for the key that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("upstream returned HTTP {status}")]
    RateLimitOrServer {
        status: u16,
        retry_after_secs: Option<u64>,
    },

    #[error("client error: HTTP {status}")]
    Client { status: u16 },

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("cache error: {0}")]
    Cache(String),

    #[error("batch cancelled before this key resolved")]
    Cancelled,
}

impl FetchError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FetchError::Transport(_) | FetchError::RateLimitOrServer { .. }
        )
    }

    /// Server-requested wait before the next attempt, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            FetchError::RateLimitOrServer {
                retry_after_secs: Some(secs),
                ..
            } => Some(Duration::from_secs(*secs)),
            _ => None,
        }
    }
}

/// Result of one successful transport call.
///
/// `payload` is the response body exactly as received; it is what the cache
/// stores. `records` is the parsed view of the same body.
#[derive(Debug, Clone, PartialEq)]
pub struct Fetched {
    pub payload: String,
    pub records: Vec<RawRecord>,
}

/// A single-attempt upstream call.
pub trait Transport: Send + Sync {
    /// Human-readable name of this transport.
    fn name(&self) -> &str;

    /// Perform one request for `key`. No retries.
    fn execute(&self, key: &RequestKey) -> Result<Fetched, FetchError>;
}

/// Progress callback for batch fetches.
///
/// Callbacks run on the collector thread, never on workers.
pub trait FetchProgress: Send + Sync {
    /// Called once per distinct key when the batch is planned.
    fn on_start(&self, key: &RequestKey, index: usize, total: usize);

    /// Called on every state transition reported by a worker.
    fn on_state(&self, _key: &RequestKey, _state: &FetchState) {}

    /// Called when a key reaches a terminal outcome.
    fn on_complete(&self, key: &RequestKey, result: &Result<usize, FetchError>);

    /// Called when the batch is done (or cancelled).
    fn on_batch_complete(&self, succeeded: usize, failed: usize, total: usize);
}

/// Progress reporter that emits `tracing` events.
pub struct LogProgress;

impl FetchProgress for LogProgress {
    fn on_start(&self, key: &RequestKey, index: usize, total: usize) {
        tracing::debug!(key = %key, "[{}/{}] queued", index + 1, total);
    }

    fn on_state(&self, key: &RequestKey, state: &FetchState) {
        tracing::debug!(key = %key, state = ?state, "state change");
    }

    fn on_complete(&self, key: &RequestKey, result: &Result<usize, FetchError>) {
        match result {
            Ok(records) => tracing::info!(key = %key, records, "fetched"),
            Err(e) => tracing::warn!(key = %key, error = %e, "fetch failed"),
        }
    }

    fn on_batch_complete(&self, succeeded: usize, failed: usize, total: usize) {
        tracing::info!(succeeded, failed, total, "batch complete");
    }
}

/// Progress reporter that does nothing.
pub struct NoProgress;

impl FetchProgress for NoProgress {
    fn on_start(&self, _key: &RequestKey, _index: usize, _total: usize) {}

    fn on_complete(&self, _key: &RequestKey, _result: &Result<usize, FetchError>) {}

    fn on_batch_complete(&self, _succeeded: usize, _failed: usize, _total: usize) {}
}
