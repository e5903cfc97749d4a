//! Fetch orchestrator: bounded-concurrency batch fetching over a cache.
//!
//! Per key: `Pending → InFlight → (Succeeded | Retrying → InFlight | Failed)`.
//! Keys already in the cache go straight to `Succeeded`. Everything else is
//! queued for a pool of worker threads which, per attempt, wait on the shared
//! token bucket, call the transport once, and either store the payload or
//! back off and retry. Workers never touch the result map: they send
//! `(key, event)` messages to the collector, which owns it.
//!
//! Concurrent requests for the same key (from any batch sharing this
//! orchestrator) collapse onto one in-flight call via [`SingleFlight`].
//!
//! Cancelling a batch makes the collector return immediately. Workers still
//! running are detached; whatever they fetch afterwards is dropped and not
//! written to the cache. Entries stored before the cancel stay valid.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use super::backoff::RetryPolicy;
use super::cache::{CacheEntry, CacheStore};
use super::mlit::parse_payload;
use super::provider::{FetchError, FetchProgress, Transport};
use super::rate_limit::TokenBucket;
use super::single_flight::SingleFlight;
use crate::config::FetchConfig;
use crate::domain::{RawRecord, RequestKey};

/// How often the collector and sleeping workers look at the cancel flag.
const CANCEL_POLL: Duration = Duration::from_millis(25);

/// Lifecycle of one key within a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchState {
    Pending,
    InFlight { attempt: u32 },
    Retrying {
        attempt: u32,
        delay: Duration,
        error: FetchError,
    },
    Succeeded,
    Failed,
}

impl FetchState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, FetchState::Succeeded | FetchState::Failed)
    }
}

/// Where a successful result came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchSource {
    Cache,
    Network,
    /// Joined another caller's in-flight fetch for the same key.
    Joined,
}

#[derive(Debug, Clone, PartialEq)]
pub struct KeyOutcome {
    pub records: Vec<RawRecord>,
    /// Raw upstream body, identical whether served from network or cache.
    pub payload: Arc<str>,
    pub source: FetchSource,
    /// Transport calls made for this key (0 for cache hits).
    pub attempts: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FetchFailure {
    pub error: FetchError,
    pub attempts: u32,
}

pub type KeyResult = Result<KeyOutcome, FetchFailure>;

/// Cooperative cancellation flag shared between a caller and its batch.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Default)]
pub struct BatchOptions {
    /// Skip cache reads and replace the stored entry on success.
    pub force_refresh: bool,
}

/// Everything a batch produced. Never raised as an error.
#[derive(Debug, Clone)]
pub struct BatchReport {
    pub results: BTreeMap<RequestKey, KeyResult>,
    /// Terminal state per key: `Succeeded` or `Failed`.
    pub states: BTreeMap<RequestKey, FetchState>,
    pub cache_hits: usize,
    pub cancelled: bool,
    pub elapsed: Duration,
}

impl BatchReport {
    pub fn total(&self) -> usize {
        self.results.len()
    }

    pub fn succeeded(&self) -> usize {
        self.results.values().filter(|r| r.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.total() - self.succeeded()
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed() == 0
    }

    /// Failed keys with their reasons, in key order.
    pub fn failures(&self) -> Vec<(&RequestKey, &FetchFailure)> {
        self.results
            .iter()
            .filter_map(|(key, result)| result.as_ref().err().map(|f| (key, f)))
            .collect()
    }

    /// All records from successful keys, in key order.
    pub fn records(&self) -> Vec<RawRecord> {
        self.results
            .values()
            .filter_map(|r| r.as_ref().ok())
            .flat_map(|outcome| outcome.records.iter().cloned())
            .collect()
    }
}

enum WorkerEvent {
    State(RequestKey, FetchState),
    Done(RequestKey, KeyResult),
}

struct Shared {
    transport: Arc<dyn Transport>,
    cache: Arc<dyn CacheStore>,
    limiter: TokenBucket,
    retry: RetryPolicy,
    flights: SingleFlight<RequestKey, KeyResult>,
    concurrency: usize,
}

/// Batch fetcher over a transport and a cache store.
///
/// Cheap to clone; clones share the limiter, the cache and the single-flight
/// registry.
#[derive(Clone)]
pub struct FetchOrchestrator {
    shared: Arc<Shared>,
}

impl FetchOrchestrator {
    /// `config` is expected to have passed [`FetchConfig::validate`]; an
    /// out-of-range rate is clamped by the limiter rather than rejected.
    pub fn new(
        transport: Arc<dyn Transport>,
        cache: Arc<dyn CacheStore>,
        config: &FetchConfig,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                transport,
                cache,
                limiter: TokenBucket::new(config.requests_per_second, config.burst),
                retry: RetryPolicy::from_config(config),
                flights: SingleFlight::new(),
                concurrency: config.concurrency.max(1),
            }),
        }
    }

    pub fn cache(&self) -> &Arc<dyn CacheStore> {
        &self.shared.cache
    }

    /// Resolve a single key on the calling thread (cache, then network).
    pub fn fetch_one(&self, key: &RequestKey, options: &BatchOptions) -> KeyResult {
        let cancel = CancelToken::new();
        if !options.force_refresh {
            if let Some(outcome) = self.shared.cached(key) {
                return Ok(outcome);
            }
        }
        self.shared
            .resolve_shared(key, options.force_refresh, &cancel, &|_: FetchState| {})
    }

    /// Fetch every key, best-effort. One key's failure never affects another.
    ///
    /// Duplicate keys collapse to one entry in the report.
    pub fn fetch_batch(
        &self,
        keys: &[RequestKey],
        options: &BatchOptions,
        progress: &dyn FetchProgress,
        cancel: &CancelToken,
    ) -> BatchReport {
        let started = Instant::now();
        let mut unique: Vec<RequestKey> = keys.to_vec();
        unique.sort();
        unique.dedup();
        let total = unique.len();

        let mut results: BTreeMap<RequestKey, KeyResult> = BTreeMap::new();
        let mut states: BTreeMap<RequestKey, FetchState> = BTreeMap::new();
        let mut queue: VecDeque<RequestKey> = VecDeque::new();
        let mut cache_hits = 0;

        for (i, key) in unique.into_iter().enumerate() {
            progress.on_start(&key, i, total);
            let hit = if options.force_refresh {
                None
            } else {
                self.shared.cached(&key)
            };
            match hit {
                Some(outcome) => {
                    cache_hits += 1;
                    progress.on_complete(&key, &Ok(outcome.records.len()));
                    states.insert(key.clone(), FetchState::Succeeded);
                    results.insert(key, Ok(outcome));
                }
                None => {
                    states.insert(key.clone(), FetchState::Pending);
                    queue.push_back(key);
                }
            }
        }

        let mut outstanding = queue.len();
        if outstanding > 0 && !cancel.is_cancelled() {
            let (tx, rx) = mpsc::channel();
            self.spawn_workers(queue, options.force_refresh, cancel, &tx);
            drop(tx);

            while outstanding > 0 && !cancel.is_cancelled() {
                match rx.recv_timeout(CANCEL_POLL) {
                    Ok(WorkerEvent::State(key, state)) => {
                        progress.on_state(&key, &state);
                        states.insert(key, state);
                    }
                    Ok(WorkerEvent::Done(key, result)) => {
                        outstanding -= 1;
                        let summary = result
                            .as_ref()
                            .map(|o| o.records.len())
                            .map_err(|f| f.error.clone());
                        progress.on_complete(&key, &summary);
                        let state = if result.is_ok() {
                            FetchState::Succeeded
                        } else {
                            FetchState::Failed
                        };
                        progress.on_state(&key, &state);
                        states.insert(key.clone(), state);
                        results.insert(key, result);
                    }
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
        }

        // Whatever is left was cancelled, or its worker died.
        let cancelled = cancel.is_cancelled();
        let unresolved: Vec<RequestKey> = states
            .iter()
            .filter(|(_, s)| !s.is_terminal())
            .map(|(k, _)| k.clone())
            .collect();
        for key in unresolved {
            let error = if cancelled {
                FetchError::Cancelled
            } else {
                FetchError::Transport("fetch worker exited before resolving key".into())
            };
            progress.on_complete(&key, &Err(error.clone()));
            states.insert(key.clone(), FetchState::Failed);
            results.insert(key, Err(FetchFailure { error, attempts: 0 }));
        }

        let report = BatchReport {
            results,
            states,
            cache_hits,
            cancelled,
            elapsed: started.elapsed(),
        };
        progress.on_batch_complete(report.succeeded(), report.failed(), report.total());
        report
    }

    fn spawn_workers(
        &self,
        queue: VecDeque<RequestKey>,
        force: bool,
        cancel: &CancelToken,
        tx: &Sender<WorkerEvent>,
    ) {
        let workers = self.shared.concurrency.min(queue.len());
        let queue = Arc::new(Mutex::new(queue));

        for id in 0..workers {
            let shared = Arc::clone(&self.shared);
            let queue = Arc::clone(&queue);
            let cancel = cancel.clone();
            let tx = tx.clone();
            let spawned = std::thread::Builder::new()
                .name(format!("fetch-worker-{id}"))
                .spawn(move || worker_loop(&shared, &queue, force, &cancel, &tx));
            if let Err(e) = spawned {
                tracing::error!(worker = id, error = %e, "failed to spawn fetch worker");
            }
        }
    }
}

fn worker_loop(
    shared: &Shared,
    queue: &Mutex<VecDeque<RequestKey>>,
    force: bool,
    cancel: &CancelToken,
    tx: &Sender<WorkerEvent>,
) {
    loop {
        if cancel.is_cancelled() {
            return;
        }
        let next = queue.lock().unwrap_or_else(|p| p.into_inner()).pop_front();
        let Some(key) = next else {
            return;
        };

        let report = |state: FetchState| {
            let _ = tx.send(WorkerEvent::State(key.clone(), state));
        };
        let result = shared.resolve_shared(&key, force, cancel, &report);

        if cancel.is_cancelled() {
            return;
        }
        if tx.send(WorkerEvent::Done(key, result)).is_err() {
            // Collector is gone.
            return;
        }
    }
}

impl Shared {
    /// Parse a cached entry, or `None` on a miss or an unreadable entry.
    fn cached(&self, key: &RequestKey) -> Option<KeyOutcome> {
        let entry = match self.cache.get(key) {
            Ok(Some(entry)) => entry,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "cache read failed, fetching instead");
                return None;
            }
        };
        match parse_payload(&entry.payload, key.year) {
            Ok(records) => Some(KeyOutcome {
                records,
                payload: Arc::from(entry.payload),
                source: FetchSource::Cache,
                attempts: 0,
            }),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "cached payload unreadable, fetching instead");
                None
            }
        }
    }

    /// Run (or join) the single in-flight fetch for `key`.
    fn resolve_shared(
        &self,
        key: &RequestKey,
        force: bool,
        cancel: &CancelToken,
        report: &dyn Fn(FetchState),
    ) -> KeyResult {
        loop {
            let flight = self
                .flights
                .run(key, || self.resolve(key, force, cancel, report));
            if !flight.shared {
                return flight.value;
            }
            match flight.value {
                // The leader's batch was cancelled, ours was not: go again.
                Err(FetchFailure {
                    error: FetchError::Cancelled,
                    ..
                }) if !cancel.is_cancelled() => continue,
                Ok(mut outcome) => {
                    if outcome.source == FetchSource::Network {
                        outcome.source = FetchSource::Joined;
                    }
                    return Ok(outcome);
                }
                other => return other,
            }
        }
    }

    /// Cache re-check, then attempt/backoff loop against the transport.
    fn resolve(
        &self,
        key: &RequestKey,
        force: bool,
        cancel: &CancelToken,
        report: &dyn Fn(FetchState),
    ) -> KeyResult {
        // Another flight may have stored this key since the batch was planned.
        if !force {
            if let Some(outcome) = self.cached(key) {
                return Ok(outcome);
            }
        }

        let mut attempt = 0;
        loop {
            // A token taken after cancellation is not spent on the network.
            if !self.limiter.acquire_until(|| cancel.is_cancelled()) || cancel.is_cancelled() {
                return Err(FetchFailure {
                    error: FetchError::Cancelled,
                    attempts: attempt,
                });
            }
            attempt += 1;
            report(FetchState::InFlight { attempt });
            tracing::debug!(key = %key, attempt, "requesting");

            match self.transport.execute(key) {
                Ok(fetched) => {
                    if cancel.is_cancelled() {
                        return Err(FetchFailure {
                            error: FetchError::Cancelled,
                            attempts: attempt,
                        });
                    }
                    self.store(key, &fetched.payload, force);
                    return Ok(KeyOutcome {
                        records: fetched.records,
                        payload: Arc::from(fetched.payload),
                        source: FetchSource::Network,
                        attempts: attempt,
                    });
                }
                Err(error) if error.is_retryable() && self.retry.should_retry(attempt) => {
                    let delay = self.retry.delay(attempt, error.retry_after());
                    tracing::debug!(
                        key = %key,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "retrying"
                    );
                    report(FetchState::Retrying {
                        attempt,
                        delay,
                        error,
                    });
                    sleep_unless_cancelled(delay, cancel);
                }
                Err(error) => {
                    tracing::warn!(key = %key, attempt, error = %error, "giving up");
                    return Err(FetchFailure {
                        error,
                        attempts: attempt,
                    });
                }
            }
        }
    }

    /// Persist a fresh payload. A failed write is logged, not fatal: the
    /// records are still good for this run.
    fn store(&self, key: &RequestKey, payload: &str, replace: bool) {
        if replace {
            if let Err(e) = self.cache.remove(key) {
                tracing::warn!(key = %key, error = %e, "could not drop stale cache entry");
            }
        }
        if let Err(e) = self
            .cache
            .put(CacheEntry::new(key.clone(), payload.to_string()))
        {
            tracing::warn!(key = %key, error = %e, "cache write failed");
        }
    }
}

fn sleep_unless_cancelled(total: Duration, cancel: &CancelToken) {
    let deadline = Instant::now() + total;
    loop {
        if cancel.is_cancelled() {
            return;
        }
        let now = Instant::now();
        if now >= deadline {
            return;
        }
        std::thread::sleep((deadline - now).min(CANCEL_POLL));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(FetchState::Succeeded.is_terminal());
        assert!(FetchState::Failed.is_terminal());
        assert!(!FetchState::Pending.is_terminal());
        assert!(!FetchState::InFlight { attempt: 1 }.is_terminal());
    }

    #[test]
    fn cancel_token_is_shared_between_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn cancelled_sleep_returns_early() {
        let token = CancelToken::new();
        token.cancel();
        let start = Instant::now();
        sleep_unless_cancelled(Duration::from_secs(5), &token);
        assert!(start.elapsed() < Duration::from_millis(100));
    }
}
