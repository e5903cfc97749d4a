//! Data ingestion: transport, caching, throttling and fetch orchestration

pub mod backoff;
pub mod cache;
pub mod download;
pub mod mlit;
pub mod provider;
pub mod rate_limit;
pub mod single_flight;

pub use backoff::RetryPolicy;
pub use cache::{CacheEntry, CacheError, CacheStore, FileCache, MemoryCache};
pub use download::{
    BatchOptions, BatchReport, CancelToken, FetchFailure, FetchOrchestrator, FetchSource,
    FetchState, KeyOutcome, KeyResult,
};
pub use mlit::{parse_payload, MlitTransport};
pub use provider::{FetchError, FetchProgress, Fetched, LogProgress, NoProgress, Transport};
pub use rate_limit::{TokenBucket, MIN_RATE_PER_SEC};
pub use single_flight::{Flight, SingleFlight};
