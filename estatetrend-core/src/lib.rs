//! estatetrend core: the ingestion engine.
//!
//! This crate turns a set of (year, region, classification) request keys into
//! parsed transaction records:
//! - Domain types (`RequestKey`, `RawRecord`) with input validation
//! - `FetchConfig` loaded from TOML
//! - Single-attempt HTTP transport for the MLIT transaction API
//! - Write-once cache stores (in-memory and on-disk)
//! - Token-bucket throttling, exponential backoff, single-flight de-duplication
//! - The batch fetch orchestrator with per-key state tracking and cancellation

pub mod config;
pub mod data;
pub mod domain;

pub use config::{ConfigError, FetchConfig};
pub use domain::{KeyError, RawRecord, RequestKey};
