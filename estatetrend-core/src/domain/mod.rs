//! Domain types for the ingestion engine

pub mod key;
pub mod record;

pub use key::{KeyError, RequestKey, CLASSIFICATIONS, MAX_YEAR, MIN_YEAR};
pub use record::RawRecord;
