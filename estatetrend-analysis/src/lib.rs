//! estatetrend analysis: from fetched records to ranked, colored trends.
//!
//! This crate builds on `estatetrend-core` to provide:
//! - Aggregation of raw records into one point per (region, year)
//! - Trend estimation (OLS, Theil–Sen, CAGR) with typed absence
//! - Market summaries (year-over-year changes, trend classification)
//! - Top/bottom-N ranking and a percentile-bounded diverging color scale
//!
//! Everything here is pure and single-threaded.

pub mod aggregate;
pub mod ranking;
pub mod report;
pub mod scale;
pub mod trend;

pub use aggregate::{aggregate, AggregatedPoint};
pub use ranking::{ExcludedEntry, RankedEntry, Ranking};
pub use report::{EntityColor, SelectionReport};
pub use scale::{domain_bound, ColorScale, Rgb, EXCLUDED_COLOR};
pub use trend::{
    compute_trends, estimate, summarize, Absence, Algorithm, MarketSummary, MarketTrend, Metric,
    Selection, TrendResult, TrendValue, YearWindow,
};
