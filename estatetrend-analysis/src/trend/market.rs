//! Market summary: year-over-year changes, CAGR and a coarse trend label.

use serde::{Deserialize, Serialize};

use super::{by_region, cagr, region_name, series, Metric, YearWindow};
use crate::aggregate::AggregatedPoint;

/// CAGR at or beyond ±3 % per year counts as a trend.
pub const TREND_THRESHOLD: f64 = 0.03;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MarketTrend {
    Uptrend,
    Downtrend,
    Flat,
    Unknown,
}

impl MarketTrend {
    pub fn classify(cagr: Option<f64>) -> Self {
        match cagr {
            Some(rate) if rate >= TREND_THRESHOLD => Self::Uptrend,
            Some(rate) if rate <= -TREND_THRESHOLD => Self::Downtrend,
            Some(_) => Self::Flat,
            None => Self::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct YearlyChange {
    pub year: i32,
    pub value: f64,
    /// Change against the previous listed year; `None` for the first year
    /// or when the previous value is not positive.
    pub yoy: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSummary {
    pub region_code: String,
    pub region_name: String,
    pub metric: Metric,
    pub window: YearWindow,
    pub yearly: Vec<YearlyChange>,
    pub average_yoy: Option<f64>,
    pub cagr: Option<f64>,
    pub trend: MarketTrend,
}

/// Per-region market summary over the window, in region-code order.
pub fn summarize(points: &[AggregatedPoint], metric: Metric, window: YearWindow) -> Vec<MarketSummary> {
    by_region(points)
        .into_iter()
        .map(|(code, group)| {
            let series = series(group.iter().copied(), metric, window);
            let yearly = yearly_changes(&series);
            let changes: Vec<f64> = yearly.iter().filter_map(|c| c.yoy).collect();
            let average_yoy = if changes.is_empty() {
                None
            } else {
                Some(changes.iter().sum::<f64>() / changes.len() as f64)
            };
            let cagr = cagr(&series).ok().filter(|r| r.is_finite());
            MarketSummary {
                region_code: code.to_string(),
                region_name: region_name(&group),
                metric,
                window,
                yearly,
                average_yoy,
                cagr,
                trend: MarketTrend::classify(cagr),
            }
        })
        .collect()
}

fn yearly_changes(series: &[(i32, f64)]) -> Vec<YearlyChange> {
    let mut previous: Option<f64> = None;
    series
        .iter()
        .map(|&(year, value)| {
            let yoy = previous
                .filter(|p| *p > 0.0)
                .map(|p| (value - p) / p);
            previous = Some(value);
            YearlyChange { year, value, yoy }
        })
        .collect()
}
