//! Trend estimator: growth metrics over aggregated points.
//!
//! A [`Selection`] fixes the metric, algorithm and year window once; every
//! entity is then estimated with the same choice. Input is always
//! [`AggregatedPoint`], never raw records.

pub mod estimators;
pub mod market;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::aggregate::AggregatedPoint;

pub use estimators::{cagr, ols_slope, theil_sen_slope};
pub use market::{summarize, MarketSummary, MarketTrend, YearlyChange};

/// Minimum distinct years required for an estimate unless overridden.
pub const DEFAULT_MIN_YEARS: usize = 2;

/// Which aggregated value a trend is computed over.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Metric {
    #[default]
    Price,
    UnitPrice,
}

impl Metric {
    pub fn extract(&self, point: &AggregatedPoint) -> Option<f64> {
        match self {
            Self::Price => point.mean_price,
            Self::UnitPrice => point.mean_unit_price,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Price => "price",
            Self::UnitPrice => "unit-price",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Algorithm {
    /// Least-squares slope, in value units per year.
    #[default]
    Ols,
    /// Median pairwise slope, in value units per year.
    TheilSen,
    /// Compound annual growth rate, a per-year ratio.
    Cagr,
}

impl Algorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ols => "ols",
            Self::TheilSen => "theil-sen",
            Self::Cagr => "cagr",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inclusive year range. An inverted window selects nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct YearWindow {
    pub from: i32,
    pub to: i32,
}

impl YearWindow {
    pub fn new(from: i32, to: i32) -> Self {
        Self { from, to }
    }

    pub fn contains(&self, year: i32) -> bool {
        self.from <= year && year <= self.to
    }
}

/// One (metric, algorithm, window) choice applied to every entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Selection {
    pub metric: Metric,
    pub algorithm: Algorithm,
    pub window: YearWindow,
    pub min_years: usize,
}

impl Selection {
    pub fn new(metric: Metric, algorithm: Algorithm, window: YearWindow) -> Self {
        Self {
            metric,
            algorithm,
            window,
            min_years: DEFAULT_MIN_YEARS,
        }
    }

    pub fn with_min_years(mut self, min_years: usize) -> Self {
        self.min_years = min_years;
        self
    }
}

/// Why an entity has no trend value. Not an error; a typed empty result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Absence {
    /// Fewer distinct years in the window than required.
    #[error("insufficient-data")]
    InsufficientData,
    /// CAGR from a zero or negative starting value.
    #[error("non-positive-base")]
    NonPositiveBase,
    /// No spread in years to compute a slope or rate over.
    #[error("degenerate-years")]
    DegenerateYears,
    /// Computation overflowed to a non-finite value.
    #[error("non-finite")]
    NonFinite,
    /// Input spans several regions or repeats a year; group it first.
    #[error("mixed-entities")]
    MixedEntities,
}

impl Absence {
    pub fn reason(&self) -> &'static str {
        match self {
            Self::InsufficientData => "insufficient-data",
            Self::NonPositiveBase => "non-positive-base",
            Self::DegenerateYears => "degenerate-years",
            Self::NonFinite => "non-finite",
            Self::MixedEntities => "mixed-entities",
        }
    }
}

/// A trend value, or the reason there is none.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TrendValue {
    Present(f64),
    Absent(Absence),
}

impl TrendValue {
    pub fn value(&self) -> Option<f64> {
        match self {
            Self::Present(v) => Some(*v),
            Self::Absent(_) => None,
        }
    }

    pub fn absence(&self) -> Option<Absence> {
        match self {
            Self::Present(_) => None,
            Self::Absent(a) => Some(*a),
        }
    }
}

impl From<Result<f64, Absence>> for TrendValue {
    fn from(result: Result<f64, Absence>) -> Self {
        match result {
            Ok(v) => Self::Present(v),
            Err(a) => Self::Absent(a),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendResult {
    pub region_code: String,
    pub region_name: String,
    pub metric: Metric,
    pub algorithm: Algorithm,
    pub window: YearWindow,
    pub value: TrendValue,
}

/// `(year, value)` pairs for one entity: in-window, finite, sorted by year.
pub(crate) fn series<'a>(
    points: impl IntoIterator<Item = &'a AggregatedPoint>,
    metric: Metric,
    window: YearWindow,
) -> Vec<(i32, f64)> {
    let mut series: Vec<(i32, f64)> = points
        .into_iter()
        .filter(|p| window.contains(p.year))
        .filter_map(|p| metric.extract(p).map(|v| (p.year, v)))
        .filter(|(_, v)| v.is_finite())
        .collect();
    series.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.total_cmp(&b.1)));
    series
}

fn distinct_years(series: &[(i32, f64)]) -> usize {
    let mut count = 0;
    let mut last = None;
    for &(year, _) in series {
        if last != Some(year) {
            count += 1;
            last = Some(year);
        }
    }
    count
}

fn estimate_series(series: &[(i32, f64)], selection: &Selection) -> Result<f64, Absence> {
    let years = distinct_years(series);
    if years == 0 || years < selection.min_years {
        return Err(Absence::InsufficientData);
    }
    let value = match selection.algorithm {
        Algorithm::Ols => ols_slope(series)?,
        Algorithm::TheilSen => theil_sen_slope(series)?,
        Algorithm::Cagr => cagr(series)?,
    };
    if value.is_finite() {
        Ok(value)
    } else {
        Err(Absence::NonFinite)
    }
}

/// Estimate one entity's trend.
///
/// `points` must be one entity's aggregated series: a single region code
/// and at most one point per year. Anything else is
/// [`Absence::MixedEntities`]; use [`compute_trends`] for multi-region input.
pub fn estimate(points: &[AggregatedPoint], selection: &Selection) -> Result<f64, Absence> {
    if !is_single_entity(points) {
        return Err(Absence::MixedEntities);
    }
    let series = series(points, selection.metric, selection.window);
    estimate_series(&series, selection)
}

fn is_single_entity(points: &[AggregatedPoint]) -> bool {
    let Some(first) = points.first() else {
        return true;
    };
    let mut years = BTreeSet::new();
    points
        .iter()
        .all(|p| p.region_code == first.region_code && years.insert(p.year))
}

/// Estimate every region present in `points`, in region-code order.
pub fn compute_trends(points: &[AggregatedPoint], selection: &Selection) -> Vec<TrendResult> {
    by_region(points)
        .into_iter()
        .map(|(code, group)| {
            let series = series(group.iter().copied(), selection.metric, selection.window);
            TrendResult {
                region_code: code.to_string(),
                region_name: region_name(&group),
                metric: selection.metric,
                algorithm: selection.algorithm,
                window: selection.window,
                value: estimate_series(&series, selection).into(),
            }
        })
        .collect()
}

pub(crate) fn by_region(points: &[AggregatedPoint]) -> BTreeMap<&str, Vec<&AggregatedPoint>> {
    let mut groups: BTreeMap<&str, Vec<&AggregatedPoint>> = BTreeMap::new();
    for point in points {
        groups.entry(point.region_code.as_str()).or_default().push(point);
    }
    groups
}

/// Name from the latest year that has one.
pub(crate) fn region_name(group: &[&AggregatedPoint]) -> String {
    group
        .iter()
        .filter(|p| !p.region_name.is_empty())
        .max_by_key(|p| p.year)
        .map(|p| p.region_name.clone())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(code: &str, year: i32, price: Option<f64>) -> AggregatedPoint {
        AggregatedPoint {
            region_code: code.to_string(),
            region_name: format!("Region {code}"),
            year,
            mean_price: price,
            mean_unit_price: price.map(|p| p / 100.0),
            median_price: price,
            sample_count: 1,
        }
    }

    fn selection(algorithm: Algorithm, from: i32, to: i32) -> Selection {
        Selection::new(Metric::Price, algorithm, YearWindow::new(from, to))
    }

    #[test]
    fn absence_reasons() {
        assert_eq!(Absence::InsufficientData.reason(), "insufficient-data");
        assert_eq!(Absence::NonPositiveBase.to_string(), "non-positive-base");
        assert_eq!(
            serde_json::to_string(&Absence::DegenerateYears).unwrap(),
            "\"degenerate-years\""
        );
    }

    #[test]
    fn window_filters_points() {
        let points: Vec<_> = (2015..=2024)
            .map(|y| point("13101", y, Some(f64::from(y - 2000))))
            .collect();
        let s = series(&points, Metric::Price, YearWindow::new(2018, 2020));
        assert_eq!(s, vec![(2018, 18.0), (2019, 19.0), (2020, 20.0)]);
    }

    #[test]
    fn missing_and_non_finite_values_are_dropped() {
        let points = vec![
            point("13101", 2018, Some(1.0)),
            point("13101", 2019, None),
            point("13101", 2020, Some(f64::NAN)),
        ];
        assert_eq!(
            estimate(&points, &selection(Algorithm::Ols, 2018, 2020)),
            Err(Absence::InsufficientData)
        );
    }

    #[test]
    fn min_years_is_configurable() {
        let points: Vec<_> = (2018..=2020).map(|y| point("13101", y, Some(1.0))).collect();
        let strict = selection(Algorithm::Ols, 2018, 2020).with_min_years(4);
        assert_eq!(estimate(&points, &strict), Err(Absence::InsufficientData));
        let loose = selection(Algorithm::Ols, 2018, 2020).with_min_years(3);
        assert_eq!(estimate(&points, &loose), Ok(0.0));
    }

    #[test]
    fn inverted_window_is_insufficient() {
        let points: Vec<_> = (2018..=2020).map(|y| point("13101", y, Some(1.0))).collect();
        assert_eq!(
            estimate(&points, &selection(Algorithm::Cagr, 2020, 2018)),
            Err(Absence::InsufficientData)
        );
    }

    #[test]
    fn unit_price_metric() {
        let points: Vec<_> = (2018..=2020)
            .map(|y| point("13101", y, Some(f64::from(y - 2000) * 100.0)))
            .collect();
        let sel = Selection::new(Metric::UnitPrice, Algorithm::Ols, YearWindow::new(2018, 2020));
        let slope = estimate(&points, &sel).unwrap();
        assert!((slope - 1.0).abs() < 1e-9);
    }

    #[test]
    fn compute_trends_groups_by_region() {
        let mut points: Vec<_> = (2018..=2020)
            .map(|y| point("13101", y, Some(f64::from(y))))
            .collect();
        points.push(point("13102", 2020, Some(5.0)));
        points.push(point("01100", 2018, Some(10.0)));
        points.push(point("01100", 2020, Some(6.0)));

        let results = compute_trends(&points, &selection(Algorithm::Ols, 2018, 2020));
        let codes: Vec<_> = results.iter().map(|r| r.region_code.as_str()).collect();
        assert_eq!(codes, vec!["01100", "13101", "13102"]);
        assert!((results[0].value.value().unwrap() + 2.0).abs() < 1e-9);
        assert!((results[1].value.value().unwrap() - 1.0).abs() < 1e-9);
        assert_eq!(results[2].value, TrendValue::Absent(Absence::InsufficientData));
        assert_eq!(results[1].region_name, "Region 13101");
        assert_eq!(results[1].algorithm, Algorithm::Ols);
    }

    #[test]
    fn estimate_rejects_points_from_several_regions() {
        // Each region alone is flat; interleaved they would fake a slope.
        let mut points: Vec<_> = (2018..=2020).map(|y| point("13101", y, Some(1.0))).collect();
        points.extend((2018..=2020).map(|y| point("13102", y, Some(1.0e6))));
        for algorithm in [Algorithm::Ols, Algorithm::TheilSen, Algorithm::Cagr] {
            assert_eq!(
                estimate(&points, &selection(algorithm, 2018, 2020)),
                Err(Absence::MixedEntities)
            );
        }
        assert_eq!(Absence::MixedEntities.reason(), "mixed-entities");
    }

    #[test]
    fn estimate_rejects_repeated_years() {
        let points = vec![
            point("13101", 2018, Some(100.0)),
            point("13101", 2019, Some(110.0)),
            point("13101", 2019, Some(900.0)),
        ];
        assert_eq!(
            estimate(&points, &selection(Algorithm::Ols, 2018, 2020)),
            Err(Absence::MixedEntities)
        );
    }

    #[test]
    fn trend_value_serializes_with_reason() {
        let json = serde_json::to_string(&TrendValue::Absent(Absence::InsufficientData)).unwrap();
        assert_eq!(json, r#"{"absent":"insufficient-data"}"#);
    }
}
