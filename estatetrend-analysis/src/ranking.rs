//! Ranking of trend results: top-N / bottom-N over present values.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::trend::{Absence, TrendResult, TrendValue};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedEntry {
    pub region_code: String,
    pub region_name: String,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExcludedEntry {
    pub region_code: String,
    pub region_name: String,
    pub reason: Absence,
}

/// Trend results for one selection, split into present and excluded.
#[derive(Debug, Clone, Default)]
pub struct Ranking {
    /// Descending by value, ties by region code.
    present: Vec<RankedEntry>,
    excluded: Vec<ExcludedEntry>,
}

fn descending(a: &RankedEntry, b: &RankedEntry) -> Ordering {
    b.value
        .total_cmp(&a.value)
        .then_with(|| a.region_code.cmp(&b.region_code))
}

fn ascending(a: &RankedEntry, b: &RankedEntry) -> Ordering {
    a.value
        .total_cmp(&b.value)
        .then_with(|| a.region_code.cmp(&b.region_code))
}

impl Ranking {
    pub fn new(results: &[TrendResult]) -> Self {
        let mut ranking = Self::default();
        for result in results {
            match result.value {
                TrendValue::Present(value) if value.is_finite() => {
                    ranking.present.push(RankedEntry {
                        region_code: result.region_code.clone(),
                        region_name: result.region_name.clone(),
                        value,
                    })
                }
                TrendValue::Present(_) => ranking.excluded.push(ExcludedEntry {
                    region_code: result.region_code.clone(),
                    region_name: result.region_name.clone(),
                    reason: Absence::NonFinite,
                }),
                TrendValue::Absent(reason) => ranking.excluded.push(ExcludedEntry {
                    region_code: result.region_code.clone(),
                    region_name: result.region_name.clone(),
                    reason,
                }),
            }
        }
        ranking.present.sort_by(descending);
        ranking
            .excluded
            .sort_by(|a, b| a.region_code.cmp(&b.region_code));
        ranking
    }

    /// Highest `n` values, best first.
    pub fn top(&self, n: usize) -> &[RankedEntry] {
        &self.present[..n.min(self.present.len())]
    }

    /// Lowest `n` values, worst first.
    pub fn bottom(&self, n: usize) -> Vec<&RankedEntry> {
        let mut sorted: Vec<&RankedEntry> = self.present.iter().collect();
        sorted.sort_by(|a, b| ascending(a, b));
        sorted.truncate(n);
        sorted
    }

    pub fn present(&self) -> &[RankedEntry] {
        &self.present
    }

    pub fn excluded(&self) -> &[ExcludedEntry] {
        &self.excluded
    }

    pub fn values(&self) -> Vec<f64> {
        self.present.iter().map(|e| e.value).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.present.is_empty() && self.excluded.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trend::{Algorithm, Metric, YearWindow};

    fn result(code: &str, value: TrendValue) -> TrendResult {
        TrendResult {
            region_code: code.to_string(),
            region_name: String::new(),
            metric: Metric::Price,
            algorithm: Algorithm::Ols,
            window: YearWindow::new(2018, 2024),
            value,
        }
    }

    fn codes<'a>(entries: impl IntoIterator<Item = &'a RankedEntry>) -> Vec<&'a str> {
        entries.into_iter().map(|e| e.region_code.as_str()).collect()
    }

    fn sample() -> Vec<TrendResult> {
        vec![
            result("13101", TrendValue::Present(5.0)),
            result("13102", TrendValue::Present(-2.0)),
            result("13103", TrendValue::Absent(Absence::InsufficientData)),
            result("13104", TrendValue::Present(1.0)),
            result("13105", TrendValue::Present(5.0)),
            result("13106", TrendValue::Present(f64::NAN)),
        ]
    }

    #[test]
    fn partitions_present_and_excluded() {
        let ranking = Ranking::new(&sample());
        assert_eq!(ranking.present().len(), 4);
        let excluded: Vec<_> = ranking
            .excluded()
            .iter()
            .map(|e| (e.region_code.as_str(), e.reason))
            .collect();
        assert_eq!(
            excluded,
            vec![
                ("13103", Absence::InsufficientData),
                ("13106", Absence::NonFinite)
            ]
        );
    }

    #[test]
    fn top_is_descending_with_code_tiebreak() {
        let ranking = Ranking::new(&sample());
        assert_eq!(codes(ranking.top(3)), vec!["13101", "13105", "13104"]);
        assert_eq!(ranking.top(100).len(), 4);
    }

    #[test]
    fn bottom_is_ascending_with_code_tiebreak() {
        let ranking = Ranking::new(&sample());
        assert_eq!(codes(ranking.bottom(2)), vec!["13102", "13104"]);
        assert_eq!(
            codes(ranking.bottom(4)),
            vec!["13102", "13104", "13101", "13105"]
        );
    }

    #[test]
    fn zero_n_and_empty_input() {
        let ranking = Ranking::new(&sample());
        assert!(ranking.top(0).is_empty());
        assert!(ranking.bottom(0).is_empty());
        let empty = Ranking::new(&[]);
        assert!(empty.is_empty());
        assert!(empty.top(5).is_empty());
    }
}
