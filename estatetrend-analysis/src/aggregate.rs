//! Aggregator: raw transaction records to one point per (region, year).

use std::collections::BTreeMap;

use estatetrend_core::RawRecord;
use serde::{Deserialize, Serialize};

/// Canonical per-municipality, per-year summary.
///
/// The only input type accepted by the trend estimator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedPoint {
    pub region_code: String,
    pub region_name: String,
    pub year: i32,
    /// Mean of finite trade prices; `None` when the group has none.
    pub mean_price: Option<f64>,
    /// Mean of finite unit prices; `None` when the group has none.
    pub mean_unit_price: Option<f64>,
    pub median_price: Option<f64>,
    /// Records in the group, including those with missing prices.
    pub sample_count: usize,
}

#[derive(Default)]
struct Group<'a> {
    name: Option<&'a str>,
    prices: Vec<f64>,
    unit_prices: Vec<f64>,
    count: usize,
}

/// Group records by (region code, year) and summarize each group.
///
/// Non-finite values are dropped before averaging. Output is sorted by
/// (region code, year) and does not depend on input order.
pub fn aggregate(records: &[RawRecord]) -> Vec<AggregatedPoint> {
    let mut groups: BTreeMap<(&str, i32), Group<'_>> = BTreeMap::new();

    for record in records {
        let group = groups
            .entry((record.region_code.as_str(), record.year))
            .or_default();
        group.count += 1;
        if !record.region_name.is_empty() {
            group.name = Some(match group.name {
                Some(current) if current <= record.region_name.as_str() => current,
                _ => record.region_name.as_str(),
            });
        }
        if record.has_price() {
            group.prices.push(record.price);
        }
        if record.has_unit_price() {
            group.unit_prices.push(record.unit_price);
        }
    }

    groups
        .into_iter()
        .map(|((code, year), mut group)| AggregatedPoint {
            region_code: code.to_string(),
            region_name: group.name.unwrap_or_default().to_string(),
            year,
            mean_price: mean(&group.prices),
            mean_unit_price: mean(&group.unit_prices),
            median_price: median(&mut group.prices),
            sample_count: group.count,
        })
        .collect()
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        Some((values[mid - 1] + values[mid]) / 2.0)
    } else {
        Some(values[mid])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn rec(code: &str, name: &str, year: i32, price: f64, unit: f64) -> RawRecord {
        RawRecord {
            region_code: code.to_string(),
            region_name: name.to_string(),
            price,
            unit_price: unit,
            year,
        }
    }

    #[test]
    fn empty_input() {
        assert!(aggregate(&[]).is_empty());
    }

    #[test]
    fn means_and_counts_per_group() {
        let records = vec![
            rec("13101", "Chiyoda", 2020, 100.0, 10.0),
            rec("13101", "Chiyoda", 2020, 300.0, 30.0),
            rec("13101", "Chiyoda", 2021, 500.0, 50.0),
            rec("13102", "Chuo", 2020, 200.0, 20.0),
        ];
        let points = aggregate(&records);
        assert_eq!(points.len(), 3);

        let first = &points[0];
        assert_eq!((first.region_code.as_str(), first.year), ("13101", 2020));
        assert_eq!(first.mean_price, Some(200.0));
        assert_eq!(first.mean_unit_price, Some(20.0));
        assert_eq!(first.median_price, Some(200.0));
        assert_eq!(first.sample_count, 2);

        assert_eq!(points[1].year, 2021);
        assert_eq!(points[2].region_code, "13102");
    }

    #[test]
    fn non_finite_values_are_dropped_before_averaging() {
        let records = vec![
            rec("13101", "Chiyoda", 2020, 100.0, f64::NAN),
            rec("13101", "Chiyoda", 2020, f64::NAN, f64::NAN),
            rec("13101", "Chiyoda", 2020, 200.0, f64::INFINITY),
        ];
        let points = aggregate(&records);
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].mean_price, Some(150.0));
        assert_eq!(points[0].mean_unit_price, None);
        assert_eq!(points[0].sample_count, 3);
    }

    #[test]
    fn median_of_even_and_odd_groups() {
        let odd = aggregate(&[
            rec("01100", "", 2020, 1.0, 1.0),
            rec("01100", "", 2020, 9.0, 1.0),
            rec("01100", "", 2020, 4.0, 1.0),
        ]);
        assert_eq!(odd[0].median_price, Some(4.0));

        let even = aggregate(&[
            rec("01100", "", 2020, 1.0, 1.0),
            rec("01100", "", 2020, 9.0, 1.0),
            rec("01100", "", 2020, 4.0, 1.0),
            rec("01100", "", 2020, 6.0, 1.0),
        ]);
        assert_eq!(even[0].median_price, Some(5.0));
    }

    #[test]
    fn region_name_is_order_independent() {
        let a = rec("13101", "Chiyoda-ku", 2020, 1.0, 1.0);
        let b = rec("13101", "Chiyoda", 2020, 2.0, 1.0);
        let c = rec("13101", "", 2020, 3.0, 1.0);
        let forward = aggregate(&[a.clone(), b.clone(), c.clone()]);
        let backward = aggregate(&[c, b, a]);
        assert_eq!(forward, backward);
        assert_eq!(forward[0].region_name, "Chiyoda");
    }

    // ── Invariants ───────────────────────────────────────────────────

    fn arb_record() -> impl Strategy<Value = RawRecord> {
        (
            prop::sample::select(vec!["13101", "13102", "27100"]),
            2015i32..2020,
            prop_oneof![Just(f64::NAN), 1.0f64..1e8],
            prop_oneof![Just(f64::NAN), 1.0f64..1e6],
        )
            .prop_map(|(code, year, price, unit)| rec(code, "name", year, price, unit))
    }

    proptest! {
        #[test]
        fn no_region_year_pair_repeats(records in prop::collection::vec(arb_record(), 0..200)) {
            let points = aggregate(&records);
            for pair in points.windows(2) {
                prop_assert!(
                    (pair[0].region_code.as_str(), pair[0].year)
                        < (pair[1].region_code.as_str(), pair[1].year)
                );
            }
            let total: usize = points.iter().map(|p| p.sample_count).sum();
            prop_assert_eq!(total, records.len());
        }

        #[test]
        fn input_order_is_irrelevant(records in prop::collection::vec(arb_record(), 0..60)) {
            let mut reversed = records.clone();
            reversed.reverse();
            let a = aggregate(&records);
            let b = aggregate(&reversed);
            prop_assert_eq!(a.len(), b.len());
            for (x, y) in a.iter().zip(&b) {
                prop_assert_eq!(&x.region_code, &y.region_code);
                prop_assert_eq!(x.year, y.year);
                prop_assert_eq!(x.sample_count, y.sample_count);
                prop_assert_eq!(x.median_price, y.median_price);
                match (x.mean_price, y.mean_price) {
                    (Some(p), Some(q)) => prop_assert!((p - q).abs() <= 1e-6 * p.abs().max(1.0)),
                    (p, q) => prop_assert_eq!(p, q),
                }
            }
        }
    }
}
