//! The three estimators, over `(year, value)` series sorted by year.
//!
//! All are pure functions of the already-filtered series.

use super::Absence;

/// Least-squares slope of value on year.
pub fn ols_slope(series: &[(i32, f64)]) -> Result<f64, Absence> {
    if series.is_empty() {
        return Err(Absence::InsufficientData);
    }
    let n = series.len() as f64;
    let mean_x = series.iter().map(|&(y, _)| f64::from(y)).sum::<f64>() / n;
    let mean_y = series.iter().map(|&(_, v)| v).sum::<f64>() / n;

    let mut sxx = 0.0;
    let mut sxy = 0.0;
    for &(year, value) in series {
        let dx = f64::from(year) - mean_x;
        sxx += dx * dx;
        sxy += dx * (value - mean_y);
    }
    if sxx == 0.0 {
        return Err(Absence::DegenerateYears);
    }
    Ok(sxy / sxx)
}

/// Median of pairwise slopes over all pairs with distinct years.
pub fn theil_sen_slope(series: &[(i32, f64)]) -> Result<f64, Absence> {
    let mut slopes = Vec::with_capacity(series.len() * series.len().saturating_sub(1) / 2);
    for (i, &(yi, vi)) in series.iter().enumerate() {
        for &(yj, vj) in &series[i + 1..] {
            if yj != yi {
                slopes.push((vj - vi) / f64::from(yj - yi));
            }
        }
    }
    if slopes.is_empty() {
        return Err(Absence::DegenerateYears);
    }
    slopes.sort_by(f64::total_cmp);
    let mid = slopes.len() / 2;
    if slopes.len() % 2 == 0 {
        Ok((slopes[mid - 1] + slopes[mid]) / 2.0)
    } else {
        Ok(slopes[mid])
    }
}

/// Compound annual growth rate between the first and last points.
///
/// Undefined for a non-positive start or a negative end value.
pub fn cagr(series: &[(i32, f64)]) -> Result<f64, Absence> {
    let (Some(&(first_year, first)), Some(&(last_year, last))) = (series.first(), series.last())
    else {
        return Err(Absence::InsufficientData);
    };
    if first <= 0.0 || last < 0.0 {
        return Err(Absence::NonPositiveBase);
    }
    if last_year <= first_year {
        return Err(Absence::DegenerateYears);
    }
    Ok((last / first).powf(1.0 / f64::from(last_year - first_year)) - 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linear(a: f64, b: f64, years: std::ops::RangeInclusive<i32>) -> Vec<(i32, f64)> {
        years.map(|y| (y, a + b * f64::from(y))).collect()
    }

    #[test]
    fn ols_on_two_points() {
        let slope = ols_slope(&[(2018, 10.0), (2020, 20.0)]).unwrap();
        assert!((slope - 5.0).abs() < 1e-12);
    }

    #[test]
    fn ols_single_year_is_degenerate() {
        assert_eq!(
            ols_slope(&[(2020, 1.0), (2020, 2.0)]),
            Err(Absence::DegenerateYears)
        );
        assert_eq!(ols_slope(&[]), Err(Absence::InsufficientData));
    }

    #[test]
    fn theil_sen_odd_and_even_pair_counts() {
        // 3 points → 3 slopes: 1, 2, 3 → median 2.
        let s = theil_sen_slope(&[(0, 0.0), (1, 1.0), (2, 4.0)]);
        assert_eq!(s, Ok(2.0));
        // 4 points → 6 slopes.
        let s = linear(1.0, 3.0, 2010..=2013);
        assert!((theil_sen_slope(&s).unwrap() - 3.0).abs() < 1e-9);
    }

    #[test]
    fn theil_sen_skips_same_year_pairs() {
        let s = [(2020, 1.0), (2020, 5.0), (2021, 3.0)];
        // Pairs with distinct years: (1→3)=2, (5→3)=-2 → median 0.
        assert_eq!(theil_sen_slope(&s), Ok(0.0));
        assert_eq!(
            theil_sen_slope(&[(2020, 1.0), (2020, 2.0)]),
            Err(Absence::DegenerateYears)
        );
    }

    #[test]
    fn cagr_doubling_over_five_years() {
        let rate = cagr(&[(2015, 100.0), (2020, 200.0)]).unwrap();
        assert!((rate - (2f64.powf(0.2) - 1.0)).abs() < 1e-6);
        assert!((rate - 0.1487).abs() < 1e-4);
    }

    #[test]
    fn cagr_uses_first_and_last_only() {
        let rate = cagr(&[(2018, 100.0), (2019, 1.0), (2020, 121.0)]).unwrap();
        assert!((rate - 0.1).abs() < 1e-12);
    }

    #[test]
    fn cagr_rejects_non_positive_base() {
        assert_eq!(
            cagr(&[(2018, 0.0), (2020, 10.0)]),
            Err(Absence::NonPositiveBase)
        );
        assert_eq!(
            cagr(&[(2018, -5.0), (2020, 10.0)]),
            Err(Absence::NonPositiveBase)
        );
    }

    #[test]
    fn cagr_needs_a_year_span() {
        assert_eq!(cagr(&[(2020, 10.0)]), Err(Absence::DegenerateYears));
        assert_eq!(cagr(&[]), Err(Absence::InsufficientData));
    }

    #[test]
    fn declining_series_has_negative_rate() {
        let rate = cagr(&[(2020, 100.0), (2022, 81.0)]).unwrap();
        assert!((rate + 0.1).abs() < 1e-12);
    }
}
