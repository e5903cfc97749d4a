//! Outlier-resistant domain bound and diverging color scale.

use serde::{Deserialize, Serialize};

/// Percentile of `|value|` used as the color domain bound.
pub const DOMAIN_PERCENTILE: f64 = 95.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// `#rrggbb`
    pub fn to_hex(&self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }

    /// Per-channel linear interpolation, `t` in `[0, 1]`.
    pub fn lerp(self, other: Rgb, t: f64) -> Rgb {
        let t = t.clamp(0.0, 1.0);
        let channel = |a: u8, b: u8| {
            let v = f64::from(a) + (f64::from(b) - f64::from(a)) * t;
            v.round().clamp(0.0, 255.0) as u8
        };
        Rgb::new(
            channel(self.r, other.r),
            channel(self.g, other.g),
            channel(self.b, other.b),
        )
    }
}

pub const NEGATIVE_ANCHOR: Rgb = Rgb::new(0x21, 0x66, 0xac);
pub const NEUTRAL_ANCHOR: Rgb = Rgb::new(0xf7, 0xf7, 0xf7);
pub const POSITIVE_ANCHOR: Rgb = Rgb::new(0xb2, 0x18, 0x2b);
/// Marker for entities without a trend value.
pub const EXCLUDED_COLOR: Rgb = Rgb::new(0xbd, 0xbd, 0xbd);

/// 95th percentile of `|v|` over the finite values.
///
/// Fewer than two values fall back to the largest `|v|`, or 1.0 when there
/// are none. A zero or non-finite bound also becomes 1.0.
pub fn domain_bound(values: &[f64]) -> f64 {
    let mut magnitudes: Vec<f64> = values
        .iter()
        .filter(|v| v.is_finite())
        .map(|v| v.abs())
        .collect();
    magnitudes.sort_by(f64::total_cmp);

    let bound = match magnitudes.len() {
        0 => 1.0,
        1 => magnitudes[0],
        _ => percentile_sorted(&magnitudes, DOMAIN_PERCENTILE),
    };
    if bound.is_finite() && bound > 0.0 {
        bound
    } else {
        1.0
    }
}

/// Linear-interpolated percentile of ascending `sorted`, `p` in `[0, 100]`.
pub fn percentile_sorted(sorted: &[f64], p: f64) -> f64 {
    let n = sorted.len();
    if n == 0 {
        return 0.0;
    }
    if n == 1 {
        return sorted[0];
    }
    let rank = (p / 100.0) * (n - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = (lo + 1).min(n - 1);
    let frac = rank - lo as f64;
    sorted[lo] * (1.0 - frac) + sorted[hi] * frac
}

/// Diverging scale: negative anchor at -1, neutral at 0, positive at +1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ColorScale {
    bound: f64,
    pub negative: Rgb,
    pub neutral: Rgb,
    pub positive: Rgb,
}

impl ColorScale {
    /// Scale with the default anchors. An unusable bound becomes 1.0.
    pub fn new(bound: f64) -> Self {
        Self {
            bound: if bound.is_finite() && bound > 0.0 {
                bound
            } else {
                1.0
            },
            negative: NEGATIVE_ANCHOR,
            neutral: NEUTRAL_ANCHOR,
            positive: POSITIVE_ANCHOR,
        }
    }

    /// Scale bounded by [`domain_bound`] of `values`.
    pub fn from_values(values: &[f64]) -> Self {
        Self::new(domain_bound(values))
    }

    pub fn with_anchors(mut self, negative: Rgb, neutral: Rgb, positive: Rgb) -> Self {
        self.negative = negative;
        self.neutral = neutral;
        self.positive = positive;
        self
    }

    pub fn bound(&self) -> f64 {
        self.bound
    }

    /// `clamp(v / bound, -1, 1)`; NaN maps to 0.
    pub fn normalize(&self, value: f64) -> f64 {
        if value.is_nan() {
            return 0.0;
        }
        (value / self.bound).clamp(-1.0, 1.0)
    }

    pub fn color(&self, value: f64) -> Rgb {
        let t = self.normalize(value);
        if t < 0.0 {
            self.neutral.lerp(self.negative, -t)
        } else {
            self.neutral.lerp(self.positive, t)
        }
    }

    /// Color for an optional value; `None` is [`EXCLUDED_COLOR`].
    pub fn color_or_excluded(&self, value: Option<f64>) -> Rgb {
        value.map_or(EXCLUDED_COLOR, |v| self.color(v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn hex_formatting() {
        assert_eq!(Rgb::new(0, 15, 255).to_hex(), "#000fff");
        assert_eq!(EXCLUDED_COLOR.to_hex(), "#bdbdbd");
    }

    #[test]
    fn percentile_interpolates() {
        let sorted = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(percentile_sorted(&sorted, 50.0), 3.0);
        assert_eq!(percentile_sorted(&sorted, 100.0), 5.0);
        assert!((percentile_sorted(&sorted, 95.0) - 4.8).abs() < 1e-12);
        assert_eq!(percentile_sorted(&[], 95.0), 0.0);
    }

    #[test]
    fn bound_is_95th_percentile_of_magnitudes() {
        // |v| sorted: 1..=20 → rank 0.95 * 19 = 18.05 → 19.05.
        let values: Vec<f64> = (1..=20)
            .map(|i| if i % 2 == 0 { f64::from(i) } else { -f64::from(i) })
            .collect();
        assert!((domain_bound(&values) - 19.05).abs() < 1e-9);
    }

    #[test]
    fn bound_clips_a_single_outlier() {
        let mut values = vec![1.0; 99];
        values.push(1_000.0);
        assert!(domain_bound(&values) < 2.0);
    }

    #[test]
    fn bound_fallbacks() {
        assert_eq!(domain_bound(&[]), 1.0);
        assert_eq!(domain_bound(&[-4.0]), 4.0);
        assert_eq!(domain_bound(&[0.0]), 1.0);
        assert_eq!(domain_bound(&[0.0, 0.0, 0.0]), 1.0);
        assert_eq!(domain_bound(&[f64::NAN, f64::INFINITY]), 1.0);
    }

    #[test]
    fn value_at_bound_normalizes_to_one() {
        let scale = ColorScale::new(2.5);
        assert_eq!(scale.normalize(2.5), 1.0);
        assert_eq!(scale.normalize(-2.5), -1.0);
        assert_eq!(scale.normalize(10.0), 1.0);
        assert_eq!(scale.normalize(0.0), 0.0);
        assert_eq!(scale.normalize(f64::NAN), 0.0);
    }

    #[test]
    fn anchors_at_extremes_and_midpoint() {
        let scale = ColorScale::new(1.0);
        assert_eq!(scale.color(0.0), NEUTRAL_ANCHOR);
        assert_eq!(scale.color(1.0), POSITIVE_ANCHOR);
        assert_eq!(scale.color(-3.0), NEGATIVE_ANCHOR);
        assert_eq!(scale.color_or_excluded(None), EXCLUDED_COLOR);
    }

    #[test]
    fn halfway_interpolates_channels() {
        let scale = ColorScale::new(1.0).with_anchors(
            Rgb::new(0, 0, 0),
            Rgb::new(100, 100, 100),
            Rgb::new(200, 0, 100),
        );
        assert_eq!(scale.color(0.5), Rgb::new(150, 50, 100));
        assert_eq!(scale.color(-0.5), Rgb::new(50, 50, 50));
    }

    #[test]
    fn bad_bound_is_replaced() {
        assert_eq!(ColorScale::new(0.0).bound(), 1.0);
        assert_eq!(ColorScale::new(f64::NAN).bound(), 1.0);
        assert_eq!(ColorScale::new(-2.0).bound(), 1.0);
    }

    proptest! {
        #[test]
        fn normalized_values_stay_in_range(
            values in prop::collection::vec(-1e9f64..1e9, 0..50),
            probe in -1e10f64..1e10,
        ) {
            let scale = ColorScale::from_values(&values);
            prop_assert!(scale.bound() > 0.0);
            let t = scale.normalize(probe);
            prop_assert!((-1.0..=1.0).contains(&t));
        }
    }
}
