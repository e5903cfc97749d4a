//! RequestKey: the unit of fetching, caching and de-duplication.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::RangeInclusive;
use thiserror::Error;

/// Earliest year the upstream API publishes transactions for.
pub const MIN_YEAR: i32 = 2005;
/// Latest year accepted in a request.
pub const MAX_YEAR: i32 = 2030;

/// Known price classifications: `01` transaction price, `02` contract price.
pub const CLASSIFICATIONS: [&str; 2] = ["01", "02"];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    #[error("area code '{0}' must be numeric with 2 digits (prefecture) or 5 digits (municipality)")]
    InvalidArea(String),

    #[error("year {0} is outside {MIN_YEAR}..={MAX_YEAR}")]
    YearOutOfRange(i32),

    #[error("unknown price classification '{0}' (expected 01 or 02)")]
    UnknownClassification(String),

    #[error("year range is inverted: {from} > {to}")]
    InvertedRange { from: i32, to: i32 },
}

/// Identity of one upstream fetch: (year, region, classification).
///
/// Ordering is (year, region, classification), which keeps batch reports and
/// cache listings stable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestKey {
    pub year: i32,
    pub region: String,
    pub classification: String,
}

impl RequestKey {
    /// Build a validated key.
    pub fn new(
        year: i32,
        region: impl Into<String>,
        classification: impl Into<String>,
    ) -> Result<Self, KeyError> {
        let region = region.into();
        let classification = classification.into();
        validate_area(&region)?;
        if !(MIN_YEAR..=MAX_YEAR).contains(&year) {
            return Err(KeyError::YearOutOfRange(year));
        }
        if !CLASSIFICATIONS.contains(&classification.as_str()) {
            return Err(KeyError::UnknownClassification(classification));
        }
        Ok(Self {
            year,
            region,
            classification,
        })
    }

    /// Every (year, region) combination for one classification.
    ///
    /// Duplicated regions collapse to one key each.
    pub fn enumerate(
        years: RangeInclusive<i32>,
        regions: &[impl AsRef<str>],
        classification: &str,
    ) -> Result<Vec<Self>, KeyError> {
        let (from, to) = (*years.start(), *years.end());
        if from > to {
            return Err(KeyError::InvertedRange { from, to });
        }
        for year in [from, to] {
            if !(MIN_YEAR..=MAX_YEAR).contains(&year) {
                return Err(KeyError::YearOutOfRange(year));
            }
        }
        let mut keys = Vec::with_capacity(regions.len() * (to - from + 1) as usize);
        for year in years {
            for region in regions {
                keys.push(Self::new(year, region.as_ref(), classification)?);
            }
        }
        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    /// Deterministic composite identifier, e.g. `2020-13101-01`.
    pub fn cache_id(&self) -> String {
        format!("{}-{}-{}", self.year, self.region, self.classification)
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.cache_id())
    }
}

/// Area codes are 2-digit prefecture codes or 5-digit municipality codes.
pub fn validate_area(area: &str) -> Result<(), KeyError> {
    let numeric = !area.is_empty() && area.bytes().all(|b| b.is_ascii_digit());
    if numeric && (area.len() == 2 || area.len() == 5) {
        Ok(())
    } else {
        Err(KeyError::InvalidArea(area.to_string()))
    }
}
