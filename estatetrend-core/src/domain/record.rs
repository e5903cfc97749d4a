//! RawRecord: one transaction as parsed from an upstream response.

use serde::{Deserialize, Serialize};

/// A single transaction row.
///
/// `price` and `unit_price` are NaN when the upstream left the field blank or
/// unparseable. Aggregation drops non-finite values, so a record with no
/// usable price still counts toward the sample size of its group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    pub region_code: String,
    pub region_name: String,
    pub price: f64,
    pub unit_price: f64,
    pub year: i32,
}

impl RawRecord {
    pub fn has_price(&self) -> bool {
        self.price.is_finite()
    }

    pub fn has_unit_price(&self) -> bool {
        self.unit_price.is_finite()
    }
}
