//! Selection report: everything a map or report renderer needs for one
//! (metric, algorithm, window) selection.

use serde::{Deserialize, Serialize};

use crate::aggregate::AggregatedPoint;
use crate::ranking::{RankedEntry, Ranking};
use crate::scale::ColorScale;
use crate::trend::{compute_trends, Selection, TrendResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityColor {
    pub region_code: String,
    pub region_name: String,
    pub value: Option<f64>,
    /// `None` for excluded entities.
    pub normalized: Option<f64>,
    /// `#rrggbb`
    pub color: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionReport {
    pub selection: Selection,
    pub results: Vec<TrendResult>,
    pub top: Vec<RankedEntry>,
    pub bottom: Vec<RankedEntry>,
    pub excluded: usize,
    pub domain_bound: f64,
    pub colors: Vec<EntityColor>,
}

impl SelectionReport {
    /// Estimate, rank and color every region in `points`.
    pub fn build(points: &[AggregatedPoint], selection: Selection, n: usize) -> Self {
        let results = compute_trends(points, &selection);
        let ranking = Ranking::new(&results);
        let scale = ColorScale::from_values(&ranking.values());

        let colors = results
            .iter()
            .map(|r| {
                let value = r.value.value().filter(|v| v.is_finite());
                EntityColor {
                    region_code: r.region_code.clone(),
                    region_name: r.region_name.clone(),
                    value,
                    normalized: value.map(|v| scale.normalize(v)),
                    color: scale.color_or_excluded(value).to_hex(),
                }
            })
            .collect();

        Self {
            selection,
            top: ranking.top(n).to_vec(),
            bottom: ranking.bottom(n).into_iter().cloned().collect(),
            excluded: ranking.excluded().len(),
            domain_bound: scale.bound(),
            colors,
            results,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
