//! Swap vs spot comparison of the market breadth index.

use std::collections::HashMap;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use breadthlab_core::domain::IndexPoint;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ComparisonRow {
    pub timestamp: NaiveDateTime,
    pub swap: f64,
    pub spot: f64,
}

/// Inner join of two breadth series on timestamp, ascending.
pub fn compare_markets(swap: &[IndexPoint], spot: &[IndexPoint]) -> Vec<ComparisonRow> {
    let spot_by_ts: HashMap<NaiveDateTime, f64> =
        spot.iter().map(|p| (p.timestamp, p.value)).collect();

    let mut rows: Vec<ComparisonRow> = swap
        .iter()
        .filter_map(|p| {
            spot_by_ts.get(&p.timestamp).map(|&spot| ComparisonRow {
                timestamp: p.timestamp,
                swap: p.value,
                spot,
            })
        })
        .collect();
    rows.sort_by_key(|r| r.timestamp);
    rows
}
