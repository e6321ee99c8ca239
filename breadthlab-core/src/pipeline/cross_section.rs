//! Pivot per-symbol metrics into per-timestamp cross-sections.

use std::collections::{BTreeMap, HashSet};

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::pipeline::metrics::SymbolMetrics;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossSectionEntry {
    pub symbol: String,
    pub returns: Vec<Option<f64>>,
    pub traded_value: Option<f64>,
}

/// Every symbol active at one timestamp, in ingestion order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossSection {
    pub timestamp: NaiveDateTime,
    pub windows: Vec<u32>,
    pub entries: Vec<CrossSectionEntry>,
}

impl CrossSection {
    pub fn new(
        timestamp: NaiveDateTime,
        windows: Vec<u32>,
        entries: Vec<CrossSectionEntry>,
    ) -> Result<Self, PipelineError> {
        let mut seen = HashSet::with_capacity(entries.len());
        for entry in &entries {
            if !seen.insert(entry.symbol.as_str()) {
                return Err(PipelineError::DuplicateSymbol {
                    symbol: entry.symbol.clone(),
                });
            }
            if entry.returns.len() != windows.len() {
                return Err(PipelineError::ReturnsLength {
                    symbol: entry.symbol.clone(),
                    expected: windows.len(),
                    found: entry.returns.len(),
                });
            }
        }
        Ok(Self {
            timestamp,
            windows,
            entries,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Group metrics rows by timestamp, ascending.
///
/// Input order of `metrics` is the ingestion order carried into each
/// cross-section. All metrics must share one window set.
pub fn build_cross_sections(metrics: &[SymbolMetrics]) -> Result<Vec<CrossSection>, PipelineError> {
    let Some(first) = metrics.first() else {
        return Ok(Vec::new());
    };
    let windows = first.windows.clone();

    let mut seen = HashSet::with_capacity(metrics.len());
    let mut by_time: BTreeMap<NaiveDateTime, Vec<CrossSectionEntry>> = BTreeMap::new();

    for m in metrics {
        if m.windows != windows {
            return Err(PipelineError::WindowMismatch {
                symbol: m.symbol.clone(),
                expected: windows,
                found: m.windows.clone(),
            });
        }
        if !seen.insert(m.symbol.as_str()) {
            return Err(PipelineError::DuplicateSymbol {
                symbol: m.symbol.clone(),
            });
        }
        for row in &m.rows {
            by_time.entry(row.timestamp).or_default().push(CrossSectionEntry {
                symbol: m.symbol.clone(),
                returns: row.returns.clone(),
                traded_value: row.traded_value,
            });
        }
    }

    Ok(by_time
        .into_iter()
        .map(|(timestamp, entries)| CrossSection {
            timestamp,
            windows: windows.clone(),
            entries,
        })
        .collect())
}
