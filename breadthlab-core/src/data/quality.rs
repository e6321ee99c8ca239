//! Data-quality inspection for raw candle tables.
//!
//! Works on unvalidated candles, before `SymbolSeries` construction, so it
//! can report the duplicates that construction would reject.

use chrono::{Duration, NaiveDateTime};
use serde::Serialize;

use crate::domain::{Candle, Interval};

/// Gaps longer than this multiple of the interval are reported.
const GAP_TOLERANCE: f64 = 1.5;
/// Example timestamps kept per anomaly.
const MAX_EXAMPLES: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyType {
    DuplicateTimestamp,
    Gap,
    Untradable,
    ZeroVolume,
    InsanePrice,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnomalyReport {
    pub anomaly_type: AnomalyType,
    pub count: usize,
    pub severity: Severity,
    pub examples: Vec<NaiveDateTime>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QualityReport {
    pub symbol: String,
    pub rows: usize,
    pub tradable_rows: usize,
    pub first: Option<NaiveDateTime>,
    pub last: Option<NaiveDateTime>,
    pub anomalies: Vec<AnomalyReport>,
}

impl QualityReport {
    pub fn worst_severity(&self) -> Option<Severity> {
        self.anomalies.iter().map(|a| a.severity).max()
    }

    pub fn is_clean(&self) -> bool {
        self.anomalies.is_empty()
    }
}

#[derive(Default)]
struct Tally {
    count: usize,
    examples: Vec<NaiveDateTime>,
}

impl Tally {
    fn hit(&mut self, ts: NaiveDateTime) {
        self.count += 1;
        if self.examples.len() < MAX_EXAMPLES {
            self.examples.push(ts);
        }
    }

    fn report(self, anomaly_type: AnomalyType, severity: Severity) -> Option<AnomalyReport> {
        (self.count > 0).then(|| AnomalyReport {
            anomaly_type,
            count: self.count,
            severity,
            examples: self.examples,
        })
    }
}

/// Inspect one symbol's candles against the expected interval.
///
/// Gaps are measured between consecutive tradable candles; duplicates are
/// counted per extra occurrence.
pub fn inspect(symbol: &str, candles: &[Candle], expected: Interval) -> QualityReport {
    let mut sorted: Vec<&Candle> = candles.iter().collect();
    sorted.sort_by_key(|c| c.timestamp);

    let mut duplicates = Tally::default();
    let mut gaps = Tally::default();
    let mut untradable = Tally::default();
    let mut zero_volume = Tally::default();
    let mut insane = Tally::default();

    let tolerance_ms = (expected.duration().num_milliseconds() as f64 * GAP_TOLERANCE) as i64;
    let tolerance = Duration::milliseconds(tolerance_ms);

    let mut prev_tradable: Option<NaiveDateTime> = None;
    for (i, c) in sorted.iter().enumerate() {
        if i > 0 && sorted[i - 1].timestamp == c.timestamp {
            duplicates.hit(c.timestamp);
        }
        if !c.is_tradable {
            untradable.hit(c.timestamp);
            continue;
        }
        if c.quote_volume == 0.0 {
            zero_volume.hit(c.timestamp);
        }
        if !c.is_sane() {
            insane.hit(c.timestamp);
        }
        if let Some(prev) = prev_tradable {
            if c.timestamp - prev > tolerance {
                gaps.hit(c.timestamp);
            }
        }
        prev_tradable = Some(c.timestamp);
    }

    let tradable_rows = sorted.iter().filter(|c| c.is_tradable).count();
    let anomalies = [
        duplicates.report(AnomalyType::DuplicateTimestamp, Severity::Error),
        insane.report(AnomalyType::InsanePrice, Severity::Error),
        gaps.report(AnomalyType::Gap, Severity::Warning),
        zero_volume.report(AnomalyType::ZeroVolume, Severity::Warning),
        untradable.report(AnomalyType::Untradable, Severity::Info),
    ]
    .into_iter()
    .flatten()
    .collect();

    QualityReport {
        symbol: symbol.to_string(),
        rows: sorted.len(),
        tradable_rows,
        first: sorted.first().map(|c| c.timestamp),
        last: sorted.last().map(|c| c.timestamp),
        anomalies,
    }
}
