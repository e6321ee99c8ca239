//! Latest-value summaries of a market's index series.
//!
//! Built either straight from [`IndexOutputs`] after a run or from the CSV
//! files and manifest a previous run left on disk.

use std::path::Path;

use anyhow::Result;
use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;

use breadthlab_core::domain::MarketType;

use crate::export::{composite_file_name, load_manifest, read_series_csv};
use crate::runner::IndexOutputs;

/// Latest value of one series and its change from the previous point.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesSnapshot {
    pub name: String,
    pub date: NaiveDate,
    pub latest: f64,
    /// `None` when the series has a single point.
    pub change: Option<f64>,
}

impl SeriesSnapshot {
    /// Snapshot of the last point, or `None` for an empty series.
    pub fn from_points(name: impl Into<String>, points: &[(NaiveDateTime, f64)]) -> Option<Self> {
        let (ts, latest) = *points.last()?;
        let change = points
            .len()
            .checked_sub(2)
            .map(|i| latest - points[i].1);
        Some(Self {
            name: name.into(),
            date: ts.date(),
            latest,
            change,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarketSummary {
    pub market: MarketType,
    pub series: Vec<SeriesSnapshot>,
}

impl MarketSummary {
    /// Composite series for every window, then the altcoin and breadth
    /// series of the headline window.
    pub fn from_outputs(market: MarketType, outputs: &IndexOutputs) -> Self {
        let mut series = Vec::new();
        for c in &outputs.composite {
            let points: Vec<_> = c.points.iter().map(|p| (p.timestamp, p.value)).collect();
            series.extend(SeriesSnapshot::from_points(format!("y_index_{}d", c.window), &points));
        }
        if let Some(window) = outputs.composite.first().map(|c| c.window) {
            if let Some(a) = outputs.altcoin_window(window) {
                let points: Vec<_> = a.points.iter().map(|p| (p.timestamp, p.value)).collect();
                series.extend(SeriesSnapshot::from_points(format!("altcoin_index_{window}d"), &points));
            }
            if let Some(b) = outputs.breadth_window(window) {
                let points: Vec<_> = b.points.iter().map(|p| (p.timestamp, p.value)).collect();
                series.extend(SeriesSnapshot::from_points(
                    format!("market_breadth_index_{window}d"),
                    &points,
                ));
            }
        }
        Self { market, series }
    }

    /// Rebuild the summary from `{output_dir}/{market}/`.
    pub fn from_dir(output_dir: &Path, market: MarketType) -> Result<Self> {
        let market_dir = output_dir.join(market.as_str());
        let manifest = load_manifest(&market_dir)?;
        let windows = &manifest.settings.composite_windows;

        let mut series = Vec::new();
        for (i, &window) in windows.iter().enumerate() {
            let path = market_dir.join(composite_file_name(window, i == 0));
            if path.exists() {
                let points = read_series_csv(&path, "y_index")?;
                series.extend(SeriesSnapshot::from_points(format!("y_index_{window}d"), &points));
            }
        }
        if let Some(&window) = windows.first() {
            let altcoin = market_dir.join(format!("altcoin_index{window}.csv"));
            if altcoin.exists() {
                let points = read_series_csv(&altcoin, "altcoin_index")?;
                series.extend(SeriesSnapshot::from_points(format!("altcoin_index_{window}d"), &points));
            }
            let breadth = market_dir.join(format!("market_breadth_index{window}.csv"));
            if breadth.exists() {
                let points = read_series_csv(&breadth, "market_breadth_index")?;
                series.extend(SeriesSnapshot::from_points(
                    format!("market_breadth_index_{window}d"),
                    &points,
                ));
            }
        }

        Ok(Self {
            market: manifest.market,
            series,
        })
    }

    pub fn latest_date(&self) -> Option<NaiveDate> {
        self.series.iter().map(|s| s.date).max()
    }
}

fn signed(change: Option<f64>) -> String {
    change.map_or_else(|| "n/a".to_string(), |c| format!("{c:+.4}"))
}

/// Fixed-width text table for the terminal.
pub fn render_table(summaries: &[MarketSummary]) -> String {
    let mut out = String::new();
    for s in summaries {
        out.push_str(&format!("== {} ==\n", s.market));
        if s.series.is_empty() {
            out.push_str("  (no data)\n");
            continue;
        }
        out.push_str(&format!(
            "  {:<28} {:>12} {:>12} {:>12}\n",
            "series", "date", "latest", "change"
        ));
        for snap in &s.series {
            out.push_str(&format!(
                "  {:<28} {:>12} {:>12.4} {:>12}\n",
                snap.name,
                snap.date,
                snap.latest,
                signed(snap.change)
            ));
        }
    }
    out
}

/// Markdown digest sent to the webhook.
pub fn render_markdown(summaries: &[MarketSummary]) -> String {
    let mut md = String::from("# Market breadth update\n");
    for s in summaries {
        md.push_str(&format!("\n## {}", s.market));
        if let Some(date) = s.latest_date() {
            md.push_str(&format!(" ({date})"));
        }
        md.push('\n');
        if s.series.is_empty() {
            md.push_str("> no data\n");
        }
        for snap in &s.series {
            md.push_str(&format!(
                "> {}: **{:.4}** ({})\n",
                snap.name,
                snap.latest,
                signed(snap.change)
            ));
        }
    }
    md
}
