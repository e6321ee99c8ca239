//! CSV and manifest export.
//!
//! Every run overwrites the full history for its market:
//! - `altcoin_index{w}.csv`, `market_breadth_index{w}.csv` per window
//! - `y_index.csv` for the first composite window, `y_index{w}.csv` for the rest
//! - `manifest.json` describing the run
//!
//! Cross-market comparisons go to `ALL/market_{w}d.csv`.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::NaiveDateTime;

use breadthlab_core::data::parse_timestamp;
use breadthlab_core::pipeline::AltcoinSeries;

use crate::compare::ComparisonRow;
use crate::runner::{BreadthSeries, CompositeSeries, IndexOutputs, RunManifest, SCHEMA_VERSION};

pub const MANIFEST_FILE: &str = "manifest.json";
pub const COMPARISON_DIR: &str = "ALL";

fn date(ts: NaiveDateTime) -> String {
    ts.format("%Y-%m-%d").to_string()
}

fn value(v: f64) -> String {
    format!("{v:.6}")
}

// ─── Index CSVs ─────────────────────────────────────────────────────

/// Columns: candle_begin_time, population, then `benchmark_rank_{w}d` and
/// `altcoin_index_{w}d` per window, then the averaged `altcoin_index`.
pub fn export_altcoin_csv(series: &AltcoinSeries) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);

    let mut header = vec!["candle_begin_time".to_string(), "population".to_string()];
    for w in &series.windows {
        header.push(format!("benchmark_rank_{w}d"));
        header.push(format!("altcoin_index_{w}d"));
    }
    header.push("altcoin_index".into());
    wtr.write_record(&header)?;

    for p in &series.points {
        let mut row = vec![date(p.timestamp), p.population.to_string()];
        for &w in &series.windows {
            let component = p
                .component(w)
                .with_context(|| format!("altcoin point {} lacks window {w}", p.timestamp))?;
            row.push(component.benchmark_rank.map(|r| r.to_string()).unwrap_or_default());
            row.push(value(component.value));
        }
        row.push(value(p.value));
        wtr.write_record(&row)?;
    }

    let data = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(data).context("CSV output is not valid UTF-8")
}

/// Columns: candle_begin_time, population, market_breadth_index_{w}d,
/// market_breadth_index.
pub fn export_breadth_csv(series: &BreadthSeries) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record([
        "candle_begin_time".to_string(),
        "population".to_string(),
        format!("market_breadth_index_{}d", series.window),
        "market_breadth_index".to_string(),
    ])?;

    for p in &series.points {
        let component = p.component(series.window).map_or(p.value, |c| c.value);
        wtr.write_record([
            date(p.timestamp),
            p.population.to_string(),
            value(component),
            value(p.value),
        ])?;
    }

    let data = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(data).context("CSV output is not valid UTF-8")
}

/// Columns: candle_begin_time, market_breadth_index, altcoin_index, y_index.
pub fn export_composite_csv(series: &CompositeSeries) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record([
        "candle_begin_time",
        "market_breadth_index",
        "altcoin_index",
        "y_index",
    ])?;
    for p in &series.points {
        wtr.write_record([
            date(p.timestamp),
            value(p.breadth),
            value(p.altcoin),
            value(p.value),
        ])?;
    }
    let data = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(data).context("CSV output is not valid UTF-8")
}

/// Columns: candle_begin_time, market_swap_{w}d, market_spot_{w}d.
pub fn export_comparison_csv(rows: &[ComparisonRow], window: u32) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record([
        "candle_begin_time".to_string(),
        format!("market_swap_{window}d"),
        format!("market_spot_{window}d"),
    ])?;
    for r in rows {
        wtr.write_record([date(r.timestamp), value(r.swap), value(r.spot)])?;
    }
    let data = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(data).context("CSV output is not valid UTF-8")
}

/// File name of the composite series for `window`; the first configured
/// window is the headline `y_index.csv`.
pub fn composite_file_name(window: u32, headline: bool) -> String {
    if headline {
        "y_index.csv".to_string()
    } else {
        format!("y_index{window}.csv")
    }
}

/// Read one value column of an exported CSV as `(timestamp, value)` pairs.
/// Rows with an empty value are skipped.
pub fn read_series_csv(path: &Path, column: &str) -> Result<Vec<(NaiveDateTime, f64)>> {
    let mut rdr = csv::Reader::from_path(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    let headers = rdr.headers()?.clone();
    let time_idx = headers
        .iter()
        .position(|h| h == "candle_begin_time")
        .with_context(|| format!("{} has no candle_begin_time column", path.display()))?;
    let value_idx = headers
        .iter()
        .position(|h| h == column)
        .with_context(|| format!("{} has no {column} column", path.display()))?;

    let mut out = Vec::new();
    for (line, record) in rdr.records().enumerate() {
        let record = record.with_context(|| format!("{}: bad row {}", path.display(), line + 2))?;
        let raw_ts = record.get(time_idx).unwrap_or_default();
        let ts = parse_timestamp(raw_ts)
            .with_context(|| format!("{}: bad timestamp '{raw_ts}'", path.display()))?;
        let raw = record.get(value_idx).unwrap_or_default().trim();
        if raw.is_empty() {
            continue;
        }
        let v: f64 = raw
            .parse()
            .with_context(|| format!("{}: bad value '{raw}'", path.display()))?;
        out.push((ts, v));
    }
    Ok(out)
}

// ─── Manifest ───────────────────────────────────────────────────────

pub fn export_manifest_json(manifest: &RunManifest) -> Result<String> {
    serde_json::to_string_pretty(manifest).context("failed to serialize RunManifest to JSON")
}

/// Deserialize a manifest, rejecting unknown schema versions.
pub fn import_manifest_json(json: &str) -> Result<RunManifest> {
    let manifest: RunManifest =
        serde_json::from_str(json).context("failed to deserialize RunManifest from JSON")?;
    if manifest.schema_version > SCHEMA_VERSION {
        bail!(
            "unsupported schema version {} (max supported: {})",
            manifest.schema_version,
            SCHEMA_VERSION
        );
    }
    Ok(manifest)
}

pub fn load_manifest(market_dir: &Path) -> Result<RunManifest> {
    let path = market_dir.join(MANIFEST_FILE);
    let json = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    import_manifest_json(&json)
}

// ─── Output bundle ──────────────────────────────────────────────────

/// Write every series in `outputs` plus the manifest under
/// `{output_dir}/{market}/`, returning the market directory.
pub fn save_outputs(
    outputs: &IndexOutputs,
    manifest: &RunManifest,
    output_dir: &Path,
) -> Result<PathBuf> {
    let market_dir = output_dir.join(manifest.market.as_str());
    std::fs::create_dir_all(&market_dir)
        .with_context(|| format!("failed to create output dir: {}", market_dir.display()))?;

    let mut files = Vec::new();
    let mut write = |name: String, content: String| -> Result<()> {
        let path = market_dir.join(&name);
        std::fs::write(&path, content)
            .with_context(|| format!("failed to write {}", path.display()))?;
        files.push(name);
        Ok(())
    };

    for series in &outputs.altcoin {
        let name = match series.windows.as_slice() {
            [w] => format!("altcoin_index{w}.csv"),
            _ => "altcoin_index.csv".to_string(),
        };
        write(name, export_altcoin_csv(series)?)?;
    }
    for series in &outputs.breadth {
        write(
            format!("market_breadth_index{}.csv", series.window),
            export_breadth_csv(series)?,
        )?;
    }
    let headline = manifest.settings.composite_windows.first().copied();
    for series in &outputs.composite {
        write(
            composite_file_name(series.window, headline == Some(series.window)),
            export_composite_csv(series)?,
        )?;
    }

    let mut manifest = manifest.clone();
    manifest.files = files;
    let json = export_manifest_json(&manifest)?;
    std::fs::write(market_dir.join(MANIFEST_FILE), json)
        .with_context(|| format!("failed to write manifest in {}", market_dir.display()))?;

    Ok(market_dir)
}

/// Write `{output_dir}/ALL/market_{w}d.csv`.
pub fn save_comparison(rows: &[ComparisonRow], window: u32, output_dir: &Path) -> Result<PathBuf> {
    let dir = output_dir.join(COMPARISON_DIR);
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create output dir: {}", dir.display()))?;
    let path = dir.join(format!("market_{window}d.csv"));
    std::fs::write(&path, export_comparison_csv(rows, window)?)
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use breadthlab_core::domain::{CompositePoint, IndexPoint, WindowComponent};
    use chrono::NaiveDate;

    fn ts(d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, d)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    fn point(d: u32, window: u32, v: f64, rank: Option<usize>) -> IndexPoint {
        IndexPoint {
            timestamp: ts(d),
            value: v,
            population: 3,
            components: vec![WindowComponent {
                window,
                value: v,
                benchmark_rank: rank,
            }],
        }
    }

    #[test]
    fn altcoin_csv_has_rank_and_value_columns() {
        let series = AltcoinSeries {
            benchmark: "BTCUSDT".into(),
            windows: vec![30],
            points: vec![point(1, 30, 0.67, Some(2)), point(2, 30, 1.0, Some(4))],
            benchmark_absent: 1,
        };
        let csv = export_altcoin_csv(&series).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(
            lines[0],
            "candle_begin_time,population,benchmark_rank_30d,altcoin_index_30d,altcoin_index"
        );
        assert_eq!(lines[1], "2024-03-01,3,2,0.670000,0.670000");
        assert_eq!(lines[2], "2024-03-02,3,4,1.000000,1.000000");
    }

    #[test]
    fn breadth_csv_layout() {
        let series = BreadthSeries {
            window: 7,
            points: vec![point(5, 7, -0.0125, None)],
        };
        let csv = export_breadth_csv(&series).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(
            lines[0],
            "candle_begin_time,population,market_breadth_index_7d,market_breadth_index"
        );
        assert_eq!(lines[1], "2024-03-05,3,-0.012500,-0.012500");
    }

    #[test]
    fn composite_csv_layout() {
        let series = CompositeSeries {
            window: 30,
            points: vec![CompositePoint {
                timestamp: ts(1),
                breadth: 0.1,
                altcoin: 0.5,
                value: 60.0,
            }],
        };
        let csv = export_composite_csv(&series).unwrap();
        assert!(csv.starts_with("candle_begin_time,market_breadth_index,altcoin_index,y_index\n"));
        assert!(csv.contains("2024-03-01,0.100000,0.500000,60.000000"));
    }

    #[test]
    fn read_series_csv_roundtrips_a_column() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("y_index.csv");
        let series = CompositeSeries {
            window: 30,
            points: vec![
                CompositePoint { timestamp: ts(1), breadth: 0.1, altcoin: 0.5, value: 60.0 },
                CompositePoint { timestamp: ts(2), breadth: 0.2, altcoin: 0.4, value: 60.0 },
            ],
        };
        std::fs::write(&path, export_composite_csv(&series).unwrap()).unwrap();
        let values = read_series_csv(&path, "altcoin_index").unwrap();
        assert_eq!(values, vec![(ts(1), 0.5), (ts(2), 0.4)]);
        assert!(read_series_csv(&path, "missing").is_err());
    }

    #[test]
    fn manifest_roundtrip_and_future_schema() {
        use crate::config::RunConfig;
        use crate::data_loader::LoadedData;
        use crate::runner::RunStatus;
        use breadthlab_core::data::DataSource;
        use breadthlab_core::domain::MarketType;

        let loaded = LoadedData::from_series(MarketType::Spot, Vec::new(), DataSource::Cache);
        let settings = RunConfig::default().index_settings().unwrap();
        let manifest =
            RunManifest::new(&loaded, &settings, &IndexOutputs::default(), RunStatus::Complete);

        let json = export_manifest_json(&manifest).unwrap();
        assert_eq!(import_manifest_json(&json).unwrap(), manifest);

        let mut future = manifest;
        future.schema_version = SCHEMA_VERSION + 1;
        let json = export_manifest_json(&future).unwrap();
        let err = import_manifest_json(&json).unwrap_err();
        assert!(err.to_string().contains("unsupported schema version"));
    }

    #[test]
    fn composite_file_names() {
        assert_eq!(composite_file_name(30, true), "y_index.csv");
        assert_eq!(composite_file_name(90, false), "y_index90.csv");
    }
}
