//! CSV candle import.
//!
//! Accepts either one table holding every symbol or a directory of
//! per-symbol files. Required columns: `candle_begin_time, open, high, low,
//! close, volume, quote_volume`. `symbol` is optional in per-symbol files
//! (defaults to the file stem with `-` removed, so `BTC-USDT.csv` is
//! `BTCUSDT`). `is_tradable` is optional and defaults to tradable.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use serde::Deserialize;
use tracing::{info, warn};

use super::provider::DataError;
use crate::domain::{Candle, SymbolSeries};

#[derive(Debug, Deserialize)]
struct CandleRecord {
    #[serde(default)]
    symbol: Option<String>,
    #[serde(alias = "timestamp", alias = "open_time")]
    candle_begin_time: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
    quote_volume: f64,
    #[serde(default)]
    is_tradable: Option<String>,
}

/// Series loaded from a directory, plus the files that could not be read.
#[derive(Debug, Default)]
pub struct ImportSummary {
    pub series: Vec<SymbolSeries>,
    pub failed: Vec<(PathBuf, DataError)>,
}

/// Parse the accepted timestamp encodings: `%Y-%m-%d %H:%M:%S`,
/// `%Y-%m-%dT%H:%M:%S`, `%Y-%m-%d`, or integer epoch milliseconds.
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(ts) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(ts);
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(date.and_time(NaiveTime::MIN));
    }
    raw.parse::<i64>()
        .ok()
        .and_then(DateTime::from_timestamp_millis)
        .map(|dt| dt.naive_utc())
}

fn parse_tradable(raw: Option<&str>) -> Option<bool> {
    match raw.map(str::trim) {
        None | Some("") => Some(true),
        Some(v) => match v.to_ascii_lowercase().as_str() {
            "1" | "1.0" | "true" => Some(true),
            "0" | "0.0" | "false" => Some(false),
            _ => None,
        },
    }
}

/// Symbol implied by a per-symbol file name.
pub fn symbol_from_path(path: &Path) -> Option<String> {
    path.file_stem()
        .and_then(|s| s.to_str())
        .map(|s| s.replace('-', ""))
        .filter(|s| !s.is_empty())
}

/// Read every row of a candle CSV. Rows without a `symbol` value take
/// `default_symbol`; if neither is present the file is rejected.
pub fn read_candle_csv(path: &Path, default_symbol: Option<&str>) -> Result<Vec<Candle>, DataError> {
    let import_err = |detail: String| DataError::Import {
        path: path.display().to_string(),
        detail,
    };

    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| import_err(format!("open: {e}")))?;

    let mut candles = Vec::new();
    for (row, record) in reader.deserialize::<CandleRecord>().enumerate() {
        // Header is line 1
        let line = row + 2;
        let record = record.map_err(|e| import_err(format!("line {line}: {e}")))?;

        let symbol = match (record.symbol, default_symbol) {
            (Some(s), _) if !s.is_empty() => s,
            (_, Some(d)) => d.to_string(),
            _ => return Err(import_err(format!("line {line}: no symbol column or file name"))),
        };
        let timestamp = parse_timestamp(&record.candle_begin_time).ok_or_else(|| {
            import_err(format!(
                "line {line}: unrecognized timestamp '{}'",
                record.candle_begin_time
            ))
        })?;
        let is_tradable = parse_tradable(record.is_tradable.as_deref()).ok_or_else(|| {
            import_err(format!(
                "line {line}: is_tradable must be 1/0/true/false, got '{}'",
                record.is_tradable.as_deref().unwrap_or_default()
            ))
        })?;

        candles.push(Candle {
            symbol,
            timestamp,
            open: record.open,
            high: record.high,
            low: record.low,
            close: record.close,
            volume: record.volume,
            quote_volume: record.quote_volume,
            is_tradable,
        });
    }
    Ok(candles)
}

/// Import a single multi-symbol table.
pub fn import_csv(path: &Path) -> Result<Vec<SymbolSeries>, DataError> {
    let candles = read_candle_csv(path, None)?;
    Ok(SymbolSeries::group(candles)?)
}

/// Import every `*.csv` file in `dir`, one symbol per file, in file-name order.
///
/// A file that fails to parse is logged and skipped; the rest still load.
pub fn import_directory(dir: &Path) -> Result<ImportSummary, DataError> {
    let entries = fs::read_dir(dir).map_err(|e| DataError::Import {
        path: dir.display().to_string(),
        detail: format!("read dir: {e}"),
    })?;

    let mut files: Vec<PathBuf> = entries
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("csv"))
        .collect();
    files.sort();

    let mut summary = ImportSummary::default();
    for path in files {
        let default_symbol = symbol_from_path(&path);
        let loaded = read_candle_csv(&path, default_symbol.as_deref()).and_then(|candles| {
            SymbolSeries::group(candles).map_err(DataError::from)
        });
        match loaded {
            Ok(series) => summary.series.extend(series),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "skipping unreadable candle file");
                summary.failed.push((path, e));
            }
        }
    }

    info!(
        dir = %dir.display(),
        symbols = summary.series.len(),
        failed = summary.failed.len(),
        "imported candle directory"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "candle_begin_time,open,high,low,close,volume,quote_volume";

    #[test]
    fn parses_timestamp_formats() {
        let expected = NaiveDate::from_ymd_opt(2024, 1, 2)
            .unwrap()
            .and_hms_opt(3, 0, 0)
            .unwrap();
        assert_eq!(parse_timestamp("2024-01-02 03:00:00"), Some(expected));
        assert_eq!(parse_timestamp("2024-01-02T03:00:00"), Some(expected));
        assert_eq!(parse_timestamp("1704164400000"), Some(expected));
        assert_eq!(
            parse_timestamp("2024-01-02"),
            Some(NaiveDate::from_ymd_opt(2024, 1, 2).unwrap().and_hms_opt(0, 0, 0).unwrap())
        );
        assert_eq!(parse_timestamp("yesterday"), None);
    }

    #[test]
    fn tradable_flag_values() {
        assert_eq!(parse_tradable(None), Some(true));
        assert_eq!(parse_tradable(Some("0")), Some(false));
        assert_eq!(parse_tradable(Some("TRUE")), Some(true));
        assert_eq!(parse_tradable(Some("maybe")), None);
    }

    #[test]
    fn symbol_from_file_stem() {
        assert_eq!(symbol_from_path(Path::new("/x/BTC-USDT.csv")).as_deref(), Some("BTCUSDT"));
    }

    #[test]
    fn imports_multi_symbol_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("all.csv");
        fs::write(
            &path,
            "symbol,candle_begin_time,open,high,low,close,volume,quote_volume,is_tradable\n\
             ETHUSDT,2024-01-01 01:00:00,1,2,0.5,1.5,10,15,1\n\
             BTCUSDT,2024-01-01 00:00:00,1,2,0.5,1.5,10,15,1\n\
             ETHUSDT,2024-01-01 00:00:00,1,2,0.5,1.5,10,15,0\n",
        )
        .unwrap();

        let series = import_csv(&path).unwrap();
        assert_eq!(series.len(), 2);
        assert_eq!(series[0].symbol(), "ETHUSDT");
        assert_eq!(series[0].len(), 2);
        assert!(!series[0].candles()[0].is_tradable);
        assert_eq!(series[1].symbol(), "BTCUSDT");
    }

    #[test]
    fn duplicate_rows_are_structural_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dup.csv");
        fs::write(
            &path,
            "symbol,candle_begin_time,open,high,low,close,volume,quote_volume\n\
             ETHUSDT,2024-01-01 00:00:00,1,2,0.5,1.5,10,15\n\
             ETHUSDT,2024-01-01 00:00:00,1,2,0.5,1.5,10,15\n",
        )
        .unwrap();
        assert!(matches!(import_csv(&path), Err(DataError::Pipeline(_))));
    }

    #[test]
    fn rejects_bad_timestamp_with_line_number() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("BTCUSDT.csv");
        fs::write(&path, format!("{HEADER}\nnot-a-time,1,2,0.5,1.5,10,15\n")).unwrap();
        let err = read_candle_csv(&path, Some("BTCUSDT")).unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn directory_import_skips_bad_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("BTC-USDT.csv"),
            format!("{HEADER}\n2024-01-01 00:00:00,1,2,0.5,1.5,10,15\n"),
        )
        .unwrap();
        fs::write(dir.path().join("BROKEN.csv"), "garbage\n1,2\n").unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let summary = import_directory(dir.path()).unwrap();
        assert_eq!(summary.series.len(), 1);
        assert_eq!(summary.series[0].symbol(), "BTCUSDT");
        assert_eq!(summary.failed.len(), 1);
    }
}
