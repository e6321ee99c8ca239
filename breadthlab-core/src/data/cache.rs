//! Parquet candle cache with Hive-style partitioning.
//!
//! Layout: `{root}/{market}/symbol={SYMBOL}/{year}.parquet`
//!
//! - Atomic writes (write to .tmp, rename into place)
//! - Writes merge with what is already cached; fresh candles win on overlap
//! - Integrity validation on load (schema check, row count > 0)
//! - Quarantine for corrupt files ({filename}.quarantined)
//! - Metadata sidecar per symbol (range, count, hash, source)

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Datelike, NaiveDateTime, Utc};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::provider::{DataError, DataSource};
use crate::domain::{Candle, Interval, MarketType};

const COLUMNS: [&str; 8] = [
    "candle_begin_time",
    "open",
    "high",
    "low",
    "close",
    "volume",
    "quote_volume",
    "is_tradable",
];

/// Metadata sidecar for a cached symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheMeta {
    pub symbol: String,
    pub interval: Interval,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub candle_count: usize,
    pub data_hash: String,
    pub source: DataSource,
    pub cached_at: DateTime<Utc>,
}

/// Candle cache for one market type.
pub struct ParquetCache {
    cache_dir: PathBuf,
}

impl ParquetCache {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
        }
    }

    /// Cache rooted at `{root}/{market}`.
    pub fn for_market(root: &Path, market: MarketType) -> Self {
        Self::new(root.join(market.as_str()))
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    fn symbol_dir(&self, symbol: &str) -> PathBuf {
        self.cache_dir.join(format!("symbol={symbol}"))
    }

    fn year_path(&self, symbol: &str, year: i32) -> PathBuf {
        self.symbol_dir(symbol).join(format!("{year}.parquet"))
    }

    fn meta_path(&self, symbol: &str) -> PathBuf {
        self.symbol_dir(symbol).join("meta.json")
    }

    /// Merge `candles` into the cached history of `symbol`.
    ///
    /// Rewrites every year partition the merged history touches.
    pub fn write(
        &self,
        symbol: &str,
        interval: Interval,
        candles: &[Candle],
        source: DataSource,
    ) -> Result<CacheMeta, DataError> {
        if candles.is_empty() {
            return Err(DataError::CacheError("no candles to cache".into()));
        }

        let existing = match self.load(symbol) {
            Ok(existing) => existing,
            Err(DataError::NoCachedData { .. }) => Vec::new(),
            Err(e) => return Err(e),
        };
        let mut merged: BTreeMap<NaiveDateTime, Candle> =
            existing.into_iter().map(|c| (c.timestamp, c)).collect();
        for candle in candles {
            merged.insert(candle.timestamp, candle.clone());
        }
        let merged: Vec<Candle> = merged.into_values().collect();

        let sym_dir = self.symbol_dir(symbol);
        fs::create_dir_all(&sym_dir)
            .map_err(|e| DataError::CacheError(format!("failed to create dir: {e}")))?;

        let mut by_year: HashMap<i32, Vec<&Candle>> = HashMap::new();
        for candle in &merged {
            by_year.entry(candle.timestamp.year()).or_default().push(candle);
        }

        for (year, year_candles) in &by_year {
            let df = candles_to_dataframe(year_candles)?;
            let path = self.year_path(symbol, *year);
            let tmp_path = path.with_extension("parquet.tmp");

            write_parquet(&df, &tmp_path)?;

            fs::rename(&tmp_path, &path).map_err(|e| {
                let _ = fs::remove_file(&tmp_path);
                DataError::CacheError(format!("atomic rename failed: {e}"))
            })?;
        }

        let (Some(first), Some(last)) = (merged.first(), merged.last()) else {
            return Err(DataError::CacheError("no candles to cache".into()));
        };
        let meta = CacheMeta {
            symbol: symbol.to_string(),
            interval,
            start: first.timestamp,
            end: last.timestamp,
            candle_count: merged.len(),
            data_hash: blake3::hash(
                &serde_json::to_vec(&merged)
                    .map_err(|e| DataError::CacheError(format!("hash serialization: {e}")))?,
            )
            .to_hex()
            .to_string(),
            source,
            cached_at: Utc::now(),
        };
        let meta_json = serde_json::to_string_pretty(&meta)
            .map_err(|e| DataError::CacheError(format!("meta serialization: {e}")))?;
        fs::write(self.meta_path(symbol), meta_json)
            .map_err(|e| DataError::CacheError(format!("meta write: {e}")))?;

        Ok(meta)
    }

    /// Load all cached candles for a symbol, sorted ascending.
    pub fn load(&self, symbol: &str) -> Result<Vec<Candle>, DataError> {
        let sym_dir = self.symbol_dir(symbol);
        if !sym_dir.exists() {
            return Err(DataError::NoCachedData {
                symbol: symbol.to_string(),
            });
        }

        let mut candles = Vec::new();
        let entries =
            fs::read_dir(&sym_dir).map_err(|e| DataError::CacheError(format!("read dir: {e}")))?;

        for entry in entries {
            let entry = entry.map_err(|e| DataError::CacheError(format!("dir entry: {e}")))?;
            let path = entry.path();

            // meta.json, .quarantined, leftover .tmp
            if path.extension().and_then(|e| e.to_str()) != Some("parquet") {
                continue;
            }

            match load_and_validate_parquet(symbol, &path) {
                Ok(part) => candles.extend(part),
                Err(e) => {
                    let quarantine = path.with_extension("parquet.quarantined");
                    warn!(path = %path.display(), error = %e, "quarantining corrupt cache file");
                    if let Err(e) = fs::rename(&path, &quarantine) {
                        warn!(
                            path = %path.display(),
                            error = %e,
                            "failed to quarantine corrupt cache file"
                        );
                    }
                }
            }
        }

        if candles.is_empty() {
            return Err(DataError::NoCachedData {
                symbol: symbol.to_string(),
            });
        }

        candles.sort_by_key(|c| c.timestamp);
        Ok(candles)
    }

    /// Symbols with a cache directory, sorted.
    pub fn symbols(&self) -> Result<Vec<String>, DataError> {
        if !self.cache_dir.exists() {
            return Ok(Vec::new());
        }
        let entries = fs::read_dir(&self.cache_dir)
            .map_err(|e| DataError::CacheError(format!("read dir: {e}")))?;
        let mut symbols = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| DataError::CacheError(format!("dir entry: {e}")))?;
            if let Some(symbol) = entry
                .file_name()
                .to_str()
                .and_then(|name| name.strip_prefix("symbol="))
            {
                symbols.push(symbol.to_string());
            }
        }
        symbols.sort();
        Ok(symbols)
    }

    pub fn get_meta(&self, symbol: &str) -> Option<CacheMeta> {
        let content = fs::read_to_string(self.meta_path(symbol)).ok()?;
        serde_json::from_str(&content).ok()
    }

    pub fn status(&self, symbols: &[&str]) -> Vec<CacheStatus> {
        symbols
            .iter()
            .map(|sym| {
                let meta = self.get_meta(sym);
                CacheStatus {
                    symbol: sym.to_string(),
                    cached: meta.is_some(),
                    start: meta.as_ref().map(|m| m.start),
                    end: meta.as_ref().map(|m| m.end),
                    candle_count: meta.as_ref().map(|m| m.candle_count),
                }
            })
            .collect()
    }

    /// Whether the cached range for `symbol` spans `[start, end]`.
    pub fn covers_range(
        &self,
        symbol: &str,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> CoverageResult {
        match self.get_meta(symbol) {
            None => CoverageResult::NotCached,
            Some(meta) if meta.start <= start && meta.end >= end => CoverageResult::FullyCovered,
            Some(meta) => CoverageResult::PartiallyCovered {
                cached_start: meta.start,
                cached_end: meta.end,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStatus {
    pub symbol: String,
    pub cached: bool,
    pub start: Option<NaiveDateTime>,
    pub end: Option<NaiveDateTime>,
    pub candle_count: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CoverageResult {
    NotCached,
    FullyCovered,
    PartiallyCovered {
        cached_start: NaiveDateTime,
        cached_end: NaiveDateTime,
    },
}

// ── Parquet I/O helpers ─────────────────────────────────────────────

fn candles_to_dataframe(candles: &[&Candle]) -> Result<DataFrame, DataError> {
    let times: Vec<i64> = candles
        .iter()
        .map(|c| c.timestamp.and_utc().timestamp_millis())
        .collect();
    let opens: Vec<f64> = candles.iter().map(|c| c.open).collect();
    let highs: Vec<f64> = candles.iter().map(|c| c.high).collect();
    let lows: Vec<f64> = candles.iter().map(|c| c.low).collect();
    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
    let volumes: Vec<f64> = candles.iter().map(|c| c.volume).collect();
    let quote_volumes: Vec<f64> = candles.iter().map(|c| c.quote_volume).collect();
    let tradable: Vec<bool> = candles.iter().map(|c| c.is_tradable).collect();

    DataFrame::new(vec![
        Column::new("candle_begin_time".into(), times),
        Column::new("open".into(), opens),
        Column::new("high".into(), highs),
        Column::new("low".into(), lows),
        Column::new("close".into(), closes),
        Column::new("volume".into(), volumes),
        Column::new("quote_volume".into(), quote_volumes),
        Column::new("is_tradable".into(), tradable),
    ])
    .map_err(|e| DataError::ParquetError(format!("dataframe creation: {e}")))
}

fn write_parquet(df: &DataFrame, path: &Path) -> Result<(), DataError> {
    let file =
        fs::File::create(path).map_err(|e| DataError::ParquetError(format!("create file: {e}")))?;
    ParquetWriter::new(file)
        .finish(&mut df.clone())
        .map_err(|e| DataError::ParquetError(format!("write parquet: {e}")))?;
    Ok(())
}

fn load_and_validate_parquet(symbol: &str, path: &Path) -> Result<Vec<Candle>, DataError> {
    let file = fs::File::open(path).map_err(|e| DataError::ParquetError(format!("open: {e}")))?;
    let df = ParquetReader::new(file)
        .finish()
        .map_err(|e| DataError::ParquetError(format!("read: {e}")))?;

    if df.height() == 0 {
        return Err(DataError::CacheError("empty parquet file".into()));
    }
    for col_name in COLUMNS {
        if df.column(col_name).is_err() {
            return Err(DataError::CacheError(format!("missing column '{col_name}'")));
        }
    }

    dataframe_to_candles(symbol, &df)
}

fn dataframe_to_candles(symbol: &str, df: &DataFrame) -> Result<Vec<Candle>, DataError> {
    let column = |name: &str| {
        df.column(name)
            .map_err(|e| DataError::ParquetError(format!("column read: {e}")))
    };
    let float = |name: &str| -> Result<Float64Chunked, DataError> {
        column(name)?
            .f64()
            .cloned()
            .map_err(|e| DataError::ParquetError(format!("{name} column type: {e}")))
    };

    let time_ca = column("candle_begin_time")?
        .i64()
        .map_err(|e| DataError::ParquetError(format!("candle_begin_time column type: {e}")))?
        .clone();
    let tradable_ca = column("is_tradable")?
        .bool()
        .map_err(|e| DataError::ParquetError(format!("is_tradable column type: {e}")))?
        .clone();
    let open_ca = float("open")?;
    let high_ca = float("high")?;
    let low_ca = float("low")?;
    let close_ca = float("close")?;
    let vol_ca = float("volume")?;
    let qv_ca = float("quote_volume")?;

    let n = df.height();
    let mut candles = Vec::with_capacity(n);
    for i in 0..n {
        let ms = time_ca
            .get(i)
            .ok_or_else(|| DataError::ParquetError(format!("null timestamp at row {i}")))?;
        let timestamp = DateTime::from_timestamp_millis(ms)
            .map(|dt| dt.naive_utc())
            .ok_or_else(|| DataError::ParquetError(format!("invalid timestamp {ms} at row {i}")))?;

        candles.push(Candle {
            symbol: symbol.to_string(),
            timestamp,
            open: open_ca.get(i).unwrap_or(f64::NAN),
            high: high_ca.get(i).unwrap_or(f64::NAN),
            low: low_ca.get(i).unwrap_or(f64::NAN),
            close: close_ca.get(i).unwrap_or(f64::NAN),
            volume: vol_ca.get(i).unwrap_or(f64::NAN),
            quote_volume: qv_ca.get(i).unwrap_or(f64::NAN),
            is_tradable: tradable_ca.get(i).unwrap_or(false),
        });
    }
    Ok(candles)
}
