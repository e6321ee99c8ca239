//! Candle loading and data resolution for the runner.
//!
//! Resolves every symbol through the fallback policy:
//! 1. Cached data covering the requested range is used as-is
//! 2. Otherwise, when online, the provider fills the cache first
//! 3. Symbols still without data get a synthetic random walk with `synthetic`
//! 4. Anything left is reported in [`LoadedData::missing`]
//!
//! The load only fails when no symbol produced any candles.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::NaiveDateTime;
use thiserror::Error;
use tracing::{info, warn};

use breadthlab_core::data::{
    download_symbols, import_csv, import_directory, DataError, DataProvider, DataSource,
    DownloadProgress, DownloadRequest, ParquetCache,
};
use breadthlab_core::domain::{Candle, Interval, MarketType, SymbolSeries};

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("no candle data for {market}: {reason}")]
    NoData { market: MarketType, reason: String },

    #[error("data error: {0}")]
    Data(#[from] DataError),
}

#[derive(Debug, Clone)]
pub struct LoadOptions {
    pub market: MarketType,
    pub interval: Interval,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    /// Never touch the network.
    pub offline: bool,
    /// Generate synthetic candles for symbols without real data.
    pub synthetic: bool,
    /// Refetch even when the cache covers the range.
    pub force: bool,
    pub parallelism: usize,
    /// Used to discover the universe when no symbols are given.
    pub quote_asset: String,
}

#[derive(Debug)]
pub struct LoadedData {
    pub market: MarketType,
    /// One series per symbol, in universe order.
    pub series: Vec<SymbolSeries>,
    pub sources: BTreeMap<String, DataSource>,
    /// Symbols that produced no candles.
    pub missing: Vec<String>,
    /// BLAKE3 over every loaded candle, in sorted symbol order.
    pub dataset_hash: String,
    pub has_synthetic: bool,
}

impl LoadedData {
    /// Wrap series that did not come through the cache (CSV input, tests).
    pub fn from_series(market: MarketType, series: Vec<SymbolSeries>, source: DataSource) -> Self {
        let sources = series
            .iter()
            .map(|s| (s.symbol().to_string(), source))
            .collect();
        let dataset_hash = compute_dataset_hash(&series);
        Self {
            market,
            series,
            sources,
            missing: Vec::new(),
            dataset_hash,
            has_synthetic: source == DataSource::Synthetic,
        }
    }
}

/// Load candles for `symbols` from the cache, downloading or synthesizing
/// where needed. An empty `symbols` means the whole universe: the provider's
/// listing when online, else every cached symbol.
pub fn load_candles(
    symbols: &[String],
    cache: &ParquetCache,
    provider: Option<&dyn DataProvider>,
    progress: &dyn DownloadProgress,
    opts: &LoadOptions,
) -> Result<LoadedData, LoadError> {
    let online = provider.filter(|_| !opts.offline);

    let universe: Vec<String> = if !symbols.is_empty() {
        symbols.to_vec()
    } else if let Some(provider) = online {
        let listed = provider.list_symbols(&opts.quote_asset)?;
        info!(market = %opts.market, symbols = listed.len(), "discovered exchange universe");
        listed
    } else {
        cache.symbols()?
    };

    if universe.is_empty() {
        return Err(LoadError::NoData {
            market: opts.market,
            reason: "empty universe (no symbols configured, listed or cached)".into(),
        });
    }

    let mut sources: BTreeMap<String, DataSource> = BTreeMap::new();

    if let Some(provider) = online {
        let request = DownloadRequest {
            interval: opts.interval,
            start: opts.start,
            end: opts.end,
            force: opts.force,
        };
        let summary =
            download_symbols(provider, cache, &universe, &request, opts.parallelism, progress)?;
        for (symbol, error) in &summary.errors {
            warn!(market = %opts.market, symbol, error = %error, "download failed; trying cache");
        }
        for symbol in summary.fetched {
            sources.insert(symbol, DataSource::Binance);
        }
    }

    let mut series = Vec::with_capacity(universe.len());
    let mut missing = Vec::new();
    let mut has_synthetic = false;

    for symbol in &universe {
        let cached = match cache.load(symbol) {
            Ok(candles) => in_range(candles, opts.start, opts.end),
            Err(DataError::NoCachedData { .. }) => Vec::new(),
            Err(e) => return Err(e.into()),
        };

        if !cached.is_empty() {
            sources.entry(symbol.clone()).or_insert(DataSource::Cache);
            series.push(SymbolSeries::new(symbol.as_str(), cached).map_err(DataError::from)?);
            continue;
        }
        sources.remove(symbol);

        if opts.synthetic {
            warn!(symbol, "generating synthetic candles; results are tagged synthetic");
            let candles = generate_synthetic_candles(symbol, opts.interval, opts.start, opts.end);
            series.push(SymbolSeries::new(symbol.as_str(), candles).map_err(DataError::from)?);
            sources.insert(symbol.clone(), DataSource::Synthetic);
            has_synthetic = true;
            continue;
        }

        warn!(market = %opts.market, symbol, "no data in range; symbol skipped");
        missing.push(symbol.clone());
    }

    if series.is_empty() {
        return Err(LoadError::NoData {
            market: opts.market,
            reason: if opts.offline {
                "nothing cached for the requested range (run `download` first or pass --synthetic)"
                    .into()
            } else {
                "no symbol could be downloaded or loaded from cache".into()
            },
        });
    }

    let dataset_hash = compute_dataset_hash(&series);
    info!(
        market = %opts.market,
        loaded = series.len(),
        missing = missing.len(),
        "candles loaded"
    );

    Ok(LoadedData {
        market: opts.market,
        series,
        sources,
        missing,
        dataset_hash,
        has_synthetic,
    })
}

/// Load candles from a CSV file (one symbol, or a `symbol` column) or a
/// directory of per-symbol CSV files.
pub fn load_csv(path: &Path, market: MarketType) -> Result<LoadedData, LoadError> {
    let series = if path.is_dir() {
        let summary = import_directory(path)?;
        for (file, error) in &summary.failed {
            warn!(file = %file.display(), error = %error, "skipping unreadable csv");
        }
        summary.series
    } else {
        import_csv(path)?
    };

    if series.iter().all(SymbolSeries::is_empty) {
        return Err(LoadError::NoData {
            market,
            reason: format!("no candles in {}", path.display()),
        });
    }
    Ok(LoadedData::from_series(market, series, DataSource::CsvImport))
}

fn in_range(candles: Vec<Candle>, start: NaiveDateTime, end: NaiveDateTime) -> Vec<Candle> {
    candles
        .into_iter()
        .filter(|c| c.timestamp >= start && c.timestamp <= end)
        .collect()
}

/// Deterministic BLAKE3 hash over every candle in sorted symbol order.
pub fn compute_dataset_hash(series: &[SymbolSeries]) -> String {
    let mut hasher = blake3::Hasher::new();

    let mut ordered: Vec<&SymbolSeries> = series.iter().collect();
    ordered.sort_by(|a, b| a.symbol().cmp(b.symbol()));

    for s in ordered {
        hasher.update(s.symbol().as_bytes());
        for c in s.candles() {
            hasher.update(&c.timestamp.and_utc().timestamp_millis().to_le_bytes());
            hasher.update(&c.open.to_le_bytes());
            hasher.update(&c.high.to_le_bytes());
            hasher.update(&c.low.to_le_bytes());
            hasher.update(&c.close.to_le_bytes());
            hasher.update(&c.volume.to_le_bytes());
            hasher.update(&c.quote_volume.to_le_bytes());
            hasher.update(&[u8::from(c.is_tradable)]);
        }
    }

    hasher.finalize().to_hex().to_string()
}

/// Random walk from 100.0, seeded by the symbol name. Every candle is tradable.
pub fn generate_synthetic_candles(
    symbol: &str,
    interval: Interval,
    start: NaiveDateTime,
    end: NaiveDateTime,
) -> Vec<Candle> {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    let seed: [u8; 32] = *blake3::hash(symbol.as_bytes()).as_bytes();
    let mut rng = StdRng::from_seed(seed);

    let step = interval.duration();
    let mut candles = Vec::new();
    let mut price = 100.0_f64;
    let mut current = interval.floor(start);
    if current < start {
        current += step;
    }

    while current <= end {
        let change: f64 = rng.gen_range(-0.01..0.01);
        let open = price;
        let close = price * (1.0 + change);
        let high = open.max(close) * (1.0 + rng.gen_range(0.0..0.003));
        let low = open.min(close) * (1.0 - rng.gen_range(0.0..0.003));
        let volume: f64 = rng.gen_range(1_000.0..50_000.0);

        candles.push(Candle {
            symbol: symbol.to_string(),
            timestamp: current,
            open,
            high,
            low,
            close,
            volume,
            quote_volume: volume * close,
            is_tradable: true,
        });

        price = close;
        current += step;
    }

    candles
}

#[cfg(test)]
mod tests {
    use super::*;
    use breadthlab_core::data::{FetchResult, LogProgress};
    use chrono::NaiveDate;

    fn ts(d: u32, h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, d)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
    }

    fn candle(symbol: &str, t: NaiveDateTime, close: f64) -> Candle {
        Candle {
            symbol: symbol.into(),
            timestamp: t,
            open: close,
            high: close,
            low: close,
            close,
            volume: 10.0,
            quote_volume: 10.0 * close,
            is_tradable: true,
        }
    }

    fn opts(offline: bool, synthetic: bool) -> LoadOptions {
        LoadOptions {
            market: MarketType::Spot,
            interval: Interval::Hour1,
            start: ts(1, 0),
            end: ts(3, 23),
            offline,
            synthetic,
            force: false,
            parallelism: 2,
            quote_asset: "USDT".into(),
        }
    }

    struct FailingProvider;

    impl DataProvider for FailingProvider {
        fn name(&self) -> &str {
            "failing"
        }

        fn list_symbols(&self, _quote_asset: &str) -> Result<Vec<String>, DataError> {
            Ok(vec!["BTCUSDT".into(), "ETHUSDT".into()])
        }

        fn fetch(
            &self,
            _symbol: &str,
            _interval: Interval,
            _start: NaiveDateTime,
            _end: NaiveDateTime,
        ) -> Result<FetchResult, DataError> {
            Err(DataError::NetworkUnreachable("offline test".into()))
        }

        fn is_available(&self) -> bool {
            true
        }
    }

    #[test]
    fn cache_hit_filters_to_range() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ParquetCache::new(dir.path());
        let candles = vec![
            candle("BTCUSDT", ts(1, 0), 1.0),
            candle("BTCUSDT", ts(2, 0), 2.0),
            candle("BTCUSDT", ts(5, 0), 3.0),
        ];
        cache
            .write("BTCUSDT", Interval::Hour1, &candles, DataSource::Binance)
            .unwrap();

        let loaded =
            load_candles(&["BTCUSDT".into()], &cache, None, &LogProgress, &opts(true, false))
                .unwrap();
        assert_eq!(loaded.series.len(), 1);
        assert_eq!(loaded.series[0].len(), 2);
        assert_eq!(loaded.sources["BTCUSDT"], DataSource::Cache);
        assert!(!loaded.has_synthetic);
    }

    #[test]
    fn offline_without_cache_fails() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ParquetCache::new(dir.path());
        let err = load_candles(&["BTCUSDT".into()], &cache, None, &LogProgress, &opts(true, false))
            .unwrap_err();
        assert!(matches!(err, LoadError::NoData { .. }));
    }

    #[test]
    fn missing_symbols_are_reported_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ParquetCache::new(dir.path());
        cache
            .write(
                "BTCUSDT",
                Interval::Hour1,
                &[candle("BTCUSDT", ts(1, 0), 1.0)],
                DataSource::Binance,
            )
            .unwrap();

        let symbols = vec!["BTCUSDT".to_string(), "ETHUSDT".to_string()];
        let loaded =
            load_candles(&symbols, &cache, None, &LogProgress, &opts(true, false)).unwrap();
        assert_eq!(loaded.series.len(), 1);
        assert_eq!(loaded.missing, vec!["ETHUSDT".to_string()]);
    }

    #[test]
    fn failed_download_falls_back_to_synthetic() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ParquetCache::new(dir.path());
        let provider = FailingProvider;

        let loaded =
            load_candles(&[], &cache, Some(&provider), &LogProgress, &opts(false, true)).unwrap();
        assert_eq!(loaded.series.len(), 2);
        assert!(loaded.has_synthetic);
        assert_eq!(loaded.sources["ETHUSDT"], DataSource::Synthetic);
        // 3 days of hourly candles
        assert_eq!(loaded.series[0].len(), 72);
    }

    #[test]
    fn synthetic_candles_are_deterministic() {
        let a = generate_synthetic_candles("BTCUSDT", Interval::Hour1, ts(1, 0), ts(2, 0));
        let b = generate_synthetic_candles("BTCUSDT", Interval::Hour1, ts(1, 0), ts(2, 0));
        let c = generate_synthetic_candles("ETHUSDT", Interval::Hour1, ts(1, 0), ts(2, 0));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 25);
        assert!(a.iter().all(|c| c.is_sane()));
    }

    #[test]
    fn dataset_hash_ignores_series_order() {
        let a = SymbolSeries::new("AAA", vec![candle("AAA", ts(1, 0), 1.0)]).unwrap();
        let b = SymbolSeries::new("BBB", vec![candle("BBB", ts(1, 0), 2.0)]).unwrap();
        let h1 = compute_dataset_hash(&[a.clone(), b.clone()]);
        let h2 = compute_dataset_hash(&[b, a]);
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 64);
    }

    #[test]
    fn load_csv_reads_a_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("BTC-USDT.csv"),
            "candle_begin_time,open,high,low,close,volume,quote_volume\n\
             2024-01-01 00:00:00,1,1,1,1,1,1\n",
        )
        .unwrap();
        let loaded = load_csv(dir.path(), MarketType::Spot).unwrap();
        assert_eq!(loaded.series.len(), 1);
        assert_eq!(loaded.series[0].symbol(), "BTCUSDT");
        assert_eq!(loaded.sources["BTCUSDT"], DataSource::CsvImport);
    }
}
