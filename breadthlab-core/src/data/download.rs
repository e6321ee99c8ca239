//! Download orchestrator. Fans per-symbol fetches out over a bounded thread
//! pool and writes each result into the cache.

use chrono::NaiveDateTime;
use rayon::prelude::*;

use super::cache::{CoverageResult, ParquetCache};
use super::provider::{DataError, DataProvider, DownloadProgress};
use crate::domain::{Interval, SymbolSeries};

#[derive(Debug, Clone, Copy)]
pub struct DownloadRequest {
    pub interval: Interval,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    /// Refetch even when the cache already covers the range.
    pub force: bool,
}

/// Download `symbols` with at most `parallelism` fetches in flight.
///
/// Every symbol completes or fails on its own; once the provider reports it
/// is unavailable (circuit breaker tripped) the remaining symbols fail fast
/// without touching the network.
pub fn download_symbols(
    provider: &dyn DataProvider,
    cache: &ParquetCache,
    symbols: &[String],
    request: &DownloadRequest,
    parallelism: usize,
    progress: &dyn DownloadProgress,
) -> Result<DownloadSummary, DataError> {
    let total = symbols.len();
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(parallelism.max(1))
        .build()
        .map_err(|e| DataError::Other(format!("download thread pool: {e}")))?;

    let results: Vec<(String, Result<usize, DataError>)> = pool.install(|| {
        symbols
            .par_iter()
            .enumerate()
            .map(|(i, symbol)| {
                progress.on_start(symbol, i, total);
                let result = if !provider.is_available() {
                    Err(DataError::CircuitBreakerTripped)
                } else {
                    download_single(provider, cache, symbol, request)
                };
                progress.on_complete(symbol, i, total, &result);
                (symbol.clone(), result)
            })
            .collect()
    });

    let mut summary = DownloadSummary {
        total,
        succeeded: 0,
        failed: 0,
        candles: 0,
        fetched: Vec::new(),
        errors: Vec::new(),
    };
    for (symbol, result) in results {
        match result {
            Ok(n) => {
                summary.succeeded += 1;
                summary.candles += n;
                if n > 0 {
                    summary.fetched.push(symbol);
                }
            }
            Err(e) => {
                summary.failed += 1;
                summary.errors.push((symbol, e));
            }
        }
    }

    progress.on_batch_complete(summary.succeeded, summary.failed, total);
    Ok(summary)
}

/// Fetch → validate → cache. Returns the number of candles written.
fn download_single(
    provider: &dyn DataProvider,
    cache: &ParquetCache,
    symbol: &str,
    request: &DownloadRequest,
) -> Result<usize, DataError> {
    let mut start = request.start;
    if !request.force {
        match cache.covers_range(symbol, request.start, request.end) {
            CoverageResult::FullyCovered => return Ok(0),
            // Refetch the last cached candle too; it may have been open when stored.
            CoverageResult::PartiallyCovered {
                cached_start,
                cached_end,
            } if cached_start <= request.start && cached_end >= request.start => {
                start = cached_end;
            }
            _ => {}
        }
    }

    let fetched = provider.fetch(symbol, request.interval, start, request.end)?;
    if fetched.candles.is_empty() {
        return Err(DataError::SymbolNotFound {
            symbol: symbol.to_string(),
        });
    }
    let series = SymbolSeries::from_unsorted(symbol, fetched.candles)?;
    cache.write(symbol, request.interval, series.candles(), fetched.source)?;
    Ok(series.len())
}

/// Summary of a batch download operation.
#[derive(Debug)]
pub struct DownloadSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Candles written across all symbols (zero for cache hits).
    pub candles: usize,
    /// Symbols that received new candles.
    pub fetched: Vec<String>,
    pub errors: Vec<(String, DataError)>,
}

impl DownloadSummary {
    pub fn all_succeeded(&self) -> bool {
        self.failed == 0
    }
}
