//! Data provider trait, fetch configuration, and structured error types.
//!
//! The DataProvider trait abstracts over candle sources so the downloader
//! and loader can be exercised against mocks in tests.

use std::time::Duration;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::domain::{Candle, Interval};
use crate::error::PipelineError;
use crate::data::retry::{RetryPolicy, Retryable};

/// Structured error types for data operations.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("rate limited by exchange (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },

    #[error("HTTP {status}: {detail}")]
    Http { status: u16, detail: String },

    #[error("response format changed: {0}")]
    ResponseFormatChanged(String),

    #[error("symbol not found: {symbol}")]
    SymbolNotFound { symbol: String },

    #[error("hard stop: exchange has blocked requests (circuit breaker tripped)")]
    CircuitBreakerTripped,

    #[error("cache error: {0}")]
    CacheError(String),

    #[error("parquet I/O error: {0}")]
    ParquetError(String),

    #[error("no cached data for symbol '{symbol}'; run `download` first")]
    NoCachedData { symbol: String },

    #[error("import error in {path}: {detail}")]
    Import { path: String, detail: String },

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error("data error: {0}")]
    Other(String),
}

impl Retryable for DataError {
    fn is_retryable(&self) -> bool {
        match self {
            DataError::NetworkUnreachable(_) | DataError::RateLimited { .. } => true,
            DataError::Http { status, .. } => *status >= 500,
            _ => false,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            DataError::RateLimited { retry_after_secs } => {
                Some(Duration::from_secs(*retry_after_secs))
            }
            _ => None,
        }
    }
}

/// Result of a successful fetch for a single symbol.
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub symbol: String,
    pub candles: Vec<Candle>,
    pub source: DataSource,
}

/// Where the candles came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
    Binance,
    CsvImport,
    Cache,
    Synthetic,
}

/// Exchange access settings handed to a provider at construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub spot_base_url: String,
    pub swap_base_url: String,
    /// Sent as `X-MBX-APIKEY` when present. Public endpoints work without it.
    pub api_key: Option<String>,
    /// HTTP(S) proxy URL applied to every request.
    pub proxy: Option<String>,
    pub timeout_ms: u64,
    /// Pause between consecutive kline pages for one symbol.
    pub rate_limit_ms: u64,
    /// Rows per kline page.
    pub page_limit: u32,
    /// Symbols fetched concurrently.
    pub parallelism: usize,
    pub quote_asset: String,
    pub retry: RetryPolicy,
    pub breaker_cooldown_secs: u64,
    pub breaker_threshold: u32,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            spot_base_url: "https://api.binance.com".into(),
            swap_base_url: "https://fapi.binance.com".into(),
            api_key: None,
            proxy: None,
            timeout_ms: 30_000,
            rate_limit_ms: 1_000,
            page_limit: 499,
            parallelism: 8,
            quote_asset: "USDT".into(),
            retry: RetryPolicy::fetch_default(),
            breaker_cooldown_secs: 30 * 60,
            breaker_threshold: 3,
        }
    }
}

/// Trait for candle providers.
///
/// Implementations handle one exchange's API. The cache layer sits above
/// this trait; providers don't know about the cache.
pub trait DataProvider: Send + Sync {
    /// Human-readable name of this provider.
    fn name(&self) -> &str;

    /// Tradable symbols quoted in `quote_asset`.
    fn list_symbols(&self, quote_asset: &str) -> Result<Vec<String>, DataError>;

    /// Fetch candles with open time in `[start, end]`.
    fn fetch(
        &self,
        symbol: &str,
        interval: Interval,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<FetchResult, DataError>;

    /// Check if the provider is currently available (not rate-limited, not blocked).
    fn is_available(&self) -> bool;
}

/// Progress callback for multi-symbol operations.
pub trait DownloadProgress: Send + Sync {
    fn on_start(&self, symbol: &str, index: usize, total: usize);

    fn on_complete(&self, symbol: &str, index: usize, total: usize, result: &Result<usize, DataError>);

    fn on_batch_complete(&self, succeeded: usize, failed: usize, total: usize);
}

/// Progress reporter that emits tracing events.
pub struct LogProgress;

impl DownloadProgress for LogProgress {
    fn on_start(&self, symbol: &str, index: usize, total: usize) {
        info!(symbol, "[{}/{}] fetching", index + 1, total);
    }

    fn on_complete(
        &self,
        symbol: &str,
        _index: usize,
        _total: usize,
        result: &Result<usize, DataError>,
    ) {
        match result {
            Ok(candles) => info!(symbol, candles, "fetched"),
            Err(e) => warn!(symbol, error = %e, "fetch failed"),
        }
    }

    fn on_batch_complete(&self, succeeded: usize, failed: usize, total: usize) {
        info!(succeeded, failed, total, "download complete");
    }
}
