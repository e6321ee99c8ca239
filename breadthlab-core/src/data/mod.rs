//! Data collaborators: exchange download, retry, caching, CSV import, quality checks.
//!
//! Nothing in here is needed by the pipeline itself; these modules produce
//! the `SymbolSeries` the pipeline consumes.

pub mod binance;
pub mod cache;
pub mod circuit_breaker;
pub mod download;
pub mod import;
pub mod provider;
pub mod quality;
pub mod retry;

pub use binance::BinanceProvider;
pub use cache::{CacheMeta, CacheStatus, CoverageResult, ParquetCache};
pub use circuit_breaker::CircuitBreaker;
pub use download::{download_symbols, DownloadRequest, DownloadSummary};
pub use import::{import_csv, import_directory, parse_timestamp, read_candle_csv, ImportSummary};
pub use provider::{
    DataError, DataProvider, DataSource, DownloadProgress, FetchConfig, FetchResult,
    LogProgress,
};
pub use quality::{inspect, AnomalyReport, AnomalyType, QualityReport, Severity};
pub use retry::{RetryPolicy, Retryable};
