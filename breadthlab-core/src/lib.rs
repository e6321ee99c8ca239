//! BreadthLab core: domain types, the index pipeline, and data collaborators.
//!
//! This crate contains the algorithmic heart of the market-breadth indices:
//! - Domain types (candles, symbol series, index points, market types)
//! - Candle aggregation to daily bars
//! - Trailing returns and rolling traded value per symbol
//! - Cross-sectional liquidity filtering and return ranking
//! - Altcoin, market breadth and composite ("Y") index engines
//! - Data providers, retry policy, circuit breaker, Parquet cache, CSV import

pub mod data;
pub mod domain;
pub mod error;
pub mod pipeline;
pub mod universe;

pub use error::PipelineError;
