//! Structural errors raised by the index pipeline.
//!
//! Missing data is never an error: it surfaces as absent rows or null
//! values. These variants cover inputs that violate the pipeline's
//! ordering and uniqueness contracts.

use chrono::NaiveDateTime;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PipelineError {
    #[error("duplicate timestamp {timestamp} in series '{symbol}'")]
    DuplicateTimestamp {
        symbol: String,
        timestamp: NaiveDateTime,
    },

    #[error("timestamps in series '{symbol}' go backwards: {next} follows {previous}")]
    NonMonotonicTimestamps {
        symbol: String,
        previous: NaiveDateTime,
        next: NaiveDateTime,
    },

    #[error("candle for '{found}' placed in series '{expected}'")]
    SymbolMismatch { expected: String, found: String },

    #[error("symbol '{symbol}' appears more than once in a cross-section")]
    DuplicateSymbol { symbol: String },

    #[error("metrics for '{symbol}' use windows {found:?}, expected {expected:?}")]
    WindowMismatch {
        symbol: String,
        expected: Vec<u32>,
        found: Vec<u32>,
    },

    #[error("entry '{symbol}' carries {found} returns for {expected} windows")]
    ReturnsLength {
        symbol: String,
        expected: usize,
        found: usize,
    },

    #[error("window {window}d was not computed for this cross-section")]
    UnknownWindow { window: u32 },

    #[error("invalid pipeline configuration: {0}")]
    InvalidConfig(String),
}
