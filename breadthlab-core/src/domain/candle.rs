//! Candle and SymbolSeries, the raw market data units.

use std::collections::HashMap;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// OHLCV candle for one symbol over one interval (hour or day).
///
/// `timestamp` is the UTC open time of the interval. `quote_volume` is the
/// traded value in the quote asset and drives the liquidity filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub symbol: String,
    pub timestamp: NaiveDateTime,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub quote_volume: f64,
    pub is_tradable: bool,
}

impl Candle {
    /// UTC calendar day this candle opens on.
    pub fn day(&self) -> NaiveDate {
        self.timestamp.date()
    }

    /// Returns true if any price field is NaN.
    pub fn is_void(&self) -> bool {
        self.open.is_nan() || self.high.is_nan() || self.low.is_nan() || self.close.is_nan()
    }

    /// Basic OHLC sanity check: high bounds everything, prices positive.
    pub fn is_sane(&self) -> bool {
        if self.is_void() {
            return false;
        }
        self.high >= self.low
            && self.high >= self.open
            && self.high >= self.close
            && self.low <= self.open
            && self.low <= self.close
            && self.close > 0.0
    }
}

/// Candles for a single symbol, strictly ascending by timestamp.
///
/// The constructor is the only way in, so every `SymbolSeries` in the
/// pipeline already satisfies the ordering and uniqueness contracts.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SymbolSeries {
    symbol: String,
    candles: Vec<Candle>,
}

impl SymbolSeries {
    /// Validate and wrap candles that are already in time order.
    pub fn new(symbol: impl Into<String>, candles: Vec<Candle>) -> Result<Self, PipelineError> {
        let symbol = symbol.into();
        if let Some(stray) = candles.iter().find(|c| c.symbol != symbol) {
            return Err(PipelineError::SymbolMismatch {
                expected: symbol,
                found: stray.symbol.clone(),
            });
        }
        for pair in candles.windows(2) {
            let (prev, next) = (&pair[0], &pair[1]);
            if next.timestamp == prev.timestamp {
                return Err(PipelineError::DuplicateTimestamp {
                    symbol,
                    timestamp: next.timestamp,
                });
            }
            if next.timestamp < prev.timestamp {
                return Err(PipelineError::NonMonotonicTimestamps {
                    symbol,
                    previous: prev.timestamp,
                    next: next.timestamp,
                });
            }
        }
        Ok(Self { symbol, candles })
    }

    /// Sort candles by timestamp, then validate. Duplicates are still rejected.
    pub fn from_unsorted(
        symbol: impl Into<String>,
        mut candles: Vec<Candle>,
    ) -> Result<Self, PipelineError> {
        candles.sort_by_key(|c| c.timestamp);
        Self::new(symbol, candles)
    }

    pub fn empty(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            candles: Vec::new(),
        }
    }

    /// Split a mixed candle table into one series per symbol.
    ///
    /// Series come out in the order each symbol first appears in the table;
    /// that order is the ingestion order used for rank tie-breaks.
    pub fn group(candles: Vec<Candle>) -> Result<Vec<Self>, PipelineError> {
        let mut slots: HashMap<String, usize> = HashMap::new();
        let mut buckets: Vec<(String, Vec<Candle>)> = Vec::new();
        for candle in candles {
            let slot = match slots.get(&candle.symbol) {
                Some(&slot) => slot,
                None => {
                    slots.insert(candle.symbol.clone(), buckets.len());
                    buckets.push((candle.symbol.clone(), Vec::new()));
                    buckets.len() - 1
                }
            };
            buckets[slot].1.push(candle);
        }
        buckets
            .into_iter()
            .map(|(symbol, candles)| Self::from_unsorted(symbol, candles))
            .collect()
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn candles(&self) -> &[Candle] {
        &self.candles
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn first_timestamp(&self) -> Option<NaiveDateTime> {
        self.candles.first().map(|c| c.timestamp)
    }

    pub fn last_timestamp(&self) -> Option<NaiveDateTime> {
        self.candles.last().map(|c| c.timestamp)
    }

    pub fn into_candles(self) -> Vec<Candle> {
        self.candles
    }
}
