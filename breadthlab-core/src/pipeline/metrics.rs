//! Return & liquidity calculator.
//!
//! Returns are measured over rows of the symbol's own daily series, not
//! calendar days: a symbol with a missing day reaches further back in time.
//! Rolling traded value needs a full window of finite quote volumes.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::domain::SymbolSeries;

/// How the trailing quote volume is folded into one liquidity figure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LiquidityAggregation {
    Sum,
    Mean,
}

/// Trailing window used for the liquidity filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiquidityWindow {
    pub window_days: usize,
    pub aggregation: LiquidityAggregation,
}

impl LiquidityWindow {
    pub const fn sum(window_days: usize) -> Self {
        Self {
            window_days,
            aggregation: LiquidityAggregation::Sum,
        }
    }

    pub const fn mean(window_days: usize) -> Self {
        Self {
            window_days,
            aggregation: LiquidityAggregation::Mean,
        }
    }

    /// Mean daily traded value over a year.
    pub const fn altcoin_default() -> Self {
        Self::mean(365)
    }

    /// Total traded value over the last week.
    pub const fn breadth_default() -> Self {
        Self::sum(7)
    }
}

/// One day of derived metrics for one symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRow {
    pub timestamp: NaiveDateTime,
    pub close: f64,
    /// One entry per window, aligned with `SymbolMetrics::windows`.
    pub returns: Vec<Option<f64>>,
    pub traded_value: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolMetrics {
    pub symbol: String,
    pub windows: Vec<u32>,
    pub rows: Vec<MetricRow>,
}

impl SymbolMetrics {
    pub fn window_index(&self, window: u32) -> Option<usize> {
        self.windows.iter().position(|&w| w == window)
    }
}

/// Single-window form of [`compute_metrics`].
pub fn compute_return_and_liquidity(
    daily: &SymbolSeries,
    window_days: u32,
    liquidity: LiquidityWindow,
) -> SymbolMetrics {
    compute_metrics(daily, &[window_days], liquidity)
}

/// Trailing simple returns for every window plus rolling traded value.
///
/// Every daily row is emitted; rows without enough history carry `None`.
pub fn compute_metrics(
    daily: &SymbolSeries,
    windows: &[u32],
    liquidity: LiquidityWindow,
) -> SymbolMetrics {
    let candles = daily.candles();
    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
    let quote_volumes: Vec<f64> = candles.iter().map(|c| c.quote_volume).collect();
    let traded = rolling_traded_value(&quote_volumes, liquidity);

    let rows = candles
        .iter()
        .zip(traded)
        .enumerate()
        .map(|(i, (candle, traded_value))| MetricRow {
            timestamp: candle.timestamp,
            close: candle.close,
            returns: windows
                .iter()
                .map(|&w| simple_return(&closes, i, w as usize))
                .collect(),
            traded_value,
        })
        .collect();

    SymbolMetrics {
        symbol: daily.symbol().to_string(),
        windows: windows.to_vec(),
        rows,
    }
}

/// `closes[index] / closes[index - window] - 1`, or `None` when the anchor
/// is out of range, zero, or not finite.
pub fn simple_return(closes: &[f64], index: usize, window: usize) -> Option<f64> {
    let current = *closes.get(index)?;
    let anchor = *closes.get(index.checked_sub(window)?)?;
    if !current.is_finite() || !anchor.is_finite() || anchor == 0.0 {
        return None;
    }
    let r = current / anchor - 1.0;
    r.is_finite().then_some(r)
}

fn rolling_traded_value(quote_volumes: &[f64], liquidity: LiquidityWindow) -> Vec<Option<f64>> {
    let n = liquidity.window_days;
    if n == 0 {
        return vec![None; quote_volumes.len()];
    }

    // Each row sums its own trailing slice. A running sum would carry the
    // rounding error of a large day long after it leaves the window.
    (0..quote_volumes.len())
        .map(|i| {
            let start = (i + 1).checked_sub(n)?;
            let window = &quote_volumes[start..=i];
            if !window.iter().all(|v| v.is_finite()) {
                return None;
            }
            let sum: f64 = window.iter().sum();
            Some(match liquidity.aggregation {
                LiquidityAggregation::Sum => sum,
                LiquidityAggregation::Mean => sum / n as f64,
            })
        })
        .collect()
}
