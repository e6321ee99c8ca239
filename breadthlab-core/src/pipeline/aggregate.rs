//! Candle aggregator: hourly (or finer) candles → daily bars.

use chrono::NaiveTime;

use crate::domain::{Candle, SymbolSeries};
use crate::error::PipelineError;

/// Collapse a series into one bar per UTC calendar day.
///
/// Untradable candles are dropped before grouping, so a day with no
/// tradable candles produces no bar at all. Per day: first open, max high,
/// min low, last close, summed volumes. The bar is stamped at 00:00.
///
/// Aggregating an already daily series returns an equal series.
pub fn aggregate_to_daily(series: &SymbolSeries) -> Result<SymbolSeries, PipelineError> {
    let mut daily: Vec<Candle> = Vec::new();

    for candle in series.candles().iter().filter(|c| c.is_tradable) {
        let day_open = candle.day().and_time(NaiveTime::MIN);
        match daily.last_mut() {
            Some(bar) if bar.timestamp == day_open => {
                bar.high = bar.high.max(candle.high);
                bar.low = bar.low.min(candle.low);
                bar.close = candle.close;
                bar.volume += candle.volume;
                bar.quote_volume += candle.quote_volume;
            }
            _ => daily.push(Candle {
                symbol: series.symbol().to_string(),
                timestamp: day_open,
                open: candle.open,
                high: candle.high,
                low: candle.low,
                close: candle.close,
                volume: candle.volume,
                quote_volume: candle.quote_volume,
                is_tradable: true,
            }),
        }
    }

    SymbolSeries::new(series.symbol(), daily)
}
