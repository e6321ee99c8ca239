//! Binance candle provider (spot and USDT-margined perpetuals).
//!
//! Klines come back as positional JSON arrays:
//! `[open_time_ms, open, high, low, close, volume, close_time_ms,
//!   quote_volume, trades, taker_base, taker_quote, ignore]`, with prices and
//! volumes encoded as strings. Requests are paginated forward from
//! `startTime`, one page of `page_limit` rows at a time.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDateTime};
use reqwest::header::{HeaderMap, HeaderValue};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::circuit_breaker::CircuitBreaker;
use super::provider::{DataError, DataProvider, DataSource, FetchConfig, FetchResult};
use crate::domain::{Candle, Interval, MarketType};

#[derive(Debug, Deserialize)]
struct ExchangeInfo {
    symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SymbolInfo {
    symbol: String,
    status: String,
    quote_asset: String,
    #[serde(default)]
    contract_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    code: i64,
    msg: String,
}

/// Binance error code for an unknown symbol.
const INVALID_SYMBOL: i64 = -1121;

pub struct BinanceProvider {
    client: reqwest::blocking::Client,
    market: MarketType,
    config: FetchConfig,
    circuit_breaker: Arc<CircuitBreaker>,
}

impl BinanceProvider {
    pub fn new(
        market: MarketType,
        config: FetchConfig,
        circuit_breaker: Arc<CircuitBreaker>,
    ) -> Result<Self, DataError> {
        let mut builder = reqwest::blocking::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .user_agent(concat!("breadthlab/", env!("CARGO_PKG_VERSION")));

        if let Some(key) = &config.api_key {
            let mut headers = HeaderMap::new();
            let value = HeaderValue::from_str(key)
                .map_err(|e| DataError::Other(format!("invalid API key header: {e}")))?;
            headers.insert("X-MBX-APIKEY", value);
            builder = builder.default_headers(headers);
        }
        if let Some(proxy) = &config.proxy {
            let proxy = reqwest::Proxy::all(proxy)
                .map_err(|e| DataError::Other(format!("invalid proxy '{proxy}': {e}")))?;
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|e| DataError::Other(format!("build HTTP client: {e}")))?;

        Ok(Self {
            client,
            market,
            config,
            circuit_breaker,
        })
    }

    pub fn market(&self) -> MarketType {
        self.market
    }

    fn base_url(&self) -> &str {
        match self.market {
            MarketType::Spot => &self.config.spot_base_url,
            MarketType::Swap => &self.config.swap_base_url,
        }
    }

    fn exchange_info_url(&self) -> String {
        match self.market {
            MarketType::Spot => format!("{}/api/v3/exchangeInfo", self.base_url()),
            MarketType::Swap => format!("{}/fapi/v1/exchangeInfo", self.base_url()),
        }
    }

    fn klines_url(&self, symbol: &str, interval: Interval, start_ms: i64, end_ms: i64) -> String {
        let limit = self.config.page_limit;
        match self.market {
            MarketType::Spot => format!(
                "{}/api/v3/klines?symbol={symbol}&interval={interval}\
                 &limit={limit}&startTime={start_ms}&endTime={end_ms}",
                self.base_url()
            ),
            MarketType::Swap => format!(
                "{}/fapi/v1/continuousKlines?pair={symbol}&contractType=PERPETUAL\
                 &interval={interval}&limit={limit}&startTime={start_ms}&endTime={end_ms}",
                self.base_url()
            ),
        }
    }

    /// One GET with status handling and circuit-breaker bookkeeping. No retry.
    fn get_json<T: DeserializeOwned>(&self, url: &str, symbol: &str) -> Result<T, DataError> {
        if !self.circuit_breaker.is_allowed() {
            return Err(DataError::CircuitBreakerTripped);
        }

        let resp = self
            .client
            .get(url)
            .send()
            .map_err(|e| DataError::NetworkUnreachable(e.to_string()))?;
        let status = resp.status();

        if status == reqwest::StatusCode::FORBIDDEN || status.as_u16() == 418 {
            // IP ban: stop every worker immediately
            self.circuit_breaker.trip();
            return Err(DataError::CircuitBreakerTripped);
        }

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            self.circuit_breaker.record_failure();
            let retry_after_secs = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(60);
            return Err(DataError::RateLimited { retry_after_secs });
        }

        if !status.is_success() {
            if status.is_server_error() {
                self.circuit_breaker.record_failure();
            }
            let body = resp.text().unwrap_or_default();
            if let Ok(api) = serde_json::from_str::<ApiError>(&body) {
                if api.code == INVALID_SYMBOL {
                    return Err(DataError::SymbolNotFound {
                        symbol: symbol.to_string(),
                    });
                }
                return Err(DataError::Http {
                    status: status.as_u16(),
                    detail: format!("{} ({})", api.msg, api.code),
                });
            }
            return Err(DataError::Http {
                status: status.as_u16(),
                detail: body.chars().take(200).collect(),
            });
        }

        let parsed = resp.json::<T>().map_err(|e| {
            DataError::ResponseFormatChanged(format!("failed to parse response for {symbol}: {e}"))
        })?;
        self.circuit_breaker.record_success();
        Ok(parsed)
    }

    fn fetch_pages(
        &self,
        symbol: &str,
        interval: Interval,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<Candle>, DataError> {
        let end_ms = end.and_utc().timestamp_millis();
        let mut cursor = start.and_utc().timestamp_millis();
        let mut candles: Vec<Candle> = Vec::new();
        let label = format!("klines {symbol}");

        while cursor <= end_ms {
            let url = self.klines_url(symbol, interval, cursor, end_ms);
            let rows: Vec<Vec<Value>> = self
                .config
                .retry
                .run(&label, |_| self.get_json(&url, symbol))?;
            if rows.is_empty() {
                break;
            }

            let page = parse_klines(symbol, &rows)?;
            let page_len = page.len();
            let last_open = page
                .last()
                .map(|c| c.timestamp.and_utc().timestamp_millis())
                .unwrap_or(end_ms);
            debug!(symbol, rows = page_len, cursor, "kline page");
            candles.extend(page.into_iter().filter(|c| c.timestamp <= end));

            if page_len < self.config.page_limit as usize || last_open >= end_ms {
                break;
            }
            cursor = last_open + 1;
            std::thread::sleep(Duration::from_millis(self.config.rate_limit_ms));
        }

        Ok(candles)
    }
}

impl DataProvider for BinanceProvider {
    fn name(&self) -> &str {
        match self.market {
            MarketType::Spot => "binance_spot",
            MarketType::Swap => "binance_swap",
        }
    }

    fn list_symbols(&self, quote_asset: &str) -> Result<Vec<String>, DataError> {
        let url = self.exchange_info_url();
        let info: ExchangeInfo = self
            .config
            .retry
            .run("exchangeInfo", |_| self.get_json(&url, "exchangeInfo"))?;
        Ok(tradable_symbols(info, self.market, quote_asset))
    }

    fn fetch(
        &self,
        symbol: &str,
        interval: Interval,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<FetchResult, DataError> {
        let candles = self.fetch_pages(symbol, interval, start, end)?;
        Ok(FetchResult {
            symbol: symbol.to_string(),
            candles,
            source: DataSource::Binance,
        })
    }

    fn is_available(&self) -> bool {
        self.circuit_breaker.is_allowed()
    }
}

fn tradable_symbols(info: ExchangeInfo, market: MarketType, quote_asset: &str) -> Vec<String> {
    let mut symbols: Vec<String> = info
        .symbols
        .into_iter()
        .filter(|s| s.status == "TRADING" && s.quote_asset == quote_asset)
        .filter(|s| match market {
            MarketType::Spot => true,
            MarketType::Swap => s.contract_type.as_deref() == Some("PERPETUAL"),
        })
        .map(|s| s.symbol)
        .collect();
    symbols.sort();
    symbols
}

fn parse_klines(symbol: &str, rows: &[Vec<Value>]) -> Result<Vec<Candle>, DataError> {
    rows.iter().map(|row| parse_kline_row(symbol, row)).collect()
}

fn parse_kline_row(symbol: &str, row: &[Value]) -> Result<Candle, DataError> {
    let open_ms = row.first().and_then(Value::as_i64).ok_or_else(|| {
        DataError::ResponseFormatChanged(format!("kline row for {symbol} has no open time"))
    })?;
    let timestamp = DateTime::from_timestamp_millis(open_ms)
        .map(|dt| dt.naive_utc())
        .ok_or_else(|| DataError::ResponseFormatChanged(format!("invalid open time: {open_ms}")))?;

    Ok(Candle {
        symbol: symbol.to_string(),
        timestamp,
        open: number(row, 1)?,
        high: number(row, 2)?,
        low: number(row, 3)?,
        close: number(row, 4)?,
        volume: number(row, 5)?,
        quote_volume: number(row, 7)?,
        is_tradable: true,
    })
}

fn number(row: &[Value], idx: usize) -> Result<f64, DataError> {
    match row.get(idx) {
        Some(Value::String(s)) => s.parse::<f64>().map_err(|e| {
            DataError::ResponseFormatChanged(format!("kline field {idx} is not numeric ('{s}'): {e}"))
        }),
        Some(Value::Number(n)) => n
            .as_f64()
            .ok_or_else(|| DataError::ResponseFormatChanged(format!("kline field {idx} out of range"))),
        _ => Err(DataError::ResponseFormatChanged(format!("kline field {idx} missing"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn provider(market: MarketType) -> BinanceProvider {
        BinanceProvider::new(
            market,
            FetchConfig::default(),
            Arc::new(CircuitBreaker::default_exchange()),
        )
        .unwrap()
    }

    #[test]
    fn parses_kline_rows() {
        let rows: Vec<Vec<Value>> = serde_json::from_str(
            r#"[[1704067200000,"42283.58","42554.57","42261.02","42475.23","1271.68",
                 1704070799999,"53957248.97",47134,"682.57","28957416.82","0"]]"#,
        )
        .unwrap();
        let candles = parse_klines("BTCUSDT", &rows).unwrap();
        assert_eq!(candles.len(), 1);
        let c = &candles[0];
        assert_eq!(
            c.timestamp,
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap()
        );
        assert_eq!(c.open, 42283.58);
        assert_eq!(c.close, 42475.23);
        assert_eq!(c.quote_volume, 53957248.97);
        assert!(c.is_tradable);
    }

    #[test]
    fn rejects_truncated_row() {
        let rows: Vec<Vec<Value>> =
            serde_json::from_str(r#"[[1704067200000,"1","2","0.5","1.5","10"]]"#).unwrap();
        assert!(matches!(
            parse_klines("BTCUSDT", &rows),
            Err(DataError::ResponseFormatChanged(_))
        ));
    }

    #[test]
    fn rejects_non_numeric_price() {
        let rows: Vec<Vec<Value>> = serde_json::from_str(
            r#"[[1704067200000,"abc","2","0.5","1.5","10",0,"15",1,"0","0","0"]]"#,
        )
        .unwrap();
        assert!(parse_klines("BTCUSDT", &rows).is_err());
    }

    #[test]
    fn filters_exchange_info() {
        let info: ExchangeInfo = serde_json::from_str(
            r#"{"symbols":[
                {"symbol":"ETHUSDT","status":"TRADING","quoteAsset":"USDT","contractType":"PERPETUAL"},
                {"symbol":"BTCUSDT","status":"TRADING","quoteAsset":"USDT","contractType":"PERPETUAL"},
                {"symbol":"BTCUSDT_240329","status":"TRADING","quoteAsset":"USDT","contractType":"CURRENT_QUARTER"},
                {"symbol":"ETHBTC","status":"TRADING","quoteAsset":"BTC"},
                {"symbol":"LUNAUSDT","status":"BREAK","quoteAsset":"USDT","contractType":"PERPETUAL"}
            ]}"#,
        )
        .unwrap();
        assert_eq!(
            tradable_symbols(info, MarketType::Swap, "USDT"),
            vec!["BTCUSDT".to_string(), "ETHUSDT".to_string()]
        );
    }

    #[test]
    fn spot_ignores_contract_type() {
        let info: ExchangeInfo = serde_json::from_str(
            r#"{"symbols":[{"symbol":"SOLUSDT","status":"TRADING","quoteAsset":"USDT"}]}"#,
        )
        .unwrap();
        assert_eq!(tradable_symbols(info, MarketType::Spot, "USDT"), vec!["SOLUSDT".to_string()]);
    }

    #[test]
    fn kline_urls_per_market() {
        let spot = provider(MarketType::Spot).klines_url("BTCUSDT", Interval::Hour1, 1, 2);
        assert!(spot.starts_with("https://api.binance.com/api/v3/klines?symbol=BTCUSDT"));
        assert!(spot.contains("interval=1h"));
        assert!(spot.contains("limit=499"));

        let swap = provider(MarketType::Swap).klines_url("BTCUSDT", Interval::Day1, 1, 2);
        assert!(swap.starts_with("https://fapi.binance.com/fapi/v1/continuousKlines?pair=BTCUSDT"));
        assert!(swap.contains("contractType=PERPETUAL"));
        assert!(swap.contains("startTime=1&endTime=2"));
    }

    #[test]
    fn tripped_breaker_blocks_requests() {
        let p = provider(MarketType::Spot);
        p.circuit_breaker.trip();
        assert!(!p.is_available());
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap();
        assert!(matches!(
            p.fetch("BTCUSDT", Interval::Hour1, start, start),
            Err(DataError::CircuitBreakerTripped)
        ));
    }

    #[test]
    fn provider_names() {
        assert_eq!(provider(MarketType::Spot).name(), "binance_spot");
        assert_eq!(provider(MarketType::Swap).name(), "binance_swap");
    }
}
