//! Market type and candle interval.

use std::fmt;
use std::str::FromStr;

use chrono::{Duration, NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};

/// Which order book the candles come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketType {
    Spot,
    /// USDT-margined perpetual contracts.
    Swap,
}

impl MarketType {
    pub const ALL: [MarketType; 2] = [MarketType::Spot, MarketType::Swap];

    pub fn as_str(&self) -> &'static str {
        match self {
            MarketType::Spot => "spot",
            MarketType::Swap => "swap",
        }
    }
}

impl fmt::Display for MarketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MarketType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "spot" => Ok(MarketType::Spot),
            "swap" | "perp" | "perpetual" => Ok(MarketType::Swap),
            other => Err(format!("unknown market type '{other}' (expected spot or swap)")),
        }
    }
}

/// Candle interval as stored and fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Interval {
    #[serde(rename = "1h")]
    Hour1,
    #[serde(rename = "1d")]
    Day1,
}

impl Interval {
    pub fn as_str(&self) -> &'static str {
        match self {
            Interval::Hour1 => "1h",
            Interval::Day1 => "1d",
        }
    }

    pub fn duration(&self) -> Duration {
        match self {
            Interval::Hour1 => Duration::hours(1),
            Interval::Day1 => Duration::days(1),
        }
    }

    /// Open time of the interval containing `ts`.
    pub fn floor(&self, ts: NaiveDateTime) -> NaiveDateTime {
        match self {
            Interval::Hour1 => ts
                .date()
                .and_time(NaiveTime::MIN)
                + Duration::hours(i64::from(ts.hour())),
            Interval::Day1 => ts.date().and_time(NaiveTime::MIN),
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Interval {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1h" => Ok(Interval::Hour1),
            "1d" => Ok(Interval::Day1),
            other => Err(format!("unsupported interval '{other}' (expected 1h or 1d)")),
        }
    }
}
