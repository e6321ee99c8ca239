//! Exclusion list: instruments kept out of every ranked basket.
//!
//! Stablecoins, wrapped assets and index products track something other
//! than their own market, so they would distort the rankings. The list is
//! plain configuration and can be loaded from TOML:
//!
//! ```toml
//! symbols = ["BTCDOMUSDT", "WBTCUSDT", "USDCUSDT"]
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;

/// Symbols excluded when nothing else is configured.
pub const DEFAULT_EXCLUSIONS: [&str; 6] = [
    "BTCDOMUSDT",
    "WBTCUSDT",
    "WBETHUSDT",
    "BNSOLUSDT",
    "USDCUSDT",
    "PAXGUSDT",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExclusionList {
    symbols: BTreeSet<String>,
}

impl ExclusionList {
    pub fn new<I, S>(symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            symbols: symbols.into_iter().map(Into::into).collect(),
        }
    }

    pub fn empty() -> Self {
        Self {
            symbols: BTreeSet::new(),
        }
    }

    /// Load an exclusion list from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, String> {
        let content =
            std::fs::read_to_string(path).map_err(|e| format!("read exclusion file: {e}"))?;
        Self::from_toml(&content)
    }

    /// Parse an exclusion list from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, String> {
        toml::from_str(content).map_err(|e| format!("parse exclusion TOML: {e}"))
    }

    /// Serialize the exclusion list to TOML.
    pub fn to_toml(&self) -> Result<String, String> {
        toml::to_string_pretty(self).map_err(|e| format!("serialize exclusions: {e}"))
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.symbols.contains(symbol)
    }

    pub fn insert(&mut self, symbol: impl Into<String>) -> bool {
        self.symbols.insert(symbol.into())
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.symbols.iter().map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

impl Default for ExclusionList {
    fn default() -> Self {
        Self::new(DEFAULT_EXCLUSIONS)
    }
}
