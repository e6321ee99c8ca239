//! Run configuration loaded from TOML.
//!
//! Every field has a default, so an empty file (or no file) is a valid
//! configuration. Sections: `[run]`, `[altcoin]`, `[breadth]`,
//! `[composite]`, `[fetch]`, `[notify]`.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use breadthlab_core::data::{FetchConfig, RetryPolicy};
use breadthlab_core::domain::{Interval, MarketType};
use breadthlab_core::pipeline::{LiquidityAggregation, LiquidityWindow, DEFAULT_TOP_K};
use breadthlab_core::universe::ExclusionList;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid config: {0}")]
    Invalid(String),

    #[error("exclusion list: {0}")]
    Exclusions(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub run: RunSection,
    pub altcoin: AltcoinSection,
    pub breadth: BreadthSection,
    pub composite: CompositeSection,
    pub fetch: FetchConfig,
    pub notify: NotifySection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunSection {
    pub markets: Vec<MarketType>,
    /// Interval fetched from the exchange and stored in the cache.
    pub interval: Interval,
    /// First day of candle history to download.
    pub history_start: NaiveDate,
    /// Index rows at or before this day are left out of the output.
    pub report_start: Option<NaiveDate>,
    pub top_k: usize,
    pub benchmark: String,
    pub exclusions: ExclusionList,
    /// TOML file replacing `exclusions` when set.
    pub exclusions_file: Option<PathBuf>,
    /// Explicit universe; empty means every symbol the exchange lists
    /// (or every cached symbol when offline).
    pub symbols: Vec<String>,
    pub cache_dir: PathBuf,
    pub output_dir: PathBuf,
}

impl Default for RunSection {
    fn default() -> Self {
        Self {
            markets: MarketType::ALL.to_vec(),
            interval: Interval::Hour1,
            history_start: NaiveDate::from_ymd_opt(2020, 1, 1).unwrap_or_default(),
            report_start: None,
            top_k: DEFAULT_TOP_K,
            benchmark: "BTCUSDT".into(),
            exclusions: ExclusionList::default(),
            exclusions_file: None,
            symbols: Vec::new(),
            cache_dir: PathBuf::from("data/cache"),
            output_dir: PathBuf::from("data/output"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AltcoinSection {
    pub windows: Vec<u32>,
    pub liquidity_window_days: usize,
    pub liquidity_aggregation: LiquidityAggregation,
}

impl Default for AltcoinSection {
    fn default() -> Self {
        let liquidity = LiquidityWindow::altcoin_default();
        Self {
            windows: vec![30, 90, 365],
            liquidity_window_days: liquidity.window_days,
            liquidity_aggregation: liquidity.aggregation,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreadthSection {
    pub windows: Vec<u32>,
    pub liquidity_window_days: usize,
    pub liquidity_aggregation: LiquidityAggregation,
}

impl Default for BreadthSection {
    fn default() -> Self {
        let liquidity = LiquidityWindow::breadth_default();
        Self {
            windows: vec![7, 30, 90],
            liquidity_window_days: liquidity.window_days,
            liquidity_aggregation: liquidity.aggregation,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompositeSection {
    /// Each window needs a matching altcoin and breadth window. The first
    /// one is the headline index written to `y_index.csv`.
    pub windows: Vec<u32>,
    /// Breadth windows compared across spot and swap.
    pub compare_windows: Vec<u32>,
}

impl Default for CompositeSection {
    fn default() -> Self {
        Self {
            windows: vec![30, 90],
            compare_windows: vec![7, 30],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifySection {
    /// Webhook receiving the markdown summary. Nothing is sent when unset.
    pub webhook_url: Option<String>,
    pub timeout_ms: u64,
    pub retry: RetryPolicy,
}

impl Default for NotifySection {
    fn default() -> Self {
        Self {
            webhook_url: None,
            timeout_ms: 10_000,
            retry: RetryPolicy::notify_default(),
        }
    }
}

/// Parameters for one index family after validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexSpec {
    pub windows: Vec<u32>,
    pub liquidity: LiquidityWindow,
}

/// Everything the index stages need, detached from file paths and fetch settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexSettings {
    pub top_k: usize,
    pub benchmark: String,
    pub exclusions: ExclusionList,
    pub altcoin: IndexSpec,
    pub breadth: IndexSpec,
    pub composite_windows: Vec<u32>,
    pub report_start: Option<NaiveDateTime>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            run: RunSection::default(),
            altcoin: AltcoinSection::default(),
            breadth: BreadthSection::default(),
            composite: CompositeSection::default(),
            fetch: FetchConfig::default(),
            notify: NotifySection::default(),
        }
    }
}

impl RunConfig {
    /// Load and validate a config file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parse and validate a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.run.markets.is_empty() {
            return invalid("run.markets must name at least one market".into());
        }
        if self.run.top_k == 0 {
            return invalid("run.top_k must be positive".into());
        }
        if self.run.benchmark.trim().is_empty() {
            return invalid("run.benchmark must not be empty".into());
        }
        if self.run.exclusions_file.is_none()
            && self.run.exclusions.contains(&self.run.benchmark)
        {
            return invalid(excluded_benchmark(&self.run.benchmark));
        }
        check_windows("altcoin.windows", &self.altcoin.windows)?;
        check_windows("breadth.windows", &self.breadth.windows)?;
        check_windows("composite.windows", &self.composite.windows)?;
        if self.altcoin.liquidity_window_days == 0 || self.breadth.liquidity_window_days == 0 {
            return invalid("liquidity_window_days must be positive".into());
        }
        for w in &self.composite.windows {
            if !self.altcoin.windows.contains(w) || !self.breadth.windows.contains(w) {
                return invalid(format!(
                    "composite window {w}d needs both an altcoin and a breadth window of {w}d"
                ));
            }
        }
        for w in &self.composite.compare_windows {
            if !self.breadth.windows.contains(w) {
                return invalid(format!("compare window {w}d is not a breadth window"));
            }
        }
        if self.fetch.parallelism == 0 {
            return invalid("fetch.parallelism must be positive".into());
        }
        if !(1..=1000).contains(&self.fetch.page_limit) {
            return invalid("fetch.page_limit must be within 1..=1000".into());
        }
        if let Some(start) = self.run.report_start {
            if start < self.run.history_start {
                return invalid("run.report_start precedes run.history_start".into());
            }
        }
        Ok(())
    }

    /// The effective exclusion list: the file when configured, else the inline list.
    pub fn exclusions(&self) -> Result<ExclusionList, ConfigError> {
        match &self.run.exclusions_file {
            Some(path) => ExclusionList::from_file(path).map_err(ConfigError::Exclusions),
            None => Ok(self.run.exclusions.clone()),
        }
    }

    pub fn index_settings(&self) -> Result<IndexSettings, ConfigError> {
        let exclusions = self.exclusions()?;
        if exclusions.contains(&self.run.benchmark) {
            return Err(ConfigError::Invalid(excluded_benchmark(&self.run.benchmark)));
        }
        Ok(IndexSettings {
            top_k: self.run.top_k,
            benchmark: self.run.benchmark.clone(),
            exclusions,
            altcoin: IndexSpec {
                windows: self.altcoin.windows.clone(),
                liquidity: LiquidityWindow {
                    window_days: self.altcoin.liquidity_window_days,
                    aggregation: self.altcoin.liquidity_aggregation,
                },
            },
            breadth: IndexSpec {
                windows: self.breadth.windows.clone(),
                liquidity: LiquidityWindow {
                    window_days: self.breadth.liquidity_window_days,
                    aggregation: self.breadth.liquidity_aggregation,
                },
            },
            composite_windows: self.composite.windows.clone(),
            report_start: self.run.report_start.map(|d| d.and_time(NaiveTime::MIN)),
        })
    }
}

fn excluded_benchmark(benchmark: &str) -> String {
    format!("benchmark {benchmark} is in the exclusion list and would never be ranked")
}

fn check_windows(name: &str, windows: &[u32]) -> Result<(), ConfigError> {
    if windows.is_empty() {
        return Err(ConfigError::Invalid(format!("{name} must not be empty")));
    }
    if windows.contains(&0) {
        return Err(ConfigError::Invalid(format!("{name} must be positive")));
    }
    let unique: HashSet<&u32> = windows.iter().collect();
    if unique.len() != windows.len() {
        return Err(ConfigError::Invalid(format!("{name} has duplicates")));
    }
    Ok(())
}
