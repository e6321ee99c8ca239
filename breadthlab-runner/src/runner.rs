//! Index runner: daily aggregation through the composite, one market at a time.
//!
//! `run_indices()` is pure: it takes loaded series and settings and returns
//! every index series, or the failing stage together with whatever was
//! already computed.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, info_span};

use breadthlab_core::data::DataSource;
use breadthlab_core::domain::{CompositePoint, IndexPoint, MarketType, SymbolSeries};
use breadthlab_core::pipeline::{
    aggregate_to_daily, altcoin_index, build_cross_sections, combine, compute_metrics,
    market_breadth_index, rank_all, AltcoinSeries, LiquidityWindow, RankedCrossSection,
};
use breadthlab_core::PipelineError;

use crate::config::IndexSettings;
use crate::data_loader::LoadedData;

/// Current schema version for persisted artifacts.
pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Aggregate,
    AltcoinRanking,
    AltcoinIndex,
    BreadthRanking,
    BreadthIndex,
    Composite,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Aggregate => "aggregate",
            Stage::AltcoinRanking => "altcoin_ranking",
            Stage::AltcoinIndex => "altcoin_index",
            Stage::BreadthRanking => "breadth_ranking",
            Stage::BreadthIndex => "breadth_index",
            Stage::Composite => "composite",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreadthSeries {
    pub window: u32,
    pub points: Vec<IndexPoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeSeries {
    pub window: u32,
    pub points: Vec<CompositePoint>,
}

/// Every index series computed for one market. Each altcoin and breadth
/// entry covers a single window.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexOutputs {
    /// Symbols with at least one daily bar.
    pub daily_symbols: usize,
    pub altcoin: Vec<AltcoinSeries>,
    pub breadth: Vec<BreadthSeries>,
    pub composite: Vec<CompositeSeries>,
}

impl IndexOutputs {
    pub fn altcoin_window(&self, window: u32) -> Option<&AltcoinSeries> {
        self.altcoin.iter().find(|s| s.windows == [window])
    }

    pub fn breadth_window(&self, window: u32) -> Option<&BreadthSeries> {
        self.breadth.iter().find(|s| s.window == window)
    }

    pub fn composite_window(&self, window: u32) -> Option<&CompositeSeries> {
        self.composite.iter().find(|s| s.window == window)
    }

    pub fn is_empty(&self) -> bool {
        self.altcoin.is_empty() && self.breadth.is_empty() && self.composite.is_empty()
    }

    /// Drop points at or before `start`.
    fn retain_after(&mut self, start: NaiveDateTime) {
        for s in &mut self.altcoin {
            s.points.retain(|p| p.timestamp > start);
        }
        for s in &mut self.breadth {
            s.points.retain(|p| p.timestamp > start);
        }
        for s in &mut self.composite {
            s.points.retain(|p| p.timestamp > start);
        }
    }
}

/// A stage failed; `partial` holds everything the earlier stages produced.
#[derive(Debug, Error)]
#[error("stage {stage} failed: {error}")]
pub struct StageFailure {
    pub stage: Stage,
    #[source]
    pub error: PipelineError,
    pub partial: Box<IndexOutputs>,
}

/// Compute every configured index series from raw candles.
pub fn run_indices(
    series: &[SymbolSeries],
    settings: &IndexSettings,
) -> Result<IndexOutputs, StageFailure> {
    let mut outputs = IndexOutputs::default();
    let result = run_stages(series, settings, &mut outputs);
    if let Some(start) = settings.report_start {
        outputs.retain_after(start);
    }
    match result {
        Ok(()) => Ok(outputs),
        Err((stage, error)) => Err(StageFailure {
            stage,
            error,
            partial: Box::new(outputs),
        }),
    }
}

fn run_stages(
    series: &[SymbolSeries],
    settings: &IndexSettings,
    outputs: &mut IndexOutputs,
) -> Result<(), (Stage, PipelineError)> {
    let daily = {
        let _span = info_span!("aggregate", symbols = series.len()).entered();
        series
            .iter()
            .map(aggregate_to_daily)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| (Stage::Aggregate, e))?
    };
    outputs.daily_symbols = daily.iter().filter(|s| !s.is_empty()).count();
    info!(symbols = outputs.daily_symbols, "daily bars ready");

    let ranked = rank_stage(&daily, &settings.altcoin.windows, settings.altcoin.liquidity, settings)
        .map_err(|e| (Stage::AltcoinRanking, e))?;
    for &window in &settings.altcoin.windows {
        let index = altcoin_index(&ranked, &settings.benchmark, &[window])
            .map_err(|e| (Stage::AltcoinIndex, e))?;
        info!(window, points = index.points.len(), absent = index.benchmark_absent, "altcoin index");
        outputs.altcoin.push(index);
    }

    let ranked = rank_stage(&daily, &settings.breadth.windows, settings.breadth.liquidity, settings)
        .map_err(|e| (Stage::BreadthRanking, e))?;
    for &window in &settings.breadth.windows {
        let points =
            market_breadth_index(&ranked, &[window]).map_err(|e| (Stage::BreadthIndex, e))?;
        info!(window, points = points.len(), "market breadth index");
        outputs.breadth.push(BreadthSeries { window, points });
    }

    for &window in &settings.composite_windows {
        let (Some(altcoin), Some(breadth)) =
            (outputs.altcoin_window(window), outputs.breadth_window(window))
        else {
            return Err((Stage::Composite, PipelineError::UnknownWindow { window }));
        };
        let points = combine(&altcoin.points, &breadth.points);
        info!(window, points = points.len(), "composite index");
        outputs.composite.push(CompositeSeries { window, points });
    }

    Ok(())
}

fn rank_stage(
    daily: &[SymbolSeries],
    windows: &[u32],
    liquidity: LiquidityWindow,
    settings: &IndexSettings,
) -> Result<Vec<RankedCrossSection>, PipelineError> {
    let metrics: Vec<_> = daily
        .iter()
        .map(|s| compute_metrics(s, windows, liquidity))
        .collect();
    let sections = build_cross_sections(&metrics)?;
    Ok(rank_all(&sections, settings.top_k, &settings.exclusions))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunStatus {
    Complete,
    Failed { stage: Stage, error: String },
}

/// Counts written to the manifest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunCounts {
    pub symbols_loaded: usize,
    pub daily_symbols: usize,
    pub candles: usize,
    /// Points per output series, keyed by series name.
    pub points: BTreeMap<String, usize>,
    /// Altcoin points where the benchmark ranked last for lack of data, per window.
    pub benchmark_absent: BTreeMap<u32, usize>,
}

/// Description of one market run, written next to its CSV files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunManifest {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub market: MarketType,
    pub generated_at: DateTime<Utc>,
    pub dataset_hash: String,
    pub has_synthetic: bool,
    pub counts: RunCounts,
    pub missing: Vec<String>,
    pub sources: BTreeMap<String, DataSource>,
    pub settings: IndexSettings,
    pub status: RunStatus,
    /// Output files relative to the market directory.
    #[serde(default)]
    pub files: Vec<String>,
}

fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}

impl RunManifest {
    pub fn new(
        loaded: &LoadedData,
        settings: &IndexSettings,
        outputs: &IndexOutputs,
        status: RunStatus,
    ) -> Self {
        let mut points = BTreeMap::new();
        for s in &outputs.altcoin {
            for &w in &s.windows {
                points.insert(format!("altcoin_index{w}"), s.points.len());
            }
        }
        for s in &outputs.breadth {
            points.insert(format!("market_breadth_index{}", s.window), s.points.len());
        }
        for s in &outputs.composite {
            points.insert(format!("y_index{}", s.window), s.points.len());
        }
        let benchmark_absent = outputs
            .altcoin
            .iter()
            .filter_map(|s| s.windows.first().map(|&w| (w, s.benchmark_absent)))
            .collect();

        Self {
            schema_version: SCHEMA_VERSION,
            market: loaded.market,
            generated_at: Utc::now(),
            dataset_hash: loaded.dataset_hash.clone(),
            has_synthetic: loaded.has_synthetic,
            counts: RunCounts {
                symbols_loaded: loaded.series.len(),
                daily_symbols: outputs.daily_symbols,
                candles: loaded.series.iter().map(SymbolSeries::len).sum(),
                points,
                benchmark_absent,
            },
            missing: loaded.missing.clone(),
            sources: loaded.sources.clone(),
            settings: settings.clone(),
            status,
            files: Vec::new(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.status == RunStatus::Complete
    }
}
