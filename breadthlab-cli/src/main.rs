//! BreadthLab CLI: download, run, summary, check and cache commands.
//!
//! Commands:
//! - `download` fetches candles from Binance into the Parquet cache
//! - `run` computes every index for one or both markets and writes CSVs
//! - `summary` prints the latest values from a previous run
//! - `check` inspects cached candles for gaps and untradable rows
//! - `cache status` reports cached ranges per symbol
//! - `config` prints the default configuration

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Utc};
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

use breadthlab_core::data::{
    download_symbols, inspect, BinanceProvider, CircuitBreaker, DataProvider, DownloadRequest,
    LogProgress, ParquetCache, Severity,
};
use breadthlab_core::domain::MarketType;
use breadthlab_runner::{
    compare_markets, load_candles, load_csv, render_markdown, render_table, run_indices,
    save_comparison, save_outputs, IndexOutputs, LoadOptions, LoadedData, MarketSummary,
    RunConfig, RunManifest, RunStatus, WebhookNotifier,
};

#[derive(Parser)]
#[command(
    name = "breadthlab",
    about = "BreadthLab CLI: altcoin, market breadth and Y indices for crypto markets"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download candles from Binance and cache them as Parquet.
    Download {
        /// spot, swap or all. Defaults to the configured markets.
        #[arg(long, value_parser = parse_markets)]
        market: Option<Markets>,

        /// Symbols to download. Defaults to the configured list, else every
        /// tradable symbol the exchange lists.
        symbols: Vec<String>,

        /// Path to a TOML config file.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Start date (YYYY-MM-DD). Defaults to run.history_start.
        #[arg(long)]
        start: Option<NaiveDate>,

        /// Force re-download even if cached.
        #[arg(long, default_value_t = false)]
        force: bool,

        /// Cache directory. Defaults to run.cache_dir.
        #[arg(long)]
        cache_dir: Option<PathBuf>,
    },
    /// Compute every index and write CSV files plus a manifest per market.
    Run {
        /// spot, swap or all. Defaults to the configured markets.
        #[arg(long, value_parser = parse_markets)]
        market: Option<Markets>,

        /// Path to a TOML config file.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Read candles from a CSV file or directory instead of the cache.
        /// With several markets, `{input}/{market}` is used when it exists.
        #[arg(long)]
        input: Option<PathBuf>,

        /// Offline mode: no network access.
        #[arg(long, default_value_t = false)]
        offline: bool,

        /// Use synthetic candles for symbols without data.
        #[arg(long, default_value_t = false)]
        synthetic: bool,

        /// Cache directory. Defaults to run.cache_dir.
        #[arg(long)]
        cache_dir: Option<PathBuf>,

        /// Output directory. Defaults to run.output_dir.
        #[arg(long)]
        output_dir: Option<PathBuf>,

        /// Only report index values after this date (YYYY-MM-DD).
        #[arg(long)]
        start: Option<NaiveDate>,

        /// Post the summary to the configured webhook.
        #[arg(long, default_value_t = false)]
        notify: bool,
    },
    /// Print the latest index values from a previous run.
    Summary {
        #[arg(long, value_parser = parse_markets)]
        market: Option<Markets>,

        #[arg(long)]
        config: Option<PathBuf>,

        #[arg(long)]
        output_dir: Option<PathBuf>,

        /// Print markdown instead of a table.
        #[arg(long, default_value_t = false)]
        markdown: bool,

        /// Post the summary to the configured webhook.
        #[arg(long, default_value_t = false)]
        notify: bool,
    },
    /// Inspect cached candles for gaps, duplicates and untradable rows.
    Check {
        #[arg(long, value_parser = parse_markets)]
        market: Option<Markets>,

        /// Symbols to check. Defaults to every cached symbol.
        symbols: Vec<String>,

        #[arg(long)]
        config: Option<PathBuf>,

        #[arg(long)]
        cache_dir: Option<PathBuf>,

        /// Print the reports as JSON.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Cache management commands.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
    /// Print the default configuration as TOML.
    Config,
}

#[derive(Subcommand)]
enum CacheAction {
    /// Report cached range and candle count per symbol.
    Status {
        #[arg(long, value_parser = parse_markets)]
        market: Option<Markets>,

        #[arg(long)]
        config: Option<PathBuf>,

        #[arg(long)]
        cache_dir: Option<PathBuf>,
    },
}

/// `--market` value: one market, or both for `all`.
#[derive(Debug, Clone)]
struct Markets(Vec<MarketType>);

fn parse_markets(raw: &str) -> Result<Markets, String> {
    if raw.eq_ignore_ascii_case("all") {
        return Ok(Markets(MarketType::ALL.to_vec()));
    }
    raw.parse::<MarketType>().map(|m| Markets(vec![m]))
}

fn select_markets(flag: Option<Markets>, config: &RunConfig) -> Vec<MarketType> {
    flag.map_or_else(|| config.run.markets.clone(), |m| m.0)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Download {
            market,
            symbols,
            config,
            start,
            force,
            cache_dir,
        } => {
            let mut config = load_config(config.as_deref())?;
            if let Some(dir) = cache_dir {
                config.run.cache_dir = dir;
            }
            if let Some(start) = start {
                config.run.history_start = start;
            }
            if !symbols.is_empty() {
                config.run.symbols = symbols;
            }
            let markets = select_markets(market, &config);
            run_download(&config, &markets, force)
        }
        Commands::Run {
            market,
            config,
            input,
            offline,
            synthetic,
            cache_dir,
            output_dir,
            start,
            notify,
        } => {
            let mut config = load_config(config.as_deref())?;
            if let Some(dir) = cache_dir {
                config.run.cache_dir = dir;
            }
            if let Some(dir) = output_dir {
                config.run.output_dir = dir;
            }
            if start.is_some() {
                config.run.report_start = start;
            }
            config.validate()?;
            let markets = select_markets(market, &config);
            let opts = RunFlags {
                input,
                offline,
                synthetic,
                notify,
            };
            run_index_cmd(&config, &markets, &opts)
        }
        Commands::Summary {
            market,
            config,
            output_dir,
            markdown,
            notify,
        } => {
            let mut config = load_config(config.as_deref())?;
            if let Some(dir) = output_dir {
                config.run.output_dir = dir;
            }
            let markets = select_markets(market, &config);
            run_summary(&config, &markets, markdown, notify)
        }
        Commands::Check {
            market,
            symbols,
            config,
            cache_dir,
            json,
        } => {
            let mut config = load_config(config.as_deref())?;
            if let Some(dir) = cache_dir {
                config.run.cache_dir = dir;
            }
            let markets = select_markets(market, &config);
            run_check(&config, &markets, &symbols, json)
        }
        Commands::Cache { action } => match action {
            CacheAction::Status {
                market,
                config,
                cache_dir,
            } => {
                let mut config = load_config(config.as_deref())?;
                if let Some(dir) = cache_dir {
                    config.run.cache_dir = dir;
                }
                let markets = select_markets(market, &config);
                run_cache_status(&config, &markets)
            }
        },
        Commands::Config => {
            print!("{}", RunConfig::default().to_toml()?);
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<RunConfig> {
    match path {
        Some(path) => RunConfig::from_file(path)
            .with_context(|| format!("failed to load config {}", path.display())),
        None => Ok(RunConfig::default()),
    }
}

fn history_range(config: &RunConfig) -> (NaiveDateTime, NaiveDateTime) {
    (
        config.run.history_start.and_time(NaiveTime::MIN),
        Utc::now().naive_utc(),
    )
}

fn provider_for(config: &RunConfig, market: MarketType) -> Result<BinanceProvider> {
    let breaker = Arc::new(CircuitBreaker::new(
        Duration::from_secs(config.fetch.breaker_cooldown_secs),
        config.fetch.breaker_threshold,
    ));
    Ok(BinanceProvider::new(market, config.fetch.clone(), breaker)?)
}

fn run_download(config: &RunConfig, markets: &[MarketType], force: bool) -> Result<()> {
    let (start, end) = history_range(config);
    let request = DownloadRequest {
        interval: config.run.interval,
        start,
        end,
        force,
    };

    let mut failed = 0;
    for &market in markets {
        let provider = provider_for(config, market)?;
        let cache = ParquetCache::for_market(&config.run.cache_dir, market);
        let symbols = if config.run.symbols.is_empty() {
            provider.list_symbols(&config.fetch.quote_asset)?
        } else {
            config.run.symbols.clone()
        };
        info!(%market, symbols = symbols.len(), %start, %end, "downloading");

        let summary = download_symbols(
            &provider,
            &cache,
            &symbols,
            &request,
            config.fetch.parallelism,
            &LogProgress,
        )?;
        println!(
            "{market}: {}/{} symbols ok, {} candles written",
            summary.succeeded, summary.total, summary.candles
        );
        for (symbol, err) in &summary.errors {
            eprintln!("Error for {symbol}: {err}");
        }
        failed += summary.failed;
    }

    if failed > 0 {
        std::process::exit(1);
    }
    Ok(())
}

struct RunFlags {
    input: Option<PathBuf>,
    offline: bool,
    synthetic: bool,
    notify: bool,
}

fn load_market(
    config: &RunConfig,
    market: MarketType,
    markets: &[MarketType],
    flags: &RunFlags,
) -> Result<LoadedData> {
    if let Some(input) = &flags.input {
        let per_market = input.join(market.as_str());
        let path = if markets.len() > 1 && per_market.exists() {
            per_market
        } else {
            input.clone()
        };
        return Ok(load_csv(&path, market)?);
    }

    let (start, end) = history_range(config);
    let opts = LoadOptions {
        market,
        interval: config.run.interval,
        start,
        end,
        offline: flags.offline,
        synthetic: flags.synthetic,
        force: false,
        parallelism: config.fetch.parallelism,
        quote_asset: config.fetch.quote_asset.clone(),
    };
    let cache = ParquetCache::for_market(&config.run.cache_dir, market);
    let provider = if flags.offline {
        None
    } else {
        Some(provider_for(config, market)?)
    };
    let provider_ref = provider.as_ref().map(|p| p as &dyn DataProvider);
    Ok(load_candles(
        &config.run.symbols,
        &cache,
        provider_ref,
        &LogProgress,
        &opts,
    )?)
}

fn run_index_cmd(config: &RunConfig, markets: &[MarketType], flags: &RunFlags) -> Result<()> {
    let settings = config.index_settings()?;
    let output_dir = &config.run.output_dir;

    let mut outputs_by_market: BTreeMap<MarketType, IndexOutputs> = BTreeMap::new();
    let mut summaries = Vec::new();
    let mut failures = Vec::new();

    for &market in markets {
        let loaded = load_market(config, market, markets, flags)?;
        if !loaded.missing.is_empty() {
            warn!(%market, missing = loaded.missing.len(), "symbols without data were skipped");
        }

        let (outputs, status) = match run_indices(&loaded.series, &settings) {
            Ok(outputs) => (outputs, RunStatus::Complete),
            Err(failure) => {
                error!(%market, stage = %failure.stage, error = %failure.error, "index run failed; exporting partial outputs");
                failures.push(format!("{market}: {failure}"));
                let status = RunStatus::Failed {
                    stage: failure.stage,
                    error: failure.error.to_string(),
                };
                (*failure.partial, status)
            }
        };

        let manifest = RunManifest::new(&loaded, &settings, &outputs, status);
        let market_dir = save_outputs(&outputs, &manifest, output_dir)?;
        info!(%market, dir = %market_dir.display(), "outputs written");

        summaries.push(MarketSummary::from_outputs(market, &outputs));
        outputs_by_market.insert(market, outputs);
    }

    if let (Some(swap), Some(spot)) = (
        outputs_by_market.get(&MarketType::Swap),
        outputs_by_market.get(&MarketType::Spot),
    ) {
        for &window in &config.composite.compare_windows {
            let (Some(swap_series), Some(spot_series)) =
                (swap.breadth_window(window), spot.breadth_window(window))
            else {
                warn!(window, "breadth series missing; comparison skipped");
                continue;
            };
            let rows = compare_markets(&swap_series.points, &spot_series.points);
            let path = save_comparison(&rows, window, output_dir)?;
            info!(window, rows = rows.len(), path = %path.display(), "comparison written");
        }
    }

    print!("{}", render_table(&summaries));

    if flags.notify {
        notify(config, &summaries)?;
    }

    if !failures.is_empty() {
        bail!("index run failed: {}", failures.join("; "));
    }
    Ok(())
}

fn notify(config: &RunConfig, summaries: &[MarketSummary]) -> Result<()> {
    if let Some(notifier) = WebhookNotifier::from_config(&config.notify)? {
        notifier.send_markdown(&render_markdown(summaries))?;
    }
    Ok(())
}

fn run_summary(config: &RunConfig, markets: &[MarketType], markdown: bool, send: bool) -> Result<()> {
    let summaries = markets
        .iter()
        .map(|&m| MarketSummary::from_dir(&config.run.output_dir, m))
        .collect::<Result<Vec<_>>>()?;

    if markdown {
        print!("{}", render_markdown(&summaries));
    } else {
        print!("{}", render_table(&summaries));
    }
    if send {
        notify(config, &summaries)?;
    }
    Ok(())
}

fn cached_symbols(cache: &ParquetCache, requested: &[String]) -> Result<Vec<String>> {
    if requested.is_empty() {
        Ok(cache.symbols()?)
    } else {
        Ok(requested.to_vec())
    }
}

fn run_check(config: &RunConfig, markets: &[MarketType], symbols: &[String], json: bool) -> Result<()> {
    let mut reports = Vec::new();
    for &market in markets {
        let cache = ParquetCache::for_market(&config.run.cache_dir, market);
        for symbol in cached_symbols(&cache, symbols)? {
            match cache.load(&symbol) {
                Ok(candles) => reports.push((market, inspect(&symbol, &candles, config.run.interval))),
                Err(e) => warn!(%market, symbol, error = %e, "cannot load cached candles"),
            }
        }
    }

    if json {
        let by_market: Vec<_> = reports
            .iter()
            .map(|(m, r)| serde_json::json!({ "market": m, "report": r }))
            .collect();
        println!("{}", serde_json::to_string_pretty(&by_market)?);
    } else {
        println!(
            "{:<6} {:<16} {:>8} {:>8}  {:<20} {:<20} issues",
            "market", "symbol", "rows", "tradable", "first", "last"
        );
        for (market, r) in &reports {
            let issues: Vec<String> = r
                .anomalies
                .iter()
                .map(|a| format!("{:?}x{} ({:?})", a.anomaly_type, a.count, a.severity))
                .collect();
            println!(
                "{:<6} {:<16} {:>8} {:>8}  {:<20} {:<20} {}",
                market.as_str(),
                r.symbol,
                r.rows,
                r.tradable_rows,
                r.first.map(|t| t.to_string()).unwrap_or_default(),
                r.last.map(|t| t.to_string()).unwrap_or_default(),
                if issues.is_empty() { "-".to_string() } else { issues.join(", ") }
            );
        }
    }

    let errors = reports
        .iter()
        .filter(|(_, r)| r.worst_severity() == Some(Severity::Error))
        .count();
    if errors > 0 {
        bail!("{errors} symbol(s) have data errors");
    }
    Ok(())
}

fn run_cache_status(config: &RunConfig, markets: &[MarketType]) -> Result<()> {
    if !config.run.cache_dir.exists() {
        println!("Cache directory does not exist: {}", config.run.cache_dir.display());
        return Ok(());
    }

    for &market in markets {
        let cache = ParquetCache::for_market(&config.run.cache_dir, market);
        let symbols = cache.symbols()?;
        println!("== {market} ({} symbols) ==", symbols.len());
        let refs: Vec<&str> = symbols.iter().map(String::as_str).collect();
        let mut total = 0;
        for status in cache.status(&refs) {
            match (status.start, status.end, status.candle_count) {
                (Some(start), Some(end), Some(count)) => {
                    total += count;
                    println!("  {:<16} {start} .. {end}  {count:>8} candles", status.symbol);
                }
                _ => println!("  {:<16} (no metadata)", status.symbol),
            }
        }
        println!("  total: {total} candles");
    }
    Ok(())
}
