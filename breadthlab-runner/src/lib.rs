//! BreadthLab runner: configuration, data resolution, index runs and their outputs.
//!
//! Builds on `breadthlab-core` to provide:
//! - TOML run configuration with validation
//! - Candle loading with cache/download/synthetic fallback
//! - The per-market index run with stage-level failure reporting
//! - CSV and manifest export, cross-market comparison
//! - Latest-value summaries and webhook notification

pub mod compare;
pub mod config;
pub mod data_loader;
pub mod export;
pub mod notify;
pub mod runner;
pub mod summary;

pub use compare::{compare_markets, ComparisonRow};
pub use config::{ConfigError, IndexSettings, IndexSpec, RunConfig};
pub use data_loader::{load_candles, load_csv, LoadError, LoadOptions, LoadedData};
pub use export::{save_comparison, save_outputs};
pub use notify::{NotifyError, WebhookNotifier};
pub use runner::{
    run_indices, BreadthSeries, CompositeSeries, IndexOutputs, RunManifest, RunStatus, Stage,
    StageFailure, SCHEMA_VERSION,
};
pub use summary::{render_markdown, render_table, MarketSummary, SeriesSnapshot};

#[cfg(test)]
mod send_sync_checks {
    use super::*;

    fn assert_send<T: Send>() {}
    fn assert_sync<T: Sync>() {}

    #[test]
    fn config_types_are_send_sync() {
        assert_send::<RunConfig>();
        assert_sync::<RunConfig>();
        assert_send::<IndexSettings>();
        assert_sync::<IndexSettings>();
        assert_send::<LoadOptions>();
        assert_sync::<LoadOptions>();
    }

    #[test]
    fn outputs_are_send_sync() {
        assert_send::<IndexOutputs>();
        assert_sync::<IndexOutputs>();
        assert_send::<RunManifest>();
        assert_sync::<RunManifest>();
        assert_send::<StageFailure>();
        assert_sync::<StageFailure>();
    }

    #[test]
    fn notifier_is_send_sync() {
        assert_send::<WebhookNotifier>();
        assert_sync::<WebhookNotifier>();
    }
}
