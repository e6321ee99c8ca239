//! The index pipeline, leaf-first:
//!
//! candles → [`aggregate_to_daily`] → [`compute_metrics`] →
//! [`build_cross_sections`] → [`rank_cross_section`] →
//! {[`altcoin_index`], [`market_breadth_index`]} → [`combine`].
//!
//! Every stage borrows its input and returns a new owned value; nothing here
//! retries, sleeps or touches the filesystem.

pub mod aggregate;
pub mod altcoin;
pub mod breadth;
pub mod composite;
pub mod cross_section;
pub mod metrics;
pub mod rank;

pub use aggregate::aggregate_to_daily;
pub use altcoin::{altcoin_index, AltcoinSeries};
pub use breadth::market_breadth_index;
pub use composite::combine;
pub use cross_section::{build_cross_sections, CrossSection, CrossSectionEntry};
pub use metrics::{
    compute_metrics, compute_return_and_liquidity, simple_return, LiquidityAggregation,
    LiquidityWindow, MetricRow, SymbolMetrics,
};
pub use rank::{rank_all, rank_cross_section, RankedCrossSection, RankedMember, DEFAULT_TOP_K};
