//! Domain types shared by every pipeline stage.

pub mod candle;
pub mod index;
pub mod market;

pub use candle::{Candle, SymbolSeries};
pub use index::{CompositePoint, IndexPoint, WindowComponent};
pub use market::{Interval, MarketType};
