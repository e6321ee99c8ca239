//! Index output points.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// One window's contribution to an index point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowComponent {
    pub window: u32,
    pub value: f64,
    /// Benchmark rank behind an altcoin value; `None` for breadth.
    pub benchmark_rank: Option<usize>,
}

/// Index value at one timestamp: the mean of its window components.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexPoint {
    pub timestamp: NaiveDateTime,
    pub value: f64,
    /// Size of the ranked basket the value was computed over.
    pub population: usize,
    pub components: Vec<WindowComponent>,
}

impl IndexPoint {
    pub fn component(&self, window: u32) -> Option<&WindowComponent> {
        self.components.iter().find(|c| c.window == window)
    }
}

/// Composite ("Y") index point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CompositePoint {
    pub timestamp: NaiveDateTime,
    pub breadth: f64,
    pub altcoin: f64,
    /// `(breadth + altcoin) * 100`.
    pub value: f64,
}
