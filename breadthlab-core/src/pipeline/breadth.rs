//! Market breadth index: mean trailing return across the liquid basket.

use tracing::debug;

use crate::domain::{IndexPoint, WindowComponent};
use crate::error::PipelineError;
use crate::pipeline::rank::RankedCrossSection;

/// Per window: sum of non-null returns divided by the full basket size.
///
/// Members without a return still count in the denominator, which pulls the
/// value toward zero when data is missing. No clamping is applied.
pub fn market_breadth_index(
    sections: &[RankedCrossSection],
    windows: &[u32],
) -> Result<Vec<IndexPoint>, PipelineError> {
    if windows.is_empty() {
        return Err(PipelineError::InvalidConfig(
            "market breadth index needs at least one window".into(),
        ));
    }

    let mut points = Vec::with_capacity(sections.len());
    for section in sections {
        let population = section.population();
        if population == 0 {
            debug!(timestamp = %section.timestamp, "empty basket; no breadth point");
            continue;
        }

        let mut components = Vec::with_capacity(windows.len());
        for &window in windows {
            let idx = section.window_index(window)?;
            let total: f64 = section
                .members
                .iter()
                .filter_map(|m| m.returns[idx])
                .filter(|r| r.is_finite())
                .sum();
            components.push(WindowComponent {
                window,
                value: total / population as f64,
                benchmark_rank: None,
            });
        }

        let value = components.iter().map(|c| c.value).sum::<f64>() / components.len() as f64;
        points.push(IndexPoint {
            timestamp: section.timestamp,
            value,
            population,
            components,
        });
    }
    Ok(points)
}
