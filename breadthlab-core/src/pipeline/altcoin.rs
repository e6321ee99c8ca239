//! Altcoin index: where the benchmark's return ranks inside the liquid basket.
//!
//! Near 0 the benchmark leads the basket; near 1 most altcoins outperform it.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::domain::{IndexPoint, WindowComponent};
use crate::error::PipelineError;
use crate::pipeline::rank::RankedCrossSection;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AltcoinSeries {
    pub benchmark: String,
    pub windows: Vec<u32>,
    pub points: Vec<IndexPoint>,
    /// Points where the benchmark was outside the basket and ranked last.
    pub benchmark_absent: usize,
}

/// Compute the altcoin index over `windows`, averaging the per-window values.
///
/// Per window: `min(rank, population) / population`, rounded to two
/// decimals. A benchmark outside the basket takes rank `population + 1`.
/// Sections with an empty basket produce no point.
pub fn altcoin_index(
    sections: &[RankedCrossSection],
    benchmark: &str,
    windows: &[u32],
) -> Result<AltcoinSeries, PipelineError> {
    if windows.is_empty() {
        return Err(PipelineError::InvalidConfig(
            "altcoin index needs at least one window".into(),
        ));
    }

    let mut points = Vec::with_capacity(sections.len());
    let mut benchmark_absent = 0usize;

    for section in sections {
        let population = section.population();
        if population == 0 {
            debug!(timestamp = %section.timestamp, "empty basket; no altcoin point");
            continue;
        }

        let member = section.member(benchmark);
        if member.is_none() {
            benchmark_absent += 1;
            debug!(timestamp = %section.timestamp, benchmark, population, "benchmark outside basket");
        }

        let mut components = Vec::with_capacity(windows.len());
        for &window in windows {
            let idx = section.window_index(window)?;
            let rank = member.map_or(population + 1, |m| m.ranks[idx]);
            components.push(WindowComponent {
                window,
                value: round2(rank.min(population) as f64 / population as f64),
                benchmark_rank: Some(rank),
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

    if benchmark_absent > 0 {
        warn!(
            benchmark,
            benchmark_absent,
            points = points.len(),
            "benchmark missing from the basket; assigned worst rank"
        );
    }

    Ok(AltcoinSeries {
        benchmark: benchmark.to_string(),
        windows: windows.to_vec(),
        points,
        benchmark_absent,
    })
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::rank::RankedMember;
    use chrono::{NaiveDate, NaiveDateTime};

    fn ts(d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 2, d)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    fn member(symbol: &str, ranks: Vec<usize>) -> RankedMember {
        RankedMember {
            symbol: symbol.into(),
            traded_value: 1.0,
            returns: vec![Some(0.0); ranks.len()],
            ranks,
        }
    }

    fn section(d: u32, windows: Vec<u32>, members: Vec<RankedMember>) -> RankedCrossSection {
        RankedCrossSection {
            timestamp: ts(d),
            windows,
            members,
        }
    }

    #[test]
    fn value_is_rounded_rank_share() {
        let s = section(
            1,
            vec![30],
            vec![
                member("ETHUSDT", vec![1]),
                member("BTCUSDT", vec![2]),
                member("SOLUSDT", vec![3]),
            ],
        );
        let series = altcoin_index(&[s], "BTCUSDT", &[30]).unwrap();
        assert_eq!(series.points.len(), 1);
        assert_eq!(series.points[0].value, 0.67);
        assert_eq!(series.points[0].population, 3);
        assert_eq!(series.points[0].components[0].benchmark_rank, Some(2));
        assert_eq!(series.benchmark_absent, 0);
    }

    #[test]
    fn averages_windows_after_rounding() {
        let s = section(
            1,
            vec![30, 90],
            vec![
                member("BTCUSDT", vec![1, 3]),
                member("ETHUSDT", vec![2, 1]),
                member("SOLUSDT", vec![3, 2]),
            ],
        );
        let series = altcoin_index(&[s], "BTCUSDT", &[30, 90]).unwrap();
        // round(1/3) = 0.33, round(3/3) = 1.0
        assert!((series.points[0].value - (0.33 + 1.0) / 2.0).abs() < 1e-12);
    }

    #[test]
    fn absent_benchmark_ranks_last() {
        let s = section(1, vec![30], vec![member("ETHUSDT", vec![1]), member("SOLUSDT", vec![2])]);
        let series = altcoin_index(&[s], "BTCUSDT", &[30]).unwrap();
        assert_eq!(series.points[0].value, 1.0);
        assert_eq!(series.points[0].components[0].benchmark_rank, Some(3));
        assert_eq!(series.benchmark_absent, 1);
    }

    #[test]
    fn empty_basket_is_skipped() {
        let sections = vec![
            section(1, vec![30], vec![]),
            section(2, vec![30], vec![member("BTCUSDT", vec![1])]),
        ];
        let series = altcoin_index(&sections, "BTCUSDT", &[30]).unwrap();
        assert_eq!(series.points.len(), 1);
        assert_eq!(series.points[0].timestamp, ts(2));
        assert_eq!(series.points[0].value, 1.0);
    }

    #[test]
    fn unknown_window_fails() {
        let s = section(1, vec![30], vec![member("BTCUSDT", vec![1])]);
        assert_eq!(
            altcoin_index(&[s], "BTCUSDT", &[365]).unwrap_err(),
            PipelineError::UnknownWindow { window: 365 }
        );
    }

    #[test]
    fn no_windows_is_invalid() {
        assert!(matches!(
            altcoin_index(&[], "BTCUSDT", &[]),
            Err(PipelineError::InvalidConfig(_))
        ));
    }
}
