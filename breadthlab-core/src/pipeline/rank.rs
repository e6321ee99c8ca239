//! Cross-sectional ranker: liquidity filter plus per-window return ranks.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::pipeline::cross_section::CrossSection;
use crate::universe::ExclusionList;

/// Basket size kept after the liquidity filter.
pub const DEFAULT_TOP_K: usize = 50;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedMember {
    pub symbol: String,
    pub traded_value: f64,
    pub returns: Vec<Option<f64>>,
    /// Rank per window, 1 = highest return. Null returns rank `population + 1`.
    pub ranks: Vec<usize>,
}

/// Top-K liquid symbols at one timestamp, in ingestion order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedCrossSection {
    pub timestamp: NaiveDateTime,
    pub windows: Vec<u32>,
    pub members: Vec<RankedMember>,
}

impl RankedCrossSection {
    pub fn population(&self) -> usize {
        self.members.len()
    }

    pub fn window_index(&self, window: u32) -> Result<usize, PipelineError> {
        self.windows
            .iter()
            .position(|&w| w == window)
            .ok_or(PipelineError::UnknownWindow { window })
    }

    pub fn member(&self, symbol: &str) -> Option<&RankedMember> {
        self.members.iter().find(|m| m.symbol == symbol)
    }
}

/// Filter a cross-section to its `top_k` most liquid symbols and rank returns.
///
/// Excluded symbols and symbols without a traded value are dropped first.
/// Ties in traded value or return keep ingestion order.
pub fn rank_cross_section(
    section: &CrossSection,
    top_k: usize,
    exclusions: &ExclusionList,
) -> RankedCrossSection {
    let mut eligible: Vec<(usize, f64)> = section
        .entries
        .iter()
        .enumerate()
        .filter(|(_, e)| !exclusions.contains(&e.symbol))
        .filter_map(|(i, e)| e.traded_value.filter(|v| v.is_finite()).map(|v| (i, v)))
        .collect();

    // sort_by is stable, so equal traded values keep ingestion order
    eligible.sort_by(|a, b| b.1.total_cmp(&a.1));
    eligible.truncate(top_k);
    eligible.sort_by_key(|&(i, _)| i);

    let population = eligible.len();
    let mut members: Vec<RankedMember> = eligible
        .into_iter()
        .map(|(i, traded_value)| {
            let entry = &section.entries[i];
            RankedMember {
                symbol: entry.symbol.clone(),
                traded_value,
                returns: entry.returns.clone(),
                ranks: vec![population + 1; section.windows.len()],
            }
        })
        .collect();

    for w in 0..section.windows.len() {
        let mut order: Vec<(usize, f64)> = members
            .iter()
            .enumerate()
            .filter_map(|(i, m)| m.returns[w].filter(|r| r.is_finite()).map(|r| (i, r)))
            .collect();
        order.sort_by(|a, b| b.1.total_cmp(&a.1));
        for (position, (i, _)) in order.into_iter().enumerate() {
            members[i].ranks[w] = position + 1;
        }
    }

    RankedCrossSection {
        timestamp: section.timestamp,
        windows: section.windows.clone(),
        members,
    }
}

/// Rank every cross-section with the same basket settings.
pub fn rank_all(
    sections: &[CrossSection],
    top_k: usize,
    exclusions: &ExclusionList,
) -> Vec<RankedCrossSection> {
    sections
        .iter()
        .map(|s| rank_cross_section(s, top_k, exclusions))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::cross_section::CrossSectionEntry;
    use chrono::NaiveDate;

    fn entry(symbol: &str, ret: Option<f64>, traded: Option<f64>) -> CrossSectionEntry {
        CrossSectionEntry {
            symbol: symbol.into(),
            returns: vec![ret],
            traded_value: traded,
        }
    }

    fn section(entries: Vec<CrossSectionEntry>) -> CrossSection {
        let ts = NaiveDate::from_ymd_opt(2024, 6, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        CrossSection::new(ts, vec![30], entries).unwrap()
    }

    fn ranks(ranked: &RankedCrossSection) -> Vec<(&str, usize)> {
        ranked
            .members
            .iter()
            .map(|m| (m.symbol.as_str(), m.ranks[0]))
            .collect()
    }

    #[test]
    fn ranks_by_return_descending() {
        let s = section(vec![
            entry("AAA", Some(0.1), Some(10.0)),
            entry("BBB", Some(0.3), Some(20.0)),
            entry("CCC", Some(-0.2), Some(30.0)),
        ]);
        let ranked = rank_cross_section(&s, 50, &ExclusionList::empty());
        assert_eq!(ranks(&ranked), vec![("AAA", 2), ("BBB", 1), ("CCC", 3)]);
    }

    #[test]
    fn keeps_top_k_by_traded_value() {
        let s = section(vec![
            entry("AAA", Some(0.1), Some(1.0)),
            entry("BBB", Some(0.2), Some(3.0)),
            entry("CCC", Some(0.3), Some(2.0)),
        ]);
        let ranked = rank_cross_section(&s, 2, &ExclusionList::empty());
        let symbols: Vec<&str> = ranked.members.iter().map(|m| m.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["BBB", "CCC"]);
        assert_eq!(ranked.population(), 2);
    }

    #[test]
    fn drops_excluded_and_unqualified() {
        let s = section(vec![
            entry("USDCUSDT", Some(0.0), Some(1e12)),
            entry("NEWUSDT", Some(5.0), None),
            entry("ETHUSDT", Some(0.1), Some(1.0)),
        ]);
        let ranked = rank_cross_section(&s, 50, &ExclusionList::default());
        assert_eq!(ranks(&ranked), vec![("ETHUSDT", 1)]);
    }

    #[test]
    fn null_returns_rank_last() {
        let s = section(vec![
            entry("AAA", None, Some(10.0)),
            entry("BBB", Some(0.3), Some(20.0)),
        ]);
        let ranked = rank_cross_section(&s, 50, &ExclusionList::empty());
        assert_eq!(ranks(&ranked), vec![("AAA", 3), ("BBB", 1)]);
    }

    #[test]
    fn ties_keep_ingestion_order() {
        let s = section(vec![
            entry("AAA", Some(0.1), Some(5.0)),
            entry("BBB", Some(0.1), Some(5.0)),
            entry("CCC", Some(0.1), Some(5.0)),
        ]);
        let ranked = rank_cross_section(&s, 2, &ExclusionList::empty());
        assert_eq!(ranks(&ranked), vec![("AAA", 1), ("BBB", 2)]);
    }

    #[test]
    fn unknown_window_is_an_error() {
        let s = section(vec![entry("AAA", Some(0.1), Some(5.0))]);
        let ranked = rank_cross_section(&s, 50, &ExclusionList::empty());
        assert_eq!(ranked.window_index(30).unwrap(), 0);
        assert_eq!(
            ranked.window_index(90).unwrap_err(),
            PipelineError::UnknownWindow { window: 90 }
        );
    }

    #[test]
    fn empty_section_ranks_to_empty() {
        let ranked = rank_cross_section(&section(vec![]), 50, &ExclusionList::empty());
        assert_eq!(ranked.population(), 0);
    }
}
