//! Property tests for pipeline invariants.
//!
//! Uses proptest to verify:
//! 1. Aggregation: first/last/max/min/sum per day, idempotent on daily bars
//! 2. Ranking: independent of input row order when values are distinct
//! 3. Altcoin index: always within [0, 1]
//! 4. Composite: (breadth + altcoin) * 100 over the timestamp intersection

use std::collections::HashSet;

use breadthlab_core::domain::{Candle, IndexPoint, SymbolSeries};
use breadthlab_core::pipeline::{
    aggregate_to_daily, altcoin_index, combine, rank_cross_section, CrossSection,
    CrossSectionEntry, RankedCrossSection, RankedMember,
};
use breadthlab_core::universe::ExclusionList;
use chrono::{Duration, NaiveDate, NaiveDateTime};
use proptest::prelude::*;

fn base() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 1, 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
}

// ── Strategies (proptest) ────────────────────────────────────────────

fn arb_price() -> impl Strategy<Value = f64> {
    (1.0..1000.0_f64).prop_map(|p| (p * 100.0).round() / 100.0)
}

/// (hour offset, open, high, low, close, quote volume, tradable)
fn arb_hourly() -> impl Strategy<Value = Vec<(i64, f64, f64, f64, f64, f64, bool)>> {
    prop::collection::btree_set(0..(24 * 6_i64), 1..80).prop_flat_map(|hours| {
        let n = hours.len();
        (
            Just(hours.into_iter().collect::<Vec<_>>()),
            prop::collection::vec(
                (arb_price(), arb_price(), 0.0..1e6_f64, prop::bool::weighted(0.85)),
                n,
            ),
        )
            .prop_map(|(hours, fields)| {
                hours
                    .into_iter()
                    .zip(fields)
                    .map(|(h, (a, b, qv, tradable))| {
                        let (low, high) = if a < b { (a, b) } else { (b, a) };
                        (h, a, high, low, b, qv, tradable)
                    })
                    .collect()
            })
    })
}

fn hourly_series(rows: &[(i64, f64, f64, f64, f64, f64, bool)]) -> SymbolSeries {
    let candles = rows
        .iter()
        .map(|&(h, open, high, low, close, qv, tradable)| Candle {
            symbol: "ADAUSDT".into(),
            timestamp: base() + Duration::hours(h),
            open,
            high,
            low,
            close,
            volume: qv / close,
            quote_volume: qv,
            is_tradable: tradable,
        })
        .collect();
    SymbolSeries::new("ADAUSDT", candles).unwrap()
}

/// Distinct traded values and returns so ranking has no ties.
fn arb_entries() -> impl Strategy<Value = Vec<CrossSectionEntry>> {
    (2usize..40).prop_flat_map(|n| {
        (
            prop::collection::hash_set(1u32..100_000, n),
            prop::collection::hash_set(-5000i32..5000, n),
            Just(n),
        )
            .prop_map(|(traded, returns, n)| {
                traded
                    .into_iter()
                    .zip(returns)
                    .take(n)
                    .enumerate()
                    .map(|(i, (t, r))| CrossSectionEntry {
                        symbol: format!("SYM{i}USDT"),
                        returns: vec![Some(r as f64 / 1000.0)],
                        traded_value: Some(t as f64),
                    })
                    .collect()
            })
    })
}

// ── 1. Aggregation ───────────────────────────────────────────────────

proptest! {
    #[test]
    fn daily_bar_matches_tradable_hours(rows in arb_hourly()) {
        let series = hourly_series(&rows);
        let daily = aggregate_to_daily(&series).unwrap();

        for bar in daily.candles() {
            let hours: Vec<&Candle> = series
                .candles()
                .iter()
                .filter(|c| c.is_tradable && c.day() == bar.day())
                .collect();
            prop_assert!(!hours.is_empty());
            prop_assert_eq!(bar.open, hours[0].open);
            prop_assert_eq!(bar.close, hours[hours.len() - 1].close);
            let high = hours.iter().map(|c| c.high).fold(f64::MIN, f64::max);
            let low = hours.iter().map(|c| c.low).fold(f64::MAX, f64::min);
            prop_assert_eq!(bar.high, high);
            prop_assert_eq!(bar.low, low);
            let qv: f64 = hours.iter().map(|c| c.quote_volume).sum();
            prop_assert!((bar.quote_volume - qv).abs() <= 1e-6 * qv.max(1.0));
        }

        // Days with no tradable hour produce no bar
        let tradable_days: HashSet<NaiveDate> = series
            .candles()
            .iter()
            .filter(|c| c.is_tradable)
            .map(|c| c.day())
            .collect();
        prop_assert_eq!(daily.len(), tradable_days.len());
    }

    #[test]
    fn aggregation_is_idempotent(rows in arb_hourly()) {
        let once = aggregate_to_daily(&hourly_series(&rows)).unwrap();
        let twice = aggregate_to_daily(&once).unwrap();
        prop_assert_eq!(once, twice);
    }
}

// ── 2. Ranking order independence ────────────────────────────────────

proptest! {
    #[test]
    fn ranks_ignore_row_order(
        entries in arb_entries(),
        top_k in 1usize..60,
        seed in any::<u64>(),
    ) {
        let ts = base();
        let mut shuffled = entries.clone();
        // Deterministic Fisher-Yates driven by the seed
        let mut state = seed | 1;
        for i in (1..shuffled.len()).rev() {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            let j = (state % (i as u64 + 1)) as usize;
            shuffled.swap(i, j);
        }

        let exclusions = ExclusionList::empty();
        let a = rank_cross_section(&CrossSection::new(ts, vec![30], entries).unwrap(), top_k, &exclusions);
        let b = rank_cross_section(&CrossSection::new(ts, vec![30], shuffled).unwrap(), top_k, &exclusions);

        let mut ra: Vec<(String, usize)> = a.members.iter().map(|m| (m.symbol.clone(), m.ranks[0])).collect();
        let mut rb: Vec<(String, usize)> = b.members.iter().map(|m| (m.symbol.clone(), m.ranks[0])).collect();
        ra.sort();
        rb.sort();
        prop_assert_eq!(ra, rb);
    }
}

// ── 3. Altcoin index bounds ──────────────────────────────────────────

proptest! {
    #[test]
    fn altcoin_index_in_unit_interval(
        entries in arb_entries(),
        top_k in 1usize..60,
        benchmark_idx in 0usize..80,
    ) {
        let benchmark = format!("SYM{benchmark_idx}USDT");
        let section = CrossSection::new(base(), vec![30], entries).unwrap();
        let ranked = rank_cross_section(&section, top_k, &ExclusionList::empty());
        let series = altcoin_index(&[ranked], &benchmark, &[30]).unwrap();
        for p in &series.points {
            prop_assert!((0.0..=1.0).contains(&p.value), "value {} out of range", p.value);
        }
    }

    #[test]
    fn altcoin_index_bounded_with_null_ranks(pop in 1usize..60, rank in 1usize..70) {
        let members: Vec<RankedMember> = (0..pop)
            .map(|i| RankedMember {
                symbol: if i == 0 { "BTCUSDT".into() } else { format!("S{i}") },
                traded_value: 1.0,
                returns: vec![None],
                ranks: vec![if i == 0 { rank.min(pop + 1) } else { 1 }],
            })
            .collect();
        let section = RankedCrossSection { timestamp: base(), windows: vec![30], members };
        let series = altcoin_index(&[section], "BTCUSDT", &[30]).unwrap();
        prop_assert!((0.0..=1.0).contains(&series.points[0].value));
    }
}

// ── 4. Composite join ────────────────────────────────────────────────

fn points(days: &[i64], values: &[f64]) -> Vec<IndexPoint> {
    days.iter()
        .zip(values)
        .map(|(&d, &value)| IndexPoint {
            timestamp: base() + Duration::days(d),
            value,
            population: 1,
            components: Vec::new(),
        })
        .collect()
}

proptest! {
    #[test]
    fn composite_is_scaled_sum_on_intersection(
        altcoin_days in prop::collection::btree_set(0i64..60, 0..40),
        breadth_days in prop::collection::btree_set(0i64..60, 0..40),
        a in 0.0..1.0_f64,
        b in -1.0..1.0_f64,
    ) {
        let altcoin_days: Vec<i64> = altcoin_days.into_iter().collect();
        let breadth_days: Vec<i64> = breadth_days.into_iter().collect();
        let altcoin = points(&altcoin_days, &vec![a; altcoin_days.len()]);
        let breadth = points(&breadth_days, &vec![b; breadth_days.len()]);

        let y = combine(&altcoin, &breadth);
        let shared: Vec<i64> = altcoin_days.iter().filter(|d| breadth_days.contains(d)).copied().collect();

        prop_assert_eq!(y.len(), shared.len());
        for (p, d) in y.iter().zip(&shared) {
            prop_assert_eq!(p.timestamp, base() + Duration::days(*d));
            prop_assert!((p.value - (a + b) * 100.0).abs() < 1e-9);
        }
    }
}
