//! Composite ("Y") index: breadth plus altcoin, scaled to percent.

use std::collections::HashMap;

use chrono::NaiveDateTime;

use crate::domain::{CompositePoint, IndexPoint};

/// Inner-join the two indices on timestamp; `value = (breadth + altcoin) * 100`.
pub fn combine(altcoin: &[IndexPoint], breadth: &[IndexPoint]) -> Vec<CompositePoint> {
    let altcoin_by_time: HashMap<NaiveDateTime, f64> =
        altcoin.iter().map(|p| (p.timestamp, p.value)).collect();

    let mut points: Vec<CompositePoint> = breadth
        .iter()
        .filter_map(|b| {
            altcoin_by_time.get(&b.timestamp).map(|&a| CompositePoint {
                timestamp: b.timestamp,
                breadth: b.value,
                altcoin: a,
                value: (b.value + a) * 100.0,
            })
        })
        .collect();
    points.sort_by_key(|p| p.timestamp);
    points
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn point(d: u32, value: f64) -> IndexPoint {
        IndexPoint {
            timestamp: NaiveDate::from_ymd_opt(2024, 4, d)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap(),
            value,
            population: 1,
            components: Vec::new(),
        }
    }

    #[test]
    fn joins_on_shared_timestamps_only() {
        let altcoin = vec![point(1, 0.5), point(2, 0.25), point(4, 1.0)];
        let breadth = vec![point(3, 0.1), point(2, 0.05), point(1, -0.2)];
        let y = combine(&altcoin, &breadth);

        assert_eq!(y.len(), 2);
        assert_eq!(y[0].timestamp, point(1, 0.0).timestamp);
        assert!((y[0].value - 30.0).abs() < 1e-9);
        assert!((y[1].value - 30.0).abs() < 1e-9);
        assert_eq!(y[1].altcoin, 0.25);
        assert_eq!(y[1].breadth, 0.05);
    }

    #[test]
    fn empty_side_gives_empty_result() {
        assert!(combine(&[], &[point(1, 0.1)]).is_empty());
        assert!(combine(&[point(1, 0.1)], &[]).is_empty());
    }
}
