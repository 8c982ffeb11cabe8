pub mod memory;
pub mod postgres_rows;

use augur_domain::value_objects::bar::Bar;

/// Sorts by timestamp, keeps the last of duplicate timestamps and drops bars
/// with non-positive or non-finite prices. Returns the number dropped.
pub(crate) fn canonicalize_bars(bars: &mut Vec<Bar>) -> usize {
    let before = bars.len();
    bars.retain(Bar::is_valid);
    let invalid = before - bars.len();

    bars.sort_by_key(|bar| bar.timestamp);
    let mut deduped: Vec<Bar> = Vec::with_capacity(bars.len());
    for bar in bars.drain(..) {
        match deduped.last_mut() {
            Some(last) if last.timestamp == bar.timestamp => *last = bar,
            _ => deduped.push(bar),
        }
    }
    let duplicates = before - invalid - deduped.len();
    *bars = deduped;
    invalid + duplicates
}

#[cfg(test)]
mod tests {
    use super::canonicalize_bars;
    use augur_domain::value_objects::bar::Bar;

    fn bar(timestamp: i64, close: f64) -> Bar {
        Bar {
            timestamp,
            open: close,
            high: close,
            low: close,
            close,
            volume: 1.0,
        }
    }

    #[test]
    fn canonicalize_sorts_dedupes_keeping_last_and_drops_invalid() {
        let mut bars = vec![bar(300, 3.0), bar(0, 1.0), bar(0, 2.0), bar(600, -1.0)];
        let dropped = canonicalize_bars(&mut bars);
        assert_eq!(dropped, 2);
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].timestamp, 0);
        assert!((bars[0].close - 2.0).abs() < 1e-9);
        assert_eq!(bars[1].timestamp, 300);
    }
}
