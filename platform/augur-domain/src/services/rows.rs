use crate::services::vocabulary::Vocabulary;
use crate::value_objects::bar::Bar;
use crate::value_objects::clock::DatasetClock;
use crate::value_objects::interval::Interval;
use crate::value_objects::pattern::PatternSet;
use crate::value_objects::row::Row;
use crate::value_objects::timeframe::Timeframe;
use chrono::Datelike;

const DAY_SECONDS: i64 = 86_400;
const WEEK_SECONDS: i64 = 7 * DAY_SECONDS;

/// Extra history loaded before an interval so its first row has a previous
/// bar; wide enough to bridge weekends and holidays.
pub fn lookback_seconds(timeframe: &Timeframe) -> i64 {
    (timeframe.step_seconds * 2).max(5 * DAY_SECONDS)
}

/// Turns sorted bars into rows. Derived fields that need a previous bar are
/// left undefined on the first one. Sessions are only tagged on intraday bars.
pub fn derive_rows(
    bars: &[Bar],
    timeframe: &Timeframe,
    clock: &DatasetClock,
    vocab: &Vocabulary,
) -> Vec<Row> {
    let intraday = timeframe.is_intraday();
    let mut rows = Vec::with_capacity(bars.len());
    let mut prev: Option<&Bar> = None;

    for bar in bars {
        let time = clock.local(bar.timestamp);
        let range = bar.high - bar.low;
        let body = bar.close - bar.open;
        let change = prev.map(|p| bar.close - p.close);
        let change_pct = prev.and_then(|p| pct(bar.close - p.close, p.close));
        let gap_pct = prev.and_then(|p| pct(bar.open - p.close, p.close));

        rows.push(Row {
            timestamp: bar.timestamp,
            time,
            open: bar.open,
            high: bar.high,
            low: bar.low,
            close: bar.close,
            volume: bar.volume,
            range,
            range_pct: pct(range, bar.open).unwrap_or(0.0),
            body,
            body_pct: pct(body, bar.open).unwrap_or(0.0),
            change,
            change_pct,
            gap_pct,
            weekday: time.weekday(),
            session: if intraday {
                vocab.session_at(time.time())
            } else {
                None
            },
            patterns: PatternSet::detect(prev, bar),
            events: vocab.events_on(time.date()),
        });
        prev = Some(bar);
    }
    rows
}

fn pct(delta: f64, base: f64) -> Option<f64> {
    (base != 0.0 && base.is_finite()).then(|| delta / base * 100.0)
}

pub fn trim_to_interval(rows: Vec<Row>, interval: &Interval) -> Vec<Row> {
    rows.into_iter()
        .filter(|row| interval.contains(row.time))
        .collect()
}

/// Aggregates sorted base bars into `target` bars, bucketed on the dataset's
/// local clock (days start at local midnight, weeks on Monday).
pub fn resample_bars(
    bars: &[Bar],
    target: &Timeframe,
    clock: &DatasetClock,
) -> Result<Vec<Bar>, String> {
    if target.step_seconds <= 0 {
        return Err("target step_seconds must be > 0".to_string());
    }
    let offset = clock.offset_seconds();
    let mut output: Vec<Bar> = Vec::new();
    let mut current_bucket: Option<i64> = None;

    for bar in bars {
        let bucket_start = local_bucket_start(bar.timestamp + offset, target.step_seconds) - offset;
        if current_bucket == Some(bucket_start) {
            if let Some(agg) = output.last_mut() {
                agg.high = agg.high.max(bar.high);
                agg.low = agg.low.min(bar.low);
                agg.close = bar.close;
                agg.volume += bar.volume;
            }
            continue;
        }
        current_bucket = Some(bucket_start);
        output.push(Bar {
            timestamp: bucket_start,
            ..bar.clone()
        });
    }

    Ok(output)
}

fn local_bucket_start(local_seconds: i64, step_seconds: i64) -> i64 {
    if step_seconds == WEEK_SECONDS {
        let days = local_seconds.div_euclid(DAY_SECONDS);
        // 1970-01-01 was a Thursday, three days after a Monday.
        let monday = days - (days + 3).rem_euclid(7);
        return monday * DAY_SECONDS;
    }
    local_seconds - local_seconds.rem_euclid(step_seconds)
}

#[cfg(test)]
mod tests {
    use super::{derive_rows, resample_bars, trim_to_interval};
    use crate::services::vocabulary::Vocabulary;
    use crate::value_objects::bar::Bar;
    use crate::value_objects::clock::DatasetClock;
    use crate::value_objects::interval::Interval;
    use crate::value_objects::timeframe::Timeframe;
    use chrono::{NaiveDate, Weekday};

    fn bar(timestamp: i64, open: f64, close: f64) -> Bar {
        Bar {
            timestamp,
            open,
            high: open.max(close) + 1.0,
            low: open.min(close) - 1.0,
            close,
            volume: 10.0,
        }
    }

    #[test]
    fn derives_changes_against_previous_close() {
        // 2024-01-01 (Monday) and 2024-01-02, UTC midnight.
        let bars = vec![bar(1_704_067_200, 100.0, 102.0), bar(1_704_153_600, 103.0, 99.96)];
        let rows = derive_rows(
            &bars,
            &Timeframe::daily(),
            &DatasetClock::utc(),
            &Vocabulary::standard(),
        );
        assert_eq!(rows.len(), 2);
        assert!(rows[0].change_pct.is_none());
        assert_eq!(rows[0].weekday, Weekday::Mon);
        let change = rows[1].change_pct.expect("second row has a previous close");
        assert!((change - (-2.0)).abs() < 1e-9);
        let gap = rows[1].gap_pct.expect("gap");
        assert!((gap - (1.0 / 102.0 * 100.0)).abs() < 1e-9);
        assert!(rows[1].session.is_none());
    }

    #[test]
    fn resamples_on_local_midnight() {
        // UTC-5: 2024-01-02 04:00 UTC is still Jan 1 locally.
        let clock = DatasetClock::from_offset_minutes(-300).expect("clock");
        let base = 1_704_153_600; // 2024-01-02 00:00 UTC
        let bars = vec![
            bar(base + 4 * 3600, 10.0, 11.0),
            bar(base + 6 * 3600, 11.0, 12.0),
            bar(base + 7 * 3600, 12.0, 13.0),
        ];
        let daily = resample_bars(&bars, &Timeframe::daily(), &clock).expect("resample");
        assert_eq!(daily.len(), 2);
        assert_eq!(daily[0].close, 11.0);
        assert_eq!(daily[1].open, 11.0);
        assert_eq!(daily[1].close, 13.0);
        assert_eq!(daily[1].volume, 20.0);
        assert_eq!(
            clock.local(daily[1].timestamp).date(),
            NaiveDate::from_ymd_opt(2024, 1, 2).expect("d")
        );
    }

    #[test]
    fn weekly_buckets_start_on_monday() {
        let clock = DatasetClock::utc();
        // Wed 2024-01-03 and Sun 2024-01-07 share a week; Mon 2024-01-08 does not.
        let bars = vec![
            bar(1_704_240_000, 1.0, 2.0),
            bar(1_704_585_600, 2.0, 3.0),
            bar(1_704_672_000, 3.0, 4.0),
        ];
        let weekly = resample_bars(&bars, &Timeframe::parse("1w").expect("tf"), &clock)
            .expect("resample");
        assert_eq!(weekly.len(), 2);
        assert_eq!(weekly[0].timestamp, 1_704_067_200);
    }

    #[test]
    fn trims_lookback_rows() {
        let bars = vec![bar(1_704_067_200, 1.0, 2.0), bar(1_704_153_600, 2.0, 3.0)];
        let rows = derive_rows(
            &bars,
            &Timeframe::daily(),
            &DatasetClock::utc(),
            &Vocabulary::standard(),
        );
        let jan2 = NaiveDate::from_ymd_opt(2024, 1, 2).expect("d");
        let trimmed = trim_to_interval(rows, &Interval::days(jan2, jan2).expect("interval"));
        assert_eq!(trimmed.len(), 1);
        assert!(trimmed[0].change.is_some());
    }
}
