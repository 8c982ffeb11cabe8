use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::Serialize;
use std::fmt;

/// Half-open `[start, end)` span of local (dataset clock) time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Interval {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl Interval {
    pub fn new(start: NaiveDateTime, end: NaiveDateTime) -> Result<Self, String> {
        if end <= start {
            return Err(format!("empty interval: {start} .. {end}"));
        }
        Ok(Self { start, end })
    }

    /// Whole local days, `first` through `last` inclusive.
    pub fn days(first: NaiveDate, last: NaiveDate) -> Result<Self, String> {
        let end = last
            .succ_opt()
            .ok_or_else(|| format!("date out of range: {last}"))?;
        Self::new(first.and_time(NaiveTime::MIN), end.and_time(NaiveTime::MIN))
    }

    pub fn contains(&self, t: NaiveDateTime) -> bool {
        self.start <= t && t < self.end
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

#[cfg(test)]
mod tests {
    use super::Interval;
    use chrono::NaiveDate;

    #[test]
    fn days_is_half_open() {
        let first = NaiveDate::from_ymd_opt(2024, 3, 1).expect("date");
        let last = NaiveDate::from_ymd_opt(2024, 3, 31).expect("date");
        let interval = Interval::days(first, last).expect("interval");
        assert!(interval.contains(first.and_hms_opt(0, 0, 0).expect("t")));
        assert!(interval.contains(last.and_hms_opt(23, 59, 0).expect("t")));
        let april = NaiveDate::from_ymd_opt(2024, 4, 1).expect("date");
        assert!(!interval.contains(april.and_hms_opt(0, 0, 0).expect("t")));
    }

    #[test]
    fn rejects_reversed_bounds() {
        let a = NaiveDate::from_ymd_opt(2024, 3, 2).expect("date");
        let b = NaiveDate::from_ymd_opt(2024, 3, 1).expect("date");
        assert!(Interval::days(a, b).is_err());
    }
}
