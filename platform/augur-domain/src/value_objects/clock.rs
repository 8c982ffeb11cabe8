use chrono::{DateTime, FixedOffset, NaiveDateTime, Offset, TimeZone, Utc};

/// Dataset wall clock: every calendar concept (dates, weekdays, sessions, periods)
/// is evaluated in this fixed offset from UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatasetClock {
    offset: FixedOffset,
}

impl DatasetClock {
    pub fn utc() -> Self {
        Self { offset: Utc.fix() }
    }

    pub fn from_offset_minutes(minutes: i32) -> Result<Self, String> {
        FixedOffset::east_opt(minutes.saturating_mul(60))
            .map(|offset| Self { offset })
            .ok_or_else(|| format!("invalid utc offset: {minutes} minutes"))
    }

    pub fn offset_seconds(&self) -> i64 {
        i64::from(self.offset.local_minus_utc())
    }

    pub fn local(&self, timestamp: i64) -> NaiveDateTime {
        match DateTime::from_timestamp(timestamp, 0) {
            Some(utc) => utc.with_timezone(&self.offset).naive_local(),
            None => NaiveDateTime::MIN,
        }
    }

    pub fn to_utc(&self, local: NaiveDateTime) -> i64 {
        match self.offset.from_local_datetime(&local).single() {
            Some(dt) => dt.timestamp(),
            None => local.and_utc().timestamp() - self.offset_seconds(),
        }
    }
}

impl Default for DatasetClock {
    fn default() -> Self {
        Self::utc()
    }
}
