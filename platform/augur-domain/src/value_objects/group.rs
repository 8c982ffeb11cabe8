use crate::value_objects::row::Row;
use chrono::{Datelike, Timelike};
use serde::Serialize;
use std::fmt;

/// Grouping key an atom can bucket rows by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupKey {
    Date,
    Weekday,
    Month,
    Year,
    Hour,
    Session,
    Time,
}

impl GroupKey {
    pub const ALL: [GroupKey; 7] = [
        GroupKey::Date,
        GroupKey::Weekday,
        GroupKey::Month,
        GroupKey::Year,
        GroupKey::Hour,
        GroupKey::Session,
        GroupKey::Time,
    ];

    pub fn name(self) -> &'static str {
        match self {
            GroupKey::Date => "date",
            GroupKey::Weekday => "weekday",
            GroupKey::Month => "month",
            GroupKey::Year => "year",
            GroupKey::Hour => "hour",
            GroupKey::Session => "session",
            GroupKey::Time => "time",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|g| g.name() == name)
    }

    pub fn is_intraday(self) -> bool {
        matches!(self, GroupKey::Hour | GroupKey::Session | GroupKey::Time)
    }

    /// `(ordinal, label)` of the row's group; the ordinal orders groups
    /// naturally (calendar order, weekday order). `None` when the row belongs
    /// to no group, e.g. a bar outside every configured session.
    pub fn key_of(self, row: &Row) -> Option<(i64, String)> {
        let t = row.time;
        let key = match self {
            GroupKey::Date => (
                i64::from(t.date().num_days_from_ce()),
                t.date().format("%Y-%m-%d").to_string(),
            ),
            GroupKey::Weekday => (
                i64::from(t.weekday().num_days_from_monday()),
                t.weekday().to_string(),
            ),
            GroupKey::Month => (i64::from(t.month()), t.format("%B").to_string()),
            GroupKey::Year => (i64::from(t.year()), t.year().to_string()),
            GroupKey::Hour => (i64::from(t.hour()), format!("{:02}:00", t.hour())),
            GroupKey::Session => {
                let tag = row.session.as_ref()?;
                (i64::from(tag.id()), tag.name().to_string())
            }
            GroupKey::Time => (
                i64::from(t.num_seconds_from_midnight()),
                t.format("%H:%M").to_string(),
            ),
        };
        Some(key)
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
