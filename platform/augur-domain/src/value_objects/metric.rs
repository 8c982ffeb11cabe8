use crate::value_objects::row::Row;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Closed set of per-row numeric fields an atom's `what` can name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Open,
    High,
    Low,
    Close,
    Volume,
    Range,
    RangePct,
    Body,
    BodyPct,
    Change,
    ChangePct,
    GapPct,
}

impl Metric {
    pub const ALL: [Metric; 12] = [
        Metric::Open,
        Metric::High,
        Metric::Low,
        Metric::Close,
        Metric::Volume,
        Metric::Range,
        Metric::RangePct,
        Metric::Body,
        Metric::BodyPct,
        Metric::Change,
        Metric::ChangePct,
        Metric::GapPct,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Metric::Open => "open",
            Metric::High => "high",
            Metric::Low => "low",
            Metric::Close => "close",
            Metric::Volume => "volume",
            Metric::Range => "range",
            Metric::RangePct => "range_pct",
            Metric::Body => "body",
            Metric::BodyPct => "body_pct",
            Metric::Change => "change",
            Metric::ChangePct => "change_pct",
            Metric::GapPct => "gap_pct",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.name() == name)
    }

    /// `None` when the metric is undefined for the row (no previous close).
    pub fn value(self, row: &Row) -> Option<f64> {
        let value = match self {
            Metric::Open => row.open,
            Metric::High => row.high,
            Metric::Low => row.low,
            Metric::Close => row.close,
            Metric::Volume => row.volume,
            Metric::Range => row.range,
            Metric::RangePct => row.range_pct,
            Metric::Body => row.body,
            Metric::BodyPct => row.body_pct,
            Metric::Change => return row.change,
            Metric::ChangePct => return row.change_pct,
            Metric::GapPct => return row.gap_pct,
        };
        Some(value)
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
