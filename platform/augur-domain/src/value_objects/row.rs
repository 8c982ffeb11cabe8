use crate::value_objects::pattern::PatternSet;
use crate::value_objects::tag::Tag;
use chrono::{NaiveDateTime, Weekday};
use serde::Serialize;

/// A bar plus every derived field operations and predicates read.
/// Produced once by the row derivation service and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Row {
    pub timestamp: i64,
    pub time: NaiveDateTime,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub range: f64,
    pub range_pct: f64,
    pub body: f64,
    pub body_pct: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub change: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub change_pct: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gap_pct: Option<f64>,
    pub weekday: Weekday,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<Tag>,
    pub patterns: PatternSet,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<Tag>,
}
