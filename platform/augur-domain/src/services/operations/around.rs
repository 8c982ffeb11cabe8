use super::{row_label, Outcome};
use crate::entities::operation::OffsetUnit;
use crate::entities::query::Query;
use crate::entities::result::{AggregateRecord, Shape};
use crate::errors::EngineError;
use crate::services::stats;
use crate::value_objects::row::Row;
use chrono::{Duration, NaiveDateTime};
use std::collections::HashMap;

/// For every trigger row, the row `offset` units away (negative = before).
/// Triggers without such a neighbor, or whose neighbor lacks the metric, are
/// skipped.
pub(super) fn run(
    trigger: &Query,
    offset: i64,
    unit: OffsetUnit,
    rows: &[Row],
) -> Result<Outcome, EngineError> {
    let neighbor = neighbor_lookup(rows, offset, unit)?;
    let triggers: Vec<usize> = (0..rows.len()).filter(|&i| trigger.selects(&rows[i])).collect();

    let mut matched: Vec<(&Row, f64, Option<f64>)> = Vec::new();
    for &i in &triggers {
        let Some(next) = neighbor(i) else {
            continue;
        };
        if let Some(value) = trigger.metric.value(next) {
            matched.push((&rows[i], value, trigger.metric.value(&rows[i])));
        }
    }

    let values: Vec<f64> = matched.iter().map(|(_, v, _)| *v).collect();
    let sorted = stats::sorted(&values);
    let summary = stats::summarize(&values);
    let positive = values.iter().filter(|v| **v > 0.0).count();

    let mut outcome =
        Outcome::new(Shape::Pairs, triggers.len()).insufficient_if(matched.is_empty());
    let mut head = AggregateRecord::new("summary")
        .with("triggers", triggers.len() as f64)
        .with("matches", matched.len() as f64)
        .with_opt("avg", summary.mean)
        .with_opt("median", stats::median(&sorted))
        .with_opt("min", summary.min)
        .with_opt("max", summary.max);
    if !values.is_empty() {
        head = head.with("positive_share", positive as f64 / values.len() as f64);
    }
    outcome.records.push(head);
    outcome.records.extend(matched.iter().map(|(row, value, own)| {
        AggregateRecord::new(row_label(row))
            .with_opt("trigger", *own)
            .with("neighbor", *value)
    }));
    outcome.rows = matched.into_iter().map(|(row, _, _)| row.clone()).collect();
    Ok(outcome)
}

fn neighbor_lookup<'r>(
    rows: &'r [Row],
    offset: i64,
    unit: OffsetUnit,
) -> Result<Box<dyn Fn(usize) -> Option<&'r Row> + 'r>, EngineError> {
    let seconds = match unit {
        OffsetUnit::Bars => {
            return Ok(Box::new(move |i| {
                let j = i64::try_from(i).ok()?.checked_add(offset)?;
                rows.get(usize::try_from(j).ok()?)
            }));
        }
        OffsetUnit::Days => 86_400,
        OffsetUnit::Hours => 3_600,
        OffsetUnit::Minutes => 60,
    };
    let delta = offset
        .checked_mul(seconds)
        .and_then(Duration::try_seconds)
        .ok_or_else(|| EngineError::InvalidParameter(format!("offset {offset} is out of range")))?;
    let by_time: HashMap<NaiveDateTime, usize> =
        rows.iter().enumerate().map(|(i, row)| (row.time, i)).collect();
    Ok(Box::new(move |i| {
        let target = rows[i].time.checked_add_signed(delta)?;
        by_time.get(&target).map(|&j| &rows[j])
    }))
}
