use super::{row_label, selected, Outcome};
use crate::entities::operation::Extreme;
use crate::entities::query::Query;
use crate::entities::result::{AggregateRecord, Shape};
use crate::value_objects::group::GroupKey;
use crate::value_objects::row::Row;
use chrono::NaiveTime;
use std::collections::BTreeMap;

/// Per group (a day unless told otherwise), the row where the metric hits
/// its extreme; then how often each time of day hosted that extreme. Equal
/// extremes resolve to the earliest timestamp.
pub(super) fn run(query: &Query, extreme: Extreme, rows: &[Row]) -> Outcome {
    let key = query.group.unwrap_or(GroupKey::Date);
    let picked = selected(query, rows);

    let mut best: BTreeMap<(i64, String), (&Row, f64)> = BTreeMap::new();
    for row in picked.iter().copied() {
        let (Some(group), Some(value)) = (key.key_of(row), query.metric.value(row)) else {
            continue;
        };
        best.entry(group)
            .and_modify(|current| {
                if beats(extreme, (value, row.timestamp), (current.1, current.0.timestamp)) {
                    *current = (row, value);
                }
            })
            .or_insert((row, value));
    }

    let groups = best.len();
    let mut frequency: BTreeMap<NaiveTime, usize> = BTreeMap::new();
    for (row, _) in best.values() {
        *frequency.entry(row.time.time()).or_default() += 1;
    }

    let mut outcome = Outcome::new(Shape::Series, picked.len()).insufficient_if(groups == 0);
    outcome.records = frequency
        .iter()
        .map(|(time, count)| {
            AggregateRecord::new(time.format("%H:%M").to_string())
                .with("count", *count as f64)
                .with("share", *count as f64 / groups as f64)
        })
        .collect();
    let mut summary = AggregateRecord::new("summary").with("groups", groups as f64);
    if let Some((time, count)) = frequency.iter().max_by(|a, b| a.1.cmp(b.1).then(b.0.cmp(a.0))) {
        summary = summary
            .with("mode_count", *count as f64)
            .with_note(format!("most frequent time {}", time.format("%H:%M")));
    }
    outcome.records.push(summary);
    outcome.records.extend(best.values().map(|(row, value)| {
        AggregateRecord::new(format!("extreme {}", row_label(row))).with(query.metric.name(), *value)
    }));
    outcome.rows = best.into_values().map(|(row, _)| row.clone()).collect();
    outcome
}

fn beats(extreme: Extreme, candidate: (f64, i64), current: (f64, i64)) -> bool {
    let better = match extreme {
        Extreme::Max => candidate.0 > current.0,
        Extreme::Min => candidate.0 < current.0,
    };
    better || (candidate.0 == current.0 && candidate.1 < current.1)
}
