use super::{row_label, selected, Outcome};
use crate::entities::query::Query;
use crate::entities::result::{AggregateRecord, Shape};
use crate::services::stats;
use crate::value_objects::row::Row;
use std::collections::HashMap;

/// Pearson coefficient between the two metric series aligned on shared
/// timestamps. Zero variance is reported as undefined, not as NaN.
pub(super) fn run(left: &Query, right: &Query, left_rows: &[Row], right_rows: &[Row]) -> Outcome {
    let right_values: HashMap<i64, f64> = selected(right, right_rows)
        .into_iter()
        .filter_map(|row| right.metric.value(row).map(|v| (row.timestamp, v)))
        .collect();

    let mut aligned: Vec<&Row> = Vec::new();
    let mut xs = Vec::new();
    let mut ys = Vec::new();
    for row in selected(left, left_rows) {
        let (Some(x), Some(y)) = (left.metric.value(row), right_values.get(&row.timestamp)) else {
            continue;
        };
        aligned.push(row);
        xs.push(x);
        ys.push(*y);
    }

    let n = aligned.len();
    let mut outcome = Outcome::new(Shape::Pairs, n).insufficient_if(n < 2);
    let mut summary = AggregateRecord::new("correlation").with("n", n as f64);
    summary = match stats::pearson(&xs, &ys) {
        Some(r) => summary.with("coefficient", r),
        None if n < 2 => summary.with_note("insufficient sample"),
        None => summary.with_note("undefined: zero variance"),
    };
    outcome.records.push(summary);
    outcome.records.extend(aligned.iter().zip(xs.iter().zip(&ys)).map(|(row, (x, y))| {
        AggregateRecord::new(row_label(row))
            .with("left", *x)
            .with("right", *y)
    }));
    outcome.rows = aligned.into_iter().cloned().collect();
    outcome
}

#[cfg(test)]
mod tests {
    use super::super::execute;
    use super::super::fixtures::{query, rows_from_changes, DAY, MONDAY};
    use crate::entities::operation::OperationSpec;
    use crate::entities::result::ResultStatus;
    use crate::value_objects::metric::Metric;

    fn spec(left: Metric, right: Metric) -> OperationSpec {
        OperationSpec::Correlation {
            left: query(left, None, None),
            right: query(right, None, None),
        }
    }

    #[test]
    fn perfectly_linked_series() {
        let rows = rows_from_changes(MONDAY, DAY, &[1.0, -2.0, 3.0, 0.5]);
        // body == change by construction (open = previous close)
        let result = execute("s1", &spec(Metric::Change, Metric::Body), &[rows.clone(), rows])
            .expect("correlation");
        let r = result.record("correlation").and_then(|r| r.value("coefficient"));
        assert!((r.expect("coefficient") - 1.0).abs() < 1e-9);
        assert_eq!(result.rows.len(), 4);
    }

    #[test]
    fn zero_variance_is_reported_undefined() {
        let rows = rows_from_changes(MONDAY, DAY, &[1.0, 1.0, 1.0]);
        let result = execute("s1", &spec(Metric::Change, Metric::Close), &[rows.clone(), rows])
            .expect("correlation");
        let record = result.record("correlation").expect("summary");
        assert_eq!(record.value("coefficient"), None);
        assert_eq!(record.note.as_deref(), Some("undefined: zero variance"));
        assert_eq!(result.status, ResultStatus::Ok);
    }

    #[test]
    fn disjoint_timestamps_are_insufficient() {
        let left = rows_from_changes(MONDAY, DAY, &[1.0, 2.0]);
        let right = rows_from_changes(MONDAY + 10 * DAY, DAY, &[1.0, 2.0]);
        let result = execute("s1", &spec(Metric::Change, Metric::Change), &[left, right])
            .expect("correlation");
        assert!(result.is_insufficient());
    }
}
