use super::{owned, row_label, selected, Outcome};
use crate::entities::operation::SortOrder;
use crate::entities::query::Query;
use crate::entities::result::{AggregateRecord, Shape};
use crate::value_objects::metric::Metric;
use crate::value_objects::row::Row;

/// Filtered rows, optionally ordered by `by` and truncated to `n`. The sort
/// is stable, so equal values stay in temporal order for both directions.
pub(super) fn run(
    query: &Query,
    n: Option<usize>,
    sort: Option<SortOrder>,
    by: Metric,
    rows: &[Row],
) -> Outcome {
    let mut picked = selected(query, rows);
    let filtered = picked.len();

    if let Some(order) = sort {
        picked.retain(|row| by.value(row).is_some());
        picked.sort_by(|a, b| {
            let (x, y) = (by.value(a).unwrap_or(0.0), by.value(b).unwrap_or(0.0));
            match order {
                SortOrder::Asc => x.total_cmp(&y),
                SortOrder::Desc => y.total_cmp(&x),
            }
        });
    }
    if let Some(n) = n {
        picked.truncate(n);
    }

    let mut outcome = Outcome::new(Shape::Series, filtered).insufficient_if(filtered == 0);
    outcome.records = picked
        .iter()
        .map(|row| {
            AggregateRecord::new(row_label(row))
                .with_opt(by.name(), by.value(row))
                .with_opt(query.metric.name(), query.metric.value(row))
        })
        .collect();
    outcome.rows = owned(&picked);
    outcome
}

#[cfg(test)]
mod tests {
    use super::super::execute;
    use super::super::fixtures::{query, rows_from_changes, DAY, MONDAY};
    use crate::entities::operation::{OperationSpec, SortOrder};
    use crate::entities::result::ResultStatus;
    use crate::value_objects::metric::Metric;
    use crate::value_objects::predicate::Predicate;

    fn list(n: Option<usize>, sort: Option<SortOrder>, filter: Option<Predicate>) -> OperationSpec {
        OperationSpec::List {
            query: query(Metric::Change, filter, None),
            n,
            sort,
            by: Metric::Change,
        }
    }

    #[test]
    fn sorts_with_temporal_tie_break() {
        let rows = rows_from_changes(MONDAY, DAY, &[1.0, -3.0, 2.0, -3.0, 0.5]);
        let result = execute("s1", &list(Some(3), Some(SortOrder::Asc), None), &[rows.clone()])
            .expect("list asc");
        let keys: Vec<&str> = result.records.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["2024-01-02", "2024-01-04", "2024-01-05"]);

        let result = execute("s1", &list(Some(2), Some(SortOrder::Desc), None), &[rows])
            .expect("list desc");
        let changes: Vec<f64> = result
            .records
            .iter()
            .filter_map(|r| r.value("change"))
            .collect();
        assert_eq!(changes, vec![2.0, 1.0]);
        assert_eq!(result.rows.len(), 2);
    }

    #[test]
    fn unsorted_list_keeps_order_and_filters() {
        let rows = rows_from_changes(MONDAY, DAY, &[1.0, -3.0, 2.0, -3.0]);
        let down = Predicate::metric(Metric::Change).lt(0.0);
        let result = execute("s1", &list(None, None, Some(down)), &[rows]).expect("list");
        assert_eq!(result.rows.len(), 2);
        assert_eq!(result.metadata.filtered_rows, 2);
        assert!(result.rows[0].timestamp < result.rows[1].timestamp);
    }

    #[test]
    fn empty_selection_is_insufficient_not_an_error() {
        let rows = rows_from_changes(MONDAY, DAY, &[1.0, 2.0]);
        let down = Predicate::metric(Metric::Change).lt(0.0);
        let result = execute("s1", &list(Some(5), Some(SortOrder::Asc), Some(down)), &[rows])
            .expect("list");
        assert_eq!(result.status, ResultStatus::InsufficientSample);
        assert!(result.records.is_empty());
    }
}
