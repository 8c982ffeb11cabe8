use super::{owned, selected, summary_record, Outcome};
use crate::entities::query::Query;
use crate::entities::result::Shape;
use crate::value_objects::row::Row;
use std::collections::BTreeMap;

/// Overall summary record under key "all"; with a group key, one record per
/// group follows in the group's natural order. A zero count is a valid result.
pub(super) fn run(query: &Query, rows: &[Row]) -> Outcome {
    let picked = selected(query, rows);
    let shape = if query.group.is_some() {
        Shape::Series
    } else {
        Shape::Scalar
    };
    let mut outcome = Outcome::new(shape, picked.len());
    outcome.records.push(summary_record("all", query.metric, &picked));

    if let Some(key) = query.group {
        let mut groups: BTreeMap<(i64, String), Vec<&Row>> = BTreeMap::new();
        for row in picked.iter().copied() {
            if let Some(k) = key.key_of(row) {
                groups.entry(k).or_default().push(row);
            }
        }
        outcome.records.extend(
            groups
                .into_iter()
                .map(|((_, label), members)| summary_record(label, query.metric, &members)),
        );
    }

    outcome.rows = owned(&picked);
    outcome
}

#[cfg(test)]
mod tests {
    use super::super::execute;
    use super::super::fixtures::{query, rows_from_changes, DAY, MONDAY};
    use crate::entities::operation::OperationSpec;
    use crate::entities::result::{ResultStatus, Shape};
    use crate::value_objects::group::GroupKey;
    use crate::value_objects::metric::Metric;
    use crate::value_objects::predicate::Predicate;

    #[test]
    fn summarizes_filtered_rows() {
        let rows = rows_from_changes(MONDAY, DAY, &[1.0, -2.0, 3.0, -4.0]);
        let spec = OperationSpec::Count {
            query: query(Metric::Change, None, None),
        };
        let result = execute("s1", &spec, &[rows]).expect("count");
        let all = result.record("all").expect("summary");
        assert_eq!(result.shape, Shape::Scalar);
        assert_eq!(all.value("count"), Some(4.0));
        assert_eq!(all.value("avg"), Some(-0.5));
        assert_eq!(all.value("min"), Some(-4.0));
        assert_eq!(all.value("max"), Some(3.0));
    }

    #[test]
    fn zero_count_is_ok() {
        let rows = rows_from_changes(MONDAY, DAY, &[1.0, 2.0]);
        let spec = OperationSpec::Count {
            query: query(Metric::Change, Some(Predicate::metric(Metric::Change).gt(10.0)), None),
        };
        let result = execute("s1", &spec, &[rows]).expect("count");
        assert_eq!(result.status, ResultStatus::Ok);
        assert_eq!(result.record("all").and_then(|r| r.value("count")), Some(0.0));
        assert_eq!(result.record("all").and_then(|r| r.value("avg")), None);
    }

    #[test]
    fn groups_follow_weekday_order() {
        // Mon..Sun then Mon, Tue
        let rows = rows_from_changes(MONDAY, DAY, &[1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 3.0, -1.0]);
        let spec = OperationSpec::Count {
            query: query(Metric::Change, None, Some(GroupKey::Weekday)),
        };
        let result = execute("s1", &spec, &[rows]).expect("count");
        let keys: Vec<&str> = result.records.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["all", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"]);
        let monday = result.record("Mon").expect("monday");
        assert_eq!(monday.value("count"), Some(2.0));
        assert_eq!(monday.value("avg"), Some(2.0));
    }
}
