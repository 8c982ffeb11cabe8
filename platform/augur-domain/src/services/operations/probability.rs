use super::{selected, Outcome};
use crate::entities::query::Query;
use crate::entities::result::{AggregateRecord, Shape};
use crate::value_objects::predicate::Predicate;
use crate::value_objects::row::Row;

/// P(outcome | condition), the outcome read `offset` rows after each
/// condition row. Condition rows without that partner are not counted.
pub(super) fn run(
    query: &Query,
    condition: &Predicate,
    outcome_when: &Predicate,
    offset: i64,
    rows: &[Row],
) -> Outcome {
    let universe = selected(query, rows);
    let mut paired = 0usize;
    let mut base_hits = 0usize;
    let mut conditioned: Vec<&Row> = Vec::new();
    let mut hits = 0usize;
    for (i, row) in universe.iter().copied().enumerate() {
        let Some(next) = partner(&universe, i, offset) else {
            continue;
        };
        paired += 1;
        let outcome_holds = outcome_when.matches(next);
        if outcome_holds {
            base_hits += 1;
        }
        if condition.matches(row) {
            conditioned.push(row);
            if outcome_holds {
                hits += 1;
            }
        }
    }

    let n = conditioned.len();
    let mut outcome = Outcome::new(Shape::Scalar, universe.len()).insufficient_if(n == 0);
    let mut record = AggregateRecord::new("probability")
        .with("condition_count", n as f64)
        .with("outcome_count", hits as f64);
    if paired > 0 {
        record = record.with("base_rate", base_hits as f64 / paired as f64);
    }
    record = if n > 0 {
        record.with("probability", hits as f64 / n as f64)
    } else {
        record.with_note("insufficient sample: condition never held")
    };
    outcome.records.push(record);
    outcome.rows = conditioned.into_iter().cloned().collect();
    outcome
}

fn partner<'r>(universe: &[&'r Row], i: usize, offset: i64) -> Option<&'r Row> {
    let j = i64::try_from(i).ok()?.checked_add(offset)?;
    universe.get(usize::try_from(j).ok()?).copied()
}

#[cfg(test)]
mod tests {
    use super::super::execute;
    use super::super::fixtures::{query, rows_from_changes, DAY, MONDAY};
    use crate::entities::operation::OperationSpec;
    use crate::entities::result::ResultStatus;
    use crate::value_objects::metric::Metric;
    use crate::value_objects::predicate::Predicate;

    fn spec(condition: Predicate, offset: i64) -> OperationSpec {
        OperationSpec::Probability {
            query: query(Metric::Change, None, None),
            condition,
            outcome: Predicate::metric(Metric::Change).gt(0.0),
            offset,
        }
    }

    #[test]
    fn next_day_up_after_down_day() {
        let rows = rows_from_changes(MONDAY, DAY, &[-1.0, 2.0, -1.0, -1.0, 3.0, -2.0]);
        let down = Predicate::metric(Metric::Change).lt(0.0);
        let result = execute("s1", &spec(down, 1), &[rows]).expect("probability");
        let record = result.record("probability").expect("record");
        // down days with a next day: 0, 2, 3; followed by up: 0, 3
        assert_eq!(record.value("condition_count"), Some(3.0));
        assert_eq!(record.value("outcome_count"), Some(2.0));
        assert!((record.value("probability").expect("p") - 2.0 / 3.0).abs() < 1e-12);
        assert!((record.value("base_rate").expect("base") - 0.4).abs() < 1e-12);
        assert_eq!(result.rows.len(), 3);
    }

    #[test]
    fn zero_condition_count_is_insufficient_not_nan() {
        let rows = rows_from_changes(MONDAY, DAY, &[1.0, 2.0, 3.0]);
        let crash = Predicate::metric(Metric::Change).lt(-50.0);
        let result = execute("s1", &spec(crash, 0), &[rows]).expect("probability");
        assert_eq!(result.status, ResultStatus::InsufficientSample);
        let record = result.record("probability").expect("record");
        assert_eq!(record.value("probability"), None);
        assert_eq!(record.value("condition_count"), Some(0.0));
        assert!(record.values.values().all(|v| v.is_finite()));
    }
}
