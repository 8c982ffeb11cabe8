use super::{selected, summary_record, Outcome};
use crate::entities::query::Query;
use crate::entities::result::Shape;
use crate::value_objects::row::Row;

/// One summary record per atom, each over its own filtered sub-series.
pub(super) fn run(queries: &[Query], inputs: &[Vec<Row>]) -> Outcome {
    let mut records = Vec::with_capacity(queries.len());
    let mut rows = Vec::new();
    let mut filtered = 0;
    for (query, input) in queries.iter().zip(inputs) {
        let picked = selected(query, input);
        filtered += picked.len();
        records.push(summary_record(query.label.as_str(), query.metric, &picked));
        rows.extend(picked.into_iter().cloned());
    }
    let mut outcome = Outcome::new(Shape::Series, filtered).insufficient_if(filtered == 0);
    outcome.records = records;
    outcome.rows = rows;
    outcome
}

#[cfg(test)]
mod tests {
    use super::super::execute;
    use super::super::fixtures::{query, rows_from_changes, DAY, MONDAY};
    use crate::entities::operation::OperationSpec;
    use crate::value_objects::metric::Metric;
    use crate::value_objects::predicate::Predicate;
    use chrono::Weekday;

    #[test]
    fn mondays_versus_fridays() {
        // Two weeks, Mon..Sun each.
        let changes = [
            0.4, 0.0, 0.0, 0.0, -0.1, 0.0, 0.0, //
            0.6, 0.0, 0.0, 0.0, -0.3, 0.0, 0.0,
        ];
        let rows = rows_from_changes(MONDAY, DAY, &changes);
        let mut mondays = query(Metric::Change, Some(Predicate::Weekday(Weekday::Mon)), None);
        mondays.label = "mondays".to_string();
        let mut fridays = query(Metric::Change, Some(Predicate::Weekday(Weekday::Fri)), None);
        fridays.label = "fridays".to_string();

        let spec = OperationSpec::Compare {
            queries: vec![mondays, fridays],
        };
        let result = execute("s1", &spec, &[rows.clone(), rows]).expect("compare");
        let avg = |key: &str| result.record(key).and_then(|r| r.value("avg")).expect(key);
        assert!((avg("mondays") - 0.5).abs() < 1e-9);
        assert!((avg("fridays") + 0.2).abs() < 1e-9);
        assert_eq!(result.metadata.filtered_rows, 4);
        assert_eq!(result.metadata.input_rows, 28);
    }

    #[test]
    fn empty_atom_gets_no_data_note() {
        let rows = rows_from_changes(MONDAY, DAY, &[1.0, 2.0]);
        let mut sundays = query(Metric::Change, Some(Predicate::Weekday(Weekday::Sun)), None);
        sundays.label = "sundays".to_string();
        let all = query(Metric::Change, None, None);
        let spec = OperationSpec::Compare {
            queries: vec![all, sundays],
        };
        let result = execute("s1", &spec, &[rows.clone(), rows]).expect("compare");
        assert_eq!(result.record("sundays").and_then(|r| r.note.as_deref()), Some("no data"));
        assert!(!result.is_insufficient());
    }
}
