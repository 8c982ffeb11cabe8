//! Operation engine: each operation is a pure function from rows to an
//! [`OpResult`]. Inputs arrive one relation per query, already trimmed to the
//! query's interval; the query's own filter is applied here.

mod around;
mod compare;
mod correlation;
mod count;
mod distribution;
mod formation;
mod list;
mod probability;
mod streak;

pub use streak::{find_runs, Run, RunScanner};

use crate::entities::operation::OperationSpec;
use crate::entities::query::Query;
use crate::entities::result::{AggregateRecord, OpResult, ResultMetadata, ResultStatus, Shape};
use crate::errors::EngineError;
use crate::services::stats;
use crate::value_objects::metric::Metric;
use crate::value_objects::row::Row;
use chrono::NaiveTime;

/// What an operation hands back before the engine attaches metadata.
struct Outcome {
    shape: Shape,
    status: ResultStatus,
    rows: Vec<Row>,
    records: Vec<AggregateRecord>,
    filtered: usize,
}

impl Outcome {
    fn new(shape: Shape, filtered: usize) -> Self {
        Self {
            shape,
            status: ResultStatus::Ok,
            rows: Vec::new(),
            records: Vec::new(),
            filtered,
        }
    }

    fn insufficient_if(mut self, empty: bool) -> Self {
        if empty {
            self.status = ResultStatus::InsufficientSample;
        }
        self
    }
}

pub fn execute(
    step_id: &str,
    spec: &OperationSpec,
    inputs: &[Vec<Row>],
) -> Result<OpResult, EngineError> {
    let queries = spec.queries();
    if inputs.len() != queries.len() {
        return Err(EngineError::InputArity {
            operation: spec.kind().name(),
            expected: queries.len(),
            got: inputs.len(),
        });
    }

    let outcome = match spec {
        OperationSpec::List { query, n, sort, by } => list::run(query, *n, *sort, *by, &inputs[0]),
        OperationSpec::Count { query } => count::run(query, &inputs[0]),
        OperationSpec::Compare { queries } => compare::run(queries, inputs),
        OperationSpec::Correlation { left, right } => {
            correlation::run(left, right, &inputs[0], &inputs[1])
        }
        OperationSpec::Around {
            trigger,
            offset,
            unit,
        } => around::run(trigger, *offset, *unit, &inputs[0])?,
        OperationSpec::Streak {
            query,
            condition,
            min_len,
        } => streak::run(query, condition, *min_len, &inputs[0]),
        OperationSpec::Distribution {
            query,
            buckets,
            percentiles,
        } => distribution::run(query, *buckets, percentiles, &inputs[0]),
        OperationSpec::Probability {
            query,
            condition,
            outcome,
            offset,
        } => probability::run(query, condition, outcome, *offset, &inputs[0]),
        OperationSpec::Formation { query, extreme } => {
            formation::run(query, *extreme, &inputs[0])
        }
    };

    Ok(OpResult {
        step_id: step_id.to_string(),
        operation: spec.kind(),
        shape: outcome.shape,
        status: outcome.status,
        rows: outcome.rows,
        records: outcome.records,
        metadata: metadata(spec, &queries, inputs, outcome.filtered),
    })
}

fn metadata(
    spec: &OperationSpec,
    queries: &[&Query],
    inputs: &[Vec<Row>],
    filtered: usize,
) -> ResultMetadata {
    let mut filters: Vec<String> = queries.iter().flat_map(|q| q.filters_applied()).collect();
    match spec {
        OperationSpec::Streak { condition, .. } => filters.push(format!("run while {condition}")),
        OperationSpec::Probability {
            condition, outcome, ..
        } => {
            filters.push(format!("condition {condition}"));
            filters.push(format!("outcome {outcome}"));
        }
        _ => {}
    }
    filters.dedup();
    ResultMetadata {
        input_rows: inputs.iter().map(Vec::len).sum(),
        filtered_rows: filtered,
        filters_applied: filters,
        interval: queries.first().map(|q| q.interval),
        timeframe: queries
            .first()
            .map(|q| q.timeframe.to_string())
            .unwrap_or_default(),
    }
}

fn selected<'r>(query: &Query, rows: &'r [Row]) -> Vec<&'r Row> {
    rows.iter().filter(|row| query.selects(row)).collect()
}

fn metric_values(metric: Metric, rows: &[&Row]) -> Vec<f64> {
    rows.iter().filter_map(|row| metric.value(row)).collect()
}

/// count/avg/min/max of `metric` over `rows`; the shared summary shape for
/// count and compare.
fn summary_record(key: impl Into<String>, metric: Metric, rows: &[&Row]) -> AggregateRecord {
    let summary = stats::summarize(&metric_values(metric, rows));
    let record = AggregateRecord::new(key)
        .with("count", summary.count as f64)
        .with_opt("avg", summary.mean)
        .with_opt("min", summary.min)
        .with_opt("max", summary.max);
    if summary.count == 0 {
        record.with_note("no data")
    } else {
        record
    }
}

fn row_label(row: &Row) -> String {
    if row.time.time() == NaiveTime::MIN {
        row.time.format("%Y-%m-%d").to_string()
    } else {
        row.time.format("%Y-%m-%d %H:%M").to_string()
    }
}

fn owned(rows: &[&Row]) -> Vec<Row> {
    rows.iter().map(|row| (*row).clone()).collect()
}

#[cfg(test)]
pub(crate) mod fixtures {
    use crate::entities::query::{Query, QueryInput};
    use crate::services::rows::derive_rows;
    use crate::services::vocabulary::Vocabulary;
    use crate::value_objects::bar::Bar;
    use crate::value_objects::clock::DatasetClock;
    use crate::value_objects::group::GroupKey;
    use crate::value_objects::interval::Interval;
    use crate::value_objects::metric::Metric;
    use crate::value_objects::predicate::Predicate;
    use crate::value_objects::row::Row;
    use crate::value_objects::timeframe::Timeframe;
    use chrono::NaiveDate;

    pub const DAY: i64 = 86_400;
    /// 2024-01-01 00:00 UTC, a Monday.
    pub const MONDAY: i64 = 1_704_067_200;

    /// One row per change, each `step` seconds apart from `first`; closes move
    /// by exactly the given change from a seed bar that is dropped.
    pub fn rows_from_changes(first: i64, step: i64, changes: &[f64]) -> Vec<Row> {
        let mut bars = Vec::with_capacity(changes.len() + 1);
        let mut close = 100.0;
        bars.push(Bar {
            timestamp: first - step,
            open: close,
            high: close,
            low: close,
            close,
            volume: 1.0,
        });
        for (i, change) in changes.iter().enumerate() {
            let open = close;
            close += change;
            bars.push(Bar {
                timestamp: first + step * i as i64,
                open,
                high: open.max(close) + 0.5,
                low: open.min(close) - 0.5,
                close,
                volume: 1.0,
            });
        }
        let timeframe = if step >= DAY {
            Timeframe::daily()
        } else {
            Timeframe {
                label: "custom".to_string(),
                step_seconds: step,
            }
        };
        derive_rows(&bars, &timeframe, &DatasetClock::utc(), &Vocabulary::standard())
            .into_iter()
            .skip(1)
            .collect()
    }

    /// Intraday bars of one day with the given highs (open/low/close flat).
    pub fn intraday(day_start: i64, bars: &[(i64, f64)]) -> Vec<Bar> {
        bars.iter()
            .map(|(minute, high)| Bar {
                timestamp: day_start + minute * 60,
                open: 100.0,
                high: *high,
                low: 99.0,
                close: 100.0,
                volume: 1.0,
            })
            .collect()
    }

    pub fn query(metric: Metric, predicate: Option<Predicate>, group: Option<GroupKey>) -> Query {
        let interval = Interval::days(
            NaiveDate::from_ymd_opt(2000, 1, 1).expect("date"),
            NaiveDate::from_ymd_opt(2099, 12, 31).expect("date"),
        )
        .expect("interval");
        Query {
            label: format!("{metric}"),
            interval,
            metric,
            predicate,
            group,
            timeframe: Timeframe::daily(),
            input: QueryInput::Scan,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::execute;
    use super::fixtures::{query, rows_from_changes, DAY, MONDAY};
    use crate::entities::operation::OperationSpec;
    use crate::entities::result::ResultStatus;
    use crate::errors::EngineError;
    use crate::value_objects::metric::Metric;
    use crate::value_objects::predicate::Predicate;

    #[test]
    fn input_arity_is_checked() {
        let spec = OperationSpec::Count {
            query: query(Metric::Change, None, None),
        };
        let err = execute("s1", &spec, &[]).expect_err("no inputs");
        assert_eq!(
            err,
            EngineError::InputArity {
                operation: "count",
                expected: 1,
                got: 0
            }
        );
    }

    #[test]
    fn metadata_reports_counts_and_filters() {
        let rows = rows_from_changes(MONDAY, DAY, &[1.0, -1.0, 2.0, -3.0]);
        let spec = OperationSpec::Count {
            query: query(Metric::Change, Some(Predicate::metric(Metric::Change).lt(0.0)), None),
        };
        let result = execute("s1", &spec, &[rows]).expect("count");
        assert_eq!(result.status, ResultStatus::Ok);
        assert_eq!(result.metadata.input_rows, 4);
        assert_eq!(result.metadata.filtered_rows, 2);
        assert_eq!(result.metadata.filters_applied, vec!["change < 0".to_string()]);
        assert_eq!(result.metadata.timeframe, "1day");
    }
}
