use super::{metric_values, owned, selected, Outcome};
use crate::entities::query::Query;
use crate::entities::result::{AggregateRecord, Shape};
use crate::services::stats;
use crate::value_objects::row::Row;

pub(super) fn run(query: &Query, buckets: usize, percentiles: &[f64], rows: &[Row]) -> Outcome {
    let picked = selected(query, rows);
    let values = metric_values(query.metric, &picked);
    let sorted = stats::sorted(&values);
    let summary = stats::summarize(&values);

    let mut outcome = Outcome::new(Shape::Series, picked.len()).insufficient_if(values.is_empty());
    let mut head = AggregateRecord::new("summary")
        .with("count", summary.count as f64)
        .with_opt("mean", summary.mean)
        .with_opt("median", stats::median(&sorted))
        .with_opt("std", stats::std_dev(&values))
        .with_opt("min", summary.min)
        .with_opt("max", summary.max);
    for p in percentiles {
        head = head.with_opt(&percentile_name(*p), stats::percentile(&sorted, *p));
    }
    outcome.records.push(head);

    let total = values.len().max(1) as f64;
    outcome.records.extend(stats::histogram(&values, buckets).into_iter().map(|bucket| {
        AggregateRecord::new(format!("[{:.4}, {:.4}]", bucket.lower, bucket.upper))
            .with("lower", bucket.lower)
            .with("upper", bucket.upper)
            .with("count", bucket.count as f64)
            .with("share", bucket.count as f64 / total)
    }));
    outcome.rows = owned(&picked);
    outcome
}

fn percentile_name(p: f64) -> String {
    if p.fract() == 0.0 {
        format!("p{p:.0}")
    } else {
        format!("p{p}")
    }
}
