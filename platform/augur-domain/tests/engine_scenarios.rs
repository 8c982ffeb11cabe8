use augur_domain::entities::query::{Plan, QueryInput};
use augur_domain::entities::result::{OpResult, ResultStatus};
use augur_domain::entities::step::parse_steps;
use augur_domain::errors::PlanError;
use augur_domain::repositories::row_store::KnownRange;
use augur_domain::services::operations::execute;
use augur_domain::services::planner::PlanBuilder;
use augur_domain::services::rows::{derive_rows, trim_to_interval};
use augur_domain::services::verifier::{FactSheet, ResultVerifier};
use augur_domain::services::vocabulary::Vocabulary;
use augur_domain::value_objects::bar::Bar;
use augur_domain::value_objects::clock::DatasetClock;
use augur_domain::value_objects::timeframe::Timeframe;
use std::collections::HashMap;

const MONDAY: i64 = 1_704_067_200;
const DAY: i64 = 86_400;

/// Four weeks of daily bars; Mondays drop hard, other days drift up.
fn bars() -> Vec<Bar> {
    let mut close = 100.0;
    (0..28)
        .map(|i| {
            let open = close;
            let change = match i % 7 {
                0 => -2.0 - f64::from(i) / 10.0,
                4 => -0.5,
                _ => 0.5,
            };
            close += change;
            Bar {
                timestamp: MONDAY + DAY * i64::from(i),
                open,
                high: open.max(close) + 0.25,
                low: open.min(close) - 0.25,
                close,
                volume: 1_000.0,
            }
        })
        .collect()
}

/// Minimal in-process runner: scans derive rows per query, `from` steps reuse
/// the upstream output relation.
fn run(plan: &Plan, bars: &[Bar], vocab: &Vocabulary) -> Vec<OpResult> {
    let clock = DatasetClock::utc();
    let mut by_id: HashMap<String, OpResult> = HashMap::new();
    let mut ordered = Vec::new();
    for step in plan.steps() {
        let inputs = step
            .operation
            .queries()
            .iter()
            .map(|query| match &query.input {
                QueryInput::Scan => trim_to_interval(
                    derive_rows(bars, &query.timeframe, &clock, vocab),
                    &query.interval,
                ),
                QueryInput::Upstream(from) => {
                    trim_to_interval(by_id[from].rows.clone(), &query.interval)
                }
            })
            .collect::<Vec<_>>();
        let result = execute(&step.id, &step.operation, &inputs).expect("execute");
        by_id.insert(step.id.clone(), result.clone());
        ordered.push(result);
    }
    ordered
}

fn planner(vocab: &Vocabulary) -> PlanBuilder<'_> {
    PlanBuilder::new(
        vocab,
        DatasetClock::utc(),
        Timeframe::daily(),
        Some(KnownRange {
            first: MONDAY,
            last: MONDAY + 27 * DAY,
        }),
    )
}

#[test]
fn biggest_drops_then_how_many_on_monday() {
    let vocab = Vocabulary::standard();
    let steps = parse_steps(
        r#"[
            {"id": "drops", "operation": "list", "params": {"n": 6, "sort": "asc"},
             "atoms": [{"when": "all", "what": "change"}]},
            {"id": "mondays", "operation": "count", "from": "drops",
             "atoms": [{"when": "all", "what": "change", "filter": "monday"}]}
        ]"#,
    )
    .expect("steps");
    let plan = planner(&vocab).build_plan(&steps).expect("plan");
    let results = run(&plan, &bars(), &vocab);

    assert_eq!(results[0].rows.len(), 6);
    let mondays = results[1].record("all").expect("summary");
    // The first Monday has no previous close, so three Monday drops lead the
    // list, followed by three of the -0.5 Fridays.
    assert_eq!(mondays.value("count"), Some(3.0));
    assert_eq!(results[1].metadata.input_rows, 6);
}

#[test]
fn missing_what_is_never_defaulted() {
    let vocab = Vocabulary::standard();
    let steps = parse_steps(r#"{"id": "s1", "operation": "count", "atoms": [{"when": "all"}]}"#)
        .expect("steps");
    let err = planner(&vocab).build_plan(&steps).expect_err("incomplete");
    assert!(matches!(err, PlanError::IncompleteSpec { field: "what", .. }));
}

#[test]
fn probability_without_condition_hits_is_insufficient() {
    let vocab = Vocabulary::standard();
    let steps = parse_steps(
        r#"{"id": "p", "operation": "probability", "params": {"outcome": "green", "offset": 1},
            "atoms": [{"when": "2024-01", "what": "change", "filter": "change < -50"}]}"#,
    )
    .expect("steps");
    let plan = planner(&vocab).build_plan(&steps).expect("plan");
    let results = run(&plan, &bars(), &vocab);
    assert_eq!(results[0].status, ResultStatus::InsufficientSample);
}

#[test]
fn summary_claims_are_checked_against_results() {
    let vocab = Vocabulary::standard();
    let steps = parse_steps(
        r#"{"id": "c", "operation": "count",
            "atoms": [{"when": "2024-01-01..2024-01-07", "what": "change"}]}"#,
    )
    .expect("steps");
    let plan = planner(&vocab).build_plan(&steps).expect("plan");
    let results = run(&plan, &bars(), &vocab);
    let facts = FactSheet::from_results(&results);
    let verifier = ResultVerifier::new(0.01);

    // Jan 1 has no previous close; Jan 2..7 are 0.5 x3, -0.5, 0.5 x2.
    assert!(verifier.verify("Over 6 days the average change was 0.33.", &facts).is_ok());
    assert!(!verifier.verify("Over 6 days the average change was 1.25.", &facts).is_ok());
}
