use crate::entities::operation::OperationKind;
use crate::entities::query::QueryInput;
use crate::entities::step::RawStep;
use crate::entities::validation::{Issue, IssueCategory};
use crate::errors::ResolveError;
use crate::services::planner::PlanBuilder;
use crate::services::vocabulary::{closest_match, Vocabulary};
use crate::value_objects::timeframe::Timeframe;

fn resolve_issue(step: &str, error: ResolveError) -> Issue {
    Issue::hard(
        IssueCategory::Schema,
        format!("step '{step}': unknown {} '{}'", error.kind, error.term),
    )
    .with_suggestion(error.suggestion)
}

/// Every name in every step checked against the vocabulary; all problems are
/// collected, not just the first.
pub(super) fn schema_issues(vocab: &Vocabulary, steps: &[RawStep]) -> Vec<Issue> {
    let mut issues = Vec::new();
    for step in steps {
        let id = step.id.as_str();
        if OperationKind::from_name(&step.operation).is_none() {
            issues.push(
                Issue::hard(
                    IssueCategory::Schema,
                    format!("step '{id}': unknown operation '{}'", step.operation),
                )
                .with_suggestion(closest_match(
                    &step.operation.trim().to_lowercase(),
                    OperationKind::ALL.iter().map(|k| k.name()),
                )),
            );
        }
        for (index, atom) in step.atoms.iter().enumerate() {
            for (field, value) in [("when", &atom.when), ("what", &atom.what)] {
                if value.as_deref().is_none_or(|v| v.trim().is_empty()) {
                    issues.push(Issue::hard(
                        IssueCategory::Schema,
                        format!("step '{id}': atom {index} is missing `{field}`"),
                    ));
                }
            }
            if let Some(what) = &atom.what {
                if let Err(err) = vocab.resolve_metric(what) {
                    issues.push(resolve_issue(id, err));
                }
            }
            if let Some(group) = &atom.group {
                if let Err(err) = vocab.resolve_group(group) {
                    issues.push(resolve_issue(id, err));
                }
            }
            if let Some(filter) = &atom.filter {
                issues.extend(vocab.filter_errors(filter).into_iter().map(|e| resolve_issue(id, e)));
            }
            if let Some(tf) = &atom.timeframe {
                if Timeframe::parse(tf).is_err() {
                    issues.push(Issue::hard(
                        IssueCategory::Schema,
                        format!("step '{id}': unknown timeframe '{tf}'"),
                    ));
                }
            }
        }
        if let Some(by) = &step.params.by {
            if let Err(err) = vocab.resolve_metric(by) {
                issues.push(resolve_issue(id, err));
            }
        }
        for filter in [&step.params.condition, &step.params.outcome].into_iter().flatten() {
            issues.extend(vocab.filter_errors(filter).into_iter().map(|e| resolve_issue(id, e)));
        }
    }
    issues
}

/// Dry-run compile: dangling `from`, cycles, per-operation requirements.
pub(super) fn syntax_issues(planner: &PlanBuilder<'_>, steps: &[RawStep]) -> Vec<Issue> {
    match planner.build_plan(steps) {
        Ok(_) => Vec::new(),
        Err(err) => vec![Issue::hard(IssueCategory::Syntax, err.to_string())],
    }
}

pub(super) fn plausibility_issues(
    planner: &PlanBuilder<'_>,
    steps: &[RawStep],
    max_rows: u64,
) -> Vec<Issue> {
    let Ok(plan) = planner.build_plan(steps) else {
        return Vec::new();
    };
    let mut issues = Vec::new();
    for step in steps {
        if let Some(n) = step.params.n {
            if n as u64 > max_rows {
                issues.push(Issue::soft(
                    IssueCategory::Plausibility,
                    format!("step '{}': n = {n} exceeds the {max_rows}-row cap", step.id),
                ));
            }
        }
    }
    if let Some(range) = planner.known_range() {
        let clock = planner.clock();
        let (first, last) = (clock.local(range.first), clock.local(range.last));
        for step in plan.steps() {
            for query in step.operation.queries() {
                if query.input != QueryInput::Scan {
                    continue;
                }
                if query.interval.end <= first || query.interval.start > last {
                    issues.push(Issue::soft(
                        IssueCategory::Plausibility,
                        format!(
                            "step '{}': period {} lies outside the stored data ({} .. {})",
                            step.id,
                            query.interval,
                            first.date(),
                            last.date()
                        ),
                    ));
                }
            }
        }
    }
    issues
}
