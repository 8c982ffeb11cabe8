//! Artifact validator: every generated artifact passes safety, schema,
//! syntax and plausibility checks, in that order, before it may run. The
//! first stage with a blocking issue ends validation; soft issues only warn.

mod intent;
pub mod sql;

use crate::entities::step::RawStep;
use crate::entities::validation::{Artifact, Issue, IssueCategory, ValidationResult};
use crate::errors::StoreError;
use crate::repositories::row_store::RowStore;
use crate::services::planner::PlanBuilder;

/// The read-only surface a query artifact may touch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeclaredSchema {
    pub relations: Vec<String>,
    pub columns: Vec<String>,
}

impl DeclaredSchema {
    pub fn new(relations: Vec<String>, columns: Vec<String>) -> Self {
        Self {
            relations: relations.into_iter().map(|r| r.to_lowercase()).collect(),
            columns: columns.into_iter().map(|c| c.to_lowercase()).collect(),
        }
    }
}

pub struct ArtifactValidator<'a> {
    schema: &'a DeclaredSchema,
    planner: &'a PlanBuilder<'a>,
    store: &'a dyn RowStore,
    max_rows: u64,
}

impl<'a> ArtifactValidator<'a> {
    pub fn new(
        schema: &'a DeclaredSchema,
        planner: &'a PlanBuilder<'a>,
        store: &'a dyn RowStore,
        max_rows: u64,
    ) -> Self {
        Self {
            schema,
            planner,
            store,
            max_rows,
        }
    }

    /// `expected_rows` is the caller's order-of-magnitude guess for a query
    /// artifact's row count, if it has one.
    pub fn validate(&self, artifact: &Artifact, expected_rows: Option<u64>) -> ValidationResult {
        match artifact {
            Artifact::Query(sql) => self.validate_query(sql, expected_rows),
            Artifact::Steps(steps) => self.validate_steps(steps),
        }
    }

    fn validate_query(&self, sql: &str, expected_rows: Option<u64>) -> ValidationResult {
        let body = sql::strip_terminator(sql);
        staged(&[
            &|| sql::safety_issues(sql, &self.schema.relations),
            &|| sql::schema_issues(sql, &self.schema.columns),
            &|| self.dry_run(body),
            &|| self.row_count(body, expected_rows),
        ])
    }

    fn validate_steps(&self, steps: &[RawStep]) -> ValidationResult {
        staged(&[
            // Steps are data, never executed as text; nothing to screen here.
            &|| {
                if steps.is_empty() {
                    vec![Issue::hard(IssueCategory::Syntax, "artifact contains no steps")]
                } else {
                    Vec::new()
                }
            },
            &|| intent::schema_issues(self.planner.vocabulary(), steps),
            &|| intent::syntax_issues(self.planner, steps),
            &|| intent::plausibility_issues(self.planner, steps, self.max_rows),
        ])
    }

    fn dry_run(&self, body: &str) -> Vec<Issue> {
        match self.store.dry_run(body) {
            Ok(()) => Vec::new(),
            Err(StoreError::Unsupported(what)) => vec![Issue::soft(
                IssueCategory::Syntax,
                format!("{what} unavailable; syntax check skipped"),
            )],
            Err(StoreError::Query(message)) => vec![Issue::hard(IssueCategory::Syntax, message)],
            Err(err) => vec![Issue::soft(
                IssueCategory::Execution,
                format!("dry run could not complete: {err}"),
            )],
        }
    }

    fn row_count(&self, body: &str, expected: Option<u64>) -> Vec<Issue> {
        let Ok(rows) = self.store.count_rows(body) else {
            return Vec::new();
        };
        let mut issues = Vec::new();
        if rows == 0 {
            issues.push(Issue::soft(IssueCategory::Plausibility, "query returns no rows"));
        }
        if rows > self.max_rows {
            issues.push(Issue::soft(
                IssueCategory::Plausibility,
                format!("query returns {rows} rows, above the {}-row cap", self.max_rows),
            ));
        }
        if let Some(expected) = expected.filter(|e| *e > 0) {
            let ratio = rows.max(1) as f64 / expected as f64;
            if !(0.1..=10.0).contains(&ratio) {
                issues.push(Issue::soft(
                    IssueCategory::Plausibility,
                    format!("query returns {rows} rows where about {expected} were expected"),
                ));
            }
        }
        issues
    }
}

fn staged(stages: &[&dyn Fn() -> Vec<Issue>]) -> ValidationResult {
    let mut issues = Vec::new();
    for stage in stages {
        let found = stage();
        let blocking = found.iter().any(|i| !i.soft);
        issues.extend(found);
        if blocking {
            break;
        }
    }
    ValidationResult::from_issues(issues)
}

#[cfg(test)]
mod tests {
    use super::{ArtifactValidator, DeclaredSchema};
    use crate::entities::step::parse_steps;
    use crate::entities::validation::{Artifact, IssueCategory, ValidationStatus};
    use crate::errors::StoreError;
    use crate::repositories::row_store::{BarQuery, CancelToken, KnownRange, RowStore};
    use crate::services::planner::PlanBuilder;
    use crate::services::vocabulary::Vocabulary;
    use crate::value_objects::bar::Bar;
    use crate::value_objects::clock::DatasetClock;
    use crate::value_objects::timeframe::Timeframe;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct ProbeStore {
        dry_runs: AtomicUsize,
        rows: u64,
    }

    impl RowStore for ProbeStore {
        fn known_range(&self) -> Result<Option<KnownRange>, StoreError> {
            Ok(Some(KnownRange {
                first: 1_704_067_200,
                last: 1_735_603_200,
            }))
        }

        fn load_bars(&self, _: &BarQuery, _: &CancelToken) -> Result<Vec<Bar>, StoreError> {
            Ok(Vec::new())
        }

        fn dry_run(&self, artifact: &str) -> Result<(), StoreError> {
            self.dry_runs.fetch_add(1, Ordering::SeqCst);
            if artifact.contains("by by") {
                return Err(StoreError::Query("syntax error at or near \"by\"".to_string()));
            }
            Ok(())
        }

        fn count_rows(&self, _: &str) -> Result<u64, StoreError> {
            Ok(self.rows)
        }
    }

    fn schema() -> DeclaredSchema {
        DeclaredSchema::new(
            vec!["ohlcv_candles".to_string()],
            ["timestamp_utc", "open", "high", "low", "close", "volume"]
                .iter()
                .map(|c| c.to_string())
                .collect(),
        )
    }

    fn check(store: &ProbeStore, artifact: &Artifact) -> crate::entities::validation::ValidationResult {
        let vocab = Vocabulary::standard();
        let known = store.known_range().expect("range");
        let planner = PlanBuilder::new(&vocab, DatasetClock::utc(), Timeframe::daily(), known);
        let schema = schema();
        ArtifactValidator::new(&schema, &planner, store, 1_000).validate(artifact, None)
    }

    #[test]
    fn unsafe_query_fails_before_reaching_the_store() {
        let store = ProbeStore::default();
        let result = check(&store, &Artifact::Query("DROP TABLE ohlcv_candles".to_string()));
        assert_eq!(result.status, ValidationStatus::Failed);
        assert!(result.issues.iter().all(|i| i.category == IssueCategory::Safety));
        assert_eq!(store.dry_runs.load(Ordering::SeqCst), 0);
        assert!(result.feedback.starts_with("Rejected as unsafe"));
    }

    #[test]
    fn schema_stage_short_circuits_syntax() {
        let store = ProbeStore::default();
        let result = check(&store, &Artifact::Query("select clsoe from ohlcv_candles".to_string()));
        assert_eq!(result.status, ValidationStatus::Rewrite);
        assert_eq!(result.issues[0].suggestion.as_deref(), Some("close"));
        assert_eq!(store.dry_runs.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn syntax_errors_come_from_the_dry_run() {
        let store = ProbeStore::default();
        let result = check(&store, &Artifact::Query("select close from ohlcv_candles order by by close".to_string()));
        assert_eq!(result.status, ValidationStatus::Rewrite);
        assert_eq!(result.issues.last().map(|i| i.category), Some(IssueCategory::Syntax));
    }

    #[test]
    fn implausible_counts_only_warn() {
        let store = ProbeStore {
            rows: 50_000,
            ..ProbeStore::default()
        };
        let result = check(&store, &Artifact::Query("select close from ohlcv_candles;".to_string()));
        assert_eq!(result.status, ValidationStatus::Ok);
        assert_eq!(result.issues.len(), 1);
        assert!(result.issues[0].soft);
    }

    #[test]
    fn steps_collect_every_unknown_term() {
        let store = ProbeStore::default();
        let steps = parse_steps(
            r#"{"id":"s1","operation":"count","atoms":[{"when":"2024","what":"clsoe","filter":{"all":["mondey","doji"]}}]}"#,
        )
        .expect("steps");
        let result = check(&store, &Artifact::Steps(steps));
        assert_eq!(result.status, ValidationStatus::Rewrite);
        let suggestions: Vec<_> = result.issues.iter().filter_map(|i| i.suggestion.as_deref()).collect();
        assert_eq!(suggestions, vec!["close", "monday"]);
    }

    #[test]
    fn steps_fail_syntax_on_dangling_from() {
        let store = ProbeStore::default();
        let steps = parse_steps(
            r#"{"id":"s1","operation":"count","from":"s0","atoms":[{"when":"2024","what":"close"}]}"#,
        )
        .expect("steps");
        let result = check(&store, &Artifact::Steps(steps));
        assert_eq!(result.status, ValidationStatus::Rewrite);
        assert_eq!(result.issues[0].category, IssueCategory::Syntax);
    }

    #[test]
    fn steps_outside_stored_range_warn() {
        let store = ProbeStore::default();
        let steps = parse_steps(
            r#"{"id":"s1","operation":"list","params":{"n":5000},"atoms":[{"when":"2030","what":"close"}]}"#,
        )
        .expect("steps");
        let result = check(&store, &Artifact::Steps(steps));
        assert_eq!(result.status, ValidationStatus::Ok);
        assert_eq!(result.issues.len(), 2);
        assert!(result.issues.iter().all(|i| i.soft && i.category == IssueCategory::Plausibility));
    }
}
