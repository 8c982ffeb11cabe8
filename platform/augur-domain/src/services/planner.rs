//! Query plan builder: compiles raw steps into typed, dependency-ordered
//! queries. Nothing is defaulted that the caller did not say; missing `when`
//! or `what` and unknown vocabulary are errors routed to clarification.

use crate::entities::operation::{OperationKind, OperationSpec, ResolvedParams};
use crate::entities::query::{Plan, PlannedStep, Query, QueryInput};
use crate::entities::step::{RawAtom, RawStep};
use crate::errors::{PlanError, ResolveError, TermKind};
use crate::repositories::row_store::KnownRange;
use crate::services::vocabulary::{closest_match, Vocabulary};
use crate::value_objects::clock::DatasetClock;
use crate::value_objects::group::GroupKey;
use crate::value_objects::interval::Interval;
use crate::value_objects::predicate::Predicate;
use crate::value_objects::timeframe::Timeframe;
use chrono::{Datelike, Days, Months, NaiveDate};
use regex::Regex;
use std::sync::LazyLock;

static RELATIVE_PERIOD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^last_(\d+)_(day|week|month|year)s?$").expect("hardcoded period regex must compile")
});
static QUARTER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{4})_q([1-4])$").expect("hardcoded quarter regex must compile")
});

const PERIOD_KEYWORDS: [&str; 6] = [
    "all",
    "ytd",
    "last_7_days",
    "last_4_weeks",
    "last_12_months",
    "last_1_year",
];

pub struct PlanBuilder<'a> {
    vocab: &'a Vocabulary,
    clock: DatasetClock,
    base: Timeframe,
    known: Option<KnownRange>,
}

impl<'a> PlanBuilder<'a> {
    /// `known` is the row store's available range; periods relative to "now"
    /// anchor on its last bar, never on the wall clock.
    pub fn new(
        vocab: &'a Vocabulary,
        clock: DatasetClock,
        base: Timeframe,
        known: Option<KnownRange>,
    ) -> Self {
        Self {
            vocab,
            clock,
            base,
            known,
        }
    }

    pub fn vocabulary(&self) -> &Vocabulary {
        self.vocab
    }

    pub fn known_range(&self) -> Option<KnownRange> {
        self.known
    }

    pub fn clock(&self) -> DatasetClock {
        self.clock
    }

    pub fn base_timeframe(&self) -> &Timeframe {
        &self.base
    }

    pub fn build_plan(&self, steps: &[RawStep]) -> Result<Plan, PlanError> {
        let planned = steps
            .iter()
            .map(|step| self.build_step(step))
            .collect::<Result<Vec<_>, _>>()?;
        Plan::new(planned)
    }

    pub fn build_step(&self, raw: &RawStep) -> Result<PlannedStep, PlanError> {
        let step = raw.id.trim();
        if step.is_empty() {
            return Err(PlanError::InvalidStep {
                step: String::new(),
                message: "step id is empty".to_string(),
            });
        }
        let ambiguous = |error: ResolveError| PlanError::AmbiguousTerm {
            step: step.to_string(),
            error,
        };

        let kind = OperationKind::from_name(&raw.operation).ok_or_else(|| {
            ambiguous(ResolveError {
                kind: TermKind::Operation,
                term: raw.operation.clone(),
                suggestion: closest_match(
                    &raw.operation.trim().to_lowercase(),
                    OperationKind::ALL.iter().map(|k| k.name()),
                ),
            })
        })?;
        if raw.atoms.is_empty() {
            return Err(PlanError::InvalidStep {
                step: step.to_string(),
                message: format!("{kind} needs at least one atom"),
            });
        }
        if raw.from.as_deref().map(str::trim) == Some(step) {
            return Err(PlanError::Cycle(step.to_string()));
        }

        // Presence is checked for every atom before anything is resolved.
        for (index, atom) in raw.atoms.iter().enumerate() {
            required(step, index, "when", atom.when.as_deref())?;
            required(step, index, "what", atom.what.as_deref())?;
        }

        let input = match raw.from.as_deref().map(str::trim) {
            Some(from) => QueryInput::Upstream(from.to_string()),
            None => QueryInput::Scan,
        };
        let queries = raw
            .atoms
            .iter()
            .enumerate()
            .map(|(index, atom)| self.build_query(step, index, atom, kind, &input))
            .collect::<Result<Vec<_>, _>>()?;

        let params = &raw.params;
        let resolved = ResolvedParams {
            by: params
                .by
                .as_deref()
                .map(|by| self.vocab.resolve_metric(by))
                .transpose()
                .map_err(ambiguous)?,
            condition: params
                .condition
                .as_ref()
                .map(|c| self.vocab.resolve_filter(c))
                .transpose()
                .map_err(ambiguous)?,
            outcome: params
                .outcome
                .as_ref()
                .map(|o| self.vocab.resolve_filter(o))
                .transpose()
                .map_err(ambiguous)?,
        };
        let operation = OperationSpec::from_raw(step, kind, queries, params, resolved)?;

        Ok(PlannedStep {
            id: step.to_string(),
            from: raw.from.as_deref().map(|f| f.trim().to_string()),
            operation,
        })
    }

    fn build_query(
        &self,
        step: &str,
        index: usize,
        atom: &RawAtom,
        kind: OperationKind,
        input: &QueryInput,
    ) -> Result<Query, PlanError> {
        let ambiguous = |error: ResolveError| PlanError::AmbiguousTerm {
            step: step.to_string(),
            error,
        };
        let when = required(step, index, "when", atom.when.as_deref())?;
        let what = required(step, index, "what", atom.what.as_deref())?;

        let metric = self.vocab.resolve_metric(what).map_err(ambiguous)?;
        let interval = self.resolve_when(step, when)?;
        let predicate = atom
            .filter
            .as_ref()
            .map(|f| self.vocab.resolve_filter(f))
            .transpose()
            .map_err(ambiguous)?;
        let mut group = atom
            .group
            .as_deref()
            .map(|g| self.vocab.resolve_group(g))
            .transpose()
            .map_err(ambiguous)?;
        if kind == OperationKind::Formation && group.is_none() {
            group = Some(GroupKey::Date);
        }
        let timeframe = self.granularity(
            step,
            kind,
            atom.timeframe.as_deref(),
            group,
            predicate.as_ref(),
        )?;

        let mut label = format!("{metric} | {when}");
        if let Some(p) = &predicate {
            label.push_str(&format!(" | {p}"));
        }
        if let Some(g) = group {
            label.push_str(&format!(" | by {g}"));
        }

        Ok(Query {
            label,
            interval,
            metric,
            predicate,
            group,
            timeframe,
            input: input.clone(),
        })
    }

    /// Event-formation and sub-day grouping or filtering read intraday bars;
    /// everything else defaults to daily bars.
    fn granularity(
        &self,
        step: &str,
        kind: OperationKind,
        requested: Option<&str>,
        group: Option<GroupKey>,
        predicate: Option<&Predicate>,
    ) -> Result<Timeframe, PlanError> {
        let invalid = |message: String| PlanError::InvalidStep {
            step: step.to_string(),
            message,
        };
        let needs_intraday = kind == OperationKind::Formation
            || group.is_some_and(GroupKey::is_intraday)
            || predicate.is_some_and(Predicate::is_intraday);

        let timeframe = match requested.map(str::trim).filter(|t| !t.is_empty()) {
            Some(label) => Timeframe::parse(label).map_err(|_| PlanError::AmbiguousTerm {
                step: step.to_string(),
                error: ResolveError {
                    kind: TermKind::Timeframe,
                    term: label.to_string(),
                    suggestion: None,
                },
            })?,
            None if needs_intraday || !self.base.is_intraday() => self.base.clone(),
            None => Timeframe::daily(),
        };

        if !timeframe.is_multiple_of(&self.base) {
            return Err(invalid(format!(
                "timeframe {timeframe} cannot be built from stored {} bars",
                self.base
            )));
        }
        if needs_intraday && !timeframe.is_intraday() {
            return Err(invalid(format!(
                "{kind} with this grouping or filter needs intraday bars, got {timeframe}"
            )));
        }
        Ok(timeframe)
    }

    /// Resolves a period reference into a half-open local interval.
    pub fn resolve_when(&self, step: &str, when: &str) -> Result<Interval, PlanError> {
        let key = when.trim().to_lowercase().replace([' ', '-'], "_");
        let invalid = |message: String| PlanError::InvalidStep {
            step: step.to_string(),
            message,
        };
        let unknown = || PlanError::AmbiguousTerm {
            step: step.to_string(),
            error: ResolveError {
                kind: TermKind::Period,
                term: when.to_string(),
                suggestion: closest_match(&key, PERIOD_KEYWORDS),
            },
        };

        if let Some((left, right)) = when.split_once("..") {
            let first = self.resolve_when(step, left)?;
            let last = self.resolve_when(step, right)?;
            return Interval::new(first.start, last.end).map_err(invalid);
        }

        match key.as_str() {
            "all" | "all_time" | "all_history" | "max" => {
                let (first, last) = self.known_dates(when)?;
                return Interval::days(first, last).map_err(invalid);
            }
            "ytd" | "year_to_date" => {
                let (_, last) = self.known_dates(when)?;
                let jan1 = ymd(last.year(), 1, 1).ok_or_else(unknown)?;
                return Interval::days(jan1, last).map_err(invalid);
            }
            _ => {}
        }

        if let Some(caps) = RELATIVE_PERIOD.captures(&key) {
            let n: u32 = caps[1].parse().map_err(|_| unknown())?;
            if n == 0 {
                return Err(invalid(format!("period '{when}' covers no time")));
            }
            let (_, anchor) = self.known_dates(when)?;
            let first = match &caps[2] {
                "day" => anchor.checked_sub_days(Days::new(u64::from(n) - 1)),
                "week" => anchor.checked_sub_days(Days::new(7 * u64::from(n) - 1)),
                "month" => anchor
                    .checked_sub_months(Months::new(n))
                    .and_then(|d| d.succ_opt()),
                _ => anchor
                    .checked_sub_months(Months::new(n.saturating_mul(12)))
                    .and_then(|d| d.succ_opt()),
            }
            .ok_or_else(unknown)?;
            return Interval::days(first, anchor).map_err(invalid);
        }

        let trimmed = when.trim();
        if let Some(caps) = QUARTER.captures(&key) {
            let year: i32 = caps[1].parse().map_err(|_| unknown())?;
            let quarter: u32 = caps[2].parse().map_err(|_| unknown())?;
            let start = ymd(year, (quarter - 1) * 3 + 1, 1).ok_or_else(unknown)?;
            let end = start.checked_add_months(Months::new(3)).ok_or_else(unknown)?;
            return Interval::days(start, end.pred_opt().ok_or_else(unknown)?).map_err(invalid);
        }
        if trimmed.len() == 4 && trimmed.chars().all(|c| c.is_ascii_digit()) {
            let year: i32 = trimmed.parse().map_err(|_| unknown())?;
            let start = ymd(year, 1, 1).ok_or_else(unknown)?;
            let last = ymd(year, 12, 31).ok_or_else(unknown)?;
            return Interval::days(start, last).map_err(invalid);
        }
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
            return Interval::days(date, date).map_err(invalid);
        }
        if let Ok(start) = NaiveDate::parse_from_str(&format!("{trimmed}-01"), "%Y-%m-%d") {
            let end = start.checked_add_months(Months::new(1)).ok_or_else(unknown)?;
            return Interval::days(start, end.pred_opt().ok_or_else(unknown)?).map_err(invalid);
        }

        Err(unknown())
    }

    fn known_dates(&self, when: &str) -> Result<(NaiveDate, NaiveDate), PlanError> {
        let range = self.known.ok_or_else(|| PlanError::EmptyStore {
            when: when.to_string(),
        })?;
        Ok((
            self.clock.local(range.first).date(),
            self.clock.local(range.last).date(),
        ))
    }
}

fn required<'s>(
    step: &str,
    atom: usize,
    field: &'static str,
    value: Option<&'s str>,
) -> Result<&'s str, PlanError> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| PlanError::IncompleteSpec {
            step: step.to_string(),
            atom,
            field,
        })
}

fn ymd(year: i32, month: u32, day: u32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year, month, day)
}

#[cfg(test)]
mod tests {
    use super::PlanBuilder;
    use crate::entities::operation::OperationSpec;
    use crate::entities::query::QueryInput;
    use crate::entities::step::{parse_steps, RawStep};
    use crate::errors::{PlanError, TermKind};
    use crate::repositories::row_store::KnownRange;
    use crate::services::vocabulary::Vocabulary;
    use crate::value_objects::clock::DatasetClock;
    use crate::value_objects::timeframe::Timeframe;
    use chrono::NaiveDate;

    // 2023-06-15 00:00 UTC .. 2024-03-14 15:55 UTC
    const FIRST: i64 = 1_686_787_200;
    const LAST: i64 = 1_710_431_700;

    fn builder(vocab: &Vocabulary) -> PlanBuilder<'_> {
        PlanBuilder::new(
            vocab,
            DatasetClock::utc(),
            Timeframe::parse("5min").expect("tf"),
            Some(KnownRange {
                first: FIRST,
                last: LAST,
            }),
        )
    }

    fn steps(json: &str) -> Vec<RawStep> {
        parse_steps(json).expect("steps json")
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("date")
    }

    #[test]
    fn missing_when_or_what_is_incomplete_spec() {
        let vocab = Vocabulary::standard();
        let planner = builder(&vocab);
        for (atom, field) in [
            (r#"{"what":"close"}"#, "when"),
            (r#"{"when":"2024"}"#, "what"),
            (r#"{"when":"  ","what":"close"}"#, "when"),
        ] {
            let json = format!(r#"{{"id":"s1","operation":"count","atoms":[{atom}]}}"#);
            let err = planner.build_plan(&steps(&json)).expect_err("incomplete");
            assert!(
                matches!(err, PlanError::IncompleteSpec { field: f, .. } if f == field),
                "{err:?}"
            );
            assert!(err.needs_clarification());
        }
    }

    #[test]
    fn unknown_vocabulary_is_ambiguous_never_defaulted() {
        let vocab = Vocabulary::standard();
        let planner = builder(&vocab);
        let err = planner
            .build_plan(&steps(
                r#"{"id":"s1","operation":"count","atoms":[{"when":"2024","what":"close","filter":"mondey"}]}"#,
            ))
            .expect_err("typo");
        match err {
            PlanError::AmbiguousTerm { error, .. } => {
                assert_eq!(error.suggestion.as_deref(), Some("monday"));
            }
            other => panic!("unexpected {other:?}"),
        }

        let err = planner
            .build_plan(&steps(
                r#"{"id":"s1","operation":"cuont","atoms":[{"when":"2024","what":"close"}]}"#,
            ))
            .expect_err("operation typo");
        assert!(matches!(
            err,
            PlanError::AmbiguousTerm { ref error, .. }
                if error.kind == TermKind::Operation && error.suggestion.as_deref() == Some("count")
        ));
    }

    #[test]
    fn when_grammar_resolves_against_known_range() {
        let vocab = Vocabulary::standard();
        let planner = builder(&vocab);
        let days = |when: &str| {
            let i = planner.resolve_when("s1", when).expect(when);
            (i.start.date(), i.end.date())
        };
        assert_eq!(days("all"), (date(2023, 6, 15), date(2024, 3, 15)));
        assert_eq!(days("2024"), (date(2024, 1, 1), date(2025, 1, 1)));
        assert_eq!(days("2024-02"), (date(2024, 2, 1), date(2024, 3, 1)));
        assert_eq!(days("2024-02-29"), (date(2024, 2, 29), date(2024, 3, 1)));
        assert_eq!(days("2023-Q4"), (date(2023, 10, 1), date(2024, 1, 1)));
        assert_eq!(days("2024-01-10..2024-01-12"), (date(2024, 1, 10), date(2024, 1, 13)));
        assert_eq!(days("last_3_days"), (date(2024, 3, 12), date(2024, 3, 15)));
        assert_eq!(days("last 2 weeks"), (date(2024, 3, 1), date(2024, 3, 15)));
        assert_eq!(days("last_1_month"), (date(2024, 2, 15), date(2024, 3, 15)));
        assert_eq!(days("ytd"), (date(2024, 1, 1), date(2024, 3, 15)));

        assert!(matches!(
            planner.resolve_when("s1", "sometime"),
            Err(PlanError::AmbiguousTerm { .. })
        ));
        assert!(matches!(
            planner.resolve_when("s1", "2024-02-01..2024-01-01"),
            Err(PlanError::InvalidStep { .. })
        ));
    }

    #[test]
    fn relative_periods_need_a_known_range() {
        let vocab = Vocabulary::standard();
        let planner = PlanBuilder::new(&vocab, DatasetClock::utc(), Timeframe::daily(), None);
        assert!(matches!(
            planner.resolve_when("s1", "all"),
            Err(PlanError::EmptyStore { .. })
        ));
        assert!(planner.resolve_when("s1", "2024").is_ok());
    }

    #[test]
    fn granularity_follows_operation() {
        let vocab = Vocabulary::standard();
        let planner = builder(&vocab);
        let plan = planner
            .build_plan(&steps(
                r#"[{"id":"daily","operation":"count","atoms":[{"when":"2024","what":"change_pct"}]},
                    {"id":"form","operation":"formation","atoms":[{"when":"2024","what":"high"}]}]"#,
            ))
            .expect("plan");
        let daily = plan.steps()[0].operation.queries()[0].clone();
        assert_eq!(daily.timeframe, Timeframe::daily());
        match &plan.steps()[1].operation {
            OperationSpec::Formation { query, .. } => {
                assert_eq!(query.timeframe.label, "5min");
                assert_eq!(query.group, Some(crate::value_objects::group::GroupKey::Date));
            }
            other => panic!("unexpected {other:?}"),
        }

        let daily_store = Vocabulary::standard();
        let planner = PlanBuilder::new(&daily_store, DatasetClock::utc(), Timeframe::daily(), None);
        let err = planner
            .build_plan(&steps(
                r#"{"id":"f","operation":"formation","atoms":[{"when":"2024","what":"high"}]}"#,
            ))
            .expect_err("formation needs intraday data");
        assert!(matches!(err, PlanError::InvalidStep { .. }));
    }

    #[test]
    fn from_binds_upstream_and_orders_plan() {
        let vocab = Vocabulary::standard();
        let planner = builder(&vocab);
        let plan = planner
            .build_plan(&steps(
                r#"[{"id":"s2","operation":"count","from":"s1","atoms":[{"when":"all","what":"change_pct","filter":"monday"}]},
                    {"id":"s1","operation":"list","params":{"n":10,"sort":"asc"},"atoms":[{"when":"2024","what":"change_pct"}]}]"#,
            ))
            .expect("plan");
        let ids: Vec<&str> = plan.steps().iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["s1", "s2"]);
        assert_eq!(
            plan.steps()[1].operation.queries()[0].input,
            QueryInput::Upstream("s1".to_string())
        );
        assert_eq!(plan.layers(), vec![vec![0], vec![1]]);
    }

    #[test]
    fn dangling_and_cyclic_references_are_rejected() {
        let vocab = Vocabulary::standard();
        let planner = builder(&vocab);
        let atom = r#"[{"when":"2024","what":"close"}]"#;
        let dangling = format!(r#"{{"id":"s1","operation":"count","from":"s9","atoms":{atom}}}"#);
        assert!(matches!(
            planner.build_plan(&steps(&dangling)),
            Err(PlanError::UnknownStep { .. })
        ));
        let cycle = format!(
            r#"[{{"id":"a","operation":"count","from":"b","atoms":{atom}}},
                {{"id":"b","operation":"count","from":"a","atoms":{atom}}}]"#
        );
        assert!(matches!(planner.build_plan(&steps(&cycle)), Err(PlanError::Cycle(_))));
        let dup = format!(
            r#"[{{"id":"a","operation":"count","atoms":{atom}}},
                {{"id":"a","operation":"count","atoms":{atom}}}]"#
        );
        assert!(matches!(
            planner.build_plan(&steps(&dup)),
            Err(PlanError::DuplicateStep(_))
        ));
    }

    #[test]
    fn per_operation_requirements_are_enforced() {
        let vocab = Vocabulary::standard();
        let planner = builder(&vocab);
        let atom = r#"{"when":"2024","what":"change_pct"}"#;
        for json in [
            format!(r#"{{"id":"s","operation":"compare","atoms":[{atom}]}}"#),
            format!(r#"{{"id":"s","operation":"correlation","atoms":[{atom},{atom},{atom}]}}"#),
            format!(r#"{{"id":"s","operation":"around","atoms":[{atom}]}}"#),
            format!(r#"{{"id":"s","operation":"streak","atoms":[{atom}]}}"#),
            format!(r#"{{"id":"s","operation":"probability","atoms":[{atom}]}}"#),
        ] {
            let err = planner.build_plan(&steps(&json)).expect_err(&json);
            assert!(matches!(err, PlanError::InvalidStep { .. }), "{json}: {err:?}");
        }
    }
}
