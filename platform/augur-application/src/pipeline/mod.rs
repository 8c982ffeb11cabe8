//! Question answering end to end: intent artifact → validated plan or query
//! → rows and results → summary text whose every number is verified against
//! those results.

use crate::config::Settings;
use crate::errors::PipelineError;
use crate::execution::PlanExecutor;
use crate::orchestrator::{RetryOrchestrator, Verdict};
use augur_domain::entities::attempt::AttemptContext;
use augur_domain::entities::query::Plan;
use augur_domain::entities::result::OpResult;
use augur_domain::entities::step::RawStep;
use augur_domain::entities::validation::{Artifact, Issue, IssueCategory, ValidationResult};
use augur_domain::errors::{PlanError, StoreError};
use augur_domain::events::pipeline_event::{PipelineEvent, Stage};
use augur_domain::repositories::collaborator::{Collaborator, IntentRequest, SummaryRequest};
use augur_domain::repositories::events::EventSink;
use augur_domain::repositories::row_store::{ArtifactRows, CancelToken, KnownRange, RowStore};
use augur_domain::services::planner::PlanBuilder;
use augur_domain::services::validator::sql::strip_terminator;
use augur_domain::services::validator::ArtifactValidator;
use augur_domain::services::verifier::{FactSheet, ResultVerifier};
use serde::Serialize;

pub type IntentCollaborator<'a> = &'a dyn Collaborator<Spec = IntentRequest, Output = Artifact>;
pub type SummaryCollaborator<'a> = &'a dyn Collaborator<Spec = SummaryRequest, Output = String>;

/// What an accepted intent artifact turned into.
enum Prepared {
    Plan(Plan),
    Query(String),
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AnswerData {
    Steps { results: Vec<OpResult> },
    Rows(ArtifactRows),
}

impl AnswerData {
    fn facts(&self, encoded: &serde_json::Value) -> FactSheet {
        match self {
            AnswerData::Steps { results } => FactSheet::from_results(results),
            AnswerData::Rows(_) => FactSheet::from_json(encoded),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct AttemptCounts {
    pub intent: u32,
    pub summary: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub text: String,
    pub artifact: Artifact,
    pub data: AnswerData,
    pub attempts: AttemptCounts,
    pub warnings: Vec<String>,
}

#[derive(Debug)]
pub enum Outcome {
    Answered(Box<Answer>),
    NeedsClarification(Vec<String>),
    Failed(PipelineError),
}

/// Serializable face of an [`Outcome`].
#[derive(Debug, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum OutcomeView<'a> {
    Answered { answer: &'a Answer },
    NeedsClarification { questions: &'a [String] },
    Failed { kind: &'static str, reason: String },
}

impl Outcome {
    pub fn view(&self) -> OutcomeView<'_> {
        match self {
            Outcome::Answered(answer) => OutcomeView::Answered { answer },
            Outcome::NeedsClarification(questions) => OutcomeView::NeedsClarification { questions },
            Outcome::Failed(err) => OutcomeView::Failed {
                kind: err.kind(),
                reason: err.to_string(),
            },
        }
    }
}

pub struct QuestionPipeline<'a> {
    intent: IntentCollaborator<'a>,
    summary: SummaryCollaborator<'a>,
    store: &'a dyn RowStore,
    settings: &'a Settings,
    events: &'a dyn EventSink,
}

impl<'a> QuestionPipeline<'a> {
    pub fn new(
        intent: IntentCollaborator<'a>,
        summary: SummaryCollaborator<'a>,
        store: &'a dyn RowStore,
        settings: &'a Settings,
        events: &'a dyn EventSink,
    ) -> Self {
        Self {
            intent,
            summary,
            store,
            settings,
            events,
        }
    }

    pub fn ask(&self, question: &str, cancel: &CancelToken) -> Outcome {
        let span = tracing::info_span!("pipeline.ask", chars = question.chars().count());
        let _guard = span.enter();

        match self.try_ask(question, cancel) {
            Ok(answer) => {
                metrics::counter!("augur.app.pipeline.questions_total", "result" => "answered").increment(1);
                self.events.emit(&PipelineEvent::FinalTextReady {
                    attempts: answer.attempts.summary,
                    chars: answer.text.chars().count(),
                });
                Outcome::Answered(Box::new(answer))
            }
            Err(PipelineError::IncompleteSpec(questions)) => {
                metrics::counter!("augur.app.pipeline.questions_total", "result" => "clarify").increment(1);
                tracing::info!(questions = questions.len(), "question needs clarification");
                Outcome::NeedsClarification(questions)
            }
            Err(err) => {
                metrics::counter!("augur.app.pipeline.questions_total", "result" => err.kind()).increment(1);
                tracing::warn!(error = %err, "question failed");
                self.events.emit(&PipelineEvent::RequestFailed {
                    reason: err.to_string(),
                });
                Outcome::Failed(err)
            }
        }
    }

    fn try_ask(&self, question: &str, cancel: &CancelToken) -> Result<Answer, PipelineError> {
        let known = self.store.known_range()?;
        let planner = planner(self.settings, known);
        let validator = ArtifactValidator::new(
            &self.settings.schema,
            &planner,
            self.store,
            self.settings.max_rows,
        );
        let orchestrator = RetryOrchestrator::new(self.settings.retry.max_attempts, self.events);

        let request = IntentRequest {
            question: question.to_string(),
            relations: self.settings.schema.relations.clone(),
            columns: self.settings.schema.columns.clone(),
            vocabulary: self.settings.vocabulary.hint(),
        };
        let intent = orchestrator.run(
            Stage::Intent,
            self.intent,
            &request,
            Artifact::render,
            |artifact, context| judge_intent(&planner, &validator, artifact, context),
        )?;

        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        let executor = PlanExecutor::new(self.store, self.settings, self.events);
        let data = match intent.value {
            Prepared::Plan(plan) => AnswerData::Steps {
                results: executor.execute(&plan, cancel)?,
            },
            Prepared::Query(sql) => AnswerData::Rows(executor.fetch_artifact(&sql, cancel)?),
        };

        let encoded = serde_json::to_value(&data)
            .map_err(|err| PipelineError::Encode(err.to_string()))?;
        let facts = data.facts(&encoded);
        let verifier = ResultVerifier::new(self.settings.tolerance);
        let summary_request = SummaryRequest {
            question: question.to_string(),
            results: encoded,
        };
        let summary = orchestrator.run(
            Stage::Summary,
            self.summary,
            &summary_request,
            |text: &String| text.clone(),
            |text, _context| Verdict::from_validation(verifier.verify(text, &facts), ()),
        )?;

        let mut warnings = intent.warnings;
        warnings.extend(summary.warnings);
        warnings.extend(no_data_notes(&data));
        Ok(Answer {
            text: summary.artifact,
            artifact: intent.artifact,
            data,
            attempts: AttemptCounts {
                intent: intent.attempts,
                summary: summary.attempts,
            },
            warnings,
        })
    }
}

fn planner(settings: &Settings, known: Option<KnownRange>) -> PlanBuilder<'_> {
    PlanBuilder::new(
        &settings.vocabulary,
        settings.clock,
        settings.base_timeframe.clone(),
        known,
    )
}

/// Missing `when`/`what` always goes back to the user. An unknown term is
/// first returned to the generator with its closest match and only becomes a
/// clarification once no attempt is left.
fn judge_intent(
    planner: &PlanBuilder<'_>,
    validator: &ArtifactValidator<'_>,
    artifact: &Artifact,
    context: &AttemptContext,
) -> Verdict<Prepared> {
    match artifact {
        Artifact::Steps(steps) => {
            let built = planner.build_plan(steps);
            match &built {
                Err(err @ PlanError::IncompleteSpec { .. }) => {
                    return Verdict::Clarify(vec![err.to_string()]);
                }
                Err(err @ PlanError::AmbiguousTerm { .. }) if context.remaining() == 0 => {
                    return Verdict::Clarify(vec![err.to_string()]);
                }
                _ => {}
            }
            let result = validator.validate(artifact, None);
            if !result.is_ok() {
                return Verdict::rejected(result);
            }
            match built {
                Ok(plan) => Verdict::from_validation(result, Prepared::Plan(plan)),
                Err(err) => Verdict::Revise(ValidationResult::from_issues(vec![Issue::hard(
                    IssueCategory::Syntax,
                    err.to_string(),
                )])),
            }
        }
        Artifact::Query(sql) => {
            let result = validator.validate(artifact, None);
            let body = strip_terminator(sql).to_string();
            Verdict::from_validation(result, Prepared::Query(body))
        }
    }
}

fn no_data_notes(data: &AnswerData) -> Vec<String> {
    match data {
        AnswerData::Steps { results } => results
            .iter()
            .filter(|r| r.is_insufficient())
            .map(|r| format!("step '{}': no data (insufficient sample)", r.step_id))
            .collect(),
        AnswerData::Rows(rows) if rows.rows.is_empty() => vec!["query returned no rows".to_string()],
        AnswerData::Rows(_) => Vec::new(),
    }
}

/// Validates and runs steps without a generator in the loop. Validation
/// problems come back as the validator's result, untouched.
pub fn run_steps(
    store: &dyn RowStore,
    settings: &Settings,
    events: &dyn EventSink,
    steps: &[RawStep],
    cancel: &CancelToken,
) -> Result<Result<Vec<OpResult>, ValidationResult>, PipelineError> {
    let known = store.known_range()?;
    let planner = planner(settings, known);
    if let Err(err) = planner.build_plan(steps) {
        if err.needs_clarification() {
            return Err(PipelineError::IncompleteSpec(vec![err.to_string()]));
        }
    }
    let validator = ArtifactValidator::new(&settings.schema, &planner, store, settings.max_rows);
    let result = validator.validate(&Artifact::Steps(steps.to_vec()), None);
    if !result.is_ok() {
        return Ok(Err(result));
    }
    let plan = planner.build_plan(steps)?;
    let results = PlanExecutor::new(store, settings, events).execute(&plan, cancel)?;
    Ok(Ok(results))
}

/// Runs the artifact validator alone, as the generate loop would.
pub fn validate_artifact(
    store: &dyn RowStore,
    settings: &Settings,
    artifact: &Artifact,
    expected_rows: Option<u64>,
) -> Result<ValidationResult, StoreError> {
    let known = store.known_range()?;
    let planner = planner(settings, known);
    let validator = ArtifactValidator::new(&settings.schema, &planner, store, settings.max_rows);
    Ok(validator.validate(artifact, expected_rows))
}
