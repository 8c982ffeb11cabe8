//! Generate → validate → accept | revise | abort, with a fixed attempt budget.
//!
//! The orchestrator owns no state beyond one `run` call: every attempt gets a
//! fresh [`AttemptContext`] carrying the accumulated feedback, and an artifact
//! that repeats an earlier attempt byte for byte is turned back without being
//! validated again.

use crate::errors::PipelineError;
use augur_domain::entities::attempt::AttemptContext;
use augur_domain::entities::validation::{Issue, IssueCategory, ValidationResult, ValidationStatus};
use augur_domain::events::pipeline_event::{PipelineEvent, Stage};
use augur_domain::repositories::collaborator::Collaborator;
use augur_domain::repositories::events::EventSink;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use thiserror::Error;

/// What a judge decides about one generated artifact.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict<T> {
    Accept { value: T, warnings: Vec<String> },
    Revise(ValidationResult),
    /// Terminal: the artifact is unsafe.
    Reject(ValidationResult),
    /// Terminal: only the user can resolve the request.
    Clarify(Vec<String>),
}

impl<T> Verdict<T> {
    pub fn from_validation(result: ValidationResult, value: T) -> Self {
        match result.status {
            ValidationStatus::Ok => Verdict::Accept {
                value,
                warnings: result.issue_messages(),
            },
            _ => Verdict::rejected(result),
        }
    }

    /// For a result that did not pass: unsafe ends the run, anything else
    /// asks for a revision.
    pub fn rejected(result: ValidationResult) -> Self {
        match result.status {
            ValidationStatus::Failed => Verdict::Reject(result),
            _ => Verdict::Revise(result),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Accepted<O, T> {
    pub artifact: O,
    pub value: T,
    /// Attempts spent, the accepted one included.
    pub attempts: u32,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum OrchestrationError {
    #[error("{stage} artifact rejected as unsafe on attempt {attempt}: {feedback}")]
    Unsafe {
        stage: &'static str,
        attempt: u32,
        feedback: String,
    },
    #[error("no acceptable {stage} artifact after {attempts} attempt(s): {feedback}")]
    Exhausted {
        stage: &'static str,
        attempts: u32,
        feedback: String,
    },
    #[error("clarification needed: {}", .0.join("; "))]
    Clarification(Vec<String>),
}

impl From<OrchestrationError> for PipelineError {
    fn from(err: OrchestrationError) -> Self {
        match err {
            OrchestrationError::Unsafe { feedback, .. } => PipelineError::SafetyViolation { feedback },
            OrchestrationError::Exhausted {
                stage,
                attempts,
                feedback,
            } => PipelineError::ValidationExhausted {
                stage,
                attempts,
                feedback,
            },
            OrchestrationError::Clarification(questions) => PipelineError::IncompleteSpec(questions),
        }
    }
}

pub fn stage_name(stage: Stage) -> &'static str {
    match stage {
        Stage::Intent => "intent",
        Stage::Summary => "summary",
    }
}

pub struct RetryOrchestrator<'a> {
    max_attempts: u32,
    events: &'a dyn EventSink,
}

impl<'a> RetryOrchestrator<'a> {
    /// `max_attempts` counts every generation call, the first one included;
    /// zero is treated as one.
    pub fn new(max_attempts: u32, events: &'a dyn EventSink) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            events,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Calls the collaborator at most `max_attempts` times. A failed
    /// generation call spends an attempt like a rejected artifact does.
    pub fn run<S, O, T>(
        &self,
        stage: Stage,
        collaborator: &dyn Collaborator<Spec = S, Output = O>,
        spec: &S,
        render: impl Fn(&O) -> String,
        mut judge: impl FnMut(&O, &AttemptContext) -> Verdict<T>,
    ) -> Result<Accepted<O, T>, OrchestrationError> {
        let label = stage_name(stage);
        let span = tracing::info_span!("orchestrator.run", stage = label, max_attempts = self.max_attempts);
        let _guard = span.enter();

        let mut context = AttemptContext::first(self.max_attempts);
        let mut seen: HashMap<String, u32> = HashMap::new();
        let mut last_rejection: Option<ValidationResult> = None;

        loop {
            let generated = if context.is_retry() {
                collaborator.revise(spec, &context)
            } else {
                collaborator.generate(spec)
            };

            let (previous, feedback) = match generated {
                Err(err) => {
                    metrics::counter!("augur.app.orchestrator.attempts_total", "stage" => label, "result" => "generation_error")
                        .increment(1);
                    tracing::warn!(attempt = context.attempt, error = %err, "generation failed");
                    (None, format!("generation failed: {err}"))
                }
                Ok(output) => {
                    let text = render(&output);
                    self.events.emit(&PipelineEvent::ArtifactGenerated {
                        stage,
                        attempt: context.attempt,
                        chars: text.chars().count(),
                    });

                    let key = fingerprint(&text);
                    let verdict = match seen.get(&key).copied() {
                        Some(first) => Verdict::Revise(repeat_rejection(first, last_rejection.as_ref())),
                        None => {
                            seen.insert(key, context.attempt);
                            judge(&output, &context)
                        }
                    };
                    self.emit_outcome(stage, context.attempt, &verdict);

                    match verdict {
                        Verdict::Accept { value, warnings } => {
                            metrics::counter!("augur.app.orchestrator.attempts_total", "stage" => label, "result" => "accepted")
                                .increment(1);
                            metrics::histogram!("augur.app.orchestrator.attempts_used", "stage" => label)
                                .record(f64::from(context.attempt));
                            tracing::info!(attempt = context.attempt, warnings = warnings.len(), "artifact accepted");
                            return Ok(Accepted {
                                artifact: output,
                                value,
                                attempts: context.attempt,
                                warnings,
                            });
                        }
                        Verdict::Reject(result) => {
                            metrics::counter!("augur.app.orchestrator.attempts_total", "stage" => label, "result" => "unsafe")
                                .increment(1);
                            tracing::warn!(attempt = context.attempt, "artifact rejected as unsafe");
                            return Err(OrchestrationError::Unsafe {
                                stage: label,
                                attempt: context.attempt,
                                feedback: result.feedback,
                            });
                        }
                        Verdict::Clarify(questions) => {
                            metrics::counter!("augur.app.orchestrator.attempts_total", "stage" => label, "result" => "clarify")
                                .increment(1);
                            return Err(OrchestrationError::Clarification(questions));
                        }
                        Verdict::Revise(result) => {
                            metrics::counter!("augur.app.orchestrator.attempts_total", "stage" => label, "result" => "revise")
                                .increment(1);
                            tracing::info!(attempt = context.attempt, issues = result.issues.len(), "artifact needs revision");
                            let feedback = result.feedback.clone();
                            last_rejection = Some(result);
                            (Some(text), feedback)
                        }
                    }
                }
            };

            if context.remaining() == 0 {
                tracing::warn!(attempts = context.attempt, "attempt budget exhausted");
                return Err(OrchestrationError::Exhausted {
                    stage: label,
                    attempts: context.attempt,
                    feedback,
                });
            }
            context = context.next(previous, feedback);
        }
    }

    fn emit_outcome<T>(&self, stage: Stage, attempt: u32, verdict: &Verdict<T>) {
        let (status, issues) = match verdict {
            Verdict::Accept { warnings, .. } => (ValidationStatus::Ok, warnings.clone()),
            Verdict::Revise(result) | Verdict::Reject(result) => (result.status, result.issue_messages()),
            Verdict::Clarify(questions) => (ValidationStatus::Rewrite, questions.clone()),
        };
        self.events.emit(&PipelineEvent::ValidationOutcome {
            stage,
            attempt,
            status,
            issues,
        });
    }
}

fn repeat_rejection(first: u32, last: Option<&ValidationResult>) -> ValidationResult {
    let category = last
        .and_then(|r| r.issues.iter().find(|i| !i.soft))
        .map(|i| i.category)
        .unwrap_or(IssueCategory::Syntax);
    let mut issues = vec![Issue::hard(
        category,
        format!("artifact is identical to attempt {first}, which was already rejected"),
    )];
    if let Some(last) = last {
        issues.extend(last.issues.iter().filter(|i| !i.soft).cloned());
    }
    ValidationResult::from_issues(issues)
}

fn fingerprint(text: &str) -> String {
    let digest = Sha256::digest(text.trim().as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}
