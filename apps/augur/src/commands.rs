//! Non-interactive commands. Each returns the JSON document printed on
//! stdout plus the process exit code: 0 on success, 2 when the input was
//! understood but rejected (validation, clarification, unverified summary),
//! 1 for failures.

use crate::bootstrap::{self, Loaded};
use augur_application::errors::PipelineError;
use augur_application::pipeline::{self, Outcome, QuestionPipeline};
use augur_domain::entities::step::{parse_steps, RawStep};
use augur_domain::entities::validation::{Artifact, ValidationResult};
use augur_domain::repositories::row_store::CancelToken;
use augur_domain::services::verifier::{extract_claims, FactSheet, ResultVerifier};
use augur_infrastructure::events::TracingEventSink;
use serde_json::json;
use std::fs;
use std::path::Path;

pub const EXIT_OK: i32 = 0;
pub const EXIT_FAILED: i32 = 1;
pub const EXIT_REJECTED: i32 = 2;

#[derive(Debug)]
pub struct Report {
    pub json: serde_json::Value,
    pub exit_code: i32,
}

impl Report {
    fn ok(json: serde_json::Value) -> Self {
        Self {
            json,
            exit_code: EXIT_OK,
        }
    }

    fn rejected(json: serde_json::Value) -> Self {
        Self {
            json,
            exit_code: EXIT_REJECTED,
        }
    }
}

pub enum ValidateTarget<'a> {
    Query(&'a str),
    Steps(&'a Path),
}

pub fn ask(loaded: &Loaded, question: &str) -> Result<Report, String> {
    let store = bootstrap::build_store(loaded)?;
    let (intent, summary) = bootstrap::build_collaborators(&loaded.config)?;
    let events = TracingEventSink;
    let pipeline = QuestionPipeline::new(&intent, &summary, store.as_ref(), &loaded.settings, &events);

    let outcome = pipeline.ask(question, &CancelToken::new());
    let mut json = to_json(&outcome.view())?;
    json["command"] = json!("ask");
    let exit_code = match outcome {
        Outcome::Answered(_) => EXIT_OK,
        Outcome::NeedsClarification(_) => EXIT_REJECTED,
        Outcome::Failed(_) => EXIT_FAILED,
    };
    Ok(Report { json, exit_code })
}

pub fn run(loaded: &Loaded, steps_path: &Path) -> Result<Report, String> {
    let steps = read_steps(steps_path)?;
    let store = bootstrap::build_store(loaded)?;
    let events = TracingEventSink;

    match pipeline::run_steps(store.as_ref(), &loaded.settings, &events, &steps, &CancelToken::new()) {
        Ok(Ok(results)) => Ok(Report::ok(json!({
            "status": "ok",
            "command": "run",
            "steps": results.len(),
            "results": to_json(&results)?,
        }))),
        Ok(Err(validation)) => Ok(Report::rejected(rejection("run", &validation)?)),
        Err(PipelineError::IncompleteSpec(questions)) => Ok(Report::rejected(json!({
            "status": "needs_clarification",
            "command": "run",
            "questions": questions,
        }))),
        Err(err) => Err(format!("run failed ({}): {err}", err.kind())),
    }
}

pub fn validate(
    loaded: &Loaded,
    target: ValidateTarget<'_>,
    expected_rows: Option<u64>,
) -> Result<Report, String> {
    let artifact = match target {
        ValidateTarget::Query(sql) => Artifact::Query(sql.to_string()),
        ValidateTarget::Steps(path) => Artifact::Steps(read_steps(path)?),
    };
    let store = bootstrap::build_store(loaded)?;
    let result = pipeline::validate_artifact(store.as_ref(), &loaded.settings, &artifact, expected_rows)
        .map_err(|err| format!("validation could not run: {err}"))?;

    if result.is_ok() {
        Ok(Report::ok(json!({
            "status": "ok",
            "command": "validate",
            "validation": to_json(&result)?,
        })))
    } else {
        Ok(Report::rejected(rejection("validate", &result)?))
    }
}

/// Checks every number in `summary` against the values in a result document
/// (any JSON, typically the output of `run`).
pub fn verify(result_path: &Path, summary: &str, tolerance: f64) -> Result<Report, String> {
    let raw = fs::read_to_string(result_path)
        .map_err(|err| format!("failed to read result {}: {err}", result_path.display()))?;
    let document: serde_json::Value = serde_json::from_str(&raw)
        .map_err(|err| format!("failed to parse result {}: {err}", result_path.display()))?;

    let facts = FactSheet::from_json(&document);
    let claims = extract_claims(summary).len();
    let result = ResultVerifier::new(tolerance).verify(summary, &facts);
    tracing::info!(claims, facts = facts.len(), status = ?result.status, "summary verified");

    let json = json!({
        "status": if result.is_ok() { "ok" } else { "rejected" },
        "command": "verify",
        "claims": claims,
        "validation": to_json(&result)?,
    });
    Ok(if result.is_ok() {
        Report::ok(json)
    } else {
        Report::rejected(json)
    })
}

fn read_steps(path: &Path) -> Result<Vec<RawStep>, String> {
    let raw = fs::read_to_string(path)
        .map_err(|err| format!("failed to read steps {}: {err}", path.display()))?;
    parse_steps(&raw).map_err(|err| format!("failed to parse steps {}: {err}", path.display()))
}

fn rejection(command: &str, validation: &ValidationResult) -> Result<serde_json::Value, String> {
    Ok(json!({
        "status": "rejected",
        "command": command,
        "validation": to_json(validation)?,
    }))
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<serde_json::Value, String> {
    serde_json::to_value(value).map_err(|err| format!("failed to encode output: {err}"))
}
