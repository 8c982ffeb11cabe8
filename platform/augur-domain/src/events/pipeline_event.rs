use crate::entities::operation::OperationKind;
use crate::entities::result::ResultStatus;
use crate::entities::validation::ValidationStatus;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Intent,
    Summary,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    ArtifactGenerated {
        stage: Stage,
        attempt: u32,
        chars: usize,
    },
    ValidationOutcome {
        stage: Stage,
        attempt: u32,
        status: ValidationStatus,
        issues: Vec<String>,
    },
    StepStarted {
        step_id: String,
        operation: OperationKind,
    },
    StepFinished {
        step_id: String,
        operation: OperationKind,
        status: ResultStatus,
        rows: usize,
        records: usize,
        elapsed_ms: u64,
    },
    StepFailed {
        step_id: String,
        operation: OperationKind,
        error: String,
    },
    ResultReady {
        steps: usize,
        elapsed_ms: u64,
    },
    FinalTextReady {
        attempts: u32,
        chars: usize,
    },
    RequestFailed {
        reason: String,
    },
}

impl PipelineEvent {
    pub fn name(&self) -> &'static str {
        match self {
            PipelineEvent::ArtifactGenerated { .. } => "artifact_generated",
            PipelineEvent::ValidationOutcome { .. } => "validation_outcome",
            PipelineEvent::StepStarted { .. } => "step_started",
            PipelineEvent::StepFinished { .. } => "step_finished",
            PipelineEvent::StepFailed { .. } => "step_failed",
            PipelineEvent::ResultReady { .. } => "result_ready",
            PipelineEvent::FinalTextReady { .. } => "final_text_ready",
            PipelineEvent::RequestFailed { .. } => "request_failed",
        }
    }
}
