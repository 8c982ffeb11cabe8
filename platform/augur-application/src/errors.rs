use augur_domain::errors::{EngineError, PlanError, StoreError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("step '{step}': {source}")]
    Store {
        step: String,
        #[source]
        source: StoreError,
    },
    #[error("step '{step}': {source}")]
    Engine {
        step: String,
        #[source]
        source: EngineError,
    },
    #[error("step '{step}': resampling failed: {message}")]
    Resample { step: String, message: String },
    #[error(transparent)]
    Plan(#[from] PlanError),
    #[error("request timed out after {elapsed_ms} ms")]
    TimedOut { elapsed_ms: u64 },
    #[error("request cancelled")]
    Cancelled,
}

/// Everything a question can end in other than an answer. Each variant is
/// reported to the user as is; none carries a guessed figure.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("clarification needed: {}", .0.join("; "))]
    IncompleteSpec(Vec<String>),
    #[error("unsafe artifact rejected: {feedback}")]
    SafetyViolation { feedback: String },
    #[error("could not produce a verified {stage} after {attempts} attempt(s): {feedback}")]
    ValidationExhausted {
        stage: &'static str,
        attempts: u32,
        feedback: String,
    },
    #[error("execution failed: {0}")]
    Execution(ExecutionError),
    #[error("request timed out after {elapsed_ms} ms")]
    TimedOut { elapsed_ms: u64 },
    #[error("request cancelled")]
    Cancelled,
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("failed to encode results: {0}")]
    Encode(String),
}

impl PipelineError {
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::IncompleteSpec(_) => "incomplete_spec",
            PipelineError::SafetyViolation { .. } => "safety_violation",
            PipelineError::ValidationExhausted { .. } => "validation_exhausted",
            PipelineError::Execution(_) => "execution",
            PipelineError::TimedOut { .. } => "timed_out",
            PipelineError::Cancelled => "cancelled",
            PipelineError::Store(_) => "store",
            PipelineError::Encode(_) => "encode",
        }
    }
}

impl From<ExecutionError> for PipelineError {
    fn from(err: ExecutionError) -> Self {
        match err {
            ExecutionError::TimedOut { elapsed_ms } => PipelineError::TimedOut { elapsed_ms },
            ExecutionError::Cancelled => PipelineError::Cancelled,
            ExecutionError::Plan(plan) if plan.needs_clarification() => {
                PipelineError::IncompleteSpec(vec![plan.to_string()])
            }
            other => PipelineError::Execution(other),
        }
    }
}

impl From<PlanError> for PipelineError {
    fn from(err: PlanError) -> Self {
        ExecutionError::Plan(err).into()
    }
}
