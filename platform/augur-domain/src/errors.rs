use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Vocabulary namespace a term failed to resolve in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TermKind {
    Metric,
    Group,
    Term,
    Weekday,
    Session,
    Pattern,
    Event,
    Operator,
    Period,
    Timeframe,
    Operation,
    Time,
}

impl fmt::Display for TermKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TermKind::Metric => "metric",
            TermKind::Group => "grouping key",
            TermKind::Term => "vocabulary term",
            TermKind::Weekday => "weekday",
            TermKind::Session => "session",
            TermKind::Pattern => "candle pattern",
            TermKind::Event => "event",
            TermKind::Operator => "comparison operator",
            TermKind::Period => "period",
            TermKind::Timeframe => "timeframe",
            TermKind::Operation => "operation",
            TermKind::Time => "time of day",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind} '{term}'{}", suggestion_suffix(.suggestion))]
pub struct ResolveError {
    pub kind: TermKind,
    pub term: String,
    pub suggestion: Option<String>,
}

fn suggestion_suffix(suggestion: &Option<String>) -> String {
    match suggestion {
        Some(s) => format!(" (did you mean '{s}'?)"),
        None => String::new(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VocabularyError {
    #[error("vocabulary term '{term}' is defined twice ({first} and {second})")]
    DuplicateTerm {
        term: String,
        first: String,
        second: String,
    },
    #[error("{what} '{name}': invalid time '{value}' (expected HH:MM)")]
    InvalidTime {
        what: &'static str,
        name: String,
        value: String,
    },
    #[error("alias '{alias}' points at unknown {kind} '{target}'")]
    UnknownAliasTarget {
        alias: String,
        kind: TermKind,
        target: String,
    },
    #[error("too many {0} definitions")]
    TooMany(&'static str),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PlanError {
    #[error("step '{step}': atom {atom} is missing `{field}`")]
    IncompleteSpec {
        step: String,
        atom: usize,
        field: &'static str,
    },
    #[error("step '{step}': {error}")]
    AmbiguousTerm {
        step: String,
        #[source]
        error: ResolveError,
    },
    #[error("step '{step}': {message}")]
    InvalidStep { step: String, message: String },
    #[error("step '{step}' reads from unknown step '{from}'")]
    UnknownStep { step: String, from: String },
    #[error("duplicate step id '{0}'")]
    DuplicateStep(String),
    #[error("steps form a cycle through '{0}'")]
    Cycle(String),
    #[error("step '{step}' reads from '{from}', which produced no result")]
    UpstreamMissing { step: String, from: String },
    #[error("the row store holds no data to resolve period '{when}'")]
    EmptyStore { when: String },
    #[error("plan has no steps")]
    EmptyPlan,
}

impl PlanError {
    /// Incomplete or ambiguous input the user has to clarify; never guessed.
    pub fn needs_clarification(&self) -> bool {
        matches!(
            self,
            PlanError::IncompleteSpec { .. } | PlanError::AmbiguousTerm { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("{operation} expects {expected} input relation(s), got {got}")]
    InputArity {
        operation: &'static str,
        expected: usize,
        got: usize,
    },
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("row store unavailable: {0}")]
    Unavailable(String),
    #[error("query timed out after {elapsed_ms} ms")]
    Timeout { elapsed_ms: u64 },
    #[error("query cancelled")]
    Cancelled,
    #[error("query failed: {0}")]
    Query(String),
    #[error("{0} is not supported by this row store")]
    Unsupported(&'static str),
    #[error("row store misconfigured: {0}")]
    Config(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CollaboratorError {
    #[error("collaborator unreachable: {0}")]
    Transport(String),
    #[error("collaborator returned http status {status}")]
    Status { status: u16 },
    #[error("malformed collaborator response: {0}")]
    Malformed(String),
}
