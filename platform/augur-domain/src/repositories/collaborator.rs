use crate::entities::attempt::AttemptContext;
use crate::errors::CollaboratorError;
use crate::services::vocabulary::VocabularyHint;
use serde::Serialize;

/// An opaque generating capability, typically a language model behind HTTP.
/// The core only ever sees its output as an untrusted artifact.
pub trait Collaborator: Send + Sync {
    type Spec;
    type Output;

    fn generate(&self, spec: &Self::Spec) -> Result<Self::Output, CollaboratorError>;

    fn revise(
        &self,
        spec: &Self::Spec,
        context: &AttemptContext,
    ) -> Result<Self::Output, CollaboratorError>;
}

#[derive(Debug, Clone, Serialize)]
pub struct IntentRequest {
    pub question: String,
    pub relations: Vec<String>,
    pub columns: Vec<String>,
    pub vocabulary: VocabularyHint,
}

#[derive(Debug, Clone, Serialize)]
pub struct SummaryRequest {
    pub question: String,
    pub results: serde_json::Value,
}
