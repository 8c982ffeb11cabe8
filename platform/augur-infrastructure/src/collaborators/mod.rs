//! HTTP language-model collaborators. Both endpoints take a JSON envelope
//! carrying the request plus, on revisions, the attempt context with the
//! validator's feedback, and answer with an untrusted artifact.

use augur_domain::entities::attempt::AttemptContext;
use augur_domain::entities::step::RawStep;
use augur_domain::entities::validation::Artifact;
use augur_domain::errors::CollaboratorError;
use augur_domain::repositories::collaborator::{Collaborator, IntentRequest, SummaryRequest};
use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct HttpCollaboratorConfig {
    pub url: String,
    pub timeout_ms: u64,
    pub retries: u32,
    pub model: Option<String>,
}

#[derive(Debug, Serialize)]
struct Envelope<'a, R> {
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
    request: &'a R,
    #[serde(skip_serializing_if = "Option::is_none")]
    attempt: Option<&'a AttemptContext>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", content = "body", rename_all = "snake_case")]
enum ArtifactWire {
    Steps(Vec<RawStep>),
    Query(String),
}

#[derive(Debug, Deserialize)]
struct IntentResponse {
    artifact: ArtifactWire,
}

#[derive(Debug, Deserialize)]
struct SummaryResponse {
    text: String,
}

/// One JSON POST endpoint with the retry policy of the collaborators:
/// transport failures and 5xx are retried, anything else is final.
struct JsonEndpoint {
    endpoint: String,
    retries: u32,
    model: Option<String>,
    client: Client,
}

impl JsonEndpoint {
    fn new(config: &HttpCollaboratorConfig, path: &str) -> Result<Self, String> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|err| format!("failed to build http client: {err}"))?;
        Ok(Self {
            endpoint: format!("{}/{}", config.url.trim_end_matches('/'), path),
            retries: config.retries,
            model: config.model.clone(),
            client,
        })
    }

    fn post<R: Serialize, T: DeserializeOwned>(
        &self,
        call: &'static str,
        request: &R,
        attempt: Option<&AttemptContext>,
    ) -> Result<T, CollaboratorError> {
        let span = tracing::info_span!("infra.http.collaborator", call, endpoint = %self.endpoint);
        let _enter = span.enter();
        let envelope = Envelope {
            model: self.model.as_deref(),
            request,
            attempt,
        };
        let start = Instant::now();
        let mut tries = 0u32;
        let mut last_error = CollaboratorError::Transport("request was never sent".to_string());

        while tries <= self.retries {
            tries += 1;
            match self.client.post(&self.endpoint).json(&envelope).send() {
                Ok(resp) => {
                    let status = resp.status();
                    if status == StatusCode::OK {
                        let parsed = resp
                            .json::<T>()
                            .map_err(|err| CollaboratorError::Malformed(err.to_string()));
                        record(call, &parsed, tries, start);
                        return parsed;
                    }
                    last_error = CollaboratorError::Status {
                        status: status.as_u16(),
                    };
                    if status.is_server_error() && tries <= self.retries {
                        tracing::warn!(status = status.as_u16(), tries, "collaborator server error; retrying");
                        continue;
                    }
                    break;
                }
                Err(err) => {
                    tracing::warn!(error = %err, tries, "collaborator request failed");
                    last_error = CollaboratorError::Transport(err.to_string());
                }
            }
        }

        let failed: Result<T, CollaboratorError> = Err(last_error);
        record(call, &failed, tries, start);
        failed
    }
}

fn record<T>(call: &'static str, result: &Result<T, CollaboratorError>, tries: u32, start: Instant) {
    let label = if result.is_ok() { "ok" } else { "err" };
    metrics::counter!("augur.infra.http.collaborator.calls_total", "call" => call, "result" => label)
        .increment(1);
    metrics::histogram!("augur.infra.http.collaborator.call_ms", "call" => call)
        .record(start.elapsed().as_secs_f64() * 1000.0);
    tracing::debug!(tries, ok = result.is_ok(), "collaborator call finished");
}

/// Turns a question into a step list or a raw query (`POST {url}/v1/intent`).
pub struct HttpIntentClient {
    endpoint: JsonEndpoint,
}

impl HttpIntentClient {
    pub fn new(config: &HttpCollaboratorConfig) -> Result<Self, String> {
        Ok(Self {
            endpoint: JsonEndpoint::new(config, "v1/intent")?,
        })
    }

    fn call(
        &self,
        spec: &IntentRequest,
        attempt: Option<&AttemptContext>,
    ) -> Result<Artifact, CollaboratorError> {
        let response: IntentResponse = self.endpoint.post("intent", spec, attempt)?;
        Ok(match response.artifact {
            ArtifactWire::Steps(steps) => Artifact::Steps(steps),
            ArtifactWire::Query(sql) => Artifact::Query(sql),
        })
    }
}

impl Collaborator for HttpIntentClient {
    type Spec = IntentRequest;
    type Output = Artifact;

    fn generate(&self, spec: &IntentRequest) -> Result<Artifact, CollaboratorError> {
        self.call(spec, None)
    }

    fn revise(
        &self,
        spec: &IntentRequest,
        context: &AttemptContext,
    ) -> Result<Artifact, CollaboratorError> {
        self.call(spec, Some(context))
    }
}

/// Drafts the natural-language answer from results (`POST {url}/v1/summary`).
pub struct HttpSummaryClient {
    endpoint: JsonEndpoint,
}

impl HttpSummaryClient {
    pub fn new(config: &HttpCollaboratorConfig) -> Result<Self, String> {
        Ok(Self {
            endpoint: JsonEndpoint::new(config, "v1/summary")?,
        })
    }

    fn call(
        &self,
        spec: &SummaryRequest,
        attempt: Option<&AttemptContext>,
    ) -> Result<String, CollaboratorError> {
        let response: SummaryResponse = self.endpoint.post("summary", spec, attempt)?;
        if response.text.trim().is_empty() {
            return Err(CollaboratorError::Malformed("empty summary text".to_string()));
        }
        Ok(response.text)
    }
}

impl Collaborator for HttpSummaryClient {
    type Spec = SummaryRequest;
    type Output = String;

    fn generate(&self, spec: &SummaryRequest) -> Result<String, CollaboratorError> {
        self.call(spec, None)
    }

    fn revise(
        &self,
        spec: &SummaryRequest,
        context: &AttemptContext,
    ) -> Result<String, CollaboratorError> {
        self.call(spec, Some(context))
    }
}

#[cfg(test)]
mod tests {
    use super::{ArtifactWire, HttpCollaboratorConfig, HttpIntentClient, IntentResponse};

    #[test]
    fn intent_response_decodes_both_artifact_kinds() {
        let steps: IntentResponse = serde_json::from_str(
            r#"{"artifact": {"kind": "steps", "body": [
                {"id": "s1", "operation": "count",
                 "atoms": [{"when": "2024", "what": "change", "filter": "monday"}]}
            ]}}"#,
        )
        .expect("steps");
        assert!(matches!(steps.artifact, ArtifactWire::Steps(ref s) if s.len() == 1));

        let query: IntentResponse = serde_json::from_str(
            r#"{"artifact": {"kind": "query", "body": "SELECT 1"}}"#,
        )
        .expect("query");
        assert!(matches!(query.artifact, ArtifactWire::Query(ref q) if q == "SELECT 1"));
    }

    #[test]
    fn client_builds_with_trailing_slash_url() {
        let client = HttpIntentClient::new(&HttpCollaboratorConfig {
            url: "http://127.0.0.1:8000/".to_string(),
            timeout_ms: 200,
            retries: 0,
            model: None,
        })
        .expect("client");
        assert_eq!(client.endpoint.endpoint, "http://127.0.0.1:8000/v1/intent");
    }
}
