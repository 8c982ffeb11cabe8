use augur_domain::events::pipeline_event::PipelineEvent;
use augur_domain::repositories::events::EventSink;

/// Logs every lifecycle event as a structured tracing record and counts it.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: &PipelineEvent) {
        metrics::counter!("augur.infra.events.emitted_total", "event" => event.name()).increment(1);
        match event {
            PipelineEvent::ArtifactGenerated {
                stage,
                attempt,
                chars,
            } => {
                tracing::info!(event = event.name(), stage = ?stage, attempt, chars, "artifact generated");
            }
            PipelineEvent::ValidationOutcome {
                stage,
                attempt,
                status,
                issues,
            } => {
                tracing::info!(
                    event = event.name(),
                    stage = ?stage,
                    attempt,
                    status = ?status,
                    issues = issues.len(),
                    "validation outcome"
                );
                for issue in issues {
                    tracing::debug!(attempt, issue = %issue, "validation issue");
                }
            }
            PipelineEvent::StepStarted { step_id, operation } => {
                tracing::info!(event = event.name(), step = %step_id, operation = operation.name(), "step started");
            }
            PipelineEvent::StepFinished {
                step_id,
                operation,
                status,
                rows,
                records,
                elapsed_ms,
            } => {
                tracing::info!(
                    event = event.name(),
                    step = %step_id,
                    operation = operation.name(),
                    status = ?status,
                    rows,
                    records,
                    elapsed_ms,
                    "step finished"
                );
            }
            PipelineEvent::StepFailed {
                step_id,
                operation,
                error,
            } => {
                tracing::warn!(event = event.name(), step = %step_id, operation = operation.name(), error = %error, "step failed");
            }
            PipelineEvent::ResultReady { steps, elapsed_ms } => {
                tracing::info!(event = event.name(), steps, elapsed_ms, "result ready");
            }
            PipelineEvent::FinalTextReady { attempts, chars } => {
                tracing::info!(event = event.name(), attempts, chars, "final text ready");
            }
            PipelineEvent::RequestFailed { reason } => {
                tracing::warn!(event = event.name(), reason = %reason, "request failed");
            }
        }
    }
}
