use crate::events::pipeline_event::PipelineEvent;

/// Receives lifecycle events for the presentation layer. Emitting never fails
/// the pipeline.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &PipelineEvent);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn emit(&self, _event: &PipelineEvent) {}
}
