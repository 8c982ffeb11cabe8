use augur_domain::events::pipeline_event::PipelineEvent;
use augur_domain::repositories::events::EventSink;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Mutex, PoisonError};

/// Forwards every event into an mpsc channel; a hung-up receiver is ignored.
pub struct ChannelEventSink {
    sender: Mutex<Sender<PipelineEvent>>,
}

impl ChannelEventSink {
    pub fn new() -> (Self, Receiver<PipelineEvent>) {
        let (sender, receiver) = mpsc::channel();
        (
            Self {
                sender: Mutex::new(sender),
            },
            receiver,
        )
    }
}

impl EventSink for ChannelEventSink {
    fn emit(&self, event: &PipelineEvent) {
        let sender = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        if sender.send(event.clone()).is_err() {
            tracing::trace!(event = event.name(), "event receiver dropped");
        }
    }
}

/// Keeps every event in memory, in emission order.
#[derive(Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<PipelineEvent>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<PipelineEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(PipelineEvent::name)
            .collect()
    }
}

impl EventSink for RecordingEventSink {
    fn emit(&self, event: &PipelineEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
    }
}

/// Delivers each event to every wrapped sink in order.
pub struct FanoutEventSink<'a> {
    sinks: Vec<&'a dyn EventSink>,
}

impl<'a> FanoutEventSink<'a> {
    pub fn new(sinks: Vec<&'a dyn EventSink>) -> Self {
        Self { sinks }
    }
}

impl EventSink for FanoutEventSink<'_> {
    fn emit(&self, event: &PipelineEvent) {
        for sink in &self.sinks {
            sink.emit(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ChannelEventSink, FanoutEventSink, RecordingEventSink};
    use augur_domain::events::pipeline_event::PipelineEvent;
    use augur_domain::repositories::events::EventSink;

    #[test]
    fn fanout_reaches_channel_and_recorder() {
        let (channel, receiver) = ChannelEventSink::new();
        let recorder = RecordingEventSink::new();
        let fanout = FanoutEventSink::new(vec![&channel, &recorder]);

        fanout.emit(&PipelineEvent::ResultReady {
            steps: 2,
            elapsed_ms: 5,
        });
        fanout.emit(&PipelineEvent::RequestFailed {
            reason: "timed out".to_string(),
        });

        assert_eq!(recorder.names(), vec!["result_ready", "request_failed"]);
        let received: Vec<_> = receiver.try_iter().collect();
        assert_eq!(received, recorder.events());
    }

    #[test]
    fn channel_sink_survives_dropped_receiver() {
        let (channel, receiver) = ChannelEventSink::new();
        drop(receiver);
        channel.emit(&PipelineEvent::ResultReady {
            steps: 0,
            elapsed_ms: 0,
        });
    }
}
