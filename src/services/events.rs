use tokio::sync::mpsc;

/// Notifications flowing from the worker back to the driving UI.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    /// Full accumulated text of the stream feeding `slot`.
    Increment { slot: &'static str, text: String },
    StageComplete { slot: &'static str, text: String },
    /// Latest section text after a chapter finishes.
    NewDraft(String),
    Log(String),
    /// Prominent failure, e.g. an exhausted backend.
    Error(String),
    InitComplete,
    NovelComplete,
    OperationFinished,
}

/// Sending half of the event channel. Sends never fail: a UI that has gone
/// away simply stops receiving.
#[derive(Clone, Debug)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<PipelineEvent>,
}

impl EventSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<PipelineEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn emit(&self, event: PipelineEvent) {
        let _ = self.tx.send(event);
    }

    pub fn log(&self, message: impl Into<String>) {
        self.emit(PipelineEvent::Log(message.into()));
    }

    pub fn error(&self, message: impl Into<String>) {
        self.emit(PipelineEvent::Error(message.into()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_events_arrive_in_order() {
        let (sink, mut rx) = EventSink::channel();
        sink.log("first");
        sink.error("second");
        sink.emit(PipelineEvent::OperationFinished);

        assert_eq!(rx.recv().await, Some(PipelineEvent::Log("first".into())));
        assert_eq!(rx.recv().await, Some(PipelineEvent::Error("second".into())));
        assert_eq!(rx.recv().await, Some(PipelineEvent::OperationFinished));
    }

    #[test]
    fn test_send_after_receiver_dropped_is_silent() {
        let (sink, rx) = EventSink::channel();
        drop(rx);
        sink.log("nobody listening");
    }
}
