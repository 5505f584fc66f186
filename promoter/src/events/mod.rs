//! Event emission.
//!
//! Components receive an [`EventSink`] through their constructors and publish
//! typed [`DeliveryEvent`]s through [`publish`]. Consumers such as telemetry
//! or notifications live outside the engine.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

use crate::core::DeliveryEvent;

/// Publishes a domain event to a sink.
pub async fn publish(sink: &dyn EventSink, event: &DeliveryEvent) {
    sink.emit(event.event_type(), Some(event.to_data())).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::DeliveryEvent;

    #[tokio::test]
    async fn test_publish_uses_event_type() {
        let sink = CollectingEventSink::new();
        publish(&sink, &DeliveryEvent::ArtifactCheckComplete { duration_ms: 12 }).await;

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].0, "artifact.check_complete");
        assert_eq!(
            events[0].1.as_ref().map(|d| d["duration_ms"].clone()),
            Some(serde_json::json!(12))
        );
    }
}
