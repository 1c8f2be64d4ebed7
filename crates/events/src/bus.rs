//! In-process event bus backed by a `tokio::sync::broadcast` channel.
//!
//! [`EventBus`] fans out [`PipelineEvent`]s from the worker to any number of
//! subscribers. It is designed to be shared via `Arc<EventBus>`.

use arttic_core::status::PipelineSnapshot;
use serde::Serialize;
use tokio::sync::broadcast;

// ---------------------------------------------------------------------------
// PipelineEvent
// ---------------------------------------------------------------------------

/// A change in pipeline state that every observer should learn about.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PipelineEvent {
    /// A model finished loading.
    ModelLoaded { snapshot: PipelineSnapshot },

    /// The pipeline was released, explicitly or after a failed load.
    ModelUnloaded { snapshot: PipelineSnapshot },

    /// Mode, placement, or optimization of the loaded pipeline changed.
    StateChanged { snapshot: PipelineSnapshot },
}

impl PipelineEvent {
    pub fn snapshot(&self) -> &PipelineSnapshot {
        match self {
            PipelineEvent::ModelLoaded { snapshot }
            | PipelineEvent::ModelUnloaded { snapshot }
            | PipelineEvent::StateChanged { snapshot } => snapshot,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            PipelineEvent::ModelLoaded { .. } => "model_loaded",
            PipelineEvent::ModelUnloaded { .. } => "model_unloaded",
            PipelineEvent::StateChanged { .. } => "state_changed",
        }
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 256;

/// In-process fan-out event bus.
///
/// Wraps a [`broadcast::Sender`] so that any number of subscribers can
/// independently receive every published [`PipelineEvent`].
pub struct EventBus {
    sender: broadcast::Sender<PipelineEvent>,
}

impl EventBus {
    /// Create a bus with a specific channel capacity.
    ///
    /// When the buffer is full, the oldest un-consumed messages are dropped
    /// and slow receivers will observe a `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all current subscribers.
    ///
    /// If there are no active subscribers the event is silently dropped.
    pub fn publish(&self, event: PipelineEvent) {
        tracing::debug!(event = event.name(), "Publishing pipeline event");
        // Ignore the SendError, it only means there are zero receivers.
        let _ = self.sender.send(event);
    }

    /// Subscribe to all events published on this bus.
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use arttic_core::status::PipelineStatus;

    fn loaded() -> PipelineSnapshot {
        PipelineSnapshot {
            status: PipelineStatus::Loaded,
            model: Some("sd15-A".into()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn publish_and_receive_single_subscriber() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();

        bus.publish(PipelineEvent::ModelLoaded { snapshot: loaded() });

        let received = rx.recv().await.expect("should receive the event");
        assert_eq!(received.name(), "model_loaded");
        assert_eq!(received.snapshot().model.as_deref(), Some("sd15-A"));
    }

    #[tokio::test]
    async fn multiple_subscribers_receive_same_event() {
        let bus = EventBus::default();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.publish(PipelineEvent::ModelUnloaded {
            snapshot: PipelineSnapshot::default(),
        });

        let e1 = rx1.recv().await.expect("subscriber 1 should receive");
        let e2 = rx2.recv().await.expect("subscriber 2 should receive");
        assert_eq!(e1, e2);
        assert!(!e1.snapshot().is_loaded());
    }

    #[test]
    fn publish_with_no_subscribers_does_not_panic() {
        let bus = EventBus::default();
        bus.publish(PipelineEvent::StateChanged { snapshot: loaded() });
    }

    #[test]
    fn serializes_with_event_tag() {
        let json = serde_json::to_value(PipelineEvent::StateChanged { snapshot: loaded() }).unwrap();
        assert_eq!(json["event"], "state_changed");
        assert_eq!(json["snapshot"]["status"], "loaded");
    }
}
