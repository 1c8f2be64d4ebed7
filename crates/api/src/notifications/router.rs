use std::sync::Arc;

use arttic_events::PipelineEvent;
use tokio::sync::broadcast;

use crate::ws::messages::{ServerMessage, StatusData};
use crate::ws::ConnectionRegistry;

/// Broadcasts a `model_status` message to every connection whenever the
/// pipeline state changes.
pub struct NotificationRouter {
    registry: Arc<ConnectionRegistry>,
}

impl NotificationRouter {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// Run the routing loop.
    ///
    /// The loop exits when the channel is closed (i.e. the
    /// [`EventBus`](arttic_events::EventBus) is dropped).
    pub async fn run(self, mut receiver: broadcast::Receiver<PipelineEvent>) {
        loop {
            match receiver.recv().await {
                Ok(event) => self.route_event(&event).await,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "Notification router lagged");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    tracing::info!("Event bus closed, notification router shutting down");
                    break;
                }
            }
        }
    }

    async fn route_event(&self, event: &PipelineEvent) {
        let message = ServerMessage::ModelStatus(StatusData::from(event.snapshot()));
        let delivered = self.registry.broadcast(message.to_message()).await;
        tracing::debug!(event = event.name(), delivered, "Broadcast pipeline status");
    }
}

#[cfg(test)]
mod tests {
    use arttic_core::model::ModelFamily;
    use arttic_core::status::{PipelineSnapshot, PipelineStatus};
    use arttic_events::EventBus;
    use axum::extract::ws::Message;

    use super::*;

    #[tokio::test]
    async fn pipeline_events_reach_every_connection() {
        let registry = Arc::new(ConnectionRegistry::new());
        let mut rx_a = registry.add("a".to_string()).await;
        let mut rx_b = registry.add("b".to_string()).await;

        let bus = EventBus::default();
        let handle = tokio::spawn(NotificationRouter::new(Arc::clone(&registry)).run(bus.subscribe()));

        bus.publish(PipelineEvent::ModelLoaded {
            snapshot: PipelineSnapshot {
                status: PipelineStatus::Loaded,
                model: Some("sdxl-base".into()),
                family: Some(ModelFamily::Sdxl),
                ..Default::default()
            },
        });

        for rx in [&mut rx_a, &mut rx_b] {
            let Some(Message::Text(text)) = rx.recv().await else {
                panic!("expected a text frame");
            };
            let json: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();
            assert_eq!(json["type"], "model_status");
            assert_eq!(json["data"]["model"], "sdxl-base");
            assert_eq!(json["data"]["width"], 1024);
        }

        drop(bus);
        handle.await.unwrap();
    }
}
