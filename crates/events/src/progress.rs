//! Per-job progress channel.
//!
//! The worker reports progress through a [`ProgressSink`] while a job runs;
//! the receiving half is owned by whoever submitted the job. Reporting never
//! fails: if the receiver is gone (the requester disconnected), events are
//! dropped and the job carries on.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// A single progress report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// Fraction complete, always within `0.0..=1.0`.
    pub progress: f32,
    /// Human-readable stage description.
    pub description: String,
}

impl ProgressEvent {
    pub fn new(progress: f32, description: impl Into<String>) -> Self {
        let progress = if progress.is_nan() {
            0.0
        } else {
            progress.clamp(0.0, 1.0)
        };
        Self {
            progress,
            description: description.into(),
        }
    }
}

/// Sending half of a progress channel.
#[derive(Debug, Clone, Default)]
pub struct ProgressSink {
    tx: Option<mpsc::UnboundedSender<ProgressEvent>>,
}

impl ProgressSink {
    /// A sink that drops every event.
    pub fn discard() -> Self {
        Self { tx: None }
    }

    /// Report progress. Never blocks and never fails.
    pub fn report(&self, progress: f32, description: impl Into<String>) {
        let event = ProgressEvent::new(progress, description);
        tracing::trace!(progress = event.progress, description = %event.description, "Progress");
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }

    /// Whether anyone is still listening.
    pub fn is_connected(&self) -> bool {
        self.tx.as_ref().is_some_and(|tx| !tx.is_closed())
    }
}

/// Create a connected sink and its receiver.
pub fn progress_channel() -> (ProgressSink, mpsc::UnboundedReceiver<ProgressEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ProgressSink { tx: Some(tx) }, rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_is_clamped() {
        assert_eq!(ProgressEvent::new(1.7, "x").progress, 1.0);
        assert_eq!(ProgressEvent::new(-0.2, "x").progress, 0.0);
        assert_eq!(ProgressEvent::new(f32::NAN, "x").progress, 0.0);
        assert_eq!(ProgressEvent::new(0.5, "x").progress, 0.5);
    }

    #[tokio::test]
    async fn events_arrive_in_order() {
        let (sink, mut rx) = progress_channel();
        sink.report(0.2, "Loading components");
        sink.report(0.5, "Injecting weights");
        drop(sink);

        assert_eq!(rx.recv().await.unwrap().description, "Loading components");
        assert_eq!(rx.recv().await.unwrap().progress, 0.5);
        assert!(rx.recv().await.is_none(), "channel closes when the sink is dropped");
    }

    #[test]
    fn reporting_to_a_dropped_receiver_is_harmless() {
        let (sink, rx) = progress_channel();
        assert!(sink.is_connected());
        drop(rx);
        assert!(!sink.is_connected());
        sink.report(0.9, "still running");
    }

    #[test]
    fn discard_sink_is_never_connected() {
        let sink = ProgressSink::discard();
        assert!(!sink.is_connected());
        sink.report(0.1, "ignored");
    }
}
