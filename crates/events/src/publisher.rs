//! Publisher trait for recorded actions.
//!
//! The rotation processor holds an `Arc<dyn EventPublisher>`; production
//! wires a [`crate::NatsPublisher`], tests use [`CapturePublisher`].

use async_trait::async_trait;
use banner_core::types::{Action, ActionEvent, ActionKind};
use parking_lot::Mutex;
use std::sync::Arc;

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: ActionEvent) -> anyhow::Result<()>;

    /// Flush anything buffered. Called once on shutdown.
    async fn shutdown(&self) -> anyhow::Result<()> {
        Ok(())
    }

    fn node_id(&self) -> &str {
        "local"
    }

    async fn show(&self, action: Action) -> anyhow::Result<()> {
        self.publish(ActionEvent::new(ActionKind::Show, action, self.node_id()))
            .await
    }

    async fn click(&self, action: Action) -> anyhow::Result<()> {
        self.publish(ActionEvent::new(ActionKind::Click, action, self.node_id()))
            .await
    }
}

/// Discards every event. Used when no broker is configured.
pub struct NoOpPublisher;

#[async_trait]
impl EventPublisher for NoOpPublisher {
    async fn publish(&self, _event: ActionEvent) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Keeps published events in memory for tests.
#[derive(Default)]
pub struct CapturePublisher {
    events: Mutex<Vec<ActionEvent>>,
}

impl CapturePublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ActionEvent> {
        self.events.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.events.lock().len()
    }

    pub fn count_kind(&self, kind: ActionKind) -> usize {
        self.events.lock().iter().filter(|e| e.kind == kind).count()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

#[async_trait]
impl EventPublisher for CapturePublisher {
    async fn publish(&self, event: ActionEvent) -> anyhow::Result<()> {
        self.events.lock().push(event);
        Ok(())
    }
}

pub fn noop_publisher() -> Arc<dyn EventPublisher> {
    Arc::new(NoOpPublisher)
}

pub fn capture_publisher() -> Arc<CapturePublisher> {
    Arc::new(CapturePublisher::new())
}
